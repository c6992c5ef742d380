use std::sync::Arc;

use crate::{
    catalog::{TableInfo, Value},
    error::{DbError, DbResult},
    execution::Context,
    record::{Record, Rid},
    transaction::{IndexOpType, IndexWriteRecord, WriteRecord, WriteType},
};

/// INSERT of a single row. Takes table IX, writes the heap, then every
/// index (with an exclusive gap on single-column INT indexes), logging undo
/// entries as it goes.
pub struct InsertExecutor<'a> {
    table: Arc<TableInfo>,
    values: Vec<Value>,
    ctx: Context<'a>,
    rid: Rid,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(table: Arc<TableInfo>, values: Vec<Value>, ctx: Context<'a>) -> DbResult<Self> {
        let expected = table.columns().len();
        if values.len() != expected {
            return Err(DbError::InvalidValueCount {
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            table,
            values,
            ctx,
            rid: Rid::INVALID,
        })
    }

    /// Position the row landed on.
    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn execute(&mut self) -> DbResult<usize> {
        let fh = &self.table.file;
        let fd = fh.fd();
        let tab_name = self.table.meta.read().unwrap().name.clone();

        self.ctx.lock_manager.lock_ix_on_table(self.ctx.txn, fd)?;

        // assemble the record image
        let cols = self.table.columns();
        let mut record = Record::new(fh.record_size());
        for (col, value) in cols.iter().zip(&self.values) {
            if col.col_type != value.column_type() {
                return Err(DbError::IncompatibleType {
                    expected: col.col_type.name().to_string(),
                    got: value.column_type().name().to_string(),
                });
            }
            let bytes = value.to_bytes(col.len)?;
            record.data[col.offset..col.offset + col.len].copy_from_slice(&bytes);
        }

        let rid = fh.insert_record(&record.data)?;
        self.rid = rid;

        // Undo entry first, so the index mutations below hang off it.
        self.ctx.txn.append_write_record(WriteRecord::new(
            WriteType::Insert,
            &tab_name,
            rid,
            record.clone(),
        ));

        for index_meta in self.table.index_metas() {
            let key = index_meta.build_key(&record.data);

            if index_meta.is_single_int() {
                let insert_key = i32::from_le_bytes(key[..4].try_into().unwrap());
                self.ctx.lock_manager.lock_exclusive_on_gap(
                    self.ctx.txn,
                    fd,
                    insert_key,
                    insert_key,
                )?;
            }

            let ih = self.table.get_index(&index_meta.name)?;
            ih.insert_entry(&key, rid)?;
            self.ctx.txn.append_index_op(IndexWriteRecord {
                index_name: index_meta.name.clone(),
                key,
                rid,
                op: IndexOpType::Insert,
            });
        }

        Ok(1)
    }
}
