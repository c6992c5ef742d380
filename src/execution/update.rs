use std::sync::Arc;

use crate::{
    catalog::{TableInfo, Value},
    error::{DbError, DbResult},
    execution::Context,
    record::Rid,
    transaction::{IndexOpType, IndexWriteRecord, WriteRecord, WriteType},
};

#[derive(Debug, Clone)]
pub struct SetClause {
    pub col_name: String,
    pub value: Value,
}

impl SetClause {
    pub fn new(col_name: &str, value: Value) -> Self {
        Self {
            col_name: col_name.to_string(),
            value,
        }
    }
}

/// UPDATE of the given rids. Takes table IX and record X per rid; the old
/// index entry is dropped under the old key's gap, the heap rewritten, the
/// new entry inserted under the new key's gap when it differs.
pub struct UpdateExecutor<'a> {
    table: Arc<TableInfo>,
    set_clauses: Vec<SetClause>,
    rids: Vec<Rid>,
    ctx: Context<'a>,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        table: Arc<TableInfo>,
        set_clauses: Vec<SetClause>,
        rids: Vec<Rid>,
        ctx: Context<'a>,
    ) -> Self {
        Self {
            table,
            set_clauses,
            rids,
            ctx,
        }
    }

    pub fn execute(&mut self) -> DbResult<usize> {
        let fh = &self.table.file;
        let fd = fh.fd();
        let tab_name = self.table.meta.read().unwrap().name.clone();
        let meta = self.table.meta.read().unwrap().clone();

        self.ctx.lock_manager.lock_ix_on_table(self.ctx.txn, fd)?;

        for rid in &self.rids {
            // X first: a scan's S lock on the row upgrades here, which
            // aborts when anyone else also holds S.
            self.ctx
                .lock_manager
                .lock_exclusive_on_record(self.ctx.txn, *rid, fd)?;

            let old_record = fh.get_record(*rid)?;
            let mut new_record = old_record.clone();
            for set_clause in &self.set_clauses {
                let col = meta.get_col(&set_clause.col_name)?;
                if col.col_type != set_clause.value.column_type() {
                    return Err(DbError::IncompatibleType {
                        expected: col.col_type.name().to_string(),
                        got: set_clause.value.column_type().name().to_string(),
                    });
                }
                let bytes = set_clause.value.to_bytes(col.len)?;
                new_record.data[col.offset..col.offset + col.len].copy_from_slice(&bytes);
            }

            // Pre-image into the write log before touching index or heap.
            self.ctx.txn.append_write_record(WriteRecord::new(
                WriteType::Update,
                &tab_name,
                *rid,
                old_record.clone(),
            ));

            // drop old index entries
            for index_meta in self.table.index_metas() {
                let old_key = index_meta.build_key(&old_record.data);

                if index_meta.is_single_int() {
                    let old_key_val = i32::from_le_bytes(old_key[..4].try_into().unwrap());
                    self.ctx.lock_manager.lock_exclusive_on_gap(
                        self.ctx.txn,
                        fd,
                        old_key_val,
                        old_key_val,
                    )?;
                }

                let ih = self.table.get_index(&index_meta.name)?;
                ih.delete_entry(&old_key)?;
                self.ctx.txn.append_index_op(IndexWriteRecord {
                    index_name: index_meta.name.clone(),
                    key: old_key,
                    rid: *rid,
                    op: IndexOpType::Delete,
                });
            }

            fh.update_record(*rid, &new_record.data)?;

            // insert new index entries
            for index_meta in self.table.index_metas() {
                let old_key = index_meta.build_key(&old_record.data);
                let new_key = index_meta.build_key(&new_record.data);

                if index_meta.is_single_int() && new_key != old_key {
                    let new_key_val = i32::from_le_bytes(new_key[..4].try_into().unwrap());
                    self.ctx.lock_manager.lock_exclusive_on_gap(
                        self.ctx.txn,
                        fd,
                        new_key_val,
                        new_key_val,
                    )?;
                }

                let ih = self.table.get_index(&index_meta.name)?;
                ih.insert_entry(&new_key, *rid)?;
                self.ctx.txn.append_index_op(IndexWriteRecord {
                    index_name: index_meta.name.clone(),
                    key: new_key,
                    rid: *rid,
                    op: IndexOpType::Insert,
                });
            }
        }

        Ok(self.rids.len())
    }
}
