use std::sync::Arc;

use crate::{
    catalog::TableInfo,
    error::DbResult,
    execution::Context,
    record::Rid,
    transaction::{IndexOpType, IndexWriteRecord, WriteRecord, WriteType},
};

/// DELETE of the given rids. Takes table IX; per record the pre-image is
/// logged before any mutation, every index entry is removed under an
/// exclusive gap (single-column INT indexes), then the heap record goes.
pub struct DeleteExecutor<'a> {
    table: Arc<TableInfo>,
    rids: Vec<Rid>,
    ctx: Context<'a>,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(table: Arc<TableInfo>, rids: Vec<Rid>, ctx: Context<'a>) -> Self {
        Self { table, rids, ctx }
    }

    pub fn execute(&mut self) -> DbResult<usize> {
        let fh = &self.table.file;
        let fd = fh.fd();
        let tab_name = self.table.meta.read().unwrap().name.clone();

        self.ctx.lock_manager.lock_ix_on_table(self.ctx.txn, fd)?;

        for rid in &self.rids {
            let record = fh.get_record(*rid)?;

            // Pre-image goes into the write log before index/heap mutation.
            self.ctx.txn.append_write_record(WriteRecord::new(
                WriteType::Delete,
                &tab_name,
                *rid,
                record.clone(),
            ));

            for index_meta in self.table.index_metas() {
                let key = index_meta.build_key(&record.data);

                if index_meta.is_single_int() {
                    let delete_key = i32::from_le_bytes(key[..4].try_into().unwrap());
                    self.ctx.lock_manager.lock_exclusive_on_gap(
                        self.ctx.txn,
                        fd,
                        delete_key,
                        delete_key,
                    )?;
                }

                let ih = self.table.get_index(&index_meta.name)?;
                ih.delete_entry(&key)?;
                self.ctx.txn.append_index_op(IndexWriteRecord {
                    index_name: index_meta.name.clone(),
                    key,
                    rid: *rid,
                    op: IndexOpType::Delete,
                });
            }

            fh.delete_record(*rid)?;
        }

        Ok(self.rids.len())
    }
}
