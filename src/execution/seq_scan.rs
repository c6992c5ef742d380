use std::sync::Arc;

use crate::{
    catalog::{ColumnMeta, TableInfo},
    error::{DbError, DbResult},
    execution::{eval_conditions, Condition, Context, Executor},
    record::{Record, RecordScan, Rid},
};

/// Full-table scan in heap order. Takes table IS then table S: readers
/// block out writers coarsely instead of locking every row.
pub struct SeqScanExecutor<'a> {
    table: Arc<TableInfo>,
    cols: Vec<ColumnMeta>,
    row_len: usize,
    conds: Vec<Condition>,
    ctx: Context<'a>,
    scan: Option<RecordScan>,
    rid: Rid,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(table: Arc<TableInfo>, conds: Vec<Condition>, ctx: Context<'a>) -> Self {
        let cols = table.columns();
        let row_len = table.file.record_size();
        Self {
            table,
            cols,
            row_len,
            conds,
            ctx,
            scan: None,
            rid: Rid::INVALID,
        }
    }
}

impl Executor for SeqScanExecutor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.cols
    }

    fn row_len(&self) -> usize {
        self.row_len
    }

    fn open(&mut self) -> DbResult<()> {
        let fd = self.table.file.fd();
        self.ctx.lock_manager.lock_is_on_table(self.ctx.txn, fd)?;
        self.ctx
            .lock_manager
            .lock_shared_on_table(self.ctx.txn, fd)?;

        self.scan = Some(RecordScan::new(self.table.file.clone())?);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Record>> {
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| DbError::Internal("scan used before open".to_string()))?;

        while !scan.is_end() {
            let rid = scan.rid();
            let record = self.table.file.get_record(rid)?;
            scan.next()?;

            if eval_conditions(&self.cols, &self.conds, &record.data)? {
                self.rid = rid;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
