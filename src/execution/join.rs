use crate::{
    catalog::ColumnMeta,
    error::DbResult,
    execution::{eval_conditions, Condition, Executor},
    record::Record,
};

/// Nested-loop join: for every left row, rewind and drain the right child,
/// yielding concatenated rows that pass the join conditions.
pub struct NestedLoopJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    cols: Vec<ColumnMeta>,
    row_len: usize,
    conds: Vec<Condition>,
    left_row: Option<Record>,
    done: bool,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        conds: Vec<Condition>,
    ) -> Self {
        let mut cols = left.columns().to_vec();
        for col in right.columns() {
            let mut col = col.clone();
            col.offset += left.row_len();
            cols.push(col);
        }
        let row_len = left.row_len() + right.row_len();

        Self {
            left,
            right,
            cols,
            row_len,
            conds,
            left_row: None,
            done: false,
        }
    }

    fn joined(&self, left_row: &Record, right_row: &Record) -> Record {
        let mut record = Record::new(self.row_len);
        let left_len = self.left.row_len();
        record.data[..left_len].copy_from_slice(&left_row.data);
        record.data[left_len..].copy_from_slice(&right_row.data);
        record
    }
}

impl Executor for NestedLoopJoinExecutor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.cols
    }

    fn row_len(&self) -> usize {
        self.row_len
    }

    fn open(&mut self) -> DbResult<()> {
        self.done = false;
        self.left.open()?;
        self.left_row = self.left.next()?;
        if self.left_row.is_none() {
            self.done = true;
            return Ok(());
        }
        self.right.open()?;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Record>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let left_row = match &self.left_row {
                Some(row) => row.clone(),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };

            while let Some(right_row) = self.right.next()? {
                let record = self.joined(&left_row, &right_row);
                if eval_conditions(&self.cols, &self.conds, &record.data)? {
                    return Ok(Some(record));
                }
            }

            // right side exhausted: advance left, rewind right
            self.left_row = self.left.next()?;
            if self.left_row.is_none() {
                self.done = true;
                return Ok(None);
            }
            self.right.open()?;
        }
    }
}
