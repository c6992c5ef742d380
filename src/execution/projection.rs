use crate::{
    catalog::ColumnMeta,
    error::DbResult,
    execution::{get_col, Executor, TabCol},
    record::Record,
};

/// Projects the child's rows onto the selected columns, repacked at fresh
/// offsets.
pub struct ProjectionExecutor<'a> {
    prev: Box<dyn Executor + 'a>,
    cols: Vec<ColumnMeta>,
    sel_idxs: Vec<usize>,
    row_len: usize,
}

impl<'a> ProjectionExecutor<'a> {
    pub fn new(prev: Box<dyn Executor + 'a>, sel_cols: &[TabCol]) -> DbResult<Self> {
        let prev_cols = prev.columns();
        let mut cols = Vec::with_capacity(sel_cols.len());
        let mut sel_idxs = Vec::with_capacity(sel_cols.len());
        let mut curr_offset = 0;

        for sel_col in sel_cols {
            let found = get_col(prev_cols, sel_col)?.clone();
            let pos = prev_cols
                .iter()
                .position(|c| c.tab_name == found.tab_name && c.name == found.name)
                .unwrap();
            sel_idxs.push(pos);

            let mut col = found;
            col.offset = curr_offset;
            curr_offset += col.len;
            cols.push(col);
        }

        Ok(Self {
            prev,
            cols,
            sel_idxs,
            row_len: curr_offset,
        })
    }
}

impl Executor for ProjectionExecutor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.cols
    }

    fn row_len(&self) -> usize {
        self.row_len
    }

    fn open(&mut self) -> DbResult<()> {
        self.prev.open()
    }

    fn next(&mut self) -> DbResult<Option<Record>> {
        let prev_record = match self.prev.next()? {
            None => return Ok(None),
            Some(record) => record,
        };

        let mut record = Record::new(self.row_len);
        let prev_cols = self.prev.columns();
        for (i, sel_idx) in self.sel_idxs.iter().enumerate() {
            let src = &prev_cols[*sel_idx];
            let dst = &self.cols[i];
            record.data[dst.offset..dst.offset + dst.len]
                .copy_from_slice(&prev_record.data[src.offset..src.offset + src.len]);
        }
        Ok(Some(record))
    }
}
