use std::sync::Arc;

use crate::{
    catalog::{ColumnMeta, IndexMeta, TableInfo, Value},
    error::{DbError, DbResult},
    execution::{eval_conditions, CompOp, CondRhs, Condition, Context, Executor},
    index::{Iid, IndexHandle, IxScan},
    record::{Record, Rid},
};

/// One end of the scanned key interval: bound value and inclusivity.
#[derive(Clone, Copy)]
struct IntBound {
    value: i32,
    inclusive: bool,
}

/// Index-order scan bounded by the predicate. Takes table IS, a shared gap
/// lock over the scanned interval (single-column INT indexes), and record S
/// on every row it yields.
pub struct IndexScanExecutor<'a> {
    table: Arc<TableInfo>,
    cols: Vec<ColumnMeta>,
    row_len: usize,
    conds: Vec<Condition>,
    index_meta: IndexMeta,
    ih: Arc<IndexHandle>,
    ctx: Context<'a>,
    scan: Option<IxScan>,
    rid: Rid,
}

impl<'a> IndexScanExecutor<'a> {
    pub fn new(
        table: Arc<TableInfo>,
        conds: Vec<Condition>,
        index_cols: &[&str],
        ctx: Context<'a>,
    ) -> DbResult<Self> {
        let cols = table.columns();
        let row_len = table.file.record_size();
        let index_meta = table.meta.read().unwrap().get_index_meta(index_cols)?.clone();
        let ih = table.get_index(&index_meta.name)?;

        Ok(Self {
            table,
            cols,
            row_len,
            conds,
            index_meta,
            ih,
            ctx,
            scan: None,
            rid: Rid::INVALID,
        })
    }

    /// Literal INT conditions on the first index column, as interval
    /// bounds.
    fn int_bounds(&self) -> (Option<IntBound>, Option<IntBound>) {
        let col = &self.index_meta.cols[0];
        let mut lower: Option<IntBound> = None;
        let mut upper: Option<IntBound> = None;

        for cond in &self.conds {
            if cond.lhs_col.col_name != col.name {
                continue;
            }
            let value = match &cond.rhs {
                CondRhs::Value(Value::Int(v)) => *v,
                _ => continue,
            };
            match cond.op {
                CompOp::Eq => {
                    tighten_lower(&mut lower, IntBound { value, inclusive: true });
                    tighten_upper(&mut upper, IntBound { value, inclusive: true });
                }
                CompOp::Gt => tighten_lower(&mut lower, IntBound { value, inclusive: false }),
                CompOp::Ge => tighten_lower(&mut lower, IntBound { value, inclusive: true }),
                CompOp::Lt => tighten_upper(&mut upper, IntBound { value, inclusive: false }),
                CompOp::Le => tighten_upper(&mut upper, IntBound { value, inclusive: true }),
                CompOp::Ne => {}
            }
        }
        (lower, upper)
    }

    /// Iterator bounds for a single-column INT index.
    fn int_iids(&self, lower: Option<IntBound>, upper: Option<IntBound>) -> DbResult<(Iid, Iid)> {
        let start = match lower {
            None => self.ih.leaf_begin()?,
            Some(bound) => {
                let key = bound.value.to_le_bytes();
                if bound.inclusive {
                    self.ih.lower_bound(&key)?
                } else {
                    self.ih.upper_bound(&key)?
                }
            }
        };
        let end = match upper {
            None => self.ih.leaf_end()?,
            Some(bound) => {
                let key = bound.value.to_le_bytes();
                if bound.inclusive {
                    self.ih.upper_bound(&key)?
                } else {
                    self.ih.lower_bound(&key)?
                }
            }
        };
        Ok((start, end))
    }

    /// For composite or non-INT keys: an equality key over all index
    /// columns if the predicate pins every one, else the full index.
    fn eq_key(&self) -> DbResult<Option<Vec<u8>>> {
        let mut key = Vec::with_capacity(self.index_meta.key_len);
        for col in &self.index_meta.cols {
            let mut found = false;
            for cond in &self.conds {
                if cond.op == CompOp::Eq && cond.lhs_col.col_name == col.name {
                    if let CondRhs::Value(value) = &cond.rhs {
                        if value.column_type() != col.col_type {
                            return Err(DbError::IncompatibleType {
                                expected: col.col_type.name().to_string(),
                                got: value.column_type().name().to_string(),
                            });
                        }
                        key.extend_from_slice(&value.to_bytes(col.len)?);
                        found = true;
                        break;
                    }
                }
            }
            if !found {
                return Ok(None);
            }
        }
        Ok(Some(key))
    }
}

fn tighten_lower(current: &mut Option<IntBound>, candidate: IntBound) {
    let stronger = match current {
        None => true,
        Some(bound) => {
            candidate.value > bound.value
                || (candidate.value == bound.value && !candidate.inclusive)
        }
    };
    if stronger {
        *current = Some(candidate);
    }
}

fn tighten_upper(current: &mut Option<IntBound>, candidate: IntBound) {
    let stronger = match current {
        None => true,
        Some(bound) => {
            candidate.value < bound.value
                || (candidate.value == bound.value && !candidate.inclusive)
        }
    };
    if stronger {
        *current = Some(candidate);
    }
}

impl Executor for IndexScanExecutor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.cols
    }

    fn row_len(&self) -> usize {
        self.row_len
    }

    fn open(&mut self) -> DbResult<()> {
        let fd = self.table.file.fd();
        self.ctx.lock_manager.lock_is_on_table(self.ctx.txn, fd)?;

        let (start, end) = if self.index_meta.is_single_int() {
            let (lower, upper) = self.int_bounds();

            // Phantom prevention: a shared gap over the scanned interval.
            let left_key = lower.map(|b| b.value).unwrap_or(i32::MIN);
            let right_key = upper.map(|b| b.value).unwrap_or(i32::MAX);
            self.ctx
                .lock_manager
                .lock_shared_on_gap(self.ctx.txn, fd, left_key, right_key)?;

            self.int_iids(lower, upper)?
        } else {
            match self.eq_key()? {
                Some(key) => (self.ih.lower_bound(&key)?, self.ih.upper_bound(&key)?),
                None => (self.ih.leaf_begin()?, self.ih.leaf_end()?),
            }
        };

        self.scan = Some(IxScan::new(self.ih.clone(), start, end));
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Record>> {
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| DbError::Internal("scan used before open".to_string()))?;

        while !scan.is_end() {
            let rid = scan.rid()?;
            let record = self.table.file.get_record(rid)?;
            scan.next()?;

            if eval_conditions(&self.cols, &self.conds, &record.data)? {
                self.ctx.lock_manager.lock_shared_on_record(
                    self.ctx.txn,
                    rid,
                    self.table.file.fd(),
                )?;
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
