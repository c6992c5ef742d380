use std::sync::Arc;

use crate::{
    error::DbResult,
    index::{Iid, IndexHandle},
    record::Rid,
    storage::NO_PAGE,
};

/// Bounded index-order cursor: advances slot by slot along the leaf chain
/// from `iid` (inclusive) to `end` (exclusive).
pub struct IxScan {
    ih: Arc<IndexHandle>,
    iid: Iid,
    end: Iid,
}

impl IxScan {
    pub fn new(ih: Arc<IndexHandle>, iid: Iid, end: Iid) -> Self {
        Self { ih, iid, end }
    }

    pub fn is_end(&self) -> bool {
        self.iid == self.end || self.iid.page_no == NO_PAGE
    }

    pub fn iid(&self) -> Iid {
        self.iid
    }

    /// Heap rid of the current entry.
    pub fn rid(&self) -> DbResult<Rid> {
        self.ih.get_rid(self.iid)
    }

    pub fn next(&mut self) -> DbResult<()> {
        if self.is_end() {
            return Ok(());
        }
        self.iid = self.ih.next_position(self.iid, self.end)?;
        Ok(())
    }
}
