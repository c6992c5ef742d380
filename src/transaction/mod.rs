pub mod lock_manager;
pub mod manager;

use core::fmt;
use std::sync::{Mutex, RwLock};

use crate::{
    record::{Record, Rid},
    utils::HandyRwLock,
};

pub use lock_manager::{LockDataId, LockManager, LockMode};
pub use manager::TransactionManager;

pub type TxnId = u64;

/// 2PL phase tracking. `Default` means no lock has been taken yet; the
/// first granted lock moves the transaction to `Growing`, the first release
/// to `Shrinking`. `Committed`/`Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOpType {
    Insert,
    Delete,
}

/// Undo entry for one secondary-index mutation.
#[derive(Debug, Clone)]
pub struct IndexWriteRecord {
    pub index_name: String,
    pub key: Vec<u8>,
    pub rid: Rid,
    pub op: IndexOpType,
}

/// Undo entry for one statement-level heap mutation, with the pre-image
/// (delete/update) and the index undo entries needed to reverse it.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub wtype: WriteType,
    pub tab_name: String,
    pub rid: Rid,
    pub record: Option<Record>,
    pub index_ops: Vec<IndexWriteRecord>,
}

impl WriteRecord {
    pub fn new(wtype: WriteType, tab_name: &str, rid: Rid, record: Record) -> Self {
        Self {
            wtype,
            tab_name: tab_name.to_string(),
            rid,
            record: Some(record),
            index_ops: Vec::new(),
        }
    }
}

/// One client transaction. Shared between the session thread that drives it
/// and the managers, hence the interior locks.
pub struct Transaction {
    id: TxnId,
    state: RwLock<TransactionState>,
    lock_set: Mutex<Vec<LockDataId>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: RwLock::new(TransactionState::Default),
            lock_set: Mutex::new(Vec::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.rl()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.wl() = state;
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().unwrap().push(record);
    }

    /// Attach an index undo entry to the most recent write record.
    pub fn append_index_op(&self, op: IndexWriteRecord) {
        let mut write_set = self.write_set.lock().unwrap();
        let last = write_set
            .last_mut()
            .expect("index undo appended with no write record");
        last.index_ops.push(op);
    }

    pub fn pop_write_record(&self) -> Option<WriteRecord> {
        self.write_set.lock().unwrap().pop()
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.lock().unwrap().len()
    }

    pub fn clear_write_set(&self) {
        self.write_set.lock().unwrap().clear();
    }

    pub(crate) fn add_lock(&self, id: LockDataId) {
        let mut lock_set = self.lock_set.lock().unwrap();
        if !lock_set.contains(&id) {
            lock_set.push(id);
        }
    }

    pub fn lock_ids(&self) -> Vec<LockDataId> {
        self.lock_set.lock().unwrap().clone()
    }

    pub fn clear_locks(&self) {
        self.lock_set.lock().unwrap().clear();
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "txn_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
