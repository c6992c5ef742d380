use std::fmt;

use thiserror::Error;

use crate::record::Rid;

pub type DbResult<T> = Result<T, DbError>;

/// Why a transaction was forcibly aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    UpgradeConflict,
    DeadlockPrevention,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AbortReason::LockOnShrinking => {
                write!(f, "cannot request locks in the shrinking phase")
            }
            AbortReason::UpgradeConflict => {
                write!(f, "lock upgrade conflicts with another holder")
            }
            AbortReason::DeadlockPrevention => write!(f, "deadlock prevention (no-wait)"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid page number {0}")]
    InvalidPage(u32),

    #[error("invalid slot number {0}")]
    InvalidSlot(u32),

    #[error("record not found at {0}")]
    RecordNotFound(Rid),

    #[error("slot already occupied at {0}")]
    SlotOccupied(Rid),

    #[error("index entry not found")]
    IndexEntryNotFound,

    #[error("invalid value count: expected {expected}, got {got}")]
    InvalidValueCount { expected: usize, got: usize },

    #[error("incompatible type: expected {expected}, got {got}")]
    IncompatibleType { expected: String, got: String },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("transaction {txn_id} aborted: {reason}")]
    TransactionAbort { txn_id: u64, reason: AbortReason },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn abort(txn_id: u64, reason: AbortReason) -> Self {
        DbError::TransactionAbort { txn_id, reason }
    }

    /// True for the storage-level errors the abort replay is allowed to
    /// swallow while it makes best-effort progress through the write log.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            DbError::InvalidPage(_)
                | DbError::InvalidSlot(_)
                | DbError::RecordNotFound(_)
                | DbError::SlotOccupied(_)
                | DbError::IndexEntryNotFound
        )
    }
}
