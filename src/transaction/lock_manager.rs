use std::{collections::HashMap, sync::Mutex};

use log::debug;

use crate::{
    error::{AbortReason, DbError, DbResult},
    record::Rid,
    storage::FileId,
    transaction::{Transaction, TransactionState, TxnId},
};

/// Identity of a lockable resource. All gaps of one table collapse into a
/// single equivalence class, which makes gap locks behave like table-range
/// locks; coarse, but sufficient for no-wait conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockDataId {
    Table { fd: FileId },
    Record { fd: FileId, rid: Rid },
    Gap { fd: FileId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// Join (strongest mode) of all granted requests in one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GroupLockMode {
    #[default]
    NonLock,
    IS,
    IX,
    S,
    SIX,
    X,
}

fn strength(mode: GroupLockMode) -> u8 {
    match mode {
        GroupLockMode::NonLock => 0,
        GroupLockMode::IS => 1,
        GroupLockMode::IX => 2,
        GroupLockMode::S => 3,
        GroupLockMode::SIX => 4,
        GroupLockMode::X => 5,
    }
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// With the no-wait policy there are never any waiters, so the queue is a
/// grant list plus the counters the upgrade rules need.
#[derive(Debug, Default)]
struct LockRequestQueue {
    group_mode: GroupLockMode,
    shared_count: usize,
    ix_count: usize,
    queue: Vec<LockRequest>,
}

impl LockRequestQueue {
    fn grant(&mut self, txn_id: TxnId, mode: LockMode) {
        self.queue.push(LockRequest {
            txn_id,
            mode,
            granted: true,
        });
    }

    fn my_mode(&self, txn_id: TxnId) -> Option<LockMode> {
        self.queue
            .iter()
            .find(|r| r.txn_id == txn_id && r.granted)
            .map(|r| r.mode)
    }

    fn set_my_mode(&mut self, txn_id: TxnId, mode: LockMode) {
        let request = self
            .queue
            .iter_mut()
            .find(|r| r.txn_id == txn_id)
            .expect("upgrading a lock that is not held");
        request.mode = mode;
    }

    /// Strongest remaining granted mode, priority
    /// `X > SIX > S > IX > IS > NONE`.
    fn recompute_group_mode(&mut self) {
        let mut group = GroupLockMode::NonLock;
        for request in self.queue.iter().filter(|r| r.granted) {
            let candidate = match request.mode {
                LockMode::Exclusive => GroupLockMode::X,
                LockMode::SharedIntentionExclusive => GroupLockMode::SIX,
                LockMode::Shared => GroupLockMode::S,
                LockMode::IntentionExclusive => GroupLockMode::IX,
                LockMode::IntentionShared => GroupLockMode::IS,
            };
            if strength(candidate) > strength(group) {
                group = candidate;
            }
        }
        self.group_mode = group;
    }
}

/// Multi-granularity two-phase lock manager with a strict no-wait policy:
/// any conflicting request aborts the requester immediately.
pub struct LockManager {
    lock_table: Mutex<HashMap<LockDataId, LockRequestQueue>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Phase check shared by every request. The first lock request of a
    /// fresh transaction starts its growing phase.
    fn check_lock(txn: &Transaction) -> DbResult<()> {
        match txn.state() {
            TransactionState::Shrinking
            | TransactionState::Committed
            | TransactionState::Aborted => {
                Err(DbError::abort(txn.id(), AbortReason::LockOnShrinking))
            }
            TransactionState::Default => {
                txn.set_state(TransactionState::Growing);
                Ok(())
            }
            TransactionState::Growing => Ok(()),
        }
    }

    fn no_wait(txn: &Transaction) -> DbError {
        debug!("{} hit a lock conflict, aborting (no-wait)", txn);
        DbError::abort(txn.id(), AbortReason::DeadlockPrevention)
    }

    pub fn lock_shared_on_record(&self, txn: &Transaction, rid: Rid, fd: FileId) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Record { fd, rid };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        // S or X already held covers the read.
        if let Some(LockMode::Shared | LockMode::Exclusive) = queue.my_mode(txn.id()) {
            return Ok(());
        }

        if matches!(
            queue.group_mode,
            GroupLockMode::X | GroupLockMode::IX | GroupLockMode::SIX
        ) {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::S;
        queue.grant(txn.id(), LockMode::Shared);
        queue.shared_count += 1;
        txn.add_lock(id);
        debug!("{} granted S on record {} (fd {})", txn, rid, fd);
        Ok(())
    }

    pub fn lock_exclusive_on_record(
        &self,
        txn: &Transaction,
        rid: Rid,
        fd: FileId,
    ) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Record { fd, rid };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        if let Some(my_mode) = queue.my_mode(txn.id()) {
            return match my_mode {
                LockMode::Exclusive => Ok(()),
                // S -> X only for the sole S holder.
                LockMode::Shared
                    if queue.group_mode != GroupLockMode::X && queue.shared_count == 1 =>
                {
                    queue.set_my_mode(txn.id(), LockMode::Exclusive);
                    queue.group_mode = GroupLockMode::X;
                    queue.shared_count -= 1;
                    debug!("{} upgraded S -> X on record {}", txn, rid);
                    Ok(())
                }
                _ => Err(Self::no_wait(txn)),
            };
        }

        if queue.group_mode != GroupLockMode::NonLock {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::X;
        queue.grant(txn.id(), LockMode::Exclusive);
        txn.add_lock(id);
        debug!("{} granted X on record {} (fd {})", txn, rid, fd);
        Ok(())
    }

    /// Shared lock on the key interval `[left_key, right_key]` of a
    /// single-column INT index.
    pub fn lock_shared_on_gap(
        &self,
        txn: &Transaction,
        fd: FileId,
        left_key: i32,
        right_key: i32,
    ) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Gap { fd };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        if let Some(LockMode::Shared | LockMode::Exclusive) = queue.my_mode(txn.id()) {
            return Ok(());
        }

        if queue.group_mode == GroupLockMode::X {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::S;
        queue.grant(txn.id(), LockMode::Shared);
        queue.shared_count += 1;
        txn.add_lock(id);
        debug!(
            "{} granted S gap [{}, {}] on fd {}",
            txn, left_key, right_key, fd
        );
        Ok(())
    }

    pub fn lock_exclusive_on_gap(
        &self,
        txn: &Transaction,
        fd: FileId,
        left_key: i32,
        right_key: i32,
    ) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Gap { fd };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        if let Some(my_mode) = queue.my_mode(txn.id()) {
            return match my_mode {
                LockMode::Exclusive => Ok(()),
                LockMode::Shared if queue.shared_count == 1 => {
                    queue.set_my_mode(txn.id(), LockMode::Exclusive);
                    queue.group_mode = GroupLockMode::X;
                    queue.shared_count -= 1;
                    debug!("{} upgraded S -> X gap on fd {}", txn, fd);
                    Ok(())
                }
                _ => Err(Self::no_wait(txn)),
            };
        }

        if queue.group_mode != GroupLockMode::NonLock {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::X;
        queue.grant(txn.id(), LockMode::Exclusive);
        txn.add_lock(id);
        debug!(
            "{} granted X gap [{}, {}] on fd {}",
            txn, left_key, right_key, fd
        );
        Ok(())
    }

    pub fn lock_shared_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Table { fd };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        if let Some(my_mode) = queue.my_mode(txn.id()) {
            return match my_mode {
                LockMode::Shared | LockMode::Exclusive | LockMode::SharedIntentionExclusive => {
                    Ok(())
                }
                // IS -> S when nobody holds a write-side mode.
                LockMode::IntentionShared
                    if matches!(queue.group_mode, GroupLockMode::S | GroupLockMode::IS) =>
                {
                    queue.set_my_mode(txn.id(), LockMode::Shared);
                    queue.group_mode = GroupLockMode::S;
                    queue.shared_count += 1;
                    debug!("{} upgraded IS -> S on table fd {}", txn, fd);
                    Ok(())
                }
                // IX -> SIX only for the unique IX holder.
                LockMode::IntentionExclusive if queue.ix_count == 1 => {
                    queue.set_my_mode(txn.id(), LockMode::SharedIntentionExclusive);
                    queue.group_mode = GroupLockMode::SIX;
                    queue.shared_count += 1;
                    debug!("{} upgraded IX -> SIX on table fd {}", txn, fd);
                    Ok(())
                }
                _ => Err(Self::no_wait(txn)),
            };
        }

        if matches!(
            queue.group_mode,
            GroupLockMode::X | GroupLockMode::IX | GroupLockMode::SIX
        ) {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::S;
        queue.grant(txn.id(), LockMode::Shared);
        queue.shared_count += 1;
        txn.add_lock(id);
        debug!("{} granted S on table fd {}", txn, fd);
        Ok(())
    }

    pub fn lock_exclusive_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Table { fd };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        if let Some(my_mode) = queue.my_mode(txn.id()) {
            if my_mode == LockMode::Exclusive {
                return Ok(());
            }
            // Upgrading to table X requires being the only holder at all.
            if queue.queue.len() == 1 {
                if matches!(
                    my_mode,
                    LockMode::Shared | LockMode::SharedIntentionExclusive
                ) {
                    queue.shared_count -= 1;
                }
                if matches!(
                    my_mode,
                    LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
                ) {
                    queue.ix_count -= 1;
                }
                queue.set_my_mode(txn.id(), LockMode::Exclusive);
                queue.group_mode = GroupLockMode::X;
                debug!("{} upgraded to X on table fd {}", txn, fd);
                return Ok(());
            }
            return Err(Self::no_wait(txn));
        }

        if queue.group_mode != GroupLockMode::NonLock {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::X;
        queue.grant(txn.id(), LockMode::Exclusive);
        txn.add_lock(id);
        debug!("{} granted X on table fd {}", txn, fd);
        Ok(())
    }

    pub fn lock_is_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Table { fd };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        // Nothing is weaker than IS: any mode already held covers it.
        if queue.my_mode(txn.id()).is_some() {
            return Ok(());
        }

        if queue.group_mode == GroupLockMode::X {
            return Err(Self::no_wait(txn));
        }

        if queue.group_mode == GroupLockMode::NonLock {
            queue.group_mode = GroupLockMode::IS;
        }
        queue.grant(txn.id(), LockMode::IntentionShared);
        txn.add_lock(id);
        debug!("{} granted IS on table fd {}", txn, fd);
        Ok(())
    }

    pub fn lock_ix_on_table(&self, txn: &Transaction, fd: FileId) -> DbResult<()> {
        Self::check_lock(txn)?;
        let id = LockDataId::Table { fd };
        let mut table = self.lock_table.lock().unwrap();
        let queue = table.entry(id).or_default();

        if let Some(my_mode) = queue.my_mode(txn.id()) {
            return match my_mode {
                LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
                | LockMode::Exclusive => Ok(()),
                // S -> SIX only for the unique S holder.
                LockMode::Shared if queue.shared_count == 1 => {
                    queue.set_my_mode(txn.id(), LockMode::SharedIntentionExclusive);
                    queue.group_mode = GroupLockMode::SIX;
                    queue.ix_count += 1;
                    debug!("{} upgraded S -> SIX on table fd {}", txn, fd);
                    Ok(())
                }
                LockMode::IntentionShared
                    if matches!(queue.group_mode, GroupLockMode::IS | GroupLockMode::IX) =>
                {
                    queue.set_my_mode(txn.id(), LockMode::IntentionExclusive);
                    queue.group_mode = GroupLockMode::IX;
                    queue.ix_count += 1;
                    debug!("{} upgraded IS -> IX on table fd {}", txn, fd);
                    Ok(())
                }
                _ => Err(Self::no_wait(txn)),
            };
        }

        if matches!(
            queue.group_mode,
            GroupLockMode::S | GroupLockMode::SIX | GroupLockMode::X
        ) {
            return Err(Self::no_wait(txn));
        }

        queue.group_mode = GroupLockMode::IX;
        queue.grant(txn.id(), LockMode::IntentionExclusive);
        queue.ix_count += 1;
        txn.add_lock(id);
        debug!("{} granted IX on table fd {}", txn, fd);
        Ok(())
    }

    /// Release one lock. Moves a growing transaction into its shrinking
    /// phase and recomputes the queue's group mode from what remains.
    pub fn unlock(&self, txn: &Transaction, id: LockDataId) -> DbResult<()> {
        if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let mut table = self.lock_table.lock().unwrap();
        let queue = match table.get_mut(&id) {
            None => return Ok(()),
            Some(queue) => queue,
        };

        let pos = match queue.queue.iter().position(|r| r.txn_id == txn.id()) {
            None => return Ok(()),
            Some(pos) => pos,
        };

        let request = queue.queue.remove(pos);
        if matches!(
            request.mode,
            LockMode::Shared | LockMode::SharedIntentionExclusive
        ) {
            queue.shared_count -= 1;
        }
        if matches!(
            request.mode,
            LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        ) {
            queue.ix_count -= 1;
        }

        queue.recompute_group_mode();
        debug!("{} released {:?}", txn, id);
        Ok(())
    }

    /// Mode this transaction holds on `id`, if any. Diagnostic.
    pub fn held_mode(&self, txn_id: TxnId, id: LockDataId) -> Option<LockMode> {
        let table = self.lock_table.lock().unwrap();
        table.get(&id).and_then(|q| q.my_mode(txn_id))
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: TxnId) -> Transaction {
        Transaction::new(id)
    }

    #[test]
    fn test_intention_modes_are_compatible() {
        let lm = LockManager::new();
        let (t1, t2) = (txn(1), txn(2));

        lm.lock_is_on_table(&t1, 0).unwrap();
        lm.lock_ix_on_table(&t2, 0).unwrap();
        // IS + IX coexist; a third reader can still come in.
        let t3 = txn(3);
        lm.lock_is_on_table(&t3, 0).unwrap();
    }

    #[test]
    fn test_table_s_blocks_ix() {
        let lm = LockManager::new();
        let (t1, t2) = (txn(1), txn(2));

        lm.lock_shared_on_table(&t1, 0).unwrap();
        let err = lm.lock_ix_on_table(&t2, 0).unwrap_err();
        assert!(matches!(
            err,
            DbError::TransactionAbort {
                reason: AbortReason::DeadlockPrevention,
                ..
            }
        ));
    }

    #[test]
    fn test_record_x_is_exclusive() {
        let lm = LockManager::new();
        let (t1, t2) = (txn(1), txn(2));
        let rid = Rid::new(1, 0);

        lm.lock_exclusive_on_record(&t1, rid, 0).unwrap();
        assert!(lm.lock_shared_on_record(&t2, rid, 0).is_err());
        assert!(lm.lock_exclusive_on_record(&t2, rid, 0).is_err());

        // The holder itself can re-request both modes.
        lm.lock_shared_on_record(&t1, rid, 0).unwrap();
        lm.lock_exclusive_on_record(&t1, rid, 0).unwrap();
    }

    #[test]
    fn test_s_to_x_upgrade_needs_sole_holder() {
        let lm = LockManager::new();
        let (t1, t2) = (txn(1), txn(2));
        let rid = Rid::new(1, 0);

        lm.lock_shared_on_record(&t1, rid, 0).unwrap();
        lm.lock_shared_on_record(&t2, rid, 0).unwrap();

        // shared_count == 2: upgrade aborts
        assert!(lm.lock_exclusive_on_record(&t1, rid, 0).is_err());

        lm.unlock(&t2, LockDataId::Record { fd: 0, rid }).unwrap();
        let t3 = txn(3);
        lm.lock_shared_on_record(&t3, rid, 0).unwrap();
        lm.lock_exclusive_on_record(&t3, rid, 0).unwrap();
        assert_eq!(
            lm.held_mode(3, LockDataId::Record { fd: 0, rid }),
            Some(LockMode::Exclusive)
        );
    }

    #[test]
    fn test_lock_after_release_fails() {
        let lm = LockManager::new();
        let t1 = txn(1);

        lm.lock_is_on_table(&t1, 0).unwrap();
        lm.unlock(&t1, LockDataId::Table { fd: 0 }).unwrap();
        assert_eq!(t1.state(), TransactionState::Shrinking);

        let err = lm.lock_is_on_table(&t1, 0).unwrap_err();
        assert!(matches!(
            err,
            DbError::TransactionAbort {
                reason: AbortReason::LockOnShrinking,
                ..
            }
        ));
    }

    #[test]
    fn test_gap_conflict() {
        let lm = LockManager::new();
        let (t1, t2) = (txn(1), txn(2));

        lm.lock_shared_on_gap(&t1, 0, 2, 4).unwrap();
        // All gaps of a table share one resource: any exclusive gap request
        // by another transaction conflicts.
        assert!(lm.lock_exclusive_on_gap(&t2, 0, 3, 3).is_err());
        // A second reader is fine.
        let t3 = txn(3);
        lm.lock_shared_on_gap(&t3, 0, 10, 20).unwrap();
    }

    #[test]
    fn test_group_mode_recomputed_on_unlock() {
        let lm = LockManager::new();
        let (t1, t2) = (txn(1), txn(2));

        lm.lock_ix_on_table(&t1, 0).unwrap();
        lm.lock_ix_on_table(&t2, 0).unwrap();
        lm.unlock(&t1, LockDataId::Table { fd: 0 }).unwrap();

        // t2's IX remains: S must still conflict.
        let t3 = txn(3);
        assert!(lm.lock_shared_on_table(&t3, 0).is_err());

        lm.unlock(&t2, LockDataId::Table { fd: 0 }).unwrap();
        let t4 = txn(4);
        lm.lock_shared_on_table(&t4, 0).unwrap();
    }
}
