mod common;

use common::{create_indexed_table, insert_row, setup};

use mini_db::{
    execution::{CompOp, Condition, Context, Executor, IndexScanExecutor, SetClause, TabCol,
        UpdateExecutor},
    transaction::{LockManager, Transaction, TransactionState},
    AbortReason, DbError, DbResult, Value,
};

fn acquire_table_mode(lm: &LockManager, txn: &Transaction, fd: u32, mode: &str) -> DbResult<()> {
    match mode {
        "IS" => lm.lock_is_on_table(txn, fd),
        "IX" => lm.lock_ix_on_table(txn, fd),
        "S" => lm.lock_shared_on_table(txn, fd),
        // SIX is only reachable as IX + S on the same table
        "SIX" => {
            lm.lock_ix_on_table(txn, fd)?;
            lm.lock_shared_on_table(txn, fd)
        }
        "X" => lm.lock_exclusive_on_table(txn, fd),
        _ => unreachable!("unknown mode {}", mode),
    }
}

/// The full IS/IX/S/SIX/X compatibility lattice, verified pairwise.
#[test]
fn test_table_compatibility_matrix() {
    let modes = ["IS", "IX", "S", "SIX", "X"];
    let compatible = [
        // requested:  IS     IX     S      SIX    X      (held)
        [true, true, true, true, false],  // IS
        [true, true, false, false, false], // IX
        [true, false, true, false, false], // S
        [true, false, false, false, false], // SIX
        [false, false, false, false, false], // X
    ];

    for (h, held) in modes.iter().enumerate() {
        for (r, requested) in modes.iter().enumerate() {
            let lm = LockManager::new();
            let t1 = Transaction::new(1);
            let t2 = Transaction::new(2);

            acquire_table_mode(&lm, &t1, 0, held).unwrap();
            let granted = acquire_table_mode(&lm, &t2, 0, requested).is_ok();
            assert_eq!(
                granted, compatible[h][r],
                "held {} / requested {}",
                held, requested
            );
        }
    }
}

#[test]
fn test_no_wait_aborts_with_deadlock_prevention() {
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    let t2 = Transaction::new(2);

    lm.lock_exclusive_on_table(&t1, 0).unwrap();
    match lm.lock_shared_on_table(&t2, 0) {
        Err(DbError::TransactionAbort { txn_id, reason }) => {
            assert_eq!(txn_id, 2);
            assert_eq!(reason, AbortReason::DeadlockPrevention);
        }
        other => panic!("expected abort, got {:?}", other.err()),
    }
}

#[test]
fn test_upgrade_ladder() {
    // IS -> S
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    lm.lock_is_on_table(&t1, 0).unwrap();
    lm.lock_shared_on_table(&t1, 0).unwrap();

    // IS -> X when alone in the queue
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    lm.lock_is_on_table(&t1, 0).unwrap();
    lm.lock_exclusive_on_table(&t1, 0).unwrap();

    // IX -> SIX for the unique IX holder
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    lm.lock_ix_on_table(&t1, 0).unwrap();
    lm.lock_shared_on_table(&t1, 0).unwrap();

    // IX -> SIX denied when another IX exists
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    let t2 = Transaction::new(2);
    lm.lock_ix_on_table(&t1, 0).unwrap();
    lm.lock_ix_on_table(&t2, 0).unwrap();
    assert!(lm.lock_shared_on_table(&t1, 0).is_err());

    // S -> SIX for the unique S holder
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    lm.lock_shared_on_table(&t1, 0).unwrap();
    lm.lock_ix_on_table(&t1, 0).unwrap();

    // table X upgrade denied while anyone else holds a lock
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    let t2 = Transaction::new(2);
    lm.lock_is_on_table(&t1, 0).unwrap();
    lm.lock_is_on_table(&t2, 0).unwrap();
    assert!(lm.lock_exclusive_on_table(&t1, 0).is_err());
}

#[test]
fn test_two_phase_locking_state_machine() {
    let lm = LockManager::new();
    let t1 = Transaction::new(1);
    assert_eq!(t1.state(), TransactionState::Default);

    lm.lock_is_on_table(&t1, 0).unwrap();
    assert_eq!(t1.state(), TransactionState::Growing);

    lm.unlock(&t1, t1.lock_ids()[0]).unwrap();
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // once shrinking, every lock request fails
    for fd in 0..3 {
        match lm.lock_is_on_table(&t1, fd) {
            Err(DbError::TransactionAbort { reason, .. }) => {
                assert_eq!(reason, AbortReason::LockOnShrinking)
            }
            other => panic!("expected LockOnShrinking, got {:?}", other.err()),
        }
    }
}

#[test]
fn test_terminal_states_cannot_lock() {
    let lm = LockManager::new();

    let t1 = Transaction::new(1);
    t1.set_state(TransactionState::Committed);
    assert!(lm.lock_is_on_table(&t1, 0).is_err());

    let t2 = Transaction::new(2);
    t2.set_state(TransactionState::Aborted);
    assert!(lm.lock_exclusive_on_table(&t2, 0).is_err());
}

/// Two readers of the same row; the writer's S -> X upgrade aborts
/// because it is not the sole S holder.
#[test]
fn test_s_to_x_upgrade_contention_through_executors() {
    let test_db = setup();
    let db = &test_db.db;
    create_indexed_table(db, "t");

    let setup_txn = db.begin();
    insert_row(db, &setup_txn, "t", 5, 50).unwrap();
    db.commit(&setup_txn).unwrap();

    let t1 = db.begin();
    let t2 = db.begin();

    let select_id_5 = |txn: &Transaction| -> DbResult<Vec<mini_db::Rid>> {
        let table = db.get_table("t")?;
        let ctx = Context::new(db.lock_manager(), txn);
        let conds = vec![Condition::with_value(
            TabCol::bare("id"),
            CompOp::Eq,
            Value::Int(5),
        )];
        let mut exec = IndexScanExecutor::new(table, conds, &["id"], ctx)?;
        exec.open()?;
        let mut rids = Vec::new();
        while exec.next()?.is_some() {
            rids.push(exec.rid());
        }
        Ok(rids)
    };

    let rids = select_id_5(&t1).unwrap();
    assert_eq!(rids.len(), 1);
    select_id_5(&t2).unwrap();

    // both hold record S; T1's update needs X and must self-abort
    let table = db.get_table("t").unwrap();
    let ctx = Context::new(db.lock_manager(), &t1);
    let mut update = UpdateExecutor::new(
        table,
        vec![SetClause::new("v", Value::Int(99))],
        rids,
        ctx,
    );
    match update.execute() {
        Err(DbError::TransactionAbort { reason, .. }) => {
            assert_eq!(reason, AbortReason::DeadlockPrevention)
        }
        other => panic!("expected upgrade abort, got {:?}", other.err()),
    }

    db.abort(&t1).unwrap();
    db.commit(&t2).unwrap();

    // nothing was modified
    let t3 = db.begin();
    let rows = common::index_scan_all(db, &t3, "t").unwrap();
    assert_eq!(rows, vec![(5, 50)]);
    db.commit(&t3).unwrap();
}
