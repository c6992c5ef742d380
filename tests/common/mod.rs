#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use mini_db::{
    catalog::{ColumnDef, TableInfo},
    execution::{Context, Executor, IndexScanExecutor, InsertExecutor},
    init_log,
    transaction::Transaction,
    Database, DbResult, Rid, Value,
};

/// A database in its own temp directory; dropping it cleans the files up.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

pub fn setup() -> TestDb {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("db")).unwrap();
    TestDb { db, _dir: dir }
}

/// `t(id INT, v INT)` with an index on `id`.
pub fn create_indexed_table(db: &Database, name: &str) -> Arc<TableInfo> {
    let table = db
        .create_table(name, &[ColumnDef::int("id"), ColumnDef::int("v")])
        .unwrap();
    db.create_index(name, &["id"]).unwrap();
    table
}

/// INSERT `(id, v)` through the executor, returning the new rid.
pub fn insert_row(
    db: &Database,
    txn: &Transaction,
    tab_name: &str,
    id: i32,
    v: i32,
) -> DbResult<Rid> {
    let table = db.get_table(tab_name)?;
    let ctx = Context::new(db.lock_manager(), txn);
    let mut exec = InsertExecutor::new(table, vec![Value::Int(id), Value::Int(v)], ctx)?;
    exec.execute()?;
    Ok(exec.rid())
}

pub fn read_int(record: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(record[offset..offset + 4].try_into().unwrap())
}

/// Full ordered index scan of `t(id, v)`, yielding `(id, v)` pairs.
pub fn index_scan_all(db: &Database, txn: &Transaction, tab_name: &str) -> DbResult<Vec<(i32, i32)>> {
    let table = db.get_table(tab_name)?;
    let ctx = Context::new(db.lock_manager(), txn);
    let mut exec = IndexScanExecutor::new(table, Vec::new(), &["id"], ctx)?;
    exec.open()?;

    let mut rows = Vec::new();
    while let Some(record) = exec.next()? {
        rows.push((read_int(&record.data, 0), read_int(&record.data, 4)));
    }
    Ok(rows)
}
