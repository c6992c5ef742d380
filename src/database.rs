use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use log::info;

use crate::{
    catalog::{Catalog, ColumnDef, ColumnMeta, IndexMeta, TableInfo, TableMeta},
    error::{DbError, DbResult},
    index::IndexHandle,
    record::{RecordFileHandle, RecordScan},
    storage::{BufferPool, DiskManager},
    transaction::{LockManager, Transaction, TransactionManager},
    utils::HandyRwLock,
};

/// One database instance: a directory of heap and index files plus the
/// shared managers every session works through.
pub struct Database {
    path: PathBuf,
    disk: Arc<DiskManager>,
    buffer_pool: Arc<BufferPool>,
    catalog: Catalog,
    lock_manager: Arc<LockManager>,
    txn_manager: TransactionManager,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        fs::create_dir_all(&path)?;

        let disk = Arc::new(DiskManager::new());
        let buffer_pool = Arc::new(BufferPool::new(disk.clone()));
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = TransactionManager::new(lock_manager.clone());

        info!("database opened at {:?}", path.as_ref());
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            disk,
            buffer_pool,
            catalog: Catalog::new(),
            lock_manager,
            txn_manager,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn get_table(&self, name: &str) -> DbResult<Arc<TableInfo>> {
        self.catalog.get_table(name)
    }

    /// Create a table with the given fixed-size columns; offsets are laid
    /// out in definition order.
    pub fn create_table(&self, name: &str, defs: &[ColumnDef]) -> DbResult<Arc<TableInfo>> {
        if defs.is_empty() {
            return Err(DbError::Internal("a table needs at least one column".to_string()));
        }

        let mut cols = Vec::with_capacity(defs.len());
        let mut offset = 0;
        for def in defs {
            cols.push(ColumnMeta {
                tab_name: name.to_string(),
                name: def.name.clone(),
                col_type: def.col_type,
                len: def.len,
                offset,
            });
            offset += def.len;
        }

        let file = RecordFileHandle::create(
            self.disk.clone(),
            self.buffer_pool.clone(),
            self.path.join(format!("{}.tbl", name)),
            offset,
        )?;

        let info = Arc::new(TableInfo {
            meta: RwLock::new(TableMeta {
                name: name.to_string(),
                cols,
                indexes: Vec::new(),
            }),
            file: Arc::new(file),
            indexes: RwLock::new(HashMap::new()),
        });
        self.catalog.add_table(info.clone());
        info!("created table {}", name);
        Ok(info)
    }

    /// Create an index over the named columns and backfill it from the
    /// table's current records.
    pub fn create_index(&self, tab_name: &str, col_names: &[&str]) -> DbResult<()> {
        self.create_index_with_order(tab_name, col_names, None)
    }

    /// As `create_index`, with an explicit node fan-out (handy for forcing
    /// splits in small trees).
    pub fn create_index_with_order(
        &self,
        tab_name: &str,
        col_names: &[&str],
        max_keys_per_node: Option<usize>,
    ) -> DbResult<()> {
        let table = self.catalog.get_table(tab_name)?;
        let index_name = Catalog::index_name(tab_name, col_names);

        let index_cols: Vec<ColumnMeta> = {
            let meta = table.meta.rl();
            col_names
                .iter()
                .map(|n| meta.get_col(n).map(|c| c.clone()))
                .collect::<DbResult<_>>()?
        };
        let key_len = index_cols.iter().map(|c| c.len).sum();
        let index_meta = IndexMeta {
            name: index_name.clone(),
            cols: index_cols,
            key_len,
        };

        let ih = Arc::new(IndexHandle::create(
            self.disk.clone(),
            self.buffer_pool.clone(),
            self.path.join(format!("{}.idx", index_name)),
            &index_name,
            index_meta.col_types(),
            index_meta.col_lens(),
            max_keys_per_node,
        )?);

        // backfill from the heap
        let mut scan = RecordScan::new(table.file.clone())?;
        while !scan.is_end() {
            let rid = scan.rid();
            let record = table.file.get_record(rid)?;
            ih.insert_entry(&index_meta.build_key(&record.data), rid)?;
            scan.next()?;
        }

        table.indexes.wl().insert(index_name.clone(), ih);
        table.meta.wl().indexes.push(index_meta);
        info!("created index {}", index_name);
        Ok(())
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.txn_manager.begin()
    }

    pub fn commit(&self, txn: &Transaction) -> DbResult<()> {
        self.txn_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Transaction) -> DbResult<()> {
        self.txn_manager.abort(txn, &self.catalog)
    }

    /// Write every dirty buffered page back to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.buffer_pool.flush_all()
    }
}
