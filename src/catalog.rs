use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    index::IndexHandle,
    record::RecordFileHandle,
    utils::HandyRwLock,
};

/// Column types. All values are fixed-size; strings are zero-padded to the
/// declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Str,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::Float => "FLOAT",
            ColumnType::Str => "CHAR",
        }
    }

    /// Compare two raw column images of this type. INT as signed 32-bit,
    /// FLOAT as IEEE-754 (NaN ordering unspecified), CHAR bytewise.
    pub fn compare(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        match self {
            ColumnType::Int => {
                let a = i32::from_le_bytes(lhs[..4].try_into().unwrap());
                let b = i32::from_le_bytes(rhs[..4].try_into().unwrap());
                a.cmp(&b)
            }
            ColumnType::Float => {
                let a = f32::from_le_bytes(lhs[..4].try_into().unwrap());
                let b = f32::from_le_bytes(rhs[..4].try_into().unwrap());
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            ColumnType::Str => lhs.cmp(rhs),
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            ColumnType::Int => 0,
            ColumnType::Float => 1,
            ColumnType::Str => 2,
        }
    }

    pub fn from_u8(v: u8) -> DbResult<Self> {
        match v {
            0 => Ok(ColumnType::Int),
            1 => Ok(ColumnType::Float),
            2 => Ok(ColumnType::Str),
            _ => Err(DbError::Internal(format!("unknown column type tag {}", v))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::Str(_) => ColumnType::Str,
        }
    }

    /// Raw image of the value, padded to the column length.
    pub fn to_bytes(&self, len: usize) -> DbResult<Vec<u8>> {
        match self {
            Value::Int(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Float(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Str(v) => {
                if v.len() > len {
                    return Err(DbError::IncompatibleType {
                        expected: format!("CHAR({})", len),
                        got: format!("CHAR({})", v.len()),
                    });
                }
                let mut buf = v.as_bytes().to_vec();
                buf.resize(len, 0);
                Ok(buf)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "'{}'", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub tab_name: String,
    pub name: String,
    pub col_type: ColumnType,
    pub len: usize,
    /// Byte offset of the column within a record.
    pub offset: usize,
}

/// Column list used when creating a table; offsets are computed by the
/// catalog.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub len: usize,
}

impl ColumnDef {
    pub fn int(name: &str) -> Self {
        Self {
            name: name.to_string(),
            col_type: ColumnType::Int,
            len: 4,
        }
    }

    pub fn float(name: &str) -> Self {
        Self {
            name: name.to_string(),
            col_type: ColumnType::Float,
            len: 4,
        }
    }

    pub fn string(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            col_type: ColumnType::Str,
            len,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub name: String,
    /// Indexed columns in definition order, carrying their record offsets.
    pub cols: Vec<ColumnMeta>,
    pub key_len: usize,
}

impl IndexMeta {
    /// Concatenate the indexed column images of `record` in definition
    /// order.
    pub fn build_key(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.key_len);
        for col in &self.cols {
            key.extend_from_slice(&record[col.offset..col.offset + col.len]);
        }
        key
    }

    pub fn col_types(&self) -> Vec<ColumnType> {
        self.cols.iter().map(|c| c.col_type).collect()
    }

    pub fn col_lens(&self) -> Vec<usize> {
        self.cols.iter().map(|c| c.len).collect()
    }

    /// True when the key space is a single INT column, the only shape gap
    /// locks cover.
    pub fn is_single_int(&self) -> bool {
        self.cols.len() == 1 && self.cols[0].col_type == ColumnType::Int
    }
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub name: String,
    pub cols: Vec<ColumnMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    pub fn record_size(&self) -> usize {
        self.cols.iter().map(|c| c.len).sum()
    }

    pub fn get_col(&self, name: &str) -> DbResult<&ColumnMeta> {
        self.cols
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))
    }

    pub fn get_index_meta(&self, col_names: &[&str]) -> DbResult<&IndexMeta> {
        self.indexes
            .iter()
            .find(|ix| {
                ix.cols.len() == col_names.len()
                    && ix.cols.iter().zip(col_names).all(|(c, n)| c.name == *n)
            })
            .ok_or_else(|| DbError::IndexNotFound(col_names.join(",")))
    }
}

/// One open table: its metadata, its heap file and its index handles.
pub struct TableInfo {
    pub meta: std::sync::RwLock<TableMeta>,
    pub file: Arc<RecordFileHandle>,
    pub indexes: std::sync::RwLock<HashMap<String, Arc<IndexHandle>>>,
}

impl TableInfo {
    pub fn get_index(&self, name: &str) -> DbResult<Arc<IndexHandle>> {
        self.indexes
            .rl()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))
    }

    /// Snapshot of the index metas, for iteration without holding the lock.
    pub fn index_metas(&self) -> Vec<IndexMeta> {
        self.meta.rl().indexes.clone()
    }

    pub fn columns(&self) -> Vec<ColumnMeta> {
        self.meta.rl().cols.clone()
    }
}

/// In-memory registry of open tables. On-disk catalog persistence is the
/// system manager's concern and out of scope here.
pub struct Catalog {
    tables: std::sync::RwLock<HashMap<String, Arc<TableInfo>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn add_table(&self, info: Arc<TableInfo>) {
        let name = info.meta.rl().name.clone();
        self.tables.wl().insert(name, info);
    }

    pub fn get_table(&self, name: &str) -> DbResult<Arc<TableInfo>> {
        self.tables
            .rl()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// Canonical index name for a column list, `tab_col1_col2`.
    pub fn index_name(tab_name: &str, col_names: &[&str]) -> String {
        format!("{}_{}", tab_name, col_names.join("_"))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
