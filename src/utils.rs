use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::error::DbResult;

/// Shared, lock-protected value.
pub type Pod<T> = Arc<RwLock<T>>;

/// A handy shortcut to replace the `RwLock` write/read().unwrap() pattern
/// with `wl` and `rl`.
pub trait HandyRwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T>;
    fn rl(&self) -> RwLockReadGuard<'_, T>;
}

impl<T> HandyRwLock<T> for RwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap()
    }

    fn rl(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap()
    }
}

pub struct ConcurrentHashMap<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K, V> ConcurrentHashMap<K, V>
where
    K: std::cmp::Eq + std::hash::Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.rl().get(key).cloned()
    }

    pub fn get_or_insert(
        &self,
        key: &K,
        value_gen_fn: impl FnOnce(&K) -> DbResult<V>,
    ) -> DbResult<V> {
        let mut map = self.map.wl();
        match map.get(key) {
            Some(v) => Ok(v.clone()),
            None => {
                let v = value_gen_fn(key)?;
                map.insert(key.clone(), v.clone());
                Ok(v)
            }
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.map.wl().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.map.wl().remove(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.map.rl().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.map.wl().clear();
    }
}

impl<K, V> Default for ConcurrentHashMap<K, V>
where
    K: std::cmp::Eq + std::hash::Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
