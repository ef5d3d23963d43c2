use std::sync::Arc;

use dashmap::DashMap;

use super::{KvStore, PutStatus};
use crate::error::StorageError;

/// In-memory store backed by a concurrent hash map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// Copies every entry out; used when streaming a whole namespace.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: &str, value: &str) -> Result<PutStatus, StorageError> {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        match self.data.insert(key.to_string(), value.to_string()) {
            Some(_) => Ok(PutStatus::Updated),
            None => Ok(PutStatus::Created),
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
