//! In-memory backend that records every call.
//!
//! Stands in for object storage in tests and local experiments. Failures can
//! be injected per key suffix.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::StorageBackend;
use crate::{Error, Result};

/// A call made against a [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Put { key: String, content_type: String },
    Delete { key: String },
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, Vec<u8>>,
    ops: Vec<StorageOp>,
    failing_puts: Vec<(String, usize)>,
    failing_deletes: Vec<(String, usize)>,
}

/// Consume one pending failure whose suffix matches `key`.
fn take_failure(rules: &mut [(String, usize)], key: &str) -> bool {
    for (suffix, remaining) in rules.iter_mut() {
        if *remaining > 0 && key.ends_with(suffix.as_str()) {
            *remaining -= 1;
            return true;
        }
    }
    false
}

/// Remote-like backend keeping objects in a map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` puts of keys ending in `suffix`.
    pub fn fail_puts(&self, suffix: impl Into<String>, times: usize) {
        self.state.lock().failing_puts.push((suffix.into(), times));
    }

    /// Fail the next `times` deletes of keys ending in `suffix`.
    pub fn fail_deletes(&self, suffix: impl Into<String>, times: usize) {
        self.state.lock().failing_deletes.push((suffix.into(), times));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every call so far, in order, including failed ones.
    pub fn ops(&self) -> Vec<StorageOp> {
        self.state.lock().ops.clone()
    }

    pub fn put_attempts(&self, key: &str) -> usize {
        self.state
            .lock()
            .ops
            .iter()
            .filter(|op| matches!(op, StorageOp::Put { key: k, .. } if k == key))
            .count()
    }

    /// Store an object directly, bypassing the recorded operations.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.state.lock().objects.insert(key.into(), data);
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn put(&self, source: &Path, key: &str, content_type: &str) -> Result<()> {
        let data = tokio::fs::read(source).await?;

        let mut state = self.state.lock();
        state.ops.push(StorageOp::Put {
            key: key.to_string(),
            content_type: content_type.to_string(),
        });
        if take_failure(&mut state.failing_puts, key) {
            return Err(Error::storage(format!("injected put failure for {key}")));
        }
        state.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.ops.push(StorageOp::Delete {
            key: key.to_string(),
        });
        if take_failure(&mut state.failing_deletes, key) {
            return Err(Error::storage(format!("injected delete failure for {key}")));
        }
        state.objects.remove(key);
        Ok(())
    }
}
