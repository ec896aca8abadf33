//! Persistence gateway: named JSON documents with all-or-nothing batch writes.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type Batch = BTreeMap<String, Value>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a named document. `Ok(None)` when it has never been written.
    async fn read(&self, name: &str) -> Result<Option<Value>, StoreError>;

    /// Commits every document in the batch or none of them.
    async fn write_batch(&self, documents: Batch) -> Result<(), StoreError>;
}

/// Reads and decodes a document. Corrupt documents decode as absent; backend
/// failures are returned so callers can tell "unavailable" from "never written".
pub async fn read_document<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    name: &str,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.read(name).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(doc) => Ok(Some(doc)),
        Err(err) => {
            tracing::warn!(document = name, error = %err, "previous document is corrupt, treating as absent");
            Ok(None)
        }
    }
}

/// Reads and decodes a document, treating unavailable or corrupt documents as absent.
pub async fn read_or_empty<T: DeserializeOwned>(store: &dyn DocumentStore, name: &str) -> Option<T> {
    match read_document(store, name).await {
        Ok(doc) => doc,
        Err(err) => {
            tracing::warn!(document = name, error = %err, "previous document unavailable, treating as absent");
            None
        }
    }
}

/// In-memory store with copy-then-swap commits and failure injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<BTreeMap<String, Value>>>,
    fail_reads: Arc<Mutex<HashSet<String>>>,
    fail_writes: Arc<Mutex<HashSet<String>>>,
    fail_all_writes: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document directly, bypassing batch semantics.
    pub fn insert(&self, name: impl Into<String>, value: Value) {
        lock(&self.documents).insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        lock(&self.documents).get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        lock(&self.documents).clone()
    }

    /// Number of batches committed so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_read(&self, name: impl Into<String>) {
        lock(&self.fail_reads).insert(name.into());
    }

    /// Fails any batch that reaches `name`, after earlier documents were staged.
    pub fn fail_write(&self, name: impl Into<String>) {
        lock(&self.fail_writes).insert(name.into());
    }

    pub fn fail_all_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_reads).clear();
        lock(&self.fail_writes).clear();
        self.fail_all_writes.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, name: &str) -> Result<Option<Value>, StoreError> {
        if lock(&self.fail_reads).contains(name) {
            return Err(StoreError::Backend {
                message: format!("injected read failure for {name}"),
            });
        }
        Ok(lock(&self.documents).get(name).cloned())
    }

    async fn write_batch(&self, documents: Batch) -> Result<(), StoreError> {
        if self.fail_all_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend {
                message: "injected batch failure".to_string(),
            });
        }
        let fail_writes = lock(&self.fail_writes).clone();
        let mut staged = lock(&self.documents).clone();
        for (name, value) in documents {
            if fail_writes.contains(&name) {
                return Err(StoreError::Backend {
                    message: format!("injected write failure for {name}"),
                });
            }
            staged.insert(name, value);
        }
        *lock(&self.documents) = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
