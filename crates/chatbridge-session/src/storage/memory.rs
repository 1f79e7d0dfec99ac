//! In-memory document storage.

use std::sync::{
    PoisonError, RwLock,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chatbridge_core::{DocumentStore, PersistedDocument, StoreError};

/// In-memory storage implementation.
///
/// Useful for development and tests.
/// Data is lost on restart.
pub struct MemoryStore {
    doc: RwLock<PersistedDocument>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_document(PersistedDocument::default())
    }

    /// Create a store pre-populated with `doc`.
    #[must_use]
    pub fn with_document(doc: PersistedDocument) -> Self {
        Self {
            doc: RwLock::new(doc),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self) -> PersistedDocument {
        self.doc
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn write(&self, doc: &PersistedDocument) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("writes disabled".to_string()));
        }

        *self.doc.write().unwrap_or_else(PoisonError::into_inner) = doc.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}
