//! Storage implementations and the serialized document journal.

use std::sync::Arc;

use chatbridge_core::{DocumentStore, PersistedDocument, StoreError};
use tokio::sync::Mutex;

pub mod json_file;

#[cfg(feature = "memory")]
pub mod memory;

pub use json_file::JsonFileStore;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

/// Serializes every read-modify-write cycle against a document store.
///
/// Two concurrent updates touching different entries both survive: the
/// second one reloads the document after the first has been written.
pub struct Journal {
    store: Arc<dyn DocumentStore>,
    writer: Mutex<()>,
}

impl Journal {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    /// Current document contents.
    pub async fn snapshot(&self) -> PersistedDocument {
        self.store.load().await
    }

    /// Load, mutate and write back under the writer lock.
    ///
    /// # Errors
    /// Returns error if the write fails; the mutation is then lost.
    pub async fn update<R, F>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut PersistedDocument) -> R + Send,
        R: Send,
    {
        let _writer = self.writer.lock().await;
        let mut doc = self.store.load().await;
        let out = mutate(&mut doc);
        self.store.write(&doc).await?;
        Ok(out)
    }
}
