//! JSON file document storage with atomic replace.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chatbridge_core::{DocumentStore, PersistedDocument, StoreError};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

/// File-backed store holding the whole document as one JSON file.
///
/// Writes go to a sibling temp file which is fsynced and renamed over the
/// target, so a reader never sees a torn document.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or initialize) the store at `path`.
    ///
    /// Creates the parent directory and writes a repaired document if the
    /// existing content is missing or unusable.
    ///
    /// # Errors
    /// Returns error if the directory or initial document cannot be written.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let store = Self {
            path,
            write_lock: Mutex::new(()),
        };

        let (doc, repaired) = store.read_repaired().await;
        if repaired {
            tracing::info!(path = %store.path.display(), "Initializing document store");
            store.write(&doc).await?;
        }

        Ok(store)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_repaired(&self) -> (PersistedDocument, bool) {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => PersistedDocument::parse_lenient(&raw),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), "Unreadable document, resetting: {e}");
                }
                (PersistedDocument::default(), true)
            }
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "store.json".into(), |n| n.to_string_lossy());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load(&self) -> PersistedDocument {
        let (doc, repaired) = self.read_repaired().await;
        if repaired {
            if let Err(e) = self.write(&doc).await {
                tracing::warn!(path = %self.path.display(), "Failed to persist repaired document: {e}");
            }
        }
        doc
    }

    async fn write(&self, doc: &PersistedDocument) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(doc)?;

        let _guard = self.write_lock.lock().await;
        let tmp_path = self.temp_path();
        let mut tmp_file = fs::File::create(&tmp_path).await?;
        tmp_file.write_all(&json).await?;
        tmp_file.sync_all().await?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_core::ScheduledMessage;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_default_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(store.load().await, PersistedDocument::default());

        let json = read_json(&path).await;
        assert_eq!(json["messages"], serde_json::json!([]));
        assert_eq!(json["scheduledMessages"], serde_json::json!([]));
        assert_eq!(json["sessions"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_partial_document_repaired_and_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{"messages":[]}"#).await.unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        let doc = store.load().await;
        assert!(doc.scheduled_messages.is_empty());
        assert!(doc.sessions.is_empty());

        let json = read_json(&path).await;
        assert!(json["scheduledMessages"].is_array());
        assert!(json["sessions"].is_array());
    }

    #[tokio::test]
    async fn test_corrupt_content_reset_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).await.unwrap();

        fs::write(&path, "{ not json").await.unwrap();
        assert_eq!(store.load().await, PersistedDocument::default());
        assert!(read_json(&path).await["messages"].is_array());

        fs::write(&path, "").await.unwrap();
        assert_eq!(store.load().await, PersistedDocument::default());
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).await.unwrap();

        let mut doc = PersistedDocument::default();
        doc.scheduled_messages.push(ScheduledMessage {
            id: "s1".into(),
            conversation_id: "c1".into(),
            content: "later".into(),
            send_at_timestamp: Utc::now(),
            sent: false,
            sent_at_timestamp: None,
            last_error: Some("boom".into()),
        });
        store.write(&doc).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.load().await, doc);

        // No temp file left behind
        assert!(!dir.path().join(".store.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        drop(dir);

        let result = store.write(&PersistedDocument::default()).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
    }
}
