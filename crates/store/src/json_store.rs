use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document {path} unreadable after {attempts} attempts: {reason}")]
    Unreadable {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },
    #[error("failed to serialize store document {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One JSON-array document on disk.
///
/// Writers serialize behind the per-file mutex and commit with
/// write-temp-then-rename, so a concurrent reader observes either the full
/// previous array or the full new one. Readers that catch the document
/// empty or partial (the window between create and rename on filesystems
/// without atomic rename) retry before failing.
pub struct JsonStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the full document. A missing file reads as an empty array;
    /// an empty or malformed file is retried up to 3 times, 200 ms apart.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unreadable`] when every attempt found the
    /// document empty or malformed.
    pub async fn read(&self) -> Result<Vec<T>, StoreError> {
        let mut last_reason = String::new();

        for attempt in 0..READ_ATTEMPTS {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        last_reason = "zero-byte document".to_string();
                    } else {
                        match serde_json::from_slice(&bytes) {
                            Ok(items) => return Ok(items),
                            Err(e) => last_reason = e.to_string(),
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(Vec::new());
                }
                Err(e) => {
                    return Err(StoreError::Io {
                        path: self.path.clone(),
                        source: e,
                    });
                }
            }

            tracing::debug!(
                path = %self.path.display(),
                attempt = attempt + 1,
                reason = %last_reason,
                "store read retry"
            );
            if attempt + 1 < READ_ATTEMPTS {
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
        }

        Err(StoreError::Unreadable {
            path: self.path.clone(),
            attempts: READ_ATTEMPTS,
            reason: last_reason,
        })
    }

    /// Replaces the document wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the commit fails.
    pub async fn replace(&self, items: &[T]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.commit(items).await
    }

    /// Read-merge-write under the document lock. `merge` receives the
    /// current contents and returns the new contents plus a caller value.
    ///
    /// # Errors
    ///
    /// Propagates read failures (so callers retry rather than clobber a
    /// document that is temporarily unreadable) and commit failures.
    pub async fn update<R, F>(&self, merge: F) -> Result<R, StoreError>
    where
        F: FnOnce(Vec<T>) -> (Vec<T>, R),
    {
        let _guard = self.lock.lock().await;
        let current = self.read().await?;
        let (next, result) = merge(current);
        self.commit(&next).await?;
        Ok(result)
    }

    async fn commit(&self, items: &[T]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Io {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
            }
        }

        let bytes = serde_json::to_vec_pretty(items).map_err(|e| StoreError::Serialize {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> JsonStore<u32> {
        JsonStore::new(dir.path().join("doc.json"))
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.replace(&[1, 2, 3]).await.unwrap();
        assert_eq!(store.read().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_file_read_recovers_once_content_lands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "").unwrap();

        let store: JsonStore<u32> = JsonStore::new(path.clone());
        // Another writer finishes its rename mid-retry.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(&path, "[7]").unwrap();
        });

        assert_eq!(store.read().await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn persistently_empty_file_errors_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "").unwrap();

        let store: JsonStore<u32> = JsonStore::new(path);
        let err = store.read().await.unwrap_err();
        assert!(matches!(err, StoreError::Unreadable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn update_merges_under_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(store_in(&dir));
        store.replace(&[]).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(move |mut items| {
                        items.push(i);
                        (items, ())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let items = store.read().await.unwrap();
        assert_eq!(items.len(), 20);
    }

    #[tokio::test]
    async fn readers_never_observe_partial_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonStore::<String>::new(dir.path().join("doc.json")));
        let payload: Vec<String> = (0..200).map(|i| format!("item-{i:04}")).collect();
        store.replace(&payload).await.unwrap();

        let writer = {
            let store = store.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    store.replace(&payload).await.unwrap();
                }
            })
        };

        for _ in 0..50 {
            let items = store.read().await.unwrap();
            // Full previous state or full new state; both are the complete array.
            assert_eq!(items.len(), 200);
        }

        writer.await.unwrap();
    }
}
