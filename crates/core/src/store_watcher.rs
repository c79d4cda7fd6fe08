use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Watches one pipeline document for changes and forwards a unit event per
/// observed modify/create/remove.
///
/// The watch is installed on the parent directory and filtered by file name:
/// the atomic rename-over commit replaces the inode, which a direct file
/// watch would silently lose, and filtering keeps the downstream documents
/// in the same directory out of the watched set.
pub struct StoreWatcher {
    tx: mpsc::Sender<()>,
    watched_file: PathBuf,
}

impl StoreWatcher {
    /// Creates a watcher for the given document.
    ///
    /// Returns the watcher and the receiver change events arrive on.
    #[must_use]
    pub fn new(watched_file: PathBuf) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { tx, watched_file }, rx)
    }

    /// Runs the watch loop until the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or the watcher
    /// task fails.
    pub async fn watch(self) -> Result<()> {
        let tx = self.tx;
        let file = self.watched_file;

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher =
                notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                })?;

            let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            tracing::info!(file = %file.display(), "watching store document");

            let file_name = file.file_name().map(std::ffi::OsStr::to_os_string);
            for event in notify_rx {
                if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                    continue;
                }
                let matches = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(std::ffi::OsStr::to_os_string) == file_name);
                if matches && tx.blocking_send(()).is_err() {
                    // Receiver dropped; stop watching.
                    break;
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn change_to_watched_file_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("scraped_posts.json");
        std::fs::write(&watched, "[]").unwrap();

        let (watcher, mut rx) = StoreWatcher::new(watched.clone());
        tokio::spawn(watcher.watch());

        // Give the blocking watcher time to install.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&watched, "[{}]").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(got.is_ok(), "no change event within timeout");
    }

    #[tokio::test]
    async fn sibling_files_do_not_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("scraped_posts.json");
        let sibling = dir.path().join("coin-data.json");
        std::fs::write(&watched, "[]").unwrap();
        std::fs::write(&sibling, "[]").unwrap();

        let (watcher, mut rx) = StoreWatcher::new(watched);
        tokio::spawn(watcher.watch());
        tokio::time::sleep(Duration::from_millis(300)).await;

        std::fs::write(&sibling, "[1]").unwrap();

        let got = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
        assert!(got.is_err(), "downstream document change leaked through");
    }
}
