//! Object-store backend — write-through JSON objects in a bucket directory.
//!
//! Persists the snapshot as `<bucket_dir>/stocks.json`:
//!
//! ```json
//! { "stocks": [{ "ticker": "AAPL", "name": "Apple Inc.", "market_cap": 2.8e12 }],
//!   "date": "2024-03-01",
//!   "content": "<raw listing text>" }
//! ```
//!
//! Writes use the atomic `.tmp` + rename pattern, so readers never observe a
//! half-written object. Each successful write is announced on a broadcast
//! write feed; the feed is an observability signal, not a subscriber
//! notification.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{broadcast, Mutex};

use sp500_core::Snapshot;

use crate::diff::content_digest;
use crate::error::{io_err, StoreError};
use crate::store::SnapshotStore;

/// Object key of the current snapshot.
pub const SNAPSHOT_KEY: &str = "stocks.json";

const WRITE_FEED_CAPACITY: usize = 16;

/// Announcement of one completed object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    pub key: String,
    pub as_of: NaiveDate,
    pub digest: String,
}

/// Path of object `key` inside the bucket directory `root`.
pub fn object_path_at(root: &Path, key: &str) -> PathBuf {
    root.join(key)
}

/// Snapshot store backed by a directory standing in for an object bucket.
pub struct ObjectSnapshotStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    feed: broadcast::Sender<StoreWrite>,
}

impl ObjectSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (feed, _) = broadcast::channel(WRITE_FEED_CAPACITY);
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
            feed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Receive a [`StoreWrite`] for every successful save, changed or not.
    pub fn subscribe_writes(&self) -> broadcast::Receiver<StoreWrite> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl SnapshotStore for ObjectSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let path = object_path_at(&self.root, SNAPSHOT_KEY);

        let _guard = self.write_lock.lock().await;
        write_atomic(&path, &json).await?;

        let write = StoreWrite {
            key: SNAPSHOT_KEY.to_string(),
            as_of: snapshot.as_of,
            digest: content_digest(&snapshot.content),
        };
        tracing::debug!(key = %write.key, digest = %write.digest, "object written");
        // No receivers is fine; the feed is best-effort.
        let _ = self.feed.send(write);
        Ok(())
    }

    async fn read(&self) -> Result<Snapshot, StoreError> {
        let path = object_path_at(&self.root, SNAPSHOT_KEY);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn describe(&self) -> String {
        format!("object ({})", self.root.display())
    }
}

/// Write `bytes` to `path` via a sibling `.tmp` file and a rename.
///
/// Creates the parent directory when missing. The temporary file is removed
/// if the rename fails.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid object path")));
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_err(dir, e))?;

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path, e));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}.tmp", std::process::id()))
}
