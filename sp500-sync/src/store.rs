//! Snapshot slot contract and the in-process cache backend.
//!
//! Every backend holds exactly one current [`Snapshot`] and replaces it
//! atomically: a concurrent [`SnapshotStore::read`] sees either the old or the
//! new value in full.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use sp500_core::Snapshot;

use crate::error::StoreError;

/// Durable home of the single current snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the current snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// The current snapshot; [`StoreError::NotFound`] before the first save
    /// or after the cached value expired.
    async fn read(&self) -> Result<Snapshot, StoreError>;

    /// The value a sync run compares against.
    ///
    /// Read-before-write against the single slot: the pipeline calls this
    /// once, before `save`, and diffs against the result.
    async fn read_previous(&self) -> Result<Snapshot, StoreError> {
        self.read().await
    }

    /// Short backend label for logs and the status payload.
    fn describe(&self) -> String;
}

struct CachedSnapshot {
    snapshot: Snapshot,
    stored_at: Instant,
}

/// Cache-shaped store held in process memory, with an optional TTL.
pub struct MemorySnapshotStore {
    slot: RwLock<Option<CachedSnapshot>>,
    ttl: Option<Duration>,
}

impl MemorySnapshotStore {
    /// A store whose entries never expire.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            ttl: None,
        }
    }

    /// A store whose entry reads as missing once `ttl` has elapsed since the
    /// last save.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl: Some(ttl),
        }
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let entry = CachedSnapshot {
            snapshot: snapshot.clone(),
            stored_at: Instant::now(),
        };
        *self.slot.write().await = Some(entry);
        Ok(())
    }

    async fn read(&self) -> Result<Snapshot, StoreError> {
        let slot = self.slot.read().await;
        match slot.as_ref() {
            Some(entry) if !self.is_expired(entry) => Ok(entry.snapshot.clone()),
            _ => Err(StoreError::NotFound),
        }
    }

    fn describe(&self) -> String {
        match self.ttl {
            Some(ttl) => format!("memory (ttl {}s)", ttl.as_secs()),
            None => "memory".to_string(),
        }
    }
}

impl MemorySnapshotStore {
    fn is_expired(&self, entry: &CachedSnapshot) -> bool {
        self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }
}
