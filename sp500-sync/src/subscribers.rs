//! Subscriber registry — a durable set of validated email addresses.
//!
//! The registry is a set: adding an address that is already present is a
//! successful no-op. There is no removal path.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use sp500_core::SubscriberEmail;

use crate::error::{io_err, StoreError, SubscribeError};
use crate::object_store::{object_path_at, write_atomic};

/// Object key of the subscriber list in the object-store backend.
pub const SUBSCRIBERS_KEY: &str = "subscribers.json";

#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Validate `email` and add it.
    ///
    /// Returns `true` when the address was not registered before.
    async fn add(&self, email: &str) -> Result<bool, SubscribeError> {
        let email = SubscriberEmail::parse(email)?;
        let added = self.insert(&email).await?;
        if added {
            tracing::info!(subscriber = %email, "subscriber added");
        } else {
            tracing::debug!(subscriber = %email, "subscriber already registered");
        }
        Ok(added)
    }

    /// Add an already-validated address; `true` when newly inserted.
    async fn insert(&self, email: &SubscriberEmail) -> Result<bool, StoreError>;

    /// Every registered address, duplicate-free.
    async fn list(&self) -> Result<BTreeSet<SubscriberEmail>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySubscriberRegistry {
    members: RwLock<BTreeSet<SubscriberEmail>>,
}

impl MemorySubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriberRegistry for MemorySubscriberRegistry {
    async fn insert(&self, email: &SubscriberEmail) -> Result<bool, StoreError> {
        Ok(self.members.write().await.insert(email.clone()))
    }

    async fn list(&self) -> Result<BTreeSet<SubscriberEmail>, StoreError> {
        Ok(self.members.read().await.clone())
    }
}

/// Parse stored addresses, skipping entries that no longer validate.
pub(crate) fn parse_members(raw: Vec<String>) -> BTreeSet<SubscriberEmail> {
    let mut valid = BTreeSet::new();
    for entry in raw {
        match SubscriberEmail::parse(&entry) {
            Ok(email) => {
                valid.insert(email);
            }
            Err(err) => tracing::warn!(error = %err, "skipping invalid subscriber entry"),
        }
    }
    valid
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// Subscriber set persisted as a sorted JSON array next to the snapshot.
pub struct FileSubscriberRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSubscriberRegistry {
    /// Registry stored at `<root>/subscribers.json`.
    pub fn new(root: &Path) -> Self {
        Self {
            path: object_path_at(root, SUBSCRIBERS_KEY),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeSet<SubscriberEmail>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let raw: Vec<String> = serde_json::from_slice(&bytes)?;
                Ok(parse_members(raw))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}

#[async_trait]
impl SubscriberRegistry for FileSubscriberRegistry {
    async fn insert(&self, email: &SubscriberEmail) -> Result<bool, StoreError> {
        // Serialise read-modify-write within the process.
        let _guard = self.write_lock.lock().await;
        let mut members = self.load().await?;
        if !members.insert(email.clone()) {
            return Ok(false);
        }
        let json = serde_json::to_vec_pretty(&members)?;
        write_atomic(&self.path, &json).await?;
        Ok(true)
    }

    async fn list(&self) -> Result<BTreeSet<SubscriberEmail>, StoreError> {
        self.load().await
    }
}
