//! Redis backend — the key-value-cache shape.
//!
//! - snapshot: JSON under `sp500_data`, written with `SET … EX <ttl>`; a
//!   missing or expired key reads as [`StoreError::NotFound`]
//! - subscribers: a Redis set under `subscribers` (`SADD` / `SMEMBERS`)
//!
//! Every call is bounded by [`RedisStore::op_timeout`]; nothing is retried.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::timeout;

use sp500_core::{Snapshot, SubscriberEmail};

use crate::error::StoreError;
use crate::store::SnapshotStore;
use crate::subscribers::{parse_members, SubscriberRegistry};

pub const SNAPSHOT_CACHE_KEY: &str = "sp500_data";
pub const SUBSCRIBERS_SET_KEY: &str = "subscribers";

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared connection settings for the Redis-backed store and registry.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    ttl: Duration,
    op_timeout: Duration,
}

impl RedisStore {
    /// Parse `url`; no connection is made until the first call.
    pub fn open(url: &str, ttl: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            ttl,
            op_timeout: DEFAULT_OP_TIMEOUT,
        })
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn bounded<T, Fut>(&self, op: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Backend {
                backend: "redis",
                message: format!("operation timed out after {:?}", self.op_timeout),
            }),
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl SnapshotStore for RedisStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let ttl_secs = self.ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let () = conn.set_ex(SNAPSHOT_CACHE_KEY, json, ttl_secs).await?;
            Ok(())
        })
        .await
    }

    async fn read(&self) -> Result<Snapshot, StoreError> {
        let raw: Option<String> = self
            .bounded(async {
                let mut conn = self.connection().await?;
                Ok(conn.get(SNAPSHOT_CACHE_KEY).await?)
            })
            .await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound),
        }
    }

    fn describe(&self) -> String {
        format!("redis (ttl {}s)", self.ttl.as_secs())
    }
}

#[async_trait]
impl SubscriberRegistry for RedisStore {
    async fn insert(&self, email: &SubscriberEmail) -> Result<bool, StoreError> {
        let added: i64 = self
            .bounded(async {
                let mut conn = self.connection().await?;
                Ok(conn.sadd(SUBSCRIBERS_SET_KEY, email.as_str()).await?)
            })
            .await?;
        Ok(added > 0)
    }

    async fn list(&self) -> Result<BTreeSet<SubscriberEmail>, StoreError> {
        let members: Vec<String> = self
            .bounded(async {
                let mut conn = self.connection().await?;
                Ok(conn.smembers(SUBSCRIBERS_SET_KEY).await?)
            })
            .await?;

        // Entries written by other producers are not trusted blindly.
        Ok(parse_members(members))
    }
}
