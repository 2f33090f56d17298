//! # sp500-sync
//!
//! Fetch, diff, persist and notify for the S&P 500 listing snapshot.
//!
//! [`SyncPipeline`] ties the pieces together; every component is a trait
//! object so the daemon picks backends at startup and tests swap in doubles:
//!
//! - [`Fetcher`] / [`OpenAiFetcher`]: the external generation service
//! - [`SnapshotStore`]: [`ObjectSnapshotStore`], [`RedisStore`] or
//!   [`MemorySnapshotStore`]
//! - [`SubscriberRegistry`]: [`FileSubscriberRegistry`], [`RedisStore`] or
//!   [`MemorySubscriberRegistry`]
//! - [`Notifier`] / [`LogNotifier`]

pub mod diff;
pub mod error;
pub mod fetcher;
pub mod listing;
pub mod notifier;
pub mod object_store;
pub mod pipeline;
pub mod redis_store;
pub mod store;
pub mod subscribers;

pub use diff::{content_digest, has_changed, unified_diff};
pub use error::{FetchError, NotifyError, PartialFailure, StoreError, SubscribeError, SyncError};
pub use fetcher::{Fetcher, OpenAiFetcher, LISTING_PROMPT};
pub use listing::{ListingParser, PassThrough, QualitativeFilter, UnparsedListing};
pub use notifier::{LogNotifier, Notifier};
pub use object_store::{ObjectSnapshotStore, StoreWrite, SNAPSHOT_KEY};
pub use pipeline::{RunOutcome, RunReport, RunSummary, SyncPipeline, SyncState};
pub use redis_store::RedisStore;
pub use store::{MemorySnapshotStore, SnapshotStore};
pub use subscribers::{FileSubscriberRegistry, MemorySubscriberRegistry, SubscriberRegistry};
