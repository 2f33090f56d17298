//! Backend selection: builds the pipeline's components from [`Config`].

use std::sync::Arc;

use tokio::sync::broadcast;

use sp500_core::{Config, StoreBackend};
use sp500_sync::{
    FileSubscriberRegistry, LogNotifier, MemorySnapshotStore, MemorySubscriberRegistry,
    ObjectSnapshotStore, OpenAiFetcher, RedisStore, SnapshotStore, StoreWrite, SubscriberRegistry,
    SyncPipeline,
};

use crate::error::DaemonError;

/// A wired pipeline plus what the runtime needs to observe it.
pub struct Components {
    pub pipeline: Arc<SyncPipeline>,
    /// Present only for the object backend.
    pub write_feed: Option<broadcast::Receiver<StoreWrite>>,
    pub backend: String,
}

pub fn build_components(config: &Config) -> Result<Components, DaemonError> {
    let fetcher = Arc::new(OpenAiFetcher::new(&config.openai)?);
    let notifier = Arc::new(LogNotifier::new(config.aws.topic_arn.clone()));

    let (store, subscribers, write_feed): (
        Arc<dyn SnapshotStore>,
        Arc<dyn SubscriberRegistry>,
        Option<broadcast::Receiver<StoreWrite>>,
    ) = match config.store.backend {
        StoreBackend::Object => {
            let bucket = config.bucket_dir();
            let store = Arc::new(ObjectSnapshotStore::new(&bucket));
            let feed = store.subscribe_writes();
            (
                store,
                Arc::new(FileSubscriberRegistry::new(&bucket)),
                Some(feed),
            )
        }
        StoreBackend::Redis => {
            let redis = Arc::new(RedisStore::open(
                &config.store.redis_url,
                config.store.snapshot_ttl,
            )?);
            (redis.clone(), redis, None)
        }
        StoreBackend::Memory => (
            Arc::new(MemorySnapshotStore::with_ttl(config.store.snapshot_ttl)),
            Arc::new(MemorySubscriberRegistry::new()),
            None,
        ),
    };

    let backend = store.describe();
    tracing::info!(
        %backend,
        region = %config.aws.region,
        model = %config.openai.model,
        "components ready"
    );
    if config.openai.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; sync runs will fail until it is");
    }

    let pipeline = SyncPipeline::new(fetcher, store, subscribers, notifier);
    Ok(Components {
        pipeline: Arc::new(pipeline),
        write_feed,
        backend,
    })
}
