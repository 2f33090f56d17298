//! The sync run: fetch, compare, persist, notify.
//!
//! A [`SyncPipeline`] owns injected components and a single-flight guard.
//! Each run walks the state machine
//!
//! ```text
//! Idle → Fetching → Comparing → Persisting ─┬─→ Notifying → Idle
//!                                           └─→ Idle            (unchanged)
//! ```
//!
//! with `Failed` reachable from every step. A fetch failure leaves the store
//! untouched; persisting happens even when the content is unchanged so the
//! as-of date (and any cache TTL) is refreshed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};

use sp500_core::{ChangeEvent, Snapshot, SubscriberEmail};

use crate::diff::{content_digest, has_changed};
use crate::error::{FetchError, SyncError};
use crate::fetcher::Fetcher;
use crate::listing::{ListingParser, UnparsedListing};
use crate::notifier::Notifier;
use crate::store::SnapshotStore;
use crate::subscribers::SubscriberRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Fetching,
    Comparing,
    Persisting,
    Notifying,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Fetching => "fetching",
            SyncState::Comparing => "comparing",
            SyncState::Persisting => "persisting",
            SyncState::Notifying => "notifying",
            SyncState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Another run was in flight; this trigger was dropped.
    Skipped,
    /// Content matched the stored snapshot; no notifications.
    Unchanged,
    /// Content changed and subscribers were notified.
    Changed {
        notified: usize,
        failed: BTreeSet<SubscriberEmail>,
    },
    Failed(SyncError),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Skipped => "skipped",
            RunOutcome::Unchanged => "unchanged",
            RunOutcome::Changed { .. } => "changed",
            RunOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Everything one call to [`SyncPipeline::run`] did.
#[derive(Debug)]
pub struct RunReport {
    /// States entered, in order, starting with `Idle`.
    pub transitions: Vec<SyncState>,
    pub outcome: RunOutcome,
}

/// Compact record of the last completed (non-skipped) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub finished_at: DateTime<Utc>,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub notified: usize,
    pub failed_deliveries: usize,
}

impl RunSummary {
    fn from_outcome(outcome: &RunOutcome) -> Self {
        let (notified, failed_deliveries) = match outcome {
            RunOutcome::Changed { notified, failed } => (*notified, failed.len()),
            _ => (0, 0),
        };
        let (error, error_kind) = match outcome {
            RunOutcome::Failed(err) => (Some(err.to_string()), Some(err.kind())),
            _ => (None, None),
        };
        Self {
            finished_at: Utc::now(),
            outcome: outcome.label(),
            error,
            error_kind,
            notified,
            failed_deliveries,
        }
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct SyncPipeline {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn SnapshotStore>,
    subscribers: Arc<dyn SubscriberRegistry>,
    notifier: Arc<dyn Notifier>,
    parser: Arc<dyn ListingParser>,
    today: Clock,
    run_lock: Mutex<()>,
    state: watch::Sender<SyncState>,
    last_run: watch::Sender<Option<RunSummary>>,
}

impl SyncPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn SnapshotStore>,
        subscribers: Arc<dyn SubscriberRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            fetcher,
            store,
            subscribers,
            notifier,
            parser: Arc::new(UnparsedListing),
            today: Arc::new(|| Local::now().date_naive()),
            run_lock: Mutex::new(()),
            state: watch::Sender::new(SyncState::Idle),
            last_run: watch::Sender::new(None),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ListingParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Override the source of as-of dates (local calendar day by default).
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn subscribers(&self) -> &Arc<dyn SubscriberRegistry> {
        &self.subscribers
    }

    /// Current state of the run in flight, or of the last run.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    pub fn last_run(&self) -> Option<RunSummary> {
        self.last_run.borrow().clone()
    }

    /// Run once without a deadline.
    pub async fn run(&self) -> RunReport {
        self.run_guarded(None).await
    }

    /// Run once; everything after taking the single-flight guard is bounded
    /// by `deadline`. On expiry the in-flight step is dropped and the run
    /// fails with [`SyncError::DeadlineExceeded`].
    pub async fn run_with_deadline(&self, deadline: Duration) -> RunReport {
        self.run_guarded(Some(deadline)).await
    }

    async fn run_guarded(&self, deadline: Option<Duration>) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::warn!("sync already in flight; trigger dropped");
            return RunReport {
                transitions: vec![SyncState::Idle],
                outcome: RunOutcome::Skipped,
            };
        };

        let started = Instant::now();
        tracing::info!(deadline = ?deadline, "sync run started");
        let mut transitions = Vec::new();
        self.enter(&mut transitions, SyncState::Idle);

        let result = match deadline {
            Some(limit) => match timeout(limit, self.steps(&mut transitions)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::DeadlineExceeded(limit)),
            },
            None => self.steps(&mut transitions).await,
        };

        let outcome = match result {
            Ok(outcome) => {
                self.enter(&mut transitions, SyncState::Idle);
                tracing::info!(
                    outcome = outcome.label(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "sync run finished"
                );
                outcome
            }
            Err(err) => {
                let failed_in = transitions.last().copied().unwrap_or(SyncState::Idle);
                tracing::error!(
                    error_kind = err.kind(),
                    step = %failed_in,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "sync run failed"
                );
                self.enter(&mut transitions, SyncState::Failed);
                RunOutcome::Failed(err)
            }
        };

        self.last_run.send_replace(Some(RunSummary::from_outcome(&outcome)));
        RunReport {
            transitions,
            outcome,
        }
    }

    async fn steps(&self, transitions: &mut Vec<SyncState>) -> Result<RunOutcome, SyncError> {
        self.enter(transitions, SyncState::Fetching);
        let content = self.fetcher.fetch_current_listing().await?;
        if content.trim().is_empty() {
            return Err(FetchError::MalformedResponse("empty listing".into()).into());
        }

        self.enter(transitions, SyncState::Comparing);
        let previous = match self.store.read_previous().await {
            Ok(snapshot) => Some(snapshot.content),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        let changed = has_changed(previous.as_deref(), &content);

        self.enter(transitions, SyncState::Persisting);
        let as_of = (self.today)();
        let stocks = self.parser.parse(&content);
        let snapshot = Snapshot::new(content, as_of).with_stocks(stocks);
        self.store.save(&snapshot).await?;
        tracing::info!(
            %as_of,
            changed,
            digest = %content_digest(&snapshot.content),
            stocks = snapshot.stocks.len(),
            "snapshot persisted"
        );

        if !changed {
            return Ok(RunOutcome::Unchanged);
        }

        self.enter(transitions, SyncState::Notifying);
        let subscribers = self.subscribers.list().await?;
        let event = ChangeEvent {
            previous_content: previous,
            new_content: snapshot.content,
            as_of,
        };
        let outcome = match self.notifier.notify(&event, &subscribers).await {
            Ok(notified) => RunOutcome::Changed {
                notified,
                failed: BTreeSet::new(),
            },
            Err(partial) => {
                tracing::warn!(error = %partial, "notification partially failed");
                RunOutcome::Changed {
                    notified: partial.delivered,
                    failed: partial.failed,
                }
            }
        };
        Ok(outcome)
    }

    fn enter(&self, transitions: &mut Vec<SyncState>, state: SyncState) {
        tracing::debug!(%state, "sync state");
        transitions.push(state);
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{NotifyError, StoreError};
    use crate::store::MemorySnapshotStore;
    use crate::subscribers::MemorySubscriberRegistry;
    use SyncState::*;

    // -- doubles -------------------------------------------------------------

    #[derive(Default)]
    struct Scripted {
        replies: std::sync::Mutex<VecDeque<Result<String, FetchError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Fetcher for Scripted {
        async fn fetch_current_listing(&self) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".into())))
        }
    }

    /// Blocks until released, then returns fixed content.
    struct Gated {
        release: Notify,
    }

    #[async_trait]
    impl Fetcher for Gated {
        async fn fetch_current_listing(&self) -> Result<String, FetchError> {
            self.release.notified().await;
            Ok("AAPL,MSFT".into())
        }
    }

    struct NeverReturns;

    #[async_trait]
    impl Fetcher for NeverReturns {
        async fn fetch_current_listing(&self) -> Result<String, FetchError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct Recording {
        delivered: tokio::sync::Mutex<Vec<(String, ChangeEvent)>>,
        reject: Option<&'static str>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn deliver(
            &self,
            recipient: &SubscriberEmail,
            event: &ChangeEvent,
        ) -> Result<(), NotifyError> {
            if self.reject == Some(recipient.as_str()) {
                return Err(NotifyError {
                    recipient: recipient.clone(),
                    reason: "bounced".into(),
                });
            }
            self.delivered
                .lock()
                .await
                .push((recipient.to_string(), event.clone()));
            Ok(())
        }
    }

    struct BrokenRegistry;

    #[async_trait]
    impl SubscriberRegistry for BrokenRegistry {
        async fn insert(&self, _email: &SubscriberEmail) -> Result<bool, StoreError> {
            Err(StoreError::Backend {
                backend: "test",
                message: "down".into(),
            })
        }

        async fn list(&self) -> Result<BTreeSet<SubscriberEmail>, StoreError> {
            Err(StoreError::Backend {
                backend: "test",
                message: "down".into(),
            })
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    struct Harness {
        pipeline: Arc<SyncPipeline>,
        store: Arc<MemorySnapshotStore>,
        notifier: Arc<Recording>,
    }

    async fn harness(fetcher: Arc<dyn Fetcher>, subscribers: &[&str]) -> Harness {
        harness_with(fetcher, subscribers, Recording::default()).await
    }

    async fn harness_with(
        fetcher: Arc<dyn Fetcher>,
        subscribers: &[&str],
        notifier: Recording,
    ) -> Harness {
        let store = Arc::new(MemorySnapshotStore::new());
        let registry = Arc::new(MemorySubscriberRegistry::new());
        for email in subscribers {
            registry.add(email).await.unwrap();
        }
        let notifier = Arc::new(notifier);
        let pipeline = SyncPipeline::new(fetcher, store.clone(), registry, notifier.clone())
            .with_clock(day);
        Harness {
            pipeline: Arc::new(pipeline),
            store,
            notifier,
        }
    }

    // -- scenarios -----------------------------------------------------------

    #[tokio::test]
    async fn first_run_persists_and_notifies_everyone() {
        let h = harness(
            Scripted::new(vec![Ok("AAPL,MSFT".into())]),
            &["a@x.com", "b@x.com"],
        )
        .await;

        let report = h.pipeline.run().await;
        assert_eq!(
            report.transitions,
            vec![Idle, Fetching, Comparing, Persisting, Notifying, Idle]
        );
        assert!(matches!(
            report.outcome,
            RunOutcome::Changed { notified: 2, ref failed } if failed.is_empty()
        ));

        let stored = h.store.read().await.unwrap();
        assert_eq!(stored.content, "AAPL,MSFT");
        assert_eq!(stored.as_of, day());

        let delivered = h.notifier.delivered.lock().await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].1.previous_content, None);
        assert_eq!(delivered[0].1.new_content, "AAPL,MSFT");
    }

    #[tokio::test]
    async fn identical_content_stops_after_persisting() {
        let h = harness(
            Scripted::new(vec![Ok("AAPL,MSFT".into()), Ok("AAPL,MSFT".into())]),
            &["a@x.com"],
        )
        .await;

        h.pipeline.run().await;
        let second = h.pipeline.run().await;

        assert_eq!(
            second.transitions,
            vec![Idle, Fetching, Comparing, Persisting, Idle]
        );
        assert!(matches!(second.outcome, RunOutcome::Unchanged));
        assert_eq!(h.notifier.delivered.lock().await.len(), 1, "only the first run notifies");
        assert_eq!(h.store.read().await.unwrap().content, "AAPL,MSFT");
    }

    #[tokio::test]
    async fn changed_content_carries_previous_into_the_event() {
        let h = harness(
            Scripted::new(vec![Ok("AAPL,MSFT".into()), Ok("AAPL,NVDA".into())]),
            &["a@x.com"],
        )
        .await;

        h.pipeline.run().await;
        let report = h.pipeline.run().await;
        assert!(matches!(report.outcome, RunOutcome::Changed { notified: 1, .. }));

        let delivered = h.notifier.delivered.lock().await;
        let event = &delivered[1].1;
        assert_eq!(event.previous_content.as_deref(), Some("AAPL,MSFT"));
        assert_eq!(event.new_content, "AAPL,NVDA");
    }

    #[tokio::test]
    async fn fetch_failure_leaves_store_untouched() {
        let h = harness(
            Scripted::new(vec![Err(FetchError::Timeout(Duration::from_secs(30)))]),
            &["a@x.com"],
        )
        .await;

        let report = h.pipeline.run().await;
        assert_eq!(report.transitions, vec![Idle, Fetching, SyncState::Failed]);
        match &report.outcome {
            RunOutcome::Failed(err) => assert_eq!(err.kind(), "external_service"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(h.store.read().await.unwrap_err().is_not_found());
        assert!(h.notifier.delivered.lock().await.is_empty());
        assert_eq!(h.pipeline.state(), SyncState::Failed);
    }

    #[tokio::test]
    async fn failure_keeps_previous_snapshot() {
        let h = harness(
            Scripted::new(vec![Ok("AAPL".into()), Err(FetchError::RateLimited)]),
            &[],
        )
        .await;

        h.pipeline.run().await;
        let report = h.pipeline.run().await;
        assert!(report.outcome.is_failed());
        assert_eq!(h.store.read().await.unwrap().content, "AAPL");
    }

    #[tokio::test]
    async fn empty_listing_fails_without_overwriting() {
        let h = harness(
            Scripted::new(vec![Ok("AAPL,MSFT".into()), Ok(" \n".into())]),
            &["a@x.com"],
        )
        .await;

        h.pipeline.run().await;
        let report = h.pipeline.run().await;
        assert_eq!(report.transitions, vec![Idle, Fetching, SyncState::Failed]);
        match &report.outcome {
            RunOutcome::Failed(err) => assert_eq!(err.kind(), "external_service"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(h.store.read().await.unwrap().content, "AAPL,MSFT");
        assert_eq!(h.notifier.delivered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn partial_delivery_failure_does_not_fail_the_run() {
        let h = harness_with(
            Scripted::new(vec![Ok("AAPL".into())]),
            &["a@x.com", "bad@x.com", "c@x.com"],
            Recording {
                reject: Some("bad@x.com"),
                ..Recording::default()
            },
        )
        .await;

        let report = h.pipeline.run().await;
        assert_eq!(report.transitions.last(), Some(&Idle));
        match report.outcome {
            RunOutcome::Changed { notified, failed } => {
                assert_eq!(notified, 2);
                assert_eq!(failed.len(), 1);
                assert!(failed.contains(&SubscriberEmail::parse("bad@x.com").unwrap()));
            }
            other => panic!("expected Changed, got {other:?}"),
        }
        assert_eq!(h.pipeline.last_run().unwrap().failed_deliveries, 1);
    }

    #[tokio::test]
    async fn subscriber_list_failure_fails_after_commit() {
        let store = Arc::new(MemorySnapshotStore::new());
        let pipeline = SyncPipeline::new(
            Scripted::new(vec![Ok("AAPL".into())]),
            store.clone(),
            Arc::new(BrokenRegistry),
            Arc::new(Recording::default()),
        )
        .with_clock(day);

        let report = pipeline.run().await;
        assert_eq!(
            report.transitions,
            vec![Idle, Fetching, Comparing, Persisting, Notifying, SyncState::Failed]
        );
        match &report.outcome {
            RunOutcome::Failed(err) => assert_eq!(err.kind(), "storage"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.read().await.unwrap().content, "AAPL");
    }

    #[tokio::test]
    async fn overlapping_run_is_dropped() {
        let gated = Arc::new(Gated {
            release: Notify::new(),
        });
        let h = harness(gated.clone(), &["a@x.com"]).await;

        let mut state = h.pipeline.watch_state();
        let first = {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move { pipeline.run().await })
        };
        state.wait_for(|s| *s == Fetching).await.unwrap();
        assert!(h.pipeline.is_running());

        let second = h.pipeline.run().await;
        assert!(matches!(second.outcome, RunOutcome::Skipped));
        assert_eq!(second.transitions, vec![Idle]);

        gated.release.notify_one();
        let first = first.await.unwrap();
        assert!(matches!(first.outcome, RunOutcome::Changed { notified: 1, .. }));
        assert_eq!(h.notifier.delivered.lock().await.len(), 1);
        assert!(!h.pipeline.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_a_hung_fetch() {
        let h = harness(Arc::new(NeverReturns), &["a@x.com"]).await;

        let report = h.pipeline.run_with_deadline(Duration::from_secs(300)).await;
        assert_eq!(report.transitions, vec![Idle, Fetching, SyncState::Failed]);
        match &report.outcome {
            RunOutcome::Failed(SyncError::DeadlineExceeded(limit)) => {
                assert_eq!(*limit, Duration::from_secs(300));
            }
            other => panic!("expected deadline failure, got {other:?}"),
        }
        assert!(h.store.read().await.unwrap_err().is_not_found());
        assert!(!h.pipeline.is_running(), "guard released after cancellation");

        let summary = h.pipeline.last_run().unwrap();
        assert_eq!(summary.outcome, "failed");
        assert_eq!(summary.error_kind, Some("timeout"));
    }

    #[tokio::test]
    async fn parser_output_lands_on_the_snapshot() {
        struct FirstWordTickers;
        impl ListingParser for FirstWordTickers {
            fn parse(&self, content: &str) -> Vec<sp500_core::Stock> {
                content
                    .lines()
                    .filter_map(|line| line.split_whitespace().next())
                    .map(|ticker| sp500_core::Stock {
                        ticker: ticker.into(),
                        name: String::new(),
                        market_cap: 0.0,
                    })
                    .collect()
            }
        }

        let store = Arc::new(MemorySnapshotStore::new());
        let pipeline = SyncPipeline::new(
            Scripted::new(vec![Ok("AAPL Apple\nMSFT Microsoft".into())]),
            store.clone(),
            Arc::new(MemorySubscriberRegistry::new()),
            Arc::new(Recording::default()),
        )
        .with_parser(Arc::new(FirstWordTickers))
        .with_clock(day);

        pipeline.run().await;
        let tickers: Vec<String> = store
            .read()
            .await
            .unwrap()
            .stocks
            .into_iter()
            .map(|s| s.ticker)
            .collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn last_run_is_empty_until_a_run_completes() {
        let h = harness(Scripted::new(vec![Ok("AAPL".into())]), &[]).await;
        assert!(h.pipeline.last_run().is_none());
        assert_eq!(h.pipeline.state(), Idle);

        h.pipeline.run().await;
        let summary = h.pipeline.last_run().unwrap();
        assert_eq!(summary.outcome, "changed");
        assert_eq!(summary.notified, 0);
        assert!(summary.error.is_none());
    }
}
