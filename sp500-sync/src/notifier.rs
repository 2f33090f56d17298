//! Fan-out delivery of change events to subscribers.

use std::collections::BTreeSet;

use async_trait::async_trait;

use sp500_core::{ChangeEvent, SubscriberEmail};

use crate::diff::line_delta;
use crate::error::{NotifyError, PartialFailure};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event` to a single recipient.
    async fn deliver(
        &self,
        recipient: &SubscriberEmail,
        event: &ChangeEvent,
    ) -> Result<(), NotifyError>;

    /// Attempt delivery to every subscriber, independently.
    ///
    /// One failed recipient never stops the others. Returns the number of
    /// deliveries on full success.
    async fn notify(
        &self,
        event: &ChangeEvent,
        subscribers: &BTreeSet<SubscriberEmail>,
    ) -> Result<usize, PartialFailure> {
        let mut delivered = 0;
        let mut failed = BTreeSet::new();
        for recipient in subscribers {
            match self.deliver(recipient, event).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(subscriber = %recipient, error = %err.reason, "delivery failed");
                    failed.insert(recipient.clone());
                }
            }
        }
        if failed.is_empty() {
            Ok(delivered)
        } else {
            Err(PartialFailure { delivered, failed })
        }
    }
}

/// Transport stub: records one log line per recipient.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    topic: Option<String>,
}

impl LogNotifier {
    pub fn new(topic: Option<String>) -> Self {
        Self { topic }
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(
        &self,
        recipient: &SubscriberEmail,
        event: &ChangeEvent,
    ) -> Result<(), NotifyError> {
        let (inserted, deleted) = line_delta(event);
        tracing::info!(
            subscriber = %recipient,
            topic = self.topic.as_deref().unwrap_or("-"),
            as_of = %event.as_of,
            inserted,
            deleted,
            "listing change notification"
        );
        Ok(())
    }
}
