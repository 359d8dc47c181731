//! In-memory change feed for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::feed::{ChangeFeed, ChannelSpec, FeedError, FeedMessage, Subscription};
use crate::{ChangeRecord, RowFilter};

#[derive(Debug)]
struct OpenChannel {
    spec: ChannelSpec,
    filter: Option<RowFilter>,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

/// In-memory feed.
///
/// - Evaluates row filters on publish (stands in for server-side scoping)
/// - Counts `open` calls and can be told to fail the next N opens
/// - Can simulate transport loss per channel
type ChannelKey = (String, u64);

#[derive(Debug, Default)]
pub struct InMemoryChangeFeed {
    channels: Mutex<HashMap<ChannelKey, OpenChannel>>,
    open_calls: AtomicUsize,
    failing_opens: AtomicUsize,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelKey, OpenChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a record to every open channel on its table whose filter matches.
    ///
    /// Returns the number of channels it was delivered to.
    pub fn publish(&self, record: ChangeRecord) -> usize {
        let mut channels = self.channels();
        let mut delivered = 0;

        // Drop any channels whose receiver is gone while publishing.
        channels.retain(|_, ch| {
            if ch.spec.table != record.table
                || ch.filter.as_ref().is_some_and(|f| !f.matches(&record))
            {
                return !ch.sender.is_closed();
            }
            let sent = ch.sender.send(FeedMessage::Change(record.clone())).is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });

        delivered
    }

    /// Simulate transport loss on every open instance of `channel`.
    /// Returns false if none was open.
    pub fn disconnect(&self, channel: &str) -> bool {
        let mut channels = self.channels();
        let keys: Vec<ChannelKey> = channels
            .keys()
            .filter(|(name, _)| name == channel)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(ch) = channels.remove(key) {
                let _ = ch.sender.send(FeedMessage::Disconnected {
                    reason: "transport closed".to_string(),
                });
            }
        }
        !keys.is_empty()
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Total number of `open` calls, failed ones included.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn is_open(&self, channel: &str) -> bool {
        self.channels().keys().any(|(name, _)| name == channel)
    }

    /// Names of open channels, one entry per open instance.
    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels().keys().map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }

    pub fn filter_of(&self, channel: &str) -> Option<String> {
        self.channels()
            .values()
            .find(|ch| ch.spec.name == channel)
            .map(|ch| ch.spec.filter.clone())
    }

    fn take_failure(&self) -> bool {
        self.failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn open(&self, spec: &ChannelSpec) -> Result<Subscription, FeedError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(FeedError::Open {
                channel: spec.name.clone(),
                reason: "simulated open failure".to_string(),
            });
        }

        let filter = RowFilter::parse_optional(&spec.filter).map_err(|e| FeedError::Open {
            channel: spec.name.clone(),
            reason: e.to_string(),
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels().insert(
            (spec.name.clone(), spec.instance),
            OpenChannel {
                spec: spec.clone(),
                filter,
                sender,
            },
        );

        tracing::debug!(channel = %spec.name, table = %spec.table, filter = %spec.filter, "in-memory channel opened");
        Ok(Subscription::new(receiver))
    }

    async fn close(&self, spec: &ChannelSpec) {
        self.channels().remove(&(spec.name.clone(), spec.instance));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;
    use serde_json::json;

    fn copy_update(tenant: &str) -> ChangeRecord {
        ChangeRecord::new(
            "book_copies",
            Operation::Update,
            None,
            Some(json!({"tenant_id": tenant, "status": "available"})),
        )
    }

    #[tokio::test]
    async fn delivers_only_matching_rows() {
        let feed = InMemoryChangeFeed::new();
        let mut t1 = feed
            .open(&ChannelSpec::new("a", "book_copies", "tenant_id=eq.T1"))
            .await
            .unwrap();

        assert_eq!(feed.publish(copy_update("T2")), 0);
        assert_eq!(feed.publish(copy_update("T1")), 1);

        assert!(matches!(t1.recv().await, Some(FeedMessage::Change(r)) if r == copy_update("T1")));
        assert!(t1.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_injection_counts_calls() {
        let feed = InMemoryChangeFeed::new();
        feed.fail_next_opens(1);
        let spec = ChannelSpec::new("a", "book_copies", "");

        assert!(feed.open(&spec).await.is_err());
        assert!(feed.open(&spec).await.is_ok());
        assert_eq!(feed.open_calls(), 2);
        assert!(feed.is_open("a"));
    }

    #[tokio::test]
    async fn bad_filter_is_rejected() {
        let feed = InMemoryChangeFeed::new();
        let err = feed
            .open(&ChannelSpec::new("a", "book_copies", "tenant_id>5"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Open { .. }));
        assert!(!feed.is_open("a"));
    }

    #[tokio::test]
    async fn disconnect_signals_and_closes() {
        let feed = InMemoryChangeFeed::new();
        let mut sub = feed
            .open(&ChannelSpec::new("a", "book_copies", ""))
            .await
            .unwrap();

        assert!(feed.disconnect("a"));
        assert!(matches!(sub.recv().await, Some(FeedMessage::Disconnected { .. })));
        assert_eq!(sub.recv().await, None);
        assert!(!feed.disconnect("a"));
    }

    #[tokio::test]
    async fn instances_of_one_name_are_independent() {
        let feed = InMemoryChangeFeed::new();
        let old = ChannelSpec::new("a", "book_copies", "").with_instance(1);
        let new = ChannelSpec::new("a", "book_copies", "").with_instance(2);
        let _old_sub = feed.open(&old).await.unwrap();
        let mut new_sub = feed.open(&new).await.unwrap();

        feed.close(&old).await;

        assert_eq!(feed.open_channels(), vec!["a".to_string()]);
        assert_eq!(feed.publish(copy_update("T1")), 1);
        assert!(matches!(new_sub.recv().await, Some(FeedMessage::Change(_))));
    }
}
