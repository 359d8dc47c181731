//! Live-channel registry.
//!
//! At most one live channel per name. A name is reserved (`Connecting`) before
//! the feed is asked to open it, so concurrent subscribes for the same name
//! open the transport once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Serialize, Serializer};
use shelf_events::{ChangeFeed, ChannelSpec, EventNormalizer};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{ChannelWorker, EventCallback, StatusCell};
use crate::{ChannelStatusEvent, ConnectionStatus, RetryPolicy};

/// Reason reported when a live channel with the same name already exists.
pub const ALREADY_EXISTS: &str = "channel already exists";

const TORN_DOWN: &str = "channel was torn down while opening";
const STATUS_BUFFER: usize = 64;

/// Result of [`SubscriptionManager::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    /// A live channel with this name exists; nothing was opened.
    AlreadyExists,
    /// The feed refused to open the channel; nothing was registered.
    Failed(String),
}

impl SubscribeOutcome {
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscribeOutcome::Subscribed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SubscribeOutcome::AlreadyExists => Some(ALREADY_EXISTS),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SubscribeOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl Serialize for SubscribeOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            subscribed: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
        }

        Wire {
            subscribed: self.is_subscribed(),
            reason: self.reason(),
            error: self.error(),
        }
        .serialize(serializer)
    }
}

struct ChannelEntry {
    spec: ChannelSpec,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelEntry {
    /// Signal the dispatcher to stop and hand back its task, if one was spawned.
    fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.cancel.cancel();
        self.status.set(ConnectionStatus::Disconnected);
        self.task.take()
    }
}

/// Wait for a stopped dispatcher, so its callback is not mid-delivery.
async fn join(channel: &str, task: JoinHandle<()>) {
    if let Err(err) = task.await {
        if !err.is_cancelled() {
            warn!(channel = %channel, error = %err, "dispatcher ended abnormally");
        }
    }
}

pub struct SubscriptionManager {
    feed: Arc<dyn ChangeFeed>,
    normalizer: Arc<EventNormalizer>,
    retry: RetryPolicy,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    next_instance: AtomicU64,
    status_tx: broadcast::Sender<ChannelStatusEvent>,
}

impl SubscriptionManager {
    pub fn new(feed: Arc<dyn ChangeFeed>, normalizer: EventNormalizer, retry: RetryPolicy) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_BUFFER);
        Self {
            feed,
            normalizer: Arc::new(normalizer),
            retry,
            channels: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
            status_tx,
        }
    }

    /// Default normalizers and reconnect policy.
    pub fn with_defaults(feed: Arc<dyn ChangeFeed>) -> Self {
        Self::new(feed, EventNormalizer::with_defaults(), RetryPolicy::default())
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, ChannelEntry>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Open a channel and route its normalized events to `callback`.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        table: impl Into<String>,
        filter: impl Into<String>,
        callback: EventCallback,
    ) -> SubscribeOutcome {
        let (spec, status, cancel) = {
            let mut channels = self.channels();
            let name: String = name.into();
            if channels
                .get(&name)
                .is_some_and(|existing| existing.status.get().is_live())
            {
                debug!(channel = %name, "subscribe skipped: {ALREADY_EXISTS}");
                return SubscribeOutcome::AlreadyExists;
            }

            let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
            let spec = ChannelSpec::new(name, table, filter).with_instance(instance);
            let status = Arc::new(StatusCell::new(
                spec.name.clone(),
                ConnectionStatus::Connecting,
                self.status_tx.clone(),
            ));
            let cancel = CancellationToken::new();
            let placeholder = ChannelEntry {
                spec: spec.clone(),
                status: Arc::clone(&status),
                cancel: cancel.clone(),
                task: None,
            };
            // A dead (Disconnected) entry under this name is replaced; its
            // dispatcher has already exited.
            if let Some(mut stale) = channels.insert(spec.name.clone(), placeholder) {
                drop(stale.stop());
            }
            status.announce();
            (spec, status, cancel)
        };

        let subscription = match self.feed.open(&spec).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let mut channels = self.channels();
                if channels
                    .get(&spec.name)
                    .is_some_and(|entry| entry.spec.instance == spec.instance)
                {
                    channels.remove(&spec.name);
                }
                drop(channels);
                warn!(channel = %spec.name, table = %spec.table, error = %err, "channel open failed");
                return SubscribeOutcome::Failed(err.to_string());
            }
        };

        // `Some` hands the subscription back when the name was torn down meanwhile.
        let unclaimed = {
            let mut channels = self.channels();
            match channels.get_mut(&spec.name) {
                Some(entry) if entry.spec.instance == spec.instance && !cancel.is_cancelled() => {
                    status.set(ConnectionStatus::Connected);
                    let worker = ChannelWorker {
                        spec: spec.clone(),
                        feed: Arc::clone(&self.feed),
                        normalizer: Arc::clone(&self.normalizer),
                        callback,
                        retry: self.retry.clone(),
                        status: Arc::clone(&status),
                        cancel,
                    };
                    entry.task = Some(tokio::spawn(worker.run(subscription)));
                    None
                }
                _ => Some(subscription),
            }
        };

        match unclaimed {
            None => {
                info!(channel = %spec.name, table = %spec.table, filter = %spec.filter, "channel subscribed");
                SubscribeOutcome::Subscribed
            }
            Some(subscription) => {
                // Only this instance is closed; a newer channel of the same
                // name stays open.
                debug!(channel = %spec.name, "{TORN_DOWN}");
                drop(subscription);
                self.feed.close(&spec).await;
                SubscribeOutcome::Failed(TORN_DOWN.to_string())
            }
        }
    }

    /// Tear down one channel. False if no channel had that name.
    ///
    /// Returns once its callback can no longer fire.
    pub async fn unsubscribe(&self, name: &str) -> bool {
        let removed = self.channels().remove(name);
        let Some(mut entry) = removed else {
            return false;
        };
        if let Some(task) = entry.stop() {
            join(name, task).await;
        }
        self.feed.close(&entry.spec).await;
        info!(channel = %name, "channel unsubscribed");
        true
    }

    /// Tear down every channel. Idempotent; returns how many were removed.
    ///
    /// The registry is emptied and every dispatcher signalled before the first
    /// await. Returns only after each dispatcher has stopped, so no callback
    /// registered here fires once this resolves.
    pub async fn disconnect_all(&self) -> usize {
        let mut removed: Vec<ChannelEntry> = self.channels().drain().map(|(_, e)| e).collect();
        let tasks: Vec<(String, JoinHandle<()>)> = removed
            .iter_mut()
            .filter_map(|entry| entry.stop().map(|task| (entry.spec.name.clone(), task)))
            .collect();

        for (channel, task) in tasks {
            join(&channel, task).await;
        }
        for entry in &removed {
            self.feed.close(&entry.spec).await;
        }

        if !removed.is_empty() {
            info!(channels = removed.len(), "all channels disconnected");
        }
        removed.len()
    }

    /// True iff at least one channel is currently connected.
    pub fn is_connected(&self) -> bool {
        self.channels()
            .values()
            .any(|entry| entry.status.get() == ConnectionStatus::Connected)
    }

    pub fn channel_status(&self, name: &str) -> Option<ConnectionStatus> {
        self.channels().get(name).map(|entry| entry.status.get())
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stream of status changes across all channels.
    pub fn status_events(&self) -> broadcast::Receiver<ChannelStatusEvent> {
        self.status_tx.subscribe()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.channels().values_mut() {
            if let Some(task) = entry.stop() {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("channels", &self.channel_names())
            .field("retry", &self.retry)
            .finish()
    }
}
