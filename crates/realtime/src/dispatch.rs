//! Per-channel dispatcher task and callback isolation.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use shelf_events::{ChangeFeed, ChannelSpec, DomainEvent, EventNormalizer, FeedMessage, Subscription};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ChannelStatusEvent, ConnectionStatus, RetryPolicy};

/// Consumer of normalized events. Errors and panics are contained per event.
pub type EventCallback = Arc<dyn Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync>;

/// Box a closure as an [`EventCallback`].
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("callback failed: {0}")]
    Failed(String),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

/// Invoke `callback` once, turning errors and panics into [`CallbackError`].
pub fn deliver(callback: &EventCallback, event: &DomainEvent) -> Result<(), CallbackError> {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(CallbackError::Failed(format!("{err:#}"))),
        Err(payload) => Err(CallbackError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Shared status cell for one channel, visible to the manager.
pub(crate) struct StatusCell {
    channel: String,
    value: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ChannelStatusEvent>,
}

impl StatusCell {
    pub(crate) fn new(
        channel: String,
        initial: ConnectionStatus,
        events: broadcast::Sender<ChannelStatusEvent>,
    ) -> Self {
        Self {
            channel,
            value: watch::Sender::new(initial),
            events,
        }
    }

    /// Broadcast the current value without changing it.
    pub(crate) fn announce(&self) {
        let _ = self.events.send(ChannelStatusEvent {
            channel: self.channel.clone(),
            status: self.get(),
        });
    }

    pub(crate) fn get(&self) -> ConnectionStatus {
        *self.value.borrow()
    }

    pub(crate) fn set(&self, status: ConnectionStatus) {
        if self.value.send_replace(status) == status {
            return;
        }
        debug!(channel = %self.channel, %status, "channel status changed");
        // Nobody listening is fine.
        let _ = self.events.send(ChannelStatusEvent {
            channel: self.channel.clone(),
            status,
        });
    }
}

/// Drains one subscription, normalizes each record and hands it to the callback.
///
/// On transport loss it reopens the same channel with backoff. Every wait
/// races `cancel`, and cancellation is checked again before each delivery, so
/// once the token fires the callback is not invoked again.
pub(crate) struct ChannelWorker {
    pub(crate) spec: ChannelSpec,
    pub(crate) feed: Arc<dyn ChangeFeed>,
    pub(crate) normalizer: Arc<EventNormalizer>,
    pub(crate) callback: EventCallback,
    pub(crate) retry: RetryPolicy,
    pub(crate) status: Arc<StatusCell>,
    pub(crate) cancel: CancellationToken,
}

impl ChannelWorker {
    pub(crate) async fn run(self, mut subscription: Subscription) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = subscription.recv() => message,
            };

            let reason = match message {
                Some(FeedMessage::Change(record)) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.dispatch(record);
                    continue;
                }
                Some(FeedMessage::Disconnected { reason }) => reason,
                None => "subscription ended".to_string(),
            };

            warn!(channel = %self.spec.name, %reason, "channel transport lost");
            match self.reconnect().await {
                Some(next) => subscription = next,
                None => break,
            }
        }
        debug!(channel = %self.spec.name, "dispatcher stopped");
    }

    fn dispatch(&self, record: shelf_events::ChangeRecord) {
        let event = self.normalizer.normalize(record);
        if let Err(err) = deliver(&self.callback, &event) {
            warn!(
                channel = %self.spec.name,
                event_type = event.event_type(),
                error = %err,
                "subscription callback error"
            );
        }
    }

    /// `None` when the budget ran out or the channel was torn down meanwhile.
    async fn reconnect(&self) -> Option<Subscription> {
        self.status.set(ConnectionStatus::Reconnecting);

        let mut attempt = 0;
        while self.retry.should_retry(attempt) {
            attempt += 1;
            let delay = self.retry.delay_for_attempt(attempt);
            debug!(channel = %self.spec.name, attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

            let reopened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                reopened = async {
                    tokio::time::sleep(delay).await;
                    self.feed.open(&self.spec).await
                } => reopened,
            };

            match reopened {
                Ok(subscription) => {
                    info!(channel = %self.spec.name, attempt, "channel reconnected");
                    self.status.set(ConnectionStatus::Connected);
                    return Some(subscription);
                }
                Err(err) => {
                    warn!(channel = %self.spec.name, attempt, error = %err, "reconnect attempt failed");
                }
            }
        }

        error!(
            channel = %self.spec.name,
            attempts = attempt,
            "reconnect budget exhausted; channel disconnected"
        );
        self.status.set(ConnectionStatus::Disconnected);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_events::{ChangeRecord, Operation};

    fn passthrough() -> DomainEvent {
        DomainEvent::Passthrough(ChangeRecord::new("loans", Operation::Insert, None, None))
    }

    #[test]
    fn deliver_ok() {
        let cb = callback(|_| Ok(()));
        assert_eq!(deliver(&cb, &passthrough()), Ok(()));
    }

    #[test]
    fn deliver_contains_errors() {
        let cb = callback(|_| Err(anyhow::anyhow!("boom")));
        assert_eq!(
            deliver(&cb, &passthrough()),
            Err(CallbackError::Failed("boom".to_string()))
        );
    }

    #[test]
    fn deliver_contains_panics() {
        let cb = callback(|_| panic!("kaboom"));
        assert_eq!(
            deliver(&cb, &passthrough()),
            Err(CallbackError::Panicked("kaboom".to_string()))
        );
    }

    #[test]
    fn status_cell_broadcasts_changes_only() {
        let (tx, mut rx) = broadcast::channel(8);
        let cell = StatusCell::new("c".into(), ConnectionStatus::Connecting, tx);

        cell.set(ConnectionStatus::Connecting);
        cell.set(ConnectionStatus::Connected);

        assert_eq!(cell.get(), ConnectionStatus::Connected);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.status, ConnectionStatus::Connected);
        assert!(rx.try_recv().is_err());
    }
}
