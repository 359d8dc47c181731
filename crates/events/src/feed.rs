//! Change-feed collaborator contract (transport only).
//!
//! A feed opens named channels, each scoped server-side by a row filter, and
//! pushes [`FeedMessage`]s into the returned [`Subscription`]. The feed is the
//! tenant-isolation boundary: this layer passes the filter and trusts the
//! transport to enforce it.
//!
//! Transport loss is reported either as an explicit
//! [`FeedMessage::Disconnected`] or by the subscription ending (`recv` returns
//! `None`). Consumers treat both the same.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ChangeRecord;

/// What to open: a named channel on one table, scoped by a filter.
///
/// `instance` tells apart successive channels that reuse a name; the feed keys
/// open channels on `(name, instance)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub table: String,
    pub filter: String,
    pub instance: u64,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, table: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            filter: filter.into(),
            instance: 0,
        }
    }

    pub fn with_instance(mut self, instance: u64) -> Self {
        self.instance = instance;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(ChangeRecord),
    Disconnected { reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("failed to open channel '{channel}': {reason}")]
    Open { channel: String, reason: String },

    #[error("change feed is unavailable")]
    Unavailable,
}

/// Receiving half of an open channel.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<FeedMessage>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<FeedMessage>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message; `None` once the transport side is gone.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<FeedMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a channel. A second open of the same `(name, instance)` replaces
    /// the first; other instances of the name are left alone.
    async fn open(&self, spec: &ChannelSpec) -> Result<Subscription, FeedError>;

    /// Close the channel opened for `spec`. Closing an unknown channel is a no-op.
    async fn close(&self, spec: &ChannelSpec);
}

#[async_trait]
impl<F> ChangeFeed for Arc<F>
where
    F: ChangeFeed + ?Sized,
{
    async fn open(&self, spec: &ChannelSpec) -> Result<Subscription, FeedError> {
        (**self).open(spec).await
    }

    async fn close(&self, spec: &ChannelSpec) {
        (**self).close(spec).await
    }
}
