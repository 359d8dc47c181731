//! `shelf-realtime`: live channels scoped to the active library.
//!
//! **Responsibility:** keep at most one live channel per name, turn raw feed
//! records into [`DomainEvent`](shelf_events::DomainEvent)s, isolate consumer
//! failures, and reconnect with bounded backoff.

pub mod channel;
pub mod dispatch;
pub mod manager;
pub mod retry;

pub use channel::{ChannelStatusEvent, ConnectionStatus, channel_name, tenant_channel, tenant_filter};
pub use dispatch::{CallbackError, EventCallback, callback};
pub use manager::{SubscribeOutcome, SubscriptionManager, ALREADY_EXISTS};
pub use retry::RetryPolicy;
