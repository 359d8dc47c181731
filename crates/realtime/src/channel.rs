use std::fmt;

use serde::Serialize;
use shelf_events::RowFilter;

/// Lifecycle of one live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Open requested, not yet confirmed.
    Connecting,
    Connected,
    /// Transport dropped; backoff in progress.
    Reconnecting,
    /// Gave up after the retry budget.
    Disconnected,
}

impl ConnectionStatus {
    /// A live channel blocks another subscribe under the same name.
    pub fn is_live(&self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast whenever a channel changes status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatusEvent {
    pub channel: String,
    pub status: ConnectionStatus,
}

/// `{domain}-{scope}-{purpose}`, e.g. `tenant-42-inventory`.
pub fn channel_name(domain: &str, scope: impl fmt::Display, purpose: &str) -> String {
    format!("{domain}-{scope}-{purpose}")
}

/// Name of a tenant-scoped channel.
pub fn tenant_channel(tenant_id: impl fmt::Display, purpose: &str) -> String {
    channel_name("tenant", tenant_id, purpose)
}

/// Row filter restricting a channel to one tenant's rows.
pub fn tenant_filter(column: &str, tenant_id: impl fmt::Display) -> String {
    RowFilter::eq(column, tenant_id).to_string()
}
