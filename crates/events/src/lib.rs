//! Change-feed records and the domain events they normalise into.
//!
//! ```text
//! ChangeFeed (transport) → ChangeRecord → EventNormalizer → DomainEvent → callbacks
//! ```

pub mod event;
pub mod feed;
pub mod filter;
pub mod in_memory_feed;
pub mod normalizer;
pub mod record;

pub use event::{DomainEvent, InventoryChanged, StaffChanged};
pub use feed::{ChangeFeed, ChannelSpec, FeedError, FeedMessage, Subscription};
pub use filter::RowFilter;
pub use in_memory_feed::InMemoryChangeFeed;
pub use normalizer::{EventNormalizer, Transform, INVENTORY_TABLE, STAFF_TABLE};
pub use record::{ChangeRecord, Operation};
