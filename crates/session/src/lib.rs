//! `shelf-session`: tenant context for signed-in library staff.
//!
//! Resolves which library a user is acting in, derives their role there,
//! remembers the choice per user, and keeps live channels bound to exactly
//! that library.

pub mod config;
pub mod context;
pub mod error;
pub mod resolver;
pub mod selection;
pub mod state;

pub use config::{ReconnectConfig, ShelfConfig};
pub use context::{ChannelTemplate, TenantContext, TenantContextBuilder};
pub use error::ContextError;
pub use resolver::{AccessDecision, AccessResolver};
pub use selection::{PersistedSelection, SelectionError, SelectionStore, selection_key};
pub use state::{ContextState, ContextStatus};
