//! rusty-forum/crates/rf-core/src/lib.rs
//!
//! Domain models, port traits and the client-side logic of Rusty-Forum:
//! vote aggregation, live list reconciliation, contexts and moderation.

pub mod admin;
pub mod context;
pub mod error;
pub mod forum;
pub mod models;
pub mod realtime;
pub mod traits;
pub mod validation;
pub mod votes;

// Re-exporting for easier access in other crates
pub use admin::{AdminPanel, AdminRow, AdminTab, AdminTable, Column};
pub use context::{Preferences, SessionContext, SettingsContext, Theme};
pub use error::*;
pub use forum::ForumService;
pub use models::*;
pub use realtime::{ChangeEvent, ChangeFilter, ChangeKind, LiveView, Subscription, Table, ViewGuard};
pub use traits::*;
pub use votes::{VoteAggregator, VoteRegistry, VoteTally};
