//! Persistence layer for careroute
//!
//! SQLite-backed conversation store with urgency-based expiry.

pub mod sqlite;

pub use sqlite::{ConversationDb, StoredTurn};
