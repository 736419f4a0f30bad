//! History cache storage.
//!
//! - [`JsonHistoryCache`]: a single pretty-printed JSON file, rewritten atomically
//!
//! The sync stage only needs "load everything" and "replace everything", so
//! any backend that can honour [`HistoryStore`] will do.

pub mod json;

use anyhow::Result;

use crate::service::HistoryEntry;

pub use json::JsonHistoryCache;

/// Durable newest-first list of history entries.
pub trait HistoryStore: Send + Sync {
    /// Human-readable backend name (e.g., "json").
    fn backend_name(&self) -> &str;

    /// Load the cached entries, newest first.
    ///
    /// A missing or unreadable cache is not an error: it just means no
    /// history is known yet, and an empty list is returned.
    fn load(&self) -> Vec<HistoryEntry>;

    /// Replace the whole cache with `entries`.
    fn save(&self, entries: &[HistoryEntry]) -> Result<()>;
}
