pub mod rdio;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used by the history API: second precision, no offset.
pub const HISTORY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a history timestamp as a naive local time.
pub fn parse_history_time(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, HISTORY_TIME_FORMAT)
}

pub fn format_history_time(time: NaiveDateTime) -> String {
    time.format(HISTORY_TIME_FORMAT).to_string()
}

/// A track reference as the service names it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    /// Stable service key (e.g. "t1234")
    pub key: String,
    pub name: String,
}

/// Where a listening session came from (an album, playlist, station...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// One play of a track inside a listening session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedTrack {
    pub time: String,
    pub track: Track,
}

impl PlayedTrack {
    pub fn played_at(&self) -> Option<NaiveDateTime> {
        parse_history_time(&self.time).ok()
    }
}

/// One listening session returned by the history API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub tracks: Vec<PlayedTrack>,
}

impl HistoryEntry {
    pub fn started_at(&self) -> Option<NaiveDateTime> {
        parse_history_time(&self.time).ok()
    }
}

/// Key of the authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKey(pub String);

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote music service, as far as offline rotation is concerned.
///
/// Every stage takes the service as a parameter; there is no shared client.
/// Errors that are worth retrying should carry a
/// [`RemoteError::Transient`](crate::error::RemoteError::Transient) so the
/// retry layer can recognise them.
#[async_trait]
pub trait MusicService: Send + Sync {
    /// Human-readable service name for logs
    fn service_name(&self) -> &str;

    /// Resolve the user the credentials belong to
    async fn current_user(&self) -> Result<UserKey>;

    /// Fetch `count` history entries starting at `offset`, newest first
    async fn fetch_history_page(
        &self,
        user: &UserKey,
        offset: usize,
        count: usize,
    ) -> Result<Vec<HistoryEntry>>;

    /// Fetch tracks currently marked available offline
    async fn fetch_offline_tracks(&self, offset: usize, count: usize) -> Result<Vec<Track>>;

    /// Mark a batch of tracks as available (or not) offline
    async fn set_offline_availability(&self, track_keys: &[String], available: bool) -> Result<()>;
}

pub use rdio::RdioClient;
pub use retry::{RetryPolicy, RetryingService};
