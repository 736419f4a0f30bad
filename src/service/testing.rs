//! In-memory [`MusicService`] used by the pipeline tests.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{HistoryEntry, MusicService, PlayedTrack, Source, Track, UserKey};
use crate::error::RemoteError;

/// Serves a fixed remote history and keeps a mutable offline set.
///
/// History offsets count tracks, not entries, matching how the syncer
/// advances its position.
pub struct FakeService {
    user: UserKey,
    history: Mutex<Vec<HistoryEntry>>,
    offline: Mutex<Vec<Track>>,
    /// (offset, count) of every history request
    pub history_requests: Mutex<Vec<(usize, usize)>>,
    /// (keys, available) of every offline mutation
    pub offline_updates: Mutex<Vec<(Vec<String>, bool)>>,
    transient_failures: Mutex<u32>,
    reject_history: Mutex<bool>,
    reject_updates: Mutex<bool>,
}

impl FakeService {
    pub fn new(history: Vec<HistoryEntry>) -> Self {
        Self {
            user: UserKey("s1234".to_string()),
            history: Mutex::new(history),
            offline: Mutex::new(Vec::new()),
            history_requests: Mutex::new(Vec::new()),
            offline_updates: Mutex::new(Vec::new()),
            transient_failures: Mutex::new(0),
            reject_history: Mutex::new(false),
            reject_updates: Mutex::new(false),
        }
    }

    pub fn with_offline(self, keys: &[&str]) -> Self {
        *self.offline.lock().unwrap() = keys.iter().map(|k| track(k)).collect();
        self
    }

    /// Put newer entries at the head of the remote history.
    pub fn prepend_history(&self, newer: Vec<HistoryEntry>) {
        let mut history = self.history.lock().unwrap();
        let mut merged = newer;
        merged.extend(history.drain(..));
        *history = merged;
    }

    /// The next `n` calls (of any kind) fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        *self.transient_failures.lock().unwrap() = n;
    }

    pub fn reject_history(&self) {
        *self.reject_history.lock().unwrap() = true;
    }

    pub fn reject_updates(&self) {
        *self.reject_updates.lock().unwrap() = true;
    }

    pub fn offline_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.offline.lock().unwrap().iter().map(|t| t.key.clone()).collect();
        keys.sort();
        keys
    }

    pub fn history_request_count(&self) -> usize {
        self.history_requests.lock().unwrap().len()
    }

    fn maybe_fail(&self) -> Result<()> {
        let mut remaining = self.transient_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(RemoteError::Transient("connection reset".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl MusicService for FakeService {
    fn service_name(&self) -> &str {
        "fake"
    }

    async fn current_user(&self) -> Result<UserKey> {
        self.maybe_fail()?;
        Ok(self.user.clone())
    }

    async fn fetch_history_page(
        &self,
        user: &UserKey,
        offset: usize,
        count: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.maybe_fail()?;
        if *self.reject_history.lock().unwrap() {
            return Err(RemoteError::Rejected {
                status: 403,
                body: "forbidden".to_string(),
            }
            .into());
        }
        if *user != self.user {
            return Err(anyhow!("unknown user {}", user));
        }
        self.history_requests.lock().unwrap().push((offset, count));

        let history = self.history.lock().unwrap();
        let mut consumed = 0;
        let page = history
            .iter()
            .skip_while(|entry| {
                let skip = consumed < offset;
                if skip {
                    consumed += entry.tracks.len();
                }
                skip
            })
            .take(count)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn fetch_offline_tracks(&self, offset: usize, count: usize) -> Result<Vec<Track>> {
        self.maybe_fail()?;
        Ok(self
            .offline
            .lock()
            .unwrap()
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect())
    }

    async fn set_offline_availability(&self, track_keys: &[String], available: bool) -> Result<()> {
        self.maybe_fail()?;
        if *self.reject_updates.lock().unwrap() {
            return Err(RemoteError::Rejected {
                status: 400,
                body: "bad keys".to_string(),
            }
            .into());
        }
        self.offline_updates
            .lock()
            .unwrap()
            .push((track_keys.to_vec(), available));

        let mut offline = self.offline.lock().unwrap();
        if available {
            for key in track_keys {
                if !offline.iter().any(|t| &t.key == key) {
                    offline.push(track(key));
                }
            }
        } else {
            offline.retain(|t| !track_keys.contains(&t.key));
        }
        Ok(())
    }
}

pub fn track(key: &str) -> Track {
    Track {
        key: key.to_string(),
        name: format!("Song {}", key),
    }
}

/// A listening session at `time` where every track was played at `time`.
pub fn entry(time: &str, keys: &[&str]) -> HistoryEntry {
    HistoryEntry {
        time: time.to_string(),
        source: Source {
            name: format!("Session {}", time),
            key: None,
        },
        tracks: keys
            .iter()
            .map(|k| PlayedTrack {
                time: time.to_string(),
                track: track(k),
            })
            .collect(),
    }
}
