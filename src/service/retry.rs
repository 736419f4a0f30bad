//! Retry with exponential backoff for transient remote failures.
//!
//! [`RetryingService`] wraps any [`MusicService`] and retries each call whose
//! error chain contains a transient [`RemoteError`](crate::error::RemoteError).
//! Everything else fails on the first attempt.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use super::{HistoryEntry, MusicService, Track, UserKey};
use crate::config::NetworkConfig;
use crate::error;

/// Retry policy implementing capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(network: &NetworkConfig) -> Self {
        Self {
            max_retries: network.max_retries,
            initial_backoff: Duration::from_millis(network.initial_backoff_ms),
            max_backoff: Duration::from_millis(network.max_backoff_ms),
            backoff_multiplier: network.backoff_multiplier,
        }
    }

    /// Delay before retry number `retry` (0-based):
    /// `initial * multiplier^retry`, capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let millis = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(retry as i32);
        let capped = millis.min(self.max_backoff.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn should_retry(&self, err: &anyhow::Error, retry: u32) -> bool {
        retry < self.max_retries && error::is_transient(err)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, retry) => {
                    let delay = self.backoff(retry);
                    tracing::warn!(
                        "{} failed ({:#}), retrying in {:?} ({}/{})",
                        what,
                        e,
                        delay,
                        retry + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&NetworkConfig::default())
    }
}

/// A [`MusicService`] whose calls are retried according to a [`RetryPolicy`].
pub struct RetryingService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: MusicService> RetryingService<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: MusicService> MusicService for RetryingService<S> {
    fn service_name(&self) -> &str {
        self.inner.service_name()
    }

    async fn current_user(&self) -> Result<UserKey> {
        self.policy.run("currentUser", || self.inner.current_user()).await
    }

    async fn fetch_history_page(
        &self,
        user: &UserKey,
        offset: usize,
        count: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.policy
            .run("getHistoryForUser", || {
                self.inner.fetch_history_page(user, offset, count)
            })
            .await
    }

    async fn fetch_offline_tracks(&self, offset: usize, count: usize) -> Result<Vec<Track>> {
        self.policy
            .run("getOfflineTracks", || self.inner.fetch_offline_tracks(offset, count))
            .await
    }

    async fn set_offline_availability(&self, track_keys: &[String], available: bool) -> Result<()> {
        self.policy
            .run("setAvailableOffline", || {
                self.inner.set_offline_availability(track_keys, available)
            })
            .await
    }
}
