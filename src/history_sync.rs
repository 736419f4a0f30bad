//! Incremental history cache update.
//!
//! Pages backwards through the remote history until it reaches an entry the
//! cache already has, then merges, re-sorts and rewrites the cache.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use std::cmp::Reverse;

use crate::config::Preferences;
use crate::service::{format_history_time, HistoryEntry, MusicService, UserKey};
use crate::storage::HistoryStore;

/// Entries requested per history call.
pub const PAGE_SIZE: usize = 10;

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Hit an entry at or before the newest cached timestamp.
    ReachedCachedHistory,
    /// Scanned more than `max_history` tracks.
    HistoryLimit,
    /// The service returned a short page.
    EndOfHistory,
    /// A full page moved the offset by zero tracks.
    NoProgress,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// New entries merged into the cache
    pub added: usize,
    /// Entries skipped because their time could not be parsed
    pub skipped: usize,
    /// Entries dropped by cache pruning
    pub pruned: usize,
    pub pages: usize,
    pub stop_reason: StopReason,
}

/// Newest cached timestamp, or 1970-01-01T00:00:00 when nothing usable is cached.
pub fn cutoff(cache: &[HistoryEntry]) -> NaiveDateTime {
    cache
        .first()
        .and_then(HistoryEntry::started_at)
        .unwrap_or_default()
}

/// Stable sort, newest first. Entries without a usable time go last.
pub fn sort_newest_first(entries: &mut [HistoryEntry]) {
    entries.sort_by_cached_key(|e| Reverse(e.started_at()));
}

/// Drop entries older than `max_age_days`, always keeping the newest one so the
/// next sync still has a cutoff. Returns how many were removed.
///
/// A `max_age_days` reaching past the representable date range prunes nothing.
pub fn prune_older_than(entries: &mut Vec<HistoryEntry>, max_age_days: u32, now: NaiveDateTime) -> usize {
    let Some(threshold) = Duration::try_days(i64::from(max_age_days))
        .and_then(|max_age| now.checked_sub_signed(max_age))
    else {
        return 0;
    };
    let before = entries.len();
    let mut index = 0;
    entries.retain(|entry| {
        let keep = index == 0 || entry.started_at().map_or(true, |t| t >= threshold);
        index += 1;
        keep
    });
    before - entries.len()
}

/// Bring the cache up to date with the remote history and persist it.
///
/// On a fetch error nothing is written, so the previous cache survives.
pub async fn sync_history(
    service: &dyn MusicService,
    store: &dyn HistoryStore,
    user: &UserKey,
    prefs: &Preferences,
    now: NaiveDateTime,
) -> Result<(Vec<HistoryEntry>, SyncOutcome)> {
    let cache = store.load();
    let cutoff = cutoff(&cache);
    tracing::info!(
        "Syncing history for {} from {} (cache: {} entries, newest {})",
        user,
        service.service_name(),
        cache.len(),
        format_history_time(cutoff)
    );

    let mut fresh: Vec<HistoryEntry> = Vec::new();
    let mut position = 0;
    let mut pages = 0;
    let mut skipped = 0;

    let stop_reason = 'fetch: loop {
        tracing::info!("Requesting items {}-{}", position, position + PAGE_SIZE - 1);
        let page = service
            .fetch_history_page(user, position, PAGE_SIZE)
            .await
            .with_context(|| format!("Could not get history at offset {}", position))?;
        pages += 1;

        let page_len = page.len();
        let page_start = position;

        for entry in page {
            let Some(time) = entry.started_at() else {
                tracing::warn!(
                    "Skipping history entry with unparseable time {:?} ({})",
                    entry.time,
                    entry.source.name
                );
                skipped += 1;
                // Still counts as scanned, otherwise the next page would overlap.
                position += entry.tracks.len();
                continue;
            };

            if time <= cutoff {
                tracing::info!("Already seen this data, finished updating the cache");
                break 'fetch StopReason::ReachedCachedHistory;
            }

            tracing::debug!("Adding {} from {}", entry.source.name, entry.time);
            position += entry.tracks.len();
            fresh.push(entry);
        }

        if position > prefs.max_history {
            tracing::info!("Scanned {} tracks, history limit reached", position);
            break StopReason::HistoryLimit;
        }
        if page_len < PAGE_SIZE {
            break StopReason::EndOfHistory;
        }
        if position == page_start {
            tracing::warn!("History page at offset {} made no progress, stopping", position);
            break StopReason::NoProgress;
        }
    };

    let added = fresh.len();
    let mut merged = fresh;
    merged.extend(cache);
    sort_newest_first(&mut merged);

    let pruned = if prefs.prune_cache {
        prune_older_than(&mut merged, prefs.max_age, now)
    } else {
        0
    };
    if pruned > 0 {
        tracing::info!("Pruned {} cached entries older than {} days", pruned, prefs.max_age);
    }

    store
        .save(&merged)
        .with_context(|| format!("Could not write {} history cache", store.backend_name()))?;

    Ok((
        merged,
        SyncOutcome {
            added,
            skipped,
            pruned,
            pages,
            stop_reason,
        },
    ))
}
