//! Converge the remote offline set onto the top of the ranking.

use anyhow::{Context, Result};
use std::collections::HashSet;

use crate::rank::RankedTrack;
use crate::service::{MusicService, Track};

/// Offline tracks requested per call.
pub const OFFLINE_PAGE_SIZE: usize = 1000;

/// What reconciliation will do to the remote offline set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Desired offline tracks in rank order; all are marked available.
    pub keep: Vec<String>,
    /// Desired tracks that are not offline yet.
    pub added: Vec<String>,
    /// Offline tracks that fell out of the top `max_sync`.
    pub remove: Vec<String>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.remove.is_empty()
    }
}

/// Work out the batches that make the offline set equal to the first
/// `max_sync` ranked tracks.
pub fn plan_sync(ranked: &[RankedTrack], currently_offline: &[Track], max_sync: usize) -> SyncPlan {
    let keep: Vec<String> = ranked.iter().take(max_sync).map(|t| t.key.clone()).collect();
    let desired: HashSet<&str> = keep.iter().map(String::as_str).collect();
    let offline: HashSet<&str> = currently_offline.iter().map(|t| t.key.as_str()).collect();

    let added = keep
        .iter()
        .filter(|key| !offline.contains(key.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let remove = currently_offline
        .iter()
        .map(|t| t.key.as_str())
        .filter(|key| !desired.contains(key) && seen.insert(*key))
        .map(str::to_string)
        .collect();

    SyncPlan { keep, added, remove }
}

/// Read the whole offline set, one page at a time until a short page.
async fn fetch_offline_set(service: &dyn MusicService) -> Result<Vec<Track>> {
    let mut tracks: Vec<Track> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        let offset = tracks.len();
        let page = service
            .fetch_offline_tracks(offset, OFFLINE_PAGE_SIZE)
            .await
            .with_context(|| format!("Could not get offline tracks at offset {}", offset))?;
        let page_len = page.len();

        let mut fresh = 0;
        for track in page {
            if seen.insert(track.key.clone()) {
                fresh += 1;
            }
            tracks.push(track);
        }

        if page_len < OFFLINE_PAGE_SIZE {
            break;
        }
        if fresh == 0 {
            tracing::warn!("Offline page at offset {} repeated known tracks, stopping", offset);
            break;
        }
    }
    Ok(tracks)
}

/// Fetch the offline set, plan, and (unless `dry_run`) apply the plan.
pub async fn reconcile(
    service: &dyn MusicService,
    ranked: &[RankedTrack],
    max_sync: usize,
    dry_run: bool,
) -> Result<SyncPlan> {
    let currently_offline = fetch_offline_set(service).await?;
    tracing::info!("{} synced tracks", currently_offline.len());

    let plan = plan_sync(ranked, &currently_offline, max_sync);

    for track in ranked.iter().take(max_sync) {
        tracing::debug!("Need to sync {}", track.sample.track.name);
    }
    for track in currently_offline.iter().filter(|t| plan.remove.contains(&t.key)) {
        tracing::info!("Need to unsync {}", track.name);
    }

    if dry_run {
        tracing::info!(
            "Dry run: would sync {} tracks ({} new) and unsync {}",
            plan.keep.len(),
            plan.added.len(),
            plan.remove.len()
        );
        return Ok(plan);
    }

    if !plan.keep.is_empty() {
        tracing::info!("Syncing {} tracks ({} new)", plan.keep.len(), plan.added.len());
        service
            .set_offline_availability(&plan.keep, true)
            .await
            .context("Could not mark tracks available offline")?;
    }

    if !plan.remove.is_empty() {
        tracing::info!("Unsyncing {} tracks", plan.remove.len());
        service
            .set_offline_availability(&plan.remove, false)
            .await
            .context("Could not remove tracks from offline")?;
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::sort_by_rank;
    use crate::service::testing::{track, FakeService};
    use crate::service::PlayedTrack;

    fn ranked(entries: &[(&str, f64)]) -> Vec<RankedTrack> {
        let mut tracks: Vec<RankedTrack> = entries
            .iter()
            .map(|(key, score)| RankedTrack {
                key: key.to_string(),
                score: *score,
                plays: 1,
                sample: PlayedTrack {
                    time: "2014-03-20T12:00:00".to_string(),
                    track: track(key),
                },
            })
            .collect();
        sort_by_rank(&mut tracks);
        tracks
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_plan_worked_example() {
        let plan = plan_sync(&ranked(&[("A", 4.2), ("C", 2.0)]), &[track("C"), track("D")], 1);

        assert_eq!(plan.keep, keys(&["A"]));
        assert_eq!(plan.added, keys(&["A"]));
        assert_eq!(plan.remove, keys(&["C", "D"]));
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_plan_already_converged_is_noop() {
        let plan = plan_sync(&ranked(&[("A", 3.0), ("B", 2.0)]), &[track("B"), track("A")], 5);
        assert!(plan.is_noop());
        assert_eq!(plan.keep, keys(&["A", "B"]));
    }

    #[test]
    fn test_plan_dedups_removals() {
        let plan = plan_sync(&[], &[track("X"), track("X"), track("Y")], 10);
        assert!(plan.keep.is_empty());
        assert_eq!(plan.remove, keys(&["X", "Y"]));
    }

    #[tokio::test]
    async fn test_reconcile_worked_example() {
        let service = FakeService::new(Vec::new()).with_offline(&["C", "D"]);

        reconcile(&service, &ranked(&[("A", 4.2), ("C", 2.0)]), 1, false)
            .await
            .unwrap();

        assert_eq!(
            *service.offline_updates.lock().unwrap(),
            vec![(keys(&["A"]), true), (keys(&["C", "D"]), false)]
        );
        assert_eq!(service.offline_keys(), keys(&["A"]));
    }

    #[tokio::test]
    async fn test_offline_set_converges_to_top_n() {
        let ranking = ranked(&[("t1", 9.0), ("t2", 7.5), ("t3", 7.5), ("t4", 3.0), ("t5", 1.1)]);

        for max_sync in [0, 1, 3, 5, 10] {
            let service = FakeService::new(Vec::new()).with_offline(&["t5", "old1", "t2", "old2"]);
            reconcile(&service, &ranking, max_sync, false).await.unwrap();

            let mut expected: Vec<String> = ranking.iter().take(max_sync).map(|t| t.key.clone()).collect();
            expected.sort();
            assert_eq!(service.offline_keys(), expected, "max_sync = {max_sync}");
        }
    }

    #[tokio::test]
    async fn test_empty_batches_are_not_sent() {
        let service = FakeService::new(Vec::new()).with_offline(&["A"]);
        reconcile(&service, &ranked(&[("A", 1.5)]), 10, false).await.unwrap();

        assert_eq!(*service.offline_updates.lock().unwrap(), vec![(keys(&["A"]), true)]);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let service = FakeService::new(Vec::new()).with_offline(&["C", "D"]);

        let plan = reconcile(&service, &ranked(&[("A", 4.2)]), 1, true).await.unwrap();

        assert_eq!(plan.remove, keys(&["C", "D"]));
        assert!(service.offline_updates.lock().unwrap().is_empty());
        assert_eq!(service.offline_keys(), keys(&["C", "D"]));
    }

    #[tokio::test]
    async fn test_offline_set_larger_than_one_page() {
        let extra: Vec<String> = (0..OFFLINE_PAGE_SIZE + 5).map(|i| format!("x{}", i)).collect();
        let mut offline: Vec<&str> = extra.iter().map(String::as_str).collect();
        offline.push("A");
        let service = FakeService::new(Vec::new()).with_offline(&offline);

        let plan = reconcile(&service, &ranked(&[("A", 4.2)]), 1, false).await.unwrap();

        assert_eq!(plan.remove.len(), OFFLINE_PAGE_SIZE + 5);
        assert!(plan.added.is_empty());
        assert_eq!(service.offline_keys(), keys(&["A"]));
    }

    #[tokio::test]
    async fn test_rejected_batch_is_an_error() {
        let service = FakeService::new(Vec::new()).with_offline(&["C"]);
        service.reject_updates();

        let result = reconcile(&service, &ranked(&[("A", 4.2)]), 1, false).await;
        assert!(result.is_err());
    }
}
