//! One full refresh: identify the user, sync history, rank, reconcile.
//!
//! Stages run strictly in order; each failure is reported with the stage it
//! happened in and nothing after it runs.

use chrono::NaiveDateTime;

use crate::config::Preferences;
use crate::error::{PipelineError, Stage};
use crate::history_sync::{self, SyncOutcome};
use crate::rank::{self, RankedTrack};
use crate::reconcile::{self, SyncPlan};
use crate::service::{MusicService, UserKey};
use crate::storage::HistoryStore;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Compute the plan but leave the remote offline set alone
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct RunSummary {
    pub user: UserKey,
    pub sync: SyncOutcome,
    pub history_len: usize,
    pub ranked: Vec<RankedTrack>,
    pub plan: SyncPlan,
}

pub async fn run(
    service: &dyn MusicService,
    store: &dyn HistoryStore,
    prefs: &Preferences,
    now: NaiveDateTime,
    options: &RunOptions,
) -> Result<RunSummary, PipelineError> {
    let user = service
        .current_user()
        .await
        .map_err(|e| PipelineError::new(Stage::Identify, e))?;
    tracing::info!("Signed in as {}", user);

    let (history, sync) = history_sync::sync_history(service, store, &user, prefs, now)
        .await
        .map_err(|e| PipelineError::new(Stage::Sync, e))?;

    let ranked = rank::rank_tracks(&history, prefs.max_age, now);
    tracing::info!(
        "Ranked {} tracks from {} history entries (max age {} days)",
        ranked.len(),
        history.len(),
        prefs.max_age
    );
    for track in &ranked {
        tracing::debug!("{} (score = {:.6})", track.sample.track.name, track.score);
    }

    let plan = reconcile::reconcile(service, &ranked, prefs.max_sync, options.dry_run)
        .await
        .map_err(|e| PipelineError::new(Stage::Reconcile, e))?;

    Ok(RunSummary {
        user,
        sync,
        history_len: history.len(),
        ranked,
        plan,
    })
}
