//! Recency-weighted ranking of cached plays.
//!
//! Every qualifying play of a track adds `1 + 2 / age_days` to its score: the
//! `1` counts the play, the second term favours recent plays.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::service::{HistoryEntry, PlayedTrack};

/// Ages below one hour are treated as one hour, which caps the recency bonus
/// of a single play at 48.
pub const MIN_AGE_DAYS: f64 = 1.0 / 24.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedTrack {
    pub key: String,
    pub score: f64,
    /// Number of plays that contributed to the score
    pub plays: usize,
    /// Most recent qualifying play, kept for display
    pub sample: PlayedTrack,
}

/// Age of a play in fractional days. Negative for plays after `now`.
pub fn age_days(played_at: NaiveDateTime, now: NaiveDateTime) -> f64 {
    (now - played_at).num_seconds() as f64 / SECONDS_PER_DAY
}

/// Score contribution of one play of the given age.
pub fn play_weight(age_days: f64) -> f64 {
    1.0 + 2.0 / age_days.max(MIN_AGE_DAYS)
}

/// Highest score first; equal scores ordered by track key.
pub fn sort_by_rank(tracks: &mut [RankedTrack]) {
    tracks.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
}

/// Score every track played within `max_age` days of `now`, sorted by rank.
pub fn rank_tracks(history: &[HistoryEntry], max_age: u32, now: NaiveDateTime) -> Vec<RankedTrack> {
    let max_age = f64::from(max_age);
    let mut by_key: HashMap<&str, RankedTrack> = HashMap::new();

    for played in history.iter().flat_map(|entry| entry.tracks.iter()) {
        let Some(played_at) = played.played_at() else {
            tracing::debug!("Error parsing track time {:?}, skipping", played.time);
            continue;
        };

        let age = age_days(played_at, now);
        if age > max_age {
            continue;
        }

        let ranked = by_key
            .entry(played.track.key.as_str())
            .or_insert_with(|| RankedTrack {
                key: played.track.key.clone(),
                score: 0.0,
                plays: 0,
                sample: played.clone(),
            });
        ranked.score += play_weight(age);
        ranked.plays += 1;
        if ranked.sample.played_at().map_or(true, |sampled| played_at > sampled) {
            ranked.sample = played.clone();
        }
    }

    let mut tracks: Vec<RankedTrack> = by_key.into_values().collect();
    sort_by_rank(&mut tracks);
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::entry;
    use crate::service::{format_history_time, parse_history_time};
    use chrono::Duration;

    fn now() -> NaiveDateTime {
        parse_history_time("2014-03-20T12:00:00").unwrap()
    }

    fn days_ago(days: i64) -> String {
        format_history_time(now() - Duration::days(days))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[test]
    fn test_worked_example() {
        let history = vec![
            entry(&days_ago(1), &["A"]),
            entry(&days_ago(10), &["A"]),
            entry(&days_ago(30), &["B"]),
        ];

        let ranked = rank_tracks(&history, 21, now());

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].key, "A");
        assert_eq!(ranked[0].plays, 2);
        assert_close(ranked[0].score, 4.2);
        // the newest play represents the track
        assert_eq!(ranked[0].sample.time, days_ago(1));
    }

    #[test]
    fn test_more_recent_play_weighs_more() {
        let ages = [0.5, 1.0, 2.0, 7.0, 21.0];
        for pair in ages.windows(2) {
            assert!(play_weight(pair[0]) > play_weight(pair[1]));
        }
        assert!(play_weight(21.0) > 1.0);
    }

    #[test]
    fn test_more_plays_score_higher() {
        let history = vec![
            entry(&days_ago(3), &["often", "once"]),
            entry(&days_ago(3), &["often"]),
        ];

        let ranked = rank_tracks(&history, 21, now());
        assert_eq!(ranked[0].key, "often");
        assert_close(ranked[0].score, 2.0 * ranked[1].score);
    }

    #[test]
    fn test_zero_and_future_ages_are_clamped() {
        assert_close(play_weight(0.0), 49.0);
        assert_close(play_weight(-3.0), 49.0);
        assert!(play_weight(0.0).is_finite());

        let history = vec![
            entry(&format_history_time(now()), &["now"]),
            entry(&format_history_time(now() + Duration::hours(2)), &["future"]),
        ];
        let ranked = rank_tracks(&history, 21, now());
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|t| (t.score - 49.0).abs() < 1e-9));
    }

    #[test]
    fn test_old_plays_never_rank() {
        let history: Vec<_> = (0..50).map(|_| entry(&days_ago(22), &["stale"])).collect();
        assert!(rank_tracks(&history, 21, now()).is_empty());

        // exactly max_age old still counts
        let edge = vec![entry(&days_ago(21), &["edge"])];
        assert_eq!(rank_tracks(&edge, 21, now()).len(), 1);
    }

    #[test]
    fn test_unparseable_plays_are_skipped() {
        let mut history = vec![entry(&days_ago(2), &["good"])];
        history[0].tracks.push(PlayedTrack {
            time: "last tuesday".to_string(),
            track: crate::service::testing::track("bad"),
        });

        let ranked = rank_tracks(&history, 21, now());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].key, "good");
    }

    #[test]
    fn test_sample_is_latest_play_within_a_session() {
        let mut session = entry(&days_ago(3), &["loop"]);
        let later = now() - Duration::days(3) + Duration::minutes(4);
        session.tracks.push(PlayedTrack {
            time: format_history_time(later),
            track: crate::service::testing::track("loop"),
        });

        let ranked = rank_tracks(&[session], 21, now());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].plays, 2);
        assert_eq!(ranked[0].sample.time, format_history_time(later));
    }

    #[test]
    fn test_ties_break_on_key() {
        let history = vec![entry(&days_ago(2), &["zeta", "alpha", "mid"])];
        let ranked = rank_tracks(&history, 21, now());

        let keys: Vec<&str> = ranked.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_age_days_uses_fractional_days() {
        let played = now() - Duration::hours(36);
        assert_close(age_days(played, now()), 1.5);
    }
}
