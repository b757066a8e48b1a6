//! Suspicious-stat heuristics.
//!
//! A positive check only routes a result to moderator review. It never approves or rejects.

use puosu_types::wager::MatchStats;

/// Kill/death ratio above which a single match is implausible.
pub const MAX_PLAUSIBLE_KD: f64 = 10.0;
/// Kill count above which a single match is implausible.
pub const MAX_PLAUSIBLE_KILLS: u32 = 60;
/// A score this many times the player's historical mean is a jump worth a look.
pub const SCORE_JUMP_FACTOR: i64 = 5;
/// History needed before the jump check applies.
pub const MIN_HISTORY_FOR_JUMP: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anomaly {
    KdRatio,
    KillCount,
    ScoreJump,
}

/// Returns the first anomaly found in `stats` given the player's earlier results.
pub fn find_anomaly(stats: &MatchStats, history: &[MatchStats]) -> Option<Anomaly> {
    if stats.kills > MAX_PLAUSIBLE_KILLS {
        return Some(Anomaly::KillCount);
    }
    if stats.kd_ratio() > MAX_PLAUSIBLE_KD {
        return Some(Anomaly::KdRatio);
    }
    if history.len() >= MIN_HISTORY_FOR_JUMP {
        let total: i64 = history.iter().map(|h| h.score.max(0)).sum();
        let mean = total / history.len() as i64;
        if mean > 0 && stats.score > mean.saturating_mul(SCORE_JUMP_FACTOR) {
            return Some(Anomaly::ScoreJump);
        }
    }
    None
}

pub fn is_suspicious(stats: &MatchStats, history: &[MatchStats]) -> bool {
    find_anomaly(stats, history).is_some()
}
