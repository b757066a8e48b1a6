//! Wagering domain types.
//!
//! Defines wallet/challenge/tournament/dispute/audit records and constants used by the execution
//! layer, the server and clients.

mod audit;
mod challenge;
mod constants;
mod dispute;
mod error;
mod labels;
mod money;
mod tournament;
mod wallet;

pub use audit::*;
pub use challenge::*;
pub use constants::*;
pub use dispute::*;
pub use error::*;
pub use labels::ParseLabelError;
pub use money::*;
pub use tournament::*;
pub use wallet::*;

use std::time::{SystemTime, UNIX_EPOCH};

pub type UserId = uuid::Uuid;
pub type ChallengeId = uuid::Uuid;
pub type TournamentId = uuid::Uuid;
pub type MatchId = uuid::Uuid;
pub type DisputeId = uuid::Uuid;
pub type GameId = uuid::Uuid;

/// Wall-clock milliseconds since the Unix epoch.
///
/// Execution code never calls this directly; callers pass `now_ms` in so that sweeps are
/// reproducible in tests.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
