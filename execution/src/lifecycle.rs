//! Challenge and tournament lifecycle.
//!
//! Transitions are compare-and-set on the prior status and re-entrant: asking for the state a unit
//! is already in is a no-op. [`TournamentScheduler`] decides what a sweep should do to a
//! tournament without touching storage, in the same way the settlement math is kept pure.

use crate::error::{ExecutionError, ExecutionResult};
use crate::store::Datastore;
use puosu_types::wager::{
    Challenge, ChallengeStatus, ChallengeUpdate, Tournament, TournamentStatus, TournamentUpdate,
    MAX_ACTIVE_DURATION_MS, MIN_CHALLENGE_PARTICIPANTS, MIN_TOURNAMENT_PARTICIPANTS,
};
use puosu_types::{ChallengeId, LedgerError};
use tracing::{debug, info};

/// Outcome of a lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The unit was already in the target state.
    AlreadyThere,
}

impl Transition {
    pub fn applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub async fn transition_challenge<S: Datastore>(
    store: &S,
    challenge: &Challenge,
    to: ChallengeStatus,
    update: ChallengeUpdate,
) -> ExecutionResult<Transition> {
    let from = challenge.status;
    if from == to {
        return Ok(Transition::AlreadyThere);
    }
    if !from.can_transition_to(to) {
        return Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    if store
        .transition_challenge(challenge.id, from, to, update)
        .await?
    {
        debug!(challenge = %challenge.id, %from, %to, "challenge transitioned");
        return Ok(Transition::Applied);
    }

    // Lost the race; fine if the winner moved it where we wanted.
    let current = store
        .challenge(challenge.id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;
    if current.status == to {
        Ok(Transition::AlreadyThere)
    } else {
        Err(ExecutionError::Conflict(format!(
            "challenge {} moved from {from} to {} concurrently",
            challenge.id, current.status
        )))
    }
}

pub async fn transition_tournament<S: Datastore>(
    store: &S,
    tournament: &Tournament,
    to: TournamentStatus,
    update: TournamentUpdate,
) -> ExecutionResult<Transition> {
    let from = tournament.status;
    if from == to {
        return Ok(Transition::AlreadyThere);
    }
    if !from.can_transition_to(to) {
        return Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    if store
        .transition_tournament(tournament.id, from, to, update)
        .await?
    {
        debug!(tournament = %tournament.id, %from, %to, "tournament transitioned");
        return Ok(Transition::Applied);
    }

    let current = store
        .tournament(tournament.id)
        .await?
        .ok_or(LedgerError::NotFound("tournament"))?;
    if current.status == to {
        Ok(Transition::AlreadyThere)
    } else {
        Err(ExecutionError::Conflict(format!(
            "tournament {} moved from {from} to {} concurrently",
            tournament.id, current.status
        )))
    }
}

/// Moves an open challenge to `active` once it has at least two participants.
pub async fn start_challenge<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
    now_ms: u64,
) -> ExecutionResult<Transition> {
    let challenge = store
        .challenge(challenge_id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;
    if challenge.status == ChallengeStatus::Active {
        return Ok(Transition::AlreadyThere);
    }
    let participants = store.challenge_participants(challenge_id).await?;
    if participants.len() < MIN_CHALLENGE_PARTICIPANTS {
        return Err(ExecutionError::InvalidTransition {
            from: challenge.status.to_string(),
            to: format!(
                "{} (needs {MIN_CHALLENGE_PARTICIPANTS} participants, has {})",
                ChallengeStatus::Active,
                participants.len()
            ),
        });
    }
    let transition = transition_challenge(
        store,
        &challenge,
        ChallengeStatus::Active,
        ChallengeUpdate {
            start_at_ms: Some(now_ms),
            ..ChallengeUpdate::default()
        },
    )
    .await?;
    if transition.applied() {
        info!(challenge = %challenge_id, participants = participants.len(), "challenge started");
    }
    Ok(transition)
}

/// When a challenge became active, falling back to its creation time.
pub fn challenge_active_since(challenge: &Challenge) -> u64 {
    challenge.start_at_ms.unwrap_or(challenge.created_at_ms)
}

/// Whether an active challenge has overstayed `max_active_ms`.
pub fn is_stuck_challenge(challenge: &Challenge, now_ms: u64, max_active_ms: u64) -> bool {
    challenge.status == ChallengeStatus::Active
        && now_ms.saturating_sub(challenge_active_since(challenge)) >= max_active_ms
}

/// What a sweep should do with a tournament right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TournamentAction {
    OpenRegistration,
    Start,
    /// Registration closed below quorum.
    CancelForQuorum,
    ForceComplete,
    Wait,
}

/// Timing rules for automated tournaments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TournamentScheduler {
    pub max_active_ms: u64,
    pub min_participants: usize,
}

impl Default for TournamentScheduler {
    fn default() -> Self {
        Self {
            max_active_ms: MAX_ACTIVE_DURATION_MS,
            min_participants: MIN_TOURNAMENT_PARTICIPANTS,
        }
    }
}

impl TournamentScheduler {
    pub fn new(max_active_ms: u64) -> Self {
        Self {
            max_active_ms,
            ..Self::default()
        }
    }

    /// Decides the due action given the current registrant count.
    pub fn due_action(&self, tournament: &Tournament, registrants: usize, now_ms: u64) -> TournamentAction {
        if self.is_stuck(tournament, now_ms) {
            return TournamentAction::ForceComplete;
        }
        // Manual tournaments still get the stuck net; only the registration phases are skipped.
        if !tournament.automation_enabled {
            return TournamentAction::Wait;
        }
        match tournament.status {
            TournamentStatus::Upcoming if now_ms >= tournament.registration_start_ms => {
                // A sweep that missed the whole window opens now and handles the close next run.
                TournamentAction::OpenRegistration
            }
            TournamentStatus::RegistrationOpen if now_ms >= tournament.registration_end_ms => {
                if registrants >= self.min_participants {
                    TournamentAction::Start
                } else {
                    TournamentAction::CancelForQuorum
                }
            }
            _ => TournamentAction::Wait,
        }
    }

    pub fn is_stuck(&self, tournament: &Tournament, now_ms: u64) -> bool {
        let since = tournament
            .started_at_ms
            .unwrap_or(tournament.tournament_start_ms);
        tournament.status == TournamentStatus::Ongoing
            && now_ms.saturating_sub(since) >= self.max_active_ms
    }
}
