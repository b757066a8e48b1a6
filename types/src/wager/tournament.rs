use serde::{Deserialize, Serialize};

use super::labels::labeled_enum;
use super::{GameId, MatchId, Money, TournamentId, UserId};

/// Tournament lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Created, registration window not yet open.
    Upcoming,
    RegistrationOpen,
    Ongoing,
    Completed,
    Cancelled,
}

labeled_enum!(TournamentStatus, "tournament status", {
    Upcoming => "upcoming",
    RegistrationOpen => "registration_open",
    Ongoing => "ongoing",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl TournamentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Legal single-step transitions. Every non-terminal state may be cancelled.
    pub fn can_transition_to(self, next: TournamentStatus) -> bool {
        match (self, next) {
            (Self::Upcoming, Self::RegistrationOpen) => true,
            (Self::RegistrationOpen, Self::Ongoing) => true,
            (Self::Ongoing, Self::Completed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub game_id: GameId,
    pub entry_fee: Money,
    pub max_participants: u32,
    pub current_participants: u32,
    /// Escrowed entry fees.
    pub prize_pool: Money,
    pub status: TournamentStatus,
    pub registration_start_ms: u64,
    pub registration_end_ms: u64,
    pub tournament_start_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    /// Whether scheduled sweeps may advance this tournament.
    pub automation_enabled: bool,
    pub winner_id: Option<UserId>,
    pub settled: bool,
    pub created_at_ms: u64,
}

impl Tournament {
    pub fn new(
        name: impl Into<String>,
        game_id: GameId,
        entry_fee: Money,
        max_participants: u32,
        registration_start_ms: u64,
        registration_end_ms: u64,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            game_id,
            entry_fee,
            max_participants,
            current_participants: 0,
            prize_pool: Money::ZERO,
            status: TournamentStatus::Upcoming,
            registration_start_ms,
            registration_end_ms,
            tournament_start_ms: registration_end_ms,
            started_at_ms: None,
            completed_at_ms: None,
            automation_enabled: true,
            winner_id: None,
            settled: false,
            created_at_ms,
        }
    }

    /// Time the tournament went terminal, if it did.
    pub fn closed_at_ms(&self) -> Option<u64> {
        if self.status.is_terminal() {
            self.completed_at_ms
        } else {
            None
        }
    }
}

/// Fields written alongside a tournament status transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TournamentUpdate {
    pub winner_id: Option<UserId>,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentParticipant {
    pub tournament_id: TournamentId,
    pub user_id: UserId,
    pub entry_fee_paid: Money,
    pub registered_at_ms: u64,
    /// Final standing, 1 is the winner.
    pub placement: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

labeled_enum!(MatchStatus, "match status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

/// One bracket pairing. `player_b` is `None` for a bye.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentMatch {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub round: u32,
    pub slot: u32,
    pub player_a: UserId,
    pub player_b: Option<UserId>,
    pub status: MatchStatus,
    pub winner_id: Option<UserId>,
}

/// How an emergency stop returns escrowed entry fees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    /// Every participant gets the full entry fee back.
    #[default]
    Full,
    /// Entry fee minus the standard platform fee, which the platform account keeps.
    Partial,
}

labeled_enum!(RefundType, "refund type", {
    Full => "full",
    Partial => "partial",
});
