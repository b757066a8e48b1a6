use serde::{Deserialize, Serialize};

use super::labels::labeled_enum;
use super::{ChallengeId, GameId, Money, UserId};

/// Payout structure of a challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    /// Winner takes the whole net pot.
    #[serde(rename = "1v1")]
    OneVsOne,
    /// Net pot split 60/30/10 between the top three placements.
    #[serde(rename = "top3")]
    Top3,
}

labeled_enum!(ChallengeType, "challenge type", {
    OneVsOne => "1v1",
    Top3 => "top3",
});

/// Challenge lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Open,
    #[serde(alias = "in_progress")]
    Active,
    Completed,
    Cancelled,
}

labeled_enum!(ChallengeStatus, "challenge status", {
    Open => "open",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl ChallengeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Legal single-step transitions.
    pub fn can_transition_to(self, next: ChallengeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Active)
                | (Self::Open, Self::Cancelled)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Cancelled)
        )
    }
}

/// A single wagering unit between a small set of players on one match outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub creator_id: UserId,
    pub game_id: GameId,
    pub challenge_type: ChallengeType,
    pub stake: Money,
    pub max_participants: u32,
    pub status: ChallengeStatus,
    pub total_pot: Money,
    pub lobby_id: String,
    pub winner_id: Option<UserId>,
    /// Set exactly once by `secure_settle_challenge`.
    pub settled: bool,
    /// Created by the market simulation rather than a user.
    pub is_simulation: bool,
    pub created_at_ms: u64,
    pub start_at_ms: Option<u64>,
    pub end_at_ms: Option<u64>,
}

impl Challenge {
    pub fn new(
        creator_id: UserId,
        game_id: GameId,
        challenge_type: ChallengeType,
        stake: Money,
        max_participants: u32,
        created_at_ms: u64,
    ) -> Self {
        let id = uuid::Uuid::new_v4();
        Self {
            id,
            creator_id,
            game_id,
            challenge_type,
            stake,
            max_participants,
            status: ChallengeStatus::Open,
            total_pot: Money::ZERO,
            lobby_id: format!("lobby-{}", id.simple()),
            winner_id: None,
            settled: false,
            is_simulation: false,
            created_at_ms,
            start_at_ms: None,
            end_at_ms: None,
        }
    }
}

/// Fields written alongside a status transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChallengeUpdate {
    pub winner_id: Option<UserId>,
    pub start_at_ms: Option<u64>,
    pub end_at_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeParticipant {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub stake_paid: Money,
    pub joined_at_ms: u64,
}

/// Raw per-player performance numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchStats {
    pub score: i64,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

impl MatchStats {
    /// Kill/death ratio with deaths floored at one.
    pub fn kd_ratio(&self) -> f64 {
        self.kills as f64 / self.deaths.max(1) as f64
    }
}

/// Review state of a submitted result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    /// Awaiting automatic verification.
    Pending,
    /// Routed to moderator review by the anomaly check.
    Flagged,
    Verified,
    Rejected,
}

labeled_enum!(ProofStatus, "proof status", {
    Pending => "pending",
    Flagged => "flagged",
    Verified => "verified",
    Rejected => "rejected",
});

impl ProofStatus {
    /// Flagged and rejected proofs need a human before money can move.
    pub fn blocks_settlement(self) -> bool {
        matches!(self, Self::Flagged | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    /// 1 is first place.
    pub placement: u32,
    pub stats: MatchStats,
    pub proof_url: Option<String>,
    pub status: ProofStatus,
    pub submitted_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub active: bool,
}
