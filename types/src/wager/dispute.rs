use serde::{Deserialize, Serialize};

use super::labels::labeled_enum;
use super::{ChallengeId, DisputeId, TournamentId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    Result,
    Payment,
    Cheating,
    Other,
}

labeled_enum!(DisputeType, "dispute type", {
    Result => "result",
    Payment => "payment",
    Cheating => "cheating",
    Other => "other",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Pending,
    Resolved,
    Dismissed,
}

labeled_enum!(DisputeStatus, "dispute status", {
    Pending => "pending",
    Resolved => "resolved",
    Dismissed => "dismissed",
});

/// User-raised contention about a wagering outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub raised_by: UserId,
    pub dispute_type: DisputeType,
    pub status: DisputeStatus,
    pub evidence_urls: Vec<String>,
    pub challenge_id: Option<ChallengeId>,
    pub tournament_id: Option<TournamentId>,
    pub description: String,
    pub created_at_ms: u64,
    pub resolved_at_ms: Option<u64>,
    pub resolution: Option<String>,
}

impl Dispute {
    pub fn new(
        raised_by: UserId,
        dispute_type: DisputeType,
        description: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            raised_by,
            dispute_type,
            status: DisputeStatus::Pending,
            evidence_urls: Vec::new(),
            challenge_id: None,
            tournament_id: None,
            description: description.into(),
            created_at_ms,
            resolved_at_ms: None,
            resolution: None,
        }
    }

    pub fn has_evidence(&self) -> bool {
        self.evidence_urls.iter().any(|url| !url.trim().is_empty())
    }
}
