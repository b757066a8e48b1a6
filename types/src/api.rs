//! Request and response schemas of the automation entry points.
//!
//! Every request type rejects unknown fields so a malformed body surfaces as `InvalidRequest`
//! at the boundary instead of flowing through with missing values. Field names are camelCase on
//! the wire.

use serde::{Deserialize, Serialize};

use crate::wager::{
    ChallengeId, ChallengeStatus, ChallengeType, DisputeId, DisputeStatus, GameId, MatchStats,
    Money, ProofStatus, RefundType, TournamentId, TournamentStatus, UserId,
};

/// Body of the plain sweep endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SweepRequest {
    #[serde(default)]
    pub manual: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WalletPayoutsRequest {
    #[serde(default)]
    pub manual: bool,
    /// Settle only this challenge instead of sweeping.
    #[serde(default)]
    pub challenge_id: Option<ChallengeId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DistributePrizesRequest {
    pub tournament_id: TournamentId,
    #[serde(default)]
    pub manual: bool,
    /// Final standings to record before paying out. Empty means use the stored placements.
    #[serde(default)]
    pub placements: Vec<Placement>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Placement {
    pub user_id: UserId,
    pub placement: u32,
}

/// Emergency stop targets exactly one unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmergencyStopRequest {
    #[serde(default)]
    pub tournament_id: Option<TournamentId>,
    #[serde(default)]
    pub challenge_id: Option<ChallengeId>,
    pub reason: String,
    #[serde(default)]
    pub refund_type: RefundType,
}

/// Overrides for one market-simulation run; unset fields fall back to server config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SimRunnerRequest {
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub participants: Option<u32>,
    #[serde(default)]
    pub stake: Option<Money>,
    #[serde(default)]
    pub challenge_type: Option<ChallengeType>,
    #[serde(default)]
    pub crash_probability: Option<f64>,
    #[serde(default)]
    pub match_duration_ms: Option<u64>,
}

/// Single-challenge operations of the atomic market engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "snake_case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum MarketAction {
    Join {
        challenge_id: ChallengeId,
        user_id: UserId,
    },
    Start {
        challenge_id: ChallengeId,
    },
    Settle {
        challenge_id: ChallengeId,
    },
    Refund {
        challenge_id: ChallengeId,
        reason: String,
    },
}

impl MarketAction {
    pub fn challenge_id(&self) -> ChallengeId {
        match self {
            Self::Join { challenge_id, .. }
            | Self::Start { challenge_id }
            | Self::Settle { challenge_id }
            | Self::Refund { challenge_id, .. } => *challenge_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitResultRequest {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub placement: u32,
    #[serde(default)]
    pub stats: MatchStats,
    #[serde(default)]
    pub proof_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReviewResultRequest {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub approve: bool,
    #[serde(default)]
    pub moderator_note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyMatchRequest {
    pub challenge_id: ChallengeId,
}

/// Successful response envelope: `{ "success": true, ...details }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub details: T,
}

impl<T> Success<T> {
    pub fn new(details: T) -> Self {
        Self {
            success: true,
            details,
        }
    }
}

/// Failure response envelope: `{ "success": false, "error": "..." }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Failure {
    pub fn new(error: impl Into<String>, kind: Option<&str>) -> Self {
        Self {
            success: false,
            error: error.into(),
            kind: kind.map(str::to_string),
        }
    }
}

/// Error attached to one unit of a sweep; the sweep itself carried on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitError {
    pub unit_id: uuid::Uuid,
    pub error: String,
}

/// One money movement of a settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutLine {
    pub user_id: UserId,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Paid,
    Refunded,
}

/// What a settlement did with a unit's money.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    pub unit_id: uuid::Uuid,
    pub kind: SettlementKind,
    pub gross: Money,
    pub fee: Money,
    pub lines: Vec<PayoutLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SettlementSummary {
    /// Sum of every line plus the fee; equals `gross` for a conserving settlement.
    pub fn distributed(&self) -> Money {
        self.lines.iter().map(|line| line.amount).sum::<Money>() + self.fee
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentSweepReport {
    pub registrations_opened: Vec<TournamentId>,
    pub tournaments_started: Vec<TournamentId>,
    pub tournaments_cancelled: Vec<TournamentId>,
    pub tournaments_force_completed: Vec<TournamentId>,
    pub challenges_force_completed: Vec<ChallengeId>,
    pub errors: Vec<UnitError>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutSweepReport {
    pub settlements: Vec<SettlementSummary>,
    pub skipped: Vec<UnitError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeResolutionRecord {
    pub dispute_id: DisputeId,
    pub status: DisputeStatus,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeSweepReport {
    pub resolved: Vec<DisputeResolutionRecord>,
    pub still_pending: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyStopReport {
    pub unit_id: uuid::Uuid,
    /// The unit was already completed or cancelled; nothing moved.
    pub already_terminal: bool,
    pub refunds: Vec<PayoutLine>,
    pub fee_retained: Money,
    pub matches_cancelled: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub challenge_id: ChallengeId,
    pub participants: Vec<UserId>,
    pub crashed: bool,
    /// A crash was rolled but the previous run already crashed.
    pub crash_suppressed: bool,
    pub settlement: SettlementSummary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketActionReport {
    pub challenge_id: ChallengeId,
    pub status: ChallengeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeDistributionReport {
    pub tournament_id: TournamentId,
    pub status: TournamentStatus,
    pub fee_bps: u32,
    pub settlement: SettlementSummary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTournament {
    pub tournament_id: TournamentId,
    pub name: String,
    pub game_id: GameId,
    pub entry_fee: Money,
    pub registration_start_ms: u64,
    pub registration_end_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingReport {
    pub active_before: usize,
    pub created: Vec<CreatedTournament>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStatusReport {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub status: ProofStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Every participant now has a result.
    Recorded,
    /// The stat source failed for at least one participant; nothing was written.
    ResultUnavailable,
    /// All results were already present.
    AlreadyComplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMatchReport {
    pub challenge_id: ChallengeId,
    pub outcome: VerificationOutcome,
    pub recorded: Vec<ResultStatusReport>,
    pub unavailable: Vec<UserId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub open_challenges: usize,
    pub active_challenges: usize,
    pub stuck_challenges: usize,
    pub active_tournaments: usize,
    pub stuck_tournaments: usize,
    pub overdue_disputes: usize,
    pub automation_runs_last_hour: usize,
    pub automation_failures_last_hour: usize,
    pub platform_balance: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHealth {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    pub cpu_usage_percent: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub metrics: HealthMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessHealth>,
}
