use puosu_types::{LedgerError, Money, UserId};
use thiserror::Error;

/// Failure of an execution-layer operation.
///
/// Only [`ExecutionError::CompensationFailed`] can leave money in an intermediate state; every
/// other variant is returned before any balance changed or after the unit was restored.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("unit already settled")]
    AlreadySettled,
    #[error("incomplete results: expected {expected}, got {got}")]
    IncompleteResults { expected: usize, got: usize },
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    /// A concurrent actor changed the unit first.
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("no participants")]
    NoParticipants,
    #[error("pot mismatch: recorded {recorded}, escrowed {escrowed}")]
    PotMismatch { recorded: Money, escrowed: Money },
    #[error("insufficient test users: needed {needed}, found {found}")]
    InsufficientTestUsers { needed: usize, found: usize },
    #[error("no active game available")]
    NoActiveGame,
    #[error("user {0} is not a participant")]
    NotParticipant(UserId),
    #[error("result review required before settlement")]
    ReviewRequired,
    /// Payout failed partway and reversing the paid lines failed too.
    #[error("compensation failed after {paid} paid lines: {cause}")]
    CompensationFailed { paid: usize, cause: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ExecutionError {
    /// Short machine-readable tag carried in failure envelopes and audit entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadySettled => "already_settled",
            Self::IncompleteResults { .. } => "incomplete_results",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::NoParticipants => "no_participants",
            Self::PotMismatch { .. } => "pot_mismatch",
            Self::InsufficientTestUsers { .. } => "insufficient_test_users",
            Self::NoActiveGame => "no_active_game",
            Self::NotParticipant(_) => "not_participant",
            Self::ReviewRequired => "review_required",
            Self::CompensationFailed { .. } => "compensation_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Ledger(LedgerError::InsufficientFunds { .. }) => "insufficient_funds",
            Self::Ledger(LedgerError::NotFound(_)) => "not_found",
            Self::Ledger(LedgerError::Storage(_)) => "storage",
            Self::Ledger(_) => "ledger",
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
