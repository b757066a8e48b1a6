use thiserror::Error;

use super::Money;

/// Failures reported by the datastore's atomic operations.
///
/// Every variant except [`LedgerError::Storage`] is a precondition failure: the operation left no
/// partial state behind and retrying it unchanged will fail the same way.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },
    #[error("challenge is full")]
    ChallengeFull,
    #[error("user already joined")]
    AlreadyJoined,
    #[error("challenge is not open")]
    ChallengeNotOpen,
    #[error("tournament is full")]
    TournamentFull,
    #[error("tournament registration is closed")]
    RegistrationClosed,
    #[error("result already recorded")]
    ResultAlreadyRecorded,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether a later sweep could succeed without anything else changing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
