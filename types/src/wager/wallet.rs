use serde::{Deserialize, Serialize};

use super::labels::labeled_enum;
use super::{ChallengeId, Money, TournamentId, UserId};

/// Per-user balance record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Money,
    /// Eligible to be drafted by the market simulation.
    pub is_test: bool,
    /// Premium tier; unlocks the reduced tournament fee.
    pub vip: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionReason {
    ChallengeStake,
    ChallengePayout,
    TournamentEntry,
    TournamentPrize,
    Refund,
    PayoutReversal,
    PlatformFee,
    Deposit,
    AdminAdjustment,
}

labeled_enum!(TransactionReason, "transaction reason", {
    ChallengeStake => "challenge_stake",
    ChallengePayout => "challenge_payout",
    TournamentEntry => "tournament_entry",
    TournamentPrize => "tournament_prize",
    Refund => "refund",
    PayoutReversal => "payout_reversal",
    PlatformFee => "platform_fee",
    Deposit => "deposit",
    AdminAdjustment => "admin_adjustment",
});

/// Request to move money through `increment_wallet_balance`.
///
/// A negative `amount` is a debit and must not take the balance below zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletCredit {
    pub user_id: UserId,
    pub amount: Money,
    pub reason: TransactionReason,
    pub challenge_id: Option<ChallengeId>,
    pub tournament_id: Option<TournamentId>,
    pub requires_admin: bool,
    pub metadata: serde_json::Value,
}

impl WalletCredit {
    pub fn new(user_id: UserId, amount: Money, reason: TransactionReason) -> Self {
        Self {
            user_id,
            amount,
            reason,
            challenge_id: None,
            tournament_id: None,
            requires_admin: false,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn for_challenge(mut self, challenge_id: ChallengeId) -> Self {
        self.challenge_id = Some(challenge_id);
        self
    }

    pub fn for_tournament(mut self, tournament_id: TournamentId) -> Self {
        self.tournament_id = Some(tournament_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One line of the append-only transaction history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub amount: Money,
    pub reason: TransactionReason,
    pub challenge_id: Option<ChallengeId>,
    pub tournament_id: Option<TournamentId>,
    pub requires_admin: bool,
    pub metadata: serde_json::Value,
    pub created_at_ms: u64,
}

/// A user drafted for market simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUser {
    pub user_id: UserId,
    pub wallet_balance: Money,
}

/// Activity feed entry shown to a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub kind: String,
    pub message: String,
    pub reference_id: Option<uuid::Uuid>,
    pub created_at_ms: u64,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        kind: &str,
        message: impl Into<String>,
        reference_id: Option<uuid::Uuid>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            message: message.into(),
            reference_id,
            created_at_ms,
        }
    }
}
