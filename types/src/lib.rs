//! Common types shared by the puosu wagering core.
//!
//! [`wager`] holds the record model (wallets, challenges, tournaments, disputes, audit entries)
//! and the ledger error taxonomy. [`api`] holds the request/response schemas of the automation
//! entry points.

pub mod api;
pub mod wager;

pub use wager::{
    now_ms, ChallengeId, DisputeId, GameId, LedgerError, MatchId, Money, TournamentId, UserId,
};
