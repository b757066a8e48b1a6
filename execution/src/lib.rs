//! PUOSU execution layer.
//!
//! This crate contains the wagering lifecycle, the settlement engine and the automation sweeps
//! that drive them. All persistence goes through the [`Datastore`] trait, whose atomic
//! primitives are the only way money moves.
//!
//! ## Execution requirements
//! - Do not read the wall clock; every operation takes `now_ms` from its caller.
//! - Do not create randomness; simulation takes an injected `rand::Rng`.
//! - Hold no state between calls. Sweeps re-derive what to do from the store every time.
//!
//! ## Money invariants
//! - A unit is settled at most once (`secure_settle_*` guards).
//! - Payout lines plus the platform fee equal the escrowed pot to the cent.
//! - A payout that fails partway is reversed and the unit is refunded in full.
//!
//! ## Minimal settlement (example)
//! ```rust,ignore
//! # #[cfg(feature = "mocks")]
//! # {
//! use puosu_execution::{settle_challenge, Memory};
//! use puosu_types::wager::STANDARD_FEE_BPS;
//!
//! # async fn example(store: &Memory, challenge_id: uuid::Uuid, now_ms: u64) -> anyhow::Result<()> {
//! // The challenge must be active with a result recorded for every participant.
//! let summary = settle_challenge(store, challenge_id, STANDARD_FEE_BPS, now_ms).await?;
//! assert_eq!(summary.distributed(), summary.gross);
//! # Ok(())
//! # }
//! # }
//! ```

pub mod anomaly;
pub mod audit;
pub mod automation;
pub mod disputes;
pub mod health;
pub mod lifecycle;
pub mod payout;
pub mod results;
pub mod settlement;
pub mod simulation;
pub mod store;
pub mod tournament;

mod error;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod automation_tests;

pub use automation::{
    distribute_tournament_prizes, emergency_stop, run_market_action, run_payout_sweep,
    run_tournament_sweep, run_trending_orchestrator, AutomationConfig, SimulationConfig,
};
pub use disputes::resolve_disputes;
pub use error::{ExecutionError, ExecutionResult};
pub use health::evaluate_health;
pub use lifecycle::{start_challenge, Transition, TournamentAction, TournamentScheduler};
pub use payout::{plan_payout, PayoutPlan};
pub use results::{review_result, submit_result, verify_match, GameStatsSource, StatsError};
pub use settlement::{
    force_complete_challenge, refund_challenge, settle_challenge, CloseAs,
};
pub use simulation::{run_simulation, SimulationParams};
pub use store::{Datastore, StoreResult};
pub use tournament::{cancel_tournament, distribute_prizes, force_complete_tournament};

#[cfg(any(test, feature = "mocks"))]
pub use mocks::Memory;
