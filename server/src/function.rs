//! Named automation entry points and their dispatch.

use puosu_execution::{
    distribute_tournament_prizes, emergency_stop, evaluate_health, resolve_disputes,
    review_result, run_market_action, run_payout_sweep, run_simulation, run_trending_orchestrator,
    run_tournament_sweep, submit_result, verify_match, Datastore, ExecutionError,
    GameStatsSource, SimulationParams,
};
use puosu_types::api::{
    DistributePrizesRequest, EmergencyStopRequest, MarketAction, ReviewResultRequest,
    SimRunnerRequest, SubmitResultRequest, Success, SweepRequest, VerifyMatchRequest,
    WalletPayoutsRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::Server;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Function {
    TournamentAutomation,
    AutomatedWalletPayouts,
    DistributeTournamentPrizes,
    ResolveDisputes,
    EmergencyTournamentStop,
    SimRunner,
    AtomicMarketEngine,
    PlatformHealthMonitor,
    TrendingGamesOrchestrator,
    SubmitResult,
    ReviewResult,
    VerifyMatch,
}

impl Function {
    pub const ALL: &'static [Function] = &[
        Function::TournamentAutomation,
        Function::AutomatedWalletPayouts,
        Function::DistributeTournamentPrizes,
        Function::ResolveDisputes,
        Function::EmergencyTournamentStop,
        Function::SimRunner,
        Function::AtomicMarketEngine,
        Function::PlatformHealthMonitor,
        Function::TrendingGamesOrchestrator,
        Function::SubmitResult,
        Function::ReviewResult,
        Function::VerifyMatch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TournamentAutomation => "tournament-automation",
            Self::AutomatedWalletPayouts => "automated-wallet-payouts",
            Self::DistributeTournamentPrizes => "distribute-tournament-prizes",
            Self::ResolveDisputes => "resolve-disputes",
            Self::EmergencyTournamentStop => "emergency-tournament-stop",
            Self::SimRunner => "sim-runner",
            Self::AtomicMarketEngine => "atomic-market-engine",
            Self::PlatformHealthMonitor => "platform-health-monitor",
            Self::TrendingGamesOrchestrator => "trending-games-orchestrator",
            Self::SubmitResult => "submit-result",
            Self::ReviewResult => "review-result",
            Self::VerifyMatch => "verify-match",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Function {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|function| function.as_str() == s)
            .ok_or_else(|| ApiError::UnknownFunction(s.to_string()))
    }
}

/// Failure of one function invocation, rendered as a `{ success: false, error }` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("invalid request: {0}")]
    InvalidBody(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("failed to encode response: {0}")]
    Encode(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownFunction(_) => "unknown_function",
            Self::InvalidBody(_) => "invalid_request",
            Self::Execution(err) => err.kind(),
            Self::Encode(_) => "encode",
        }
    }

    pub fn is_client_error(&self) -> bool {
        match self {
            Self::UnknownFunction(_) | Self::InvalidBody(_) => true,
            Self::Execution(err) => err.is_invalid_request(),
            Self::Encode(_) => false,
        }
    }
}

/// An empty body is treated as `{}`.
fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|err| ApiError::InvalidBody(err.to_string()))
}

fn success<T: Serialize>(details: T) -> Result<Value, ApiError> {
    serde_json::to_value(Success::new(details)).map_err(|err| ApiError::Encode(err.to_string()))
}

impl<S: Datastore, G: GameStatsSource> Server<S, G> {
    /// Runs `function` against `body` and returns the success envelope.
    pub async fn invoke(&self, function: Function, body: &[u8]) -> Result<Value, ApiError> {
        let start = Instant::now();
        let result = self.dispatch(function, body, puosu_types::now_ms()).await;
        let elapsed = start.elapsed();
        self.metrics
            .record_invocation(function, elapsed, result.is_ok());
        match &result {
            Ok(_) => info!(
                function = %function,
                elapsed_ms = elapsed.as_millis() as u64,
                "function.ok"
            ),
            Err(err) => warn!(
                function = %function,
                kind = err.kind(),
                error = %err,
                elapsed_ms = elapsed.as_millis() as u64,
                "function.failed"
            ),
        }
        result
    }

    async fn dispatch(&self, function: Function, body: &[u8], now_ms: u64) -> Result<Value, ApiError> {
        let store = &self.store;
        let automation = &self.config.automation;
        match function {
            Function::TournamentAutomation => {
                let _: SweepRequest = parse(body)?;
                success(run_tournament_sweep(store, automation, now_ms).await?)
            }
            Function::AutomatedWalletPayouts => {
                let request: WalletPayoutsRequest = parse(body)?;
                let report = run_payout_sweep(store, request.challenge_id, now_ms).await?;
                for settlement in &report.settlements {
                    self.metrics.record_settlement(settlement);
                }
                success(report)
            }
            Function::DistributeTournamentPrizes => {
                let request: DistributePrizesRequest = parse(body)?;
                let report = distribute_tournament_prizes(store, request, now_ms).await?;
                self.metrics.record_settlement(&report.settlement);
                success(report)
            }
            Function::ResolveDisputes => {
                let _: SweepRequest = parse(body)?;
                success(resolve_disputes(store, now_ms).await?)
            }
            Function::EmergencyTournamentStop => {
                let request: EmergencyStopRequest = parse(body)?;
                success(emergency_stop(store, &request, now_ms).await?)
            }
            Function::SimRunner => {
                let request: SimRunnerRequest = parse(body)?;
                let params = SimulationParams::resolve(&automation.simulation, &request)?;
                let mut rng = self.fork_rng();
                let report = run_simulation(store, &params, &mut rng, now_ms).await?;
                self.metrics.record_settlement(&report.settlement);
                success(report)
            }
            Function::AtomicMarketEngine => {
                let action: MarketAction = parse(body)?;
                let report = run_market_action(store, &action, now_ms).await?;
                if let Some(settlement) = &report.settlement {
                    self.metrics.record_settlement(settlement);
                }
                success(report)
            }
            Function::PlatformHealthMonitor => {
                let _: SweepRequest = parse(body)?;
                let process = self.system.snapshot();
                self.metrics.record_process(&process);
                success(evaluate_health(store, automation, Some(process), now_ms).await?)
            }
            Function::TrendingGamesOrchestrator => {
                let _: SweepRequest = parse(body)?;
                success(run_trending_orchestrator(store, automation, now_ms).await?)
            }
            Function::SubmitResult => {
                let request: SubmitResultRequest = parse(body)?;
                success(submit_result(store, request, now_ms).await?)
            }
            Function::ReviewResult => {
                let request: ReviewResultRequest = parse(body)?;
                success(review_result(store, request, now_ms).await?)
            }
            Function::VerifyMatch => {
                let request: VerifyMatchRequest = parse(body)?;
                success(verify_match(store, &self.stats, request.challenge_id, now_ms).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names_round_trip() {
        for function in Function::ALL {
            assert_eq!(function.as_str().parse::<Function>().unwrap(), *function);
        }
        let err = "tournament_automation".parse::<Function>().unwrap_err();
        assert_eq!(err.kind(), "unknown_function");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_empty_body_is_an_empty_object() {
        let request: SweepRequest = parse(b"  ").unwrap();
        assert!(!request.manual);
        let err = parse::<SweepRequest>(br#"{"manual":true,"extra":1}"#).unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[test]
    fn test_execution_errors_map_to_client_or_server() {
        let invalid = ApiError::from(ExecutionError::InvalidRequest("no target".into()));
        assert!(invalid.is_client_error());
        let settled = ApiError::from(ExecutionError::AlreadySettled);
        assert!(!settled.is_client_error());
        assert_eq!(settled.kind(), "already_settled");
    }
}
