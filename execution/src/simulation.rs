//! Market-making simulation among test accounts.
//!
//! A run drafts funded test users into a synthetic challenge, starts it, and after the simulated
//! match duration either injects a crash (refund path) or records synthetic verified results and
//! settles (payout path). Randomness is injected so both branches can be forced in tests.

use crate::audit;
use crate::automation::SimulationConfig;
use crate::error::{ExecutionError, ExecutionResult};
use crate::lifecycle::start_challenge;
use crate::settlement::{refund_challenge, settle_challenge, CloseAs};
use crate::store::Datastore;
use puosu_types::api::{SimRunnerRequest, SimulationReport};
use puosu_types::wager::{
    AutomationType, Challenge, ChallengeResult, ChallengeType, MatchStats, ProofStatus,
    RefundType, MAX_PARTICIPANTS, SIMULATED_CRASH_ACTION, STANDARD_FEE_BPS,
};
use puosu_types::{ChallengeId, Money, UserId};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};

pub const SIMULATED_SETTLEMENT_ACTION: &str = "simulated_settlement";

/// Effective parameters of one simulation run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationParams {
    pub participants: u32,
    pub stake: Money,
    pub challenge_type: ChallengeType,
    pub crash_probability: f64,
    pub match_duration_ms: u64,
}

impl SimulationParams {
    /// Applies request overrides to the configured defaults.
    pub fn resolve(config: &SimulationConfig, request: &SimRunnerRequest) -> ExecutionResult<Self> {
        let params = Self {
            participants: request.participants.unwrap_or(config.participants),
            stake: request.stake.unwrap_or(config.stake),
            challenge_type: request.challenge_type.unwrap_or(config.challenge_type),
            crash_probability: request
                .crash_probability
                .unwrap_or(config.crash_probability),
            match_duration_ms: request
                .match_duration_ms
                .unwrap_or(config.match_duration_ms),
        };
        if !(2..=MAX_PARTICIPANTS).contains(&params.participants) {
            return Err(ExecutionError::InvalidRequest(format!(
                "participants must be between 2 and {MAX_PARTICIPANTS}"
            )));
        }
        if !params.stake.is_positive() {
            return Err(ExecutionError::InvalidRequest("stake must be positive".into()));
        }
        if !(0.0..=1.0).contains(&params.crash_probability) {
            return Err(ExecutionError::InvalidRequest(
                "crashProbability must be within [0, 1]".into(),
            ));
        }
        Ok(params)
    }
}

/// Whether the latest simulation outcome was itself an injected crash.
async fn previous_run_crashed<S: Datastore>(store: &S) -> ExecutionResult<bool> {
    Ok(store
        .latest_audit(AutomationType::SimRunner)
        .await?
        .is_some_and(|entry| entry.action_type == SIMULATED_CRASH_ACTION))
}

/// Creates, joins and starts a synthetic challenge.
pub async fn create_simulated_match<S: Datastore, R: Rng>(
    store: &S,
    params: &SimulationParams,
    rng: &mut R,
    now_ms: u64,
) -> ExecutionResult<(ChallengeId, Vec<UserId>)> {
    let games = store.active_games().await?;
    let game = games.choose(rng).ok_or(ExecutionError::NoActiveGame)?;

    let needed = params.participants as usize;
    let users = store
        .get_available_test_users(params.stake, needed)
        .await?;
    if users.len() < needed {
        return Err(ExecutionError::InsufficientTestUsers {
            needed,
            found: users.len(),
        });
    }
    let players: Vec<UserId> = users.iter().map(|u| u.user_id).collect();

    let mut challenge = Challenge::new(
        players[0],
        game.id,
        params.challenge_type,
        params.stake,
        params.participants,
        now_ms,
    );
    challenge.is_simulation = true;
    let challenge_id = challenge.id;
    store.insert_challenge(challenge).await?;

    for user_id in &players {
        if let Err(err) = store
            .join_challenge_atomic(challenge_id, *user_id, params.stake, now_ms)
            .await
        {
            warn!(challenge = %challenge_id, user = %user_id, ?err, "simulated join failed, unwinding");
            refund_challenge(
                store,
                challenge_id,
                RefundType::Full,
                CloseAs::Cancelled,
                "simulation setup failed",
                now_ms,
            )
            .await?;
            return Err(err.into());
        }
    }
    start_challenge(store, challenge_id, now_ms).await?;
    info!(challenge = %challenge_id, game = %game.name, players = players.len(), stake = %params.stake, "simulated match started");
    Ok((challenge_id, players))
}

/// Random stats whose scores descend with placement.
fn synthetic_results<R: Rng>(
    challenge_id: ChallengeId,
    players: &[UserId],
    rng: &mut R,
    now_ms: u64,
) -> Vec<ChallengeResult> {
    let mut order = players.to_vec();
    order.shuffle(rng);
    let field = order.len() as i64;
    order
        .into_iter()
        .enumerate()
        .map(|(index, user_id)| ChallengeResult {
            challenge_id,
            user_id,
            placement: index as u32 + 1,
            stats: MatchStats {
                score: (field - index as i64) * 200 + rng.gen_range(0..150),
                kills: rng.gen_range(0..=20),
                deaths: rng.gen_range(1..=15),
                assists: rng.gen_range(0..=10),
            },
            proof_url: None,
            status: ProofStatus::Verified,
            submitted_at_ms: now_ms,
        })
        .collect()
}

/// One full simulation run.
pub async fn run_simulation<S: Datastore, R: Rng>(
    store: &S,
    params: &SimulationParams,
    rng: &mut R,
    now_ms: u64,
) -> ExecutionResult<SimulationReport> {
    // Read before this run writes anything so only the previous outcome counts.
    let previous_crash = previous_run_crashed(store).await?;

    let (challenge_id, players) = match create_simulated_match(store, params, rng, now_ms).await {
        Ok(created) => created,
        Err(err) => {
            audit::record(
                store,
                AutomationType::SimRunner,
                "simulation_failed",
                false,
                json!({ "error": err.to_string(), "kind": err.kind() }),
                now_ms,
            )
            .await;
            return Err(err);
        }
    };

    let ended_at = now_ms + params.match_duration_ms;
    let rolled_crash = rng.gen_bool(params.crash_probability);
    let crash_suppressed = rolled_crash && previous_crash;
    let crashed = rolled_crash && !previous_crash;

    let outcome = if crashed {
        refund_challenge(
            store,
            challenge_id,
            RefundType::Full,
            CloseAs::Cancelled,
            "simulated crash",
            ended_at,
        )
        .await
    } else {
        let mut recorded = Ok(());
        for result in synthetic_results(challenge_id, &players, rng, ended_at) {
            if let Err(err) = store.record_challenge_result(result).await {
                recorded = Err(ExecutionError::from(err));
                break;
            }
        }
        match recorded {
            Ok(()) => settle_challenge(store, challenge_id, STANDARD_FEE_BPS, ended_at).await,
            Err(err) => Err(err),
        }
    };

    match outcome {
        Ok(settlement) => {
            let action = if crashed {
                SIMULATED_CRASH_ACTION
            } else {
                SIMULATED_SETTLEMENT_ACTION
            };
            audit::record(
                store,
                AutomationType::SimRunner,
                action,
                true,
                json!({
                    "challengeId": challenge_id,
                    "participants": players.len(),
                    "stake": params.stake,
                    "crashSuppressed": crash_suppressed,
                    "kind": settlement.kind,
                }),
                ended_at,
            )
            .await;
            Ok(SimulationReport {
                challenge_id,
                participants: players,
                crashed,
                crash_suppressed,
                settlement,
            })
        }
        Err(err) => {
            audit::record(
                store,
                AutomationType::SimRunner,
                "simulation_failed",
                false,
                json!({ "challengeId": challenge_id, "error": err.to_string(), "kind": err.kind() }),
                ended_at,
            )
            .await;
            Err(err)
        }
    }
}
