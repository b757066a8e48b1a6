//! Stateless automation sweeps.
//!
//! Every sweep re-reads the store, handles each unit on its own, and records per-unit failures
//! in its report and the audit log instead of aborting. Running the same sweep twice, or two
//! sweeps at once, is safe: the settle guards and compare-and-set transitions decide who wins.

use crate::audit;
use crate::error::{ExecutionError, ExecutionResult};
use crate::lifecycle::{is_stuck_challenge, start_challenge, TournamentAction, TournamentScheduler};
use crate::settlement::{
    challenge_ready, force_complete_challenge, refund_challenge, settle_challenge, CloseAs,
};
use crate::store::Datastore;
use crate::tournament::{
    cancel_tournament, distribute_prizes, force_complete_tournament, open_registration,
    start_tournament,
};
use puosu_types::api::{
    CreatedTournament, DistributePrizesRequest, EmergencyStopReport, EmergencyStopRequest,
    MarketAction, MarketActionReport, PayoutSweepReport, PrizeDistributionReport,
    TournamentSweepReport, TrendingReport, UnitError,
};
use puosu_types::wager::{
    AutomationType, ChallengeStatus, ChallengeType, Game, RefundType, Tournament,
    TournamentStatus, DAY_MS, HOUR_MS, MAX_ACTIVE_DURATION_MS, MAX_PARTICIPANTS,
    MIN_ACTIVE_TOURNAMENTS, MINUTE_MS, STANDARD_FEE_BPS,
};
use puosu_types::{ChallengeId, LedgerError, Money};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

pub const DEFAULT_TOURNAMENT_ENTRY_FEE_CENTS: i64 = 500;
pub const DEFAULT_TOURNAMENT_MAX_PARTICIPANTS: u32 = 32;
pub const DEFAULT_REGISTRATION_LEAD_MS: u64 = 15 * MINUTE_MS;
pub const DEFAULT_REGISTRATION_STAGGER_MS: u64 = 2 * HOUR_MS;
pub const DEFAULT_REGISTRATION_WINDOW_MS: u64 = HOUR_MS;
pub const DEFAULT_TRENDING_LOOKBACK_MS: u64 = DAY_MS;

pub const DEFAULT_SIM_PARTICIPANTS: u32 = 3;
pub const DEFAULT_SIM_STAKE_CENTS: i64 = 1_000;
pub const DEFAULT_SIM_CRASH_PROBABILITY: f64 = 0.2;
pub const DEFAULT_SIM_MATCH_DURATION_MS: u64 = 10 * MINUTE_MS;

/// Market simulation knobs. Request fields override these per run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub participants: u32,
    pub stake: Money,
    pub challenge_type: ChallengeType,
    pub crash_probability: f64,
    pub match_duration_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            participants: DEFAULT_SIM_PARTICIPANTS,
            stake: Money::from_cents(DEFAULT_SIM_STAKE_CENTS),
            challenge_type: ChallengeType::Top3,
            crash_probability: DEFAULT_SIM_CRASH_PROBABILITY,
            match_duration_ms: DEFAULT_SIM_MATCH_DURATION_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Stuck-state timeout for active challenges and ongoing tournaments.
    pub max_active_duration_ms: u64,
    pub min_active_tournaments: usize,
    pub tournament_entry_fee: Money,
    pub tournament_max_participants: u32,
    /// Delay before the first created tournament opens registration.
    pub registration_lead_ms: u64,
    /// Gap between the registration windows of tournaments created in one run.
    pub registration_stagger_ms: u64,
    pub registration_window_ms: u64,
    pub trending_lookback_ms: u64,
    pub simulation: SimulationConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_active_duration_ms: MAX_ACTIVE_DURATION_MS,
            min_active_tournaments: MIN_ACTIVE_TOURNAMENTS,
            tournament_entry_fee: Money::from_cents(DEFAULT_TOURNAMENT_ENTRY_FEE_CENTS),
            tournament_max_participants: DEFAULT_TOURNAMENT_MAX_PARTICIPANTS,
            registration_lead_ms: DEFAULT_REGISTRATION_LEAD_MS,
            registration_stagger_ms: DEFAULT_REGISTRATION_STAGGER_MS,
            registration_window_ms: DEFAULT_REGISTRATION_WINDOW_MS,
            trending_lookback_ms: DEFAULT_TRENDING_LOOKBACK_MS,
            simulation: SimulationConfig::default(),
        }
    }
}

impl AutomationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_active_duration_ms == 0 {
            return Err("max_active_duration_ms must be greater than zero".into());
        }
        if self.registration_window_ms == 0 {
            return Err("registration_window_ms must be greater than zero".into());
        }
        if self.tournament_entry_fee.is_negative() {
            return Err("tournament_entry_fee must not be negative".into());
        }
        if !(2..=MAX_PARTICIPANTS).contains(&self.tournament_max_participants) {
            return Err(format!(
                "tournament_max_participants must be between 2 and {MAX_PARTICIPANTS}"
            ));
        }
        let sim = &self.simulation;
        if !(0.0..=1.0).contains(&sim.crash_probability) {
            return Err("simulation.crash_probability must be within [0, 1]".into());
        }
        if !(2..=MAX_PARTICIPANTS).contains(&sim.participants) {
            return Err(format!(
                "simulation.participants must be between 2 and {MAX_PARTICIPANTS}"
            ));
        }
        if !sim.stake.is_positive() {
            return Err("simulation.stake must be positive".into());
        }
        Ok(())
    }
}

fn unit_error(unit_id: uuid::Uuid, err: &ExecutionError) -> UnitError {
    UnitError {
        unit_id,
        error: err.to_string(),
    }
}

/// Opens registration, starts or cancels on quorum, and releases stuck tournaments and
/// challenges.
pub async fn run_tournament_sweep<S: Datastore>(
    store: &S,
    config: &AutomationConfig,
    now_ms: u64,
) -> ExecutionResult<TournamentSweepReport> {
    let scheduler = TournamentScheduler::new(config.max_active_duration_ms);
    let mut report = TournamentSweepReport::default();

    for status in [
        TournamentStatus::Upcoming,
        TournamentStatus::RegistrationOpen,
        TournamentStatus::Ongoing,
    ] {
        for tournament in store.tournaments_with_status(status).await? {
            let registrants = if status == TournamentStatus::RegistrationOpen {
                store.tournament_participants(tournament.id).await?.len()
            } else {
                0
            };
            let action = scheduler.due_action(&tournament, registrants, now_ms);
            if let Err(err) = apply_tournament_action(store, &tournament, action, now_ms, &mut report).await {
                warn!(tournament = %tournament.id, ?action, %err, "tournament sweep action failed");
                audit::record(
                    store,
                    AutomationType::TournamentAutomation,
                    "tournament_action_failed",
                    false,
                    json!({ "tournamentId": tournament.id, "action": format!("{action:?}"), "error": err.to_string() }),
                    now_ms,
                )
                .await;
                report.errors.push(unit_error(tournament.id, &err));
            }
        }
    }

    for challenge in store.challenges_with_status(ChallengeStatus::Active).await? {
        if !is_stuck_challenge(&challenge, now_ms, config.max_active_duration_ms) {
            continue;
        }
        match force_complete_challenge(store, challenge.id, now_ms).await {
            Ok(summary) => {
                audit::record(
                    store,
                    AutomationType::TournamentAutomation,
                    "challenge_force_completed",
                    true,
                    json!({ "challengeId": challenge.id, "kind": summary.kind, "gross": summary.gross }),
                    now_ms,
                )
                .await;
                report.challenges_force_completed.push(challenge.id);
            }
            Err(err) => {
                audit::record(
                    store,
                    AutomationType::TournamentAutomation,
                    "challenge_force_complete_failed",
                    false,
                    json!({ "challengeId": challenge.id, "error": err.to_string() }),
                    now_ms,
                )
                .await;
                report.errors.push(unit_error(challenge.id, &err));
            }
        }
    }

    info!(
        opened = report.registrations_opened.len(),
        started = report.tournaments_started.len(),
        cancelled = report.tournaments_cancelled.len(),
        force_completed = report.tournaments_force_completed.len(),
        challenges_force_completed = report.challenges_force_completed.len(),
        errors = report.errors.len(),
        "tournament sweep finished"
    );
    Ok(report)
}

async fn apply_tournament_action<S: Datastore>(
    store: &S,
    tournament: &Tournament,
    action: TournamentAction,
    now_ms: u64,
    report: &mut TournamentSweepReport,
) -> ExecutionResult<()> {
    let data = json!({ "tournamentId": tournament.id, "name": tournament.name });
    match action {
        TournamentAction::Wait => return Ok(()),
        TournamentAction::OpenRegistration => {
            if open_registration(store, tournament).await?.applied() {
                report.registrations_opened.push(tournament.id);
                audit::record(store, AutomationType::TournamentAutomation, "registration_opened", true, data, now_ms).await;
            }
        }
        TournamentAction::Start => {
            if start_tournament(store, tournament, now_ms).await?.applied() {
                report.tournaments_started.push(tournament.id);
                audit::record(store, AutomationType::TournamentAutomation, "tournament_started", true, data, now_ms).await;
            }
        }
        TournamentAction::CancelForQuorum => {
            let stop = cancel_tournament(store, tournament.id, RefundType::Full, "quorum not met", now_ms).await?;
            if !stop.already_terminal {
                report.tournaments_cancelled.push(tournament.id);
                audit::record(
                    store,
                    AutomationType::TournamentAutomation,
                    "tournament_cancelled_low_turnout",
                    true,
                    json!({ "tournamentId": tournament.id, "refunds": stop.refunds.len() }),
                    now_ms,
                )
                .await;
            }
        }
        TournamentAction::ForceComplete => {
            let summary = force_complete_tournament(store, tournament.id, now_ms).await?;
            report.tournaments_force_completed.push(tournament.id);
            audit::record(
                store,
                AutomationType::TournamentAutomation,
                "tournament_force_completed",
                true,
                json!({ "tournamentId": tournament.id, "kind": summary.kind, "gross": summary.gross }),
                now_ms,
            )
            .await;
        }
    }
    Ok(())
}

/// Settles every active challenge that is ready, or just `challenge_id` when given.
pub async fn run_payout_sweep<S: Datastore>(
    store: &S,
    challenge_id: Option<ChallengeId>,
    now_ms: u64,
) -> ExecutionResult<PayoutSweepReport> {
    let targeted = challenge_id.is_some();
    let challenges = match challenge_id {
        Some(id) => vec![store
            .challenge(id)
            .await?
            .ok_or(LedgerError::NotFound("challenge"))?],
        None => store.challenges_with_status(ChallengeStatus::Active).await?,
    };

    let mut report = PayoutSweepReport::default();
    for challenge in challenges {
        if !targeted && !challenge_ready(store, challenge.id).await? {
            continue;
        }
        match settle_challenge(store, challenge.id, STANDARD_FEE_BPS, now_ms).await {
            Ok(summary) => {
                audit::record(
                    store,
                    AutomationType::WalletPayouts,
                    "challenge_settled",
                    true,
                    json!({
                        "challengeId": challenge.id,
                        "kind": summary.kind,
                        "gross": summary.gross,
                        "fee": summary.fee,
                        "winnerId": summary.winner_id,
                    }),
                    now_ms,
                )
                .await;
                report.settlements.push(summary);
            }
            Err(err) => {
                audit::record(
                    store,
                    AutomationType::WalletPayouts,
                    "challenge_settlement_skipped",
                    false,
                    json!({ "challengeId": challenge.id, "error": err.to_string(), "kind": err.kind() }),
                    now_ms,
                )
                .await;
                report.skipped.push(unit_error(challenge.id, &err));
            }
        }
    }
    Ok(report)
}

pub async fn distribute_tournament_prizes<S: Datastore>(
    store: &S,
    request: DistributePrizesRequest,
    now_ms: u64,
) -> ExecutionResult<PrizeDistributionReport> {
    let placements = request
        .placements
        .iter()
        .map(|p| (p.user_id, p.placement))
        .collect::<Vec<_>>();
    if placements.iter().any(|(_, placement)| *placement == 0) {
        return Err(ExecutionError::InvalidRequest(
            "placements are 1-based".into(),
        ));
    }
    let result = distribute_prizes(store, request.tournament_id, placements, now_ms).await;
    let (success, data) = match &result {
        Ok(report) => (
            true,
            json!({
                "tournamentId": request.tournament_id,
                "status": report.status,
                "feeBps": report.fee_bps,
                "gross": report.settlement.gross,
                "winnerId": report.settlement.winner_id,
                "manual": request.manual,
            }),
        ),
        Err(err) => (
            false,
            json!({ "tournamentId": request.tournament_id, "error": err.to_string(), "manual": request.manual }),
        ),
    };
    audit::record(store, AutomationType::TournamentPrizes, "distribute_prizes", success, data, now_ms).await;
    result
}

/// Halts exactly one unit, refunding its stakes.
pub async fn emergency_stop<S: Datastore>(
    store: &S,
    request: &EmergencyStopRequest,
    now_ms: u64,
) -> ExecutionResult<EmergencyStopReport> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(ExecutionError::InvalidRequest("reason must not be empty".into()));
    }
    let result = match (request.tournament_id, request.challenge_id) {
        (Some(tournament_id), None) => {
            cancel_tournament(store, tournament_id, request.refund_type, reason, now_ms).await
        }
        (None, Some(challenge_id)) => {
            stop_challenge(store, challenge_id, request.refund_type, reason, now_ms).await
        }
        _ => {
            return Err(ExecutionError::InvalidRequest(
                "exactly one of tournamentId or challengeId is required".into(),
            ))
        }
    };

    let (success, data) = match &result {
        Ok(report) => (
            true,
            json!({
                "unitId": report.unit_id,
                "reason": reason,
                "refundType": request.refund_type,
                "alreadyTerminal": report.already_terminal,
                "refunds": report.refunds.len(),
                "feeRetained": report.fee_retained,
                "matchesCancelled": report.matches_cancelled,
            }),
        ),
        Err(err) => (
            false,
            json!({
                "tournamentId": request.tournament_id,
                "challengeId": request.challenge_id,
                "reason": reason,
                "error": err.to_string(),
            }),
        ),
    };
    audit::record(store, AutomationType::EmergencyStop, "emergency_stop", success, data, now_ms).await;
    result
}

async fn stop_challenge<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
    refund_type: RefundType,
    reason: &str,
    now_ms: u64,
) -> ExecutionResult<EmergencyStopReport> {
    let challenge = store
        .challenge(challenge_id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;
    if challenge.status.is_terminal() {
        return Ok(EmergencyStopReport {
            unit_id: challenge_id,
            already_terminal: true,
            refunds: Vec::new(),
            fee_retained: Money::ZERO,
            matches_cancelled: 0,
        });
    }
    let summary =
        refund_challenge(store, challenge_id, refund_type, CloseAs::Cancelled, reason, now_ms).await?;
    Ok(EmergencyStopReport {
        unit_id: challenge_id,
        already_terminal: false,
        refunds: summary.lines,
        fee_retained: summary.fee,
        matches_cancelled: 0,
    })
}

/// Applies one market-engine action to a challenge.
pub async fn run_market_action<S: Datastore>(
    store: &S,
    action: &MarketAction,
    now_ms: u64,
) -> ExecutionResult<MarketActionReport> {
    let challenge_id = action.challenge_id();
    let result = apply_market_action(store, action, now_ms).await;
    let label = match action {
        MarketAction::Join { .. } => "join",
        MarketAction::Start { .. } => "start",
        MarketAction::Settle { .. } => "settle",
        MarketAction::Refund { .. } => "refund",
    };
    let data = match &result {
        Ok(report) => json!({ "challengeId": challenge_id, "status": report.status }),
        Err(err) => json!({ "challengeId": challenge_id, "error": err.to_string(), "kind": err.kind() }),
    };
    audit::record(store, AutomationType::AtomicMarketEngine, label, result.is_ok(), data, now_ms).await;
    result
}

async fn apply_market_action<S: Datastore>(
    store: &S,
    action: &MarketAction,
    now_ms: u64,
) -> ExecutionResult<MarketActionReport> {
    let challenge_id = action.challenge_id();
    let challenge = store
        .challenge(challenge_id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;

    let settlement = match action {
        MarketAction::Join { user_id, .. } => {
            store
                .join_challenge_atomic(challenge_id, *user_id, challenge.stake, now_ms)
                .await?;
            None
        }
        MarketAction::Start { .. } => {
            start_challenge(store, challenge_id, now_ms).await?;
            None
        }
        MarketAction::Settle { .. } => {
            Some(settle_challenge(store, challenge_id, STANDARD_FEE_BPS, now_ms).await?)
        }
        MarketAction::Refund { reason, .. } => Some(
            refund_challenge(
                store,
                challenge_id,
                RefundType::Full,
                CloseAs::Cancelled,
                reason,
                now_ms,
            )
            .await?,
        ),
    };

    let status = store
        .challenge(challenge_id)
        .await?
        .map(|c| c.status)
        .unwrap_or(challenge.status);
    Ok(MarketActionReport {
        challenge_id,
        status,
        settlement,
    })
}

/// Active games ordered by challenges created in the lookback window, most played first.
pub fn rank_trending_games(games: &[Game], plays: &HashMap<uuid::Uuid, usize>) -> Vec<Game> {
    let mut ranked = games.to_vec();
    ranked.sort_by(|a, b| {
        let pa = plays.get(&a.id).copied().unwrap_or(0);
        let pb = plays.get(&b.id).copied().unwrap_or(0);
        pb.cmp(&pa).then_with(|| a.name.cmp(&b.name))
    });
    ranked
}

/// Keeps at least `min_active_tournaments` automated tournaments alive.
pub async fn run_trending_orchestrator<S: Datastore>(
    store: &S,
    config: &AutomationConfig,
    now_ms: u64,
) -> ExecutionResult<TrendingReport> {
    let mut active_before = 0;
    for status in [
        TournamentStatus::Upcoming,
        TournamentStatus::RegistrationOpen,
        TournamentStatus::Ongoing,
    ] {
        active_before += store
            .tournaments_with_status(status)
            .await?
            .iter()
            .filter(|t| t.automation_enabled)
            .count();
    }

    let mut report = TrendingReport {
        active_before,
        created: Vec::new(),
    };
    let needed = config.min_active_tournaments.saturating_sub(active_before);
    if needed == 0 {
        return Ok(report);
    }

    let games = store.active_games().await?;
    if games.is_empty() {
        audit::record(
            store,
            AutomationType::TrendingOrchestrator,
            "no_active_game",
            false,
            json!({ "activeBefore": active_before, "needed": needed }),
            now_ms,
        )
        .await;
        return Err(ExecutionError::NoActiveGame);
    }
    let mut plays: HashMap<uuid::Uuid, usize> = HashMap::new();
    for challenge in store
        .challenges_created_since(now_ms.saturating_sub(config.trending_lookback_ms))
        .await?
    {
        *plays.entry(challenge.game_id).or_default() += 1;
    }
    let ranked = rank_trending_games(&games, &plays);

    for index in 0..needed {
        let game = &ranked[index % ranked.len()];
        let registration_start_ms = now_ms
            + config.registration_lead_ms
            + index as u64 * config.registration_stagger_ms;
        let registration_end_ms = registration_start_ms + config.registration_window_ms;
        let tournament = Tournament::new(
            format!("{} Trending Cup", game.name),
            game.id,
            config.tournament_entry_fee,
            config.tournament_max_participants,
            registration_start_ms,
            registration_end_ms,
            now_ms,
        );
        let created = CreatedTournament {
            tournament_id: tournament.id,
            name: tournament.name.clone(),
            game_id: game.id,
            entry_fee: tournament.entry_fee,
            registration_start_ms,
            registration_end_ms,
        };
        store.insert_tournament(tournament).await?;
        info!(tournament = %created.tournament_id, game = %game.name, registration_start_ms, "created trending tournament");
        report.created.push(created);
    }

    audit::record(
        store,
        AutomationType::TrendingOrchestrator,
        "tournaments_created",
        true,
        json!({
            "activeBefore": active_before,
            "created": report.created.iter().map(|c| c.tournament_id).collect::<Vec<_>>(),
        }),
        now_ms,
    )
    .await;
    Ok(report)
}
