//! Sweep scenarios against the in-memory store.

use crate::automation::{
    distribute_tournament_prizes, emergency_stop, run_market_action, run_payout_sweep,
    run_tournament_sweep, run_trending_orchestrator, AutomationConfig,
};
use crate::disputes::{resolve_disputes, INSUFFICIENT_EVIDENCE, RESOLVED_BY_PAYMENT};
use crate::error::ExecutionError;
use crate::health::evaluate_health;
use crate::lifecycle::start_challenge;
use crate::mocks::{active_game, funded_users, joined_challenge, record_placements, Memory};
use crate::results::{review_result, submit_result, verify_match, GameStatsSource, StatsError};
use crate::simulation::{run_simulation, SimulationParams, SIMULATED_SETTLEMENT_ACTION};
use crate::store::Datastore;
use crate::tournament::start_tournament;
use puosu_types::api::{
    DistributePrizesRequest, EmergencyStopRequest, HealthStatus, MarketAction, Placement,
    ReviewResultRequest, SettlementKind, SimRunnerRequest, SubmitResultRequest,
    VerificationOutcome,
};
use puosu_types::wager::{
    AuditEntry, AutomationType, Challenge, ChallengeStatus, ChallengeType, Dispute,
    DisputeStatus, DisputeType, MatchStats, MatchStatus, ProofStatus, RefundType, Tournament,
    TournamentStatus, TransactionReason, Wallet, WalletCredit, HOUR_MS, PLATFORM_ACCOUNT,
    SIMULATED_CRASH_ACTION,
};
use puosu_types::{ChallengeId, Money, TournamentId, UserId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

const NOW: u64 = 1_700_000_000_000;

async fn open_tournament(
    store: &Memory,
    entry_fee: Money,
    registrants: &[UserId],
) -> TournamentId {
    let mut tournament = Tournament::new(
        "Weekend Cup",
        Uuid::new_v4(),
        entry_fee,
        16,
        NOW - HOUR_MS,
        NOW + HOUR_MS,
        NOW - 2 * HOUR_MS,
    );
    tournament.status = TournamentStatus::RegistrationOpen;
    let id = tournament.id;
    store.insert_tournament(tournament).await.unwrap();
    for user in registrants {
        store.join_tournament_atomic(id, *user, NOW).await.unwrap();
    }
    id
}

#[tokio::test]
async fn test_sweep_opens_registration_when_due() {
    let store = Memory::new();
    let tournament = Tournament::new("Early", Uuid::new_v4(), Money::from_units(5), 8, NOW, NOW + HOUR_MS, NOW - HOUR_MS);
    let id = tournament.id;
    store.insert_tournament(tournament).await.unwrap();

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW - 1).await.unwrap();
    assert!(report.registrations_opened.is_empty());

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW).await.unwrap();
    assert_eq!(report.registrations_opened, vec![id]);
    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::RegistrationOpen);

    // Re-running is a no-op.
    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW).await.unwrap();
    assert!(report.registrations_opened.is_empty());
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_quorum_not_met_cancels_with_refunds() {
    let store = Memory::new();
    let users = funded_users(&store, 1, Money::from_units(5), false).await;
    let id = open_tournament(&store, Money::from_units(5), &users).await;
    assert_eq!(store.balance(users[0]), Money::ZERO);

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW + HOUR_MS)
        .await
        .unwrap();
    assert_eq!(report.tournaments_cancelled, vec![id]);
    assert!(report.tournaments_started.is_empty());

    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::Cancelled);
    assert!(t.settled);
    assert_eq!(store.balance(users[0]), Money::from_units(5));
}

#[tokio::test]
async fn test_quorum_met_starts_with_bracket() {
    let store = Memory::new();
    let users = funded_users(&store, 3, Money::from_units(5), false).await;
    let id = open_tournament(&store, Money::from_units(5), &users).await;

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW + HOUR_MS)
        .await
        .unwrap();
    assert_eq!(report.tournaments_started, vec![id]);

    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::Ongoing);
    assert_eq!(t.started_at_ms, Some(NOW + HOUR_MS));
    let matches = store.tournament_matches(id).await.unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(
        matches.iter().filter(|m| m.status == MatchStatus::Pending).count(),
        1
    );
}

#[tokio::test]
async fn test_stuck_tournament_without_placements_is_refunded_and_completed() {
    let store = Memory::new();
    let users = funded_users(&store, 4, Money::from_units(5), false).await;
    let id = open_tournament(&store, Money::from_units(5), &users).await;
    let start = NOW + HOUR_MS;
    run_tournament_sweep(&store, &AutomationConfig::default(), start).await.unwrap();

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), start + 6 * HOUR_MS - 1)
        .await
        .unwrap();
    assert!(report.tournaments_force_completed.is_empty());

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), start + 6 * HOUR_MS)
        .await
        .unwrap();
    assert_eq!(report.tournaments_force_completed, vec![id]);

    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::Completed);
    assert_eq!(t.winner_id, None);
    for user in &users {
        assert_eq!(store.balance(*user), Money::from_units(5));
    }
    let matches = store.tournament_matches(id).await.unwrap();
    assert!(matches.iter().all(|m| m.status != MatchStatus::Pending));
}

#[tokio::test]
async fn test_manual_tournament_still_force_completes_when_stuck() {
    let store = Memory::new();
    let users = funded_users(&store, 2, Money::from_units(5), false).await;
    let mut tournament = Tournament::new(
        "Organiser Night",
        Uuid::new_v4(),
        Money::from_units(5),
        8,
        NOW - HOUR_MS,
        NOW + HOUR_MS,
        NOW - 2 * HOUR_MS,
    );
    tournament.status = TournamentStatus::RegistrationOpen;
    tournament.automation_enabled = false;
    let id = tournament.id;
    store.insert_tournament(tournament).await.unwrap();
    for user in &users {
        store.join_tournament_atomic(id, *user, NOW).await.unwrap();
    }

    // Registration phases are left to the organiser.
    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW + HOUR_MS)
        .await
        .unwrap();
    assert!(report.tournaments_started.is_empty());

    let tournament = store.tournament(id).await.unwrap().unwrap();
    start_tournament(&store, &tournament, NOW).await.unwrap();

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW + 7 * HOUR_MS)
        .await
        .unwrap();
    assert_eq!(report.tournaments_force_completed, vec![id]);
    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::Completed);
    for user in &users {
        assert_eq!(store.balance(*user), Money::from_units(5));
    }
}

#[tokio::test]
async fn test_stuck_challenge_is_released_by_sweep() {
    let store = Memory::new();
    let users = funded_users(&store, 2, Money::from_units(10), false).await;
    let id = joined_challenge(&store, ChallengeType::OneVsOne, Money::from_units(10), &users, NOW).await;
    start_challenge(&store, id, NOW).await.unwrap();

    let report = run_tournament_sweep(&store, &AutomationConfig::default(), NOW + 6 * HOUR_MS)
        .await
        .unwrap();
    assert_eq!(report.challenges_force_completed, vec![id]);
    let challenge = store.challenge(id).await.unwrap().unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Completed);
    assert_eq!(store.balance(users[0]), Money::from_units(10));
}

#[tokio::test]
async fn test_vip_winner_gets_premium_rate() {
    let store = Memory::new();
    let mut users = funded_users(&store, 3, Money::from_units(10), false).await;
    let vip = Uuid::new_v4();
    store
        .create_wallet(Wallet {
            user_id: vip,
            balance: Money::from_units(10),
            is_test: false,
            vip: true,
        })
        .await
        .unwrap();
    users.push(vip);
    let id = open_tournament(&store, Money::from_units(10), &users).await;
    run_tournament_sweep(&store, &AutomationConfig::default(), NOW + HOUR_MS).await.unwrap();

    let placements = [vip, users[0], users[1], users[2]]
        .iter()
        .enumerate()
        .map(|(i, user_id)| Placement {
            user_id: *user_id,
            placement: i as u32 + 1,
        })
        .collect();
    let report = distribute_tournament_prizes(
        &store,
        DistributePrizesRequest {
            tournament_id: id,
            manual: true,
            placements,
        },
        NOW + 2 * HOUR_MS,
    )
    .await
    .unwrap();

    // 4 players: 70/30 of $38 net after the $2 premium fee.
    assert_eq!(report.fee_bps, 500);
    assert_eq!(report.status, TournamentStatus::Completed);
    assert_eq!(report.settlement.fee, Money::from_units(2));
    assert_eq!(store.balance(vip), Money::from_cents(2660));
    assert_eq!(store.balance(users[0]), Money::from_cents(1140));
    assert_eq!(store.balance(PLATFORM_ACCOUNT), Money::from_units(2));
    assert_eq!(report.settlement.distributed(), Money::from_units(40));

    let again = distribute_tournament_prizes(
        &store,
        DistributePrizesRequest {
            tournament_id: id,
            manual: true,
            placements: Vec::new(),
        },
        NOW + 3 * HOUR_MS,
    )
    .await;
    assert_eq!(again.unwrap_err(), ExecutionError::AlreadySettled);
}

#[tokio::test]
async fn test_malformed_placements_write_and_pay_nothing() {
    let store = Memory::new();
    let users = funded_users(&store, 3, Money::from_units(10), false).await;
    let id = open_tournament(&store, Money::from_units(10), &users).await;
    run_tournament_sweep(&store, &AutomationConfig::default(), NOW + HOUR_MS).await.unwrap();
    let outsider = Uuid::new_v4();

    let standings = |rows: &[(UserId, u32)]| DistributePrizesRequest {
        tournament_id: id,
        manual: true,
        placements: rows
            .iter()
            .map(|(user_id, placement)| Placement {
                user_id: *user_id,
                placement: *placement,
            })
            .collect(),
    };
    let rejected = [
        standings(&[(users[0], 1), (users[1], 1), (users[2], 2)]),
        standings(&[(users[0], 1), (users[0], 2), (users[2], 3)]),
        standings(&[(users[0], 1), (users[1], 2), (outsider, 3)]),
    ];
    for request in rejected {
        let err = distribute_tournament_prizes(&store, request, NOW + 2 * HOUR_MS)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidRequest(_)), "{err:?}");
    }

    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::Ongoing);
    assert!(!t.settled);
    assert_eq!(t.prize_pool, Money::from_units(30));
    let participants = store.tournament_participants(id).await.unwrap();
    assert!(participants.iter().all(|p| p.placement.is_none()));
    for user in &users {
        assert_eq!(store.balance(*user), Money::ZERO);
    }
    assert_eq!(store.balance(PLATFORM_ACCOUNT), Money::ZERO);

    let report = distribute_tournament_prizes(
        &store,
        standings(&[(users[2], 1), (users[0], 2), (users[1], 3)]),
        NOW + 2 * HOUR_MS,
    )
    .await
    .unwrap();
    assert_eq!(report.status, TournamentStatus::Completed);
    assert_eq!(report.settlement.winner_id, Some(users[2]));
}

#[tokio::test]
async fn test_emergency_stop_partial_refund_cancels_matches() {
    let store = Memory::new();
    let users = funded_users(&store, 2, Money::from_units(10), false).await;
    let id = open_tournament(&store, Money::from_units(10), &users).await;
    run_tournament_sweep(&store, &AutomationConfig::default(), NOW + HOUR_MS).await.unwrap();

    let request = EmergencyStopRequest {
        tournament_id: Some(id),
        challenge_id: None,
        reason: "game server outage".into(),
        refund_type: RefundType::Partial,
    };
    let report = emergency_stop(&store, &request, NOW + 2 * HOUR_MS).await.unwrap();
    assert!(!report.already_terminal);
    assert_eq!(report.matches_cancelled, 1);
    assert_eq!(report.fee_retained, Money::from_units(2));
    assert_eq!(store.balance(users[0]), Money::from_units(9));

    let t = store.tournament(id).await.unwrap().unwrap();
    assert_eq!(t.status, TournamentStatus::Cancelled);

    let again = emergency_stop(&store, &request, NOW + 3 * HOUR_MS).await.unwrap();
    assert!(again.already_terminal);
    assert!(again.refunds.is_empty());
    assert_eq!(store.balance(users[0]), Money::from_units(9));
}

#[tokio::test]
async fn test_emergency_stop_rejects_ambiguous_target() {
    let store = Memory::new();
    let request = EmergencyStopRequest {
        tournament_id: Some(Uuid::new_v4()),
        challenge_id: Some(Uuid::new_v4()),
        reason: "both".into(),
        refund_type: RefundType::Full,
    };
    let err = emergency_stop(&store, &request, NOW).await.unwrap_err();
    assert!(err.is_invalid_request());

    let request = EmergencyStopRequest {
        tournament_id: None,
        challenge_id: Some(Uuid::new_v4()),
        reason: "  ".into(),
        refund_type: RefundType::Full,
    };
    assert!(emergency_stop(&store, &request, NOW).await.unwrap_err().is_invalid_request());
}

#[tokio::test]
async fn test_payout_sweep_settles_only_ready_challenges() {
    let store = Memory::new();
    let users = funded_users(&store, 4, Money::from_units(10), false).await;
    let ready = joined_challenge(&store, ChallengeType::OneVsOne, Money::from_units(10), &users[..2], NOW).await;
    let waiting = joined_challenge(&store, ChallengeType::OneVsOne, Money::from_units(10), &users[2..], NOW).await;
    start_challenge(&store, ready, NOW).await.unwrap();
    start_challenge(&store, waiting, NOW).await.unwrap();
    record_placements(&store, ready, &users[..2], NOW).await;

    let report = run_payout_sweep(&store, None, NOW).await.unwrap();
    assert_eq!(report.settlements.len(), 1);
    assert_eq!(report.settlements[0].unit_id, ready);
    assert!(report.skipped.is_empty());

    let report = run_payout_sweep(&store, Some(waiting), NOW).await.unwrap();
    assert!(report.settlements.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].unit_id, waiting);
}

#[tokio::test]
async fn test_market_engine_actions() {
    let store = Memory::new();
    let users = funded_users(&store, 2, Money::from_units(10), false).await;
    let challenge = Challenge::new(users[0], Uuid::new_v4(), ChallengeType::OneVsOne, Money::from_units(3), 2, NOW);
    let id = challenge.id;
    store.insert_challenge(challenge).await.unwrap();

    for user_id in &users {
        let report = run_market_action(&store, &MarketAction::Join { challenge_id: id, user_id: *user_id }, NOW)
            .await
            .unwrap();
        assert_eq!(report.status, ChallengeStatus::Open);
    }
    let report = run_market_action(&store, &MarketAction::Start { challenge_id: id }, NOW).await.unwrap();
    assert_eq!(report.status, ChallengeStatus::Active);

    let err = run_market_action(&store, &MarketAction::Settle { challenge_id: id }, NOW).await.unwrap_err();
    assert!(matches!(err, ExecutionError::IncompleteResults { .. }));

    let report = run_market_action(
        &store,
        &MarketAction::Refund {
            challenge_id: id,
            reason: "abandoned".into(),
        },
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(report.status, ChallengeStatus::Cancelled);
    assert_eq!(report.settlement.map(|s| s.kind), Some(SettlementKind::Refunded));
    assert_eq!(store.balance(users[1]), Money::from_units(10));

    let audits = store.audits();
    assert!(audits.iter().any(|e| e.automation_type == AutomationType::AtomicMarketEngine && e.action_type == "settle" && !e.success));
}

#[tokio::test]
async fn test_trending_keeps_two_tournaments() {
    let store = Memory::new();
    let popular = active_game(&store, "Valorant").await;
    active_game(&store, "Apex").await;
    let users = funded_users(&store, 2, Money::from_units(10), false).await;
    for _ in 0..3 {
        let challenge = Challenge::new(users[0], popular, ChallengeType::OneVsOne, Money::from_units(1), 2, NOW - HOUR_MS);
        store.insert_challenge(challenge).await.unwrap();
    }

    let config = AutomationConfig::default();
    let report = run_trending_orchestrator(&store, &config, NOW).await.unwrap();
    assert_eq!(report.active_before, 0);
    assert_eq!(report.created.len(), 2);
    assert_eq!(report.created[0].game_id, popular);
    assert_ne!(report.created[1].game_id, popular);
    assert_eq!(
        report.created[1].registration_start_ms - report.created[0].registration_start_ms,
        config.registration_stagger_ms
    );

    let report = run_trending_orchestrator(&store, &config, NOW).await.unwrap();
    assert_eq!(report.active_before, 2);
    assert!(report.created.is_empty());
}

#[tokio::test]
async fn test_trending_without_games_fails() {
    let store = Memory::new();
    let err = run_trending_orchestrator(&store, &AutomationConfig::default(), NOW)
        .await
        .unwrap_err();
    assert_eq!(err, ExecutionError::NoActiveGame);
}

fn sim_params(crash_probability: f64) -> SimulationParams {
    let request = SimRunnerRequest {
        participants: Some(3),
        stake: Some(Money::from_units(10)),
        crash_probability: Some(crash_probability),
        ..SimRunnerRequest::default()
    };
    SimulationParams::resolve(&AutomationConfig::default().simulation, &request).unwrap()
}

#[tokio::test]
async fn test_simulated_crash_refunds_three_players() {
    let store = Memory::new();
    active_game(&store, "Rocket League").await;
    let users = funded_users(&store, 3, Money::from_units(10), true).await;
    let mut rng = StdRng::seed_from_u64(7);

    let report = run_simulation(&store, &sim_params(1.0), &mut rng, NOW).await.unwrap();
    assert!(report.crashed);
    assert!(!report.crash_suppressed);
    assert_eq!(report.settlement.kind, SettlementKind::Refunded);

    for user in &users {
        assert_eq!(store.balance(*user), Money::from_units(10));
        let refunds = store
            .wallet_transactions(*user)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.reason == TransactionReason::Refund)
            .count();
        assert_eq!(refunds, 1);
    }
    let challenge = store.challenge(report.challenge_id).await.unwrap().unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Cancelled);
    assert!(challenge.is_simulation);

    let latest = store.latest_audit(AutomationType::SimRunner).await.unwrap().unwrap();
    assert_eq!(latest.action_type, SIMULATED_CRASH_ACTION);
}

#[tokio::test]
async fn test_simulation_without_crash_settles() {
    let store = Memory::new();
    active_game(&store, "Rocket League").await;
    funded_users(&store, 3, Money::from_units(10), true).await;
    let before = store.total_balance();
    let mut rng = StdRng::seed_from_u64(11);

    let report = run_simulation(&store, &sim_params(0.0), &mut rng, NOW).await.unwrap();
    assert!(!report.crashed);
    assert_eq!(report.settlement.kind, SettlementKind::Paid);
    assert_eq!(report.settlement.fee, Money::from_units(3));
    assert_eq!(store.balance(PLATFORM_ACCOUNT), Money::from_units(3));
    assert_eq!(store.total_balance(), before);

    let latest = store.latest_audit(AutomationType::SimRunner).await.unwrap().unwrap();
    assert_eq!(latest.action_type, SIMULATED_SETTLEMENT_ACTION);
}

#[tokio::test]
async fn test_no_two_simulated_crashes_in_a_row() {
    let store = Memory::new();
    active_game(&store, "Rocket League").await;
    funded_users(&store, 3, Money::from_units(100), true).await;
    let mut rng = StdRng::seed_from_u64(3);

    let first = run_simulation(&store, &sim_params(1.0), &mut rng, NOW).await.unwrap();
    assert!(first.crashed);
    let second = run_simulation(&store, &sim_params(1.0), &mut rng, NOW + HOUR_MS).await.unwrap();
    assert!(!second.crashed);
    assert!(second.crash_suppressed);
    assert_eq!(second.settlement.kind, SettlementKind::Paid);
    let third = run_simulation(&store, &sim_params(1.0), &mut rng, NOW + 2 * HOUR_MS).await.unwrap();
    assert!(third.crashed);
}

#[tokio::test]
async fn test_simulation_needs_enough_test_users() {
    let store = Memory::new();
    active_game(&store, "Rocket League").await;
    funded_users(&store, 2, Money::from_units(10), true).await;
    funded_users(&store, 5, Money::from_units(10), false).await;
    let mut rng = StdRng::seed_from_u64(1);

    let err = run_simulation(&store, &sim_params(0.0), &mut rng, NOW).await.unwrap_err();
    assert_eq!(
        err,
        ExecutionError::InsufficientTestUsers {
            needed: 3,
            found: 2
        }
    );
    let latest = store.latest_audit(AutomationType::SimRunner).await.unwrap().unwrap();
    assert!(!latest.success);
}

#[tokio::test]
async fn test_dispute_evidence_window() {
    let store = Memory::new();
    let raiser = funded_users(&store, 1, Money::from_units(1), false).await[0];
    let young = Dispute::new(raiser, DisputeType::Result, "wrong winner", NOW - 47 * HOUR_MS);
    let old = Dispute::new(raiser, DisputeType::Result, "wrong winner", NOW - 49 * HOUR_MS);
    let (young_id, old_id) = (young.id, old.id);
    store.insert_dispute(young).await.unwrap();
    store.insert_dispute(old).await.unwrap();

    let report = resolve_disputes(&store, NOW).await.unwrap();
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].dispute_id, old_id);
    assert_eq!(report.resolved[0].status, DisputeStatus::Dismissed);
    assert_eq!(report.resolved[0].reason, INSUFFICIENT_EVIDENCE);
    assert_eq!(report.still_pending, 1);

    let disputes = store.disputes();
    let young = disputes.iter().find(|d| d.id == young_id).unwrap();
    assert_eq!(young.status, DisputeStatus::Pending);
    assert_eq!(store.notifications(raiser).await.unwrap().len(), 1);
    assert!(store
        .audits()
        .iter()
        .any(|e| e.automation_type == AutomationType::DisputeResolver));
}

#[tokio::test]
async fn test_payment_dispute_resolved_by_recent_payment() {
    let store = Memory::new();
    let raiser = funded_users(&store, 1, Money::ZERO, false).await[0];
    store
        .increment_wallet_balance(
            WalletCredit::new(raiser, Money::from_units(20), TransactionReason::Deposit),
            NOW - 2 * HOUR_MS,
        )
        .await
        .unwrap();
    let mut dispute = Dispute::new(raiser, DisputeType::Payment, "deposit missing", NOW - HOUR_MS);
    dispute.evidence_urls.push("https://receipts.example/1".into());
    store.insert_dispute(dispute).await.unwrap();

    let report = resolve_disputes(&store, NOW).await.unwrap();
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].status, DisputeStatus::Resolved);
    assert_eq!(report.resolved[0].reason, RESOLVED_BY_PAYMENT);
}

struct FixedStats {
    stats: Mutex<HashMap<UserId, MatchStats>>,
}

impl GameStatsSource for FixedStats {
    async fn fetch_stats(&self, _challenge: &Challenge, user_id: UserId) -> Result<MatchStats, StatsError> {
        self.stats
            .lock()
            .unwrap()
            .get(&user_id)
            .copied()
            .ok_or_else(|| StatsError::Unavailable("timeout".into()))
    }
}

fn stats(score: i64) -> MatchStats {
    MatchStats {
        score,
        kills: 8,
        deaths: 4,
        assists: 2,
    }
}

async fn active_pair(store: &Memory) -> (ChallengeId, Vec<UserId>) {
    let users = funded_users(store, 2, Money::from_units(10), false).await;
    let id = joined_challenge(store, ChallengeType::OneVsOne, Money::from_units(10), &users, NOW).await;
    start_challenge(store, id, NOW).await.unwrap();
    (id, users)
}

#[tokio::test]
async fn test_verify_match_unavailable_leaves_challenge_alone() {
    let store = Memory::new();
    let (id, users) = active_pair(&store).await;
    let source = FixedStats {
        stats: Mutex::new(HashMap::from([(users[0], stats(900))])),
    };

    let report = verify_match(&store, &source, id, NOW).await.unwrap();
    assert_eq!(report.outcome, VerificationOutcome::ResultUnavailable);
    assert_eq!(report.unavailable, vec![users[1]]);
    assert!(store.challenge_results(id).await.unwrap().is_empty());
    let challenge = store.challenge(id).await.unwrap().unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Active);

    source.stats.lock().unwrap().insert(users[1], stats(1_500));
    let report = verify_match(&store, &source, id, NOW).await.unwrap();
    assert_eq!(report.outcome, VerificationOutcome::Recorded);
    let results = store.challenge_results(id).await.unwrap();
    let winner = results.iter().find(|r| r.placement == 1).unwrap();
    assert_eq!(winner.user_id, users[1]);
    assert!(results.iter().all(|r| r.status == ProofStatus::Verified));

    let report = verify_match(&store, &source, id, NOW).await.unwrap();
    assert_eq!(report.outcome, VerificationOutcome::AlreadyComplete);
}

#[tokio::test]
async fn test_suspicious_submission_needs_review() {
    let store = Memory::new();
    let (id, users) = active_pair(&store).await;

    let report = submit_result(
        &store,
        SubmitResultRequest {
            challenge_id: id,
            user_id: users[0],
            placement: 1,
            stats: MatchStats {
                score: 5_000,
                kills: 45,
                deaths: 1,
                assists: 0,
            },
            proof_url: Some("https://clips.example/ace".into()),
        },
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(report.status, ProofStatus::Flagged);

    submit_result(
        &store,
        SubmitResultRequest {
            challenge_id: id,
            user_id: users[1],
            placement: 2,
            stats: stats(300),
            proof_url: None,
        },
        NOW,
    )
    .await
    .unwrap();

    let sweep = run_payout_sweep(&store, None, NOW).await.unwrap();
    assert!(sweep.settlements.is_empty());

    let reviewed = review_result(
        &store,
        ReviewResultRequest {
            challenge_id: id,
            user_id: users[0],
            approve: true,
            moderator_note: Some("clip checks out".into()),
        },
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(reviewed.status, ProofStatus::Verified);

    let sweep = run_payout_sweep(&store, None, NOW).await.unwrap();
    assert_eq!(sweep.settlements.len(), 1);
    assert_eq!(sweep.settlements[0].winner_id, Some(users[0]));
}

#[tokio::test]
async fn test_outsiders_cannot_submit() {
    let store = Memory::new();
    let (id, _) = active_pair(&store).await;
    let outsider = Uuid::new_v4();
    let err = submit_result(
        &store,
        SubmitResultRequest {
            challenge_id: id,
            user_id: outsider,
            placement: 1,
            stats: stats(100),
            proof_url: None,
        },
        NOW,
    )
    .await
    .unwrap_err();
    assert_eq!(err, ExecutionError::NotParticipant(outsider));
}

#[tokio::test]
async fn test_health_reports_stuck_units() {
    let store = Memory::new();
    let config = AutomationConfig::default();
    active_pair(&store).await;

    store
        .append_audit(AuditEntry::new(
            AutomationType::SimRunner,
            "simulation_failed",
            false,
            serde_json::json!({}),
            NOW,
        ))
        .await
        .unwrap();
    let report = evaluate_health(&store, &config, None, NOW + HOUR_MS).await.unwrap();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.metrics.active_challenges, 1);
    assert_eq!(report.metrics.automation_failures_last_hour, 1);

    let report = evaluate_health(&store, &config, None, NOW + 6 * HOUR_MS).await.unwrap();
    assert_eq!(report.status, HealthStatus::Critical);
    assert_eq!(report.metrics.stuck_challenges, 1);
    assert!(report.issues.iter().any(|i| i.code == "stuck_units"));
}
