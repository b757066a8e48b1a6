//! Tournament lifecycle operations: registration, start with round-one bracket, prize
//! distribution, cancellation and stuck-state release.

use crate::error::{ExecutionError, ExecutionResult};
use crate::lifecycle::{transition_tournament, Transition};
use crate::payout::{plan_payout, tournament_split};
use crate::settlement::{
    disburse, escrowed, notify_lines, refund_stakes, CloseAs, Disbursement, Stake, Unit,
};
use crate::store::Datastore;
use puosu_types::api::{
    EmergencyStopReport, PrizeDistributionReport, SettlementKind, SettlementSummary,
};
use puosu_types::wager::{
    MatchStatus, RefundType, Tournament, TournamentMatch, TournamentParticipant, TournamentStatus,
    TournamentUpdate, MIN_TOURNAMENT_PARTICIPANTS, PREMIUM_FEE_BPS, STANDARD_FEE_BPS,
};
use puosu_types::{LedgerError, Money, TournamentId, UserId};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

async fn load<S: Datastore>(store: &S, tournament_id: TournamentId) -> ExecutionResult<Tournament> {
    Ok(store
        .tournament(tournament_id)
        .await?
        .ok_or(LedgerError::NotFound("tournament"))?)
}

pub async fn open_registration<S: Datastore>(
    store: &S,
    tournament: &Tournament,
) -> ExecutionResult<Transition> {
    let transition = transition_tournament(
        store,
        tournament,
        TournamentStatus::RegistrationOpen,
        TournamentUpdate::default(),
    )
    .await?;
    if transition.applied() {
        info!(tournament = %tournament.id, name = %tournament.name, "registration opened");
    }
    Ok(transition)
}

/// Round-one pairings in registration order. An odd player out gets a bye that is already won.
pub fn bracket_round_one(
    tournament_id: TournamentId,
    participants: &[TournamentParticipant],
) -> Vec<TournamentMatch> {
    let mut seeded: Vec<&TournamentParticipant> = participants.iter().collect();
    seeded.sort_by_key(|p| (p.registered_at_ms, p.user_id));
    seeded
        .chunks(2)
        .enumerate()
        .map(|(slot, pair)| {
            let player_a = pair[0].user_id;
            let player_b = pair.get(1).map(|p| p.user_id);
            let bye = player_b.is_none();
            TournamentMatch {
                id: Uuid::new_v4(),
                tournament_id,
                round: 1,
                slot: slot as u32,
                player_a,
                player_b,
                status: if bye {
                    MatchStatus::Completed
                } else {
                    MatchStatus::Pending
                },
                winner_id: bye.then_some(player_a),
            }
        })
        .collect()
}

/// Moves a tournament into play and generates its first round.
pub async fn start_tournament<S: Datastore>(
    store: &S,
    tournament: &Tournament,
    now_ms: u64,
) -> ExecutionResult<Transition> {
    let participants = store.tournament_participants(tournament.id).await?;
    if tournament.status == TournamentStatus::RegistrationOpen
        && participants.len() < MIN_TOURNAMENT_PARTICIPANTS
    {
        return Err(ExecutionError::InvalidTransition {
            from: tournament.status.to_string(),
            to: format!(
                "{} (needs {MIN_TOURNAMENT_PARTICIPANTS} registrants, has {})",
                TournamentStatus::Ongoing,
                participants.len()
            ),
        });
    }
    let transition = transition_tournament(
        store,
        tournament,
        TournamentStatus::Ongoing,
        TournamentUpdate {
            started_at_ms: Some(now_ms),
            ..TournamentUpdate::default()
        },
    )
    .await?;
    if transition.applied() {
        let matches = bracket_round_one(tournament.id, &participants);
        let count = matches.len();
        store.insert_matches(matches).await?;
        info!(tournament = %tournament.id, participants = participants.len(), matches = count, "tournament started");
    }
    Ok(transition)
}

/// Rejects placements naming an outsider, naming a player twice or reusing a position.
fn check_placements(
    placements: &[(UserId, u32)],
    participants: &[TournamentParticipant],
) -> ExecutionResult<()> {
    let registered: HashSet<UserId> = participants.iter().map(|p| p.user_id).collect();
    let mut users = HashSet::new();
    let mut positions = HashSet::new();
    for (user_id, placement) in placements {
        if !registered.contains(user_id) {
            return Err(ExecutionError::InvalidRequest(format!(
                "{user_id} is not registered in this tournament"
            )));
        }
        if !users.insert(*user_id) {
            return Err(ExecutionError::InvalidRequest(format!(
                "{user_id} is placed more than once"
            )));
        }
        if !positions.insert(*placement) {
            return Err(ExecutionError::InvalidRequest(format!(
                "placement {placement} is given more than once"
            )));
        }
    }
    Ok(())
}

fn stakes_of(participants: &[TournamentParticipant]) -> Vec<Stake> {
    participants
        .iter()
        .map(|p| (p.user_id, p.entry_fee_paid))
        .collect()
}

/// Pays the prize pool of an ongoing tournament by final placement.
///
/// `placements` are written first when given; otherwise the stored placements are used. The fee
/// is the premium rate when the first-place winner has VIP access.
pub async fn distribute_prizes<S: Datastore>(
    store: &S,
    tournament_id: TournamentId,
    placements: Vec<(UserId, u32)>,
    now_ms: u64,
) -> ExecutionResult<PrizeDistributionReport> {
    let tournament = load(store, tournament_id).await?;
    if tournament.settled {
        return Err(ExecutionError::AlreadySettled);
    }
    if tournament.status != TournamentStatus::Ongoing {
        return Err(ExecutionError::InvalidTransition {
            from: tournament.status.to_string(),
            to: TournamentStatus::Completed.to_string(),
        });
    }
    if !placements.is_empty() {
        let registered = store.tournament_participants(tournament_id).await?;
        check_placements(&placements, &registered)?;
        store
            .set_tournament_placements(tournament_id, placements)
            .await?;
    }

    let participants = store.tournament_participants(tournament_id).await?;
    if participants.is_empty() {
        return Err(ExecutionError::NoParticipants);
    }
    let stakes = stakes_of(&participants);
    let gross = escrowed(&stakes, tournament.prize_pool)?;

    let mut placed: Vec<(u32, UserId)> = participants
        .iter()
        .filter_map(|p| p.placement.map(|placement| (placement, p.user_id)))
        .collect();
    if placed.len() < participants.len() {
        return Err(ExecutionError::IncompleteResults {
            expected: participants.len(),
            got: placed.len(),
        });
    }
    placed.sort();
    if placed.windows(2).any(|pair| pair[0].0 == pair[1].0) {
        return Err(ExecutionError::InvalidRequest(
            "stored placements share a position".into(),
        ));
    }
    let ranked: Vec<UserId> = placed.into_iter().map(|(_, user_id)| user_id).collect();

    let fee_bps = if store.has_vip_access(ranked[0]).await? {
        PREMIUM_FEE_BPS
    } else {
        STANDARD_FEE_BPS
    };
    let plan = plan_payout(gross, fee_bps, tournament_split(participants.len()), &ranked)?;

    if !store.secure_settle_tournament(tournament_id).await? {
        return Err(ExecutionError::AlreadySettled);
    }

    let unit = Unit::Tournament(tournament_id);
    let (status, settlement) = match disburse(store, unit, &plan, &stakes, now_ms).await? {
        Disbursement::Paid(lines) => {
            let winner_id = plan.winner();
            transition_tournament(
                store,
                &tournament,
                TournamentStatus::Completed,
                TournamentUpdate {
                    winner_id,
                    completed_at_ms: Some(now_ms),
                    ..TournamentUpdate::default()
                },
            )
            .await?;
            notify_lines(store, "tournament_prize", tournament_id, &lines, now_ms).await;
            info!(tournament = %tournament_id, gross = %plan.gross, fee = %plan.fee, fee_bps, "prizes distributed");
            (
                TournamentStatus::Completed,
                SettlementSummary {
                    unit_id: tournament_id,
                    kind: SettlementKind::Paid,
                    gross: plan.gross,
                    fee: plan.fee,
                    lines,
                    winner_id,
                    reason: None,
                },
            )
        }
        Disbursement::Refunded {
            refunds,
            fee_retained,
            cause,
        } => {
            transition_tournament(
                store,
                &tournament,
                TournamentStatus::Cancelled,
                TournamentUpdate {
                    completed_at_ms: Some(now_ms),
                    ..TournamentUpdate::default()
                },
            )
            .await?;
            notify_lines(store, "refund", tournament_id, &refunds, now_ms).await;
            warn!(tournament = %tournament_id, %cause, "tournament refunded after failed prize payout");
            (
                TournamentStatus::Cancelled,
                SettlementSummary {
                    unit_id: tournament_id,
                    kind: SettlementKind::Refunded,
                    gross,
                    fee: fee_retained,
                    lines: refunds,
                    winner_id: None,
                    reason: Some(cause),
                },
            )
        }
    };
    store.cancel_open_matches(tournament_id).await?;

    Ok(PrizeDistributionReport {
        tournament_id,
        status,
        fee_bps,
        settlement,
    })
}

async fn refund_tournament<S: Datastore>(
    store: &S,
    tournament: &Tournament,
    refund_type: RefundType,
    close_as: CloseAs,
    reason: &str,
    now_ms: u64,
) -> ExecutionResult<(SettlementSummary, u32)> {
    if tournament.settled {
        return Err(ExecutionError::AlreadySettled);
    }
    let target = match close_as {
        CloseAs::Cancelled => TournamentStatus::Cancelled,
        CloseAs::CompletedWithoutWinner => TournamentStatus::Completed,
    };
    if !tournament.status.can_transition_to(target) {
        return Err(ExecutionError::InvalidTransition {
            from: tournament.status.to_string(),
            to: target.to_string(),
        });
    }

    let participants = store.tournament_participants(tournament.id).await?;
    escrowed(&stakes_of(&participants), tournament.prize_pool)?;
    if !store.secure_settle_tournament(tournament.id).await? {
        return Err(ExecutionError::AlreadySettled);
    }
    // Registration is refused once the guard is held, so this read sees every entry fee.
    let participants = store.tournament_participants(tournament.id).await?;
    let stakes = stakes_of(&participants);
    let pool = load(store, tournament.id).await?.prize_pool;
    let gross = escrowed(&stakes, pool)?;
    let unit = Unit::Tournament(tournament.id);
    let (refunds, fee_retained) = refund_stakes(store, unit, &stakes, refund_type, now_ms).await?;
    transition_tournament(
        store,
        tournament,
        target,
        TournamentUpdate {
            completed_at_ms: Some(now_ms),
            ..TournamentUpdate::default()
        },
    )
    .await?;
    let matches_cancelled = store.cancel_open_matches(tournament.id).await?;
    notify_lines(store, "refund", tournament.id, &refunds, now_ms).await;
    info!(tournament = %tournament.id, %gross, refunds = refunds.len(), %target, reason, "tournament refunded");

    Ok((
        SettlementSummary {
            unit_id: tournament.id,
            kind: SettlementKind::Refunded,
            gross,
            fee: fee_retained,
            lines: refunds,
            winner_id: None,
            reason: Some(reason.to_string()),
        },
        matches_cancelled,
    ))
}

/// Cancels a non-terminal tournament, refunding every entry fee. A terminal tournament is
/// reported as such and left alone.
pub async fn cancel_tournament<S: Datastore>(
    store: &S,
    tournament_id: TournamentId,
    refund_type: RefundType,
    reason: &str,
    now_ms: u64,
) -> ExecutionResult<EmergencyStopReport> {
    let tournament = load(store, tournament_id).await?;
    if tournament.status.is_terminal() {
        return Ok(EmergencyStopReport {
            unit_id: tournament_id,
            already_terminal: true,
            refunds: Vec::new(),
            fee_retained: Money::ZERO,
            matches_cancelled: 0,
        });
    }
    let (summary, matches_cancelled) =
        refund_tournament(store, &tournament, refund_type, CloseAs::Cancelled, reason, now_ms)
            .await?;
    Ok(EmergencyStopReport {
        unit_id: tournament_id,
        already_terminal: false,
        refunds: summary.lines,
        fee_retained: summary.fee,
        matches_cancelled,
    })
}

/// Stuck-state release: distribute if every participant is placed, otherwise refund and
/// complete without a winner.
pub async fn force_complete_tournament<S: Datastore>(
    store: &S,
    tournament_id: TournamentId,
    now_ms: u64,
) -> ExecutionResult<SettlementSummary> {
    let tournament = load(store, tournament_id).await?;
    let participants = store.tournament_participants(tournament_id).await?;
    let placed = !participants.is_empty() && participants.iter().all(|p| p.placement.is_some());
    if placed {
        return Ok(distribute_prizes(store, tournament_id, Vec::new(), now_ms)
            .await?
            .settlement);
    }
    let (summary, _) = refund_tournament(
        store,
        &tournament,
        RefundType::Full,
        CloseAs::CompletedWithoutWinner,
        "stuck: placements incomplete at timeout",
        now_ms,
    )
    .await?;
    Ok(summary)
}
