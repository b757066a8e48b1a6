//! Settlement engine.
//!
//! Every settlement takes the unit's settle guard before the first credit and then either pays
//! the full plan or falls back to refunding every stake. A payout that fails partway is never
//! retried: the lines already credited are reversed and the unit is refunded instead.

use crate::audit;
use crate::error::{ExecutionError, ExecutionResult};
use crate::lifecycle::transition_challenge;
use crate::payout::{challenge_split, plan_payout, rank_results, PayoutPlan};
use crate::store::Datastore;
use puosu_types::api::{PayoutLine, SettlementKind, SettlementSummary};
use puosu_types::wager::{
    AutomationType, ChallengeStatus, ChallengeUpdate, Notification, RefundType,
    TransactionReason, WalletCredit, PLATFORM_ACCOUNT, STANDARD_FEE_BPS,
};
use puosu_types::{ChallengeId, LedgerError, Money, TournamentId, UserId};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The wagering unit money is moving for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Unit {
    Challenge(ChallengeId),
    Tournament(TournamentId),
}

impl Unit {
    pub(crate) fn id(self) -> Uuid {
        match self {
            Self::Challenge(id) | Self::Tournament(id) => id,
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Self::Challenge(_) => "challenge",
            Self::Tournament(_) => "tournament",
        }
    }

    fn payout_reason(self) -> TransactionReason {
        match self {
            Self::Challenge(_) => TransactionReason::ChallengePayout,
            Self::Tournament(_) => TransactionReason::TournamentPrize,
        }
    }

    fn automation(self) -> AutomationType {
        match self {
            Self::Challenge(_) => AutomationType::WalletPayouts,
            Self::Tournament(_) => AutomationType::TournamentPrizes,
        }
    }

    fn credit(self, user_id: UserId, amount: Money, reason: TransactionReason) -> WalletCredit {
        let credit = WalletCredit::new(user_id, amount, reason);
        match self {
            Self::Challenge(id) => credit.for_challenge(id),
            Self::Tournament(id) => credit.for_tournament(id),
        }
    }
}

/// How a unit ends when its stakes are returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseAs {
    Cancelled,
    /// Stuck-state recovery: the unit is released as completed with no winner.
    CompletedWithoutWinner,
}

#[derive(Clone, Copy, Debug)]
struct Credited {
    user_id: UserId,
    amount: Money,
    placement: Option<u32>,
}

/// What happened to a unit's money after the guard was taken.
#[derive(Debug)]
pub(crate) enum Disbursement {
    Paid(Vec<PayoutLine>),
    Refunded {
        refunds: Vec<PayoutLine>,
        fee_retained: Money,
        cause: String,
    },
}

/// Stake each participant paid into the unit.
pub(crate) type Stake = (UserId, Money);

/// Credits the plan in order (placements first, fee last). On the first failure the credited
/// lines are reversed and every stake is refunded in full.
pub(crate) async fn disburse<S: Datastore>(
    store: &S,
    unit: Unit,
    plan: &PayoutPlan,
    stakes: &[Stake],
    now_ms: u64,
) -> ExecutionResult<Disbursement> {
    let reason = unit.payout_reason();
    let mut pending: Vec<(WalletCredit, Option<u32>)> = plan
        .lines
        .iter()
        .filter(|line| line.amount.is_positive())
        .map(|line| {
            (
                unit.credit(line.user_id, line.amount, reason)
                    .with_metadata(json!({ "placement": line.placement, "fee_bps": plan.fee_bps })),
                Some(line.placement),
            )
        })
        .collect();
    if plan.fee.is_positive() {
        pending.push((
            unit.credit(PLATFORM_ACCOUNT, plan.fee, TransactionReason::PlatformFee)
                .with_metadata(json!({ "fee_bps": plan.fee_bps })),
            None,
        ));
    }

    let mut credited: Vec<Credited> = Vec::with_capacity(pending.len());
    for (credit, placement) in pending {
        let (user_id, amount) = (credit.user_id, credit.amount);
        match store.increment_wallet_balance(credit, now_ms).await {
            Ok(_) => credited.push(Credited {
                user_id,
                amount,
                placement,
            }),
            Err(err) => {
                error!(unit = %unit.id(), kind = unit.kind(), user = %user_id, ?err, paid = credited.len(), "payout line failed, compensating");
                reverse(store, unit, &credited, &err, now_ms).await?;
                let (refunds, fee_retained) =
                    refund_stakes(store, unit, stakes, RefundType::Full, now_ms).await?;
                return Ok(Disbursement::Refunded {
                    refunds,
                    fee_retained,
                    cause: format!("payout failed: {err}"),
                });
            }
        }
    }

    Ok(Disbursement::Paid(
        credited
            .into_iter()
            .filter_map(|line| {
                line.placement.map(|placement| PayoutLine {
                    user_id: line.user_id,
                    amount: line.amount,
                    placement: Some(placement),
                })
            })
            .collect(),
    ))
}

async fn reverse<S: Datastore>(
    store: &S,
    unit: Unit,
    credited: &[Credited],
    cause: &LedgerError,
    now_ms: u64,
) -> ExecutionResult<()> {
    for (index, line) in credited.iter().enumerate().rev() {
        let credit = unit
            .credit(line.user_id, -line.amount, TransactionReason::PayoutReversal)
            .with_metadata(json!({ "cause": cause.to_string() }));
        if let Err(err) = store.increment_wallet_balance(credit, now_ms).await {
            let unreversed: Vec<_> = credited[..=index]
                .iter()
                .map(|l| json!({ "userId": l.user_id, "amount": l.amount }))
                .collect();
            audit::record(
                store,
                unit.automation(),
                "compensation_failed",
                false,
                json!({
                    "unitId": unit.id(),
                    "unitKind": unit.kind(),
                    "payoutError": cause.to_string(),
                    "reversalError": err.to_string(),
                    "unreversedLines": unreversed,
                }),
                now_ms,
            )
            .await;
            return Err(ExecutionError::CompensationFailed {
                paid: index + 1,
                cause: err.to_string(),
            });
        }
    }
    Ok(())
}

/// Returns every stake. A `Partial` refund keeps the standard fee on the platform account.
///
/// All lines are attempted; if any fails the unit is audited for manual remediation and
/// `CompensationFailed` is returned.
pub(crate) async fn refund_stakes<S: Datastore>(
    store: &S,
    unit: Unit,
    stakes: &[Stake],
    refund_type: RefundType,
    now_ms: u64,
) -> ExecutionResult<(Vec<PayoutLine>, Money)> {
    let mut refunds = Vec::with_capacity(stakes.len());
    let mut retained = Money::ZERO;
    let mut failed = Vec::new();

    for (user_id, stake) in stakes {
        let fee = match refund_type {
            RefundType::Full => Money::ZERO,
            RefundType::Partial => stake.fee_at(STANDARD_FEE_BPS),
        };
        let amount = *stake - fee;
        if amount.is_positive() {
            let credit = unit
                .credit(*user_id, amount, TransactionReason::Refund)
                .with_metadata(json!({ "refundType": refund_type, "stake": stake }));
            if let Err(err) = store.increment_wallet_balance(credit, now_ms).await {
                error!(unit = %unit.id(), user = %user_id, ?err, "refund line failed");
                failed.push(json!({ "userId": user_id, "amount": amount, "error": err.to_string() }));
                continue;
            }
        }
        refunds.push(PayoutLine {
            user_id: *user_id,
            amount,
            placement: None,
        });
        if fee.is_positive() {
            let credit = unit
                .credit(PLATFORM_ACCOUNT, fee, TransactionReason::PlatformFee)
                .with_metadata(json!({ "refundType": refund_type, "userId": user_id }));
            match store.increment_wallet_balance(credit, now_ms).await {
                Ok(_) => retained += fee,
                Err(err) => {
                    error!(unit = %unit.id(), user = %user_id, ?err, "retained fee line failed");
                    failed.push(json!({ "userId": PLATFORM_ACCOUNT, "amount": fee, "error": err.to_string() }));
                }
            }
        }
    }

    if !failed.is_empty() {
        let count = failed.len();
        audit::record(
            store,
            unit.automation(),
            "refund_incomplete",
            false,
            json!({ "unitId": unit.id(), "unitKind": unit.kind(), "failedLines": failed }),
            now_ms,
        )
        .await;
        return Err(ExecutionError::CompensationFailed {
            paid: refunds.len(),
            cause: format!("{count} refund lines failed"),
        });
    }
    Ok((refunds, retained))
}

pub(crate) async fn notify_lines<S: Datastore>(
    store: &S,
    kind: &str,
    reference_id: Uuid,
    lines: &[PayoutLine],
    now_ms: u64,
) {
    for line in lines {
        let message = match line.placement {
            Some(placement) => format!("You placed #{placement} and won {}", line.amount),
            None => format!("{} has been returned to your wallet", line.amount),
        };
        let notification = Notification::new(line.user_id, kind, message, Some(reference_id), now_ms);
        if let Err(err) = store.notify(notification).await {
            warn!(user = %line.user_id, ?err, "failed to record notification");
        }
    }
}

/// Sum of stakes, checked against the unit's recorded pot.
pub(crate) fn escrowed(stakes: &[Stake], recorded: Money) -> ExecutionResult<Money> {
    let escrowed: Money = stakes.iter().map(|(_, stake)| *stake).sum();
    if escrowed != recorded {
        return Err(ExecutionError::PotMismatch { recorded, escrowed });
    }
    Ok(escrowed)
}

/// Pays out an active challenge whose results are complete.
pub async fn settle_challenge<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
    fee_bps: u32,
    now_ms: u64,
) -> ExecutionResult<SettlementSummary> {
    let challenge = store
        .challenge(challenge_id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;
    if challenge.settled {
        return Err(ExecutionError::AlreadySettled);
    }
    if challenge.status != ChallengeStatus::Active {
        return Err(ExecutionError::InvalidTransition {
            from: challenge.status.to_string(),
            to: ChallengeStatus::Completed.to_string(),
        });
    }

    let participants = store.challenge_participants(challenge_id).await?;
    if participants.is_empty() {
        return Err(ExecutionError::NoParticipants);
    }
    let stakes: Vec<Stake> = participants
        .iter()
        .map(|p| (p.user_id, p.stake_paid))
        .collect();
    let gross = escrowed(&stakes, challenge.total_pot)?;

    let results: Vec<_> = store
        .challenge_results(challenge_id)
        .await?
        .into_iter()
        .filter(|r| participants.iter().any(|p| p.user_id == r.user_id))
        .collect();
    if results.len() < participants.len() {
        return Err(ExecutionError::IncompleteResults {
            expected: participants.len(),
            got: results.len(),
        });
    }
    if results.iter().any(|r| r.status.blocks_settlement()) {
        return Err(ExecutionError::ReviewRequired);
    }

    let ranked = rank_results(&results);
    let plan = plan_payout(gross, fee_bps, challenge_split(challenge.challenge_type), &ranked)?;

    if !store.secure_settle_challenge(challenge_id).await? {
        return Err(ExecutionError::AlreadySettled);
    }

    let unit = Unit::Challenge(challenge_id);
    match disburse(store, unit, &plan, &stakes, now_ms).await? {
        Disbursement::Paid(lines) => {
            let winner_id = plan.winner();
            transition_challenge(
                store,
                &challenge,
                ChallengeStatus::Completed,
                ChallengeUpdate {
                    winner_id,
                    end_at_ms: Some(now_ms),
                    ..ChallengeUpdate::default()
                },
            )
            .await?;
            notify_lines(store, "challenge_payout", challenge_id, &lines, now_ms).await;
            info!(challenge = %challenge_id, gross = %plan.gross, fee = %plan.fee, lines = lines.len(), "challenge settled");
            Ok(SettlementSummary {
                unit_id: challenge_id,
                kind: SettlementKind::Paid,
                gross: plan.gross,
                fee: plan.fee,
                lines,
                winner_id,
                reason: None,
            })
        }
        Disbursement::Refunded {
            refunds,
            fee_retained,
            cause,
        } => {
            transition_challenge(
                store,
                &challenge,
                ChallengeStatus::Cancelled,
                ChallengeUpdate {
                    end_at_ms: Some(now_ms),
                    ..ChallengeUpdate::default()
                },
            )
            .await?;
            notify_lines(store, "refund", challenge_id, &refunds, now_ms).await;
            warn!(challenge = %challenge_id, %cause, "challenge refunded after failed payout");
            Ok(SettlementSummary {
                unit_id: challenge_id,
                kind: SettlementKind::Refunded,
                gross,
                fee: fee_retained,
                lines: refunds,
                winner_id: None,
                reason: Some(cause),
            })
        }
    }
}

/// Returns every stake of a non-terminal challenge and closes it.
pub async fn refund_challenge<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
    refund_type: RefundType,
    close_as: CloseAs,
    reason: &str,
    now_ms: u64,
) -> ExecutionResult<SettlementSummary> {
    let challenge = store
        .challenge(challenge_id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;
    if challenge.settled {
        return Err(ExecutionError::AlreadySettled);
    }
    let target = match close_as {
        CloseAs::Cancelled => ChallengeStatus::Cancelled,
        CloseAs::CompletedWithoutWinner => ChallengeStatus::Completed,
    };
    if !challenge.status.can_transition_to(target) {
        return Err(ExecutionError::InvalidTransition {
            from: challenge.status.to_string(),
            to: target.to_string(),
        });
    }

    escrowed(&challenge_stakes(store, challenge_id).await?, challenge.total_pot)?;
    if !store.secure_settle_challenge(challenge_id).await? {
        return Err(ExecutionError::AlreadySettled);
    }
    // Joins are refused once the guard is held, so this read sees every stake.
    let stakes = challenge_stakes(store, challenge_id).await?;
    let pot = store
        .challenge(challenge_id)
        .await?
        .map_or(challenge.total_pot, |c| c.total_pot);
    let gross = escrowed(&stakes, pot)?;
    let unit = Unit::Challenge(challenge_id);
    let (refunds, fee_retained) = refund_stakes(store, unit, &stakes, refund_type, now_ms).await?;
    transition_challenge(
        store,
        &challenge,
        target,
        ChallengeUpdate {
            end_at_ms: Some(now_ms),
            ..ChallengeUpdate::default()
        },
    )
    .await?;
    notify_lines(store, "refund", challenge_id, &refunds, now_ms).await;
    info!(challenge = %challenge_id, %gross, refunds = refunds.len(), %target, reason, "challenge refunded");

    Ok(SettlementSummary {
        unit_id: challenge_id,
        kind: SettlementKind::Refunded,
        gross,
        fee: fee_retained,
        lines: refunds,
        winner_id: None,
        reason: Some(reason.to_string()),
    })
}

async fn challenge_stakes<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
) -> ExecutionResult<Vec<Stake>> {
    Ok(store
        .challenge_participants(challenge_id)
        .await?
        .iter()
        .map(|p| (p.user_id, p.stake_paid))
        .collect())
}

/// Results are complete and none awaits review.
pub async fn challenge_ready<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
) -> ExecutionResult<bool> {
    let participants = store.challenge_participants(challenge_id).await?;
    if participants.is_empty() {
        return Ok(false);
    }
    let results = store.challenge_results(challenge_id).await?;
    let complete = participants
        .iter()
        .all(|p| results.iter().any(|r| r.user_id == p.user_id));
    Ok(complete && !results.iter().any(|r| r.status.blocks_settlement()))
}

/// Stuck-state release for a challenge: settle if it can be, otherwise refund and complete
/// without a winner.
pub async fn force_complete_challenge<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
    now_ms: u64,
) -> ExecutionResult<SettlementSummary> {
    if challenge_ready(store, challenge_id).await? {
        settle_challenge(store, challenge_id, STANDARD_FEE_BPS, now_ms).await
    } else {
        refund_challenge(
            store,
            challenge_id,
            RefundType::Full,
            CloseAs::CompletedWithoutWinner,
            "stuck: results incomplete at timeout",
            now_ms,
        )
        .await
    }
}
