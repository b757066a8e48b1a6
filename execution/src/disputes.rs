//! Automatic dispute adjudication.
//!
//! Only three criteria close a dispute without a human. Anything else stays `pending`.

use crate::audit;
use crate::error::ExecutionResult;
use crate::store::Datastore;
use puosu_types::api::{DisputeResolutionRecord, DisputeSweepReport};
use puosu_types::wager::{
    AutomationType, Dispute, DisputeStatus, DisputeType, Notification,
    DISPUTE_EVIDENCE_GRACE_MS, DISPUTE_STALE_AFTER_MS, PAYMENT_LOOKBACK_MS,
};
use serde_json::json;
use tracing::{info, warn};

pub const INSUFFICIENT_EVIDENCE: &str = "insufficient evidence";
pub const RESOLVED_BY_PAYMENT: &str = "resolved by existing successful payment";
pub const STALE_UNIT: &str = "stale: linked wager closed more than 7 days ago";

/// Facts about a dispute that live outside the dispute row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisputeFacts {
    /// The raiser has a completed transaction inside the payment lookback.
    pub recent_payment: bool,
    /// When the linked challenge or tournament went terminal, if it has.
    pub linked_closed_at_ms: Option<u64>,
}

/// Applies the criteria in order. `None` means the dispute needs a human.
pub fn auto_resolution(
    dispute: &Dispute,
    facts: &DisputeFacts,
    now_ms: u64,
) -> Option<(DisputeStatus, &'static str)> {
    if dispute.status != DisputeStatus::Pending {
        return None;
    }
    let age = now_ms.saturating_sub(dispute.created_at_ms);
    if age > DISPUTE_EVIDENCE_GRACE_MS && !dispute.has_evidence() {
        return Some((DisputeStatus::Dismissed, INSUFFICIENT_EVIDENCE));
    }
    if dispute.dispute_type == DisputeType::Payment && facts.recent_payment {
        return Some((DisputeStatus::Resolved, RESOLVED_BY_PAYMENT));
    }
    if let Some(closed_at) = facts.linked_closed_at_ms {
        if now_ms.saturating_sub(closed_at) > DISPUTE_STALE_AFTER_MS {
            return Some((DisputeStatus::Resolved, STALE_UNIT));
        }
    }
    None
}

async fn gather_facts<S: Datastore>(
    store: &S,
    dispute: &Dispute,
    now_ms: u64,
) -> ExecutionResult<DisputeFacts> {
    let recent_payment = dispute.dispute_type == DisputeType::Payment
        && store
            .has_completed_transaction_since(
                dispute.raised_by,
                now_ms.saturating_sub(PAYMENT_LOOKBACK_MS),
            )
            .await?;

    let mut linked_closed_at_ms = None;
    if let Some(challenge_id) = dispute.challenge_id {
        if let Some(challenge) = store.challenge(challenge_id).await? {
            if challenge.status.is_terminal() {
                linked_closed_at_ms = challenge.end_at_ms;
            }
        }
    }
    if linked_closed_at_ms.is_none() {
        if let Some(tournament_id) = dispute.tournament_id {
            if let Some(tournament) = store.tournament(tournament_id).await? {
                linked_closed_at_ms = tournament.closed_at_ms();
            }
        }
    }

    Ok(DisputeFacts {
        recent_payment,
        linked_closed_at_ms,
    })
}

/// Closes every pending dispute that meets a criterion, auditing and notifying each.
pub async fn resolve_disputes<S: Datastore>(
    store: &S,
    now_ms: u64,
) -> ExecutionResult<DisputeSweepReport> {
    let mut report = DisputeSweepReport::default();
    for dispute in store.disputes_with_status(DisputeStatus::Pending).await? {
        let facts = gather_facts(store, &dispute, now_ms).await?;
        let Some((status, reason)) = auto_resolution(&dispute, &facts, now_ms) else {
            report.still_pending += 1;
            continue;
        };
        if !store
            .resolve_dispute(dispute.id, status, reason.to_string(), now_ms)
            .await?
        {
            // Someone closed it between our read and write.
            continue;
        }
        audit::record(
            store,
            AutomationType::DisputeResolver,
            "dispute_auto_resolved",
            true,
            json!({
                "disputeId": dispute.id,
                "disputeType": dispute.dispute_type,
                "status": status,
                "reason": reason,
                "ageMs": now_ms.saturating_sub(dispute.created_at_ms),
            }),
            now_ms,
        )
        .await;
        let message = format!("Your {} dispute was {status}: {reason}", dispute.dispute_type);
        if let Err(err) = store
            .notify(Notification::new(
                dispute.raised_by,
                "dispute_resolution",
                message,
                Some(dispute.id),
                now_ms,
            ))
            .await
        {
            warn!(dispute = %dispute.id, ?err, "failed to notify dispute raiser");
        }
        info!(dispute = %dispute.id, %status, reason, "dispute auto-resolved");
        report.resolved.push(DisputeResolutionRecord {
            dispute_id: dispute.id,
            status,
            reason: reason.to_string(),
        });
    }
    Ok(report)
}
