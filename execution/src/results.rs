//! Result submission, moderator review and game-stat verification.

use crate::audit;
use crate::error::{ExecutionError, ExecutionResult};
use crate::store::Datastore;
use puosu_types::api::{
    ResultStatusReport, ReviewResultRequest, SubmitResultRequest, VerificationOutcome,
    VerifyMatchReport,
};
use puosu_types::wager::{
    AutomationType, Challenge, ChallengeResult, ChallengeStatus, MatchStats, ProofStatus,
};
use puosu_types::{ChallengeId, LedgerError, UserId};
use serde_json::json;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("stats unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stats payload: {0}")]
    Invalid(String),
}

/// Third-party match statistics. Responses are untrusted and calls are never retried.
pub trait GameStatsSource: Send + Sync + 'static {
    fn fetch_stats(
        &self,
        challenge: &Challenge,
        user_id: UserId,
    ) -> impl Future<Output = Result<MatchStats, StatsError>> + Send;
}

async fn active_challenge<S: Datastore>(
    store: &S,
    challenge_id: ChallengeId,
) -> ExecutionResult<Challenge> {
    let challenge = store
        .challenge(challenge_id)
        .await?
        .ok_or(LedgerError::NotFound("challenge"))?;
    if challenge.status != ChallengeStatus::Active {
        return Err(ExecutionError::InvalidRequest(format!(
            "challenge {challenge_id} is {}, results need an active challenge",
            challenge.status
        )));
    }
    Ok(challenge)
}

/// Records a participant's own result once. Suspicious stats route it to review.
pub async fn submit_result<S: Datastore>(
    store: &S,
    request: SubmitResultRequest,
    now_ms: u64,
) -> ExecutionResult<ResultStatusReport> {
    let challenge = active_challenge(store, request.challenge_id).await?;
    let participants = store.challenge_participants(challenge.id).await?;
    if !participants.iter().any(|p| p.user_id == request.user_id) {
        return Err(ExecutionError::NotParticipant(request.user_id));
    }
    if request.placement == 0 || request.placement as usize > participants.len() {
        return Err(ExecutionError::InvalidRequest(format!(
            "placement must be between 1 and {}",
            participants.len()
        )));
    }

    let flagged = store
        .detect_suspicious_stats(request.user_id, request.stats)
        .await?;
    let status = if flagged {
        ProofStatus::Flagged
    } else {
        ProofStatus::Pending
    };
    store
        .record_challenge_result(ChallengeResult {
            challenge_id: challenge.id,
            user_id: request.user_id,
            placement: request.placement,
            stats: request.stats,
            proof_url: request.proof_url,
            status,
            submitted_at_ms: now_ms,
        })
        .await?;
    if flagged {
        warn!(challenge = %challenge.id, user = %request.user_id, kills = request.stats.kills, deaths = request.stats.deaths, "result flagged for review");
    }
    Ok(ResultStatusReport {
        challenge_id: challenge.id,
        user_id: request.user_id,
        status,
    })
}

/// Moderator decision on a pending or flagged result.
pub async fn review_result<S: Datastore>(
    store: &S,
    request: ReviewResultRequest,
    now_ms: u64,
) -> ExecutionResult<ResultStatusReport> {
    let results = store.challenge_results(request.challenge_id).await?;
    let current = results
        .iter()
        .find(|r| r.user_id == request.user_id)
        .ok_or(LedgerError::NotFound("challenge result"))?;
    if !matches!(current.status, ProofStatus::Pending | ProofStatus::Flagged) {
        return Err(ExecutionError::Conflict(format!(
            "result already {}",
            current.status
        )));
    }
    let status = if request.approve {
        ProofStatus::Verified
    } else {
        ProofStatus::Rejected
    };
    if !store
        .set_result_status(request.challenge_id, request.user_id, status)
        .await?
    {
        return Err(LedgerError::NotFound("challenge result").into());
    }
    audit::record(
        store,
        AutomationType::ResultVerification,
        "result_reviewed",
        true,
        json!({
            "challengeId": request.challenge_id,
            "userId": request.user_id,
            "from": current.status,
            "to": status,
            "note": request.moderator_note,
        }),
        now_ms,
    )
    .await;
    Ok(ResultStatusReport {
        challenge_id: request.challenge_id,
        user_id: request.user_id,
        status,
    })
}

/// Fetches stats for participants without a result. Any fetch failure leaves the challenge
/// untouched and reports `result_unavailable`.
pub async fn verify_match<S: Datastore, G: GameStatsSource>(
    store: &S,
    stats_source: &G,
    challenge_id: ChallengeId,
    now_ms: u64,
) -> ExecutionResult<VerifyMatchReport> {
    let challenge = active_challenge(store, challenge_id).await?;
    let participants = store.challenge_participants(challenge_id).await?;
    let existing = store.challenge_results(challenge_id).await?;
    let missing: Vec<UserId> = participants
        .iter()
        .map(|p| p.user_id)
        .filter(|user| !existing.iter().any(|r| r.user_id == *user))
        .collect();
    if missing.is_empty() {
        return Ok(VerifyMatchReport {
            challenge_id,
            outcome: VerificationOutcome::AlreadyComplete,
            recorded: Vec::new(),
            unavailable: Vec::new(),
        });
    }

    let mut fetched = Vec::with_capacity(missing.len());
    let mut unavailable = Vec::new();
    for user_id in &missing {
        match stats_source.fetch_stats(&challenge, *user_id).await {
            Ok(stats) => fetched.push((*user_id, stats)),
            Err(err) => {
                warn!(challenge = %challenge_id, user = %user_id, %err, "game stats unavailable");
                unavailable.push(*user_id);
            }
        }
    }
    if !unavailable.is_empty() {
        audit::record(
            store,
            AutomationType::ResultVerification,
            "result_unavailable",
            false,
            json!({ "challengeId": challenge_id, "unavailable": unavailable }),
            now_ms,
        )
        .await;
        return Ok(VerifyMatchReport {
            challenge_id,
            outcome: VerificationOutcome::ResultUnavailable,
            recorded: Vec::new(),
            unavailable,
        });
    }

    // Fetched players take the placements not already claimed, best score first.
    fetched.sort_by(|a, b| b.1.score.cmp(&a.1.score).then_with(|| a.0.cmp(&b.0)));
    let mut free = (1..=participants.len() as u32)
        .filter(|place| !existing.iter().any(|r| r.placement == *place));

    let mut recorded = Vec::with_capacity(fetched.len());
    for (user_id, stats) in fetched {
        let placement = free.next().unwrap_or(participants.len() as u32);
        let status = if store.detect_suspicious_stats(user_id, stats).await? {
            ProofStatus::Flagged
        } else {
            ProofStatus::Verified
        };
        match store
            .record_challenge_result(ChallengeResult {
                challenge_id,
                user_id,
                placement,
                stats,
                proof_url: None,
                status,
                submitted_at_ms: now_ms,
            })
            .await
        {
            Ok(()) => {}
            // A concurrent submission beat us to it.
            Err(LedgerError::ResultAlreadyRecorded) => continue,
            Err(err) => return Err(err.into()),
        }
        recorded.push(ResultStatusReport {
            challenge_id,
            user_id,
            status,
        });
    }
    audit::record(
        store,
        AutomationType::ResultVerification,
        "results_recorded",
        true,
        json!({ "challengeId": challenge_id, "recorded": recorded.len() }),
        now_ms,
    )
    .await;
    info!(challenge = %challenge_id, recorded = recorded.len(), "match verified");

    Ok(VerifyMatchReport {
        challenge_id,
        outcome: VerificationOutcome::Recorded,
        recorded,
        unavailable,
    })
}
