//! Platform health evaluation.

use crate::audit;
use crate::automation::AutomationConfig;
use crate::error::ExecutionResult;
use crate::lifecycle::{is_stuck_challenge, TournamentScheduler};
use crate::store::Datastore;
use puosu_types::api::{
    HealthIssue, HealthMetrics, HealthReport, HealthStatus, IssueSeverity, ProcessHealth,
};
use puosu_types::wager::{
    AutomationType, ChallengeStatus, DisputeStatus, TournamentStatus, DISPUTE_EVIDENCE_GRACE_MS,
    HOUR_MS, PLATFORM_ACCOUNT,
};
use puosu_types::Money;
use serde_json::json;

/// Failed automation entries in the last hour at or above this count are critical.
pub const CRITICAL_FAILURES_PER_HOUR: usize = 10;
/// Resident memory above this is reported as a warning.
pub const RSS_WARNING_BYTES: u64 = 1 << 30;

fn issue(code: &str, severity: IssueSeverity, message: String) -> HealthIssue {
    HealthIssue {
        code: code.to_string(),
        severity,
        message,
    }
}

/// Derives issues and overall status from collected metrics.
pub fn assess(
    metrics: &HealthMetrics,
    min_active_tournaments: usize,
    process: Option<&ProcessHealth>,
) -> (HealthStatus, Vec<HealthIssue>) {
    let mut issues = Vec::new();
    if metrics.stuck_challenges > 0 || metrics.stuck_tournaments > 0 {
        issues.push(issue(
            "stuck_units",
            IssueSeverity::Critical,
            format!(
                "{} challenges and {} tournaments past their active timeout",
                metrics.stuck_challenges, metrics.stuck_tournaments
            ),
        ));
    }
    if metrics.platform_balance.is_negative() {
        issues.push(issue(
            "negative_platform_balance",
            IssueSeverity::Critical,
            format!("platform account balance is {}", metrics.platform_balance),
        ));
    }
    if metrics.automation_failures_last_hour >= CRITICAL_FAILURES_PER_HOUR {
        issues.push(issue(
            "automation_failures",
            IssueSeverity::Critical,
            format!(
                "{} automation failures in the last hour",
                metrics.automation_failures_last_hour
            ),
        ));
    } else if metrics.automation_failures_last_hour > 0 {
        issues.push(issue(
            "automation_failures",
            IssueSeverity::Warning,
            format!(
                "{} automation failures in the last hour",
                metrics.automation_failures_last_hour
            ),
        ));
    }
    if metrics.overdue_disputes > 0 {
        issues.push(issue(
            "overdue_disputes",
            IssueSeverity::Warning,
            format!("{} disputes pending for more than 48h", metrics.overdue_disputes),
        ));
    }
    if metrics.active_tournaments < min_active_tournaments {
        issues.push(issue(
            "low_tournament_count",
            IssueSeverity::Warning,
            format!(
                "{} active tournaments, expected at least {min_active_tournaments}",
                metrics.active_tournaments
            ),
        ));
    }
    if let Some(process) = process {
        if process.rss_bytes > RSS_WARNING_BYTES {
            issues.push(issue(
                "high_memory",
                IssueSeverity::Warning,
                format!("resident memory {} bytes", process.rss_bytes),
            ));
        }
    }

    let status = if issues.iter().any(|i| i.severity == IssueSeverity::Critical) {
        HealthStatus::Critical
    } else if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    (status, issues)
}

pub async fn collect_metrics<S: Datastore>(
    store: &S,
    config: &AutomationConfig,
    now_ms: u64,
) -> ExecutionResult<HealthMetrics> {
    let open = store.challenges_with_status(ChallengeStatus::Open).await?;
    let active = store.challenges_with_status(ChallengeStatus::Active).await?;
    let stuck_challenges = active
        .iter()
        .filter(|c| is_stuck_challenge(c, now_ms, config.max_active_duration_ms))
        .count();

    let scheduler = TournamentScheduler::new(config.max_active_duration_ms);
    let mut active_tournaments = 0;
    let mut stuck_tournaments = 0;
    for status in [
        TournamentStatus::Upcoming,
        TournamentStatus::RegistrationOpen,
        TournamentStatus::Ongoing,
    ] {
        for tournament in store.tournaments_with_status(status).await? {
            active_tournaments += 1;
            if scheduler.is_stuck(&tournament, now_ms) {
                stuck_tournaments += 1;
            }
        }
    }

    let overdue_disputes = store
        .disputes_with_status(DisputeStatus::Pending)
        .await?
        .iter()
        .filter(|d| now_ms.saturating_sub(d.created_at_ms) > DISPUTE_EVIDENCE_GRACE_MS)
        .count();

    let recent = store.audits_since(now_ms.saturating_sub(HOUR_MS)).await?;
    let platform_balance = store
        .wallet(PLATFORM_ACCOUNT)
        .await?
        .map(|w| w.balance)
        .unwrap_or(Money::ZERO);

    Ok(HealthMetrics {
        open_challenges: open.len(),
        active_challenges: active.len(),
        stuck_challenges,
        active_tournaments,
        stuck_tournaments,
        overdue_disputes,
        automation_runs_last_hour: recent.len(),
        automation_failures_last_hour: recent.iter().filter(|e| !e.success).count(),
        platform_balance,
    })
}

/// Evaluates platform health and appends the verdict to the audit log.
pub async fn evaluate_health<S: Datastore>(
    store: &S,
    config: &AutomationConfig,
    process: Option<ProcessHealth>,
    now_ms: u64,
) -> ExecutionResult<HealthReport> {
    let metrics = collect_metrics(store, config, now_ms).await?;
    let (status, issues) = assess(&metrics, config.min_active_tournaments, process.as_ref());
    audit::record(
        store,
        AutomationType::HealthMonitor,
        "health_check",
        status != HealthStatus::Critical,
        json!({
            "status": status,
            "issues": issues.iter().map(|i| i.code.as_str()).collect::<Vec<_>>(),
        }),
        now_ms,
    )
    .await;
    Ok(HealthReport {
        status,
        issues,
        metrics,
        process,
    })
}
