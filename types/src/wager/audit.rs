use serde::{Deserialize, Serialize};

use super::labels::labeled_enum;

/// Which automation produced an audit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationType {
    TournamentAutomation,
    AtomicMarketEngine,
    SimRunner,
    WalletPayouts,
    TournamentPrizes,
    DisputeResolver,
    EmergencyStop,
    HealthMonitor,
    TrendingOrchestrator,
    ResultVerification,
}

labeled_enum!(AutomationType, "automation type", {
    TournamentAutomation => "tournament_automation",
    AtomicMarketEngine => "atomic_market_engine",
    SimRunner => "sim_runner",
    WalletPayouts => "wallet_payouts",
    TournamentPrizes => "tournament_prizes",
    DisputeResolver => "dispute_resolver",
    EmergencyStop => "emergency_stop",
    HealthMonitor => "health_monitor",
    TrendingOrchestrator => "trending_orchestrator",
    ResultVerification => "result_verification",
});

/// Action label written when the simulation injects a crash. The anti-clustering guard keys on it.
pub const SIMULATED_CRASH_ACTION: &str = "simulated_crash_refund";

/// Append-only record of one automation decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub automation_type: AutomationType,
    pub action_type: String,
    pub success: bool,
    pub action_data: serde_json::Value,
    pub timestamp_ms: u64,
}

impl AuditEntry {
    pub fn new(
        automation_type: AutomationType,
        action_type: impl Into<String>,
        success: bool,
        action_data: serde_json::Value,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            automation_type,
            action_type: action_type.into(),
            success,
            action_data,
            timestamp_ms,
        }
    }
}
