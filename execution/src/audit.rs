use crate::store::Datastore;
use puosu_types::wager::{AuditEntry, AutomationType};
use serde_json::Value;
use tracing::{error, info, warn};

/// Appends an audit entry. A failed append is logged and otherwise ignored so that bookkeeping
/// never changes the outcome of the operation being recorded.
pub async fn record<S: Datastore>(
    store: &S,
    automation_type: AutomationType,
    action_type: &str,
    success: bool,
    action_data: Value,
    now_ms: u64,
) {
    if success {
        info!(automation = %automation_type, action = action_type, "automation action");
    } else {
        warn!(automation = %automation_type, action = action_type, data = %action_data, "automation action failed");
    }
    let entry = AuditEntry::new(automation_type, action_type, success, action_data, now_ms);
    if let Err(err) = store.append_audit(entry).await {
        error!(automation = %automation_type, action = action_type, ?err, "failed to append audit entry");
    }
}
