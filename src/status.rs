//! Status condition updates for VantageCluster resources.

use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use crate::crd::{ClusterCondition, VantageCluster};
use crate::error::Error;

/// Condition recording whether automatic restart is in force.
pub const AUTO_RESTART_CONDITION: &str = "AutoRestartEnabled";

/// Create a condition with the transition time stamped now.
pub fn make_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> ClusterCondition {
    ClusterCondition {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Upsert a condition on the cluster's status subresource. A condition
/// whose status value is unchanged is left alone so the transition time
/// stays meaningful.
pub async fn update_condition(
    client: &Client,
    namespace: &str,
    name: &str,
    condition: ClusterCondition,
) -> Result<(), Error> {
    let api: Api<VantageCluster> = Api::namespaced(client.clone(), namespace);

    let current = api.get_status(name).await?;
    let mut conditions = current.status.map(|s| s.conditions).unwrap_or_default();
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                return Ok(());
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }

    let patch = serde_json::json!({
        "status": { "conditions": conditions }
    });
    let pp = PatchParams::apply("vantage-operator");
    api.patch_status(name, &pp, &Patch::Merge(&patch)).await?;

    debug!(name = %name, "Status condition updated");
    Ok(())
}
