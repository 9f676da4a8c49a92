//! Kubernetes controller for Vantage clusters

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::crd::VantageCluster;
use crate::error::Error;
use crate::events::LogEventSink;
use crate::exec::KubePodRunner;
use crate::metrics;
use crate::outcome::ReconcileOutcome;
use crate::platform::KubePodStatusSource;
use crate::podfacts::PodFacts;
use crate::restart::RestartReconciler;
use crate::status;

/// Steady-state requeue interval once a cycle finishes clean.
const STEADY_STATE_REQUEUE_SECONDS: u64 = 60;

/// Wait applied to a plain retry outcome before the next cycle.
const RETRY_REQUEUE_SECONDS: u64 = 10;

/// Controller state shared by reconcile invocations
pub struct ControllerState {
    /// Kubernetes client
    pub client: Client,
}

/// Main controller for Vantage resources
pub struct Controller {
    client: Client,
    namespace: String,
    state: Arc<ControllerState>,
}

impl Controller {
    /// Create a new controller
    pub async fn new(namespace: String) -> Result<Self, Error> {
        let client = Client::try_default().await?;

        let state = ControllerState {
            client: client.clone(),
        };

        Ok(Self {
            client,
            namespace,
            state: Arc::new(state),
        })
    }

    /// Run the controller
    pub async fn run(&self) -> Result<(), Error> {
        info!("Starting Vantage controller");

        let clusters: Api<VantageCluster> = if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        };

        // Verify CRD is installed
        let lp = ListParams::default().limit(1);
        if let Err(e) = clusters.list(&lp).await {
            error!("Failed to list VantageClusters. Is the CRD installed? Error: {}", e);
            return Err(Error::CrdNotInstalled);
        }

        info!("CRD verification successful");

        let state = Arc::clone(&self.state);

        KubeController::new(clusters.clone(), Config::default())
            .shutdown_on_signal()
            .run(
                |cluster, ctx| async move { reconcile(cluster, ctx).await },
                |cluster, error, ctx| error_policy(cluster, error, ctx),
                state,
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => {
                        debug!(
                            name = %obj.name,
                            ?action,
                            "Reconciliation successful"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation error");
                    }
                }
            })
            .await;

        info!("Controller stopped");
        Ok(())
    }
}

/// Reconcile a VantageCluster resource. One invocation is one cycle:
/// collect facts, decide, act, and map the outcome to a requeue. Cycles for
/// the same cluster are serialized by the controller runtime.
async fn reconcile(
    cluster: Arc<VantageCluster>,
    ctx: Arc<ControllerState>,
) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    info!(name = %name, namespace = %namespace, "Reconciling VantageCluster");

    let client = ctx.client.clone();

    // Record whether automatic restart is in force before acting on it.
    let enabled = cluster.spec.auto_restart;
    status::update_condition(
        &client,
        &namespace,
        &name,
        status::make_condition(
            status::AUTO_RESTART_CONDITION,
            if enabled { "True" } else { "False" },
            "Configured",
            "automatic restart setting from the cluster spec",
        ),
    )
    .await?;
    if !enabled {
        return Ok(Action::requeue(Duration::from_secs(
            STEADY_STATE_REQUEUE_SECONDS,
        )));
    }

    let runner = KubePodRunner::new(client.clone(), &namespace);
    let platform = KubePodStatusSource::new(client.clone(), &namespace);
    let events = LogEventSink;
    let mut pfacts = PodFacts::new();

    let start = Instant::now();
    let mut engine =
        RestartReconciler::new(&cluster, &runner, &mut pfacts, &platform, &events, true);
    let result = engine.reconcile().await;
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            metrics::record_reconciliation(&name, "success");
            debug!(name = %name, elapsed = %elapsed, ?outcome, "Cycle finished");
            let action = match outcome {
                ReconcileOutcome::Done => {
                    Action::requeue(Duration::from_secs(STEADY_STATE_REQUEUE_SECONDS))
                }
                ReconcileOutcome::Requeue => {
                    Action::requeue(Duration::from_secs(RETRY_REQUEUE_SECONDS))
                }
                ReconcileOutcome::RequeueAfter(d) => Action::requeue(d),
            };
            Ok(action)
        }
        Err(e) => {
            metrics::record_reconciliation(&name, "failure");
            error!(name = %name, error = %e, "Reconciliation failed");
            Err(e)
        }
    }
}

/// Error policy for reconciliation failures. The next cycle retries from
/// scratch.
fn error_policy(
    _cluster: Arc<VantageCluster>,
    error: &Error,
    _ctx: Arc<ControllerState>,
) -> Action {
    warn!(error = %error, "Reconciliation error, will retry");
    Action::requeue(Duration::from_secs(STEADY_STATE_REQUEUE_SECONDS))
}
