//! Restart reconciliation: ensure every pod has a running database process.
//!
//! Two paths exist. When the cluster has no writable node left, the whole
//! cluster is started with one admin operation; otherwise individual down
//! nodes are restarted in place. Both paths share the read-only kill step,
//! the probe-gating filters, and the address remap, in that order. Any
//! operation that changes node state invalidates the pod facts so the next
//! cycle re-observes before deciding again.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use crate::crd::{InitPolicy, KSafety, VantageCluster};
use crate::error::Error;
use crate::events::{reason, EventSink, EventType};
use crate::exec::PodRunner;
use crate::metrics;
use crate::names;
use crate::outcome::ReconcileOutcome;
use crate::parse;
use crate::paths;
use crate::platform::PodStatusSource;
use crate::podfacts::{PodFact, PodFacts, STATE_UP};
use crate::probes;
use crate::reip;

/// Marker echoed for every process the read-only kill step terminates.
const KILL_MARKER: &str = "Killing process";

/// Longest remote output embedded in a failure event.
const MAX_EVENT_OUTPUT: usize = 1024;

/// Drives one reconciliation cycle's restart decisions.
pub struct RestartReconciler<'a> {
    vdb: &'a VantageCluster,
    runner: &'a dyn PodRunner,
    pfacts: &'a mut PodFacts,
    platform: &'a dyn PodStatusSource,
    events: &'a dyn EventSink,
    /// Whether read-only processes are restart candidates. Online upgrade
    /// turns this off so read-only secondaries keep serving.
    restart_read_only: bool,
    /// The pod admin operations run from. Set at most once per cycle.
    admin_pod: Option<String>,
}

impl<'a> RestartReconciler<'a> {
    pub fn new(
        vdb: &'a VantageCluster,
        runner: &'a dyn PodRunner,
        pfacts: &'a mut PodFacts,
        platform: &'a dyn PodStatusSource,
        events: &'a dyn EventSink,
        restart_read_only: bool,
    ) -> Self {
        Self {
            vdb,
            runner,
            pfacts,
            platform,
            events,
            restart_read_only,
            admin_pod: None,
        }
    }

    /// Entry point. On success every node has a running database process or
    /// a requeue outcome says why not yet.
    pub async fn reconcile(&mut self) -> Result<ReconcileOutcome, Error> {
        if !self.vdb.spec.auto_restart {
            return Ok(ReconcileOutcome::Done);
        }

        self.pfacts
            .collect(self.vdb, self.runner, self.platform)
            .await?;

        // Cluster-wide operations only apply when the operator manages the
        // whole database lifecycle.
        if self.pfacts.up_writable_count() == 0
            && self.vdb.spec.init_policy != InitPolicy::ScheduleOnly
        {
            self.reconcile_cluster().await
        } else {
            self.reconcile_nodes().await
        }
    }

    /// Handle restart when the entire cluster is down.
    async fn reconcile_cluster(&mut self) -> Result<ReconcileOutcome, Error> {
        info!("Restart of entire cluster is needed");
        if self.pfacts.all_running_and_zero_installed() {
            info!("All pods are running and none of them have an installation. Nothing to restart.");
            return Ok(ReconcileOutcome::Done);
        }
        if self.pfacts.count_running_and_installed() == 0 {
            // A pod that is not yet running may still need a restart once it
            // comes up.
            info!("Waiting for pods to come online that may need a restart");
            return Ok(ReconcileOutcome::Requeue);
        }
        if self.vdb.spec.k_safety == KSafety::Zero
            && self.pfacts.count_installed_and_not_restartable() > 0
        {
            // Without redundancy, quorum needs every installed node present.
            info!("Waiting for all installed pods to be running before a cluster restart");
            return Ok(ReconcileOutcome::Requeue);
        }

        // Admin operations must run from a pod with no database process so a
        // cluster start can be issued while read-only secondaries are up.
        if !self.set_admin_pod(self.pfacts.find_pod_to_run_admin_offline()) {
            info!("No pod found to run admin operations from. Requeue reconciliation.");
            return Ok(ReconcileOutcome::Requeue);
        }

        let down_pods = self.pfacts.find_restartable_pods(self.restart_read_only, true);

        // Read-only processes must go down so they rejoin the new cluster
        // with write access. Rogue processes are the liveness probe's job.
        let res = self.kill_read_only_processes(&down_pods).await?;
        if res.aborts() {
            return Ok(res);
        }

        // A pod past its startup probe is about to be rescheduled by the
        // liveness probe; a cluster start must not race that.
        let filtered = probes::filter_startup_probe_active(self.platform, down_pods.clone()).await?;
        if filtered.removed != 0 {
            info!(pod_count = filtered.removed,
                "Some pods have active liveness probes. Waiting for them to be rescheduled \
                 before trying a restart.");
            return self.liveness_probe_wait().await;
        }

        let filtered = probes::filter_slow_startup(down_pods.clone());
        if filtered.removed != 0 {
            info!(pod_count = filtered.removed,
                "Some pods are slow starting up. Waiting for them to finish or abort before \
                 trying a cluster restart");
            return self.liveness_probe_wait().await;
        }

        self.accept_eula_if_missing().await?;

        // Remap runs against every installed pod; the map builder requeues
        // until they are all running.
        let reip_pods = self.pfacts.find_reip_pods(false);
        let res = self.reip_nodes(&reip_pods).await?;
        if res.aborts() {
            return Ok(res);
        }

        // If no db exists, there is nothing to restart.
        if !self.pfacts.does_db_exist() {
            return Ok(ReconcileOutcome::Done);
        }

        let res = self.restart_cluster(&down_pods).await?;
        if res.aborts() {
            return Ok(res);
        }

        self.pfacts.invalidate();
        Ok(ReconcileOutcome::Done)
    }

    /// Handle a subset of the pods: restart any that are down, and remap any
    /// that were rescheduled since their install.
    async fn reconcile_nodes(&mut self) -> Result<ReconcileOutcome, Error> {
        info!("Restart of individual nodes is needed");
        // Only running pods qualify. A pod that is not yet running gets its
        // own reconciliation cycle when it starts. Transient pods run the old
        // image during upgrade and are never restarted.
        let down_pods = self.pfacts.find_restartable_pods(self.restart_read_only, false);

        // All pods must have accepted the license before admin operations
        // run on any of them.
        self.accept_eula_if_missing().await?;

        if !down_pods.is_empty() {
            if !self.set_admin_pod(self.pfacts.find_pod_to_run_admin_any()) {
                info!("No pod found to run admin operations from. Requeue reconciliation.");
                return Ok(ReconcileOutcome::Requeue);
            }
            let res = self.restart_pods(down_pods).await?;
            if res.aborts() {
                return Ok(res);
            }
        }

        // The remaining steps need the install-time node name, which the
        // operator only knows reliably when it originated the install.
        if self.vdb.spec.init_policy == InitPolicy::ScheduleOnly {
            return Ok(self.requeue_if_pods_not_running());
        }

        // Pods installed but not yet added to a database may carry a stale
        // address from before their reschedule.
        let reip_pods = self.pfacts.find_reip_pods(true);
        if !reip_pods.is_empty() {
            if !self.set_admin_pod(self.pfacts.find_pod_to_run_admin_any()) {
                info!("No pod found to run admin operations from. Requeue reconciliation.");
                return Ok(ReconcileOutcome::Requeue);
            }
            let res = self.reip_nodes(&reip_pods).await?;
            if res.aborts() {
                return Ok(res);
            }
        }

        Ok(self.requeue_if_pods_not_running())
    }

    /// Restart the given down pods with one admin operation.
    async fn restart_pods(&mut self, pods: Vec<PodFact>) -> Result<ReconcileOutcome, Error> {
        let candidate_count = pods.len();

        // Platform-local facts can lag the cluster-wide state; a node that
        // looks down here may already be UP cluster-wide.
        let down_pods = self.remove_pods_with_cluster_up_state(pods).await?;
        if down_pods.is_empty() {
            info!("Pods are down but the cluster state doesn't show that yet. Requeue.");
            return self.liveness_probe_wait().await;
        }

        let res = self.kill_read_only_processes(&down_pods).await?;
        if res.aborts() {
            return Ok(res);
        }

        let filtered = probes::filter_startup_probe_active(self.platform, down_pods).await?;
        if filtered.kept.is_empty() {
            info!(pod_count = filtered.removed,
                "Some pod(s) have active liveness probes. Waiting for them to be rescheduled \
                 before trying a restart.");
            return self.liveness_probe_wait().await;
        }
        let down_pods = filtered.kept;

        let filtered = probes::filter_slow_startup(down_pods);
        if filtered.kept.is_empty() {
            info!("Some pod(s) are still starting up. Waiting for them to finish or abort \
                   before trying to restart again");
            return self.liveness_probe_wait().await;
        }
        let down_pods = filtered.kept;

        self.debug_dump_cluster_conf().await;

        let node_list = gen_restart_node_list(&down_pods);
        let ip_list = gen_restart_ip_list(&down_pods);
        let cmd = self.gen_restart_node_cmd(&node_list, &ip_list);
        let res = self.exec_restart_pods(&down_pods, &cmd).await?;
        if res.aborts() {
            return Ok(res);
        }

        self.debug_dump_cluster_conf().await;

        self.pfacts.invalidate();

        // Some candidates were pruned or filtered away; check on them again
        // once the probes have had time to act.
        if candidate_count > down_pods.len() {
            return self.liveness_probe_wait().await;
        }
        Ok(ReconcileOutcome::Done)
    }

    /// Remove pods that the cluster-wide node state reports as UP.
    async fn remove_pods_with_cluster_up_state(
        &self,
        pods: Vec<PodFact>,
    ) -> Result<Vec<PodFact>, Error> {
        let cluster_state = self.fetch_cluster_node_status().await?;
        Ok(pods
            .into_iter()
            .filter(|p| {
                cluster_state
                    .get(&p.db_node_name)
                    .map(|state| state != STATE_UP)
                    .unwrap_or(true)
            })
            .collect())
    }

    /// Cluster-wide node states, as the database itself sees them. This can
    /// disagree with pod-local facts in both directions; a node may even
    /// report UP while still initializing.
    async fn fetch_cluster_node_status(&self) -> Result<HashMap<String, String>, Error> {
        let admin = self.admin_pod()?;
        let args = vec!["-t".to_string(), "list_nodes".to_string()];
        match self
            .runner
            .exec_admin(&admin, names::SERVER_CONTAINER, &args)
            .await
        {
            Ok(out) => Ok(parse::parse_cluster_node_status(&out.stdout)),
            Err(err) => Err(self.log_failure("list_nodes", err)),
        }
    }

    /// SIGKILL any read-only database process among the given pods. If
    /// anything was killed the cycle requeues so status bookkeeping reflects
    /// the kill before a restart is attempted.
    async fn kill_read_only_processes(&self, pods: &[PodFact]) -> Result<ReconcileOutcome, Error> {
        let mut killed_at_least_one = false;
        for pod in pods.iter().filter(|p| p.read_only) {
            let cmd = vec![
                "bash".to_string(),
                "-c".to_string(),
                format!(
                    "for pid in $(pgrep ^vantaged$); do echo \"{} $pid\"; kill -n SIGKILL $pid; done",
                    KILL_MARKER
                ),
            ];
            let out = self
                .runner
                .exec_in_pod(&pod.name, names::SERVER_CONTAINER, &cmd)
                .await?;
            if out.stdout.contains(KILL_MARKER) {
                killed_at_least_one = true;
            }
        }
        if killed_at_least_one {
            info!("Requeue. Killed at least one read-only process.");
            return Ok(ReconcileOutcome::Requeue);
        }
        Ok(ReconcileOutcome::Done)
    }

    /// Run the restart command, with event and metric bookkeeping.
    async fn exec_restart_pods(
        &self,
        down_pods: &[PodFact],
        cmd: &[String],
    ) -> Result<ReconcileOutcome, Error> {
        let pod_names: Vec<&str> = down_pods.iter().map(|p| p.name.as_str()).collect();
        self.events.publish(
            EventType::Normal,
            reason::NODE_RESTART_STARTED,
            &format!(
                "Calling 'adminctl -t restart_node' to restart the following pods: {}",
                pod_names.join(", ")
            ),
        );

        let admin = self.admin_pod()?;
        let cluster = self.cluster_name();
        let start = Instant::now();
        let result = self
            .runner
            .exec_admin(&admin, names::SERVER_CONTAINER, cmd)
            .await;
        let elapsed = start.elapsed().as_secs_f64();
        metrics::observe_nodes_restart(&cluster, elapsed);

        match result {
            Err(err) => {
                metrics::inc_nodes_restart_failed(&cluster);
                Err(self.log_failure("restart_node", err))
            }
            Ok(_) => {
                self.events.publish(
                    EventType::Normal,
                    reason::NODE_RESTART_SUCCEEDED,
                    &format!(
                        "Successfully called 'adminctl -t restart_node' and it took {}s",
                        elapsed as u64
                    ),
                );
                Ok(ReconcileOutcome::Done)
            }
        }
    }

    /// Start the whole cluster. Assumes the remap already ran.
    async fn restart_cluster(&self, down_pods: &[PodFact]) -> Result<ReconcileOutcome, Error> {
        self.events.publish(
            EventType::Normal,
            reason::CLUSTER_RESTART_STARTED,
            "Calling 'adminctl -t start_db' to restart the cluster",
        );

        let admin = self.admin_pod()?;
        let cluster = self.cluster_name();
        let cmd = self.gen_start_db_cmd(down_pods);
        let start = Instant::now();
        let result = self
            .runner
            .exec_admin(&admin, names::SERVER_CONTAINER, &cmd)
            .await;
        let elapsed = start.elapsed().as_secs_f64();
        metrics::observe_cluster_restart(&cluster, elapsed);

        match result {
            Err(err) => {
                metrics::inc_cluster_restart_failed(&cluster);
                Err(self.log_failure("start_db", err))
            }
            Ok(_) => {
                self.events.publish(
                    EventType::Normal,
                    reason::CLUSTER_RESTART_SUCCEEDED,
                    &format!(
                        "Successfully called 'adminctl -t start_db' and it took {}s",
                        elapsed as u64
                    ),
                );
                Ok(ReconcileOutcome::Done)
            }
        }
    }

    /// Remap node addresses for the given pods. Skipped entirely when no
    /// address changed; re-running reconciliation with unchanged addresses
    /// never re-issues a remap.
    async fn reip_nodes(&self, pods: &[PodFact]) -> Result<ReconcileOutcome, Error> {
        let old_addresses = self.fetch_old_addresses().await?;

        let map = reip::build_address_map(&old_addresses, pods);
        if !map.ok {
            info!("Could not generate the address map from nodes. Requeue reconciliation.");
            return Ok(ReconcileOutcome::Requeue);
        }
        if !map.address_changed {
            return Ok(ReconcileOutcome::Done);
        }

        let admin = self.admin_pod()?;
        let contents = reip::format_map_file(&map.pairs);
        self.runner
            .exec_in_pod(
                &admin,
                names::SERVER_CONTAINER,
                &reip::gen_map_file_upload_cmd(&contents),
            )
            .await?;

        self.debug_dump_cluster_conf().await;

        let cmd = self.gen_reip_cmd();
        if let Err(err) = self
            .runner
            .exec_admin(&admin, names::SERVER_CONTAINER, &cmd)
            .await
        {
            // Failure to remap means the database cannot come up.
            self.events.publish(
                EventType::Warning,
                reason::REIP_FAILED,
                "Attempt to run 'adminctl -t re_ip' failed",
            );
            return Err(err);
        }

        self.debug_dump_cluster_conf().await;

        Ok(ReconcileOutcome::Done)
    }

    /// Read the previously recorded node addresses from the cluster config
    /// file on the admin pod.
    async fn fetch_old_addresses(&self) -> Result<HashMap<String, String>, Error> {
        let admin = self.admin_pod()?;
        let cmd = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("grep --regexp='^node[0-9]' {}", paths::CLUSTER_CONF),
        ];
        let out = self
            .runner
            .exec_in_pod(&admin, names::SERVER_CONTAINER, &cmd)
            .await?;
        Ok(parse::parse_config_node_addresses(&out.stdout))
    }

    /// Make sure the end-user license has been accepted on every running
    /// installed pod before any admin operation runs.
    async fn accept_eula_if_missing(&self) -> Result<(), Error> {
        let pending: Vec<String> = self
            .pfacts
            .detail
            .values()
            .filter(|p| p.is_pod_running && p.is_installed && !p.eula_accepted)
            .map(|p| p.name.clone())
            .collect();
        for pod in pending {
            let stage = vec![
                "bash".to_string(),
                "-c".to_string(),
                format!(
                    "cp {} {}",
                    paths::EULA_ACCEPT_SCRIPT_SOURCE,
                    paths::EULA_ACCEPT_SCRIPT
                ),
            ];
            self.runner
                .exec_in_pod(&pod, names::SERVER_CONTAINER, &stage)
                .await?;
            let run = vec![
                "bash".to_string(),
                paths::EULA_ACCEPT_SCRIPT.to_string(),
                "accept".to_string(),
            ];
            self.runner
                .exec_in_pod(&pod, names::SERVER_CONTAINER, &run)
                .await?;
        }
        Ok(())
    }

    /// Dump the node lines of the cluster config for diagnosis. All errors
    /// ignored.
    async fn debug_dump_cluster_conf(&self) {
        let Ok(admin) = self.admin_pod() else {
            return;
        };
        let cmd = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!(
                r"ls -l {conf} && grep '^node\|^v_\|^host' {conf}",
                conf = paths::CLUSTER_CONF
            ),
        ];
        let _ = self
            .runner
            .exec_in_pod(&admin, names::SERVER_CONTAINER, &cmd)
            .await;
    }

    /// Wait outcome derived from the liveness probe of a sample pod. Falls
    /// back to a plain requeue when no probe configuration is discoverable.
    async fn liveness_probe_wait(&self) -> Result<ReconcileOutcome, Error> {
        let Some(sc) = self.vdb.spec.subclusters.first() else {
            return Ok(ReconcileOutcome::Requeue);
        };
        let sample = names::gen_pod_name(&self.cluster_name(), &sc.name, 0);
        let status = match self.platform.get_pod(&sample).await? {
            Some(s) => s,
            None => {
                info!(pod = %sample,
                    "Could not read sample pod for liveness probe timing. Default requeue.");
                return Ok(ReconcileOutcome::Requeue);
            }
        };
        match status.liveness_probe {
            Some(timing) => Ok(ReconcileOutcome::RequeueAfter(probes::liveness_wait(&timing))),
            None => Ok(ReconcileOutcome::Requeue),
        }
    }

    /// Set the admin pod if not already chosen this cycle.
    fn set_admin_pod(&mut self, candidate: Option<PodFact>) -> bool {
        if self.admin_pod.is_none() {
            match candidate {
                Some(pod) => self.admin_pod = Some(pod.name),
                None => return false,
            }
        }
        true
    }

    fn admin_pod(&self) -> Result<String, Error> {
        self.admin_pod
            .clone()
            .ok_or_else(|| Error::Internal("admin pod not selected".to_string()))
    }

    fn cluster_name(&self) -> String {
        self.vdb.metadata.name.clone().unwrap_or_default()
    }

    /// Requeue when some installed pods are not yet running.
    fn requeue_if_pods_not_running(&self) -> ReconcileOutcome {
        if self.pfacts.count_installed_and_not_restartable() > 0 {
            info!("Requeue. Some installed pods are not yet running.");
            return ReconcileOutcome::Requeue;
        }
        ReconcileOutcome::Done
    }

    /// Publish a failure event for an admin operation and wrap the error.
    /// The truncated remote output rides along so the failure can be
    /// diagnosed without re-running the command.
    fn log_failure(&self, op: &str, err: Error) -> Error {
        let message = match err.remote_output() {
            Some(output) if !output.is_empty() => format!(
                "admin operation '{}' failed: {}",
                op,
                truncate_for_event(output)
            ),
            _ => format!("admin operation '{}' failed: {}", op, err),
        };
        self.events
            .publish(EventType::Warning, reason::ADMIN_OP_FAILED, &message);
        Error::AdminCommandFailed {
            op: op.to_string(),
            detail: err.to_string(),
        }
    }

    /// Arguments for `restart_node`.
    fn gen_restart_node_cmd(&self, node_list: &[String], ip_list: &[String]) -> Vec<String> {
        let mut cmd = vec![
            "-t".to_string(),
            "restart_node".to_string(),
            format!("--database={}", self.vdb.spec.db_name),
            format!("--hosts={}", node_list.join(",")),
            format!("--new-host-ips={}", ip_list.join(",")),
            "--noprompt".to_string(),
        ];
        if self.vdb.spec.restart_timeout != 0 {
            cmd.push(format!("--timeout={}", self.vdb.spec.restart_timeout));
        }
        cmd
    }

    /// Arguments for `start_db`. The host list matters during online
    /// upgrade, when only the primaries are started while secondaries sit
    /// read-only.
    fn gen_start_db_cmd(&self, down_pods: &[PodFact]) -> Vec<String> {
        let mut cmd = vec![
            "-t".to_string(),
            "start_db".to_string(),
            format!("--database={}", self.vdb.spec.db_name),
            "--noprompt".to_string(),
        ];
        if self.vdb.spec.ignore_cluster_lease {
            cmd.push("--ignore-cluster-lease".to_string());
        }
        if self.vdb.spec.restart_timeout != 0 {
            cmd.push(format!("--timeout={}", self.vdb.spec.restart_timeout));
        }
        let hosts: Vec<&str> = down_pods.iter().map(|p| p.pod_ip.as_str()).collect();
        cmd.push("--hosts".to_string());
        cmd.push(hosts.join(","));
        cmd
    }

    /// Arguments for `re_ip`. The force flag lets the remap run while some
    /// nodes are up, on servers new enough to support that.
    fn gen_reip_cmd(&self) -> Vec<String> {
        let mut cmd = vec![
            "-t".to_string(),
            "re_ip".to_string(),
            format!("--file={}", paths::IP_MAP_FILE),
            "--noprompt".to_string(),
        ];
        if let Some(vinf) = self.vdb.server_version() {
            if vinf.supports_reip_with_up_nodes() {
                cmd.push("--force".to_string());
            }
        }
        cmd
    }
}

/// Database node names of the given pods, in order.
fn gen_restart_node_list(down_pods: &[PodFact]) -> Vec<String> {
    down_pods.iter().map(|p| p.db_node_name.clone()).collect()
}

/// Addresses of the given pods, in order.
fn gen_restart_ip_list(down_pods: &[PodFact]) -> Vec<String> {
    down_pods.iter().map(|p| p.pod_ip.clone()).collect()
}

/// Truncate remote output for inclusion in an event message.
fn truncate_for_event(output: &str) -> String {
    if output.chars().count() <= MAX_EVENT_OUTPUT {
        return output.to_string();
    }
    let truncated: String = output.chars().take(MAX_EVENT_OUTPUT).collect();
    format!("{}...", truncated)
}
