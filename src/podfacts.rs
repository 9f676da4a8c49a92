//! Point-in-time facts about every pod in the cluster.
//!
//! Facts are collected once per reconciliation cycle and treated as
//! read-only until the cycle ends or an operation changes node state, at
//! which point the cache is invalidated and the next read rebuilds it.
//! A pod missing from the platform is recorded as unreachable, never an
//! error.

use std::collections::BTreeMap;

use tracing::debug;

use crate::crd::VantageCluster;
use crate::error::Error;
use crate::exec::PodRunner;
use crate::names;
use crate::paths;
use crate::platform::PodStatusSource;

/// Node state reported by the local state query.
pub const STATE_UP: &str = "UP";
pub const STATE_READ_ONLY: &str = "READ_ONLY";

/// Facts about a single pod, keyed by its stable pod name.
#[derive(Debug, Clone)]
pub struct PodFact {
    /// Stable pod name within the platform.
    pub name: String,
    /// Subcluster the pod belongs to.
    pub subcluster: String,
    /// Current network address. Empty until the platform assigns one.
    pub pod_ip: String,
    /// Node name assigned at install time. Always known from the pod's
    /// install ordinal.
    pub install_node_name: String,
    /// Node name assigned once admitted to the database catalog.
    pub db_node_name: String,
    /// Whether the platform reports the pod as running.
    pub is_pod_running: bool,
    /// Whether the installer has run on this pod.
    pub is_installed: bool,
    /// Whether this pod belongs to the database catalog.
    pub db_exists: bool,
    /// Whether a database process is running (writable or read-only).
    pub up_node: bool,
    /// Whether the process is up but only accepting reads.
    pub read_only: bool,
    /// Whether the server is still replaying its catalog on startup.
    pub startup_in_progress: bool,
    /// Whether the license acceptance marker is present.
    pub eula_accepted: bool,
    /// Transient pods carry traffic during upgrades and are never restarted.
    pub is_transient: bool,
}

/// Facts parsed from the gather script output.
#[derive(Debug, Default, PartialEq, Eq)]
struct GatheredFacts {
    installed: bool,
    db_exists: bool,
    state: String,
    startup_in_progress: bool,
    eula_accepted: bool,
}

/// Cached per-cycle snapshot of all pod facts.
#[derive(Default)]
pub struct PodFacts {
    pub detail: BTreeMap<String, PodFact>,
    needs_collection: bool,
}

impl PodFacts {
    pub fn new() -> Self {
        Self {
            detail: BTreeMap::new(),
            needs_collection: true,
        }
    }

    /// Discard the cached facts. The next collect rebuilds from scratch.
    /// Called after any operation that changes node state so a stale fact
    /// cannot drive a repeated or contradictory decision.
    pub fn invalidate(&mut self) {
        self.detail.clear();
        self.needs_collection = true;
    }

    /// Gather facts for every expected pod. Pods absent from the platform
    /// are recorded unreachable; their install state falls back to the
    /// persisted subcluster counts.
    pub async fn collect(
        &mut self,
        cluster: &VantageCluster,
        runner: &dyn PodRunner,
        platform: &dyn PodStatusSource,
    ) -> Result<(), Error> {
        if !self.needs_collection {
            return Ok(());
        }
        self.detail.clear();

        let cluster_name = cluster
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Internal("cluster resource has no name".to_string()))?;
        let uid = cluster.metadata.uid.clone().unwrap_or_default();

        let mut install_order: usize = 0;
        for sc in &cluster.spec.subclusters {
            for idx in 0..sc.size {
                let pod_name = names::gen_pod_name(cluster_name, &sc.name, idx);
                let status = platform.get_pod(&pod_name).await?;

                let running = status.as_ref().map(|s| s.running).unwrap_or(false);
                let pod_ip = status
                    .as_ref()
                    .and_then(|s| s.pod_ip.clone())
                    .unwrap_or_default();

                let gathered = if running {
                    let out = runner
                        .exec_in_pod(
                            &pod_name,
                            names::SERVER_CONTAINER,
                            &gen_gather_command(&cluster.spec.db_name, &uid),
                        )
                        .await?;
                    parse_gather_output(&out.stdout)
                } else {
                    // Not probeable; fall back to what the status records.
                    let installed = cluster.subcluster_install_count(&sc.name) > idx;
                    GatheredFacts {
                        installed,
                        db_exists: cluster.subcluster_added_to_db_count(&sc.name) > idx,
                        state: String::new(),
                        startup_in_progress: false,
                        eula_accepted: installed,
                    }
                };

                // Membership in the database implies an installation.
                let is_installed = gathered.installed || gathered.db_exists;
                let up_node = gathered.state == STATE_UP || gathered.state == STATE_READ_ONLY;

                let fact = PodFact {
                    name: pod_name.clone(),
                    subcluster: sc.name.clone(),
                    pod_ip,
                    install_node_name: names::gen_install_node_name(install_order),
                    db_node_name: names::gen_db_node_name(&cluster.spec.db_name, install_order),
                    is_pod_running: running,
                    is_installed,
                    db_exists: gathered.db_exists,
                    up_node,
                    read_only: gathered.state == STATE_READ_ONLY,
                    startup_in_progress: gathered.startup_in_progress,
                    eula_accepted: gathered.eula_accepted,
                    is_transient: sc.is_transient,
                };
                debug!(pod = %pod_name, fact = ?fact, "Collected pod fact");
                self.detail.insert(pod_name, fact);
                install_order += 1;
            }
        }
        self.needs_collection = false;
        Ok(())
    }

    /// Nodes with a running, writable database process.
    pub fn up_writable_count(&self) -> usize {
        self.detail
            .values()
            .filter(|p| p.up_node && !p.read_only)
            .count()
    }

    /// True when every pod is running and none of them has an installation.
    pub fn all_running_and_zero_installed(&self) -> bool {
        self.detail.values().all(|p| p.is_pod_running) && self.install_count() == 0
    }

    pub fn install_count(&self) -> usize {
        self.detail.values().filter(|p| p.is_installed).count()
    }

    pub fn count_running_and_installed(&self) -> usize {
        self.detail
            .values()
            .filter(|p| p.is_pod_running && p.is_installed)
            .count()
    }

    /// Installed pods the platform has not brought up yet. These can never
    /// be restarted this cycle.
    pub fn count_installed_and_not_restartable(&self) -> usize {
        self.detail
            .values()
            .filter(|p| p.is_installed && !p.is_pod_running)
            .count()
    }

    /// Running pods whose database process needs a restart. Read-only
    /// processes qualify only when `restart_read_only` is set; transient
    /// pods only when `restart_transient` is set.
    pub fn find_restartable_pods(
        &self,
        restart_read_only: bool,
        restart_transient: bool,
    ) -> Vec<PodFact> {
        self.detail
            .values()
            .filter(|p| {
                p.is_pod_running
                    && (!p.up_node || (p.read_only && restart_read_only))
                    && (restart_transient || !p.is_transient)
            })
            .cloned()
            .collect()
    }

    /// Pods eligible for an address remap. With `only_pods_without_db`, the
    /// set narrows to installed pods not yet admitted to the database; the
    /// cluster-wide path remaps every installed pod.
    pub fn find_reip_pods(&self, only_pods_without_db: bool) -> Vec<PodFact> {
        self.detail
            .values()
            .filter(|p| p.is_installed && (!only_pods_without_db || !p.db_exists))
            .cloned()
            .collect()
    }

    /// A pod suitable for running admin operations while the cluster is
    /// down: installed, running, and with no database process. Starting the
    /// cluster from an already-running read-only node is not safe.
    pub fn find_pod_to_run_admin_offline(&self) -> Option<PodFact> {
        self.detail
            .values()
            .find(|p| p.is_pod_running && p.is_installed && !p.up_node)
            .cloned()
    }

    /// Any installed, running pod. Used when part of the cluster is healthy.
    pub fn find_pod_to_run_admin_any(&self) -> Option<PodFact> {
        self.detail
            .values()
            .find(|p| p.is_pod_running && p.is_installed)
            .cloned()
    }

    pub fn does_db_exist(&self) -> bool {
        self.detail.values().any(|p| p.db_exists)
    }
}

/// The fact-gather command run inside each reachable pod. Emits one
/// `key=value` line per fact so the output parser stays trivial.
fn gen_gather_command(db_name: &str, uid: &str) -> Vec<String> {
    let script = format!(
        "echo -n 'installed='; [[ -f {ind}{uid} ]] && echo true || echo false\n\
         echo -n 'db_exists='; [[ -d {cat} ]] && echo true || echo false\n\
         echo -n 'state='; {admin} -t node_state --local 2>/dev/null || echo DOWN\n\
         echo -n 'startup_in_progress='; [[ -f {startup} ]] && echo true || echo false\n\
         echo -n 'eula_accepted='; [[ -f {eula} ]] && echo true || echo false",
        ind = paths::INSTALL_INDICATOR_PREFIX,
        uid = uid,
        cat = paths::catalog_path(db_name),
        admin = paths::ADMIN_TOOL,
        startup = paths::STARTUP_IN_PROGRESS_FILE,
        eula = paths::EULA_ACCEPTANCE_FILE,
    );
    vec!["bash".to_string(), "-c".to_string(), script]
}

/// Parse gather output. Unknown keys and malformed lines are ignored;
/// missing keys keep their zero value.
fn parse_gather_output(stdout: &str) -> GatheredFacts {
    let mut facts = GatheredFacts::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "installed" => facts.installed = value == "true",
            "db_exists" => facts.db_exists = value == "true",
            "state" => facts.state = value.to_string(),
            "startup_in_progress" => facts.startup_in_progress = value == "true",
            "eula_accepted" => facts.eula_accepted = value == "true",
            _ => {}
        }
    }
    facts
}


#[cfg(test)]
mod tests {
    use super::test_util::{facts_of, make_fact};
    use super::*;
    use crate::crd::test_util::make_cluster;
    use crate::exec::fake::FakePodRunner;
    use crate::platform::fake::FakePodStatusSource;

    #[test]
    fn test_parse_gather_output() {
        let out = "installed=true\ndb_exists=true\nstate=READ_ONLY\n\
                   startup_in_progress=false\neula_accepted=true\n";
        let facts = parse_gather_output(out);
        assert!(facts.installed);
        assert!(facts.db_exists);
        assert_eq!(facts.state, "READ_ONLY");
        assert!(!facts.startup_in_progress);
        assert!(facts.eula_accepted);
    }

    #[test]
    fn test_parse_gather_output_tolerates_garbage() {
        let facts = parse_gather_output("no equals here\nstate=DOWN\nbogus=true\n");
        assert_eq!(facts.state, "DOWN");
        assert!(!facts.installed);
    }

    #[tokio::test]
    async fn test_collect_mixed_states() {
        let cluster = make_cluster();
        let runner = FakePodRunner::new();
        let platform = FakePodStatusSource::new();

        // vt-main-0 up, vt-main-1 down process, vt-main-2 missing from the
        // platform entirely.
        platform.set_running("vt-main-0", "10.0.0.1", Some(true));
        platform.set_running("vt-main-1", "10.0.0.2", Some(true));
        runner.queue_output(
            "vt-main-0",
            "installed=true\ndb_exists=true\nstate=UP\nstartup_in_progress=false\neula_accepted=true\n",
        );
        runner.queue_output(
            "vt-main-1",
            "installed=true\ndb_exists=true\nstate=DOWN\nstartup_in_progress=false\neula_accepted=true\n",
        );

        let mut pfacts = PodFacts::new();
        pfacts.collect(&cluster, &runner, &platform).await.unwrap();

        assert_eq!(pfacts.detail.len(), 3);
        let up = &pfacts.detail["vt-main-0"];
        assert!(up.up_node && !up.read_only);
        assert_eq!(up.install_node_name, "node0001");
        assert_eq!(up.db_node_name, "v_mart_node0001");

        let down = &pfacts.detail["vt-main-1"];
        assert!(down.is_pod_running && !down.up_node);

        let absent = &pfacts.detail["vt-main-2"];
        assert!(!absent.is_pod_running);
        assert!(!absent.is_installed);
        assert_eq!(pfacts.up_writable_count(), 1);
    }

    #[tokio::test]
    async fn test_collect_is_cached_until_invalidated() {
        let cluster = make_cluster();
        let runner = FakePodRunner::new();
        let platform = FakePodStatusSource::new();

        let mut pfacts = PodFacts::new();
        pfacts.collect(&cluster, &runner, &platform).await.unwrap();
        let first = runner.history_len();
        pfacts.collect(&cluster, &runner, &platform).await.unwrap();
        assert_eq!(runner.history_len(), first);

        pfacts.invalidate();
        assert!(pfacts.detail.is_empty());
        pfacts.collect(&cluster, &runner, &platform).await.unwrap();
        assert_eq!(pfacts.detail.len(), 3);
    }

    #[tokio::test]
    async fn test_collect_unreachable_pod_uses_status_counts() {
        let mut cluster = make_cluster();
        cluster.status = Some(crate::crd::VantageClusterStatus {
            subclusters: vec![crate::crd::SubclusterStatus {
                name: "main".to_string(),
                install_count: 2,
                added_to_db_count: 1,
            }],
            ..Default::default()
        });

        let runner = FakePodRunner::new();
        let platform = FakePodStatusSource::new();
        let mut pfacts = PodFacts::new();
        pfacts.collect(&cluster, &runner, &platform).await.unwrap();

        assert!(pfacts.detail["vt-main-0"].is_installed);
        assert!(pfacts.detail["vt-main-0"].db_exists);
        assert!(pfacts.detail["vt-main-1"].is_installed);
        assert!(!pfacts.detail["vt-main-1"].db_exists);
        assert!(!pfacts.detail["vt-main-2"].is_installed);
        assert_eq!(pfacts.count_installed_and_not_restartable(), 2);
    }

    #[test]
    fn test_read_only_counts() {
        let mut ro = make_fact("p2", "10.0.0.2", 1);
        ro.read_only = true;
        let facts = facts_of(vec![make_fact("p1", "10.0.0.1", 0), ro]);
        assert_eq!(facts.up_writable_count(), 1);
    }

    #[test]
    fn test_find_restartable_pods() {
        let mut down = make_fact("p1", "10.0.0.1", 0);
        down.up_node = false;
        let mut ro = make_fact("p2", "10.0.0.2", 1);
        ro.read_only = true;
        let mut transient = make_fact("p3", "10.0.0.3", 2);
        transient.up_node = false;
        transient.is_transient = true;
        let facts = facts_of(vec![down, ro, transient, make_fact("p4", "10.0.0.4", 3)]);

        let restartable = facts.find_restartable_pods(false, false);
        assert_eq!(restartable.len(), 1);
        assert_eq!(restartable[0].name, "p1");

        let with_ro = facts.find_restartable_pods(true, false);
        assert_eq!(with_ro.len(), 2);

        let with_transient = facts.find_restartable_pods(false, true);
        assert_eq!(with_transient.len(), 2);
    }

    #[test]
    fn test_find_reip_pods() {
        let mut fresh = make_fact("p1", "10.0.0.1", 0);
        fresh.db_exists = false;
        let mut uninstalled = make_fact("p2", "10.0.0.2", 1);
        uninstalled.is_installed = false;
        uninstalled.db_exists = false;
        let facts = facts_of(vec![fresh, uninstalled, make_fact("p3", "10.0.0.3", 2)]);

        let all = facts.find_reip_pods(false);
        assert_eq!(all.len(), 2);

        let without_db = facts.find_reip_pods(true);
        assert_eq!(without_db.len(), 1);
        assert_eq!(without_db[0].name, "p1");
    }

    #[test]
    fn test_find_admin_pods() {
        let mut ro = make_fact("p1", "10.0.0.1", 0);
        ro.read_only = true;
        let mut down = make_fact("p2", "10.0.0.2", 1);
        down.up_node = false;
        let facts = facts_of(vec![ro.clone(), down]);

        // Offline selection must skip the read-only node.
        assert_eq!(facts.find_pod_to_run_admin_offline().unwrap().name, "p2");
        assert_eq!(facts.find_pod_to_run_admin_any().unwrap().name, "p1");

        let only_ro = facts_of(vec![ro]);
        assert!(only_ro.find_pod_to_run_admin_offline().is_none());
    }

    #[test]
    fn test_cluster_counters() {
        let mut a = make_fact("p1", "10.0.0.1", 0);
        a.is_installed = false;
        a.db_exists = false;
        a.up_node = false;
        let b = make_fact("p2", "10.0.0.2", 1);
        let facts = facts_of(vec![a, b]);
        assert!(!facts.all_running_and_zero_installed());
        assert_eq!(facts.count_running_and_installed(), 1);
        assert!(facts.does_db_exist());
    }
}
