//! Custom Resource Definitions for Vantage

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::version::{VersionInfo, VERSION_ANNOTATION};

/// VantageCluster represents a Vantage analytic database cluster
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vantage.io",
    version = "v1alpha1",
    kind = "VantageCluster",
    plural = "vantageclusters",
    shortname = "vc",
    status = "VantageClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"UpNodes","type":"integer","jsonPath":".status.upNodeCount"}"#,
    printcolumn = r#"{"name":"Installed","type":"integer","jsonPath":".status.installCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VantageClusterSpec {
    /// Name of the database the cluster serves
    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// Server image to deploy
    #[serde(default)]
    pub image: String,

    /// Subclusters making up the database
    #[serde(default)]
    pub subclusters: Vec<Subcluster>,

    /// Replication redundancy level. With k-safety 0 a cluster restart
    /// requires every installed node to be present.
    #[serde(default)]
    pub k_safety: KSafety,

    /// Whether the operator restarts down nodes automatically
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// How the database comes into existence
    #[serde(default)]
    pub init_policy: InitPolicy,

    /// Timeout override, in seconds, passed to restart operations. Zero
    /// means the admin tool default.
    #[serde(default)]
    pub restart_timeout: i32,

    /// Skip the cluster lease check when starting the whole cluster
    #[serde(default)]
    pub ignore_cluster_lease: bool,
}

fn default_db_name() -> String {
    "vantagedb".to_string()
}

fn default_true() -> bool {
    true
}

/// A named group of nodes within the cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subcluster {
    pub name: String,

    /// Number of pods in this subcluster
    pub size: i32,

    /// Primary subclusters hold shard ownership; secondaries can fall into
    /// read-only mode when they lose cluster quorum.
    #[serde(default = "default_true")]
    pub is_primary: bool,

    /// Transient subclusters exist only to carry client traffic during an
    /// upgrade. Their pods never qualify for a restart.
    #[serde(default)]
    pub is_transient: bool,
}

/// Replication factor (k-safety) of the database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum KSafety {
    #[serde(rename = "0")]
    Zero,
    #[default]
    #[serde(rename = "1")]
    One,
}

/// How the database is initialized
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum InitPolicy {
    /// The operator creates the database
    #[default]
    Create,
    /// The operator revives an existing database from communal storage
    Revive,
    /// The database lifecycle is managed outside the operator; only
    /// scheduling is handled here
    ScheduleOnly,
}

/// Status of a VantageCluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VantageClusterStatus {
    /// Number of pods that have run the installer
    #[serde(default)]
    pub install_count: i32,

    /// Number of nodes with a running database process
    #[serde(default)]
    pub up_node_count: i32,

    /// Number of nodes admitted to the database catalog
    #[serde(default)]
    pub added_to_db_count: i32,

    /// Per-subcluster detail
    #[serde(default)]
    pub subclusters: Vec<SubclusterStatus>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

/// Persisted per-subcluster counts. These survive pod restarts, which is how
/// the operator knows a currently-unreachable pod has an installation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterStatus {
    pub name: String,

    /// How many pods of this subcluster, counted from ordinal zero, have run
    /// the installer
    #[serde(default)]
    pub install_count: i32,

    /// How many pods have been admitted to the database
    #[serde(default)]
    pub added_to_db_count: i32,
}

/// Cluster condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: Option<String>,

    /// Reason
    pub reason: Option<String>,

    /// Message
    pub message: Option<String>,
}

impl VantageCluster {
    /// The running server version, parsed from the version annotation. The
    /// annotation is maintained by the image-change flow; absence simply
    /// disables version-gated command flags.
    pub fn server_version(&self) -> Option<VersionInfo> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(VERSION_ANNOTATION))
            .and_then(|v| VersionInfo::parse(v))
    }

    /// Persisted install count for the given subcluster name.
    pub fn subcluster_install_count(&self, subcluster: &str) -> i32 {
        self.status
            .as_ref()
            .map(|s| &s.subclusters)
            .and_then(|scs| scs.iter().find(|s| s.name == subcluster))
            .map(|s| s.install_count)
            .unwrap_or(0)
    }

    /// Persisted added-to-db count for the given subcluster name.
    pub fn subcluster_added_to_db_count(&self, subcluster: &str) -> i32 {
        self.status
            .as_ref()
            .map(|s| &s.subclusters)
            .and_then(|scs| scs.iter().find(|s| s.name == subcluster))
            .map(|s| s.added_to_db_count)
            .unwrap_or(0)
    }
}
