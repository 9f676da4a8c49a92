//! On-pod filesystem paths used by the operator.

/// The cluster configuration file. Holds one `nodeNNNN = <address>,...` line
/// per installed node; the addresses in here are the *old* addresses after a
/// pod reschedule.
pub const CLUSTER_CONF: &str = "/opt/vantage/config/cluster.conf";

/// The address map file consumed by `adminctl -t re_ip`. Only ever used while
/// remapping node addresses.
pub const IP_MAP_FILE: &str = "/opt/vantage/config/ip_map.txt";

/// Prefix of the file that marks a pod as having run the installer. The
/// cluster UID is appended so a reinstall is forced when the custom resource
/// is recreated.
pub const INSTALL_INDICATOR_PREFIX: &str = "/opt/vantage/config/install.called.for.uid.";

/// Acceptance marker written once the end-user license has been accepted.
pub const EULA_ACCEPTANCE_FILE: &str = "/opt/vantage/config/eula_accepted.dat";

/// Script that records license acceptance.
pub const EULA_ACCEPT_SCRIPT: &str = "/opt/vantage/config/accept_eula.sh";

/// Bundled copy of the acceptance script shipped in the server image.
pub const EULA_ACCEPT_SCRIPT_SOURCE: &str = "/opt/vantage/share/eula/accept_eula.sh";

/// Root of the local data area. Each database keeps its catalog under
/// `<DATA_PATH>/<dbname>/catalog`.
pub const DATA_PATH: &str = "/opt/vantage/data";

/// Marker file present while the server is replaying its catalog on startup.
pub const STARTUP_IN_PROGRESS_FILE: &str = "/opt/vantage/log/startup.inprogress";

/// The admin utility used for cluster-level operations.
pub const ADMIN_TOOL: &str = "/opt/vantage/bin/adminctl";

/// Catalog directory for the given database name.
pub fn catalog_path(db_name: &str) -> String {
    format!("{}/{}/catalog", DATA_PATH, db_name)
}
