//! Naming conventions for cluster objects.

/// Name of the server container inside each pod.
pub const SERVER_CONTAINER: &str = "server";

/// Generate the pod name for the given subcluster ordinal. Pods are managed
/// by one StatefulSet per subcluster, so the name is deterministic.
pub fn gen_pod_name(cluster_name: &str, subcluster_name: &str, index: i32) -> String {
    format!("{}-{}-{}", cluster_name, subcluster_name, index)
}

/// Node name assigned at install time, before the node joins a database.
/// Numbering starts at 1 and follows the install (pod ordinal) order.
pub fn gen_install_node_name(install_order: usize) -> String {
    format!("node{:04}", install_order + 1)
}

/// Node name assigned once the node has been admitted to the database
/// catalog.
pub fn gen_db_node_name(db_name: &str, install_order: usize) -> String {
    format!("v_{}_node{:04}", db_name.to_lowercase(), install_order + 1)
}
