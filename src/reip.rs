//! Address map construction for the re-ip operation.
//!
//! When pods reschedule they come back with new addresses while the cluster
//! configuration still records the old ones. The map builder pairs old and
//! new addresses for every target node it can resolve and tells the caller
//! whether a remap is needed at all. Remapping is expensive and rewrites
//! the remote configuration, so an unchanged map must never be applied.

use std::collections::HashMap;

use tracing::info;

use crate::paths;
use crate::podfacts::PodFact;

/// Result of building the address map.
#[derive(Debug, Default)]
pub struct AddressMap {
    /// `(old, new)` pairs in target traversal order.
    pub pairs: Vec<(String, String)>,
    /// True when at least one pair differs.
    pub address_changed: bool,
    /// False when the map cannot be built yet (no targets, or a target's
    /// new address is unknowable because its pod is not running). The
    /// caller must requeue.
    pub ok: bool,
}

/// Build the address map from the previously recorded addresses and the
/// current target pods.
///
/// Old addresses are keyed by install-time node name: the database node
/// name is only assigned after admission, and a remap can involve a mix of
/// admitted and not-yet-admitted nodes. A target with no recorded old
/// address is skipped without failing the batch; it may have been retired
/// from the map already.
pub fn build_address_map(old_addresses: &HashMap<String, String>, pods: &[PodFact]) -> AddressMap {
    let mut map = AddressMap {
        ok: true,
        ..Default::default()
    };

    if pods.is_empty() {
        info!("No pods qualify for an address remap yet");
        map.ok = false;
        return map;
    }

    for pod in pods {
        if !pod.is_pod_running {
            // The new address is unknowable until the pod comes up.
            info!(pod = %pod.name, "Not all remap targets are running");
            return AddressMap::default();
        }
        let old_ip = match old_addresses.get(&pod.install_node_name) {
            Some(ip) => ip,
            None => continue,
        };
        if *old_ip != pod.pod_ip {
            map.address_changed = true;
        }
        map.pairs.push((old_ip.clone(), pod.pod_ip.clone()));
    }
    map
}

/// Render the map file uploaded to the admin pod: one `<old> <new>` line
/// per remapped node.
pub fn format_map_file(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(old, new)| format!("{} {}", old, new))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Command that writes the map file contents to the fixed remote path.
pub fn gen_map_file_upload_cmd(contents: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!("cat > {}<<< '{}'", paths::IP_MAP_FILE, contents),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::podfacts::test_util::make_fact;

    fn old_addrs(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_targets_not_ok() {
        let map = build_address_map(&old_addrs(&[("node0001", "10.0.0.1")]), &[]);
        assert!(!map.ok);
        assert!(map.pairs.is_empty());
    }

    #[test]
    fn test_unreachable_target_not_ok() {
        let mut stopped = make_fact("p2", "10.0.9.2", 1);
        stopped.is_pod_running = false;
        let pods = vec![make_fact("p1", "10.0.9.1", 0), stopped];
        let map = build_address_map(
            &old_addrs(&[("node0001", "10.0.0.1"), ("node0002", "10.0.0.2")]),
            &pods,
        );
        assert!(!map.ok);
        assert!(map.pairs.is_empty());
    }

    #[test]
    fn test_missing_old_address_is_skipped() {
        let pods = vec![make_fact("p1", "10.0.9.1", 0), make_fact("p2", "10.0.9.2", 1)];
        let map = build_address_map(&old_addrs(&[("node0002", "10.0.0.2")]), &pods);
        assert!(map.ok);
        assert!(map.address_changed);
        assert_eq!(map.pairs, vec![("10.0.0.2".to_string(), "10.0.9.2".to_string())]);
    }

    #[test]
    fn test_unchanged_addresses() {
        let pods = vec![make_fact("p1", "10.0.0.1", 0), make_fact("p2", "10.0.0.2", 1)];
        let map = build_address_map(
            &old_addrs(&[("node0001", "10.0.0.1"), ("node0002", "10.0.0.2")]),
            &pods,
        );
        assert!(map.ok);
        assert!(!map.address_changed);
        assert_eq!(map.pairs.len(), 2);
    }

    #[test]
    fn test_pairs_follow_target_order() {
        let pods = vec![make_fact("pb", "10.0.9.2", 1), make_fact("pa", "10.0.9.1", 0)];
        let map = build_address_map(
            &old_addrs(&[("node0001", "10.0.0.1"), ("node0002", "10.0.0.2")]),
            &pods,
        );
        assert_eq!(
            map.pairs,
            vec![
                ("10.0.0.2".to_string(), "10.0.9.2".to_string()),
                ("10.0.0.1".to_string(), "10.0.9.1".to_string()),
            ]
        );
    }

    #[test]
    fn test_format_and_upload_cmd() {
        let pairs = vec![
            ("10.0.0.1".to_string(), "10.0.9.1".to_string()),
            ("10.0.0.2".to_string(), "10.0.9.2".to_string()),
        ];
        let contents = format_map_file(&pairs);
        assert_eq!(contents, "10.0.0.1 10.0.9.1\n10.0.0.2 10.0.9.2");

        let cmd = gen_map_file_upload_cmd(&contents);
        assert_eq!(cmd[0], "bash");
        assert!(cmd[2].contains(paths::IP_MAP_FILE));
        assert!(cmd[2].contains("10.0.9.2"));
    }
}
