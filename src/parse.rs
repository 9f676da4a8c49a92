//! Pure text parsers for admin tool output.
//!
//! Both parsers are total: malformed lines are skipped, never an error.
//! Absence of a node from the result is the only signal the callers act on.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// Number of header lines preceding the data rows in `list_nodes` output.
const LIST_NODES_HEADER_LINES: usize = 2;

/// Minimum column count for a well-formed `list_nodes` row.
const LIST_NODES_COL_COUNT: usize = 4;

lazy_static! {
    /// Matches a node entry in the cluster config file, e.g.
    /// `node0001 = 10.244.1.6,/opt/vantage/data,/opt/vantage/data`.
    static ref CONF_NODE_RE: Regex = Regex::new(r"^(node\d{4}) = ([\d.:a-fA-F]+),").unwrap();
}

/// Parse the output of `adminctl -t list_nodes` into a map of database node
/// name to state.
///
/// The output looks like:
///
/// ```text
///  Node          | Host       | State | Version         | DB
/// ---------------+------------+-------+-----------------+----
///  v_db_node0001 | 10.244.1.6 | UP    | vantage-v2.2.0  | db
/// ```
///
/// The two header lines are skipped; rows with fewer than four pipe-separated
/// columns are ignored.
pub fn parse_cluster_node_status(stdout: &str) -> HashMap<String, String> {
    let mut state_map = HashMap::new();
    let lines: Vec<&str> = stdout.split('\n').collect();
    if lines.len() <= LIST_NODES_HEADER_LINES {
        return state_map;
    }
    for line in &lines[LIST_NODES_HEADER_LINES..] {
        let cols: Vec<&str> = line.split('|').collect();
        if cols.len() < LIST_NODES_COL_COUNT {
            continue;
        }
        let node = cols[0].trim();
        let state = cols[2].trim();
        state_map.insert(node.to_string(), state.to_string());
    }
    state_map
}

/// Parse node-name/address pairs out of cluster config file text. The text
/// passed in is the grep of the node lines, so multiple entries arrive joined
/// with newlines. Only install-time node names are handled here; database
/// node names are assigned later and never appear in the config file.
pub fn parse_config_node_addresses(node_text: &str) -> HashMap<String, String> {
    let mut addresses = HashMap::new();
    for line in node_text.split('\n') {
        if let Some(caps) = CONF_NODE_RE.captures(line) {
            addresses.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_status_single_row() {
        let raw = " Node          | Host       | State | Version | DB\n\
                    ---------------+------------+-------+---------+----\n\
                    v_db_node0001 | 10.0.0.1 | UP | verX | db\n";
        let states = parse_cluster_node_status(raw);
        assert_eq!(states.len(), 1);
        assert_eq!(states.get("v_db_node0001").map(String::as_str), Some("UP"));
    }

    #[test]
    fn test_parse_node_status_short_row_skipped() {
        let raw = "header\n\
                   ------\n\
                   v_db_node0001 | 10.0.0.1 | UP\n";
        assert!(parse_cluster_node_status(raw).is_empty());
    }

    #[test]
    fn test_parse_node_status_mixed_states() {
        let raw = " Node | Host | State | Version | DB\n\
                   ------+------+-------+---------+----\n\
                    v_db_node0001 | 10.244.1.6 | UP    | vantage-v2.2.0 | db\n\
                    v_db_node0002 | 10.244.1.7 | DOWN  | vantage-v2.2.0 | db\n\
                   \n";
        let states = parse_cluster_node_status(raw);
        assert_eq!(states.len(), 2);
        assert_eq!(states["v_db_node0001"], "UP");
        assert_eq!(states["v_db_node0002"], "DOWN");
    }

    #[test]
    fn test_parse_node_status_headers_only() {
        assert!(parse_cluster_node_status("header\n------\n").is_empty());
        assert!(parse_cluster_node_status("").is_empty());
    }

    #[test]
    fn test_parse_config_node_addresses() {
        let text = "node0001 = 10.244.1.6,/opt/vantage/data,/opt/vantage/data\n\
                    node0002 = 10.244.1.7,/opt/vantage/data,/opt/vantage/data\n\
                    not a node line\n";
        let addrs = parse_config_node_addresses(text);
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs["node0001"], "10.244.1.6");
        assert_eq!(addrs["node0002"], "10.244.1.7");
    }

    #[test]
    fn test_parse_config_node_addresses_ipv6() {
        let text = "node0003 = fd00::3,/opt/vantage/data,/opt/vantage/data";
        let addrs = parse_config_node_addresses(text);
        assert_eq!(addrs["node0003"], "fd00::3");
    }

    #[test]
    fn test_parse_config_node_addresses_garbage() {
        assert!(parse_config_node_addresses("").is_empty());
        assert!(parse_config_node_addresses("node12 = 1.2.3.4,").is_empty());
    }
}
