//! Fire-and-forget event reporting for major cluster operations.
//!
//! Events are advisory. Nothing in the reconcile logic reads them back, so
//! the sink is a plain trait the controller wires up once; failures to
//! publish are swallowed by the sink itself.

use tracing::{info, warn};

/// Event severities, mirroring the platform's Normal/Warning split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Well-known event reasons.
pub mod reason {
    pub const NODE_RESTART_STARTED: &str = "NodeRestartStarted";
    pub const NODE_RESTART_SUCCEEDED: &str = "NodeRestartSucceeded";
    pub const CLUSTER_RESTART_STARTED: &str = "ClusterRestartStarted";
    pub const CLUSTER_RESTART_SUCCEEDED: &str = "ClusterRestartSucceeded";
    pub const REIP_FAILED: &str = "ReipFailed";
    pub const ADMIN_OP_FAILED: &str = "AdminOpFailed";
}

/// Sink for operation start/success/failure notifications.
pub trait EventSink: Send + Sync {
    fn publish(&self, event_type: EventType, reason: &str, message: &str);
}

/// Default sink that forwards events to the log stream.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => info!(reason = %reason, "{}", message),
            EventType::Warning => warn!(reason = %reason, "{}", message),
        }
    }
}
