//! Error types for the Vantage operator

use thiserror::Error;

/// Main error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("CRD not installed. Please install the Vantage CRDs first.")]
    CrdNotInstalled,

    #[error("command failed in pod {pod}: {stderr}")]
    CommandFailed {
        pod: String,
        stdout: String,
        stderr: String,
    },

    #[error("admin operation '{op}' failed: {detail}")]
    AdminCommandFailed { op: String, detail: String },

    #[error("invalid cluster state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The remote stdout attached to a command failure, if any. Used when
    /// reporting events so the failure can be diagnosed without re-running
    /// the command.
    pub fn remote_output(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}
