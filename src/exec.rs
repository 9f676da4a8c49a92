//! Remote command execution inside cluster pods.
//!
//! Everything the reconcile engine does on a node goes through [`PodRunner`]:
//! probing facts, killing processes, invoking admin operations. The trait is
//! synchronous from the engine's point of view; timeouts and cancellation
//! belong to the transport, not to the callers.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::Error;
use crate::paths;

/// Captured output of a remote command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes commands inside a pod's server container.
#[async_trait]
pub trait PodRunner: Send + Sync {
    /// Run a command in the given pod. A nonzero exit is returned as
    /// [`Error::CommandFailed`] with the captured output attached.
    async fn exec_in_pod(
        &self,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, Error>;

    /// Run the admin utility with the given arguments.
    async fn exec_admin(
        &self,
        pod: &str,
        container: &str,
        args: &[String],
    ) -> Result<ExecOutput, Error> {
        let mut command = vec![paths::ADMIN_TOOL.to_string()];
        command.extend_from_slice(args);
        self.exec_in_pod(pod, container, &command).await
    }
}

/// Pod runner backed by the Kubernetes exec subresource.
pub struct KubePodRunner {
    client: Client,
    namespace: String,
}

impl KubePodRunner {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl PodRunner for KubePodRunner {
    async fn exec_in_pod(
        &self,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, Error> {
        debug!(pod = %pod, command = ?command, "Executing command in pod");

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let ap = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);
        let mut attached = api.exec(pod, command.iter().map(String::as_str), &ap).await?;

        let mut stdout = String::new();
        if let Some(mut reader) = attached.stdout() {
            reader
                .read_to_string(&mut stdout)
                .await
                .map_err(|e| Error::Internal(format!("reading exec stdout: {}", e)))?;
        }
        let mut stderr = String::new();
        if let Some(mut reader) = attached.stderr() {
            reader
                .read_to_string(&mut stderr)
                .await
                .map_err(|e| Error::Internal(format!("reading exec stderr: {}", e)))?;
        }

        let status = match attached.take_status() {
            Some(fut) => fut.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::Internal(format!("joining exec: {}", e)))?;

        if let Some(st) = status {
            if st.status.as_deref() != Some("Success") {
                return Err(Error::CommandFailed {
                    pod: pod.to_string(),
                    stdout,
                    stderr: st.message.unwrap_or(stderr),
                });
            }
        }

        Ok(ExecOutput { stdout, stderr })
    }
}
