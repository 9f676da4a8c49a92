//! Pod status as reported by the orchestration platform.
//!
//! The reconcile engine never talks to the Kubernetes API for pod state
//! directly; it consumes this narrow view so the decision logic can be
//! exercised without a cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;

use crate::error::Error;
use crate::names;

/// Liveness probe timing for the server container.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTiming {
    pub period_seconds: i32,
    pub failure_threshold: i32,
}

/// The slice of platform pod state the engine consumes.
#[derive(Debug, Clone, Default)]
pub struct PodProbeStatus {
    /// Whether the platform reports the pod as running.
    pub running: bool,
    /// The pod's current network address, if assigned.
    pub pod_ip: Option<String>,
    /// The server container's startup-probe completion flag. `None` when the
    /// platform has not reported container status yet.
    pub container_started: Option<bool>,
    /// Liveness probe timing, when one is configured.
    pub liveness_probe: Option<ProbeTiming>,
}

/// Read-only source of platform pod status.
#[async_trait]
pub trait PodStatusSource: Send + Sync {
    /// Fetch the pod's status. Returns `Ok(None)` when the pod does not
    /// exist; absence is a normal state, never an error.
    async fn get_pod(&self, name: &str) -> Result<Option<PodProbeStatus>, Error>;
}

/// Kubernetes-backed status source.
pub struct KubePodStatusSource {
    client: Client,
    namespace: String,
}

impl KubePodStatusSource {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl PodStatusSource for KubePodStatusSource {
    async fn get_pod(&self, name: &str) -> Result<Option<PodProbeStatus>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod = match api.get_opt(name).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let status = pod.status.as_ref();
        let running = status
            .and_then(|s| s.phase.as_deref())
            .map(|p| p == "Running")
            .unwrap_or(false);
        let pod_ip = status.and_then(|s| s.pod_ip.clone());

        // Container statuses are not guaranteed to follow the container
        // definition order.
        let container_started = status
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|cs| {
                cs.iter()
                    .find(|c| c.name == names::SERVER_CONTAINER)
                    .and_then(|c| c.started)
            });

        let liveness_probe = pod
            .spec
            .as_ref()
            .and_then(|spec| {
                spec.containers
                    .iter()
                    .find(|c| c.name == names::SERVER_CONTAINER)
            })
            .and_then(|c| c.liveness_probe.as_ref())
            .map(|probe| ProbeTiming {
                period_seconds: probe.period_seconds.unwrap_or(10),
                failure_threshold: probe.failure_threshold.unwrap_or(3),
            });

        Ok(Some(PodProbeStatus {
            running,
            pod_ip,
            container_started,
            liveness_probe,
        }))
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory status source for unit tests.
    #[derive(Default)]
    pub struct FakePodStatusSource {
        pods: Mutex<HashMap<String, PodProbeStatus>>,
    }

    impl FakePodStatusSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_pod(&self, name: &str, status: PodProbeStatus) {
            self.pods
                .lock()
                .unwrap()
                .insert(name.to_string(), status);
        }

        /// Convenience for the common "running pod with an address" shape.
        pub fn set_running(&self, name: &str, ip: &str, started: Option<bool>) {
            self.set_pod(
                name,
                PodProbeStatus {
                    running: true,
                    pod_ip: Some(ip.to_string()),
                    container_started: started,
                    liveness_probe: Some(ProbeTiming {
                        period_seconds: 10,
                        failure_threshold: 3,
                    }),
                },
            );
        }
    }

    #[async_trait]
    impl PodStatusSource for FakePodStatusSource {
        async fn get_pod(&self, name: &str) -> Result<Option<PodProbeStatus>, Error> {
            Ok(self.pods.lock().unwrap().get(name).cloned())
        }
    }
}
