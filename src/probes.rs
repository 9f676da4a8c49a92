//! Probe-aware gating of restart candidates.
//!
//! The platform's own health probes evict pods the operator must not race.
//! Two filter stages narrow a candidate set: one drops pods whose startup
//! probe already finished (the liveness probe owns them now), one drops pods
//! whose server is still mid-startup. Both report how many pods they
//! removed so the caller can tell "nothing ready yet" from "nothing down".

use std::time::Duration;

use tracing::info;

use crate::error::Error;
use crate::platform::{PodStatusSource, ProbeTiming};
use crate::podfacts::PodFact;

/// Fraction of the liveness probe window to wait before requeueing. A full
/// exponential backoff would routinely outwait the probe itself.
const PCT_OF_LIVENESS_PROBE_WAIT: f32 = 0.25;

/// Floor for the probe-derived wait.
const MIN_WAIT_SECONDS: u64 = 10;

/// Survivors of a filter stage plus the number of pods removed.
#[derive(Debug)]
pub struct Filtered {
    pub kept: Vec<PodFact>,
    pub removed: usize,
}

/// Drop pods whose startup probe has already completed. Those pods are
/// presumed under imminent liveness-probe eviction; restarting into them
/// risks losing the pod mid-restart.
pub async fn filter_startup_probe_active(
    platform: &dyn PodStatusSource,
    pods: Vec<PodFact>,
) -> Result<Filtered, Error> {
    let total = pods.len();
    let mut kept = Vec::with_capacity(total);
    for pod in pods {
        if is_startup_probe_active(platform, &pod.name).await? {
            kept.push(pod);
        } else {
            info!(pod = %pod.name,
                "Not restarting pod because its startup probe is not active anymore. \
                 Waiting for the liveness probe to reschedule it");
        }
    }
    Ok(Filtered {
        removed: total - kept.len(),
        kept,
    })
}

/// Whether the pod's startup probe is still active. Pods without probe
/// configuration, without reported container status, or missing from the
/// platform are treated as startup-active; units predating probe support
/// must stay restartable.
async fn is_startup_probe_active(
    platform: &dyn PodStatusSource,
    pod_name: &str,
) -> Result<bool, Error> {
    let status = match platform.get_pod(pod_name).await? {
        Some(s) => s,
        None => return Ok(true),
    };
    if status.liveness_probe.is_none() {
        return Ok(true);
    }
    match status.container_started {
        Some(started) => Ok(!started),
        None => Ok(true),
    }
}

/// Drop pods whose server is still working through startup. They likely
/// carry a large catalog; the health probes either let them finish or evict
/// them on their own schedule.
pub fn filter_slow_startup(pods: Vec<PodFact>) -> Filtered {
    let total = pods.len();
    let kept: Vec<PodFact> = pods.into_iter().filter(|p| !p.startup_in_progress).collect();
    Filtered {
        removed: total - kept.len(),
        kept,
    }
}

/// Wait duration derived from the liveness probe window: a quarter of
/// `period * failure_threshold`, floored at ten seconds.
pub fn liveness_wait(timing: &ProbeTiming) -> Duration {
    let window = (timing.period_seconds * timing.failure_threshold) as f32;
    let wait = (window * PCT_OF_LIVENESS_PROBE_WAIT) as u64;
    Duration::from_secs(wait.max(MIN_WAIT_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePodStatusSource;
    use crate::platform::PodProbeStatus;
    use crate::podfacts::test_util::make_fact;

    #[tokio::test]
    async fn test_startup_filter_empty_input() {
        let platform = FakePodStatusSource::new();
        let filtered = filter_startup_probe_active(&platform, vec![]).await.unwrap();
        assert!(filtered.kept.is_empty());
        assert_eq!(filtered.removed, 0);
    }

    #[tokio::test]
    async fn test_startup_filter_removes_started_pods() {
        let platform = FakePodStatusSource::new();
        platform.set_running("p1", "10.0.0.1", Some(true));
        platform.set_running("p2", "10.0.0.2", Some(false));

        let pods = vec![make_fact("p1", "10.0.0.1", 0), make_fact("p2", "10.0.0.2", 1)];
        let filtered = filter_startup_probe_active(&platform, pods).await.unwrap();
        assert_eq!(filtered.removed, 1);
        assert_eq!(filtered.kept.len(), 1);
        assert_eq!(filtered.kept[0].name, "p2");
    }

    #[tokio::test]
    async fn test_startup_filter_keeps_unknown_pods() {
        // Pod missing from the platform, pod with no probe configured, and
        // pod with no container status all stay in the candidate set.
        let platform = FakePodStatusSource::new();
        platform.set_pod(
            "no-probe",
            PodProbeStatus {
                running: true,
                pod_ip: Some("10.0.0.2".to_string()),
                container_started: Some(true),
                liveness_probe: None,
            },
        );
        platform.set_running("no-status", "10.0.0.3", None);

        let pods = vec![
            make_fact("absent", "10.0.0.1", 0),
            make_fact("no-probe", "10.0.0.2", 1),
            make_fact("no-status", "10.0.0.3", 2),
        ];
        let filtered = filter_startup_probe_active(&platform, pods).await.unwrap();
        assert_eq!(filtered.removed, 0);
        assert_eq!(filtered.kept.len(), 3);
    }

    #[test]
    fn test_slow_startup_filter() {
        let mut slow = make_fact("p1", "10.0.0.1", 0);
        slow.startup_in_progress = true;
        let pods = vec![slow, make_fact("p2", "10.0.0.2", 1)];
        let filtered = filter_slow_startup(pods);
        assert_eq!(filtered.removed, 1);
        assert_eq!(filtered.kept.len(), 1);
        assert_eq!(filtered.kept[0].name, "p2");

        let empty = filter_slow_startup(vec![]);
        assert!(empty.kept.is_empty());
        assert_eq!(empty.removed, 0);
    }

    #[test]
    fn test_liveness_wait_floor() {
        // 10 * 3 * 0.25 = 7.5, below the floor.
        let timing = ProbeTiming {
            period_seconds: 10,
            failure_threshold: 3,
        };
        assert_eq!(liveness_wait(&timing), Duration::from_secs(10));
    }

    #[test]
    fn test_liveness_wait_above_floor() {
        let timing = ProbeTiming {
            period_seconds: 60,
            failure_threshold: 5,
        };
        assert_eq!(liveness_wait(&timing), Duration::from_secs(75));
    }
}
