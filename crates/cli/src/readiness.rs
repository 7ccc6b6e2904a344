//! Readiness waits for hook-created objects.
//!
//! A pre-install hook that creates a Job or Pod has not really finished
//! until that object reaches a terminal state. The watcher here subscribes
//! to change-events for the single named object, using a list-then-watch
//! protocol that resumes from the last observed revision so a status flip
//! that happened before the watch attached is still seen.

use std::fmt;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher::{watcher, Config, Event};
use kube::Client;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Bound on a single readiness wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// An object a hook created that must reach a terminal state before the
/// install proceeds. Only Jobs and Pods are ever waited on; any other kind
/// has no wait (see [`WatchTarget::from_manifest`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Job { name: String, namespace: String },
    Pod { name: String, namespace: String },
}

impl WatchTarget {
    /// Name of the watched object.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Job { name, .. } | Self::Pod { name, .. } => name,
        }
    }

    /// Read a manifest file and build a target from its kind and name.
    ///
    /// Returns `None` for kinds that need no wait (anything but Job/Pod)
    /// and for manifests whose kind or name cannot be determined.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_manifest(path: &Path, namespace: &str) -> Result<Option<Self>> {
        let text = fs::read_to_string(path)?;
        let doc: serde_yaml::Value = match serde_yaml::from_str(&text) {
            Ok(doc) => doc,
            Err(err) => {
                debug!(path = %path.display(), %err, "manifest not inspectable, no wait");
                return Ok(None);
            }
        };
        let kind = doc.get("kind").and_then(serde_yaml::Value::as_str);
        let name = doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(serde_yaml::Value::as_str);

        Ok(match (kind, name) {
            (Some("Job"), Some(name)) => Some(Self::Job {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            (Some("Pod"), Some(name)) => Some(Self::Pod {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            _ => None,
        })
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job { name, .. } => write!(f, "job/{name}"),
            Self::Pod { name, .. } => write!(f, "pod/{name}"),
        }
    }
}

/// Wait states for a watched object. The wait resolves on the first
/// terminal state; `Pending` and `ObservedChange` only mark progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// Nothing conclusive observed yet.
    Pending,
    /// A change-event arrived but the status is not terminal.
    ObservedChange,
    Succeeded,
    /// Terminal failure, carrying the reported reason.
    Failed(String),
    /// The object was deleted while being waited on.
    Deleted,
    /// The watch stream itself failed.
    Errored(String),
}

impl WaitState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed(_) | Self::Deleted | Self::Errored(_)
        )
    }
}

/// Blocks a caller until a watch target reaches a terminal state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadinessWait {
    /// Wait for the target, returning the terminal state it reached.
    async fn wait(&self, target: &WatchTarget) -> Result<WaitState>;
}

/// Production watcher backed by the cluster's event stream.
pub struct Watcher {
    client: Client,
    timeout: Duration,
}

impl Watcher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ReadinessWait for Watcher {
    async fn wait(&self, target: &WatchTarget) -> Result<WaitState> {
        info!(target = %target, "waiting for readiness");
        match target {
            WatchTarget::Job { name, namespace } => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                bounded(target, self.timeout, watch_until(api, name, job_state)).await
            }
            WatchTarget::Pod { name, namespace } => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                bounded(target, self.timeout, watch_until(api, name, pod_state)).await
            }
        }
    }
}

/// Apply the wall-clock deadline to a wait future.
async fn bounded<F>(target: &WatchTarget, limit: Duration, fut: F) -> Result<WaitState>
where
    F: Future<Output = Result<WaitState>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(state) => state,
        Err(_) => Err(Error::DeadlineExceeded {
            target: target.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

/// Watch the single named object until `state_of` reports a terminal state.
async fn watch_until<K, F>(api: Api<K>, name: &str, state_of: F) -> Result<WaitState>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + fmt::Debug + Send + 'static,
    F: Fn(&K) -> WaitState,
{
    let config = Config::default().fields(&format!("metadata.name={name}"));
    drain_events(watcher(api, config), name, state_of).await
}

/// Fold change-events into the first terminal state the object reaches.
async fn drain_events<K, S, E, F>(stream: S, name: &str, state_of: F) -> Result<WaitState>
where
    S: Stream<Item = std::result::Result<Event<K>, E>>,
    E: fmt::Display,
    F: Fn(&K) -> WaitState,
{
    futures::pin_mut!(stream);

    let mut state = WaitState::Pending;
    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, object = name, "watch stream error");
                return Ok(WaitState::Errored(format!("failed to deploy {name}")));
            }
        };
        state = match event {
            Event::Init | Event::InitDone => state,
            Event::InitApply(obj) | Event::Apply(obj) => state_of(&obj),
            Event::Delete(_) => {
                info!(object = name, "delete event while waiting");
                WaitState::Deleted
            }
        };
        if state.is_terminal() {
            return Ok(state);
        }
    }
    // The watcher backs off and resumes on its own; a closed stream is an
    // error condition, not a quiet success.
    Ok(WaitState::Errored(format!("failed to deploy {name}")))
}

fn job_state(job: &Job) -> WaitState {
    let name = job.metadata.name.as_deref().unwrap_or_default();
    if let Some(conditions) = job.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        for condition in conditions {
            if condition.status != "True" {
                continue;
            }
            match condition.type_.as_str() {
                "Complete" => return WaitState::Succeeded,
                "Failed" => {
                    let reason = condition
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("job {name} failed"));
                    return WaitState::Failed(reason);
                }
                _ => {}
            }
        }
    }
    WaitState::ObservedChange
}

fn pod_state(pod: &Pod) -> WaitState {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => {
            info!(pod = name, "pod succeeded");
            WaitState::Succeeded
        }
        Some("Failed") => WaitState::Failed(format!("pod {name} failed")),
        Some(phase @ ("Pending" | "Running")) => {
            info!(pod = name, phase, "pod progressing");
            WaitState::Pending
        }
        _ => WaitState::ObservedChange,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn job_with_condition(type_: &str, status: &str, reason: Option<&str>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("migrate".into()),
                ..ObjectMeta::default()
            },
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: type_.to_string(),
                    status: status.to_string(),
                    reason: reason.map(ToString::to_string),
                    ..JobCondition::default()
                }]),
                ..JobStatus::default()
            }),
            ..Job::default()
        }
    }

    fn pod_with_phase(phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("seed".into()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_job_complete_succeeds() {
        let job = job_with_condition("Complete", "True", None);
        assert_eq!(job_state(&job), WaitState::Succeeded);
    }

    #[test]
    fn test_job_failed_carries_reason() {
        let job = job_with_condition("Failed", "True", Some("OOM"));
        assert_eq!(job_state(&job), WaitState::Failed("OOM".into()));
    }

    #[test]
    fn test_job_false_conditions_are_not_terminal() {
        let job = job_with_condition("Failed", "False", Some("OOM"));
        assert_eq!(job_state(&job), WaitState::ObservedChange);
        let job = Job::default();
        assert_eq!(job_state(&job), WaitState::ObservedChange);
    }

    #[test]
    fn test_pod_phases() {
        assert_eq!(pod_state(&pod_with_phase("Succeeded")), WaitState::Succeeded);
        assert_eq!(
            pod_state(&pod_with_phase("Failed")),
            WaitState::Failed("pod seed failed".into())
        );
        assert_eq!(pod_state(&pod_with_phase("Running")), WaitState::Pending);
        assert_eq!(pod_state(&pod_with_phase("Pending")), WaitState::Pending);
    }

    fn ok_events<K>(events: Vec<Event<K>>) -> impl Stream<Item = std::result::Result<Event<K>, String>> {
        stream::iter(events.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_job_stream_resolves_succeeded_before_the_deadline() {
        let target = WatchTarget::Job {
            name: "migrate".into(),
            namespace: "dev".into(),
        };
        let events = ok_events(vec![
            Event::Init,
            Event::InitApply(Job::default()),
            Event::InitDone,
            Event::Apply(job_with_condition("Complete", "True", None)),
        ]);
        let state = bounded(
            &target,
            Duration::from_secs(5),
            drain_events(events, "migrate", job_state),
        )
        .await
        .unwrap();
        assert_eq!(state, WaitState::Succeeded);
    }

    #[tokio::test]
    async fn test_job_stream_failure_carries_the_reason() {
        let events = ok_events(vec![
            Event::Apply(job_with_condition("Failed", "False", None)),
            Event::Apply(job_with_condition("Failed", "True", Some("OOM"))),
        ]);
        let state = drain_events(events, "migrate", job_state).await.unwrap();
        assert_eq!(state, WaitState::Failed("OOM".into()));
    }

    #[tokio::test]
    async fn test_pod_stream_stuck_at_running_only_resolves_via_the_deadline() {
        // Running is progress, not a terminal state; a pod that never moves
        // past it leaves the deadline as the only way out.
        let target = WatchTarget::Pod {
            name: "seed".into(),
            namespace: "dev".into(),
        };
        let updates = ok_events(vec![
            Event::Apply(pod_with_phase("Pending")),
            Event::Apply(pod_with_phase("Running")),
        ]);
        let result = bounded(
            &target,
            Duration::from_millis(30),
            drain_events(updates.chain(stream::pending()), "seed", pod_state),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::DeadlineExceeded { target, .. }) if target == "pod/seed"
        ));
    }

    #[tokio::test]
    async fn test_delete_event_is_terminal() {
        let events = ok_events(vec![Event::Delete(pod_with_phase("Running"))]);
        let state = drain_events(events, "seed", pod_state).await.unwrap();
        assert_eq!(state, WaitState::Deleted);
    }

    #[tokio::test]
    async fn test_stream_error_becomes_a_deploy_diagnostic() {
        let events = stream::iter(vec![Err::<Event<Pod>, String>("watch disconnected".into())]);
        let state = drain_events(events, "seed", pod_state).await.unwrap();
        assert_eq!(state, WaitState::Errored("failed to deploy seed".into()));
    }

    #[test]
    fn test_from_manifest_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            path
        };

        let job = write(
            "job.yaml",
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n",
        );
        assert_eq!(
            WatchTarget::from_manifest(&job, "dev").unwrap(),
            Some(WatchTarget::Job {
                name: "migrate".into(),
                namespace: "dev".into()
            })
        );

        let pod = write(
            "pod.yaml",
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: seed\n",
        );
        assert_eq!(
            WatchTarget::from_manifest(&pod, "dev").unwrap(),
            Some(WatchTarget::Pod {
                name: "seed".into(),
                namespace: "dev".into()
            })
        );

        // unsupported kinds have no wait
        let cm = write(
            "cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        );
        assert_eq!(WatchTarget::from_manifest(&cm, "dev").unwrap(), None);
    }

    #[test]
    fn test_display() {
        let target = WatchTarget::Job {
            name: "migrate".into(),
            namespace: "dev".into(),
        };
        assert_eq!(target.to_string(), "job/migrate");
    }
}
