//! Cluster-facing collaborators.
//!
//! [`ClusterOps`] is the seam the installer drives: creating single resource
//! files and upserting helm releases. [`ClusterClient`] is the production
//! implementation, shelling out to kubectl/helm for file-based work and
//! holding a kube client for typed API access (watches, pod listings).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Cluster mutations the installer depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterOps {
    /// Create the resource file at `path` in `namespace`.
    ///
    /// With `fail_on_duplicate` an already-existing object is an error;
    /// without it the duplicate is logged and the create reports success
    /// (create-if-absent semantics).
    async fn create(&self, path: &Path, namespace: &str, fail_on_duplicate: bool) -> Result<()>;

    /// Install or upgrade a helm release from a chart directory, waiting
    /// for the operation to converge. Returns helm's output.
    async fn upsert_release(
        &self,
        name: &str,
        chart: &Path,
        namespace: &str,
        values: Option<PathBuf>,
    ) -> Result<String>;
}

/// Production cluster access.
pub struct ClusterClient {
    client: Client,
    kubeconfig: Option<PathBuf>,
}

impl ClusterClient {
    /// Connect using an explicit kubeconfig, or infer from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or no cluster
    /// configuration can be inferred.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path)?;
                let config =
                    Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self {
            client,
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        })
    }

    /// A handle to the underlying kube client.
    #[must_use]
    pub fn kube(&self) -> Client {
        self.client.clone()
    }

    /// Pods backing a workload, in the order the cluster lists them.
    ///
    /// The workload's label selector is taken from its Deployment; a
    /// workload without match labels falls back to `app=<name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Deployment cannot be fetched or pods cannot
    /// be listed.
    pub async fn pods_for_workload(&self, namespace: &str, workload: &str) -> Result<Vec<Pod>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments.get(workload).await?;
        let selector = deployment
            .spec
            .and_then(|spec| spec.selector.match_labels)
            .map(|labels| selector_string(&labels))
            .unwrap_or_else(|| format!("app={workload}"));

        debug!(%selector, %workload, "listing pods for workload");
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(&selector)).await?;
        Ok(list.items)
    }

    fn kubectl(&self) -> Result<PathBuf> {
        which::which("kubectl")
            .map_err(|_| Error::Configuration("kubectl not found in PATH".into()))
    }

    fn helm(&self) -> Result<PathBuf> {
        which::which("helm").map_err(|_| Error::Configuration("helm not found in PATH".into()))
    }
}

#[async_trait]
impl ClusterOps for ClusterClient {
    async fn create(&self, path: &Path, namespace: &str, fail_on_duplicate: bool) -> Result<()> {
        let mut cmd = Command::new(self.kubectl()?);
        cmd.arg("create").arg("-f").arg(path).args(["-n", namespace]);
        if let Some(kc) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kc);
        }
        let output = cmd.stdin(Stdio::null()).output()?;
        if output.status.success() {
            info!(resource = %path.display(), "created");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !fail_on_duplicate && stderr.contains("already exists") {
            debug!(resource = %path.display(), "already exists, skipping");
            return Ok(());
        }
        Err(Error::ClusterApply {
            resource: path.display().to_string(),
            message: stderr,
        })
    }

    async fn upsert_release(
        &self,
        name: &str,
        chart: &Path,
        namespace: &str,
        values: Option<PathBuf>,
    ) -> Result<String> {
        let mut cmd = Command::new(self.helm()?);
        cmd.args(["upgrade", "--install", "--wait", name])
            .arg(chart)
            .args(["-n", namespace]);
        if let Some(values) = values {
            cmd.arg("-f").arg(values);
        }
        if let Some(kc) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kc);
        }

        info!(release = name, chart = %chart.display(), "upserting helm release");
        let output = cmd.stdin(Stdio::null()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::ClusterApply {
                resource: name.to_string(),
                message: stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn selector_string(labels: &std::collections::BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
