//! Install command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::cluster::ClusterClient;
use crate::config::AppType;
use crate::context::Context;
use crate::error::Error;
use crate::install::{InstallOptions, InstallOutcome, Installer};
use crate::readiness::Watcher;
use crate::ui;

/// Install a Kubernetes application.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Application name.
    pub name: String,

    /// Kubernetes namespace.
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Source url of the application (git or http).
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Directory of the helm chart or manifests, relative to the
    /// application home.
    #[arg(short = 'd', long)]
    pub dir: Option<String>,

    /// Application type: helm or manifest.
    #[arg(short = 't', long = "type")]
    pub app_type: Option<AppType>,

    /// Helm values file.
    #[arg(short = 'f', long)]
    pub values: Option<PathBuf>,

    /// Path to the kubeconfig to use.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Force a reinstall, removing the existing application home first.
    #[arg(long)]
    pub force: bool,
}

impl InstallCommand {
    /// Run the install command.
    ///
    /// # Errors
    ///
    /// Returns an error on missing namespace/url, unsupported type, or any
    /// hook-phase failure. Main-phase apply failures are reported as
    /// warnings and do not fail the command.
    pub async fn run(&self) -> Result<()> {
        let namespace = self.namespace.clone().ok_or_else(|| {
            Error::Configuration("please use -n to specify a kubernetes namespace".into())
        })?;
        if self.url.is_none() {
            return Err(Error::Configuration(
                "please use -u to specify the source url of the application".into(),
            )
            .into());
        }

        let ctx = Context::new(&self.name, Some(namespace), self.kubeconfig.clone())?;

        // A repeat install is a no-op; report it before touching the cluster.
        if ctx.app_home().exists() && !self.force {
            ui::print_warning(&format!(
                "{} already exists, please use --force to force it to be reinstalled",
                self.name
            ));
            return Ok(());
        }

        ui::print_section(&format!("Installing {}", self.name));
        let cluster = ClusterClient::connect(self.kubeconfig.as_deref()).await?;
        let watcher = Watcher::new(cluster.kube());
        let installer = Installer::new(&ctx, &cluster, &watcher);

        let opts = InstallOptions {
            url: self.url.clone(),
            resources_dir: self.dir.clone(),
            app_type: self.app_type,
            values_file: self.values.clone(),
            force: self.force,
        };

        let outcome = match installer.install(&opts).await {
            Ok(outcome) => outcome,
            Err(err) => {
                ui::print_error(&format!("failed to install {}: {err}", self.name));
                return Err(err.into());
            }
        };

        match outcome {
            InstallOutcome::AlreadyExists => {
                ui::print_warning(&format!(
                    "{} already exists, please use --force to force it to be reinstalled",
                    self.name
                ));
            }
            InstallOutcome::ReleaseUpserted { release } => {
                ui::print_success(&format!(
                    "helm release {release} installed, use \"helm list -n {}\" to inspect it",
                    ctx.require_namespace()?
                ));
            }
            InstallOutcome::ManifestsApplied { applied, failed } => {
                if failed.is_empty() {
                    ui::print_success(&format!("{} installed ({applied} resources)", self.name));
                } else {
                    // best-effort apply: warn, still exit zero
                    ui::print_warning(&format!(
                        "{} installed with {} of {} resources failing",
                        self.name,
                        failed.len(),
                        applied + failed.len()
                    ));
                }
            }
        }
        Ok(())
    }
}
