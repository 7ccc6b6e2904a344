//! Port-forward and stop-forward commands.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::cluster::ClusterClient;
use crate::config::Profile;
use crate::context::Context;
use crate::daemon;
use crate::error::Error;
use crate::forward::{self, ForwardSession};
use crate::ui;

/// Forward local ports to a workload's pod.
#[derive(Args, Debug)]
pub struct PortForwardCommand {
    /// Application name.
    pub name: String,

    /// Deployment to forward to.
    #[arg(short = 'd', long)]
    pub deployment: String,

    /// Single local port to forward.
    #[arg(short = 'l', long)]
    pub local_port: Option<u16>,

    /// Single remote port to be forwarded.
    #[arg(short = 'r', long)]
    pub remote_port: Option<u16>,

    /// Port pairs `local:remote`; an empty local field picks an ephemeral
    /// port, such as `:8080`.
    #[arg(short = 'p', long = "dev-port", value_delimiter = ',')]
    pub dev_ports: Vec<String>,

    /// Run the session as a detached background process.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub daemon: bool,

    /// Kubernetes namespace (defaults to the application profile's).
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Path to the kubeconfig to use.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

impl PortForwardCommand {
    /// Run the port-forward command.
    ///
    /// # Errors
    ///
    /// Returns an error when the workload is not in development mode or
    /// has no backing pod; no tunnels are opened in either case.
    pub async fn run(&self) -> Result<()> {
        let ctx = Context::new(&self.name, self.namespace.clone(), self.kubeconfig.clone())?;

        let profile = Profile::load(&ctx.profile_file())?;
        if !profile.is_developing(&self.deployment) {
            return Err(Error::NotInDevMode(self.deployment.clone()).into());
        }
        let namespace = self
            .namespace
            .clone()
            .or_else(|| profile.namespace.clone())
            .ok_or_else(|| {
                Error::Configuration(
                    "no namespace recorded for the application, use -n to specify one".into(),
                )
            })?;

        let raw_specs = self.raw_specs()?;

        let cluster = ClusterClient::connect(self.kubeconfig.as_deref()).await?;
        let pods = cluster
            .pods_for_workload(&namespace, &self.deployment)
            .await?;
        let (pod_name, pod_namespace) = forward::select_target_pod(&self.deployment, &pods)?;

        if self.daemon {
            let log = ctx.port_forward_log_file(&self.deployment);
            let pid_file = ctx.port_forward_pid_file(&self.deployment);
            let pid = daemon::spawn_background(
                &std::env::current_exe()?,
                &self.background_args(&namespace, &raw_specs),
                &log,
                &pid_file,
            )?;
            ui::print_success(&format!(
                "port-forward running in background (pid {pid}), logs: {}",
                log.display()
            ));
            return Ok(());
        }

        let pairs = forward::parse_port_specs(&raw_specs);
        let session = ForwardSession::new(cluster.kube(), pod_name, pod_namespace, pairs);
        session.run().await?;
        Ok(())
    }

    /// The full spec batch: `--dev-port` entries plus the single
    /// `--local-port`/`--remote-port` pair folded in.
    fn raw_specs(&self) -> Result<Vec<String>> {
        let mut raw = self.dev_ports.clone();
        if let Some(remote) = self.remote_port {
            let local = self
                .local_port
                .map(|p| p.to_string())
                .unwrap_or_default();
            raw.push(format!("{local}:{remote}"));
        }
        if raw.is_empty() {
            return Err(Error::Configuration(
                "no ports to forward, use --dev-port or --remote-port".into(),
            )
            .into());
        }
        Ok(raw)
    }

    /// Argument vector for the detached child: the same forward, foreground.
    fn background_args(&self, namespace: &str, raw_specs: &[String]) -> Vec<String> {
        let mut args = vec![
            "port-forward".to_string(),
            self.name.clone(),
            "--deployment".to_string(),
            self.deployment.clone(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--dev-port".to_string(),
            raw_specs.join(","),
            "--daemon".to_string(),
            "false".to_string(),
        ];
        if let Some(kc) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kc.display().to_string());
        }
        args
    }
}

/// Stop a daemonized port-forward session.
#[derive(Args, Debug)]
pub struct StopForwardCommand {
    /// Application name.
    pub name: String,

    /// Deployment whose session should be stopped.
    #[arg(short = 'd', long)]
    pub deployment: String,
}

impl StopForwardCommand {
    /// Run the stop-forward command.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded pid file cannot be read or removed.
    pub async fn run(&self) -> Result<()> {
        let ctx = Context::new(&self.name, None, None)?;
        let pid_file = ctx.port_forward_pid_file(&self.deployment);
        if !pid_file.exists() {
            ui::print_warning(&format!(
                "no background port-forward recorded for {}",
                self.deployment
            ));
            return Ok(());
        }
        daemon::stop(&pid_file)?;
        ui::print_success(&format!("port-forward for {} stopped", self.deployment));
        Ok(())
    }
}
