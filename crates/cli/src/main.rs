//! devloop CLI entry point.
//!
//! Deploys applications into a Kubernetes cluster and maintains live
//! development sessions against their workloads.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use devloop_cli::commands::install::InstallCommand;
use devloop_cli::commands::port_forward::{PortForwardCommand, StopForwardCommand};

/// devloop - Kubernetes development workflow CLI.
#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Deploy applications and keep live dev sessions against their workloads",
    long_about = "Install Kubernetes applications (helm charts or manifest trees with\n\
                  ordered pre-install hooks) and forward local ports to their pods,\n\
                  optionally as a background session that outlives the terminal."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a Kubernetes application.
    Install(InstallCommand),

    /// Forward local ports to a workload's pod.
    PortForward(PortForwardCommand),

    /// Stop a daemonized port-forward session.
    StopForward(StopForwardCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,devloop_cli=debug,devloop=debug")
    } else {
        EnvFilter::new("warn,devloop_cli=info,devloop=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Install(cmd) => cmd.run().await,
        Commands::PortForward(cmd) => cmd.run().await,
        Commands::StopForward(cmd) => cmd.run().await,
    }
}
