//! devloop core library.
//!
//! Installs applications into a Kubernetes cluster (helm releases or raw
//! manifest trees with weight-ordered pre-install hooks), waits for hook
//! Jobs/Pods to reach a terminal state, and maintains daemonizable
//! port-forward sessions against a workload's backing pod.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod cluster;
pub mod commands;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod fetch;
pub mod forward;
pub mod install;
pub mod readiness;
pub mod ui;

// Re-export commonly used types at the crate root
pub use cluster::{ClusterClient, ClusterOps};
pub use config::{AppConfig, AppType, PreInstallItem, Profile};
pub use context::Context;
pub use error::{Error, Result};
pub use install::{InstallOptions, InstallOutcome, Installer};
pub use readiness::{ReadinessWait, WaitState, WatchTarget, Watcher};
