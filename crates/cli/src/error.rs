//! Error types for devloop operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by install and port-forward operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing invocation input the user must fix.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The application declares (or the user requested) a type we cannot install.
    #[error("unsupported application type \"{0}\", it must be helm or manifest")]
    UnsupportedAppType(String),

    /// Downloading the application source failed.
    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    /// A single resource create or release upsert failed.
    #[error("failed to apply {resource}: {message}")]
    ClusterApply { resource: String, message: String },

    /// A pre-install item pointed at a file that does not exist.
    #[error("pre-install file not found: {0}")]
    HookFileMissing(PathBuf),

    /// A waited-on hook object reached a failure condition.
    #[error("{target} failed: {reason}")]
    HookFailed { target: String, reason: String },

    /// The watch stream errored while waiting on a hook object.
    #[error("{0}")]
    Readiness(String),

    /// A readiness wait outlived its deadline.
    #[error("timed out after {seconds}s waiting for {target}")]
    DeadlineExceeded { target: String, seconds: u64 },

    /// The workload is not the target of an active development session.
    #[error("\"{0}\" is not in development mode")]
    NotInDevMode(String),

    /// The workload has no backing pods to forward to.
    #[error("no pods found for \"{0}\"")]
    NoPodsFound(String),

    /// A single `local:remote` spec could not be parsed.
    #[error("wrong format of dev port \"{0}\"")]
    PortSpec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// A persisted YAML file failed to parse.
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
