//! Per-invocation execution context.
//!
//! Every command builds one [`Context`] up front and threads it explicitly
//! into the operations it runs; nothing about the current application or
//! cluster connection lives in process-wide state.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Identity and filesystem layout for a single command invocation.
#[derive(Debug, Clone)]
pub struct Context {
    /// Name of the application being operated on.
    pub app_name: String,
    /// Target namespace, when the invocation supplied one.
    pub namespace: Option<String>,
    /// Explicit kubeconfig path, when the invocation supplied one.
    pub kubeconfig: Option<PathBuf>,
    home_root: PathBuf,
}

impl Context {
    /// Build a context rooted at the per-user devloop directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the user's home directory cannot be determined.
    pub fn new(
        app_name: &str,
        namespace: Option<String>,
        kubeconfig: Option<PathBuf>,
    ) -> Result<Self> {
        let home_root = dirs::home_dir()
            .ok_or_else(|| Error::Configuration("cannot determine home directory".into()))?
            .join(".devloop");
        Ok(Self {
            app_name: app_name.to_string(),
            namespace,
            kubeconfig,
            home_root,
        })
    }

    /// Override the state root. Used by tests to isolate the filesystem.
    #[must_use]
    pub fn with_home_root(mut self, root: &Path) -> Self {
        self.home_root = root.to_path_buf();
        self
    }

    /// Namespace, or a configuration error telling the user how to set it.
    pub fn require_namespace(&self) -> Result<&str> {
        self.namespace.as_deref().ok_or_else(|| {
            Error::Configuration("please use -n to specify a kubernetes namespace".into())
        })
    }

    /// The application's home directory, holding its downloaded source tree.
    #[must_use]
    pub fn app_home(&self) -> PathBuf {
        self.home_root.join("apps").join(&self.app_name)
    }

    /// The application config shipped inside the source tree.
    #[must_use]
    pub fn app_config_file(&self) -> PathBuf {
        self.app_home().join(".devloop").join("config.yaml")
    }

    /// The persisted per-application profile.
    #[must_use]
    pub fn profile_file(&self) -> PathBuf {
        self.app_home().join("profile.yaml")
    }

    /// Log file for a workload's daemonized port-forward session.
    #[must_use]
    pub fn port_forward_log_file(&self, workload: &str) -> PathBuf {
        self.app_home().join(format!("port-forward-{workload}.log"))
    }

    /// Pid file for a workload's daemonized port-forward session.
    #[must_use]
    pub fn port_forward_pid_file(&self, workload: &str) -> PathBuf {
        self.app_home().join(format!("port-forward-{workload}.pid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new("demo", Some("dev".into()), None)
            .unwrap()
            .with_home_root(Path::new("/state/.devloop"))
    }

    #[test]
    fn test_app_layout() {
        let ctx = ctx();
        assert_eq!(ctx.app_home(), PathBuf::from("/state/.devloop/apps/demo"));
        assert_eq!(
            ctx.app_config_file(),
            PathBuf::from("/state/.devloop/apps/demo/.devloop/config.yaml")
        );
        assert_eq!(
            ctx.profile_file(),
            PathBuf::from("/state/.devloop/apps/demo/profile.yaml")
        );
    }

    #[test]
    fn test_port_forward_files_are_per_workload() {
        let ctx = ctx();
        assert_eq!(
            ctx.port_forward_log_file("api"),
            PathBuf::from("/state/.devloop/apps/demo/port-forward-api.log")
        );
        assert_eq!(
            ctx.port_forward_pid_file("api"),
            PathBuf::from("/state/.devloop/apps/demo/port-forward-api.pid")
        );
        assert_ne!(
            ctx.port_forward_pid_file("api"),
            ctx.port_forward_pid_file("worker")
        );
    }

    #[test]
    fn test_require_namespace() {
        let ctx = ctx();
        assert_eq!(ctx.require_namespace().unwrap(), "dev");

        let bare = Context::new("demo", None, None).unwrap();
        assert!(bare.require_namespace().is_err());
    }
}
