//! Install flow tests against a recording fake cluster.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use devloop_cli::install::{InstallOptions, InstallOutcome, Installer};
use devloop_cli::readiness::{ReadinessWait, WaitState, WatchTarget};
use devloop_cli::{ClusterOps, Context, Error, Result};
use tempfile::TempDir;

/// Records every create call; optionally rejects one file by name.
#[derive(Default)]
struct FakeCluster {
    calls: Mutex<Vec<(PathBuf, bool)>>,
    reject: Option<&'static str>,
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn create(&self, path: &Path, namespace: &str, fail_on_duplicate: bool) -> Result<()> {
        assert_eq!(namespace, "dev");
        self.calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), fail_on_duplicate));
        if let Some(name) = self.reject {
            if path.ends_with(name) {
                return Err(Error::ClusterApply {
                    resource: path.display().to_string(),
                    message: "rejected".into(),
                });
            }
        }
        Ok(())
    }

    async fn upsert_release(
        &self,
        _name: &str,
        _chart: &Path,
        _namespace: &str,
        _values: Option<PathBuf>,
    ) -> Result<String> {
        unimplemented!("manifest installs never upsert releases")
    }
}

/// Resolves every wait immediately, recording the target.
#[derive(Default)]
struct FakeWatcher {
    waits: Mutex<Vec<WatchTarget>>,
}

#[async_trait]
impl ReadinessWait for FakeWatcher {
    async fn wait(&self, target: &WatchTarget) -> Result<WaitState> {
        self.waits.lock().unwrap().push(target.clone());
        Ok(WaitState::Succeeded)
    }
}

fn write_file(base: &Path, rel: &str, body: &str) {
    let path = base.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn seed_app(ctx: &Context) {
    let home = ctx.app_home();
    write_file(
        &home,
        ".devloop/config.yaml",
        r#"
app:
  type: manifest
  resource_path: deploy
pre_install:
  - path: hooks/migrate.yaml
    weight: "1"
  - path: hooks/settings.yaml
    weight: "2"
"#,
    );
    write_file(
        &home,
        "deploy/hooks/migrate.yaml",
        "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n",
    );
    write_file(
        &home,
        "deploy/hooks/settings.yaml",
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
    );
    write_file(
        &home,
        "deploy/svc.yaml",
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: api\n",
    );
    write_file(
        &home,
        "deploy/broken.yaml",
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: broken\n",
    );
}

fn test_ctx(root: &Path) -> Context {
    Context::new("demo", Some("dev".into()), None)
        .unwrap()
        .with_home_root(root)
}

#[tokio::test]
async fn manifest_deploy_runs_hooks_waits_and_tolerates_main_failures() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_ctx(tmp.path());
    seed_app(&ctx);

    let cluster = FakeCluster {
        reject: Some("broken.yaml"),
        ..FakeCluster::default()
    };
    let watcher = FakeWatcher::default();
    let installer = Installer::new(&ctx, &cluster, &watcher);

    let outcome = installer.deploy(&InstallOptions::default()).await.unwrap();
    match outcome {
        InstallOutcome::ManifestsApplied { applied, failed } => {
            assert_eq!(applied, 1, "only svc.yaml applies cleanly");
            assert_eq!(failed.len(), 1);
            assert!(failed[0].ends_with("broken.yaml"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let calls = cluster.calls.lock().unwrap();
    let names: Vec<(String, bool)> = calls
        .iter()
        .map(|(p, fod)| {
            (
                p.file_name().unwrap().to_string_lossy().into_owned(),
                *fod,
            )
        })
        .collect();
    // hooks first, ascending by weight, with fail-on-duplicate; then the
    // main pass without it, skipping the hook files entirely
    assert_eq!(
        names,
        vec![
            ("migrate.yaml".to_string(), true),
            ("settings.yaml".to_string(), true),
            ("broken.yaml".to_string(), false),
            ("svc.yaml".to_string(), false),
        ]
    );

    // only the Job hook is waited on
    let waits = watcher.waits.lock().unwrap();
    assert_eq!(
        *waits,
        vec![WatchTarget::Job {
            name: "migrate".into(),
            namespace: "dev".into()
        }]
    );

    // the profile records the install namespace
    let profile = devloop_cli::Profile::load(&ctx.profile_file()).unwrap();
    assert_eq!(profile.namespace.as_deref(), Some("dev"));
}

#[tokio::test]
async fn repeat_install_without_force_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_ctx(tmp.path());
    seed_app(&ctx);

    let cluster = FakeCluster::default();
    let watcher = FakeWatcher::default();
    let installer = Installer::new(&ctx, &cluster, &watcher);

    let outcome = installer.install(&InstallOptions::default()).await.unwrap();
    assert_eq!(outcome, InstallOutcome::AlreadyExists);
    assert!(cluster.calls.lock().unwrap().is_empty());
    assert!(watcher.waits.lock().unwrap().is_empty());
    // no profile written either
    assert!(!ctx.profile_file().exists());
}
