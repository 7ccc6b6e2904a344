//! Resource installation.
//!
//! Drives the full install of a named application: materializing its home
//! directory, running pre-install hooks in weight order, waiting on hook
//! Jobs/Pods, and then creating the remaining manifest tree file by file.
//! Hook failures abort; main-phase failures are reported and skipped, so a
//! partially applied tree is left standing rather than rolled back.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cluster::ClusterOps;
use crate::config::{self, AppConfig, AppType, PreInstallItem, Profile};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::readiness::{ReadinessWait, WaitState, WatchTarget};
use crate::{fetch, ui};

/// Flags for a single install invocation.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Source url to clone on first install (or forced reinstall).
    pub url: Option<String>,
    /// Chart/manifest directory override, relative to the application home.
    pub resources_dir: Option<String>,
    /// Install type override.
    pub app_type: Option<AppType>,
    /// Helm values file, forwarded to the release upsert.
    pub values_file: Option<PathBuf>,
    /// Remove and re-fetch an existing application home first.
    pub force: bool,
}

/// What an install invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The application home already existed and `force` was not given;
    /// nothing was touched.
    AlreadyExists,
    /// A helm release was installed or upgraded.
    ReleaseUpserted { release: String },
    /// Manifests were created; `failed` lists main-phase files that did
    /// not apply.
    ManifestsApplied { applied: usize, failed: Vec<PathBuf> },
}

/// Installs one application per invocation.
pub struct Installer<'a, C, W> {
    ctx: &'a Context,
    cluster: &'a C,
    watcher: &'a W,
}

impl<'a, C, W> Installer<'a, C, W>
where
    C: ClusterOps,
    W: ReadinessWait,
{
    pub fn new(ctx: &'a Context, cluster: &'a C, watcher: &'a W) -> Self {
        Self {
            ctx,
            cluster,
            watcher,
        }
    }

    /// Install the application named by the context: materialize its home
    /// directory, then deploy from it.
    ///
    /// # Errors
    ///
    /// Returns an error for missing configuration, download failures,
    /// unsupported install types, and any hook-phase failure. Main-phase
    /// apply failures are reported in the outcome instead.
    pub async fn install(&self, opts: &InstallOptions) -> Result<InstallOutcome> {
        let app_home = self.ctx.app_home();
        if app_home.exists() {
            if !opts.force {
                debug!(app = %self.ctx.app_name, "application home exists, nothing to do");
                return Ok(InstallOutcome::AlreadyExists);
            }
            info!(app = %self.ctx.app_name, "force reinstall, removing application home");
            fs::remove_dir_all(&app_home)?;
        }
        self.materialize(&app_home, opts)?;
        self.deploy(opts).await
    }

    /// Deploy the application from an already materialized home directory.
    ///
    /// # Errors
    ///
    /// Same contract as [`Installer::install`], minus the download step.
    pub async fn deploy(&self, opts: &InstallOptions) -> Result<InstallOutcome> {
        let app_home = self.ctx.app_home();
        let namespace = self.ctx.require_namespace()?;
        let config = AppConfig::load(&self.ctx.app_config_file())?;

        let app_type = opts
            .app_type
            .or_else(|| config.as_ref().map(|c| c.app.app_type))
            .ok_or_else(|| {
                Error::Configuration(
                    "application type not declared; use -t to specify helm or manifest".into(),
                )
            })?;
        let resources_dir = opts
            .resources_dir
            .clone()
            .or_else(|| config.as_ref().map(|c| c.app.resource_path.clone()))
            .unwrap_or_default();
        let resources_path = app_home.join(resources_dir);
        debug!(path = %resources_path.display(), "resources path resolved");

        let mut profile = Profile::load(&self.ctx.profile_file())?;
        profile.namespace = Some(namespace.to_string());
        profile.save(&self.ctx.profile_file())?;

        match app_type {
            AppType::Helm => {
                ui::print_info("installing helm release, this may take several minutes...");
                let output = self
                    .cluster
                    .upsert_release(
                        &self.ctx.app_name,
                        &resources_path,
                        namespace,
                        opts.values_file.clone(),
                    )
                    .await?;
                debug!(%output, "helm output");
                Ok(InstallOutcome::ReleaseUpserted {
                    release: self.ctx.app_name.clone(),
                })
            }
            AppType::Manifest => {
                let mut excluded = HashSet::new();
                if let Some(config) = &config {
                    if !config.pre_install.is_empty() {
                        excluded = self
                            .run_pre_install(&resources_path, &config.pre_install, namespace)
                            .await?;
                    }
                }
                self.apply_manifests(&resources_path, &excluded, namespace)
                    .await
            }
        }
    }

    /// Create the application home and clone its source into it.
    fn materialize(&self, app_home: &Path, opts: &InstallOptions) -> Result<()> {
        let url = opts.url.as_deref().ok_or_else(|| {
            Error::Configuration("please use -u to specify the source url of the application".into())
        })?;
        fs::create_dir_all(app_home)?;
        fetch::download_into(url, app_home)
    }

    /// Run hooks ascending by weight, waiting on each Job/Pod, and return
    /// the set of applied paths to exclude from the main pass.
    async fn run_pre_install(
        &self,
        base: &Path,
        items: &[PreInstallItem],
        namespace: &str,
    ) -> Result<HashSet<PathBuf>> {
        ui::print_step("running pre-install hooks");
        let mut items = items.to_vec();
        config::sort_by_weight(&mut items);

        let mut applied = HashSet::new();
        for item in &items {
            let path = base.join(&item.path);
            if !path.is_file() {
                return Err(Error::HookFileMissing(path));
            }
            info!(
                hook = %path.display(),
                weight = item.weight_value(),
                "applying pre-install hook"
            );
            self.cluster.create(&path, namespace, true).await?;
            applied.insert(path.clone());

            if let Some(target) = WatchTarget::from_manifest(&path, namespace)? {
                match self.watcher.wait(&target).await? {
                    WaitState::Succeeded => {}
                    WaitState::Failed(reason) => {
                        return Err(Error::HookFailed {
                            target: target.to_string(),
                            reason,
                        });
                    }
                    WaitState::Deleted => {
                        warn!(target = %target, "hook object deleted while waiting, continuing");
                        ui::print_warning(&format!("{target} was deleted while waiting"));
                    }
                    WaitState::Errored(diagnostic) => {
                        return Err(Error::Readiness(diagnostic));
                    }
                    WaitState::Pending | WaitState::ObservedChange => {}
                }
            }
        }
        Ok(applied)
    }

    /// Create every file under the resource root, skipping hook-applied
    /// paths. Per-file failures are reported and the rest proceed.
    async fn apply_manifests(
        &self,
        root: &Path,
        excluded: &HashSet<PathBuf>,
        namespace: &str,
    ) -> Result<InstallOutcome> {
        let files = resource_files(root)?;
        let mut applied = 0;
        let mut failed = Vec::new();
        for file in files {
            if excluded.contains(&file) {
                info!(file = %file.display(), "ignoring file already applied as hook");
                continue;
            }
            match self.cluster.create(&file, namespace, false).await {
                Ok(()) => applied += 1,
                Err(err) => {
                    warn!(file = %file.display(), %err, "failed to apply, continuing");
                    ui::print_warning(&format!("{err}"));
                    failed.push(file);
                }
            }
        }
        Ok(InstallOutcome::ManifestsApplied { applied, failed })
    }
}

/// All resource files under `root`, recursively, in a stable order.
/// Dotted entries (`.git`, `.devloop`) are not resources.
fn resource_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with('.')
        {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
