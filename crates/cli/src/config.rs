//! Application configuration and persisted profile models.
//!
//! The application config ships inside the downloaded source tree
//! (`.devloop/config.yaml`) and declares how the application installs; the
//! profile is devloop's own per-application state written next to the source.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How an application is installed into the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    /// A helm chart, installed as an upserted release.
    Helm,
    /// A tree of raw manifests, created file by file.
    Manifest,
}

impl std::fmt::Display for AppType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Helm => write!(f, "helm"),
            Self::Manifest => write!(f, "manifest"),
        }
    }
}

impl std::str::FromStr for AppType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "helm" => Ok(Self::Helm),
            "manifest" => Ok(Self::Manifest),
            other => Err(Error::UnsupportedAppType(other.to_string())),
        }
    }
}

/// A resource created ahead of the main set, ordered by weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreInstallItem {
    /// File reference, relative to the application's resource root.
    pub path: String,
    /// Ordering key, compared as a signed integer after parsing.
    #[serde(default)]
    pub weight: String,
}

impl PreInstallItem {
    /// The parsed ordering key. Unparseable weights sort as zero.
    #[must_use]
    pub fn weight_value(&self) -> i64 {
        self.weight.trim().parse().unwrap_or(0)
    }
}

/// Stable-sort items ascending by weight, preserving declaration order
/// between equal weights.
pub fn sort_by_weight(items: &mut [PreInstallItem]) {
    items.sort_by_key(PreInstallItem::weight_value);
}

/// The `app` section of the application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    /// Install type declared by the application.
    #[serde(rename = "type")]
    pub app_type: AppType,
    /// Chart or manifest directory, relative to the application home.
    #[serde(default)]
    pub resource_path: String,
}

/// Application config as shipped in `.devloop/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app: AppSpec,
    /// Hook resources applied before the main set.
    #[serde(default)]
    pub pre_install: Vec<PreInstallItem>,
}

impl AppConfig {
    /// Load the config, or `None` when the application ships none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }
}

/// Per-application state persisted by devloop itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Namespace the application was installed into.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Workloads currently in an active development session.
    #[serde(default)]
    pub developing: Vec<String>,
}

impl Profile {
    /// Load the profile, defaulting when none has been written yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Persist the profile next to the application source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Whether the workload is the target of an active development session.
    #[must_use]
    pub fn is_developing(&self, workload: &str) -> bool {
        self.developing.iter().any(|w| w == workload)
    }
}
