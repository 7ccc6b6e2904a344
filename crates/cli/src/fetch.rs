//! Application source download.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::error::{Error, Result};

/// Clone a git/http(s) source into the application home.
///
/// # Errors
///
/// Returns an error for unsupported url schemes, a missing git binary, or
/// a failed clone.
pub fn download_into(url: &str, dest: &Path) -> Result<()> {
    if !(url.starts_with("http") || url.starts_with("git")) {
        return Err(Error::Configuration(format!(
            "unsupported source url \"{url}\", expected a git or http(s) url"
        )));
    }
    let git =
        which::which("git").map_err(|_| Error::Configuration("git not found in PATH".into()))?;

    info!(%url, dest = %dest.display(), "cloning application source");
    let output = Command::new(git)
        .arg("clone")
        .arg(url)
        .arg(dest)
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::Download {
            url: url.to_string(),
            message: stderr,
        });
    }
    Ok(())
}
