//! Bare Git repository creation and inspection on the local filesystem.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Initialise a new, empty bare Git repository at `path`.
///
/// Missing parent directories are created first.  Callers decide whether the
/// repository needs creating; this always runs `git init --bare`.
#[instrument(fields(path = %path.display()))]
pub async fn init_bare_repo(git: &Path, path: &Path) -> Result<()> {
    create_parent_dirs(path).await?;

    let output = Command::new(git)
        .arg("init")
        .arg("--bare")
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .context("failed to spawn git init --bare")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git init --bare failed (status {}): {}",
            output.status,
            stderr.trim(),
        );
    }

    debug!("bare repo initialised");
    Ok(())
}

/// Create every missing ancestor directory of `path`.
pub async fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create parent directory: {}", parent.display()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspect
// ---------------------------------------------------------------------------

/// Check whether `path` looks like a bare Git repository.
///
/// A directory holding a `HEAD` file plus `objects/` and `refs/`.  This is a
/// lightweight heuristic, not an integrity check.
pub async fn looks_like_bare_repo(path: &Path) -> bool {
    let is_dir = |p: std::path::PathBuf| async move {
        tokio::fs::metadata(p).await.map(|m| m.is_dir()).unwrap_or(false)
    };

    let head_ok = tokio::fs::metadata(path.join("HEAD"))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);

    head_ok && is_dir(path.join("objects")).await && is_dir(path.join("refs")).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
