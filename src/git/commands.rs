//! Git command wrappers using [`tokio::process::Command`].
//!
//! Every function in this module shells out to the configured `git` binary
//! and collects its output.  Long-lived protocol helpers are not spawned
//! here; see [`super::process`].

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Run `git --version`, returning the reported version line.
///
/// Used at startup to fail early when git is not installed.
#[instrument(fields(git = %git.display()))]
pub async fn git_version(git: &Path) -> Result<String> {
    let output = Command::new(git)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to run {} --version", git.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git --version failed (status {}): {}",
            output.status,
            stderr.trim(),
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ---------------------------------------------------------------------------
// Clone
// ---------------------------------------------------------------------------

/// Run `git clone --mirror <url> <dest>`.
///
/// `dest` becomes a bare repository carrying every ref of the remote.
#[instrument(fields(%url, dest = %dest.display()))]
pub async fn git_clone_mirror(git: &Path, url: &str, dest: &Path) -> Result<()> {
    let mut cmd = Command::new(git);
    cmd.arg("clone").arg("--mirror").arg(url).arg(dest);

    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("spawning git clone --mirror");

    let output = cmd
        .output()
        .await
        .context("failed to spawn git clone --mirror")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git clone --mirror failed (status {}): {}",
            output.status,
            stderr.trim(),
        );
    }

    debug!("git clone --mirror succeeded");
    Ok(())
}

// ---------------------------------------------------------------------------
// for-each-ref
// ---------------------------------------------------------------------------

/// Run `git for-each-ref` in a repository and return a map of
/// `ref_name -> object_id`.
///
/// Uses the format `%(objectname) %(refname)` so each output line is
/// `<oid> <refname>`.
#[instrument(fields(repo = %repo_path.display()))]
pub async fn git_for_each_ref(git: &Path, repo_path: &Path) -> Result<BTreeMap<String, String>> {
    let mut cmd = Command::new(git);
    cmd.arg("--git-dir")
        .arg(repo_path)
        .arg("for-each-ref")
        .arg("--format=%(objectname) %(refname)");

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = cmd
        .output()
        .await
        .context("failed to spawn git for-each-ref")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git for-each-ref failed (status {}): {}",
            output.status,
            stderr.trim(),
        );
    }

    let refs = parse_ref_listing(&String::from_utf8_lossy(&output.stdout));
    debug!(ref_count = refs.len(), "git for-each-ref complete");
    Ok(refs)
}

fn parse_ref_listing(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(' '))
        .map(|(oid, refname)| (refname.trim().to_string(), oid.trim().to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
