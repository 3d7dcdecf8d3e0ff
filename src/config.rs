use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV_VAR: &str = "GIT_SERVER_CFG";

/// File name looked up next to the executable when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Repositories in the order they are provisioned.
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host name or address to bind (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
}

impl ServerConfig {
    /// `host:port`, as printed in startup messages.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Unique name, used verbatim as the first URL path segment.
    pub name: String,
    /// Location of the bare repository on disk.
    pub path: PathBuf,
    /// Remote to mirror-clone from when `path` does not exist yet.
    #[serde(default)]
    pub init_from: Option<String>,
}

// ---------------------------------------------------------------------------
// Bridge behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// The `git` executable used for provisioning and the protocol helpers.
    #[serde(default = "default_git_binary")]
    pub git_binary: PathBuf,
    /// Kill a helper process that runs longer than this many seconds.
    #[serde(default)]
    pub process_timeout_secs: Option<u64>,
    /// Gzip RPC results for clients that send `Accept-Encoding: gzip`.
    #[serde(default)]
    pub gzip_responses: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            git_binary: default_git_binary(),
            process_timeout_secs: None,
            gzip_responses: false,
        }
    }
}

impl BridgeConfig {
    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// `config.yaml` in the directory holding the running executable, falling
/// back to the working directory if that cannot be determined.
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("invalid config file: {}", path.display()))
}

/// Parse and validate YAML configuration text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config =
        serde_yaml::from_str(contents).context("failed to parse configuration")?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(!config.server.host.is_empty(), "server.host must not be empty");

    let mut seen = HashSet::new();
    for repo in &config.repositories {
        validate_path_segment(&repo.name)
            .with_context(|| format!("invalid repository name {:?}", repo.name))?;
        anyhow::ensure!(
            seen.insert(repo.name.as_str()),
            "duplicate repository name {:?}",
            repo.name
        );
        anyhow::ensure!(
            !repo.path.as_os_str().is_empty(),
            "repository {:?} has an empty path",
            repo.name
        );
        if let Some(url) = &repo.init_from {
            anyhow::ensure!(
                !url.trim().is_empty(),
                "repository {:?} has an empty init_from",
                repo.name
            );
        }
    }

    if let Some(secs) = config.bridge.process_timeout_secs {
        anyhow::ensure!(secs > 0, "bridge.process_timeout_secs must be positive");
    }
    Ok(())
}

/// A repository name must be usable as exactly one URL path segment.
///
/// Rejects empty names, separators, NUL bytes and the `.` and `..` directory
/// references, which URL normalisation folds away. A leading dot is allowed.
fn validate_path_segment(value: &str) -> Result<()> {
    anyhow::ensure!(!value.is_empty(), "must not be empty");
    anyhow::ensure!(
        !value.contains('/') && !value.contains('\\'),
        "must not contain path separators"
    );
    anyhow::ensure!(!value.contains('\0'), "must not contain NUL bytes");
    anyhow::ensure!(
        value != "." && value != "..",
        "must not be a directory reference"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
