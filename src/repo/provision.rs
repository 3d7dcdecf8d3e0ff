//! One-time provisioning of the configured repositories.
//!
//! Readiness is gated purely on the existence of the repository path: an
//! existing path is never touched again, a missing one is either
//! mirror-cloned from `init_from` or created as an empty bare repository.

use std::path::{Path, PathBuf};

use tracing::{error, info, instrument, warn};

use super::{RepoStatus, RepoTable, Repository};
use crate::config::RepositoryConfig;
use crate::git;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The path already existed; nothing was written.
    AlreadyPresent,
    /// An empty bare repository was created.
    Initialised,
    /// The remote was mirror-cloned.
    Cloned,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to prepare {}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to clone {url} into {}", path.display())]
    Clone {
        url: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to initialise bare repository at {}", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Make `repo` servable, recording the result in `repo.status`.
///
/// Idempotent: once the path exists this returns
/// [`ProvisionOutcome::AlreadyPresent`] without touching the filesystem.
#[instrument(skip_all, fields(repo = %repo.name, path = %repo.path.display()))]
pub async fn ensure(git: &Path, repo: &mut Repository) -> Result<ProvisionOutcome, ProvisionError> {
    let result = provision(git, repo).await;
    repo.status = match result {
        Ok(_) => RepoStatus::Ready,
        Err(_) => RepoStatus::Failed,
    };
    result
}

async fn provision(git: &Path, repo: &Repository) -> Result<ProvisionOutcome, ProvisionError> {
    let path = &repo.path;
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| ProvisionError::Prepare {
            path: path.clone(),
            source: e.into(),
        })?;

    if exists {
        if !git::looks_like_bare_repo(path).await {
            warn!("path exists but does not look like a bare repository; serving it as is");
        }
        info!("repository already exists");
        return Ok(ProvisionOutcome::AlreadyPresent);
    }

    git::bare_repo::create_parent_dirs(path)
        .await
        .map_err(|source| ProvisionError::Prepare {
            path: path.clone(),
            source,
        })?;

    match &repo.init_from {
        Some(url) => {
            info!(%url, "repository not found; cloning mirror");
            git::git_clone_mirror(git, url, path)
                .await
                .map_err(|source| ProvisionError::Clone {
                    url: url.clone(),
                    path: path.clone(),
                    source,
                })?;
            match git::git_for_each_ref(git, path).await {
                Ok(refs) => info!(ref_count = refs.len(), "mirror clone complete"),
                Err(e) => warn!(error = %e, "cloned repository could not be listed"),
            }
            Ok(ProvisionOutcome::Cloned)
        }
        None => {
            info!("repository not found; creating empty bare repository");
            git::init_bare_repo(git, path)
                .await
                .map_err(|source| ProvisionError::Init {
                    path: path.clone(),
                    source,
                })?;
            Ok(ProvisionOutcome::Initialised)
        }
    }
}

/// Provision every configured repository, in order, and build the table the
/// server works from.
///
/// A failing repository is logged and marked [`RepoStatus::Failed`]; it never
/// stops the others.
pub async fn provision_all(git: &Path, configs: &[RepositoryConfig]) -> RepoTable {
    info!(count = configs.len(), "initialising repositories");

    let mut repos = Vec::with_capacity(configs.len());
    for config in configs {
        let mut repo = Repository::from_config(config);
        match ensure(git, &mut repo).await {
            Ok(outcome) => info!(repo = %repo.name, ?outcome, "repository ready"),
            Err(e) => error!(
                repo = %repo.name,
                error = %format!("{:#}", anyhow::Error::new(e)),
                "repository setup failed; it will not be served"
            ),
        }
        repos.push(repo);
    }

    let table = RepoTable::new(repos);
    info!(
        ready = table.count(RepoStatus::Ready),
        failed = table.count(RepoStatus::Failed),
        "repository setup complete"
    );
    table
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
