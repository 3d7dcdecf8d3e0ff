//! Configured repositories and their provisioning state.

pub mod provision;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::RepositoryConfig;

pub use provision::provision_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    NotStarted,
    Ready,
    Failed,
}

/// A repository served under `/{name}/`.
#[derive(Debug, Clone)]
pub struct Repository {
    pub name: String,
    pub path: PathBuf,
    /// Remote mirrored on first provisioning only.
    pub init_from: Option<String>,
    pub status: RepoStatus,
}

impl Repository {
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self {
            name: config.name.clone(),
            path: config.path.clone(),
            init_from: config.init_from.clone(),
            status: RepoStatus::NotStarted,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == RepoStatus::Ready
    }
}

/// Startup-built, read-only view of every configured repository.
#[derive(Debug, Default)]
pub struct RepoTable {
    repos: Vec<Repository>,
    by_name: HashMap<String, usize>,
}

impl RepoTable {
    pub fn new(repos: Vec<Repository>) -> Self {
        let by_name = repos
            .iter()
            .enumerate()
            .map(|(idx, repo)| (repo.name.clone(), idx))
            .collect();
        Self { repos, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.by_name.get(name).map(|&idx| &self.repos[idx])
    }

    /// The repository called `name`, if it exists and is servable.
    pub fn ready(&self, name: &str) -> Option<&Repository> {
        self.get(name).filter(|repo| repo.is_ready())
    }

    /// Repositories in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Repository> {
        self.repos.iter()
    }

    pub fn count(&self, status: RepoStatus) -> usize {
        self.repos.iter().filter(|r| r.status == status).count()
    }
}
