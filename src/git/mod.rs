//! Git command wrappers, bare repository management and the protocol helper
//! processes.
//!
//! All operations shell out to the `git` binary using `tokio::process::Command`
//! for non-blocking execution.

pub mod bare_repo;
pub mod commands;
pub mod process;
pub mod service;

pub use bare_repo::{init_bare_repo, looks_like_bare_repo};
pub use commands::{git_clone_mirror, git_for_each_ref, git_version};
pub use process::{GitProcess, HelperMode, HelperSpec, ProcessError};
pub use service::Service;
