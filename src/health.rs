use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::repo::{RepoStatus, RepoTable};
use crate::AppState;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub repositories: RepositoryCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct RepositoryCounts {
    pub ready: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

/// Summarise the provisioning results.  Any failed repository makes the
/// bridge `degraded`; it keeps serving the rest.
pub fn summarise(repos: &RepoTable) -> HealthResponse {
    let repositories = RepositoryCounts {
        ready: repos.count(RepoStatus::Ready),
        failed: repos.count(RepoStatus::Failed),
    };
    let status = if repositories.failed == 0 {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };
    HealthResponse {
        status,
        repositories,
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler.  Always 200 once the server is listening.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(summarise(&state.repos)))
}
