//! Axum router and HTTP request handlers.
//!
//! Routes:
//! - `GET  /{repo}/info/refs?service=...` - Smart HTTP ref advertisement
//! - `POST /{repo}/git-upload-pack`       - Fetch / clone negotiation and pack
//! - `POST /{repo}/git-receive-pack`      - Push
//! - `GET  /healthz`                      - Health check
//! - `GET  /metrics`                      - Prometheus metrics
//!
//! The git endpoints share one fallback handler that classifies the request
//! itself (see [`super::router`]) so that unknown paths and wrong methods are
//! both plain 404s.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, error, warn};

use super::bridge::{BridgeError, RpcRequest};
use super::codec::{CodecError, ContentEncoding};
use super::router::{self, GitRoute, RouteError};
use crate::git::ProcessError;
use crate::metrics::Endpoint;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::health::health_handler))
        .route("/metrics", get(handle_metrics))
        // Git smart HTTP protocol endpoints
        .fallback(handle_git)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_git(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let route = router::classify(&method, &uri);
    let endpoint = endpoint_of(&route);

    let response = dispatch(&state, route, &headers, body).await.unwrap_or_else(|e| {
        debug!(%method, %uri, "git request rejected");
        e.into_response()
    });
    state.metrics.metrics.record_request(endpoint, response.status());
    response
}

async fn dispatch(
    state: &AppState,
    route: GitRoute,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    // Repository first: an unknown repository is a 404 before anything about
    // the request itself is judged.
    let repo = match route.repo() {
        Some(name) => state
            .repos
            .ready(name)
            .ok_or_else(|| RouteError::UnknownRepo(name.to_string()))?,
        None => return Err(RouteError::NotFound.into()),
    };
    let git_protocol = router::git_protocol(headers);

    match route {
        GitRoute::InfoRefs { service, .. } => {
            let service = service?;
            Ok(state
                .bridge
                .serve_info_refs(repo, service, git_protocol.as_deref())
                .await?)
        }
        GitRoute::Rpc { service, .. } => {
            router::check_request_content_type(headers, service)?;
            let request = RpcRequest {
                content_encoding: ContentEncoding::from_headers(headers)?,
                accepts_gzip: ContentEncoding::client_accepts_gzip(headers),
                git_protocol,
                body,
            };
            Ok(state.bridge.serve_rpc(repo, service, request).await?)
        }
        GitRoute::NotFound => Err(RouteError::NotFound.into()),
    }
}

fn endpoint_of(route: &GitRoute) -> Endpoint {
    match route {
        GitRoute::InfoRefs { .. } => Endpoint::InfoRefs,
        GitRoute::Rpc { service, .. } => match service {
            crate::git::Service::UploadPack => Endpoint::UploadPack,
            crate::git::Service::ReceivePack => Endpoint::ReceivePack,
        },
        GitRoute::NotFound => Endpoint::Unmatched,
    }
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the bridge.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state.metrics.encode()?;
    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Request classification or validation failed.
    Route(RouteError),
    /// The request body could not be decoded.
    Codec(CodecError),
    /// The request body could not be read from the connection.
    RequestBody(axum::Error),
    /// The git helper failed before the response started.
    Process(ProcessError),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Route(RouteError::NotFound | RouteError::UnknownRepo(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Route(_) | AppError::Codec(_) | AppError::RequestBody(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Process(ProcessError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Process(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Route(e) => e.to_string(),
            AppError::Codec(e) => e.to_string(),
            AppError::RequestBody(e) => format!("failed to read request body: {e}"),
            AppError::Process(e) => {
                error!(error = %e, "git helper failed");
                e.to_string()
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                format!("Internal server error: {err:#}")
            }
        };
        if status.is_client_error() {
            warn!(%status, %message, "rejecting request");
        }
        (status, message).into_response()
    }
}

impl From<RouteError> for AppError {
    fn from(err: RouteError) -> Self {
        AppError::Route(err)
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        AppError::Codec(err)
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Codec(e) => AppError::Codec(e),
            BridgeError::RequestBody(e) => AppError::RequestBody(e),
            BridgeError::Process(e) => AppError::Process(e),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
