//! Classification of incoming requests into the git smart-HTTP endpoints.
//!
//! | Method | Path                      | Route               |
//! |--------|---------------------------|---------------------|
//! | GET    | `/{repo}/info/refs`       | [`GitRoute::InfoRefs`] |
//! | POST   | `/{repo}/git-upload-pack` | [`GitRoute::Rpc`]   |
//! | POST   | `/{repo}/git-receive-pack`| [`GitRoute::Rpc`]   |
//!
//! Everything else, including a known path with the wrong method, is
//! [`GitRoute::NotFound`].  Segments are matched exactly and case-sensitively.
//! The `service` parameter of an info/refs request is parsed here but only
//! judged once the repository is known to exist, so an unknown repository is
//! a 404 whatever its query says.

use axum::extract::Query;
use axum::http::{header, HeaderMap, Method, Uri};
use serde::Deserialize;

use crate::git::Service;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRoute {
    InfoRefs {
        repo: String,
        service: Result<Service, RouteError>,
    },
    Rpc { repo: String, service: Service },
    NotFound,
}

impl GitRoute {
    pub fn repo(&self) -> Option<&str> {
        match self {
            Self::InfoRefs { repo, .. } | Self::Rpc { repo, .. } => Some(repo),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("not found")]
    NotFound,
    #[error("repository {0:?} not found")]
    UnknownRepo(String),
    #[error("missing service parameter")]
    MissingService,
    #[error("unsupported service {0:?}")]
    InvalidService(String),
    #[error("expected Content-Type {expected}, got {found:?}")]
    ContentType {
        expected: &'static str,
        found: String,
    },
}

#[derive(Debug, Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

/// Map a request line onto a [`GitRoute`].
pub fn classify(method: &Method, uri: &Uri) -> GitRoute {
    let Some(rest) = uri.path().strip_prefix('/') else {
        return GitRoute::NotFound;
    };
    let segments: Vec<&str> = rest.split('/').collect();

    match (method, segments.as_slice()) {
        (&Method::GET, [repo, "info", "refs"]) if !repo.is_empty() => GitRoute::InfoRefs {
            repo: (*repo).to_string(),
            service: info_refs_service(uri),
        },
        (&Method::POST, [repo, endpoint]) if !repo.is_empty() => {
            match Service::from_name(endpoint) {
                Some(service) => GitRoute::Rpc {
                    repo: (*repo).to_string(),
                    service,
                },
                None => GitRoute::NotFound,
            }
        }
        _ => GitRoute::NotFound,
    }
}

fn info_refs_service(uri: &Uri) -> Result<Service, RouteError> {
    // An unparsable query carries no usable `service` either.
    let service = Query::<InfoRefsQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.service)
        .filter(|s| !s.is_empty())
        .ok_or(RouteError::MissingService)?;
    Service::from_name(&service).ok_or(RouteError::InvalidService(service))
}

/// A present `Content-Type` must name the service's request type.  An absent
/// one is accepted.
pub fn check_request_content_type(headers: &HeaderMap, service: Service) -> Result<(), RouteError> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let expected = service.request_content_type();
    match value.to_str() {
        Ok(found) if found == expected => Ok(()),
        Ok(found) => Err(RouteError::ContentType {
            expected,
            found: found.to_string(),
        }),
        Err(_) => Err(RouteError::ContentType {
            expected,
            found: format!("{value:?}"),
        }),
    }
}

/// The `Git-Protocol` header, if it is a plausible `key[=value]:...` list.
/// Anything else is dropped rather than handed to the helper's environment.
pub fn git_protocol(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("git-protocol")?.to_str().ok()?;
    let plausible = !value.is_empty()
        && value.len() <= 256
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b':' | b'.' | b'_' | b'-'));
    plausible.then(|| value.to_string())
}
