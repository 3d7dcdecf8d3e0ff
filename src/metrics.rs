use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::git::Service;
use crate::repo::{RepoStatus, RepoTable};

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub endpoint: Endpoint,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    InfoRefs,
    UploadPack,
    ReceivePack,
    Unmatched,
}

/// Status class of a response at the moment its headers were sent.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Ok,
    ClientError,
    ServerError,
}

impl Outcome {
    pub fn from_status(status: axum::http::StatusCode) -> Self {
        if status.is_server_error() {
            Self::ServerError
        } else if status.is_client_error() {
            Self::ClientError
        } else {
            Self::Ok
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: ServiceLabel,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ServiceLabel {
    UploadPack,
    ReceivePack,
}

impl From<Service> for ServiceLabels {
    fn from(service: Service) -> Self {
        let service = match service {
            Service::UploadPack => ServiceLabel::UploadPack,
            Service::ReceivePack => ServiceLabel::ReceivePack,
        };
        Self { service }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RepoStatusLabels {
    pub status: RepoStatusLabel,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RepoStatusLabel {
    Ready,
    Failed,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every metric exposed on `/metrics`.
pub struct Metrics {
    // -- requests --
    pub requests_total: Family<RequestLabels, Counter>,
    pub aborted_streams_total: Family<ServiceLabels, Counter>,
    pub rpc_duration_seconds: Family<ServiceLabels, Histogram>,

    // -- helpers --
    pub active_helpers: Gauge,

    // -- traffic --
    pub request_bytes: Counter,
    pub response_bytes: Counter,

    // -- repositories --
    pub repositories: Family<RepoStatusLabels, Gauge>,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "gitbridge_requests",
            "Git HTTP requests by endpoint and response class at header time",
            requests_total.clone(),
        );

        let aborted_streams_total = Family::<ServiceLabels, Counter>::default();
        registry.register(
            "gitbridge_aborted_streams",
            "RPC responses aborted after headers were sent",
            aborted_streams_total.clone(),
        );

        let rpc_duration_seconds =
            Family::<ServiceLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 14))
            });
        registry.register(
            "gitbridge_rpc_duration_seconds",
            "Wall time of completed RPC exchanges in seconds",
            rpc_duration_seconds.clone(),
        );

        let active_helpers: Gauge = Gauge::default();
        registry.register(
            "gitbridge_active_helpers",
            "Git helper processes currently running",
            active_helpers.clone(),
        );

        let request_bytes = Counter::default();
        registry.register(
            "gitbridge_request_bytes",
            "RPC request body bytes received, before decoding",
            request_bytes.clone(),
        );

        let response_bytes = Counter::default();
        registry.register(
            "gitbridge_response_bytes",
            "RPC response body bytes sent, after encoding",
            response_bytes.clone(),
        );

        let repositories = Family::<RepoStatusLabels, Gauge>::default();
        registry.register(
            "gitbridge_repositories",
            "Configured repositories by provisioning result",
            repositories.clone(),
        );

        Self {
            requests_total,
            aborted_streams_total,
            rpc_duration_seconds,
            active_helpers,
            request_bytes,
            response_bytes,
            repositories,
        }
    }

    /// Publish the provisioning result of every repository.
    pub fn record_repositories(&self, repos: &RepoTable) {
        for (status, label) in [
            (RepoStatus::Ready, RepoStatusLabel::Ready),
            (RepoStatus::Failed, RepoStatusLabel::Failed),
        ] {
            self.repositories
                .get_or_create(&RepoStatusLabels { status: label })
                .set(repos.count(status) as i64);
        }
    }

    pub fn record_request(&self, endpoint: Endpoint, status: axum::http::StatusCode) {
        self.requests_total
            .get_or_create(&RequestLabels {
                endpoint,
                outcome: Outcome::from_status(status),
            })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`].
///
/// [`AppState`]: crate::AppState
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all bridge metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// OpenMetrics text exposition of the registry.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)
            .map_err(|e| anyhow::anyhow!("metrics encoding failed: {e}"))?;
        Ok(buf)
    }
}
