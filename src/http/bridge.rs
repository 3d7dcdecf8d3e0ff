//! Connects HTTP exchanges to the git protocol helpers.
//!
//! `info/refs` runs the helper in advertisement mode and returns its (small)
//! output behind the service announcement.  RPC requests stream both ways:
//! the request body is decoded and written to the helper's stdin as it
//! arrives, and stdout is relayed to the client in chunks through a bounded
//! channel.
//!
//! Response headers are held back until the helper produces its first byte
//! or exits.  Failures before that point become ordinary error responses;
//! failures after it abort the response stream so the client never mistakes
//! a truncated result for a complete one.

use std::io;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::codec::{CodecError, ContentEncoding, Decoder, Encoder};
use super::pktline::service_announcement;
use crate::config::BridgeConfig;
use crate::git::process::{deadline_elapsed, run_until, Deadline};
use crate::git::{GitProcess, HelperMode, HelperSpec, ProcessError, Service};
use crate::metrics::{MetricsRegistry, ServiceLabels};
use crate::repo::Repository;

/// Read size for helper stdout.
const CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between the helper and a slow client.
const RESPONSE_CHANNEL_DEPTH: usize = 16;

const EXPIRES_NEVER_CACHED: &str = "Fri, 01 Jan 1980 00:00:00 GMT";
const CACHE_CONTROL_NO_CACHE: &str = "no-cache, max-age=0, must-revalidate";

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed to read request body")]
    RequestBody(#[source] axum::Error),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("failed to encode response")]
    Encode(#[source] io::Error),
    #[error("client disconnected")]
    Disconnected,
}

/// Per-request inputs of an RPC exchange.
pub struct RpcRequest {
    pub content_encoding: ContentEncoding,
    pub accepts_gzip: bool,
    /// Value of the client's `Git-Protocol` header.
    pub git_protocol: Option<String>,
    pub body: Body,
}

/// Spawns and supervises helpers with the configured binary and limits.
pub struct Bridge {
    config: BridgeConfig,
    metrics: MetricsRegistry,
}

impl Bridge {
    pub fn new(config: BridgeConfig, metrics: MetricsRegistry) -> Self {
        Self { config, metrics }
    }

    fn deadline(&self) -> Option<Deadline> {
        self.config.process_timeout().map(Deadline::after)
    }

    fn helper<'a>(
        &'a self,
        repo: &'a Repository,
        service: Service,
        mode: HelperMode,
        git_protocol: Option<&'a str>,
    ) -> Result<GitProcess, ProcessError> {
        let mut process = GitProcess::spawn(HelperSpec {
            git: &self.config.git_binary,
            service,
            mode,
            repo_path: &repo.path,
            git_protocol,
        })?;
        process.track(self.metrics.metrics.active_helpers.clone());
        Ok(process)
    }

    /// `GET /{repo}/info/refs?service=...`
    #[instrument(skip_all, fields(repo = %repo.name, %service))]
    pub async fn serve_info_refs(
        &self,
        repo: &Repository,
        service: Service,
        git_protocol: Option<&str>,
    ) -> Result<Response, BridgeError> {
        let mut process = self.helper(repo, service, HelperMode::Advertise, git_protocol)?;
        let advertisement = run_until(
            self.deadline(),
            service.subcommand(),
            process.collect_stdout(),
        )
        .await??;

        let mut body = BytesMut::from(&service_announcement(service)[..]);
        body.extend_from_slice(&advertisement);
        debug!(bytes = body.len(), "ref advertisement ready");

        Ok(git_response(
            service.advertisement_content_type(),
            Body::from(body.freeze()),
        ))
    }

    /// `POST /{repo}/git-upload-pack` and `POST /{repo}/git-receive-pack`.
    #[instrument(skip_all, fields(repo = %repo.name, %service))]
    pub async fn serve_rpc(
        &self,
        repo: &Repository,
        service: Service,
        request: RpcRequest,
    ) -> Result<Response, BridgeError> {
        let started = Instant::now();
        let subcommand = service.subcommand();
        let deadline = self.deadline();

        let mut process = self.helper(
            repo,
            service,
            HelperMode::StatelessRpc,
            request.git_protocol.as_deref(),
        )?;
        let stdin = process.take_stdin().ok_or_else(|| missing_pipe(subcommand))?;
        let mut stdout = process.take_stdout().ok_or_else(|| missing_pipe(subcommand))?;

        let feeder_task = tokio::spawn(
            feed_stdin(
                stdin,
                request.body,
                Decoder::new(request.content_encoding),
                service,
                self.metrics.clone(),
            )
            .in_current_span(),
        );
        process.attach_feeder(&feeder_task);
        let mut feeder = Some(feeder_task);

        // Hold the headers until there is output to send or the helper is done.
        let mut first = BytesMut::with_capacity(CHUNK_SIZE);
        let read = loop {
            tokio::select! {
                joined = feeder_finished(&mut feeder) => {
                    feeder = None;
                    join_result(joined, subcommand)?;
                    debug!("request body fully delivered");
                }
                read = stdout.read_buf(&mut first) => {
                    break read.map_err(|source| ProcessError::Pipe { subcommand, source })?;
                }
                err = deadline_elapsed(deadline, subcommand) => return Err(err.into()),
            }
        };

        if read == 0 {
            // The helper closed stdout without writing anything.
            if let Some(task) = feeder.take() {
                join_result(run_until(deadline, subcommand, task).await?, subcommand)?;
            }
            run_until(deadline, subcommand, process.wait()).await??;
            self.metrics
                .metrics
                .rpc_duration_seconds
                .get_or_create(&ServiceLabels::from(service))
                .observe(started.elapsed().as_secs_f64());
            info!("helper finished without output");
            return Ok(git_response(service.result_content_type(), Body::empty()));
        }

        let encoding = if self.config.gzip_responses && request.accepts_gzip {
            ContentEncoding::Gzip
        } else {
            ContentEncoding::Identity
        };

        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(RESPONSE_CHANNEL_DEPTH);
        let relay = Relay {
            process,
            stdout,
            feeder,
            first: first.freeze(),
            encoder: Encoder::new(encoding),
            deadline,
            service,
            started,
            metrics: self.metrics.clone(),
        };
        tokio::spawn(relay.run(tx).in_current_span());

        let mut response = git_response(
            service.result_content_type(),
            Body::from_stream(ReceiverStream::new(rx)),
        );
        if let Some(value) = encoding.header_value() {
            response
                .headers_mut()
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static(value));
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Request direction
// ---------------------------------------------------------------------------

/// Decode the request body and write it to the helper's stdin, closing stdin
/// at the end.
///
/// A helper that stops reading early is not an error here; its exit status
/// decides the outcome.
async fn feed_stdin(
    mut stdin: ChildStdin,
    body: Body,
    mut decoder: Decoder,
    service: Service,
    metrics: MetricsRegistry,
) -> Result<(), BridgeError> {
    let subcommand = service.subcommand();
    let mut stream = body.into_data_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BridgeError::RequestBody)?;
        metrics.metrics.request_bytes.inc_by(chunk.len() as u64);
        decoder.push(chunk);
        while let Some(piece) = decoder.next_piece()? {
            if !write_stdin(&mut stdin, &piece, subcommand).await? {
                debug!(written, "helper closed stdin early");
                return Ok(());
            }
            written += piece.len() as u64;
        }
    }
    decoder.finish()?;

    match stdin.shutdown().await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Err(source) => return Err(ProcessError::Pipe { subcommand, source }.into()),
    }
    debug!(written, "request body written to helper");
    Ok(())
}

/// Returns `false` once the helper has closed its end of the pipe.
async fn write_stdin(
    stdin: &mut ChildStdin,
    data: &[u8],
    subcommand: &'static str,
) -> Result<bool, BridgeError> {
    if data.is_empty() {
        return Ok(true);
    }
    match stdin.write_all(data).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(source) => Err(ProcessError::Pipe { subcommand, source }.into()),
    }
}

type Feeder = JoinHandle<Result<(), BridgeError>>;

async fn feeder_finished(
    feeder: &mut Option<Feeder>,
) -> Result<Result<(), BridgeError>, JoinError> {
    match feeder {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

fn join_result(
    joined: Result<Result<(), BridgeError>, JoinError>,
    subcommand: &'static str,
) -> Result<(), BridgeError> {
    joined.map_err(|e| ProcessError::Pipe {
        subcommand,
        source: io::Error::other(e),
    })?
}

fn missing_pipe(subcommand: &'static str) -> ProcessError {
    ProcessError::Pipe {
        subcommand,
        source: io::Error::other("helper pipe not captured"),
    }
}

// ---------------------------------------------------------------------------
// Response direction
// ---------------------------------------------------------------------------

/// Everything the background relay owns once headers have been committed.
struct Relay {
    process: GitProcess,
    stdout: ChildStdout,
    feeder: Option<Feeder>,
    first: Bytes,
    encoder: Encoder,
    deadline: Option<Deadline>,
    service: Service,
    started: Instant,
    metrics: MetricsRegistry,
}

impl Relay {
    async fn run(mut self, tx: mpsc::Sender<Result<Bytes, io::Error>>) {
        let subcommand = self.service.subcommand();
        let labels = ServiceLabels::from(self.service);
        let deadline = self.deadline;

        let outcome = tokio::select! {
            relayed = run_until(deadline, subcommand, self.pump(&tx)) => {
                relayed.map_err(BridgeError::from).and_then(|r| r)
            }
            () = tx.closed() => Err(BridgeError::Disconnected),
        };

        let metrics = &self.metrics.metrics;
        match outcome {
            Ok(()) => {
                metrics
                    .rpc_duration_seconds
                    .get_or_create(&labels)
                    .observe(self.started.elapsed().as_secs_f64());
                info!(
                    elapsed_ms = self.started.elapsed().as_millis() as u64,
                    "rpc complete"
                );
            }
            Err(BridgeError::Disconnected) => {
                metrics.aborted_streams_total.get_or_create(&labels).inc();
                warn!(pid = ?self.process.pid(), "client disconnected; terminating helper");
            }
            Err(e) => {
                metrics.aborted_streams_total.get_or_create(&labels).inc();
                error!(error = %e, "rpc failed after response started; aborting stream");
                let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
            }
        }
        // Dropping `self.process` kills and reaps the helper if it is still
        // running.
    }

    async fn pump(&mut self, tx: &mpsc::Sender<Result<Bytes, io::Error>>) -> Result<(), BridgeError> {
        let subcommand = self.service.subcommand();

        let first = std::mem::take(&mut self.first);
        let encoded = self.encoder.encode(first).map_err(BridgeError::Encode)?;
        self.send(tx, encoded).await?;

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buf.reserve(CHUNK_SIZE);
            let n = self
                .stdout
                .read_buf(&mut buf)
                .await
                .map_err(|source| ProcessError::Pipe { subcommand, source })?;
            if n == 0 {
                break;
            }
            let encoded = self
                .encoder
                .encode(buf.split().freeze())
                .map_err(BridgeError::Encode)?;
            self.send(tx, encoded).await?;
        }

        if let Some(task) = self.feeder.take() {
            join_result(task.await, subcommand)?;
        }
        self.process.wait().await?;

        let encoder = std::mem::replace(&mut self.encoder, Encoder::new(ContentEncoding::Identity));
        let tail = encoder.finish().map_err(BridgeError::Encode)?;
        self.send(tx, tail).await
    }

    async fn send(
        &self,
        tx: &mpsc::Sender<Result<Bytes, io::Error>>,
        chunk: Bytes,
    ) -> Result<(), BridgeError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        tx.send(Ok(chunk))
            .await
            .map_err(|_| BridgeError::Disconnected)?;
        self.metrics.metrics.response_bytes.inc_by(len);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A 200 response with the headers git's own http-backend sends to keep
/// proxies from caching protocol traffic.
fn git_response(content_type: &'static str, body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::EXPIRES, EXPIRES_NEVER_CACHED),
            (header::PRAGMA, "no-cache"),
            (header::CACHE_CONTROL, CACHE_CONTROL_NO_CACHE),
        ],
        body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
