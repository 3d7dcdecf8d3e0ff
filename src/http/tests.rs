//! End-to-end tests: a real server on a loopback port, driven with `reqwest`
//! and the `git` command line client.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use super::handler::create_router;
use super::pktline::{put_pkt_line, FLUSH_PKT};
use crate::config::{BridgeConfig, Config, RepositoryConfig, ServerConfig};
use crate::git::Service;
use crate::metrics::ServiceLabels;
use crate::repo::provision_all;
use crate::AppState;

const UPLOAD_REQUEST: &str = "application/x-git-upload-pack-request";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git off the async runtime so the server keeps serving meanwhile.
async fn git(args: &[&str], cwd: &Path) -> Output {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let cwd = cwd.to_path_buf();
    tokio::task::spawn_blocking(move || {
        Command::new("git")
            .args(&args)
            .current_dir(&cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .stdin(Stdio::null())
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

async fn git_ok(args: &[&str], cwd: &Path) -> String {
    let output = git(args, cwd).await;
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A working repository with one commit, returning its path and commit id.
async fn work_repo(dir: &Path, name: &str, message: &str) -> (PathBuf, String) {
    let work = dir.join(name);
    std::fs::create_dir_all(&work).unwrap();
    git_ok(&["init", "--quiet"], &work).await;
    std::fs::write(work.join("README"), format!("{message}\n")).unwrap();
    git_ok(&["add", "README"], &work).await;
    git_ok(&["commit", "--quiet", "-m", message], &work).await;
    let head = git_ok(&["rev-parse", "HEAD"], &work).await;
    (work, head)
}

fn repo_config(name: &str, path: PathBuf, init_from: Option<&Path>) -> RepositoryConfig {
    RepositoryConfig {
        name: name.to_string(),
        path,
        init_from: init_from.map(|p| p.to_string_lossy().into_owned()),
    }
}

struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    state: AppState,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start_test_server(repositories: Vec<RepositoryConfig>, bridge: BridgeConfig) -> TestServer {
    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        repositories,
        bridge,
    };
    let repos = provision_all(&config.bridge.git_binary, &config.repositories).await;
    let state = AppState::new(&config, repos);

    let router = create_router(Arc::new(state.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        addr,
        client: reqwest::Client::new(),
        state,
    }
}

/// Server with one empty repository `empty` and one mirror `seeded` holding a
/// single commit.
async fn seeded_server(tmp: &TempDir, bridge: BridgeConfig) -> (TestServer, String) {
    let (work, head) = work_repo(tmp.path(), "source", "initial").await;
    let server = start_test_server(
        vec![
            repo_config("empty", tmp.path().join("srv/empty.git"), None),
            repo_config("seeded", tmp.path().join("srv/seeded.git"), Some(&work)),
        ],
        bridge,
    )
    .await;
    (server, head)
}

/// Pseudo-random bytes that zlib cannot shrink.
fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as u8
        })
        .collect()
}

/// Server with one mirror `bulky` whose single commit holds a large
/// incompressible file, so its pack cannot fit in socket and pipe buffers.
/// Returns the head commit and the served repository path.
async fn bulky_server(tmp: &TempDir) -> (TestServer, String, PathBuf) {
    let work = tmp.path().join("bulky-source");
    std::fs::create_dir_all(&work).unwrap();
    git_ok(&["init", "--quiet"], &work).await;
    std::fs::write(work.join("blob.bin"), noise(32 * 1024 * 1024)).unwrap();
    git_ok(&["add", "blob.bin"], &work).await;
    git_ok(&["commit", "--quiet", "-m", "bulk"], &work).await;
    let head = git_ok(&["rev-parse", "HEAD"], &work).await;

    let served = tmp.path().join("srv/bulky.git");
    let server = start_test_server(
        vec![repo_config("bulky", served.clone(), Some(&work))],
        BridgeConfig::default(),
    )
    .await;
    (server, head, served)
}

fn want_request(oid: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_pkt_line(&mut buf, format!("want {oid}\n").as_bytes());
    buf.extend_from_slice(FLUSH_PKT);
    put_pkt_line(&mut buf, b"done\n");
    buf.freeze()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("git not available, skipping test");
            return;
        }
    };
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Pids of live `git <subcommand>` processes serving `repo`.
#[cfg(target_os = "linux")]
fn helper_pids(subcommand: &str, repo: &Path) -> Vec<u32> {
    let repo = repo.to_string_lossy();
    std::fs::read_dir("/proc")
        .unwrap()
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            std::fs::read(format!("/proc/{pid}/cmdline")).is_ok_and(|raw| {
                let args: Vec<_> = raw.split(|&b| b == 0).map(String::from_utf8_lossy).collect();
                args.iter().any(|a| a == subcommand) && args.iter().any(|a| *a == repo)
            })
        })
        .collect()
}

/// Wait until exactly one helper is tracked and visible, returning its pids.
#[cfg(target_os = "linux")]
async fn running_helper(server: &TestServer, subcommand: &str, repo: &Path) -> Vec<u32> {
    let mut pids = Vec::new();
    wait_for("helper to start", || {
        pids = helper_pids(subcommand, repo);
        server.state.metrics.metrics.active_helpers.get() == 1 && !pids.is_empty()
    })
    .await;
    pids
}

#[cfg(target_os = "linux")]
async fn assert_helper_reaped(server: &TestServer, pids: &[u32]) {
    wait_for("helper to be released", || {
        server.state.metrics.metrics.active_helpers.get() == 0
    })
    .await;
    wait_for("helper process to disappear", || {
        pids.iter().all(|pid| !Path::new(&format!("/proc/{pid}")).exists())
    })
    .await;
}

// ---------------------------------------------------------------------------
// info/refs
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn info_refs_advertises_both_services() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head) = seeded_server(&tmp, BridgeConfig::default()).await;

    for (service, prefix) in [
        ("git-upload-pack", &b"001e# service=git-upload-pack\n0000"[..]),
        ("git-receive-pack", &b"001f# service=git-receive-pack\n0000"[..]),
    ] {
        let resp = server
            .client
            .get(server.url(&format!("/seeded/info/refs?service={service}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"],
            format!("application/x-{service}-advertisement").as_str()
        );
        assert_eq!(resp.headers()["cache-control"], "no-cache, max-age=0, must-revalidate");
        assert_eq!(resp.headers()["expires"], "Fri, 01 Jan 1980 00:00:00 GMT");

        let body = resp.bytes().await.unwrap();
        assert!(body.starts_with(prefix), "{service}: {body:?}");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(&head), "{service} advertisement lacks {head}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn info_refs_service_parameter_is_validated() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, _) = seeded_server(&tmp, BridgeConfig::default()).await;

    for query in ["", "?service=", "?service=git-frobnicate", "?other=1"] {
        let resp = server
            .client
            .get(server.url(&format!("/empty/info/refs{query}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "query {query:?}");
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_repository_is_404_without_side_effects() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, _) = seeded_server(&tmp, BridgeConfig::default()).await;

    let resp = server
        .client
        .get(server.url("/ghost/info/refs?service=git-upload-pack"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server
        .client
        .post(server.url("/ghost/git-receive-pack"))
        .body("0000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    assert!(!tmp.path().join("ghost").exists());
    assert!(!tmp.path().join("srv/ghost").exists());
    assert!(!tmp.path().join("srv/ghost.git").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_repository_is_404_whatever_the_service_parameter() {
    let server = start_test_server(Vec::new(), BridgeConfig::default()).await;

    for path in [
        "/ghost/info/refs",
        "/ghost/info/refs?service=",
        "/ghost/info/refs?service=bogus",
        "/ghost/info/refs?service=git-upload-pack",
    ] {
        let resp = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_repository_is_not_served() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let server = start_test_server(
        vec![repo_config(
            "broken",
            tmp.path().join("broken.git"),
            Some(&tmp.path().join("no-such-remote")),
        )],
        BridgeConfig::default(),
    )
    .await;

    let resp = server
        .client
        .get(server.url("/broken/info/refs?service=git-upload-pack"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let health = server.client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&health.bytes().await.unwrap()).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["repositories"]["failed"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_method_or_path_is_404() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, _) = seeded_server(&tmp, BridgeConfig::default()).await;

    let cases = [
        (reqwest::Method::GET, "/seeded/git-upload-pack"),
        (reqwest::Method::PUT, "/seeded/git-receive-pack"),
        (reqwest::Method::POST, "/seeded/info/refs?service=git-upload-pack"),
        (reqwest::Method::POST, "/seeded/git-frobnicate"),
        (reqwest::Method::GET, "/seeded/objects/info/packs"),
        (reqwest::Method::GET, "/"),
    ];
    for (method, path) in cases {
        let resp = server
            .client
            .request(method.clone(), server.url(path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{method} {path}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mismatched_content_type_is_rejected() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, _) = seeded_server(&tmp, BridgeConfig::default()).await;

    let resp = server
        .client
        .post(server.url("/seeded/git-upload-pack"))
        .header("content-type", "application/x-git-receive-pack-request")
        .body("0000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gzip_and_plain_requests_yield_identical_results() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head) = seeded_server(&tmp, BridgeConfig::default()).await;
    let request = want_request(&head);

    let plain = server
        .client
        .post(server.url("/seeded/git-upload-pack"))
        .header("content-type", UPLOAD_REQUEST)
        .body(request.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(plain.status(), StatusCode::OK);
    assert_eq!(
        plain.headers()["content-type"],
        "application/x-git-upload-pack-result"
    );
    let plain = plain.bytes().await.unwrap();

    let compressed = server
        .client
        .post(server.url("/seeded/git-upload-pack"))
        .header("content-type", UPLOAD_REQUEST)
        .header("content-encoding", "gzip")
        .body(gzip(&request))
        .send()
        .await
        .unwrap();
    assert_eq!(compressed.status(), StatusCode::OK);
    let compressed = compressed.bytes().await.unwrap();

    assert!(plain.starts_with(b"0008NAK\n"), "{plain:?}");
    assert!(plain[8..].starts_with(b"PACK"));
    assert_eq!(plain, compressed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_gzip_body_is_400() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head) = seeded_server(&tmp, BridgeConfig::default()).await;

    let truncated = {
        let full = gzip(&want_request(&head));
        full[..full.len() / 2].to_vec()
    };
    for body in [b"not gzip at all".to_vec(), truncated] {
        let resp = server
            .client
            .post(server.url("/seeded/git-upload-pack"))
            .header("content-type", UPLOAD_REQUEST)
            .header("content-encoding", "gzip")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    let resp = server
        .client
        .post(server.url("/seeded/git-upload-pack"))
        .header("content-encoding", "br")
        .body("0000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gzip_responses_when_enabled_and_accepted() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let bridge = BridgeConfig {
        gzip_responses: true,
        ..BridgeConfig::default()
    };
    let (server, head) = seeded_server(&tmp, bridge).await;
    let request = want_request(&head);

    let identity = server
        .client
        .post(server.url("/seeded/git-upload-pack"))
        .body(request.clone())
        .send()
        .await
        .unwrap();
    assert!(identity.headers().get("content-encoding").is_none());
    let identity = identity.bytes().await.unwrap();

    let gzipped = server
        .client
        .post(server.url("/seeded/git-upload-pack"))
        .header("accept-encoding", "gzip")
        .body(request)
        .send()
        .await
        .unwrap();
    assert_eq!(gzipped.headers()["content-encoding"], "gzip");
    let gzipped = gzipped.bytes().await.unwrap();

    assert_eq!(gunzip(&gzipped), identity.to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_then_clone_round_trips_history() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, _) = seeded_server(&tmp, BridgeConfig::default()).await;
    let (work, head) = work_repo(tmp.path(), "pusher", "pushed commit").await;

    let url = server.url("/empty");
    git_ok(&["push", "--quiet", &url, "HEAD:refs/heads/main"], &work).await;

    let served = tmp.path().join("srv/empty.git");
    let served_head = git_ok(
        &["--git-dir", &served.to_string_lossy(), "rev-parse", "refs/heads/main"],
        tmp.path(),
    )
    .await;
    assert_eq!(served_head, head);

    git_ok(&["clone", "--quiet", "--bare", &url, "clone.git"], tmp.path()).await;
    let cloned_head = git_ok(
        &["--git-dir", "clone.git", "rev-parse", "refs/heads/main"],
        tmp.path(),
    )
    .await;
    assert_eq!(cloned_head, head);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clone_of_mirrored_repository() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head) = seeded_server(&tmp, BridgeConfig::default()).await;

    // Protocol v2 is what current clients speak; force v0 once as well.
    for (dest, protocol) in [("v2", "protocol.version=2"), ("v0", "protocol.version=0")] {
        git_ok(
            &["-c", protocol, "clone", "--quiet", &server.url("/seeded"), dest],
            tmp.path(),
        )
        .await;
        let cloned = git_ok(&["rev-parse", "HEAD"], &tmp.path().join(dest)).await;
        assert_eq!(cloned, head, "{protocol}");
        let readme = std::fs::read_to_string(tmp.path().join(dest).join("README")).unwrap();
        assert_eq!(readme, "initial\n");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_on_different_repositories() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head) = seeded_server(&tmp, BridgeConfig::default()).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = server.client.clone();
        let repo = if i % 2 == 0 { "seeded" } else { "empty" };
        let refs_url = server.url(&format!("/{repo}/info/refs?service=git-upload-pack"));
        let rpc_url = server.url("/seeded/git-upload-pack");
        let request = want_request(&head);
        tasks.push(tokio::spawn(async move {
            let refs = client.get(refs_url).send().await.unwrap();
            assert_eq!(refs.status(), StatusCode::OK);
            refs.bytes().await.unwrap();

            let pack = client.post(rpc_url).body(request).send().await.unwrap();
            assert_eq!(pack.status(), StatusCode::OK);
            let body = pack.bytes().await.unwrap();
            assert!(body.starts_with(b"0008NAK\n"));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Client disconnects
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_during_request_body_reaps_helper() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head) = seeded_server(&tmp, BridgeConfig::default()).await;
    let served = tmp.path().join("srv/seeded.git");

    // A chunked upload whose body never reaches its flush packet.
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let request_head = format!(
        "POST /seeded/git-upload-pack HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Type: {UPLOAD_REQUEST}\r\n\
         Transfer-Encoding: chunked\r\n\r\n",
        server.addr
    );
    stream.write_all(request_head.as_bytes()).await.unwrap();
    let mut partial = BytesMut::new();
    put_pkt_line(&mut partial, format!("want {head}\n").as_bytes());
    stream
        .write_all(format!("{:x}\r\n", partial.len()).as_bytes())
        .await
        .unwrap();
    stream.write_all(&partial).await.unwrap();
    stream.write_all(b"\r\n").await.unwrap();
    stream.flush().await.unwrap();

    let pids = running_helper(&server, "upload-pack", &served).await;
    drop(stream);
    assert_helper_reaped(&server, &pids).await;
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_during_response_reaps_helper() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, head, served) = bulky_server(&tmp).await;

    let mut resp = server
        .client
        .post(server.url("/bulky/git-upload-pack"))
        .header("content-type", UPLOAD_REQUEST)
        .body(want_request(&head))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let first = resp.chunk().await.unwrap().unwrap();
    assert!(first.starts_with(b"0008NAK\n"), "{first:?}");

    let pids = running_helper(&server, "upload-pack", &served).await;
    drop(resp);
    assert_helper_reaped(&server, &pids).await;

    let aborted = server
        .state
        .metrics
        .metrics
        .aborted_streams_total
        .get_or_create(&ServiceLabels::from(Service::UploadPack))
        .get();
    assert_eq!(aborted, 1);
}

// ---------------------------------------------------------------------------
// Health and metrics
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_and_metrics_endpoints() {
    require_git!();
    let tmp = tempfile::tempdir().unwrap();
    let (server, _) = seeded_server(&tmp, BridgeConfig::default()).await;

    let health = server.client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&health.bytes().await.unwrap()).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["repositories"]["ready"], 2);

    let resp = server
        .client
        .get(server.url("/empty/info/refs?service=git-upload-pack"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.bytes().await.unwrap();

    let metrics = server.client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = String::from_utf8(metrics.bytes().await.unwrap().to_vec()).unwrap();
    assert!(text.contains("gitbridge_requests_total{endpoint=\"InfoRefs\",outcome=\"Ok\"} 1"));
    assert!(text.contains("gitbridge_repositories{status=\"Ready\"} 2"));
    assert!(text.contains("gitbridge_active_helpers 0"));
}
