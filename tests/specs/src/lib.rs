// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenarios (spec §8): spawns the real `agent`
//! binary as a subprocess against a hand-rolled mock server that speaks the
//! request/response and event-channel protocols, and records what it sees.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

/// Resolve the path to the compiled `agent` binary.
pub fn agent_binary() -> PathBuf {
    workspace_root().join("target").join("debug").join("agent")
}

/// Resolve the path to the compiled `agent-updater` binary.
pub fn updater_binary() -> PathBuf {
    workspace_root().join("target").join("debug").join("agent-updater")
}

fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest).to_path_buf()
}

/// Write a ready-made identity record directly to `data_dir/identity`,
/// bypassing the (out-of-band) configure flow, the way a freshly-configured
/// install would look on disk before the agent's first start.
pub async fn write_identity_fixture(data_dir: &Path, agent_id: &str, token: &str) -> anyhow::Result<()> {
    use agent::identity::seal::MachineSealer;
    use agent::identity::{IdentityStore, RoomConfig};

    let identity_dir = data_dir.join("identity");
    std::fs::create_dir_all(&identity_dir)?;
    let sealer = Arc::new(MachineSealer::open_or_create(&identity_dir.join("machine.key"))?);
    let store = IdentityStore::new(&identity_dir, sealer);
    store
        .store(agent_id.to_owned(), RoomConfig { name: "lobby".into(), x: 0, y: 0 }, token)
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: Vec<u8>,
    pub authorization: Option<String>,
}

#[derive(Clone)]
enum CheckUpdateResponse {
    NoUpdate,
    Update { version: String, download_url: String, checksum_sha256: String, notes: String },
}

#[derive(Default)]
struct MockState {
    check_update: Mutex<Option<CheckUpdateResponse>>,
    packages: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    to_agent: Mutex<VecDeque<String>>,
    from_agent: Mutex<Vec<Value>>,
    connected: AtomicBool,
    /// Woken to force the active WS handler to close its connection,
    /// simulating a mid-session disconnect (see [`MockServer::disconnect`]).
    kick: tokio::sync::Notify,
    /// When set, every new WS handshake is answered with `auth_error`
    /// instead of `connect` (see [`MockServer::reject_auth`]).
    auth_reject: AtomicBool,
}

/// A hand-rolled HTTP + WebSocket server standing in for the managed-endpoint
/// control plane. Plain HTTP requests (`/hardware-info`, `/check-update`,
/// `/report-error`, `/agent-packages/...`) and the event channel's WebSocket
/// upgrade (always `GET /`, per `Config::effective_channel_url`'s lack of a
/// path) share one TCP port, matching how the real server is addressed.
pub struct MockServer {
    addr: std::net::SocketAddr,
    state: Arc<MockState>,
    held: Arc<AtomicBool>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState::default());
        let held = Arc::new(AtomicBool::new(false));
        let accept_state = Arc::clone(&state);
        let accept_held = Arc::clone(&held);
        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => return,
                };
                tokio::spawn(handle_connection(stream, Arc::clone(&accept_state), Arc::clone(&accept_held)));
            }
        });
        Ok(Self { addr, state, held, accept_task })
    }

    /// Stop reading newly-accepted connections until [`MockServer::release`]
    /// is called: TCP connects still succeed into the kernel backlog, but
    /// the WebSocket handshake that would move the channel to `Connected`
    /// never completes. Existing connections are unaffected; pair with
    /// [`MockServer::disconnect`] to also drop whatever is open right now.
    pub fn hold_new_connections(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    /// Force-close the currently active WebSocket connection, if any.
    pub fn disconnect(&self) {
        self.state.kick.notify_one();
    }

    /// Answer every future handshake with `auth_error` instead of
    /// `connect` (spec §8 scenario 7).
    pub fn reject_auth(&self) {
        self.state.auth_reject.store(true, Ordering::SeqCst);
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn set_no_update(&self) {
        *self.state.check_update.lock().await = Some(CheckUpdateResponse::NoUpdate);
    }

    pub async fn set_update_available(&self, version: &str, download_url: &str, checksum_sha256: &str) {
        *self.state.check_update.lock().await = Some(CheckUpdateResponse::Update {
            version: version.to_owned(),
            download_url: download_url.to_owned(),
            checksum_sha256: checksum_sha256.to_owned(),
            notes: String::new(),
        });
    }

    pub async fn set_package(&self, filename: &str, bytes: Vec<u8>) {
        self.state.packages.lock().await.insert(filename.to_owned(), bytes);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().await.clone()
    }

    pub fn is_channel_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Queue an inbound event (e.g. `command:execute`) to be pushed down the
    /// event channel's WebSocket the next time it is open.
    pub async fn push_inbound(&self, event: Value) {
        self.state.to_agent.lock().await.push_back(event.to_string());
    }

    pub async fn wait_for_channel_connected(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_channel_connected() {
                return true;
            }
            if tokio::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_for_channel_disconnected(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_channel_connected() {
                return true;
            }
            if tokio::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_for_request(&self, path: &str, timeout: Duration) -> Option<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(r) = self.state.requests.lock().await.iter().find(|r| r.path == path).cloned() {
                return Some(r);
            }
            if tokio::time::Instant::now() > deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_for_channel_message(
        &self,
        mut predicate: impl FnMut(&Value) -> bool,
        timeout: Duration,
    ) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(v) = self.state.from_agent.lock().await.iter().find(|v| predicate(v)).cloned() {
                return Some(v);
            }
            if tokio::time::Instant::now() > deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<MockState>, held: Arc<AtomicBool>) {
    while held.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut peek_buf = [0u8; 512];
    let n = match stream.peek(&mut peek_buf).await {
        Ok(n) => n,
        Err(_) => return,
    };
    let head = String::from_utf8_lossy(&peek_buf[..n]);
    let is_ws_upgrade = head.lines().next().map(|l| l.starts_with("GET / ")).unwrap_or(false);
    if is_ws_upgrade {
        handle_ws(stream, state).await;
    } else {
        handle_http(stream, state).await;
    }
}

async fn handle_ws(stream: TcpStream, state: Arc<MockState>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut write, mut read) = ws.split();
    if state.auth_reject.load(Ordering::SeqCst) {
        let _ = write.send(Message::Text(r#"{"type":"auth_error"}"#.into())).await;
        let _ = write.close().await;
        return;
    }
    if write.send(Message::Text(r#"{"type":"connect"}"#.into())).await.is_err() {
        return;
    }
    state.connected.store(true, Ordering::SeqCst);

    loop {
        let pending = state.to_agent.lock().await.pop_front();
        if let Some(text) = pending {
            if write.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            continue;
        }
        tokio::select! {
            _ = state.kick.notified() => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        state.from_agent.lock().await.push(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                _ => {}
            },
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }
    state.connected.store(false, Ordering::SeqCst);
}

async fn handle_http(mut stream: TcpStream, state: Arc<MockState>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        let n = match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return;
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let target = parts.next().unwrap_or_default().to_owned();
    let (path, query) = target.split_once('?').map(|(p, q)| (p.to_owned(), q.to_owned())).unwrap_or((target, String::new()));

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            let key = k.trim().to_ascii_lowercase();
            let value = v.trim().to_owned();
            if key == "content-length" {
                content_length = value.parse().unwrap_or(0);
            }
            if key == "authorization" {
                authorization = Some(value);
            }
        }
    }

    let body_start = header_end + 4;
    let mut body = buf[body_start..].to_vec();
    while body.len() < content_length {
        let n = match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        body.extend_from_slice(&tmp[..n]);
    }

    state.requests.lock().await.push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        body: body.clone(),
        authorization,
    });

    let (status, content_type, resp_body): (u16, &str, Vec<u8>) = match (method.as_str(), path.as_str()) {
        ("POST", "/hardware-info") => (200, "application/json", b"{}".to_vec()),
        ("POST", "/report-error") => (200, "application/json", b"{}".to_vec()),
        ("GET", "/check-update") => {
            // Serving an `Update` descriptor consumes it: the next call
            // (whether from this agent's own periodic checker or the
            // freshly-restarted post-update agent) sees `no_update`, the
            // way a real server would stop advertising a version once the
            // fleet has already been told about it.
            let mut guard = state.check_update.lock().await;
            let resp = guard.clone();
            if matches!(resp, Some(CheckUpdateResponse::Update { .. })) {
                *guard = Some(CheckUpdateResponse::NoUpdate);
            }
            drop(guard);
            let json = match resp {
                None | Some(CheckUpdateResponse::NoUpdate) => serde_json::json!({ "status": "no_update" }),
                Some(CheckUpdateResponse::Update { version, download_url, checksum_sha256, notes }) => {
                    serde_json::json!({
                        "status": "update",
                        "version": version,
                        "download_url": download_url,
                        "checksum_sha256": checksum_sha256,
                        "notes": notes,
                    })
                }
            };
            (200, "application/json", serde_json::to_vec(&json).unwrap_or_default())
        }
        ("GET", p) if p.starts_with("/agent-packages/") => {
            let filename = p.trim_start_matches("/agent-packages/");
            match state.packages.lock().await.get(filename) {
                Some(bytes) => (200, "application/octet-stream", bytes.clone()),
                None => (404, "text/plain", b"not found".to_vec()),
            }
        }
        _ => (404, "text/plain", b"not found".to_vec()),
    };

    let header = format!(
        "HTTP/1.1 {status} {}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        status_text(status),
        resp_body.len()
    );
    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(&resp_body).await;
    let _ = stream.shutdown().await;
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A running `agent` process, killed on drop.
pub struct AgentProcess {
    child: Child,
}

impl AgentProcess {
    /// Spawn the real agent binary against `server_url`, storing its state
    /// under `data_dir` / `install_dir`.
    pub fn spawn(data_dir: &Path, install_dir: &Path, server_url: &str) -> anyhow::Result<Self> {
        Self::spawn_with_args(data_dir, install_dir, server_url, &[])
    }

    /// Like [`AgentProcess::spawn`], with extra trailing CLI arguments
    /// (e.g. shortening the updater-handoff timeouts for a faster test).
    pub fn spawn_with_args(data_dir: &Path, install_dir: &Path, server_url: &str, extra_args: &[&str]) -> anyhow::Result<Self> {
        let binary = agent_binary();
        anyhow::ensure!(binary.exists(), "agent binary not found at {}; run `cargo build` first", binary.display());

        let child = Command::new(&binary)
            .arg("--server-url")
            .arg(server_url)
            .arg("--data-dir")
            .arg(data_dir)
            .arg("--install-dir")
            .arg(install_dir)
            .arg("--status-report-interval-sec")
            .arg("1")
            .arg("--log-format")
            .arg("text")
            .arg("--log-level")
            .arg("warn")
            .args(extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Self { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("agent did not exit within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn terminate(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Number of items currently sitting in one Offline Queue partition
/// (`status`, `command-results`, or `error-reports`) under `data_dir`,
/// read directly off disk rather than through `agent::queue::OfflineQueue`
/// so the test doesn't need its own caps configuration.
pub fn count_queue_items(data_dir: &Path, partition: &str) -> usize {
    std::fs::read_dir(data_dir.join("queue").join(partition)).map(|it| it.count()).unwrap_or(0)
}

/// Poll `count_queue_items(data_dir, partition)` until it reaches zero or
/// `timeout` elapses. Returns whether it drained in time.
pub async fn wait_for_queue_drained(data_dir: &Path, partition: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if count_queue_items(data_dir, partition) == 0 {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Copy the compiled `agent`/`agent-updater` binaries into `install_dir`,
/// the way a real install would lay them out before the agent's first
/// start (spec §4.10 assumes both already live under the same directory).
pub fn install_binaries(install_dir: &Path) -> anyhow::Result<()> {
    let agent_dst = install_dir.join("agent");
    let updater_dst = install_dir.join("agent-updater");
    anyhow::ensure!(agent_binary().exists(), "agent binary not found at {}; run `cargo build` first", agent_binary().display());
    anyhow::ensure!(
        updater_binary().exists(),
        "agent-updater binary not found at {}; run `cargo build` first",
        updater_binary().display()
    );
    std::fs::copy(agent_binary(), &agent_dst)?;
    std::fs::copy(updater_binary(), &updater_dst)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&agent_dst, std::fs::Permissions::from_mode(0o755))?;
        std::fs::set_permissions(&updater_dst, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Build an update-package zip carrying a copy of the currently compiled
/// `agent` binary (and `agent-updater`, if `include_updater`) with the
/// executable bit set, the way a real release package is laid out. Returns
/// the raw bytes and their SHA-256 hex digest.
pub fn build_update_package_zip(include_updater: bool) -> anyhow::Result<(Vec<u8>, String)> {
    use sha2::{Digest, Sha256};
    use std::io::Write as _;

    let agent_bytes = std::fs::read(agent_binary())?;
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        #[cfg(unix)]
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        #[cfg(not(unix))]
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("agent", options)?;
        writer.write_all(&agent_bytes)?;
        if include_updater {
            let updater_bytes = std::fs::read(updater_binary())?;
            writer.start_file("agent-updater", options)?;
            writer.write_all(&updater_bytes)?;
        }
        writer.finish()?;
    }
    let digest = format!("{:x}", Sha256::digest(&buf));
    Ok((buf, digest))
}

/// Build a minimal zip archive containing a single entry, for update-package
/// fixtures. Returns the raw bytes and their SHA-256 hex digest.
pub fn build_package_zip(entries: &[(&str, &[u8])]) -> anyhow::Result<(Vec<u8>, String)> {
    use sha2::{Digest, Sha256};
    use std::io::Write as _;

    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options)?;
            writer.write_all(contents)?;
        }
        writer.finish()?;
    }
    let digest = format!("{:x}", Sha256::digest(&buf));
    Ok((buf, digest))
}
