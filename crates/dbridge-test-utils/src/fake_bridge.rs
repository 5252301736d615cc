//! Fake bridge server for testing without a real device toolchain.
//!
//! Serves the subset of host services the client uses: version, kill,
//! device tracking, transport + shell and port forwarding. Every request
//! payload is recorded so tests can assert on the exact wire traffic.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use dbridge_core::config::{BridgeConfig, BridgeEndpoint};
use dbridge_core::constants::{FAIL, OKAY, STATUS_DEVICE};
use dbridge_core::protocol::decode_length;

/// Protocol version reported for `host:version`.
const FAKE_VERSION: u32 = 41;

/// A forward request accepted by the fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRecord {
    pub serial: String,
    pub local: String,
    pub remote: String,
}

#[derive(Debug)]
struct State {
    devices: watch::Sender<Vec<(String, String)>>,
    track_resets: watch::Sender<u64>,
    shell_outputs: Mutex<HashMap<(String, String), Vec<u8>>>,
    rejects: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
    forwards: Mutex<Vec<ForwardRecord>>,
    track_sessions: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl State {
    fn new() -> Self {
        Self {
            devices: watch::channel(Vec::new()).0,
            track_resets: watch::channel(0).0,
            shell_outputs: Mutex::new(HashMap::new()),
            rejects: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            forwards: Mutex::new(Vec::new()),
            track_sessions: AtomicUsize::new(0),
        }
    }

    fn is_rejected(&self, request: &str) -> bool {
        lock(&self.rejects)
            .iter()
            .any(|prefix| request.starts_with(prefix.as_str()))
    }

    fn is_online(&self, serial: &str) -> bool {
        self.devices
            .borrow()
            .iter()
            .any(|(id, status)| id == serial && status == STATUS_DEVICE)
    }

    fn device_list(&self) -> String {
        self.devices
            .borrow()
            .iter()
            .map(|(id, status)| format!("{}\t{}\n", id, status))
            .collect()
    }
}

/// In-process bridge server bound to a loopback TCP port.
///
/// Dropping the fake stops the accept loop and every open connection.
pub struct FakeBridge {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl FakeBridge {
    /// Start a fake server on an ephemeral loopback port.
    pub async fn start() -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await
    }

    /// Start a fake server on a specific address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::new());
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        debug!(%addr, "fake bridge listening");
        Ok(Self { addr, state, task })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint clients should connect to.
    pub fn endpoint(&self) -> BridgeEndpoint {
        BridgeEndpoint::Tcp(self.addr)
    }

    /// Client configuration pointing at this server.
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig::new().with_endpoint(self.endpoint())
    }

    /// Replace the device list; open tracking sessions receive a new frame.
    pub fn set_devices(&self, devices: &[(&str, &str)]) {
        let devices = devices
            .iter()
            .map(|(id, status)| (id.to_string(), status.to_string()))
            .collect();
        self.state.devices.send_replace(devices);
    }

    /// Script the output of `command` on `serial`. Unscripted commands print nothing.
    pub fn set_shell_output(&self, serial: &str, command: &str, output: impl Into<Vec<u8>>) {
        lock(&self.state.shell_outputs)
            .insert((serial.to_string(), command.to_string()), output.into());
    }

    /// Answer `FAIL` to every request payload starting with `prefix`.
    pub fn reject(&self, prefix: &str) {
        lock(&self.state.rejects).push(prefix.to_string());
    }

    /// Stop rejecting requests.
    pub fn clear_rejects(&self) {
        lock(&self.state.rejects).clear();
    }

    /// Close every open tracking session.
    pub fn close_track_sessions(&self) {
        self.state.track_resets.send_modify(|n| *n += 1);
    }

    /// Every request payload received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.state.requests).clone()
    }

    /// Number of received requests equal to `payload`.
    pub fn request_count(&self, payload: &str) -> usize {
        lock(&self.state.requests)
            .iter()
            .filter(|r| r.as_str() == payload)
            .count()
    }

    /// Forwards accepted so far.
    pub fn forwards(&self) -> Vec<ForwardRecord> {
        lock(&self.state.forwards).clone()
    }

    /// Number of tracking sessions opened so far.
    pub fn track_sessions(&self) -> usize {
        self.state.track_sessions.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>) {
    // Aborting this task drops the set, which aborts every connection.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let state = Arc::clone(&state);
                connections.spawn(async move {
                    if let Err(e) = serve(stream, state).await {
                        debug!(error = %e, "fake bridge connection ended");
                    }
                });
            }
            Some(_) = connections.join_next() => {}
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> io::Result<Option<String>> {
    let mut prefix = [0u8; 4];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = decode_length(&prefix)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad length prefix"))?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
}

fn frame(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:04x}", data.len()).into_bytes();
    out.extend_from_slice(data);
    out
}

async fn write_fail(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    let mut out = FAIL.to_vec();
    out.extend_from_slice(&frame(message.as_bytes()));
    stream.write_all(&out).await?;
    stream.shutdown().await
}

async fn serve(mut stream: TcpStream, state: Arc<State>) -> io::Result<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    debug!(%request, "fake bridge request");
    lock(&state.requests).push(request.clone());

    if state.is_rejected(&request) {
        return write_fail(&mut stream, "rejected by test").await;
    }

    match request.as_str() {
        "host:version" => {
            let mut out = OKAY.to_vec();
            out.extend_from_slice(&frame(format!("{:04x}", FAKE_VERSION).as_bytes()));
            stream.write_all(&out).await?;
            stream.shutdown().await
        }
        "host:kill" => {
            stream.write_all(OKAY).await?;
            stream.shutdown().await
        }
        "host:track-devices" => track(stream, state).await,
        _ => {
            if let Some(serial) = request.strip_prefix("host:transport:") {
                transport(stream, state, serial.to_string()).await
            } else if let Some(rest) = request.strip_prefix("host-serial:") {
                forward(stream, state, rest).await
            } else {
                write_fail(&mut stream, "unknown host service").await
            }
        }
    }
}

async fn track(mut stream: TcpStream, state: Arc<State>) -> io::Result<()> {
    state.track_sessions.fetch_add(1, Ordering::SeqCst);
    let mut devices = state.devices.subscribe();
    let mut resets = state.track_resets.subscribe();
    stream.write_all(OKAY).await?;

    let mut probe = [0u8; 1];
    loop {
        devices.mark_unchanged();
        stream
            .write_all(&frame(state.device_list().as_bytes()))
            .await?;

        tokio::select! {
            changed = devices.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = resets.changed() => {
                return stream.shutdown().await;
            }
            read = stream.read(&mut probe) => {
                // Client hung up (or sent junk on a one-way stream).
                read?;
                return Ok(());
            }
        }
    }
}

async fn transport(mut stream: TcpStream, state: Arc<State>, serial: String) -> io::Result<()> {
    if !state.is_online(&serial) {
        return write_fail(&mut stream, &format!("device '{}' not found", serial)).await;
    }
    stream.write_all(OKAY).await?;

    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    debug!(%serial, %request, "fake bridge device request");
    lock(&state.requests).push(request.clone());

    if state.is_rejected(&request) {
        return write_fail(&mut stream, "rejected by test").await;
    }
    let Some(command) = request.strip_prefix("shell:") else {
        return write_fail(&mut stream, "unknown device service").await;
    };

    let output = lock(&state.shell_outputs)
        .get(&(serial, command.to_string()))
        .cloned()
        .unwrap_or_default();
    let mut out = OKAY.to_vec();
    out.extend_from_slice(&output);
    stream.write_all(&out).await?;
    stream.shutdown().await
}

async fn forward(mut stream: TcpStream, state: Arc<State>, rest: &str) -> io::Result<()> {
    let parsed = rest.split_once(":forward:").and_then(|(serial, spec)| {
        let (local, remote) = spec.split_once(';')?;
        Some(ForwardRecord {
            serial: serial.to_string(),
            local: local.to_string(),
            remote: remote.to_string(),
        })
    });
    let Some(record) = parsed else {
        return write_fail(&mut stream, "malformed forward request").await;
    };
    if !state.is_online(&record.serial) {
        return write_fail(&mut stream, &format!("device '{}' not found", record.serial)).await;
    }

    lock(&state.forwards).push(record);
    // One OKAY for the host service, one for the forward itself.
    stream.write_all(b"OKAYOKAY").await?;
    stream.shutdown().await
}
