//! Live device tracking.
//!
//! A [`DeviceTracker`] keeps one `host:track-devices` connection open in a
//! background task and turns every snapshot frame into [`DeviceChange`]
//! events on an unbounded channel. The last snapshot outlives the
//! connection, so reopening after a drop only reports what actually changed.

mod session;
mod snapshot;

pub use session::{SessionState, TrackSession};
pub use snapshot::{DeviceChange, DeviceSnapshot, parse_device_list};

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dbridge_core::{BridgeEndpoint, Result};

use crate::connection::{connect, send_request};

fn lock(snapshot: &Mutex<DeviceSnapshot>) -> MutexGuard<'_, DeviceSnapshot> {
    snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background device tracking session.
#[derive(Debug)]
pub struct DeviceTracker {
    endpoint: BridgeEndpoint,
    events: mpsc::UnboundedSender<DeviceChange>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceTracker {
    /// Create a stopped tracker and the receiver its events arrive on.
    pub fn new(endpoint: BridgeEndpoint) -> (Self, mpsc::UnboundedReceiver<DeviceChange>) {
        let (events, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            endpoint,
            events,
            snapshot: Arc::new(Mutex::new(DeviceSnapshot::new())),
            task: None,
        };
        (tracker, rx)
    }

    /// Whether a tracking connection is open (or being opened).
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Open a tracking connection unless one is already live.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        debug!(endpoint = %self.endpoint, "starting device tracking");
        self.task = Some(tokio::spawn(track(
            self.endpoint.clone(),
            self.events.clone(),
            Arc::clone(&self.snapshot),
        )));
    }

    /// Close the connection and forget the last snapshot.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("device tracking stopped");
        }
        lock(&self.snapshot).clear();
    }

    /// Devices online in the last received snapshot.
    pub fn online_ids(&self) -> BTreeSet<String> {
        lock(&self.snapshot).online_ids()
    }
}

impl Drop for DeviceTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn track(
    endpoint: BridgeEndpoint,
    events: mpsc::UnboundedSender<DeviceChange>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
) {
    match run_session(&endpoint, &events, &snapshot).await {
        Ok(()) => info!("device tracking connection closed"),
        Err(e) => warn!(error = %e, "device tracking failed"),
    }
}

async fn run_session(
    endpoint: &BridgeEndpoint,
    events: &mpsc::UnboundedSender<DeviceChange>,
    snapshot: &Mutex<DeviceSnapshot>,
) -> Result<()> {
    let mut stream = connect(endpoint).await?;
    let mut session = TrackSession::new();
    send_request(&mut stream, &session.open()).await?;

    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for payload in session.feed(&buf[..n])? {
            // Diff under the lock, send after releasing it.
            let changes = lock(snapshot).apply(&payload);
            for change in changes {
                debug!(?change, "device change");
                if events.send(change).is_err() {
                    return Ok(());
                }
            }
        }
    }
}
