//! Runtime directory: the externally visible list of debuggable runtimes.
//!
//! While at least one listener is registered a background reconciliation
//! task keeps the server up, tracks devices and rediscovers their debugger
//! sockets. Callers read the list synchronously with
//! [`RuntimeDirectory::runtimes`] and are notified through
//! [`RuntimeListener`] every time a discovery pass publishes a new one.

mod reconcile;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use dbridge_core::{BridgeConfig, Error, Result};

use crate::command::CommandRunner;
use crate::forward::PortForwarder;
use crate::registry::Runtime;
use crate::server::ServerProcess;

use reconcile::Reconciler;

/// Receives the runtime list after every published update.
pub trait RuntimeListener: Send + Sync {
    fn runtimes_updated(&self, runtimes: &[Runtime]);
}

impl<F> RuntimeListener for F
where
    F: Fn(&[Runtime]) + Send + Sync,
{
    fn runtimes_updated(&self, runtimes: &[Runtime]) {
        self(runtimes)
    }
}

/// Handle returned by [`RuntimeDirectory::register_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the directory handle and its worker.
struct Shared {
    runtimes: RwLock<Arc<[Runtime]>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn RuntimeListener>)>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            runtimes: RwLock::new(Arc::from(Vec::new())),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn current(&self) -> Arc<[Runtime]> {
        let guard = self
            .runtimes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new list and notify every listener once.
    fn publish(&self, runtimes: Vec<Runtime>) {
        let runtimes: Arc<[Runtime]> = Arc::from(runtimes);
        {
            let mut guard = self
                .runtimes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Arc::clone(&runtimes);
        }

        // Snapshot the listeners so callbacks may (un)register freely.
        let listeners: Vec<Arc<dyn RuntimeListener>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        debug!(count = runtimes.len(), listeners = listeners.len(), "publishing runtimes");
        for listener in listeners {
            listener.runtimes_updated(&runtimes);
        }
    }
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct WorkerSlot {
    active: Option<Worker>,
    // Worker told to stop but possibly still tearing down.
    stopping: Option<JoinHandle<()>>,
}

/// Polling-refreshed directory of runtimes.
///
/// Listener registration spawns onto the current tokio runtime.
pub struct RuntimeDirectory {
    config: BridgeConfig,
    server: Arc<ServerProcess>,
    forwarder: PortForwarder,
    shared: Arc<Shared>,
    next_listener: AtomicU64,
    worker: Mutex<WorkerSlot>,
}

impl RuntimeDirectory {
    pub fn new(config: BridgeConfig, server: Arc<ServerProcess>) -> Self {
        let forwarder = PortForwarder::new(CommandRunner::new(config.endpoint.clone()));
        Self {
            config,
            server,
            forwarder,
            shared: Arc::new(Shared::new()),
            next_listener: AtomicU64::new(1),
            worker: Mutex::new(WorkerSlot::default()),
        }
    }

    /// Server process this directory starts and stops.
    pub fn server(&self) -> &Arc<ServerProcess> {
        &self.server
    }

    /// Subscribe to runtime list updates.
    ///
    /// The first listener starts the reconciliation task.
    pub fn register_listener(&self, listener: impl RuntimeListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<dyn RuntimeListener> = Arc::new(listener);
        let mut slot = lock(&self.worker);

        let first = {
            let mut listeners = lock(&self.shared.listeners);
            listeners.push((id, listener));
            listeners.len() == 1
        };

        if first && slot.active.is_none() {
            let previous = slot.stopping.take();
            let (shutdown, shutdown_rx) = oneshot::channel();
            let reconciler = Reconciler::new(
                self.config.clone(),
                Arc::clone(&self.server),
                Arc::clone(&self.shared),
            );
            let task = tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                reconciler.run(shutdown_rx).await;
            });
            slot.active = Some(Worker { shutdown, task });
            info!("Runtime directory started");
        }
        id
    }

    /// Unsubscribe. Returns false if `id` was not registered.
    ///
    /// Removing the last listener stops the reconciliation task.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut slot = lock(&self.worker);

        let (removed, now_empty) = {
            let mut listeners = lock(&self.shared.listeners);
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            (listeners.len() != before, listeners.is_empty())
        };

        if removed && now_empty {
            if let Some(worker) = slot.active.take() {
                let _ = worker.shutdown.send(());
                slot.stopping = Some(worker.task);
                info!("Runtime directory stopping");
            }
        }
        removed
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }

    /// Whether the reconciliation task is running.
    pub fn is_active(&self) -> bool {
        lock(&self.worker).active.is_some()
    }

    /// The last published runtime list.
    pub fn runtimes(&self) -> Arc<[Runtime]> {
        self.shared.current()
    }

    /// Forward a local port to runtime `runtime_id` and return the address
    /// to connect to.
    pub async fn prepare_connection(&self, runtime_id: &str) -> Result<SocketAddr> {
        let runtime = self
            .runtimes()
            .iter()
            .find(|runtime| runtime.id == runtime_id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(runtime_id.to_string()))?;

        let port = self
            .forwarder
            .prepare(&runtime.device_id, &runtime.socket_path)
            .await?;
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    /// Drop every listener and wait for the reconciliation task to finish.
    pub async fn shutdown(&self) {
        let (active, stopping) = {
            let mut slot = lock(&self.worker);
            lock(&self.shared.listeners).clear();
            (slot.active.take(), slot.stopping.take())
        };

        if let Some(previous) = stopping {
            let _ = previous.await;
        }
        if let Some(worker) = active {
            let _ = worker.shutdown.send(());
            let _ = worker.task.await;
        }
        debug!("runtime directory shut down");
    }
}
