//! The reconciliation task behind [`RuntimeDirectory`](super::RuntimeDirectory).
//!
//! One task owns the registry, the tracker and all pending discovery work,
//! so device state is only ever touched from here. It reacts to three
//! sources: tracker events, completed discovery tasks, and a fixed-period
//! tick that restarts whatever has died and reruns discovery.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use dbridge_core::{BridgeConfig, Result};

use crate::discovery::{discover_sockets, query_model};
use crate::registry::DeviceRegistry;
use crate::server::ServerProcess;
use crate::shell::ShellExecutor;
use crate::tracker::{DeviceChange, DeviceTracker};

use super::Shared;

/// Result of a background discovery task.
enum TaskOutcome {
    Model {
        id: String,
        epoch: u64,
        result: Result<Option<String>>,
    },
    Pass(Vec<(String, u64, Result<Vec<String>>)>),
}

pub(super) struct Reconciler {
    config: BridgeConfig,
    server: Arc<ServerProcess>,
    shared: Arc<Shared>,
    shell: ShellExecutor,
    registry: DeviceRegistry,
    tracker: DeviceTracker,
    changes: mpsc::UnboundedReceiver<DeviceChange>,
    tasks: JoinSet<TaskOutcome>,
    // Task running the current discovery pass.
    pass_task: Option<Id>,
    pass_pending: bool,
}

impl Reconciler {
    pub(super) fn new(config: BridgeConfig, server: Arc<ServerProcess>, shared: Arc<Shared>) -> Self {
        let (tracker, changes) = DeviceTracker::new(config.endpoint.clone());
        let shell = ShellExecutor::new(config.endpoint.clone());
        Self {
            config,
            server,
            shared,
            shell,
            registry: DeviceRegistry::new(),
            tracker,
            changes,
            tasks: JoinSet::new(),
            pass_task: None,
            pass_pending: false,
        }
    }

    pub(super) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Fires on an explicit stop or when the directory is dropped.
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.on_tick().await,
                Some(change) = self.changes.recv() => self.on_change(change),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_task(joined);
                }
            }
        }

        self.teardown().await;
    }

    async fn on_tick(&mut self) {
        if !self.server.is_ready() || !self.tracker.is_running() {
            match self.server.start().await {
                Ok(outcome) => {
                    debug!(already_running = outcome.already_running, "bridge server ready");
                }
                Err(e) => {
                    warn!(error = %e, "bridge server unavailable");
                    return;
                }
            }
            self.tracker.start();
        }
        self.request_pass();
    }

    fn on_change(&mut self, change: DeviceChange) {
        match change {
            DeviceChange::Connected(id) => {
                info!(device = %id, "Device connected");
                let epoch = self.registry.insert(&id);
                let shell = self.shell.clone();
                self.tasks.spawn(async move {
                    let result = query_model(&shell, &id).await;
                    TaskOutcome::Model { id, epoch, result }
                });
            }
            DeviceChange::Disconnected(id) => {
                info!(device = %id, "Device disconnected");
                if self.registry.remove(&id).is_some() {
                    self.shared.publish(self.registry.runtimes());
                }
            }
        }
    }

    // Queue a discovery pass over every registered device. At most one
    // runs at a time; requests made meanwhile collapse into one rerun.
    fn request_pass(&mut self) {
        if self.pass_task.is_some() {
            self.pass_pending = true;
            return;
        }

        let targets = self.registry.discovery_targets();
        let shell = self.shell.clone();
        let marker = self.config.socket_marker.clone();
        let handle = self.tasks.spawn(async move {
            let results = join_all(targets.into_iter().map(|(id, epoch)| {
                let shell = shell.clone();
                let marker = marker.clone();
                async move {
                    let result = discover_sockets(&shell, &id, &marker).await;
                    (id, epoch, result)
                }
            }))
            .await;
            TaskOutcome::Pass(results)
        });
        self.pass_task = Some(handle.id());
    }

    fn on_task(&mut self, joined: std::result::Result<TaskOutcome, JoinError>) {
        match joined {
            Ok(TaskOutcome::Model { id, epoch, result }) => {
                match result {
                    Ok(Some(model)) => {
                        if self.registry.set_model(&id, epoch, model).is_err() {
                            debug!(device = %id, "dropping model of departed device");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(device = %id, error = %e, "model query failed"),
                }
                // Sockets are enumerated once the name is settled.
                if self.registry.contains(&id) {
                    self.request_pass();
                }
            }
            Ok(TaskOutcome::Pass(results)) => {
                for (id, epoch, result) in results {
                    let sockets = result.unwrap_or_else(|e| {
                        warn!(device = %id, error = %e, "socket discovery failed");
                        Vec::new()
                    });
                    if self.registry.set_sockets(&id, epoch, sockets).is_err() {
                        debug!(device = %id, "dropping sockets of departed device");
                    }
                }
                self.shared.publish(self.registry.runtimes());
                self.finish_pass();
            }
            Err(e) => {
                warn!(error = %e, "discovery task failed");
                if self.pass_task == Some(e.id()) {
                    self.finish_pass();
                }
            }
        }
    }

    fn finish_pass(&mut self) {
        self.pass_task = None;
        if std::mem::take(&mut self.pass_pending) {
            self.request_pass();
        }
    }

    async fn teardown(&mut self) {
        self.tracker.stop();
        self.tasks.shutdown().await;
        if let Err(e) = self.server.stop().await {
            warn!(error = %e, "failed to stop bridge server");
        }
        self.registry.clear();
        self.shared.publish(Vec::new());
        info!("Runtime directory stopped");
    }
}
