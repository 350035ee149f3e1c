//! Background driver for the connectivity state machine.
//!
//! The monitor runs as one task. It debounces reconnects, starts a sync
//! task when the machine asks for one, and cancels that task's token when
//! the connection drops. The in-flight attempt is never killed: the sync
//! loop notices the cancellation once the attempt returns.
//!
//! An aborted run keeps the queue's sync slot until that attempt returns.
//! A reconnect in the meantime waits for the aborted run to drain before
//! starting a new one, so the machine only reaches `OnlineIdle` after a run
//! that actually walked the queue.

use super::{ConnectionState, ConnectivityEvent, MonitorAction, StateMachine};
use crate::error::{Error, Result};
use crate::notify::QueueEvent;
use crate::queue::QueueService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Smallest interval between lazy purges of completed records.
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// Pause before re-issuing a sync that found another run holding the slot.
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Control surface for a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    events: mpsc::Sender<ConnectivityEvent>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Feed an event to the monitor.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor has stopped.
    pub async fn send(&self, event: ConnectivityEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Error::Other("connectivity monitor has stopped".into()))
    }

    /// A sender for event sources such as the probe sampler.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<ConnectivityEvent> {
        self.events.clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Token cancelled when the monitor shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the monitor, aborting any running sync, and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connectivity monitor task failed");
        }
    }
}

struct RunningSync {
    generation: u64,
    token: CancellationToken,
}

/// Sent by a sync task when `QueueService::sync` returns.
#[derive(Debug, Clone, Copy)]
struct SyncDone {
    generation: u64,
    /// Another run held the sync slot; nothing was replayed
    already_running: bool,
}

pub struct ConnectivityMonitor {
    service: Arc<QueueService>,
    machine: StateMachine,
    debounce: Duration,
    state_tx: watch::Sender<ConnectionState>,
    done_tx: mpsc::UnboundedSender<SyncDone>,
    sync: Option<RunningSync>,
    /// Aborted runs still waiting on their in-flight attempt
    draining: Vec<u64>,
    /// A sync was requested while `draining` was non-empty
    start_queued: bool,
    restart_at: Option<Instant>,
    generation: u64,
}

impl ConnectivityMonitor {
    /// Start monitoring on the current tokio runtime.
    ///
    /// The monitor starts `Offline`; send `Online` (or attach a sampler) to
    /// begin syncing.
    #[must_use]
    pub fn spawn(service: Arc<QueueService>) -> MonitorHandle {
        let settings = service.settings();
        let machine = StateMachine::new(settings.sync_policy());
        let debounce = settings.debounce();
        let purge_every = settings.completed_grace().max(MIN_PURGE_INTERVAL);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Offline);
        let shutdown = CancellationToken::new();

        let monitor = Self {
            service,
            machine,
            debounce,
            state_tx,
            done_tx,
            sync: None,
            draining: Vec::new(),
            start_queued: false,
            restart_at: None,
            generation: 0,
        };
        let task = tokio::spawn(monitor.run(events_rx, done_rx, purge_every, shutdown.clone()));

        MonitorHandle {
            events: events_tx,
            state: state_rx,
            shutdown,
            task,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<ConnectivityEvent>,
        mut done: mpsc::UnboundedReceiver<SyncDone>,
        purge_every: Duration,
        shutdown: CancellationToken,
    ) {
        let mut settle_at: Option<Instant> = None;
        let mut purge = tokio::time::interval(purge_every);
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = wait_until(settle_at) => {
                    settle_at = None;
                    debug!("Connection settled");
                    self.handle(ConnectivityEvent::Online);
                }
                () = wait_until(self.restart_at) => {
                    self.restart_at = None;
                    if self.machine.state() == ConnectionState::OnlineSyncing {
                        self.start_sync();
                    }
                }
                Some(finished) = done.recv() => self.finished(finished),
                _ = purge.tick() => self.purge(),
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        ConnectivityEvent::Online if self.machine.state() == ConnectionState::Offline => {
                            if settle_at.is_none() {
                                debug!(debounce_ms = u64::try_from(self.debounce.as_millis()).unwrap_or(u64::MAX), "Online, waiting to settle");
                                settle_at = Some(Instant::now() + self.debounce);
                            }
                        }
                        ConnectivityEvent::Offline => {
                            if settle_at.take().is_some() {
                                debug!("Connection dropped while settling");
                            }
                            self.handle(event);
                        }
                        event => self.handle(event),
                    }
                }
            }
        }

        self.abort_sync();
        debug!("Connectivity monitor stopped");
    }

    fn handle(&mut self, event: ConnectivityEvent) {
        let before = self.machine.state();
        match self.machine.apply(event) {
            MonitorAction::StartSync => self.start_sync(),
            MonitorAction::AbortSync => self.abort_sync(),
            MonitorAction::NoOp => {}
        }

        let after = self.machine.state();
        if before != after {
            info!(from = %before, to = %after, "Connectivity changed");
            self.state_tx.send_replace(after);
            self.service
                .notifier()
                .emit(QueueEvent::Connectivity { state: after });
        }
    }

    fn finished(&mut self, done: SyncDone) {
        if let Some(pos) = self.draining.iter().position(|g| *g == done.generation) {
            self.draining.swap_remove(pos);
            debug!(generation = done.generation, "Aborted sync drained");
            if self.draining.is_empty() && self.start_queued {
                self.start_queued = false;
                self.start_sync();
            }
            return;
        }

        if !self.sync.as_ref().is_some_and(|s| s.generation == done.generation) {
            return;
        }
        self.sync = None;

        if done.already_running {
            debug!("Sync slot busy, retrying shortly");
            self.restart_at = Some(Instant::now() + RESTART_DELAY);
        } else {
            self.handle(ConnectivityEvent::SyncFinished);
        }
    }

    fn start_sync(&mut self) {
        if !self.draining.is_empty() {
            debug!(draining = self.draining.len(), "Waiting for aborted sync to stop");
            self.start_queued = true;
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();

        let service = Arc::clone(&self.service);
        let done = self.done_tx.clone();
        let run_token = token.clone();
        tokio::spawn(async move {
            let already_running = match service.sync(&run_token).await {
                Ok(report) => {
                    debug!(?report, "Sync task finished");
                    report.already_running
                }
                Err(e) => {
                    error!(error = %e, "Sync task failed");
                    false
                }
            };
            let _ = done.send(SyncDone {
                generation,
                already_running,
            });
        });

        self.sync = Some(RunningSync { generation, token });
    }

    fn abort_sync(&mut self) {
        self.start_queued = false;
        self.restart_at = None;
        if let Some(sync) = self.sync.take() {
            info!("Aborting sync, connection lost");
            sync.token.cancel();
            self.draining.push(sync.generation);
        }
    }

    fn purge(&self) {
        match self.service.purge_expired() {
            Ok(0) | Err(Error::StorageUnavailable { .. }) => {}
            Ok(n) => debug!(purged = n, "Purged completed operations"),
            Err(e) => warn!(error = %e, "Failed to purge completed operations"),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
