//! The poll loop and the handle consumers use to talk to it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{ControlError, SourceError};
use crate::reconcile::ControlAction;
use crate::source::{SnapshotSource, StartRequest};
use crate::state::TransferSnapshot;
use crate::store::{CycleReport, StoreView, TransferStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedCommand {
    transfer_id: u64,
    action: ControlAction,
    issued_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Snapshots were merged and a new view published.
    Merged(CycleReport),
    /// The fetch failed or timed out; the store is unchanged.
    NoData,
    /// Cancelled while fetching; the store is unchanged.
    Cancelled,
}

fn now() -> Instant {
    // tokio's clock, so paused-time tests drive the estimator too.
    time::Instant::now().into_std()
}

/// Owns the store. Only this task mutates it.
pub struct Engine<S> {
    source: Arc<S>,
    store: TransferStore,
    config: EngineConfig,
    commands: mpsc::UnboundedReceiver<QueuedCommand>,
    views: watch::Sender<Arc<StoreView>>,
    cancel: CancellationToken,
}

impl<S: SnapshotSource> Engine<S> {
    pub fn new(source: S, config: EngineConfig) -> (Self, EngineHandle<S>) {
        let source = Arc::new(source);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(Arc::new(StoreView::default()));
        let cancel = CancellationToken::new();

        let engine = Self {
            source: source.clone(),
            store: TransferStore::new(&config),
            config,
            commands: command_rx,
            views: view_tx,
            cancel: cancel.clone(),
        };
        let handle = EngineHandle {
            source,
            commands: command_tx,
            views: view_rx,
            cancel,
        };
        (engine, handle)
    }

    /// Polls until cancelled. Commands arriving between cycles are applied and
    /// published right away; commands arriving during a fetch wait for it.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.config.poll_interval_ms,
            server = %self.config.server,
            "polling started"
        );
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(command) = self.commands.recv() => self.apply_command(command),
                _ = ticker.tick() => {
                    if self.poll_once().await == PollOutcome::Cancelled {
                        break;
                    }
                }
            }
        }
        info!(cycles = self.store.cycle(), "polling stopped");
    }

    /// Runs one full cycle: queued commands, fetch, merge, publish.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.drain_commands();

        let timeout = self.config.fetch_timeout();
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return PollOutcome::Cancelled,
            result = time::timeout(timeout, self.source.fetch_all()) => result,
        };
        let fetched = fetched.unwrap_or(Err(SourceError::Timeout(self.config.fetch_timeout_ms)));

        match fetched {
            Ok(snapshots) => {
                let report = self.store.apply_cycle(&snapshots, now());
                self.publish();
                PollOutcome::Merged(report)
            }
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed, keeping last known state");
                PollOutcome::NoData
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: QueuedCommand) {
        match self.store.issue(command.transfer_id, command.action, command.issued_at) {
            Ok(_) => self.publish(),
            Err(e) => warn!(
                transfer_id = command.transfer_id,
                action = %command.action,
                error = %e,
                "command rejected"
            ),
        }
    }

    fn publish(&self) {
        self.views.send_replace(Arc::new(self.store.view()));
    }

    pub fn store(&self) -> &TransferStore {
        &self.store
    }
}

/// Cloneable access to a running engine.
pub struct EngineHandle<S> {
    source: Arc<S>,
    commands: mpsc::UnboundedSender<QueuedCommand>,
    views: watch::Receiver<Arc<StoreView>>,
    cancel: CancellationToken,
}

impl<S> Clone for EngineHandle<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            commands: self.commands.clone(),
            views: self.views.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: SnapshotSource> EngineHandle<S> {
    /// The latest complete view.
    pub fn view(&self) -> Arc<StoreView> {
        self.views.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreView>> {
        self.views.clone()
    }

    /// Waits until at least `cycle` poll cycles have been merged.
    pub async fn wait_for_cycle(&self, cycle: u64) -> Result<Arc<StoreView>, ControlError> {
        let mut views = self.views.clone();
        let view = views
            .wait_for(|view| view.cycle >= cycle)
            .await
            .map_err(|_| ControlError::EngineStopped)?;
        Ok(view.clone())
    }

    pub async fn pause(&self, transfer_id: u64) -> Result<(), ControlError> {
        self.command(transfer_id, ControlAction::Pause).await
    }

    pub async fn resume(&self, transfer_id: u64) -> Result<(), ControlError> {
        self.command(transfer_id, ControlAction::Resume).await
    }

    /// Queues the optimistic overlay, then tells the backend. A delivery
    /// failure is returned to the caller; the overlay expires on its own.
    async fn command(&self, transfer_id: u64, action: ControlAction) -> Result<(), ControlError> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::EngineStopped);
        }
        self.commands
            .send(QueuedCommand {
                transfer_id,
                action,
                issued_at: now(),
            })
            .map_err(|_| ControlError::EngineStopped)?;

        match action {
            ControlAction::Pause => self.source.pause(transfer_id).await?,
            ControlAction::Resume => self.source.resume(transfer_id).await?,
        }
        Ok(())
    }

    /// Starts a transfer on the backend. It shows up in the view once a poll
    /// reports it.
    pub async fn start(&self, request: &StartRequest) -> Result<TransferSnapshot, ControlError> {
        Ok(self.source.start(request).await?)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
