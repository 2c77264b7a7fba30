//! # Upload Supervisor Module
//!
//! Starts and stops the upload worker as connectivity comes and goes.
//!
//! ## States
//!
//! | State       | Probe       | Action                                  | Next        |
//! |-------------|-------------|-----------------------------------------|-------------|
//! | `Idle`      | reachable   | spawn a worker                          | `Uploading` |
//! | `Idle`      | unreachable | warn, keep waiting                      | `Idle`      |
//! | `Uploading` | reachable   | nothing                                 | `Uploading` |
//! | `Uploading` | unreachable | abort the worker and wait until it ends | `Idle`      |
//!
//! The supervisor always waits for the previous worker to be gone before it
//! spawns another one or returns, so at most one worker (and one channel) is
//! alive at any time.
//!
//! A worker that dies on its own is reaped and logged but not restarted while
//! the network stays up. The next offline/online cycle starts a fresh one.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::ChannelFactory;
use crate::config::Config;
use crate::connectivity::{ConnectivityProbe, ConnectivityState};
use crate::queue::RecordQueue;
use crate::worker::{WorkerExit, WorkerHandle, WorkerSettings};

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Uploading,
}

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Connectivity came up; a worker was spawned
    Started,
    /// Connectivity went down; the worker was terminated
    Stopped,
    /// Still online; the worker (if any) keeps running
    StillOnline,
    /// Still offline; nothing to do
    StillOffline,
}

/// Owns the probe, the channel factory and the single worker handle
pub struct UploadSupervisor<P: ConnectivityProbe> {
    probe: P,
    factory: Arc<dyn ChannelFactory>,
    queue: RecordQueue,
    settings: WorkerSettings,
    poll_interval: Duration,
    state: SupervisorState,
    worker: Option<WorkerHandle>,
    next_worker_id: u64,
}

impl<P: ConnectivityProbe> UploadSupervisor<P> {
    pub fn new(
        probe: P,
        factory: Arc<dyn ChannelFactory>,
        queue: RecordQueue,
        settings: WorkerSettings,
        poll_interval: Duration,
    ) -> Self {
        Self {
            probe,
            factory,
            queue,
            settings,
            poll_interval,
            state: SupervisorState::Idle,
            worker: None,
            next_worker_id: 0,
        }
    }

    /// Build a supervisor from the loaded configuration
    pub fn from_config(probe: P, factory: Arc<dyn ChannelFactory>, config: &Config) -> Self {
        Self::new(
            probe,
            factory,
            RecordQueue::from_config(&config.queue),
            WorkerSettings::from_config(config),
            config.supervisor.poll_interval(),
        )
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Whether a worker task is currently running
    pub fn worker_alive(&self) -> bool {
        self.worker.as_ref().map_or(false, WorkerHandle::is_alive)
    }

    /// Probe once and apply the resulting transition
    pub async fn tick(&mut self) -> TickOutcome {
        let reachable = self.probe.probe().await;
        self.apply(ConnectivityState::from_reachable(reachable)).await
    }

    /// Apply one probe result to the state machine
    pub async fn apply(&mut self, connectivity: ConnectivityState) -> TickOutcome {
        match (self.state, connectivity) {
            (SupervisorState::Idle, ConnectivityState::Online) => {
                info!("Internet connection {}. Starting upload worker.", connectivity);
                self.spawn_worker();
                self.state = SupervisorState::Uploading;
                TickOutcome::Started
            }
            (SupervisorState::Uploading, ConnectivityState::Offline) => {
                self.stop_worker().await;
                info!("Internet connection is {}. Uploading terminated.", connectivity);
                self.state = SupervisorState::Idle;
                TickOutcome::Stopped
            }
            (SupervisorState::Uploading, ConnectivityState::Online) => {
                self.reap_exited_worker().await;
                TickOutcome::StillOnline
            }
            (SupervisorState::Idle, ConnectivityState::Offline) => {
                warn!(
                    "Internet connection is still {}. Retry in {} seconds.",
                    connectivity,
                    self.poll_interval.as_secs()
                );
                TickOutcome::StillOffline
            }
        }
    }

    /// Poll until `shutdown` is cancelled, then terminate the worker
    ///
    /// Returns only after any running worker has been confirmed gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Upload supervisor polling connectivity every {:?}",
            self.poll_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A probe may take its full timeout; don't make shutdown wait for it
            let reachable = tokio::select! {
                _ = shutdown.cancelled() => break,
                reachable = self.probe.probe() => reachable,
            };
            self.apply(ConnectivityState::from_reachable(reachable)).await;
        }

        self.shutdown().await;
    }

    /// Terminate the worker, if any, and go back to `Idle`
    pub async fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let was_alive = worker.is_alive();
            let exit = worker.terminate().await;
            if was_alive {
                info!("Uploading ends due to parent process terminated.");
            } else {
                log_unexpected_exit(&exit);
            }
        }
        self.state = SupervisorState::Idle;
        info!("Upload supervisor stopped");
    }

    fn spawn_worker(&mut self) {
        debug_assert!(self.worker.is_none(), "previous worker not terminated");
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        self.worker = Some(WorkerHandle::spawn(
            id,
            self.queue.clone(),
            self.factory.clone(),
            self.settings,
        ));
    }

    async fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let id = worker.id();
            match worker.terminate().await {
                WorkerExit::Killed => info!("Upload worker {} terminated", id),
                exit => log_unexpected_exit(&exit),
            }
        }
    }

    async fn reap_exited_worker(&mut self) {
        let exited = self.worker.as_ref().map_or(false, |worker| !worker.is_alive());
        if !exited {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let id = worker.id();
            let exit = worker.terminate().await;
            log_unexpected_exit(&exit);
            error!(
                "Upload worker {} is not running; uploads suspended until the next reconnect",
                id
            );
        }
    }
}

fn log_unexpected_exit(exit: &WorkerExit) {
    match exit {
        WorkerExit::Failed(e) if e.is_data_format() => error!(
            "FATAL: upload worker stopped on malformed queue data, operator action required: {}",
            e
        ),
        WorkerExit::Failed(e) => error!("Upload worker exited with error: {}", e),
        WorkerExit::Panicked(msg) => error!("Upload worker panicked: {}", msg),
        WorkerExit::Completed => warn!("Upload worker exited"),
        WorkerExit::Killed => {}
    }
}
