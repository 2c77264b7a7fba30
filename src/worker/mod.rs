//! # Upload Worker Module
//!
//! Drains the record queue through a telemetry channel.
//!
//! Each scan:
//! 1. Snapshots the queue
//! 2. Submits every record, one at a time, as a shadow update
//! 3. Waits up to the cooldown for the update to resolve, and never submits
//!    twice within one cooldown
//! 4. Deletes the record only if the update was accepted
//!
//! then sleeps for the scan period. Anything other than `accepted` leaves the
//! file in place for the next scan (at-least-once delivery).
//!
//! The worker runs in its own task behind a [`WorkerHandle`]. Errors and
//! panics end that task only; the supervisor finds out when it next polls.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelFactory, DeliveryStatus, TelemetryChannel};
use crate::config::Config;
use crate::error::{Result, UplinkError};
use crate::queue::payload::UploadPayload;
use crate::queue::{PendingRecord, RecordQueue};

/// Worker pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Sleep between scans
    pub scan_period: Duration,
    /// Minimum spacing between submissions, and how long to wait for a status
    pub cooldown: Duration,
    /// Timeout handed to the channel with every update
    pub operation_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan_period: config.uploader.scan_period(),
            cooldown: config.uploader.cooldown(),
            operation_timeout: config.shadow.operation_timeout(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What happened to one record during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Accepted and removed from the queue
    Uploaded,
    /// Left in the queue; carries the last observed status
    Retained(DeliveryStatus),
    /// Removed by someone else between listing and reading
    Vanished,
}

/// Totals for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub uploaded: usize,
    pub retained: usize,
}

/// Drain loop over one queue, owning one channel
pub struct UploadWorker {
    queue: RecordQueue,
    channel: Box<dyn TelemetryChannel>,
    settings: WorkerSettings,
}

impl UploadWorker {
    pub fn new(
        queue: RecordQueue,
        channel: Box<dyn TelemetryChannel>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            channel,
            settings,
        }
    }

    /// Run scans forever
    ///
    /// # Errors
    ///
    /// Only returns on a fatal error: the queue cannot be listed, a record
    /// could not be deleted, or a record is malformed (`DataFormat`, or
    /// `Encoding` for a body that is not UTF-8).
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Upload worker started on {} (scan every {:?})",
            self.queue.dir().display(),
            self.settings.scan_period
        );
        loop {
            if let Err(e) = self.drain_once().await {
                if e.is_data_format() {
                    error!("FATAL: malformed record in queue, uploading halted: {}", e);
                } else {
                    error!("Upload worker failed: {}", e);
                }
                return Err(e);
            }
            sleep(self.settings.scan_period).await;
        }
    }

    /// Process one snapshot of the queue
    pub async fn drain_once(&mut self) -> Result<ScanReport> {
        let snapshot = self.queue.scan()?;
        let mut report = ScanReport::default();

        for record in &snapshot {
            match self.upload_record(record).await? {
                RecordOutcome::Uploaded => report.uploaded += 1,
                RecordOutcome::Retained(_) => report.retained += 1,
                RecordOutcome::Vanished => {}
            }
        }

        if !snapshot.is_empty() {
            info!(
                "Scan complete: {} uploaded, {} kept for retry",
                report.uploaded, report.retained
            );
        }
        Ok(report)
    }

    /// Submit one record and delete it iff the update is accepted
    pub async fn upload_record(&mut self, record: &PendingRecord) -> Result<RecordOutcome> {
        let payload = match UploadPayload::build(record) {
            Ok(payload) => payload,
            Err(UplinkError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} disappeared before upload", record.source_path().display());
                return Ok(RecordOutcome::Vanished);
            }
            Err(UplinkError::Io(e)) => {
                error!("Cannot read {}: {}", record.source_path().display(), e);
                return Ok(RecordOutcome::Retained(DeliveryStatus::Unset));
            }
            Err(e) => return Err(e),
        };
        let document = payload.into_document();

        let submitted_at = Instant::now();
        let status = match self
            .channel
            .update(&document, self.settings.operation_timeout)
            .await
        {
            Ok(delivery) => self.channel.wait(delivery, self.settings.cooldown).await,
            Err(UplinkError::ChannelDisabled) => {
                error!(
                    "Offline request queue disabled for shadow client; {} kept for retry",
                    record.record_timestamp()
                );
                DeliveryStatus::Unset
            }
            Err(e) => {
                error!("Shadow update for {} failed: {}", record.record_timestamp(), e);
                DeliveryStatus::Unset
            }
        };

        // Rate limit: at most one submission per cooldown
        sleep_until(submitted_at + self.settings.cooldown).await;

        if status.is_accepted() {
            self.queue.remove(record)?;
            debug!("Uploaded and removed {}", record.source_path().display());
            Ok(RecordOutcome::Uploaded)
        } else {
            warn!(
                "Shadow update for {} not accepted (status: {}); kept for retry",
                record.record_timestamp(),
                status
            );
            Ok(RecordOutcome::Retained(status))
        }
    }
}

/// How a worker task ended
#[derive(Debug)]
pub enum WorkerExit {
    /// Aborted by the supervisor
    Killed,
    /// Returned an error (including failing to open its channel)
    Failed(UplinkError),
    /// Panicked
    Panicked(String),
    /// Returned normally
    Completed,
}

impl WorkerExit {
    pub fn is_data_format(&self) -> bool {
        matches!(self, WorkerExit::Failed(e) if e.is_data_format())
    }
}

/// Supervisor-side handle to a running worker task
#[derive(Debug)]
pub struct WorkerHandle {
    id: u64,
    task: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Spawn a worker that opens its own channel from `factory`
    pub fn spawn(
        id: u64,
        queue: RecordQueue,
        factory: Arc<dyn ChannelFactory>,
        settings: WorkerSettings,
    ) -> Self {
        let task = tokio::spawn(async move {
            let channel = factory.connect().await?;
            UploadWorker::new(queue, channel, settings).run().await
        });
        Self { id, task }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Abort the worker and wait until its task is gone
    ///
    /// When this returns the worker's future, and with it the channel, has
    /// been dropped. A worker that already finished reports how it ended.
    pub async fn terminate(self) -> WorkerExit {
        self.task.abort();
        match self.task.await {
            Ok(Ok(())) => WorkerExit::Completed,
            Ok(Err(e)) => WorkerExit::Failed(e),
            Err(e) if e.is_cancelled() => WorkerExit::Killed,
            Err(e) => WorkerExit::Panicked(e.to_string()),
        }
    }
}
