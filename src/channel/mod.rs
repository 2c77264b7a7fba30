//! # Telemetry Channel Module
//!
//! Boundary to the device-shadow endpoint.
//!
//! This module handles:
//! - The `TelemetryChannel` and `ChannelFactory` abstractions
//! - `DeliveryStatus`, the per-update outcome reported by the endpoint
//! - `PendingDelivery`, a single-slot rendezvous the worker waits on with a
//!   bounded timeout instead of polling shared callback state
//!
//! A channel is owned by exactly one worker for that worker's whole life and
//! is dropped with it. Every new worker asks the factory for a fresh one.

pub mod tcp;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::info;

use crate::error::Result;
use crate::queue::payload::ShadowDocument;

/// Outcome of one shadow update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryStatus {
    /// Never resolved, or resolved with an empty/unknown status
    #[default]
    Unset,
    Accepted,
    Rejected,
    Timeout,
}

impl DeliveryStatus {
    /// Parse the status string reported by the endpoint
    ///
    /// # Examples
    ///
    /// ```
    /// use shadow_uplink::channel::DeliveryStatus;
    ///
    /// assert_eq!(DeliveryStatus::from_wire("accepted"), DeliveryStatus::Accepted);
    /// assert_eq!(DeliveryStatus::from_wire(""), DeliveryStatus::Unset);
    /// ```
    pub fn from_wire(status: &str) -> Self {
        match status {
            "accepted" => DeliveryStatus::Accepted,
            "rejected" => DeliveryStatus::Rejected,
            "timeout" => DeliveryStatus::Timeout,
            _ => DeliveryStatus::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Unset => "",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::Rejected => "rejected",
            DeliveryStatus::Timeout => "timeout",
        }
    }

    pub fn is_accepted(&self) -> bool {
        *self == DeliveryStatus::Accepted
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Unset => write!(f, "unset"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Creates a linked callback/receiver pair for one update identified by `token`
pub fn delivery_slot(token: impl Into<String>) -> (DeliveryCallback, PendingDelivery) {
    let token = token.into();
    let (tx, rx) = oneshot::channel();
    (
        DeliveryCallback {
            token: token.clone(),
            tx,
        },
        PendingDelivery { token, rx },
    )
}

/// Channel-side half of a delivery slot; resolving consumes it
#[derive(Debug)]
pub struct DeliveryCallback {
    token: String,
    tx: oneshot::Sender<DeliveryStatus>,
}

impl DeliveryCallback {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Report the outcome of the update
    ///
    /// A worker that stopped waiting has dropped its receiver; that is not an
    /// error.
    pub fn resolve(self, payload: &str, status: DeliveryStatus) {
        info!(
            token = %self.token,
            status = %status,
            "Shadow update resolved: payload = {}",
            payload
        );
        let _ = self.tx.send(status);
    }
}

/// Worker-side half of a delivery slot
#[derive(Debug)]
pub struct PendingDelivery {
    token: String,
    rx: oneshot::Receiver<DeliveryStatus>,
}

impl PendingDelivery {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait up to `within` for the update to resolve
    ///
    /// Returns `Unset` if nothing arrived in time or the channel dropped the
    /// callback without resolving it.
    pub async fn wait(self, within: Duration) -> DeliveryStatus {
        match timeout(within, self.rx).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) | Err(_) => DeliveryStatus::Unset,
        }
    }

    /// The status, if the update has already been resolved
    pub fn try_status(&mut self) -> Option<DeliveryStatus> {
        self.rx.try_recv().ok()
    }
}

/// Authenticated, long-lived connection to the device shadow
#[async_trait]
pub trait TelemetryChannel: Send {
    /// Submit `document` as one shadow update
    ///
    /// `timeout` bounds how long the endpoint may take before the update is
    /// reported as `Timeout`.
    ///
    /// # Errors
    ///
    /// - `ChannelDisabled` if the connection is down and updates cannot be
    ///   buffered
    /// - `Channel` / `Json` for other immediate submission failures
    async fn update(
        &mut self,
        document: &ShadowDocument,
        timeout: Duration,
    ) -> Result<PendingDelivery>;

    /// Wait up to `within` for `delivery` to resolve
    ///
    /// Channels that only make progress while polled (no background tasks)
    /// override this to drive their connection while waiting.
    async fn wait(&mut self, delivery: PendingDelivery, within: Duration) -> DeliveryStatus {
        delivery.wait(within).await
    }
}

/// Opens a fresh `TelemetryChannel` for each worker
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TelemetryChannel>>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::UplinkError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Scripted answer to one `update` call
    #[derive(Debug, Clone, Copy)]
    pub enum MockReply {
        /// Resolve the delivery immediately with this status
        Resolve(DeliveryStatus),
        /// Accept the submission but never resolve it
        Silent,
        /// Fail the submission with `ChannelDisabled`
        Disabled,
    }

    /// Lifecycle events recorded by the mock factory
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChannelEvent {
        Opened(u64),
        Closed(u64),
    }

    /// State shared between the factory, its channels and the test
    #[derive(Default)]
    pub struct MockShared {
        pub script: Mutex<VecDeque<MockReply>>,
        pub submitted: Mutex<Vec<ShadowDocument>>,
        pub events: Mutex<Vec<(ChannelEvent, Instant)>>,
        pub live: AtomicUsize,
        pub max_live: AtomicUsize,
        pub next_id: AtomicU64,
        pub fail_connect: Mutex<bool>,
    }

    /// Channel factory handing out scripted mock channels
    #[derive(Clone, Default)]
    pub struct MockChannelFactory {
        pub shared: Arc<MockShared>,
    }

    impl MockChannelFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue replies consumed in order by all channels; once exhausted,
        /// every update is accepted.
        pub fn with_script(replies: impl IntoIterator<Item = MockReply>) -> Self {
            let factory = Self::new();
            factory.shared.script.lock().unwrap().extend(replies);
            factory
        }

        pub fn set_fail_connect(&self, fail: bool) {
            *self.shared.fail_connect.lock().unwrap() = fail;
        }

        pub fn submitted(&self) -> Vec<ShadowDocument> {
            self.shared.submitted.lock().unwrap().clone()
        }

        pub fn events(&self) -> Vec<(ChannelEvent, Instant)> {
            self.shared.events.lock().unwrap().clone()
        }

        pub fn live(&self) -> usize {
            self.shared.live.load(Ordering::SeqCst)
        }

        pub fn max_live(&self) -> usize {
            self.shared.max_live.load(Ordering::SeqCst)
        }

        pub fn opened(&self) -> usize {
            self.events()
                .iter()
                .filter(|(event, _)| matches!(event, ChannelEvent::Opened(_)))
                .count()
        }

        pub fn open_channel(&self) -> MockChannel {
            let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
            let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.max_live.fetch_max(live, Ordering::SeqCst);
            self.shared
                .events
                .lock()
                .unwrap()
                .push((ChannelEvent::Opened(id), Instant::now()));
            MockChannel {
                id,
                shared: self.shared.clone(),
                silent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ChannelFactory for MockChannelFactory {
        async fn connect(&self) -> Result<Box<dyn TelemetryChannel>> {
            if *self.shared.fail_connect.lock().unwrap() {
                return Err(UplinkError::Channel("Mock connect error".into()));
            }
            Ok(Box::new(self.open_channel()))
        }
    }

    /// Mock channel answering updates from the shared script
    pub struct MockChannel {
        id: u64,
        shared: Arc<MockShared>,
        silent: Vec<DeliveryCallback>,
    }

    #[async_trait]
    impl TelemetryChannel for MockChannel {
        async fn update(
            &mut self,
            document: &ShadowDocument,
            _timeout: Duration,
        ) -> Result<PendingDelivery> {
            let reply = self
                .shared
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MockReply::Resolve(DeliveryStatus::Accepted));

            if let MockReply::Disabled = reply {
                return Err(UplinkError::ChannelDisabled);
            }

            self.shared.submitted.lock().unwrap().push(document.clone());
            let (callback, pending) = delivery_slot(document.timestamp());
            match reply {
                MockReply::Resolve(status) => callback.resolve("{}", status),
                MockReply::Silent => self.silent.push(callback),
                MockReply::Disabled => unreachable!(),
            }
            Ok(pending)
        }
    }

    impl Drop for MockChannel {
        fn drop(&mut self) {
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
            self.shared
                .events
                .lock()
                .unwrap()
                .push((ChannelEvent::Closed(self.id), Instant::now()));
        }
    }
}
