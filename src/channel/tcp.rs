//! # TCP Shadow Channel
//!
//! Minimal shadow transport: one JSON object per line in each direction.
//!
//! Request:
//!
//! ```text
//! {"token":"myShadowClient-1","thing":"RPi","client_id":"myShadowClient","document":{...}}
//! ```
//!
//! Response:
//!
//! ```text
//! {"token":"myShadowClient-1","status":"accepted"}
//! ```
//!
//! There is no offline request queue. Once the connection drops, every
//! `update` fails with `ChannelDisabled` until the worker owning the channel
//! is replaced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{
    delivery_slot, ChannelFactory, DeliveryCallback, DeliveryStatus, PendingDelivery,
    TelemetryChannel,
};
use crate::config::ShadowConfig;
use crate::error::{Result, UplinkError};
use crate::queue::payload::ShadowDocument;

#[derive(Debug, Serialize)]
struct ShadowRequest<'a> {
    token: &'a str,
    thing: &'a str,
    client_id: &'a str,
    document: &'a ShadowDocument,
}

#[derive(Debug, Deserialize)]
struct ShadowResponse {
    token: String,
    #[serde(default)]
    status: String,
}

/// An update waiting for its response
#[derive(Debug)]
struct InFlight {
    callback: DeliveryCallback,
    deadline: Instant,
}

/// Line-delimited JSON connection to a shadow endpoint
///
/// The channel spawns nothing: responses are read and operation timeouts
/// fire only while the owner is inside [`TelemetryChannel::wait`] or
/// [`TelemetryChannel::update`]. Dropping the channel closes the socket.
pub struct TcpShadowChannel {
    client_id: String,
    thing_name: String,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pending: HashMap<String, InFlight>,
    connected: bool,
    next_token: u64,
}

impl std::fmt::Debug for TcpShadowChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpShadowChannel")
            .field("client_id", &self.client_id)
            .field("thing_name", &self.thing_name)
            .field("connected", &self.connected)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl TcpShadowChannel {
    /// Connect to `config.endpoint` within `config.connect_timeout_s`
    ///
    /// # Errors
    ///
    /// Returns `Channel` if the endpoint is unreachable or the connect times out
    pub async fn connect(config: &ShadowConfig) -> Result<Self> {
        let stream = timeout(
            config.connect_timeout(),
            TcpStream::connect(config.endpoint.as_str()),
        )
        .await
        .map_err(|_| {
            UplinkError::Channel(format!(
                "Timed out connecting to {} after {:?}",
                config.endpoint,
                config.connect_timeout()
            ))
        })?
        .map_err(|e| {
            UplinkError::Channel(format!("Failed to connect to {}: {}", config.endpoint, e))
        })?;

        info!(
            "Shadow client {} connected to {} (thing {})",
            config.client_id, config.endpoint, config.thing_name
        );

        let (read_half, writer) = stream.into_split();
        Ok(Self {
            client_id: config.client_id.clone(),
            thing_name: config.thing_name.clone(),
            lines: BufReader::new(read_half).lines(),
            writer,
            pending: HashMap::new(),
            connected: true,
            next_token: 0,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Resolve a pending update from one response line
    fn handle_response(&mut self, line: &str) {
        let response: ShadowResponse = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => {
                warn!("Ignoring malformed shadow response '{}': {}", line, e);
                return;
            }
        };
        match self.pending.remove(&response.token) {
            Some(in_flight) => in_flight
                .callback
                .resolve(line, DeliveryStatus::from_wire(&response.status)),
            None => debug!("No pending update for token {}", response.token),
        }
    }

    /// Resolve every update whose operation timeout has passed
    fn expire_overdue(&mut self, now: Instant) {
        let overdue: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, in_flight)| in_flight.deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in overdue {
            if let Some(in_flight) = self.pending.remove(&token) {
                in_flight.callback.resolve("", DeliveryStatus::Timeout);
            }
        }
    }

    /// Mark the connection down; pending deliveries stay unresolved
    fn disconnect(&mut self) {
        self.connected = false;
        self.pending.clear();
    }

    /// Handle a read result; `false` once the connection is gone
    fn on_read(&mut self, read: std::io::Result<Option<String>>) -> bool {
        match read {
            Ok(Some(line)) => {
                self.handle_response(&line);
                true
            }
            Ok(None) => {
                warn!("Shadow endpoint closed the connection");
                self.disconnect();
                false
            }
            Err(e) => {
                warn!("Shadow connection read error: {}", e);
                self.disconnect();
                false
            }
        }
    }

    /// Consume responses that are already buffered, without waiting
    async fn drain_ready(&mut self) {
        while self.connected {
            match timeout(Duration::ZERO, self.lines.next_line()).await {
                Ok(read) => {
                    self.on_read(read);
                }
                Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl TelemetryChannel for TcpShadowChannel {
    async fn update(
        &mut self,
        document: &ShadowDocument,
        timeout: Duration,
    ) -> Result<PendingDelivery> {
        self.drain_ready().await;
        self.expire_overdue(Instant::now());
        if !self.connected {
            return Err(UplinkError::ChannelDisabled);
        }

        self.next_token += 1;
        let token = format!("{}-{}", self.client_id, self.next_token);
        let request = ShadowRequest {
            token: &token,
            thing: &self.thing_name,
            client_id: &self.client_id,
            document,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            warn!("Shadow connection lost while sending {}: {}", token, e);
            self.disconnect();
            return Err(UplinkError::ChannelDisabled);
        }
        debug!("Sent shadow update {} ({} bytes)", token, line.len());

        let (callback, delivery) = delivery_slot(token.clone());
        let deadline = Instant::now() + timeout;
        self.pending.insert(token, InFlight { callback, deadline });
        Ok(delivery)
    }

    async fn wait(&mut self, mut delivery: PendingDelivery, within: Duration) -> DeliveryStatus {
        let give_up = Instant::now() + within;
        loop {
            let now = Instant::now();
            self.expire_overdue(now);
            if let Some(status) = delivery.try_status() {
                return status;
            }
            let deadline = match self.pending.get(delivery.token()) {
                Some(in_flight) => in_flight.deadline.min(give_up),
                // Dropped on disconnect
                None => return DeliveryStatus::Unset,
            };
            if now >= give_up {
                return DeliveryStatus::Unset;
            }
            if let Ok(read) = timeout_at(deadline, self.lines.next_line()).await {
                self.on_read(read);
            }
        }
    }
}

/// Opens a new `TcpShadowChannel` for every worker
#[derive(Debug, Clone)]
pub struct TcpShadowFactory {
    config: ShadowConfig,
}

impl TcpShadowFactory {
    pub fn new(config: ShadowConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelFactory for TcpShadowFactory {
    async fn connect(&self) -> Result<Box<dyn TelemetryChannel>> {
        Ok(Box::new(TcpShadowChannel::connect(&self.config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::payload::UploadPayload;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn document() -> ShadowDocument {
        UploadPayload::from_body("1.txt", "1670000000", "1670000000 0 AA:BB:CC:DD:EE:FF")
            .unwrap()
            .into_document()
    }

    fn config_for(endpoint: String) -> ShadowConfig {
        ShadowConfig {
            endpoint,
            ..ShadowConfig::default()
        }
    }

    /// Fake endpoint answering every request with `status`
    async fn spawn_endpoint(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                assert_eq!(request["document"]["state"]["reported"]["timestamp"], "1670000000");
                let reply = serde_json::json!({ "token": request["token"], "status": status });
                let _ = write_half.write_all(format!("{}\n", reply).as_bytes()).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_update_accepted() {
        let addr = spawn_endpoint("accepted").await;
        let mut channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();

        let delivery = channel.update(&document(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(delivery.token(), "myShadowClient-1");
        let status = channel.wait(delivery, Duration::from_secs(5)).await;
        assert_eq!(status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn test_update_rejected() {
        let addr = spawn_endpoint("rejected").await;
        let mut channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();

        let delivery = channel.update(&document(), Duration::from_secs(5)).await.unwrap();
        let status = channel.wait(delivery, Duration::from_secs(5)).await;
        assert_eq!(status, DeliveryStatus::Rejected);
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let addr = spawn_endpoint("accepted").await;
        let mut channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();

        let first = channel.update(&document(), Duration::from_secs(5)).await.unwrap();
        let second = channel.update(&document(), Duration::from_secs(5)).await.unwrap();
        assert_ne!(first.token(), second.token());
    }

    #[tokio::test]
    async fn test_silent_endpoint_reports_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();
        let delivery = channel
            .update(&document(), Duration::from_millis(100))
            .await
            .unwrap();
        let status = channel.wait(delivery, Duration::from_secs(5)).await;
        assert_eq!(status, DeliveryStatus::Timeout);
    }

    #[tokio::test]
    async fn test_wait_gives_up_before_operation_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();
        let delivery = channel.update(&document(), Duration::from_secs(30)).await.unwrap();
        let status = channel.wait(delivery, Duration::from_millis(100)).await;
        assert_eq!(status, DeliveryStatus::Unset);
    }

    #[tokio::test]
    async fn test_closed_connection_disables_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The close is noticed either before sending or while waiting
        match channel.update(&document(), Duration::from_secs(5)).await {
            Ok(delivery) => {
                let status = channel.wait(delivery, Duration::from_secs(5)).await;
                assert_eq!(status, DeliveryStatus::Unset);
            }
            Err(UplinkError::ChannelDisabled) => {}
            Err(e) => panic!("Expected ChannelDisabled, got: {:?}", e),
        }
        assert!(!channel.is_connected());

        match channel.update(&document(), Duration::from_secs(5)).await {
            Err(UplinkError::ChannelDisabled) => {}
            other => panic!("Expected ChannelDisabled, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf)).await
        });

        let channel = TcpShadowChannel::connect(&config_for(addr)).await.unwrap();
        drop(channel);

        let read = server.await.unwrap().expect("socket still open after drop");
        assert_eq!(read.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match TcpShadowChannel::connect(&config_for(addr)).await {
            Err(UplinkError::Channel(msg)) => assert!(msg.contains("Failed to connect")),
            other => panic!("Expected Channel error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_factory_connects() {
        let addr = spawn_endpoint("accepted").await;
        let factory = TcpShadowFactory::new(config_for(addr));
        let mut channel = factory.connect().await.unwrap();
        let delivery = channel.update(&document(), Duration::from_secs(5)).await.unwrap();
        let status = channel.wait(delivery, Duration::from_secs(5)).await;
        assert_eq!(status, DeliveryStatus::Accepted);
    }
}
