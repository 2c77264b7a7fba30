//! # Connectivity Module
//!
//! Answers one question: is the network reachable right now?
//!
//! This module handles:
//! - The `ConnectivityProbe` abstraction the supervisor polls
//! - `HttpHeadProbe`, which issues a single `HEAD /` to a well-known host
//! - Folding every failure (DNS, refusal, timeout, I/O) into "offline"

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ConnectivityConfig;

#[cfg(test)]
use mockall::automock;

/// Result of one connectivity probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "ON"),
            ConnectivityState::Offline => write!(f, "DOWN"),
        }
    }
}

/// Reachability check
///
/// Implementations never fail: any error means "unreachable". Retries are the
/// caller's business.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe that sends `HEAD / HTTP/1.1` to a fixed host and waits for any reply
#[derive(Debug, Clone)]
pub struct HttpHeadProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HttpHeadProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.timeout())
    }

    async fn head_request(&self) -> std::io::Result<usize> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let request = format!(
            "HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.host
        );
        stream.write_all(request.as_bytes()).await?;

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed without response",
            ));
        }
        Ok(n)
    }
}

#[async_trait]
impl ConnectivityProbe for HttpHeadProbe {
    async fn probe(&self) -> bool {
        match timeout(self.timeout, self.head_request()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {}:{} failed: {}", self.host, self.port, e);
                false
            }
            Err(_) => {
                debug!(
                    "Probe to {}:{} timed out after {:?}",
                    self.host, self.port, self.timeout
                );
                false
            }
        }
    }
}
