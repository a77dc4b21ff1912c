use chrono::Utc;
use fxbot_core::{BrokerError, DataError, Mt5Config};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::protocol::*;

/// Errors raised by the bridge connection itself.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("not connected to the MetaTrader bridge")]
    NotConnected,
    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed bridge message: {0}")]
    Protocol(String),
    #[error("bridge reported: {0}")]
    Remote(String),
}

impl From<BridgeError> for BrokerError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::NotConnected | BridgeError::Io(_) | BridgeError::Timeout(_) => {
                BrokerError::ConnectionFailed(e.to_string())
            }
            BridgeError::Remote(message) => BrokerError::Other(message),
            BridgeError::Protocol(_) => BrokerError::Other(e.to_string()),
        }
    }
}

impl From<BridgeError> for DataError {
    fn from(e: BridgeError) -> Self {
        DataError::FeedError(e.to_string())
    }
}

/// One TCP session with the MQL5 bridge EA running inside MT5.
///
/// Messages are length-prefixed JSON frames in both directions. Every read
/// is bounded by the configured request timeout; a read error or timeout
/// closes the session and the owner has to `open` it again.
pub struct BridgeClient {
    config: Mt5Config,
    stream: Option<TcpStream>,
}

impl BridgeClient {
    pub fn new(config: Mt5Config) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs.max(1))
    }

    /// Open the socket, send credentials and wait for the EA's greeting.
    /// Returns the EA version string.
    pub async fn open(&mut self) -> Result<String, BridgeError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!(%addr, "Connecting to MetaTrader bridge");

        let timeout = self.timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BridgeError::Timeout(timeout))??;
        self.stream = Some(stream);

        let login = OutboundMessage::Login {
            login: self.config.login,
            password: self.config.password.clone(),
            server: self.config.server.clone(),
        };
        self.send(&login).await?;

        match self.recv().await {
            Ok(InboundMessage::Connected { version }) => {
                info!(%version, login = self.config.login, "Connected to MetaTrader EA");
                Ok(version)
            }
            Ok(InboundMessage::Error { message }) => {
                self.stream = None;
                Err(BridgeError::Remote(message))
            }
            Ok(other) => {
                self.stream = None;
                Err(BridgeError::Protocol(format!(
                    "unexpected initial message: {:?}",
                    other
                )))
            }
            Err(e) => {
                self.stream = None;
                Err(e)
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Bridge socket shutdown failed");
            }
            info!("Disconnected from MetaTrader bridge");
        }
    }

    /// Send a message to MetaTrader.
    pub async fn send(&mut self, msg: &OutboundMessage) -> Result<(), BridgeError> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        let json = serde_json::to_vec(msg)
            .map_err(|e| BridgeError::Protocol(format!("serialization error: {}", e)))?;
        write_frame(stream, &json).await?;
        Ok(())
    }

    /// Read a single framed message from MetaTrader.
    pub async fn recv(&mut self) -> Result<InboundMessage, BridgeError> {
        let timeout = self.timeout();
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        let result = tokio::time::timeout(timeout, read_frame(stream)).await;
        let body = match result {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                self.stream = None;
                return Err(BridgeError::Io(e));
            }
            Err(_) => {
                // A read cut off mid-frame leaves the stream misaligned.
                self.stream = None;
                return Err(BridgeError::Timeout(timeout));
            }
        };

        serde_json::from_slice(&body)
            .map_err(|e| BridgeError::Protocol(format!("deserialization error: {}", e)))
    }

    /// Send `msg` and read replies until `pick` accepts one.
    ///
    /// Messages `pick` declines are handed back to `other` so callers can
    /// fold unsolicited updates into their own state. An `error` reply ends
    /// the exchange.
    pub async fn request<T>(
        &mut self,
        msg: &OutboundMessage,
        mut pick: impl FnMut(&InboundMessage) -> Option<T>,
        mut other: impl FnMut(InboundMessage),
    ) -> Result<T, BridgeError> {
        self.send(msg).await?;
        loop {
            let reply = self.recv().await?;
            if let Some(value) = pick(&reply) {
                return Ok(value);
            }
            match reply {
                InboundMessage::Error { message } => return Err(BridgeError::Remote(message)),
                unsolicited => other(unsolicited),
            }
        }
    }

    /// Round-trip a heartbeat.
    pub async fn heartbeat(&mut self) -> Result<(), BridgeError> {
        let sent = Utc::now();
        self.request(
            &OutboundMessage::Heartbeat { timestamp: sent },
            |msg| matches!(msg, InboundMessage::HeartbeatAck { .. }).then_some(()),
            |msg| warn!(?msg, "Ignoring message while waiting for heartbeat ack"),
        )
        .await?;
        debug!(
            rtt_ms = (Utc::now() - sent).num_milliseconds(),
            "Bridge heartbeat acknowledged"
        );
        Ok(())
    }
}
