//! Farmer data channels
//!
//! A data channel is one TCP connection carrying exactly one shard
//! transfer. The wire is a JSON handshake `{token, hash, operation}`
//! followed by length-prefixed binary frames of shard bytes; an empty
//! frame terminates the stream (the farmer's acknowledgement on PUSH, the
//! close marker on PULL).

use crate::error::{NetworkError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, instrument};

/// Chunk size for reading shard bytes off disk
const PUSH_CHUNK_SIZE: usize = 64 * 1024;

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Active,
    Closed,
    Errored,
}

/// Channel configuration
#[derive(Debug, Clone)]
pub struct DataChannelConfig {
    /// Abort when no frame moves for this long
    pub idle_timeout: Duration,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Handshake<'a> {
    token: &'a str,
    hash: &'a str,
    operation: &'a str,
}

/// Farmer acknowledgement / error frame body
#[derive(Debug, Default, Deserialize)]
struct Ack {
    #[serde(default)]
    error: Option<String>,
}

/// An outbound connection to a farmer for one shard transfer
#[derive(Debug)]
pub struct DataChannel {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    config: DataChannelConfig,
    state: ChannelState,
}

impl DataChannel {
    /// Connect to a farmer endpoint (`host:port`).
    pub async fn connect(endpoint: &str) -> Result<Self> {
        Self::connect_with(endpoint, DataChannelConfig::default()).await
    }

    /// Connect with explicit configuration.
    pub async fn connect_with(endpoint: &str, config: DataChannelConfig) -> Result<Self> {
        let stream = timeout(config.idle_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| NetworkError::IdleTimeout(config.idle_timeout))?
            .map_err(|e| NetworkError::Connect(e.to_string()))?;

        debug!(%endpoint, "data channel open");
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
            config,
            state: ChannelState::Open,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    async fn send_handshake(&mut self, token: &str, hash: &str, operation: &str) -> Result<()> {
        let handshake = serde_json::to_vec(&Handshake {
            token,
            hash,
            operation,
        })?;
        self.send_frame(Bytes::from(handshake)).await?;
        self.state = ChannelState::Active;
        Ok(())
    }

    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        timeout(self.config.idle_timeout, self.framed.send(frame))
            .await
            .map_err(|_| NetworkError::IdleTimeout(self.config.idle_timeout))?
            .map_err(NetworkError::Io)
    }

    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let frame = timeout(self.config.idle_timeout, self.framed.next())
            .await
            .map_err(|_| NetworkError::IdleTimeout(self.config.idle_timeout))?;
        match frame {
            Some(Ok(bytes)) => Ok(Some(bytes.freeze())),
            Some(Err(e)) => Err(NetworkError::Io(e)),
            None => Ok(None),
        }
    }

    /// PUSH a shard: stream `source` to the farmer and wait for its
    /// acknowledgement. Returns the number of bytes sent.
    #[instrument(skip(self, token), fields(hash))]
    pub async fn push(&mut self, token: &str, hash: &str, source: &Path) -> Result<u64> {
        let result = self.push_inner(token, hash, source).await;
        self.state = match result {
            Ok(_) => ChannelState::Closed,
            Err(_) => ChannelState::Errored,
        };
        result
    }

    async fn push_inner(&mut self, token: &str, hash: &str, source: &Path) -> Result<u64> {
        self.send_handshake(token, hash, "PUSH").await?;

        let mut file = tokio::fs::File::open(source).await?;
        let mut sent = 0u64;
        let mut buf = vec![0u8; PUSH_CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sent += n as u64;
            self.send_frame(Bytes::copy_from_slice(&buf[..n])).await?;
        }

        // Empty frame marks the end of the shard bytes
        self.send_frame(Bytes::new()).await?;

        match self.next_frame().await? {
            Some(frame) => {
                let ack: Ack = serde_json::from_slice(&frame).unwrap_or_default();
                if let Some(error) = ack.error {
                    return Err(NetworkError::Transfer(error));
                }
                debug!(sent, "farmer acknowledged shard");
                Ok(sent)
            }
            None => Err(NetworkError::Transfer(
                "connection closed before acknowledgement".to_string(),
            )),
        }
    }

    /// PULL a shard: returns a receiver of in-order byte chunks ending at
    /// the farmer's close frame. The channel is consumed.
    #[instrument(skip(self, token), fields(hash))]
    pub async fn pull(
        mut self,
        token: &str,
        hash: &str,
    ) -> Result<mpsc::Receiver<Result<Bytes>>> {
        self.send_handshake(token, hash, "PULL").await?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                match self.next_frame().await {
                    Ok(Some(frame)) if frame.is_empty() => {
                        // Terminal close frame
                        self.state = ChannelState::Closed;
                        break;
                    }
                    Ok(Some(frame)) => {
                        if tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        self.state = ChannelState::Errored;
                        let _ = tx
                            .send(Err(NetworkError::Transfer(
                                "connection closed before transfer completed".to_string(),
                            )))
                            .await;
                        break;
                    }
                    Err(err) => {
                        self.state = ChannelState::Errored;
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Seam over one shard transfer, so orchestrators and tests are
/// independent of the TCP wire.
#[async_trait]
pub trait ShardChannel: Send {
    /// PUSH the file at `source`; resolves when the farmer acknowledges.
    async fn push(&mut self, token: &str, hash: &str, source: &Path) -> Result<u64>;

    /// PULL the shard as an ordered chunk stream.
    async fn pull(self: Box<Self>, token: &str, hash: &str)
        -> Result<mpsc::Receiver<Result<Bytes>>>;
}

#[async_trait]
impl ShardChannel for DataChannel {
    async fn push(&mut self, token: &str, hash: &str, source: &Path) -> Result<u64> {
        DataChannel::push(self, token, hash, source).await
    }

    async fn pull(
        self: Box<Self>,
        token: &str,
        hash: &str,
    ) -> Result<mpsc::Receiver<Result<Bytes>>> {
        DataChannel::pull(*self, token, hash).await
    }
}

/// Opens channels to farmer endpoints
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn ShardChannel>>;
}

/// Production factory dialing TCP data channels
pub struct TcpChannelFactory {
    config: DataChannelConfig,
}

impl TcpChannelFactory {
    pub fn new(config: DataChannelConfig) -> Self {
        Self { config }
    }
}

impl Default for TcpChannelFactory {
    fn default() -> Self {
        Self::new(DataChannelConfig::default())
    }
}

#[async_trait]
impl ChannelFactory for TcpChannelFactory {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn ShardChannel>> {
        let channel = DataChannel::connect_with(endpoint, self.config.clone()).await?;
        Ok(Box::new(channel))
    }
}
