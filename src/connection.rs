//! Transport seam: how the client obtains and drives its byte stream to the broker.

use crate::codec::{self, connection_error};
use crate::config::Config;
use crate::error::{MqError, Result};
use crate::message::{Request, Response};
use crate::retry::RetryStrategy;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A reliable duplex byte stream to the broker.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxStream = Box<dyn Stream>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<BoxStream>> + Send + 'a>>;

/// Opens streams to the broker.
///
/// The default [`TcpConnector`] dials TCP. Custom connectors can supply TLS
/// streams, Unix sockets or in-memory pipes.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a> {
        Box::pin(async move {
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            Ok::<_, io::Error>(Box::new(stream) as BoxStream)
        })
    }
}

/// An open connection to the broker.
pub struct Connection {
    stream: BufReader<BoxStream>,
    max_message_size: usize,
}

impl Connection {
    pub fn new(stream: BoxStream, max_message_size: usize) -> Self {
        Self {
            stream: BufReader::new(stream),
            max_message_size,
        }
    }

    /// Connects with `config.timeout` per attempt, retrying with exponential
    /// backoff up to `config.max_retries` extra times.
    ///
    /// Used only when the client starts. Reconnects during a round trip go
    /// through [`connect`](Self::connect) and make a single attempt.
    pub async fn open(connector: &dyn Connector, config: &Config) -> Result<Self> {
        let retry_strategy = RetryStrategy::new(config.max_retries, config.retry_delay);

        retry_strategy
            .execute(move || Self::connect(connector, config))
            .await
    }

    /// One connection attempt bounded by `config.timeout`.
    pub async fn connect(connector: &dyn Connector, config: &Config) -> Result<Self> {
        let stream = timeout(config.timeout, connector.connect(&config.host, config.port))
            .await
            .map_err(|_| MqError::Timeout(config.timeout.as_millis() as u64))?
            .map_err(|e| MqError::Connection(format!("connect to {}: {}", config.address(), e)))?;

        Ok(Self::new(stream, config.max_message_size))
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.map_err(connection_error)?;
        self.stream.flush().await.map_err(connection_error)
    }

    /// Writes `request` and reads exactly the one response paired with it.
    ///
    /// Bytes already buffered past the end of the response cannot belong to any
    /// request and are reported as a protocol error.
    pub async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        self.write(&codec::encode_request(request)).await?;
        let response = codec::read_response(&mut self.stream, self.max_message_size).await?;

        if !self.stream.buffer().is_empty() {
            return Err(MqError::Protocol(format!(
                "{} unexpected bytes after response",
                self.stream.buffer().len()
            )));
        }
        Ok(response)
    }

    /// Shuts the write side down so the broker sees end of stream, then drops it.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
