//! Async connection driving one command exchange.

use crate::error::ClientError;
use crate::session::{ClientSession, SessionEvent};
use rndc_protocol::DEFAULT_PORT;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Read buffer size for socket reads (4 KiB; frames are far smaller).
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct RndcConfig {
    /// Server host name or address.
    pub host: String,
    /// Control-channel port.
    pub port: u16,
    /// Base64-encoded HMAC-MD5 key.
    pub key: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout applied to each read and write of the exchange.
    pub request_timeout: Duration,
}

impl RndcConfig {
    /// Creates a configuration for `host` with the default port.
    pub fn new(host: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            key: key.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The `host:port` form passed to the connector.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A single-exchange connection to a name server.
///
/// The control channel allows one command per connection, so this is
/// constructed, driven by [`execute`], and discarded.
///
/// [`execute`]: Connection::execute
pub struct Connection {
    config: RndcConfig,
}

impl Connection {
    pub fn new(config: RndcConfig) -> Self {
        Self { config }
    }

    /// Connects and runs one command exchange, returning the response text.
    pub async fn execute(&self, command: &str) -> Result<String, ClientError> {
        let addr = self.config.addr();
        tracing::debug!(%addr, "connecting");

        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true).ok();

        let result = drive(
            &mut stream,
            &self.config.key,
            command,
            self.config.request_timeout,
        )
        .await;
        stream.shutdown().await.ok();
        result
    }
}

/// Drives a client session over any byte stream. Tests substitute an
/// in-process duplex pipe for the TCP stream.
pub(crate) async fn drive<S>(
    stream: &mut S,
    key: &str,
    command: &str,
    timeout: Duration,
) -> Result<String, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = ClientSession::new(key, Some(command));
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut event = session.start();
    loop {
        event = match event {
            SessionEvent::Write(bytes) => {
                tracing::debug!(len = bytes.len(), "sending packet");
                tokio::time::timeout(timeout, stream.write_all(&bytes))
                    .await
                    .map_err(|_| ClientError::Timeout)??;
                session.next(None)
            }
            SessionEvent::Read => {
                let n = tokio::time::timeout(timeout, stream.read(&mut buf))
                    .await
                    .map_err(|_| ClientError::Timeout)??;
                if n == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
                tracing::debug!(len = n, "received bytes");
                session.next(Some(&buf[..n]))
            }
            SessionEvent::Finished(text) => {
                if text.is_empty() {
                    return Err(ClientError::EmptyResponse);
                }
                return Ok(text);
            }
            SessionEvent::Failed(err) => return Err(err.into()),
            SessionEvent::Command(_) => unreachable!("client sessions do not dispatch"),
        };
    }
}
