//! Blocking front-end over a pluggable transport.
//!
//! The transport is the three-operation capability the session driver
//! needs from a byte channel: send, recv, close. The default
//! implementation wraps a `std::net::TcpStream`; tests substitute an
//! in-process double.

use crate::connection::RndcConfig;
use crate::error::ClientError;
use crate::session::{ClientSession, SessionEvent};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Read buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// A byte channel the blocking driver can run an exchange over.
pub trait Transport {
    /// Sends the whole buffer.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Receives some bytes. An empty return means the peer closed.
    fn recv(&mut self) -> io::Result<Vec<u8>>;

    /// Closes the channel. Close failures are not reported.
    fn close(&mut self);
}

/// TCP transport with socket-level timeouts.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connects to `host:port`, trying each resolved address in turn.
    pub fn connect(
        addr: &str,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> io::Result<Self> {
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        let mut last_err = None;
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(io_timeout))?;
                    stream.set_write_timeout(Some(io_timeout))?;
                    stream.set_nodelay(true).ok();
                    return Ok(Self { stream });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        }))
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let n = self.stream.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) {
        self.stream.shutdown(std::net::Shutdown::Both).ok();
    }
}

fn map_io(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ClientError::Timeout,
        _ => ClientError::Io(err),
    }
}

/// Runs one command exchange over `transport`. The transport is closed on
/// every exit path.
pub fn execute<T: Transport>(
    transport: &mut T,
    key: &str,
    command: Option<&str>,
) -> Result<String, ClientError> {
    let mut session = ClientSession::new(key, command);
    let mut event = session.start();
    let result = loop {
        event = match event {
            SessionEvent::Write(bytes) => {
                tracing::debug!(len = bytes.len(), "sending packet");
                if let Err(err) = transport.send(&bytes) {
                    break Err(map_io(err));
                }
                session.next(None)
            }
            SessionEvent::Read => match transport.recv() {
                Ok(data) if data.is_empty() => break Err(ClientError::ConnectionClosed),
                Ok(data) => session.next(Some(&data)),
                Err(err) => break Err(map_io(err)),
            },
            SessionEvent::Finished(text) => {
                break if text.is_empty() {
                    Err(ClientError::EmptyResponse)
                } else {
                    Ok(text)
                };
            }
            SessionEvent::Failed(err) => break Err(err.into()),
            SessionEvent::Command(_) => unreachable!("client sessions do not dispatch"),
        };
    };
    transport.close();
    result
}

/// Blocking counterpart of [`crate::RndcClient`].
pub struct BlockingClient {
    config: RndcConfig,
}

impl BlockingClient {
    pub fn new(config: RndcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RndcConfig {
        &self.config
    }

    /// Runs one command over a fresh TCP connection.
    pub fn command(&self, command: &str) -> Result<String, ClientError> {
        let addr = self.config.addr();
        tracing::debug!(%addr, "connecting");
        let mut transport = TcpTransport::connect(
            &addr,
            self.config.connect_timeout,
            self.config.request_timeout,
        )
        .map_err(map_io)?;
        execute(&mut transport, &self.config.key, Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ServerSession;
    use rndc_protocol::ProtocolError;
    use std::collections::VecDeque;

    const KEY: &str = "abcd";

    /// Transport double wired straight into a server session.
    struct Loopback {
        session: ServerSession,
        outbox: VecDeque<Vec<u8>>,
        handler: Box<dyn Fn(&str) -> Result<String, String>>,
        closed: bool,
    }

    impl Loopback {
        fn new(key: &str, handler: impl Fn(&str) -> Result<String, String> + 'static) -> Self {
            let mut session = ServerSession::new(key);
            assert!(matches!(session.start(), SessionEvent::Read));
            Self {
                session,
                outbox: VecDeque::new(),
                handler: Box::new(handler),
                closed: false,
            }
        }
    }

    impl Transport for Loopback {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            let mut event = self.session.next(Some(bytes));
            loop {
                event = match event {
                    SessionEvent::Write(frame) => {
                        self.outbox.push_back(frame.to_vec());
                        self.session.next(None)
                    }
                    SessionEvent::Command(command) => match (self.handler)(&command) {
                        Ok(text) => self.session.respond(Ok(&text)),
                        Err(err) => self.session.respond(Err(&err)),
                    },
                    SessionEvent::Read | SessionEvent::Finished(_) | SessionEvent::Failed(_) => {
                        break
                    }
                };
            }
            Ok(())
        }

        fn recv(&mut self) -> io::Result<Vec<u8>> {
            Ok(self.outbox.pop_front().unwrap_or_default())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_execute_happy_path() {
        let mut transport = Loopback::new(KEY, |command| {
            assert_eq!(command, "status");
            Ok("birdy".to_string())
        });
        let response = execute(&mut transport, KEY, Some("status")).unwrap();
        assert_eq!(response, "birdy");
        assert!(transport.closed);
    }

    #[test]
    fn test_execute_default_command() {
        let mut transport = Loopback::new(KEY, |command| {
            assert_eq!(command, "null");
            Ok("done".to_string())
        });
        assert_eq!(execute(&mut transport, KEY, None).unwrap(), "done");
    }

    #[test]
    fn test_execute_wrong_key() {
        let mut transport = Loopback::new(KEY, |_| Ok("birdy".to_string()));
        let err = execute(&mut transport, "meh", Some("status")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::SignatureMismatch)
        ));
        assert!(err.to_string().contains("Couldn't validate"), "{err}");
        assert!(transport.closed);
    }

    #[test]
    fn test_execute_server_error() {
        let mut transport = Loopback::new(KEY, |_| Err("no such zone".to_string()));
        let err = execute(&mut transport, KEY, Some("reload badzone")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ServerError(_))
        ));
        assert!(err.to_string().contains("no such zone"));
    }

    #[test]
    fn test_execute_connection_closed() {
        // A transport that never produces bytes reads as a closed peer.
        struct Dead;
        impl Transport for Dead {
            fn send(&mut self, _: &[u8]) -> io::Result<()> {
                Ok(())
            }
            fn recv(&mut self) -> io::Result<Vec<u8>> {
                Ok(Vec::new())
            }
            fn close(&mut self) {}
        }
        let err = execute(&mut Dead, KEY, Some("status")).unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[test]
    fn test_timeout_mapping() {
        assert!(matches!(
            map_io(io::Error::new(io::ErrorKind::TimedOut, "slow")),
            ClientError::Timeout
        ));
        assert!(matches!(
            map_io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            ClientError::Io(_)
        ));
    }
}
