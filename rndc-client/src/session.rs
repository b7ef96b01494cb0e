//! Sans-I/O session state machine for the four-packet exchange.
//!
//! A session never touches a socket: each call returns a [`SessionEvent`]
//! telling the driver what to do next. [`SessionEvent::Write`] means
//! transmit the bytes and call [`next`] with no data;
//! [`SessionEvent::Read`] means read from the peer and call [`next`] with
//! whatever arrived (short reads are fine, the session buffers until a
//! frame completes). `Finished` and `Failed` are terminal.
//!
//! The client exchange is: opener (no nonce) -> nonce reply -> command
//! packet echoing the nonce -> result. The server role is the mirror
//! image, with the command surfaced through [`SessionEvent::Command`] and
//! answered via [`ServerSession::respond`].
//!
//! Driving a terminated session is a programming error and panics; protocol
//! failures are reported through `Failed` instead.
//!
//! [`next`]: ClientSession::next

use bytes::Bytes;
use rndc_protocol::{Decoder, Packet, ProtocolError};

/// Result text used when the server reply carries none.
const DEFAULT_RESPONSE: &str = "command success";

/// What the driver must do next.
#[derive(Debug)]
pub enum SessionEvent {
    /// Transmit all of these bytes, then call `next(None)`.
    Write(Bytes),
    /// Read from the peer and call `next(Some(bytes))`.
    Read,
    /// A command arrived (server role); answer with `respond`.
    Command(String),
    /// Terminal success carrying the response text.
    Finished(String),
    /// Terminal failure carrying the protocol error.
    Failed(ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    WantWrite,
    WantRead,
    Dispatch,
    Finish,
    Error,
}

/// What a server session does once its in-flight write completes.
#[derive(Debug)]
enum AfterWrite {
    Read,
    Finish(String),
    Fail(ProtocolError),
}

/// Client half of the exchange.
#[derive(Debug)]
pub struct ClientSession {
    key: String,
    command: Option<String>,
    state: State,
    nonce_seen: bool,
    decoder: Decoder,
}

impl ClientSession {
    /// Creates a client session for one command. An empty or absent command
    /// is sent as the `null` placeholder.
    pub fn new(key: impl Into<String>, command: Option<&str>) -> Self {
        Self {
            key: key.into(),
            command: command.filter(|cmd| !cmd.is_empty()).map(str::to_string),
            state: State::Start,
            nonce_seen: false,
            decoder: Decoder::new(),
        }
    }

    /// Starts the session, producing the opener packet.
    ///
    /// # Panics
    ///
    /// Panics if the session was already started.
    pub fn start(&mut self) -> SessionEvent {
        assert!(
            self.state == State::Start,
            "client session already started"
        );
        let mut opener = Packet::new(&self.key);
        match opener.to_bytes() {
            Ok(bytes) => {
                tracing::debug!("sending opener");
                self.state = State::WantWrite;
                SessionEvent::Write(bytes.freeze())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Advances the session. Pass `None` after completing a write and
    /// `Some(bytes)` after a read.
    ///
    /// # Panics
    ///
    /// Panics when driven out of order: before `start()`, after a terminal
    /// event, with data during a write step, or without data during a read
    /// step.
    pub fn next(&mut self, input: Option<&[u8]>) -> SessionEvent {
        match self.state {
            State::Start => panic!("client session not started"),
            State::WantWrite => {
                assert!(input.is_none(), "unexpected data during a write step");
                self.state = State::WantRead;
                SessionEvent::Read
            }
            State::WantRead => {
                let data = input.expect("read step requires data");
                self.decoder.extend(data);
                match self.decoder.decode_frame() {
                    Ok(Some(body)) => self.handle_frame(&body),
                    Ok(None) => SessionEvent::Read,
                    Err(err) => self.fail(err),
                }
            }
            State::Dispatch => unreachable!("client sessions do not dispatch"),
            State::Finish | State::Error => panic!("client session already terminated"),
        }
    }

    fn handle_frame(&mut self, body: &[u8]) -> SessionEvent {
        let packet = match Packet::parse(&self.key, body) {
            Ok(packet) => packet,
            Err(err) => return self.fail(err),
        };
        if !self.nonce_seen {
            self.nonce_seen = true;
            let nonce = packet.nonce();
            tracing::debug!(?nonce, "received nonce reply");
            let mut command = Packet::new(&self.key);
            if let Some(nonce) = nonce {
                command = command.with_nonce(nonce);
            }
            if let Some(name) = &self.command {
                command = command.with_command(name);
            }
            match command.to_bytes() {
                Ok(bytes) => {
                    self.state = State::WantWrite;
                    SessionEvent::Write(bytes.freeze())
                }
                Err(err) => self.fail(err),
            }
        } else {
            let text = packet.text().unwrap_or(DEFAULT_RESPONSE).to_string();
            tracing::debug!("command completed");
            self.state = State::Finish;
            SessionEvent::Finished(text)
        }
    }

    fn fail(&mut self, err: ProtocolError) -> SessionEvent {
        tracing::debug!(%err, "session failed");
        self.state = State::Error;
        SessionEvent::Failed(err)
    }
}

/// Server half of the exchange.
///
/// Accepts the opener, issues a nonce, validates the command packet, and
/// surfaces the command for dispatch. On any protocol failure it sends the
/// peer an error packet before reporting `Failed`.
#[derive(Debug)]
pub struct ServerSession {
    key: String,
    state: State,
    nonce: Option<u32>,
    decoder: Decoder,
    after_write: Option<AfterWrite>,
}

impl ServerSession {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: State::Start,
            nonce: None,
            decoder: Decoder::new(),
            after_write: None,
        }
    }

    /// Starts the session; the server side begins by reading the opener.
    ///
    /// # Panics
    ///
    /// Panics if the session was already started.
    pub fn start(&mut self) -> SessionEvent {
        assert!(
            self.state == State::Start,
            "server session already started"
        );
        self.state = State::WantRead;
        SessionEvent::Read
    }

    /// Advances the session. Pass `None` after completing a write and
    /// `Some(bytes)` after a read.
    ///
    /// # Panics
    ///
    /// Panics when driven out of order, including calling `next` instead of
    /// [`respond`] after a [`SessionEvent::Command`].
    ///
    /// [`respond`]: ServerSession::respond
    pub fn next(&mut self, input: Option<&[u8]>) -> SessionEvent {
        match self.state {
            State::Start => panic!("server session not started"),
            State::WantWrite => {
                assert!(input.is_none(), "unexpected data during a write step");
                match self.after_write.take() {
                    Some(AfterWrite::Read) => {
                        self.state = State::WantRead;
                        SessionEvent::Read
                    }
                    Some(AfterWrite::Finish(text)) => {
                        self.state = State::Finish;
                        SessionEvent::Finished(text)
                    }
                    Some(AfterWrite::Fail(err)) => {
                        self.state = State::Error;
                        SessionEvent::Failed(err)
                    }
                    None => unreachable!("write step without a follow-up"),
                }
            }
            State::WantRead => {
                let data = input.expect("read step requires data");
                self.decoder.extend(data);
                match self.decoder.decode_frame() {
                    Ok(Some(body)) => self.handle_frame(&body),
                    Ok(None) => SessionEvent::Read,
                    Err(err) => self.send_error(err),
                }
            }
            State::Dispatch => panic!("respond() required after a command event"),
            State::Finish | State::Error => panic!("server session already terminated"),
        }
    }

    /// Answers the command surfaced by [`SessionEvent::Command`], producing
    /// the result packet.
    ///
    /// # Panics
    ///
    /// Panics unless the session is waiting on a dispatch.
    pub fn respond(&mut self, result: Result<&str, &str>) -> SessionEvent {
        assert!(
            self.state == State::Dispatch,
            "no command awaiting a response"
        );
        match result {
            Ok(text) => {
                let mut reply = Packet::new(&self.key);
                if !text.is_empty() {
                    reply = reply.with_text(text);
                }
                match reply.to_bytes() {
                    Ok(bytes) => {
                        self.state = State::WantWrite;
                        self.after_write = Some(AfterWrite::Finish(text.to_string()));
                        SessionEvent::Write(bytes.freeze())
                    }
                    Err(err) => {
                        self.state = State::Error;
                        SessionEvent::Failed(err)
                    }
                }
            }
            Err(message) => self.send_error(ProtocolError::ServerError(message.to_string())),
        }
    }

    fn handle_frame(&mut self, body: &[u8]) -> SessionEvent {
        let packet = match Packet::parse(&self.key, body) {
            Ok(packet) => packet,
            Err(err) => return self.send_error(err),
        };
        if self.nonce.is_none() {
            let nonce = rand::random::<u32>();
            self.nonce = Some(nonce);
            tracing::debug!(nonce, "issuing nonce");
            let mut reply = Packet::new(&self.key).with_nonce(nonce);
            match reply.to_bytes() {
                Ok(bytes) => {
                    self.state = State::WantWrite;
                    self.after_write = Some(AfterWrite::Read);
                    SessionEvent::Write(bytes.freeze())
                }
                Err(err) => {
                    self.state = State::Error;
                    SessionEvent::Failed(err)
                }
            }
        } else {
            if packet.nonce() != self.nonce {
                return self.send_error(ProtocolError::ServerError(
                    "client nonce does not match".to_string(),
                ));
            }
            let command = packet.command().unwrap_or("null").to_string();
            tracing::debug!(%command, "dispatching command");
            self.state = State::Dispatch;
            SessionEvent::Command(command)
        }
    }

    /// Fabricates an error packet for the peer; the session surrenders with
    /// `Failed` once the write completes. Dispatch errors go on the wire as
    /// their raw text, everything else as its display form.
    fn send_error(&mut self, err: ProtocolError) -> SessionEvent {
        tracing::debug!(%err, "reporting error to peer");
        let text = match &err {
            ProtocolError::ServerError(message) => message.clone(),
            other => other.to_string(),
        };
        let mut reply = Packet::new(&self.key).with_err(&text);
        match reply.to_bytes() {
            Ok(bytes) => {
                self.state = State::WantWrite;
                self.after_write = Some(AfterWrite::Fail(err));
                SessionEvent::Write(bytes.freeze())
            }
            Err(_) => {
                self.state = State::Error;
                SessionEvent::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const KEY: &str = "abcd";

    /// In-memory peer: a `ServerSession` pumped to quiescence on every
    /// frame the client sends.
    struct FakeServer {
        session: ServerSession,
        outbox: VecDeque<Bytes>,
        sent: Vec<Bytes>,
        done: Option<Result<String, String>>,
        handler: Box<dyn Fn(&str) -> Result<String, String>>,
    }

    impl FakeServer {
        fn new(key: &str, handler: impl Fn(&str) -> Result<String, String> + 'static) -> Self {
            let mut session = ServerSession::new(key);
            assert!(matches!(session.start(), SessionEvent::Read));
            Self {
                session,
                outbox: VecDeque::new(),
                sent: Vec::new(),
                done: None,
                handler: Box::new(handler),
            }
        }

        fn feed(&mut self, data: &[u8]) {
            if self.done.is_some() {
                return;
            }
            let mut event = self.session.next(Some(data));
            loop {
                event = match event {
                    SessionEvent::Write(bytes) => {
                        self.outbox.push_back(bytes.clone());
                        self.sent.push(bytes);
                        self.session.next(None)
                    }
                    SessionEvent::Read => break,
                    SessionEvent::Command(command) => match (self.handler)(&command) {
                        Ok(text) => self.session.respond(Ok(&text)),
                        Err(err) => self.session.respond(Err(&err)),
                    },
                    SessionEvent::Finished(text) => {
                        self.done = Some(Ok(text));
                        break;
                    }
                    SessionEvent::Failed(err) => {
                        self.done = Some(Err(err.to_string()));
                        break;
                    }
                };
            }
        }
    }

    /// Runs a client session to completion against the fake server,
    /// returning the outcome and every frame the client wrote.
    fn run_client(
        client: &mut ClientSession,
        server: &mut FakeServer,
    ) -> (Result<String, String>, Vec<Bytes>) {
        let mut writes = Vec::new();
        let mut event = client.start();
        loop {
            event = match event {
                SessionEvent::Write(bytes) => {
                    writes.push(bytes.clone());
                    server.feed(&bytes);
                    client.next(None)
                }
                SessionEvent::Read => {
                    let reply = server.outbox.pop_front().expect("server reply available");
                    client.next(Some(&reply))
                }
                SessionEvent::Finished(text) => return (Ok(text), writes),
                SessionEvent::Failed(err) => return (Err(err.to_string()), writes),
                SessionEvent::Command(_) => unreachable!("client sessions do not dispatch"),
            };
        }
    }

    fn parse_frame(key: &str, frame: &[u8]) -> Packet {
        let mut decoder = Decoder::new();
        decoder.extend(frame);
        let body = decoder.decode_frame().unwrap().unwrap();
        Packet::parse(key, &body).unwrap()
    }

    #[test]
    fn test_happy_path() {
        let mut server = FakeServer::new(KEY, |command| {
            assert_eq!(command, "status");
            Ok("birdy".to_string())
        });
        let mut client = ClientSession::new(KEY, Some("status"));
        let (outcome, writes) = run_client(&mut client, &mut server);

        assert_eq!(outcome.unwrap(), "birdy");
        assert_eq!(server.done, Some(Ok("birdy".to_string())));

        // Exactly two outbound packets: opener without nonce, command
        // echoing the server's nonce.
        assert_eq!(writes.len(), 2);
        let opener = parse_frame(KEY, &writes[0]);
        assert_eq!(opener.nonce(), None);
        assert_eq!(opener.command(), Some("null"));

        let issued = parse_frame(KEY, &server.sent[0]).nonce().unwrap();
        let command = parse_frame(KEY, &writes[1]);
        assert_eq!(command.nonce(), Some(issued));
        assert_eq!(command.command(), Some("status"));
    }

    #[test]
    fn test_default_command_is_null() {
        let mut server = FakeServer::new(KEY, |command| {
            assert_eq!(command, "null");
            Ok("done".to_string())
        });
        let mut client = ClientSession::new(KEY, None);
        let (outcome, _) = run_client(&mut client, &mut server);
        assert_eq!(outcome.unwrap(), "done");
    }

    #[test]
    fn test_empty_command_is_null() {
        let mut server = FakeServer::new(KEY, |command| {
            assert_eq!(command, "null");
            Ok("done".to_string())
        });
        let mut client = ClientSession::new(KEY, Some(""));
        let (outcome, _) = run_client(&mut client, &mut server);
        assert_eq!(outcome.unwrap(), "done");
    }

    #[test]
    fn test_missing_text_defaults() {
        let mut server = FakeServer::new(KEY, |_| Ok(String::new()));
        let mut client = ClientSession::new(KEY, Some("reload"));
        let (outcome, _) = run_client(&mut client, &mut server);
        assert_eq!(outcome.unwrap(), "command success");
    }

    #[test]
    fn test_wrong_key_fails_validation() {
        let mut server = FakeServer::new(KEY, |_| Ok("birdy".to_string()));
        let mut client = ClientSession::new("meh", Some("status"));
        let (outcome, writes) = run_client(&mut client, &mut server);

        let message = outcome.unwrap_err();
        assert!(message.contains("Couldn't validate"), "{message}");
        // The client never got past the opener.
        assert_eq!(writes.len(), 1);
        assert!(server.done.as_ref().unwrap().is_err());
    }

    #[test]
    fn test_server_error_propagates() {
        let mut server = FakeServer::new(KEY, |_| Err("no such zone".to_string()));
        let mut client = ClientSession::new(KEY, Some("reload badzone"));
        let (outcome, _) = run_client(&mut client, &mut server);
        assert!(outcome.unwrap_err().contains("no such zone"));
    }

    #[test]
    fn test_split_reads_are_buffered() {
        let mut server = FakeServer::new(KEY, |_| Ok("birdy".to_string()));
        let mut client = ClientSession::new(KEY, Some("status"));

        let mut event = client.start();
        let mut writes = 0;
        let outcome = loop {
            event = match event {
                SessionEvent::Write(bytes) => {
                    writes += 1;
                    server.feed(&bytes);
                    client.next(None)
                }
                SessionEvent::Read => {
                    let reply = server.outbox.pop_front().unwrap();
                    // Deliver one byte at a time.
                    let mut event = client.next(Some(&reply[..1]));
                    for byte in &reply[1..] {
                        assert!(matches!(event, SessionEvent::Read));
                        event = client.next(Some(std::slice::from_ref(byte)));
                    }
                    event
                }
                SessionEvent::Finished(text) => break Ok(text),
                SessionEvent::Failed(err) => break Err(err.to_string()),
                SessionEvent::Command(_) => unreachable!(),
            };
        };
        assert_eq!(outcome.unwrap(), "birdy");
        assert_eq!(writes, 2);
    }

    #[test]
    fn test_server_rejects_stale_nonce() {
        let mut server = FakeServer::new(KEY, |_| Ok("birdy".to_string()));

        let mut opener = Packet::new(KEY);
        server.feed(&opener.to_bytes().unwrap());
        let issued = parse_frame(KEY, &server.sent[0]).nonce().unwrap();

        // A command packet carrying a different nonce is refused.
        let mut rogue = Packet::new(KEY)
            .with_nonce(issued.wrapping_add(1))
            .with_command("status");
        server.feed(&rogue.to_bytes().unwrap());

        let message = server.done.as_ref().unwrap().as_ref().unwrap_err();
        assert!(message.contains("nonce"), "{message}");
        // The refusal went to the peer as an error packet.
        let last = server.sent.last().unwrap();
        let mut decoder = Decoder::new();
        decoder.extend(last);
        let body = decoder.decode_frame().unwrap().unwrap();
        assert!(matches!(
            Packet::parse(KEY, &body),
            Err(rndc_protocol::ProtocolError::ServerError(_))
        ));
    }

    #[test]
    #[should_panic(expected = "already started")]
    fn test_start_twice_panics() {
        let mut client = ClientSession::new(KEY, None);
        client.start();
        client.start();
    }

    #[test]
    #[should_panic(expected = "not started")]
    fn test_next_before_start_panics() {
        let mut client = ClientSession::new(KEY, None);
        client.next(None);
    }

    #[test]
    #[should_panic(expected = "already terminated")]
    fn test_next_after_failure_panics() {
        let mut client = ClientSession::new(KEY, Some("status"));
        client.start();
        client.next(None);
        // Garbage that fails frame decoding terminates the session.
        let event = client.next(Some(&[0xff; 64]));
        assert!(matches!(event, SessionEvent::Failed(_)));
        client.next(None);
    }
}
