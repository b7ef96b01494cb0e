//! # rndc-client
//!
//! Client for the BIND remote control channel (RNDC v1).
//!
//! This crate provides:
//! - A sans-I/O session state machine for the four-packet exchange
//! - An async front-end over tokio TCP
//! - A blocking front-end over a pluggable transport
//! - A completed server role for the other end of the exchange

pub mod blocking;
pub mod client;
pub mod connection;
pub mod error;
pub mod session;

pub use blocking::{BlockingClient, TcpTransport, Transport};
pub use client::RndcClient;
pub use connection::{Connection, RndcConfig};
pub use error::ClientError;
pub use session::{ClientSession, ServerSession, SessionEvent};
