//! Gateway WebSocket client.
//!
//! Opens a connection (optionally with a proxy session cookie), runs the
//! `connect` handshake with challenge-nonce binding and device signing, then
//! multiplexes requests over the socket and forwards server-pushed events.

pub mod connection;
pub mod error;
pub mod handshake;
pub mod options;
pub mod state;
pub mod transport;

pub use {
    connection::{EventSender, GatewayClient, GatewayConnector},
    error::{Error, Result},
    options::ClientOptions,
    state::{Closure, ConnectionPhase, ConnectionStatus},
    transport::CookieSource,
};
