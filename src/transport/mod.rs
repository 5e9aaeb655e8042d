pub mod websocket;

use crate::models::websocket::{ InboundFrame, OutboundFrame };
use std::fmt;

pub use self::websocket::WsTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    /// Closed and Errored both mean no further chunks should be expected.
    pub fn is_down(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Everything a transport reports back to its owner. Frames may still
/// arrive after a `StateChanged(Closed)` has been queued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(InboundFrame),
    StateChanged(ConnectionState),
}

/// Duplex channel to the execution backend.
///
/// `send` is fire-and-forget: when the transport is not `Open` the frame is
/// logged and dropped, never reported as an error.
pub trait Transport: Send + Sync {
    fn send(&self, frame: OutboundFrame);

    fn state(&self) -> ConnectionState;

    fn close(&self);
}
