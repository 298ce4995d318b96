use rcl_protocol::{ProtocolError, WireError};
use rcl_transport::TransportError;

/// Anything that ends a connection. Validation and driver failures are not
/// errors at this level: they travel back to the client as status codes.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// Raised by handlers; the dispatcher attaches the command.
    #[error("malformed arguments: {0}")]
    Wire(#[from] WireError),
}

impl ConnectionError {
    /// An orderly close by the peer rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::Transport(TransportError::Closed))
    }
}
