//! Error types for gmcolor-net.

use thiserror::Error;

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on node connections.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame started with a tag that has no entry in the framing table.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// The stream ended in the middle of a frame, or a payload is too short.
    #[error("truncated {context}")]
    Truncated { context: &'static str },

    /// A payload does not have the length its message type requires.
    #[error("{message} payload must be {expected} bytes, got {actual}")]
    PayloadLength {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A delimited payload contains the delimiter byte.
    #[error("{0} payload contains the frame delimiter")]
    EmbeddedDelimiter(&'static str),

    /// No handler is registered for a received message type.
    #[error("no handler registered for {0}")]
    Unhandled(&'static str),

    /// Writing to a peer failed; the connection is now closed.
    #[error("write to peer {peer} failed: {source}")]
    PeerWrite {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection was already closed.
    #[error("connection to {0} is closed")]
    Closed(String),

    /// Node indices announced during the handshake are inconsistent.
    #[error("handshake inconsistency: {0}")]
    Handshake(String),

    /// The pool was used before `register()`.
    #[error("connection pool is not registered")]
    Unregistered,

    /// A handler rejected a message.
    #[error("protocol error: {0}")]
    Protocol(String),
}
