//! Protocol error types.

/// Protocol version spoken by this build. The handshake rejects peers that
/// announce anything else.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum size of a single frame payload.
///
/// Large enough for a generous file-upload chunk, small enough that a bogus
/// length prefix cannot drive an allocation spike.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Errors raised by the framing layer and the handshake.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A frame announced a payload larger than [`MAX_FRAME_SIZE`].
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Announced payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the connection in the middle of an exchange.
    #[error("connection closed while waiting for {0}")]
    UnexpectedEof(&'static str),

    /// A frame payload did not decode as the expected message.
    #[error("malformed {context} frame")]
    Decode {
        /// Which message was expected.
        context: &'static str,
        /// Underlying decode failure.
        #[source]
        source: prost::DecodeError,
    },

    /// The peer announced a protocol version this build does not speak.
    #[error("unsupported protocol version {peer} (this build speaks {local})")]
    VersionMismatch {
        /// Version announced by the peer.
        peer: u32,
        /// Version spoken locally.
        local: u32,
    },

    /// The server refused the handshake.
    #[error("handshake refused: {0}")]
    Refused(String),

    /// Transport-level I/O failure.
    #[error("transport error")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::Decode`].
    pub fn decode(context: &'static str, source: prost::DecodeError) -> Self {
        Self::Decode { context, source }
    }
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
