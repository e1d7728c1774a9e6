use crate::command::Operation;
use crate::types::Zone;
use thiserror::Error;

/// Result type for EISCP operations
pub type Result<T> = std::result::Result<T, EiscpError>;

/// Malformed frame on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame did not start with the `ISCP` signature
    #[error("bad magic signature {0:02X?}")]
    BadMagic([u8; 4]),

    /// Declared header size is outside the accepted range
    #[error("invalid header size {0}")]
    InvalidHeader(u32),

    /// Declared data size exceeds the frame limit
    #[error("frame data size {0} exceeds limit")]
    Oversized(u32),

    /// Payload did not begin with the `!` start character
    #[error("payload missing start character")]
    MissingStart,
}

/// Errors that can occur when talking to a receiver
#[derive(Error, Debug)]
pub enum EiscpError {
    /// Frame could not be decoded; the connection is dropped and re-established
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Socket-level failure while connecting
    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Connecting did not complete in time
    #[error("Timed out connecting to {host}")]
    ConnectTimeout { host: String },

    /// No confirmation arrived before the deadline
    #[error("Request timeout")]
    Timeout,

    /// Connection dropped while the request was in flight; outcome unknown
    #[error("Connection lost")]
    ConnectionLost,

    /// State subscriber fell behind and missed this many updates; call
    /// `state()` to resync
    #[error("State subscriber lagged by {0} updates")]
    Lagged(u64),

    /// Command issued while the connection is not established
    #[error("Not connected")]
    NotConnected,

    /// Model or zone layout not recognized
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Operation has no code for this zone
    #[error("{operation} is not supported on {zone}")]
    UnsupportedOperation { zone: Zone, operation: Operation },

    /// Receiver answered `N/A`
    #[error("Receiver rejected {operation} on {zone}")]
    Rejected { zone: Zone, operation: Operation },

    /// Message could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Command argument out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Device was not found during discovery
    #[error("Device not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EiscpError {
    /// Whether the command may or may not have reached the receiver.
    ///
    /// Callers use this to decide between retrying and giving up; a
    /// `Rejected` outcome is a confirmed no-op and never needs a retry.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, EiscpError::Timeout | EiscpError::ConnectionLost)
    }
}
