//! Error type shared by every bridge component.

use thiserror::Error;

/// Everything that can go wrong between the wire and the engine.
///
/// Per-message errors (`MalformedEnvelope`, `InvalidEventField`,
/// `UnknownEvent`) are local to one client message. Snapshot errors are local
/// to one load attempt. `MissingRom` and `RomRead` are fatal at startup.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("{event} event: invalid field \"{field}\": {reason}")]
    InvalidEventField {
        event: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("unknown event type \"{0}\"")]
    UnknownEvent(String),

    #[error("wrong state save magic {found:02X?}")]
    SnapshotMagicMismatch { found: [u8; 4] },

    #[error("unsupported state save version {found} (expected {expected})")]
    SnapshotVersionMismatch { found: u8, expected: u8 },

    #[error("state save is {actual} bytes (expected {expected})")]
    SnapshotLength { expected: usize, actual: usize },

    #[error("ROM image is {actual} bytes (expected {expected})")]
    RomLength { expected: usize, actual: usize },

    #[error("no ROM supplied before emulation start")]
    MissingRom,

    #[error("cannot pack {len} bits: length is not a multiple of 8")]
    InvalidLength { len: usize },

    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("cannot read ROM: {0}")]
    RomRead(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn field(event: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidEventField { event, field, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
