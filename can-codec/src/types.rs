//! Core types for the CAN codec library
//!
//! This module defines the frame/batch types exchanged with the transport
//! layer and the error type for construction-time failures. Runtime
//! data-quality faults (bad checksums, counter skips, stale messages) are
//! never errors - they surface through the parser's aggregate flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Maximum payload length of a CAN FD frame in bytes
pub const MAX_FRAME_LEN: usize = 64;

/// A raw CAN frame as received from (or destined for) a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub address: u32,
    /// Source bus number (e.g., 0, 1, 2...)
    pub bus: u8,
    /// Frame payload (0-8 bytes for classic CAN, up to 64 for CAN FD)
    pub data: Vec<u8>,
}

/// One poll's worth of frames, stamped with the capture time.
///
/// The transport layer materializes these; the parser only consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanData {
    /// Capture timestamp in nanoseconds since epoch
    pub nanos: u64,
    /// All frames observed in this poll, in arrival order
    pub frames: Vec<CanFrame>,
}

impl CanData {
    /// Convert the capture timestamp to DateTime<Utc>
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = (self.nanos / 1_000_000_000) as i64;
        let nsecs = (self.nanos % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_else(Utc::now)
    }
}

/// An outbound message produced by the packer, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanMessage {
    /// CAN message ID
    pub address: u32,
    /// Destination bus number
    pub bus: u8,
    /// Packed payload; empty when the message name was unknown
    pub data: Vec<u8>,
}

/// Errors raised at construction time
///
/// These all indicate a caller or DBC-authoring mistake, not a transient
/// condition, so they fail fast.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("DBC file not found: {0:?}")]
    DbcNotFound(PathBuf),

    #[error("failed to read DBC file {path:?}: {source}")]
    DbcRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("duplicate message address 0x{address:X} in {dbc}")]
    DuplicateAddress { dbc: String, address: u32 },

    #[error("duplicate signal {signal} in message {message}")]
    DuplicateSignal { message: String, signal: String },

    #[error("signal {signal} in {dbc} does not match the family checksum layout: {reason}")]
    ChecksumLayout {
        dbc: String,
        signal: String,
        reason: String,
    },

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("duplicate subscription for address 0x{0:X}")]
    DuplicateSubscription(u32),
}
