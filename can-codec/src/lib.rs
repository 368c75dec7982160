//! CAN Codec Library
//!
//! The binary codec layer of the vehicle integration toolkit: translates
//! between DBC signal dictionaries and raw CAN frames. Per-vehicle driver
//! modules use it to read state signals off a bus and to write actuation
//! commands back onto it.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on the codec:
//! - Parses the `BO_`/`SG_`/`VAL_` subset of the DBC grammar
//! - Packs symbolic values into frames (scaling, counters, checksums)
//! - Decodes frames with checksum/counter verification and freshness
//!   tracking
//! - Supports the vendor checksum algorithms of every integrated platform
//!
//! The library does NOT:
//! - Talk to CAN hardware (the transport feeds frames in and out)
//! - Implement control laws or per-car logic
//! - Author or rewrite DBC files
//!
//! # Example Usage
//!
//! ```no_run
//! use can_codec::{CanData, CanFrame, CanPacker, CanParser, DbcRegistry};
//! use std::collections::HashMap;
//!
//! // One registry per application; DBCs parse once and are shared
//! let registry = DbcRegistry::new("dbc");
//!
//! // Outbound: pack a command, checksum and counter filled in
//! let mut packer = CanPacker::new(&registry, "honda_civic_touring_2016").unwrap();
//! let values = HashMap::from([("STEER_TORQUE".to_string(), 120.0)]);
//! let msg = packer.make_can_msg("STEERING_CONTROL", 0, &values);
//!
//! // Inbound: subscribe, feed polls, read values and health flags
//! let mut parser = CanParser::new(
//!     &registry,
//!     "honda_civic_touring_2016",
//!     &[("STEERING_CONTROL", 100u32)],
//!     0,
//! )
//! .unwrap();
//! let updated = parser.update(&[CanData {
//!     nanos: 0,
//!     frames: vec![CanFrame { address: msg.address, bus: 0, data: msg.data }],
//! }]);
//! println!("updated: {:?}, valid: {}", updated, parser.can_valid());
//! println!("torque: {}", parser.vl("STEERING_CONTROL").unwrap()["STEER_TORQUE"]);
//! ```

// Public modules
pub mod checksums;
pub mod config;
pub mod dbc;
pub mod packer;
pub mod parser;
pub mod types;

// Re-export main types for convenience
pub use checksums::{ChecksumKind, ChecksumPolicy};
pub use config::ParserConfig;
pub use dbc::{parse_dbc, Dbc, DbcRegistry, Define, Message, MsgRef, Signal};
pub use packer::CanPacker;
pub use parser::{CanParser, MAX_BAD_COUNTER};
pub use types::{CanData, CanFrame, CanMessage, CodecError, Result, MAX_FRAME_LEN};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
