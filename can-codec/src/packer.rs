//! Signal encoder
//!
//! Turns a dictionary of physical signal values into a wire frame: inverse
//! scale/offset, two's-complement encoding, rolling-counter bookkeeping and
//! vendor checksum injection. One packer instance serves one driver; its
//! only state is the per-address counter memory.

use crate::dbc::{Dbc, DbcRegistry, MsgRef, Signal};
use crate::types::{CanMessage, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Encodes symbolic values into CAN frames for one DBC.
pub struct CanPacker {
    dbc: Arc<Dbc>,
    /// Last emitted counter value per address
    counters: HashMap<u32, u64>,
}

impl CanPacker {
    pub fn new(registry: &DbcRegistry, dbc_name: &str) -> Result<Self> {
        Ok(Self {
            dbc: registry.load(dbc_name)?,
            counters: HashMap::new(),
        })
    }

    /// Pack physical values into a frame for the given address.
    ///
    /// The result always has the message's declared length, zero-padded;
    /// unknown addresses yield an empty payload. Signals not supplied stay
    /// zero. If the message declares a rolling counter and the caller did
    /// not set it, the packer continues its own sequence for that address.
    /// The checksum is always written last, over the fully populated
    /// buffer - every vendor algorithm is defined over (or deliberately
    /// excludes only) its own byte.
    pub fn pack(&mut self, address: u32, values: &HashMap<String, f64>) -> Vec<u8> {
        let Some(msg) = self.dbc.message(address) else {
            log::warn!("cannot pack unknown address 0x{:X}", address);
            return Vec::new();
        };
        let mut buf = vec![0u8; msg.size];

        let mut counter_set = false;
        for (name, &physical) in values {
            let Some(sig) = msg.signal(name) else {
                log::warn!("undefined signal {} for address 0x{:X}", name, address);
                continue;
            };
            let raw = physical_to_raw(sig, physical);
            sig.pack_raw(&mut buf, raw);
            if sig.is_counter {
                self.counters.insert(address, raw);
                counter_set = true;
            }
        }

        if !counter_set {
            if let Some(sig) = msg.counter_signal() {
                let mask = if sig.size < 64 {
                    (1u64 << sig.size) - 1
                } else {
                    u64::MAX
                };
                let counter = self.counters.entry(address).or_insert(0);
                sig.pack_raw(&mut buf, *counter);
                *counter = counter.wrapping_add(1) & mask;
            }
        }

        if let Some(sig) = msg.checksum_signal() {
            if let Some(checksum) = sig.calc_checksum(address, &buf) {
                sig.pack_raw(&mut buf, checksum);
            }
        }

        buf
    }

    /// Pack a message addressed by name or address, ready for a bus.
    ///
    /// Unknown messages yield an empty payload; callers treat that as
    /// "nothing to send".
    pub fn make_can_msg<'a>(
        &mut self,
        msg: impl Into<MsgRef<'a>>,
        bus: u8,
        values: &HashMap<String, f64>,
    ) -> CanMessage {
        let key = msg.into();
        let Some(address) = self.dbc.message(key).map(|m| m.address) else {
            log::warn!("cannot pack unknown message {:?}", key);
            return CanMessage {
                address: 0,
                bus,
                data: Vec::new(),
            };
        };
        CanMessage {
            address,
            bus,
            data: self.pack(address, values),
        }
    }
}

/// Inverse of the decode transform, rounding half away from zero upward.
fn physical_to_raw(sig: &Signal, physical: f64) -> u64 {
    let raw = ((physical - sig.offset) / sig.factor + 0.5).floor() as i64;
    if sig.size < 64 {
        (raw as u64) & ((1u64 << sig.size) - 1)
    } else {
        raw as u64
    }
}
