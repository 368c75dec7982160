//! Vendor checksum and counter policies
//!
//! Each supported vehicle family fixes where its checksum/counter live in a
//! frame and how the checksum is computed. The family is selected once per
//! DBC by filename prefix; the algorithm is bound to the signal at parse
//! time as a [`ChecksumKind`], so the hot encode/decode path never touches
//! strings. All calculation functions are pure: `(address, signal, frame)
//! -> raw value`.

use crate::dbc::Signal;
use serde::{Deserialize, Serialize};

/// Closed set of vendor checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Nibble sum of address and data, low nibble of the last byte
    Honda,
    /// Byte sum of length, address and all-but-last data byte
    Toyota,
    /// Byte sum of address and data from index 1
    Subaru,
    /// Bit-serial 8-bit state machine, inverted output
    Chrysler,
    /// XOR of every byte except the checksum's own
    Xor,
    /// CRC-8 poly 0xD5 walked backward from the second-to-last byte
    Body,
    /// CRC-8 poly 0x2F with per-address pad constants (MQB/MEB platforms)
    VolkswagenMqb,
    /// CRC-16 XMODEM folded with the address, length-keyed final XOR
    HkgCanFd,
    /// CRC-8 poly 0x1D with per-address final XOR
    FcaGiorgio,
    /// Byte sum of address and data except the checksum's own byte
    Tesla,
}

/// How a family marks its checksum/counter signals in the DBC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalNaming {
    /// Signals literally named `CHECKSUM` / `COUNTER`
    Exact,
    /// Signals named by suffix, e.g. `DAS_steeringControlChecksum`
    Suffix,
}

/// Per-family checksum/counter layout and algorithm descriptor.
///
/// Start bits are taken modulo 8 so the constraint holds for any message
/// length; `None` means the family does not constrain that property.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumPolicy {
    pub kind: ChecksumKind,
    pub checksum_size: u16,
    pub checksum_start_bit: Option<u16>,
    pub counter_size: Option<u16>,
    pub counter_start_bit: Option<u16>,
    pub little_endian: bool,
    pub naming: SignalNaming,
}

impl ChecksumPolicy {
    /// Select the enforcement policy for a DBC by filename prefix.
    ///
    /// Unlisted prefixes get no policy: their `CHECKSUM`/`COUNTER` signals
    /// pass through unverified.
    pub fn for_dbc(dbc_name: &str) -> Option<ChecksumPolicy> {
        let p = |kind,
                 checksum_size,
                 checksum_start_bit,
                 counter_size,
                 counter_start_bit,
                 little_endian,
                 naming| {
            ChecksumPolicy {
                kind,
                checksum_size,
                checksum_start_bit,
                counter_size,
                counter_start_bit,
                little_endian,
                naming,
            }
        };
        use ChecksumKind::*;
        use SignalNaming::*;
        if starts_with_any(dbc_name, &["honda_", "acura_"]) {
            Some(p(Honda, 4, Some(3), Some(2), Some(5), false, Exact))
        } else if starts_with_any(dbc_name, &["toyota_", "lexus_"]) {
            Some(p(Toyota, 8, Some(7), None, None, false, Exact))
        } else if dbc_name.starts_with("hyundai_canfd") {
            Some(p(HkgCanFd, 16, Some(0), None, None, true, Exact))
        } else if starts_with_any(dbc_name, &["vw_mqb", "vw_meb"]) {
            Some(p(VolkswagenMqb, 8, Some(0), Some(4), Some(0), true, Exact))
        } else if starts_with_any(dbc_name, &["vw_pq", "vw_golf_mk4"]) {
            Some(p(Xor, 8, Some(0), Some(4), None, true, Exact))
        } else if dbc_name.starts_with("subaru_global_") {
            Some(p(Subaru, 8, Some(0), None, None, true, Exact))
        } else if dbc_name.starts_with("chrysler_") {
            Some(p(Chrysler, 8, Some(7), None, None, false, Exact))
        } else if dbc_name.starts_with("fca_giorgio") {
            Some(p(FcaGiorgio, 8, Some(7), Some(4), None, false, Exact))
        } else if dbc_name.starts_with("comma_body") {
            Some(p(Body, 8, Some(7), Some(4), Some(3), false, Exact))
        } else if dbc_name.starts_with("tesla_model3_party") {
            Some(p(Tesla, 8, None, Some(8), None, true, Suffix))
        } else {
            None
        }
    }

    /// Classify a signal name under this policy's naming rule.
    pub fn role_of(&self, signal_name: &str) -> Option<SignalRole> {
        match self.naming {
            SignalNaming::Exact => match signal_name {
                "CHECKSUM" => Some(SignalRole::Checksum),
                "COUNTER" => Some(SignalRole::Counter),
                _ => None,
            },
            SignalNaming::Suffix => {
                if signal_name.ends_with("Checksum") {
                    Some(SignalRole::Checksum)
                } else if signal_name.ends_with("Counter") {
                    Some(SignalRole::Counter)
                } else {
                    None
                }
            }
        }
    }
}

/// Role a signal plays under a family policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRole {
    Checksum,
    Counter,
}

fn starts_with_any(name: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p))
}

// CRC lookup tables, built once by the standard bit-by-bit construction.

const fn crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC8_H2F: [u8; 256] = crc8_table(0x2F);
static CRC8_J1850: [u8; 256] = crc8_table(0x1D);
static CRC16_XMODEM: [u16; 256] = crc16_table(0x1021);

/// Compute a vendor checksum over a frame.
///
/// `signal` is the checksum signal itself; the algorithms that exclude
/// their own byte locate it through the signal's bit position.
pub fn calculate(kind: ChecksumKind, address: u32, signal: &Signal, data: &[u8]) -> u64 {
    if data.is_empty() {
        return 0;
    }
    match kind {
        ChecksumKind::Honda => honda(address, data),
        ChecksumKind::Toyota => toyota(address, data),
        ChecksumKind::Subaru => subaru(address, data),
        ChecksumKind::Chrysler => chrysler(data),
        ChecksumKind::Xor => xor(signal, data),
        ChecksumKind::Body => body(data),
        ChecksumKind::VolkswagenMqb => volkswagen_mqb(address, data),
        ChecksumKind::HkgCanFd => hkg_can_fd(address, data),
        ChecksumKind::FcaGiorgio => fca_giorgio(address, data),
        ChecksumKind::Tesla => tesla(address, signal, data),
    }
}

/// Nibble sum over address and payload, checksum in the low nibble of the
/// last byte. Extended addresses get a constant offset.
fn honda(address: u32, data: &[u8]) -> u64 {
    let extended = address > 0x7FF;
    let mut s: i64 = 0;
    let mut addr = address;
    while addr > 0 {
        s += i64::from(addr & 0xF);
        addr >>= 4;
    }
    for (i, &byte) in data.iter().enumerate() {
        let mut x = byte;
        if i == data.len() - 1 {
            x >>= 4; // checksum's own nibble
        }
        s += i64::from(x & 0xF) + i64::from(x >> 4);
    }
    s = 8 - s;
    if extended {
        s += 3;
    }
    (s & 0xF) as u64
}

fn toyota(address: u32, data: &[u8]) -> u64 {
    let mut s = data.len() as u32;
    let mut addr = address;
    while addr > 0 {
        s += addr & 0xFF;
        addr >>= 8;
    }
    for &byte in &data[..data.len() - 1] {
        s += u32::from(byte);
    }
    u64::from(s & 0xFF)
}

fn subaru(address: u32, data: &[u8]) -> u64 {
    let mut s: u32 = 0;
    let mut addr = address;
    while addr > 0 {
        s += addr & 0xFF;
        addr >>= 8;
    }
    // checksum occupies byte 0
    for &byte in &data[1..] {
        s += u32::from(byte);
    }
    u64::from(s & 0xFF)
}

/// Bit-serial state machine used on Chrysler platforms. Not a polynomial
/// CRC; the update rule folds each payload bit into an 8-bit state
/// MSB-first, and the final state is inverted.
fn chrysler(data: &[u8]) -> u64 {
    let mut checksum: u8 = 0xFF;
    for &byte in &data[..data.len() - 1] {
        let mut shift: u8 = 0x80;
        let curr = byte;
        for _ in 0..8 {
            let mut bit_sum = curr & shift;
            let mut temp_chk = checksum & 0x80;
            if bit_sum != 0 {
                bit_sum = 0x1C;
                if temp_chk != 0 {
                    bit_sum = 1;
                }
                checksum <<= 1;
                temp_chk = checksum | 1;
                bit_sum ^= temp_chk;
            } else {
                if temp_chk != 0 {
                    bit_sum = 0x1D;
                }
                checksum <<= 1;
                bit_sum ^= checksum;
            }
            checksum = bit_sum;
            shift >>= 1;
        }
    }
    u64::from(!checksum)
}

/// XOR of every byte except the checksum's own.
fn xor(signal: &Signal, data: &[u8]) -> u64 {
    let own_byte = (signal.start_bit / 8) as usize;
    let mut checksum: u8 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i != own_byte {
            checksum ^= byte;
        }
    }
    u64::from(checksum)
}

/// CRC-8 poly 0xD5, walked backward from the second-to-last byte.
fn body(data: &[u8]) -> u64 {
    const POLY: u8 = 0xD5;
    let mut crc: u8 = 0xFF;
    for &byte in data[..data.len() - 1].iter().rev() {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    u64::from(crc)
}

/// CRC-8 poly 0x2F seeded 0xFF over the payload after the checksum byte,
/// folded with a per-address pad constant indexed by the counter's low
/// nibble, final XOR 0xFF.
fn volkswagen_mqb(address: u32, data: &[u8]) -> u64 {
    let mut crc: u8 = 0xFF;
    for &byte in &data[1..] {
        crc = CRC8_H2F[usize::from(crc ^ byte)];
    }
    let counter = data.get(1).copied().unwrap_or(0) & 0x0F;
    if let Some(magic) = mqb_pad(address) {
        crc ^= magic[usize::from(counter)];
    }
    crc = CRC8_H2F[usize::from(crc)];
    u64::from(crc ^ 0xFF)
}

/// Counter-indexed pad constants for the MQB/MEB messages this codec
/// transmits or verifies. Addresses without an entry fold nothing.
fn mqb_pad(address: u32) -> Option<&'static [u8; 16]> {
    match address {
        // LWI_01
        0x86 => Some(&[0x86; 16]),
        // LH_EPS_03
        0x9F => Some(&[0xF5; 16]),
        // Getriebe_11
        0xAD => Some(&[
            0x3F, 0x69, 0x39, 0xDC, 0x94, 0xF9, 0x14, 0x64, 0xD8, 0x6A, 0x34, 0xCE, 0xA2, 0x55,
            0xB5, 0x2C,
        ]),
        // ESP_21
        0xFD => Some(&[
            0xB4, 0xEF, 0xF8, 0x49, 0x1E, 0xE5, 0xC2, 0xC0, 0x97, 0x19, 0x3C, 0xC9, 0xF1, 0x98,
            0x4B, 0x42,
        ]),
        // ESP_05
        0x106 => Some(&[0x07; 16]),
        // HCA_01
        0x126 => Some(&[0xDA; 16]),
        // GRA_ACC_01
        0x12B => Some(&[0x6A; 16]),
        // ACC_02
        0x30C => Some(&[0x0F; 16]),
        // ACC_04
        0x324 => Some(&[0x27; 16]),
        // Klemmen_Status_01
        0x3C0 => Some(&[0xC3; 16]),
        _ => None,
    }
}

/// CRC-16 XMODEM over the payload from index 2, folded with both address
/// bytes, then XORed with a frame-length-keyed constant.
fn hkg_can_fd(address: u32, data: &[u8]) -> u64 {
    let mut crc: u16 = 0;
    let step = |crc: u16, byte: u8| -> u16 {
        (crc << 8) ^ CRC16_XMODEM[usize::from((crc >> 8) as u8 ^ byte)]
    };
    if let Some(payload) = data.get(2..) {
        for &byte in payload {
            crc = step(crc, byte);
        }
    }
    crc = step(crc, (address & 0xFF) as u8);
    crc = step(crc, ((address >> 8) & 0xFF) as u8);
    crc ^= match data.len() {
        8 => 0x5F29,
        16 => 0x041D,
        24 => 0x819D,
        32 => 0x9F5B,
        _ => 0,
    };
    u64::from(crc)
}

/// CRC-8 poly 0x1D over all-but-last byte, per-address final XOR.
fn fca_giorgio(address: u32, data: &[u8]) -> u64 {
    let mut crc: u8 = 0;
    for &byte in &data[..data.len() - 1] {
        crc = CRC8_J1850[usize::from(crc ^ byte)];
    }
    u64::from(crc ^ giorgio_xor(address))
}

fn giorgio_xor(address: u32) -> u8 {
    match address {
        0xDE => 0x10,
        0xEE => 0x89,
        0xFA => 0xB3,
        0x101 => 0x5A,
        0x179 => 0xA9,
        _ => 0x00,
    }
}

/// Byte sum of both address bytes and all data except the checksum's own
/// byte. Checksum/counter signals are identified by name suffix on this
/// platform, not by literal name.
fn tesla(address: u32, signal: &Signal, data: &[u8]) -> u64 {
    let own_byte = (signal.start_bit / 8) as usize;
    let mut s = (address & 0xFF) + ((address >> 8) & 0xFF);
    for (i, &byte) in data.iter().enumerate() {
        if i != own_byte {
            s += u32::from(byte);
        }
    }
    u64::from(s & 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_signal(start_bit: u16, size: u16, little_endian: bool) -> Signal {
        let (msb, lsb) = if little_endian {
            (start_bit + size - 1, start_bit)
        } else {
            (start_bit, start_bit + 1 - size)
        };
        Signal {
            name: "CHECKSUM".to_string(),
            start_bit,
            msb,
            lsb,
            size,
            is_signed: false,
            factor: 1.0,
            offset: 0.0,
            is_little_endian: little_endian,
            is_counter: false,
            checksum_kind: None,
        }
    }

    #[test]
    fn test_policy_prefix_dispatch() {
        assert_eq!(
            ChecksumPolicy::for_dbc("honda_civic_touring_2016").map(|p| p.kind),
            Some(ChecksumKind::Honda)
        );
        assert_eq!(
            ChecksumPolicy::for_dbc("acura_ilx_2016").map(|p| p.kind),
            Some(ChecksumKind::Honda)
        );
        assert_eq!(
            ChecksumPolicy::for_dbc("lexus_rx_350").map(|p| p.kind),
            Some(ChecksumKind::Toyota)
        );
        assert_eq!(
            ChecksumPolicy::for_dbc("vw_meb_id4").map(|p| p.kind),
            Some(ChecksumKind::VolkswagenMqb)
        );
        assert!(ChecksumPolicy::for_dbc("gm_global_a").is_none());
    }

    #[test]
    fn test_naming_rules() {
        let honda = ChecksumPolicy::for_dbc("honda_fit").unwrap();
        assert_eq!(honda.role_of("CHECKSUM"), Some(SignalRole::Checksum));
        assert_eq!(honda.role_of("COUNTER"), Some(SignalRole::Counter));
        assert_eq!(honda.role_of("SPEED"), None);

        let tesla = ChecksumPolicy::for_dbc("tesla_model3_party").unwrap();
        assert_eq!(
            tesla.role_of("DAS_steeringControlChecksum"),
            Some(SignalRole::Checksum)
        );
        assert_eq!(
            tesla.role_of("DAS_steeringControlCounter"),
            Some(SignalRole::Counter)
        );
        assert_eq!(tesla.role_of("CHECKSUM"), None);
    }

    #[test]
    fn test_honda_nibble_sum() {
        // address 0x201 -> nibbles 2+0+1 = 3; data nibbles 1+2 = 3,
        // checksum nibble excluded from the last byte
        let sig = checksum_signal(59, 4, false);
        let data = [0x12, 0, 0, 0, 0, 0, 0, 0x00];
        assert_eq!(calculate(ChecksumKind::Honda, 0x201, &sig, &data), 2);
        // extended id adds 3
        assert_eq!(calculate(ChecksumKind::Honda, 0x1201, &sig, &data), 4);
    }

    #[test]
    fn test_honda_ignores_own_nibble() {
        let sig = checksum_signal(59, 4, false);
        let clean = [0x12, 0, 0, 0, 0, 0, 0, 0x00];
        let stamped = [0x12, 0, 0, 0, 0, 0, 0, 0x02];
        assert_eq!(
            calculate(ChecksumKind::Honda, 0x201, &sig, &clean),
            calculate(ChecksumKind::Honda, 0x201, &sig, &stamped)
        );
    }

    #[test]
    fn test_toyota_byte_sum() {
        // 0x2E4 -> 0x02 + 0xE4 = 230, length 8, first seven bytes sum 28
        let sig = checksum_signal(63, 8, false);
        let data = [1, 2, 3, 4, 5, 6, 7, 0xFF];
        assert_eq!(
            calculate(ChecksumKind::Toyota, 0x2E4, &sig, &data),
            (230 + 8 + 28) & 0xFF
        );
    }

    #[test]
    fn test_subaru_skips_checksum_byte() {
        let sig = checksum_signal(0, 8, true);
        let data = [0xFF, 1, 2, 3];
        assert_eq!(
            calculate(ChecksumKind::Subaru, 0x119, &sig, &data),
            (0x19 + 0x01 + 6) & 0xFF
        );
    }

    #[test]
    fn test_xor_skips_own_byte() {
        let sig = checksum_signal(0, 8, true);
        let data = [0xAA, 1, 2, 3];
        assert_eq!(calculate(ChecksumKind::Xor, 0x3C0, &sig, &data), 1 ^ 2 ^ 3);
    }

    #[test]
    fn test_tesla_sum_skips_own_byte() {
        // checksum lives in byte 3
        let sig = checksum_signal(24, 8, true);
        let data = [1, 2, 3, 0xFF, 5];
        assert_eq!(
            calculate(ChecksumKind::Tesla, 0x118, &sig, &data),
            (0x18 + 0x01 + 1 + 2 + 3 + 5) & 0xFF
        );
    }

    #[test]
    fn test_crc_tables_match_bitwise() {
        for i in [0usize, 1, 0x42, 0x80, 0xFF] {
            let mut crc8 = i as u8;
            for _ in 0..8 {
                crc8 = if crc8 & 0x80 != 0 {
                    (crc8 << 1) ^ 0x2F
                } else {
                    crc8 << 1
                };
            }
            assert_eq!(CRC8_H2F[i], crc8);

            let mut crc16 = (i as u16) << 8;
            for _ in 0..8 {
                crc16 = if crc16 & 0x8000 != 0 {
                    (crc16 << 1) ^ 0x1021
                } else {
                    crc16 << 1
                };
            }
            assert_eq!(CRC16_XMODEM[i], crc16);
        }
    }

    #[test]
    fn test_chrysler_detects_corruption() {
        let sig = checksum_signal(63, 8, false);
        let data = [1, 2, 3, 4, 5, 6, 7, 0];
        let mut corrupted = data;
        corrupted[2] ^= 0x01;
        let clean = calculate(ChecksumKind::Chrysler, 0x2A6, &sig, &data);
        let bad = calculate(ChecksumKind::Chrysler, 0x2A6, &sig, &corrupted);
        assert!(clean <= 0xFF);
        assert_ne!(clean, bad);
    }

    #[test]
    fn test_hkg_length_constant() {
        let sig = checksum_signal(0, 16, true);
        let short = [0u8; 8];
        let long = [0u8; 16];
        let c8 = calculate(ChecksumKind::HkgCanFd, 0x1A0, &sig, &short);
        let c16 = calculate(ChecksumKind::HkgCanFd, 0x1A0, &sig, &long);
        assert_ne!(c8, c16);
        assert!(c8 <= 0xFFFF && c16 <= 0xFFFF);
    }

    #[test]
    fn test_mqb_pad_depends_on_counter() {
        // Getriebe_11 carries a counter-varying pad table; two frames with
        // the same payload CRC input but different counter nibbles must
        // not collide
        let sig = checksum_signal(0, 8, true);
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a[1] = 0x00;
        b[1] = 0x0F;
        let ca = calculate(ChecksumKind::VolkswagenMqb, 0xAD, &sig, &a);
        let cb = calculate(ChecksumKind::VolkswagenMqb, 0xAD, &sig, &b);
        assert_ne!(ca, cb);
    }

    #[test]
    fn test_body_backward_crc() {
        let sig = checksum_signal(39, 8, false);
        let data = [0x01, 0x02, 0x03, 0x04, 0x00];
        let value = calculate(ChecksumKind::Body, 0x250, &sig, &data);
        assert!(value <= 0xFF);
        // last byte (the checksum's own) is excluded
        let mut stamped = data;
        stamped[4] = value as u8;
        assert_eq!(calculate(ChecksumKind::Body, 0x250, &sig, &stamped), value);
    }
}
