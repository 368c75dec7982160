//! DBC file parser
//!
//! Parses the `BO_`/`SG_`/`VAL_` subset of the Vector DBC grammar into the
//! immutable model. DBC files are often hand-maintained and full of
//! constructs this codec has no use for, so any unrecognized or malformed
//! line is skipped, not errored. Structural violations (duplicate
//! addresses, duplicate signal names, checksum signals that contradict the
//! vendor layout) do error: those are authoring mistakes, not noise.

use crate::checksums::{ChecksumPolicy, SignalRole};
use crate::dbc::model::{Dbc, Message, Signal, ValueTables};
use crate::types::{CodecError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Motorola bit traversal order: within each byte the walk runs from bit 7
/// down to bit 0, then continues at bit 7 of the next byte. A big-endian
/// signal starts at its msb and its lsb sits `size - 1` steps further along
/// this sequence.
static BE_BITS: [u16; 512] = build_be_bits();

const fn build_be_bits() -> [u16; 512] {
    let mut table = [0u16; 512];
    let mut byte = 0;
    while byte < 64 {
        let mut j = 0;
        while j < 8 {
            table[byte * 8 + j] = (7 - j as u16) + (byte as u16) * 8;
            j += 1;
        }
        byte += 1;
    }
    table
}

fn be_lsb(start_bit: u16, size: u16) -> Option<u16> {
    let idx = (start_bit / 8) * 8 + 7 - (start_bit % 8);
    let end = usize::from(idx) + usize::from(size) - 1;
    BE_BITS.get(end).copied()
}

/// Compiled line grammar. Two `SG_` variants handle the optional
/// multiplexer token.
struct LineGrammar {
    bo: Regex,
    sg: Regex,
    sg_mux: Regex,
    val: Regex,
    val_entry: Regex,
}

impl LineGrammar {
    fn new() -> Self {
        const SG_TAIL: &str =
            r#"(\d+)\|(\d+)@(\d+)([+-]) \(([0-9.+\-eE]+),([0-9.+\-eE]+)\) \[[^\]]*\] "[^"]*".*"#;
        Self {
            bo: Regex::new(r"^BO_ (\d+) (\w+) *: (\d+) (\w+)").unwrap(),
            sg: Regex::new(&format!(r"^SG_ (\w+) : {SG_TAIL}")).unwrap(),
            sg_mux: Regex::new(&format!(r"^SG_ (\w+) (\w+) *: {SG_TAIL}")).unwrap(),
            val: Regex::new(r#"^VAL_ (\d+) (\w+)((?:\s+-?\d+\s+"[^"]*")+)\s*;?"#).unwrap(),
            val_entry: Regex::new(r#"(-?\d+)\s+"([^"]*)""#).unwrap(),
        }
    }
}

/// Parse a DBC file into the signal database model.
///
/// The DBC name is the file stem; it selects the vendor checksum policy.
/// Fails when the file is absent or a structural invariant is violated.
pub fn parse_dbc(path: &Path) -> Result<Dbc> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CodecError::DbcNotFound(path.to_path_buf())
        } else {
            CodecError::DbcRead {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    // Try UTF-8 first, then fall back to Latin-1 (hand-maintained DBC
    // files frequently carry Windows-1252 unit strings)
    let content = String::from_utf8(bytes).unwrap_or_else(|e| {
        log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
        e.into_bytes().iter().map(|&b| b as char).collect()
    });

    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    let grammar = LineGrammar::new();
    let policy = ChecksumPolicy::for_dbc(&name);

    let mut messages: Vec<Message> = Vec::new();
    let mut value_tables: ValueTables = HashMap::new();

    for (line_num, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.starts_with("BO_ ") {
            match parse_bo(&grammar, line) {
                Some(msg) => messages.push(msg),
                None => log::debug!("skipping malformed BO_ at {}:{}", name, line_num + 1),
            }
        } else if line.starts_with("SG_ ") {
            let Some(msg) = messages.last_mut() else {
                log::debug!("skipping SG_ before any BO_ at {}:{}", name, line_num + 1);
                continue;
            };
            match parse_sg(&grammar, line) {
                Some(mut signal) => {
                    classify_signal(&mut signal, policy.as_ref(), &name)?;
                    msg.add_signal(signal)?;
                }
                None => log::debug!("skipping malformed SG_ at {}:{}", name, line_num + 1),
            }
        } else if line.starts_with("VAL_ ") {
            parse_val(&grammar, line, &mut value_tables);
        }
    }

    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Dbc::new(name, messages, value_tables)
}

fn parse_bo(grammar: &LineGrammar, line: &str) -> Option<Message> {
    let caps = grammar.bo.captures(line)?;
    let address: u32 = caps[1].parse().ok()?;
    let name = caps[2].to_string();
    let size: usize = caps[3].parse().ok()?;
    Some(Message::new(name, address, size))
}

fn parse_sg(grammar: &LineGrammar, line: &str) -> Option<Signal> {
    // The mux variant has an extra token before the colon; try the plain
    // shape first
    let (caps, base) = match grammar.sg.captures(line) {
        Some(caps) => (caps, 2),
        None => (grammar.sg_mux.captures(line)?, 3),
    };
    let name = caps[1].to_string();
    let start_bit: u16 = caps[base].parse().ok()?;
    let size: u16 = caps[base + 1].parse().ok()?;
    let is_little_endian = &caps[base + 2] == "1";
    let is_signed = &caps[base + 3] == "-";
    let factor: f64 = caps[base + 4].parse().ok()?;
    let offset: f64 = caps[base + 5].parse().ok()?;

    if size == 0 || size > 64 {
        return None;
    }
    let (msb, lsb) = if is_little_endian {
        let msb = start_bit.checked_add(size - 1)?;
        if msb >= 512 {
            return None;
        }
        (msb, start_bit)
    } else {
        (start_bit, be_lsb(start_bit, size)?)
    };

    Some(Signal {
        name,
        start_bit,
        msb,
        lsb,
        size,
        is_signed,
        factor,
        offset,
        is_little_endian,
        is_counter: false,
        checksum_kind: None,
    })
}

fn parse_val(grammar: &LineGrammar, line: &str, value_tables: &mut ValueTables) {
    let Some(caps) = grammar.val.captures(line) else {
        return;
    };
    let Ok(address) = caps[1].parse::<u32>() else {
        return;
    };
    let signal = caps[2].to_string();
    let table = value_tables
        .entry(address)
        .or_default()
        .entry(signal)
        .or_default();
    for entry in grammar.val_entry.captures_iter(&caps[3]) {
        if let Ok(raw) = entry[1].parse::<i64>() {
            table.insert(raw, entry[2].to_string());
        }
    }
}

/// Bind the vendor checksum/counter role to a freshly parsed signal.
///
/// A signal that matches the family naming rule but contradicts the
/// family's layout is an authoring error: verifying against the wrong bits
/// would be worse than failing here.
fn classify_signal(
    signal: &mut Signal,
    policy: Option<&ChecksumPolicy>,
    dbc_name: &str,
) -> Result<()> {
    let Some(policy) = policy else {
        return Ok(());
    };
    let layout_err = |reason: String| CodecError::ChecksumLayout {
        dbc: dbc_name.to_string(),
        signal: signal.name.clone(),
        reason,
    };
    match policy.role_of(&signal.name) {
        Some(SignalRole::Checksum) => {
            if signal.size != policy.checksum_size {
                return Err(layout_err(format!(
                    "expected {} bits, got {}",
                    policy.checksum_size, signal.size
                )));
            }
            if let Some(start) = policy.checksum_start_bit {
                if signal.start_bit % 8 != start {
                    return Err(layout_err(format!(
                        "expected start bit {} (mod 8), got {}",
                        start, signal.start_bit
                    )));
                }
            }
            if signal.is_little_endian != policy.little_endian {
                return Err(layout_err("endianness mismatch".to_string()));
            }
            signal.checksum_kind = Some(policy.kind);
        }
        Some(SignalRole::Counter) => {
            if let Some(size) = policy.counter_size {
                if signal.size != size {
                    return Err(layout_err(format!(
                        "expected {} counter bits, got {}",
                        size, signal.size
                    )));
                }
            }
            if let Some(start) = policy.counter_start_bit {
                if signal.start_bit % 8 != start {
                    return Err(layout_err(format!(
                        "expected counter start bit {} (mod 8), got {}",
                        start, signal.start_bit
                    )));
                }
            }
            signal.is_counter = true;
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_dbc(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".dbc")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_simple_dbc() {
        let file = write_dbc(
            r#"
VERSION ""

NS_ :
    CM_
    BA_

BS_:

BU_: ECU1 ECU2

BO_ 291 EngineData: 8 ECU1
 SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] "rpm" ECU2
 SG_ EngineTemp : 16|8@1+ (1,-40) [-40|215] "C" ECU2

BO_ 512 BatteryStatus: 8 ECU1
 SG_ BatteryVoltage : 0|16@1+ (0.01,0) [0|16] "V" ECU2
"#,
        );
        let dbc = parse_dbc(file.path()).unwrap();
        assert_eq!(dbc.messages().len(), 2);

        let msg = dbc.message(291u32).unwrap();
        assert_eq!(msg.name, "EngineData");
        assert_eq!(msg.size, 8);
        assert_eq!(msg.signals().len(), 2);

        let sig = msg.signal("EngineSpeed").unwrap();
        assert_eq!(sig.start_bit, 0);
        assert_eq!(sig.size, 16);
        assert_eq!(sig.factor, 1.0);
        assert!(sig.is_little_endian);
        assert!(!sig.is_signed);

        let temp = msg.signal("EngineTemp").unwrap();
        assert_eq!(temp.offset, -40.0);

        assert!(dbc.message("BatteryStatus").is_some());
        assert!(dbc.message(0x999u32).is_none());
    }

    #[test]
    fn test_multiplexer_token_tolerated() {
        let file = write_dbc(
            r#"
BO_ 512 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
"#,
        );
        let dbc = parse_dbc(file.path()).unwrap();
        let msg = dbc.message(512u32).unwrap();
        assert_eq!(msg.signals().len(), 2);
        assert_eq!(msg.signal("SignalA").unwrap().start_bit, 8);
    }

    #[test]
    fn test_big_endian_bit_layout() {
        let file = write_dbc(
            r#"
BO_ 780 HUD: 8 ECU1
 SG_ WIDE : 7|16@0+ (1,0) [0|65535] "" ECU2
 SG_ NIBBLE : 59|4@0+ (1,0) [0|15] "" ECU2
"#,
        );
        let dbc = parse_dbc(file.path()).unwrap();
        let msg = dbc.message("HUD").unwrap();

        let wide = msg.signal("WIDE").unwrap();
        assert_eq!((wide.msb, wide.lsb), (7, 8));

        let nibble = msg.signal("NIBBLE").unwrap();
        assert_eq!((nibble.msb, nibble.lsb), (59, 56));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let file = write_dbc(
            r#"
BO_ not_a_number Broken: 8 ECU1
BO_ 291 Good: 8 ECU1
 SG_ Valid : 0|8@1+ (1,0) [0|255] "" ECU2
 SG_ Broken 0|8@1+ missing colon
 SG_ TooWide : 0|72@1+ (1,0) [0|0] "" ECU2
some freeform comment line
"#,
        );
        let dbc = parse_dbc(file.path()).unwrap();
        assert_eq!(dbc.messages().len(), 1);
        assert_eq!(dbc.message(291u32).unwrap().signals().len(), 1);
    }

    #[test]
    fn test_duplicate_address_errors() {
        let file = write_dbc(
            "BO_ 291 First: 8 ECU1\nBO_ 291 Second: 8 ECU1\n",
        );
        assert!(matches!(
            parse_dbc(file.path()),
            Err(CodecError::DuplicateAddress { address: 291, .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = parse_dbc(Path::new("/nonexistent/honda_missing.dbc"));
        assert!(matches!(err, Err(CodecError::DbcNotFound(_))));
    }

    #[test]
    fn test_value_table_parsed() {
        let file = write_dbc(
            r#"
BO_ 780 HUD: 8 ECU1
 SG_ BEEP : 14|2@0+ (1,0) [0|3] "" ECU2

VAL_ 780 BEEP 0 "no_beep" 1 "single_beep" 2 "triple_beep" 3 "repeated_beep" ;
"#,
        );
        let dbc = parse_dbc(file.path()).unwrap();
        let table = dbc.value_table("HUD", "BEEP").unwrap();
        assert_eq!(table.get(&0).map(String::as_str), Some("no_beep"));
        assert_eq!(table.get(&3).map(String::as_str), Some("repeated_beep"));
    }

    #[test]
    fn test_honda_signals_classified() {
        let mut file = tempfile::Builder::new()
            .prefix("honda_unit_")
            .suffix(".dbc")
            .tempfile()
            .unwrap();
        file.write_all(
            b"BO_ 780 LKAS_HUD: 8 ADAS\n SG_ COUNTER : 61|2@0+ (1,0) [0|3] \"\" BDY\n SG_ CHECKSUM : 59|4@0+ (1,0) [0|15] \"\" BDY\n",
        )
        .unwrap();
        file.flush().unwrap();

        let dbc = parse_dbc(file.path()).unwrap();
        let msg = dbc.message("LKAS_HUD").unwrap();
        assert!(msg.signal("COUNTER").unwrap().is_counter);
        assert_eq!(
            msg.signal("CHECKSUM").unwrap().checksum_kind,
            Some(ChecksumKind::Honda)
        );
        assert!(msg.counter_signal().is_some());
        assert!(msg.checksum_signal().is_some());
    }

    #[test]
    fn test_unlisted_prefix_left_unbound() {
        let file = write_dbc(
            "BO_ 780 HUD: 8 ECU1\n SG_ CHECKSUM : 59|4@0+ (1,0) [0|15] \"\" ECU2\n",
        );
        let dbc = parse_dbc(file.path()).unwrap();
        let sig = dbc.message("HUD").unwrap().signal("CHECKSUM").unwrap();
        assert!(sig.checksum_kind.is_none());
    }

    #[test]
    fn test_checksum_layout_mismatch_errors() {
        // honda checksums are 4 bits; an 8-bit one is an authoring error
        let mut file = tempfile::Builder::new()
            .prefix("honda_bad_")
            .suffix(".dbc")
            .tempfile()
            .unwrap();
        file.write_all(
            b"BO_ 780 LKAS_HUD: 8 ADAS\n SG_ CHECKSUM : 63|8@0+ (1,0) [0|255] \"\" BDY\n",
        )
        .unwrap();
        file.flush().unwrap();
        assert!(matches!(
            parse_dbc(file.path()),
            Err(CodecError::ChecksumLayout { .. })
        ));
    }

    #[test]
    fn test_be_bits_traversal() {
        // first byte walks 7..0, second byte 15..8
        assert_eq!(&BE_BITS[..10], &[7, 6, 5, 4, 3, 2, 1, 0, 15, 14]);
        assert_eq!(be_lsb(7, 8), Some(0));
        assert_eq!(be_lsb(7, 16), Some(8));
        assert_eq!(be_lsb(59, 4), Some(56));
        // walking off the end of the table is malformed
        assert_eq!(be_lsb(511, 16), None);
    }
}
