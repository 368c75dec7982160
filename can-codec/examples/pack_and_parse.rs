//! Round-trip demo: pack a command, replay it through a parser.
//!
//! Writes a small Honda-flavored DBC to a temp directory, packs a HUD
//! command four times (rolling counter and checksum filled in by the
//! packer), then feeds the frames back through a parser and prints the
//! decoded values and health flags.
//!
//! Usage:
//!   cargo run --example pack_and_parse

use anyhow::Result;
use can_codec::{CanData, CanFrame, CanPacker, CanParser, DbcRegistry};
use std::collections::HashMap;

const DEMO_DBC: &str = concat!(
    "BO_ 780 LKAS_HUD: 8 ADAS\n",
    " SG_ SET_ME_X41 : 7|8@0+ (1,0) [0|255] \"\" BDY\n",
    " SG_ STEERING_REQUIRED : 15|1@0+ (1,0) [0|1] \"\" BDY\n",
    " SG_ BEEP : 14|2@0+ (1,0) [0|3] \"\" BDY\n",
    " SG_ SOLID_LANES : 12|1@0+ (1,0) [0|1] \"\" BDY\n",
    " SG_ COUNTER : 61|2@0+ (1,0) [0|3] \"\" BDY\n",
    " SG_ CHECKSUM : 59|4@0+ (1,0) [0|15] \"\" BDY\n",
);

fn main() -> Result<()> {
    env_logger::init();

    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("honda_demo.dbc"), DEMO_DBC)?;
    let registry = DbcRegistry::new(dir.path());

    let mut packer = CanPacker::new(&registry, "honda_demo")?;
    let mut parser = CanParser::new(&registry, "honda_demo", &[("LKAS_HUD", 10u32)], 0)?;

    let values = HashMap::from([
        ("SET_ME_X41".to_string(), 0x41 as f64),
        ("STEERING_REQUIRED".to_string(), 1.0),
    ]);

    for i in 0..4u64 {
        let msg = packer.make_can_msg("LKAS_HUD", 0, &values);
        println!("tx 0x{:03X}: {:02X?}", msg.address, msg.data);

        let updated = parser.update(&[CanData {
            nanos: i * 100_000_000,
            frames: vec![CanFrame {
                address: msg.address,
                bus: msg.bus,
                data: msg.data,
            }],
        }]);

        if let Some(vl) = parser.vl("LKAS_HUD") {
            println!(
                "rx {:?}: COUNTER={} CHECKSUM={} can_valid={}",
                updated,
                vl["COUNTER"],
                vl["CHECKSUM"],
                parser.can_valid()
            );
        }
    }

    Ok(())
}
