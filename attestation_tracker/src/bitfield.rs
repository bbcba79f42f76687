//! Decoding of hex-encoded SSZ bitfields as returned by the beacon node REST API.
//!
//! Bits are numbered least significant first within each byte and bytes are taken in order.
//! The delimiter bit that terminates an SSZ bitlist is decoded like any other bit.
//! It always lies past the end of the committee it belongs to, so lookups by position
//! skip it naturally.

use bitvec::{order::Lsb0, vec::BitVec};
use log::debug;

pub type Bits = BitVec<u8, Lsb0>;

/// Decodes a hex string with an optional `0x` prefix in either case.
///
/// Empty or malformed input decodes to an empty bitfield.
#[must_use]
pub fn decode(hex_string: &str) -> Bits {
    let digits = hex_string
        .strip_prefix("0x")
        .or_else(|| hex_string.strip_prefix("0X"))
        .unwrap_or(hex_string);

    match hex::decode(digits) {
        Ok(bytes) => Bits::from_vec(bytes),
        Err(error) => {
            debug!("ignoring malformed bitfield {hex_string:?}: {error}");
            Bits::new()
        }
    }
}
