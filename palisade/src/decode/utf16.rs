// palisade/src/decode/utf16.rs
//
// UTF-16 recovery for values the stats pass flagged as candidates.
// Endianness is inferred from which byte offsets carry the NUL runs.

use crate::stats::ValueStats;

/// Decode a UTF-16 candidate back to the byte stream it encodes.
/// Non-ASCII units are dropped; returns `None` when the stats pass did not
/// flag the value as a candidate.
pub fn decode_utf16_value(stats: &ValueStats, value: &[u8]) -> Option<Vec<u8>> {
    if !stats.is_utf16 || value.len() < 2 {
        return None;
    }

    // NUL runs on even offsets mean the high bytes come first (big endian).
    let big_endian = stats.longest_zeros_seq[0] >= stats.longest_zeros_seq[1];

    let mut out = Vec::with_capacity(value.len() / 2);
    for pair in value.chunks_exact(2) {
        let unit = if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        };
        if unit != 0 && unit <= 0xFF {
            out.push(unit as u8);
        }
    }
    Some(out)
}
