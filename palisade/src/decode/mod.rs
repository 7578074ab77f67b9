// palisade/src/decode/mod.rs
//
// Byte-level decoders feeding the scanner: the layered unescape pipeline,
// the base64 probe, and UTF-16 recovery.

pub mod base64probe;
pub mod entities;
pub mod unescape;
pub mod utf16;

pub use base64probe::{b64_decode_chunk, b64_test, B64Variant};
pub use unescape::{
    contains_broken_utf8, contains_invalid_utf8, unescape, unescape_broken_utf8,
    unescape_invalid_utf8, unescape_unicode, unquote_plus,
};
pub use utf16::decode_utf16_value;
