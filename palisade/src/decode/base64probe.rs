// palisade/src/decode/base64probe.rs
//
// Opportunistic base64 detection used by the deep parser. A value that
// decodes cleanly is replaced by its decoded form (and rescanned under a
// "#base64" key-path fragment); a "key=chunk" shape recurses with the
// discovered pair; anything else is left as-is.

use base64::Engine;

/// Outcome of probing a value for base64 content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum B64Variant {
    /// The whole value was a base64 chunk; carry the decoded bytes.
    SingleChunkConvert(Vec<u8>),
    /// The value looked like `key=<base64>`; carry the discovered pair.
    KeyValuePair(String, Vec<u8>),
    ContinueAsIs,
}

const MIN_CHUNK_LEN: usize = 8;

fn is_b64_byte(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'+' || ch == b'/'
}

// A chunk qualifies when it is long enough, uses only the base64 alphabet
// with optional trailing padding, and shows the mixed-case shape real
// encodings have (an all-digit or single-case run is a misdetect).
fn is_b64_candidate(chunk: &[u8]) -> bool {
    if chunk.len() < MIN_CHUNK_LEN || chunk.len() % 4 != 0 {
        return false;
    }
    let body_len = chunk.iter().take_while(|&&c| is_b64_byte(c)).count();
    let padding = chunk.len() - body_len;
    if padding > 2 || !chunk[body_len..].iter().all(|&c| c == b'=') {
        return false;
    }
    let has_upper = chunk[..body_len].iter().any(|c| c.is_ascii_uppercase());
    let has_lower = chunk[..body_len].iter().any(|c| c.is_ascii_lowercase());
    (has_upper && has_lower) || padding > 0
}

// Decoded content with too many non-printables is binary noise, not a
// peeled encoding layer. Threshold matches the scanner's binary check.
fn acceptable(decoded: &[u8]) -> bool {
    if decoded.is_empty() {
        return false;
    }
    let non_printable = decoded
        .iter()
        .filter(|&&ch| !(ch.is_ascii_graphic() || ch == b' ' || ch == b'\t' || ch == b'\r' || ch == b'\n'))
        .count();
    non_printable * 32 < decoded.len() * 10
}

/// Decode one base64 chunk; `None` when the chunk is not a clean decode.
pub fn b64_decode_chunk(chunk: &[u8]) -> Option<Vec<u8>> {
    if !is_b64_candidate(chunk) {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD.decode(chunk).ok()?;
    acceptable(&decoded).then_some(decoded)
}

/// Probe a value for base64 content.
pub fn b64_test(value: &[u8]) -> B64Variant {
    if let Some(decoded) = b64_decode_chunk(value) {
        return B64Variant::SingleChunkConvert(decoded);
    }

    // key=<base64> pair: a single '=' separating a word-shaped key from a chunk
    if let Some(eq) = value.iter().position(|&c| c == b'=') {
        let (key, rest) = (&value[..eq], &value[eq + 1..]);
        let key_ok = !key.is_empty()
            && key.iter().all(|&c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-');
        if key_ok {
            if let Some(decoded) = b64_decode_chunk(rest) {
                return B64Variant::KeyValuePair(
                    String::from_utf8_lossy(key).into_owned(),
                    decoded,
                );
            }
        }
    }

    B64Variant::ContinueAsIs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk() {
        let v = b"PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==";
        match b64_test(v) {
            B64Variant::SingleChunkConvert(decoded) => {
                assert_eq!(decoded, b"<script>alert(1)</script>");
            }
            other => panic!("expected single chunk, got {:?}", other),
        }
    }

    #[test]
    fn key_value_pair() {
        let v = b"data=PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==";
        match b64_test(v) {
            B64Variant::KeyValuePair(key, decoded) => {
                assert_eq!(key, "data");
                assert_eq!(decoded, b"<script>alert(1)</script>");
            }
            other => panic!("expected pair, got {:?}", other),
        }
    }

    #[test]
    fn plain_text_continues() {
        assert_eq!(b64_test(b"hello world"), B64Variant::ContinueAsIs);
        assert_eq!(b64_test(b"12345678"), B64Variant::ContinueAsIs);
        assert_eq!(b64_test(b"user=admin"), B64Variant::ContinueAsIs);
    }

    #[test]
    fn probe_is_idempotent_after_convert() {
        let v = b"PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==";
        let decoded = match b64_test(v) {
            B64Variant::SingleChunkConvert(d) => d,
            other => panic!("unexpected {:?}", other),
        };
        // re-probing the decoded value leaves it alone
        assert_eq!(b64_test(&decoded), B64Variant::ContinueAsIs);
    }

    #[test]
    fn binary_decode_rejected() {
        // decodes to high-entropy binary: not a peeled layer
        let v = b"/////////////w==";
        assert_eq!(b64_test(v), B64Variant::ContinueAsIs);
    }
}
