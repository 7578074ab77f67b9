// palisade/src/stats.rs
//
// Single-pass value statistics driving parser selection and UTF-16
// detection, plus the sample-type classifier used to confirm learned
// parameter types.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

// ── Value stats ───────────────────────────────────────────────────────────────

/// Per-value feature vector, computed in one pass.
#[derive(Debug, Clone, Default)]
pub struct ValueStats {
    pub has_char_slash:      bool,
    pub has_char_colon:      bool,
    pub has_char_ampersand:  bool,
    pub has_char_equal:      bool,
    pub has_two_chars_equal: bool,
    pub has_char_semicolon:  bool,
    pub has_char_pipe:       bool,
    pub has_char_less:       bool,
    pub has_double_quote:    bool,
    pub has_space:           bool,
    /// Longest ASCII-NUL run over [even, odd] byte offsets.
    pub longest_zeros_seq:   [u32; 2],
    pub is_utf16:            bool,
    pub can_split_semicolon: bool,
    pub can_split_pipe:      bool,
    pub is_url_encoded:      bool,
}

#[inline]
fn is_alpha_ascii_fast(ch: u8) -> bool {
    (ch | 32).wrapping_sub(b'a') < 26
}

// URL-encoded likelihood: every %HH decodes, remaining bytes are URL-safe,
// and at least one escape is present.
fn check_url_encoded(buf: &[u8]) -> bool {
    let mut hex_to_follow = 0;
    let mut has_encoded_value = false;

    for &ch in buf {
        if hex_to_follow > 0 {
            hex_to_follow -= 1;
            if ch.is_ascii_hexdigit() {
                continue;
            }
            return false;
        }
        if ch == b'%' {
            has_encoded_value = true;
            hex_to_follow = 2;
            continue;
        }
        if is_alpha_ascii_fast(ch) || ch.is_ascii_digit() {
            continue;
        }
        match ch {
            b'.' | b'-' | b'_' | b'~' | b'!' | b'*' | b'\'' | b'(' | b')' | b';' | b':'
            | b'@' | b'&' | b'=' | b'+' | b'$' | b',' | b'/' | b'?' | b'#' | b'[' | b']' => {}
            _ => return false,
        }
    }

    has_encoded_value && hex_to_follow == 0
}

impl ValueStats {
    pub fn new(cur_val: &[u8]) -> Self {
        let mut stats = ValueStats {
            can_split_semicolon: true,
            can_split_pipe: true,
            ..Default::default()
        };

        if cur_val.is_empty() {
            stats.can_split_semicolon = false;
            stats.can_split_pipe = false;
            return stats;
        }

        // UTF-16 candidate: longer than 2 bytes and an even byte count.
        stats.is_utf16 = cur_val.len() > 2 && cur_val.len() % 2 == 0;

        let mut zeros_seq = [0u32; 2];
        let mut last_nul = false;

        for (i, &ch) in cur_val.iter().enumerate() {
            match ch {
                b'/' => stats.has_char_slash = true,
                b':' => stats.has_char_colon = true,
                b'&' => stats.has_char_ampersand = true,
                b'=' => {
                    if stats.has_char_equal {
                        stats.has_two_chars_equal = true;
                    }
                    stats.has_char_equal = true;
                }
                b';' => stats.has_char_semicolon = true,
                b'|' => stats.has_char_pipe = true,
                b'<' => stats.has_char_less = true,
                b'"' => stats.has_double_quote = true,
                _ => {}
            }

            if ch.is_ascii_whitespace() {
                stats.has_space = true;
            }

            let index = i % 2;
            if ch == 0 {
                if last_nul {
                    // a NUL pair cancels UTF-16 candidacy unless it terminates the buffer
                    if stats.is_utf16 && index == 1 && i + 1 < cur_val.len() {
                        stats.is_utf16 = false;
                    }
                    zeros_seq = [0, 0];
                } else {
                    zeros_seq[index] += 1;
                    stats.longest_zeros_seq[index] =
                        stats.longest_zeros_seq[index].max(zeros_seq[index]);
                }
                last_nul = true;
            } else {
                zeros_seq[index] = 0;
                last_nul = false;
            }

            let alnum = is_alpha_ascii_fast(ch) || ch.is_ascii_digit();

            if stats.can_split_semicolon && !alnum {
                match ch {
                    b'.' | b'-' | b'_' | b'=' | b',' | b'(' | b')' | b';' => {}
                    _ => stats.can_split_semicolon = false,
                }
            }

            if stats.can_split_pipe && !alnum {
                match ch {
                    b':' | b'?' | b'.' | b'-' | b'_' | b'=' | b',' | b'[' | b']' | b'/'
                    | b' ' | 0x0C | 0x0B | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'|' => {}
                    _ => stats.can_split_pipe = false,
                }
            }
        }

        // Both NUL-run lengths too short: not worth decoding as UTF-16.
        if stats.longest_zeros_seq[0] <= 2 && stats.longest_zeros_seq[1] <= 2 {
            stats.is_utf16 = false;
        }

        stats.is_url_encoded = check_url_encoded(cur_val);
        stats
    }
}

// ── Sample classifier ─────────────────────────────────────────────────────────

fn format_magic_binary_re() -> &'static regex::bytes::Regex {
    static RE: OnceLock<regex::bytes::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // common binary container magics: images, archives, executables
        regex::bytes::Regex::new(
            r"(?s-u)^(\x89PNG|GIF8[79]a|\xff\xd8\xff|PK\x03\x04|%PDF-|\x7fELF|\x1f\x8b|\x00\x00\x01\x00)",
        )
        .expect("binary magic regex")
    })
}

/// True when a value is binary payload: multiple NULs or a known magic.
pub fn is_binary_sample(value: &[u8]) -> bool {
    let nul_count = value.iter().filter(|&&c| c == 0).count();
    if nul_count >= 2 {
        return true;
    }
    format_magic_binary_re().is_match(&value[..value.len().min(16)])
}

/// WBXML: version byte 1..3 followed by a plausible public-id/charset pair
/// and a small string-table length.
pub fn is_wbxml_sample(value: &[u8]) -> bool {
    if value.len() < 4 {
        return false;
    }
    let version = value[0];
    if !(1..=3).contains(&version) {
        return false;
    }
    let charset_plausible = matches!(value[2], 0x03 | 0x04 | 0x6A | 0x00);
    charset_plausible && value[3] < 0x30
}

/// A named sample-type regex for the per-asset classifier.
pub struct SampleType {
    pub name: String,
    pub re:   Regex,
}

/// Classify a value against the asset's type regexes plus the built-in
/// binary and WBXML probes. Unclassified samples contribute "unknown".
pub fn sample_type(value: &[u8], types: &[SampleType]) -> HashSet<String> {
    let mut found = HashSet::new();

    if is_binary_sample(value) {
        found.insert("binary_input".to_string());
    }
    if is_wbxml_sample(value) {
        found.insert("wbxml_input".to_string());
    }

    let text = String::from_utf8_lossy(value);
    for t in types {
        if t.re.is_match(&text) {
            found.insert(t.name.clone());
        }
    }

    if found.is_empty() {
        found.insert("unknown".to_string());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value() {
        let s = ValueStats::new(b"");
        assert!(!s.can_split_semicolon);
        assert!(!s.can_split_pipe);
        assert!(!s.is_utf16);
    }

    #[test]
    fn delimiter_flags() {
        let s = ValueStats::new(b"a=b&c=d;e|f</x:y\"");
        assert!(s.has_char_equal && s.has_two_chars_equal);
        assert!(s.has_char_ampersand && s.has_char_semicolon && s.has_char_pipe);
        assert!(s.has_char_less && s.has_char_colon && s.has_char_slash);
        assert!(s.has_double_quote);
    }

    #[test]
    fn semicolon_split_allowed_bytes() {
        assert!(ValueStats::new(b"a;b;c").can_split_semicolon);
        assert!(ValueStats::new(b"a.1;b-2;c_3").can_split_semicolon);
        // '/' is not in the semicolon allow-set
        assert!(!ValueStats::new(b"a/b;c").can_split_semicolon);
    }

    #[test]
    fn pipe_split_allowed_bytes() {
        assert!(ValueStats::new(b"a|b|c").can_split_pipe);
        assert!(ValueStats::new(b"x:1|y/2|z 3").can_split_pipe);
        assert!(!ValueStats::new(b"a<b|c").can_split_pipe);
    }

    #[test]
    fn utf16_not_fired_on_isolated_zeros() {
        // pure-ASCII with isolated zero bytes: runs never exceed 2
        let v = b"ab\0cd\0ef\0gh\0ij\0kl";
        assert!(!ValueStats::new(v).is_utf16);
    }

    #[test]
    fn utf16_fires_on_alternating_zeros() {
        let v: Vec<u8> = b"text".iter().flat_map(|&c| [0u8, c]).collect();
        assert!(v.len() >= 4);
        assert!(ValueStats::new(&v).is_utf16);
    }

    #[test]
    fn utf16_cancelled_by_inner_nul_pair() {
        let mut v: Vec<u8> = b"text".iter().flat_map(|&c| [0u8, c]).collect();
        v.splice(2..2, [0u8, 0u8]);
        assert!(!ValueStats::new(&v).is_utf16);
    }

    #[test]
    fn url_encoded_detection() {
        assert!(ValueStats::new(b"a%20b").is_url_encoded);
        assert!(ValueStats::new(b"%41%42%43").is_url_encoded);
        assert!(!ValueStats::new(b"plain text").is_url_encoded); // no escapes
        assert!(!ValueStats::new(b"100% sure").is_url_encoded); // broken escape
    }

    #[test]
    fn binary_probe() {
        assert!(is_binary_sample(b"\x00x\x00y"));
        assert!(is_binary_sample(b"\x89PNG\r\n\x1a\n rest"));
        assert!(!is_binary_sample(b"hello"));
    }

    #[test]
    fn wbxml_probe() {
        assert!(is_wbxml_sample(&[0x03, 0x01, 0x6A, 0x00, 0x45]));
        assert!(!is_wbxml_sample(b"text"));
        assert!(!is_wbxml_sample(&[0x09, 0x01, 0x6A, 0x00]));
    }

    #[test]
    fn unknown_classification() {
        let types = vec![SampleType {
            name: "html_input".into(),
            re:   Regex::new(r"(?i)<[a-z]+").unwrap(),
        }];
        assert!(sample_type(b"<div>x</div>", &types).contains("html_input"));
        assert!(sample_type(b"just words", &types).contains("unknown"));
    }
}
