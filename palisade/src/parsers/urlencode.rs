// palisade/src/parsers/urlencode.rs
//
// k=v pair parser with a configurable separator. Handles query strings,
// form bodies, and cookie headers ('; ' separated). Keys and values are
// percent-decoded independently; malformed escapes pass through.

use super::{kvflags, push_capped, KvSink, ParseError, Parser};
use crate::decode::unquote_plus;

pub struct UrlEncodeParser {
    separator:      u8,
    decode_percent: bool,
    depth:          usize,
    in_value:       bool,
    key:            Vec<u8>,
    value:          Vec<u8>,
    discarded:      usize,
    emitted_any:    bool,
    error:          bool,
}

impl UrlEncodeParser {
    pub fn new(separator: u8, decode_percent: bool, depth: usize) -> Self {
        Self {
            separator,
            decode_percent,
            depth,
            in_value: false,
            key: Vec::new(),
            value: Vec::new(),
            discarded: 0,
            emitted_any: false,
            error: false,
        }
    }

    fn emit(&mut self, out: &mut dyn KvSink) {
        let key = if self.decode_percent {
            unquote_plus(&self.key, true, true)
        } else {
            self.key.clone()
        };
        let value = if self.decode_percent {
            unquote_plus(&self.value, true, true)
        } else {
            self.value.clone()
        };
        // leading/trailing key spaces come from sloppy "; " style separators
        let key_trimmed: Vec<u8> =
            key.iter().copied().skip_while(|b| b.is_ascii_whitespace()).collect();
        out.on_kv(&key_trimmed, &value, kvflags::BOTH, self.depth);
        self.emitted_any = true;
        self.key.clear();
        self.value.clear();
        self.in_value = false;
    }
}

impl Parser for UrlEncodeParser {
    fn push(&mut self, chunk: &[u8], out: &mut dyn KvSink) -> Result<usize, ParseError> {
        if self.error {
            return Ok(0);
        }
        for &ch in chunk {
            if ch == self.separator {
                self.emit(out);
            } else if ch == b'=' && !self.in_value {
                self.in_value = true;
            } else if self.in_value {
                push_capped(&mut self.value, &[ch], &mut self.discarded);
            } else {
                push_capped(&mut self.key, &[ch], &mut self.discarded);
            }
        }
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        if self.error {
            return Ok(());
        }
        if !self.key.is_empty() || self.in_value || !self.emitted_any {
            self.emit(out);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "urlencode"
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn error(&self) -> bool {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::KvPair;

    fn run(input: &[u8], sep: u8) -> Vec<KvPair> {
        let mut out = Vec::new();
        let mut p = UrlEncodeParser::new(sep, true, 0);
        p.push(input, &mut out).unwrap();
        p.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn basic_pairs() {
        let kvs = run(b"a=1&b=2", b'&');
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].key, b"a");
        assert_eq!(kvs[0].value, b"1");
        assert_eq!(kvs[1].key, b"b");
        assert_eq!(kvs[1].value, b"2");
    }

    #[test]
    fn percent_and_plus_decoding() {
        let kvs = run(b"user=adm%69n+x", b'&');
        assert_eq!(kvs[0].value, b"admin x");
    }

    #[test]
    fn malformed_escape_passthrough() {
        let kvs = run(b"k=%zz", b'&');
        assert_eq!(kvs[0].value, b"%zz");
    }

    #[test]
    fn key_without_value() {
        let kvs = run(b"p&a=b&k", b'&');
        assert_eq!(kvs.len(), 3);
        assert_eq!(kvs[0].key, b"p");
        assert_eq!(kvs[0].value, b"");
        assert_eq!(kvs[2].key, b"k");
    }

    #[test]
    fn equals_inside_value() {
        let kvs = run(b"q=1=2", b'&');
        assert_eq!(kvs[0].value, b"1=2");
    }

    #[test]
    fn cookie_style_separator() {
        let kvs = run(b"sid=abc; theme=dark", b';');
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[1].key, b"theme");
        assert_eq!(kvs[1].value, b"dark");
    }

    #[test]
    fn chunking_invariance() {
        let input = b"alpha=one&beta=two&gamma=three";
        let whole = run(input, b'&');
        for split in 1..input.len() {
            let mut out = Vec::new();
            let mut p = UrlEncodeParser::new(b'&', true, 0);
            p.push(&input[..split], &mut out).unwrap();
            p.push(&input[split..], &mut out).unwrap();
            p.finish(&mut out).unwrap();
            assert_eq!(out, whole, "split at {}", split);
        }
    }
}
