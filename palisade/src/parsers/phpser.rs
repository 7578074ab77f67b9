// palisade/src/parsers/phpser.rs
//
// PHP serialization format: s:len:"...";  i:N;  d:F;  b:0|1;  N;
// a:count:{key;value;...}  O:len:"Class":count:{...}
// Named members of objects and arrays emit with dotted keys.

use super::{kvflags, push_capped, KvSink, ParseError, Parser};

pub struct PhpSerParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
    error:     bool,
}

impl PhpSerParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
            error: false,
        }
    }
}

/// A value is a PHP-serialized candidate when it opens with a node marker.
pub fn looks_like_php_serialized(value: &[u8]) -> bool {
    matches!(
        value,
        [b'a', b':', ..] | [b'O', b':', ..] | [b's', b':', ..] | [b'i', b':', ..]
            | [b'd', b':', ..] | [b'b', b':', ..] | [b'N', b';', ..]
    )
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

enum Node {
    Scalar(Vec<u8>),
    Null,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn expect(&mut self, b: u8) -> Result<(), ParseError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ParseError::Malformed("php-serialized"))
        }
    }

    fn read_int(&mut self) -> Result<i64, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::Malformed("php-serialized"));
        }
        std::str::from_utf8(&self.buf[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(ParseError::Malformed("php-serialized"))
    }

    fn read_number_token(&mut self) -> Result<Vec<u8>, ParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'))
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::Malformed("php-serialized"));
        }
        Ok(self.buf[start..self.pos].to_vec())
    }

    // s:<len>:"<bytes>"
    fn read_string_body(&mut self) -> Result<Vec<u8>, ParseError> {
        self.expect(b':')?;
        let len = self.read_int()? as usize;
        self.expect(b':')?;
        self.expect(b'"')?;
        if self.pos + len > self.buf.len() {
            return Err(ParseError::Malformed("php-serialized"));
        }
        let s = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        self.expect(b'"')?;
        Ok(s)
    }

    fn parse_node(
        &mut self,
        key: &[u8],
        depth: usize,
        sink_depth: usize,
        out: &mut dyn KvSink,
    ) -> Result<Node, ParseError> {
        if depth > 16 {
            return Err(ParseError::DepthLimitExceeded);
        }
        match self.peek() {
            Some(b's') => {
                self.pos += 1;
                let s = self.read_string_body()?;
                self.expect(b';')?;
                Ok(Node::Scalar(s))
            }
            Some(b'i') => {
                self.pos += 1;
                self.expect(b':')?;
                let tok = self.read_number_token()?;
                self.expect(b';')?;
                Ok(Node::Scalar(tok))
            }
            Some(b'd') => {
                self.pos += 1;
                self.expect(b':')?;
                let tok = self.read_number_token()?;
                self.expect(b';')?;
                Ok(Node::Scalar(tok))
            }
            Some(b'b') => {
                self.pos += 1;
                self.expect(b':')?;
                let tok = self.read_number_token()?;
                self.expect(b';')?;
                Ok(Node::Scalar(if tok == b"1" { b"true".to_vec() } else { b"false".to_vec() }))
            }
            Some(b'N') => {
                self.pos += 1;
                self.expect(b';')?;
                Ok(Node::Null)
            }
            Some(b'a') => {
                self.pos += 1;
                self.expect(b':')?;
                let count = self.read_int()?;
                self.expect(b':')?;
                self.parse_members(key, count, depth, sink_depth, out)?;
                Ok(Node::Null)
            }
            Some(b'O') => {
                self.pos += 1;
                let class = self.read_string_body()?;
                self.expect(b':')?;
                let count = self.read_int()?;
                self.expect(b':')?;
                let prefix = join_key(key, &class);
                self.parse_members(&prefix, count, depth, sink_depth, out)?;
                Ok(Node::Null)
            }
            _ => Err(ParseError::Malformed("php-serialized")),
        }
    }

    fn parse_members(
        &mut self,
        prefix: &[u8],
        count: i64,
        depth: usize,
        sink_depth: usize,
        out: &mut dyn KvSink,
    ) -> Result<(), ParseError> {
        self.expect(b'{')?;
        for _ in 0..count {
            let member_key = match self.parse_node(prefix, depth + 1, sink_depth, out)? {
                Node::Scalar(k) => k,
                Node::Null => Vec::new(),
            };
            let full = join_key(prefix, &member_key);
            if let Node::Scalar(v) = self.parse_node(&full, depth + 1, sink_depth, out)? {
                out.on_kv(&full, &v, kvflags::BOTH, sink_depth);
            }
        }
        self.expect(b'}')?;
        Ok(())
    }
}

fn join_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    if prefix.is_empty() {
        key.to_vec()
    } else if key.is_empty() {
        prefix.to_vec()
    } else {
        let mut k = prefix.to_vec();
        k.push(b'.');
        k.extend_from_slice(key);
        k
    }
}

impl Parser for PhpSerParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        if self.error {
            return Ok(0);
        }
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        let mut cur = Cursor { buf: &self.buf, pos: 0 };
        match cur.parse_node(b"", 0, self.depth, out) {
            Ok(Node::Scalar(v)) => {
                out.on_kv(b"", &v, kvflags::BOTH | kvflags::UNNAMED, self.depth);
                Ok(())
            }
            Ok(Node::Null) => Ok(()),
            Err(e) => {
                self.error = true;
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "php-serialized"
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

    fn run(input: &[u8]) -> Vec<KvPair> {
        let mut out = Vec::new();
        let mut p = PhpSerParser::new(0);
        p.push(input, &mut out).unwrap();
        let _ = p.finish(&mut out);
        out
    }

    #[test]
    fn array_members() {
        let kvs = run(br#"a:2:{s:4:"user";s:5:"admin";s:4:"role";i:7;}"#);
        assert!(kvs.iter().any(|kv| kv.key == b"user" && kv.value == b"admin"));
        assert!(kvs.iter().any(|kv| kv.key == b"role" && kv.value == b"7"));
    }

    #[test]
    fn object_members_are_prefixed() {
        let kvs = run(br#"O:4:"User":1:{s:4:"name";s:3:"bob";}"#);
        assert!(kvs.iter().any(|kv| kv.key == b"User.name" && kv.value == b"bob"));
    }

    #[test]
    fn nested_array() {
        let kvs = run(br#"a:1:{s:1:"o";a:1:{s:1:"i";s:1:"v";}}"#);
        assert!(kvs.iter().any(|kv| kv.key == b"o.i" && kv.value == b"v"));
    }

    #[test]
    fn malformed_is_error() {
        let mut out: Vec<KvPair> = Vec::new();
        let mut p = PhpSerParser::new(0);
        p.push(br#"a:9:{s:4:"#, &mut out).unwrap();
        assert!(p.finish(&mut out).is_err());
        assert!(p.error());
    }

    #[test]
    fn candidate_probe() {
        assert!(looks_like_php_serialized(br#"a:1:{s:1:"k";s:1:"v";}"#));
        assert!(looks_like_php_serialized(b"N;"));
        assert!(!looks_like_php_serialized(b"hello"));
    }
}
