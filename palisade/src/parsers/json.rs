// palisade/src/parsers/json.rs
//
// JSON value parser. Input is buffered and walked on finish; leaves emit
// with dotted keys, array indices appear in the key path. Malformed JSON
// flags an error and the deep parser scans the raw bytes instead.

use super::{push_capped, KvSink, ParseError, Parser};
use super::kvflags;
use serde_json::Value;

pub struct JsonParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
    error:     bool,
}

impl JsonParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
            error: false,
        }
    }

    fn walk(&self, key: &str, value: &Value, out: &mut dyn KvSink) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let child = if key.is_empty() { k.clone() } else { format!("{}.{}", key, k) };
                    self.walk(&child, v, out);
                }
            }
            Value::Array(items) => {
                for (idx, v) in items.iter().enumerate() {
                    let child = if key.is_empty() {
                        idx.to_string()
                    } else {
                        format!("{}.{}", key, idx)
                    };
                    self.walk(&child, v, out);
                }
            }
            Value::String(s) => out.on_kv(key.as_bytes(), s.as_bytes(), kvflags::BOTH, self.depth),
            Value::Number(n) => {
                out.on_kv(key.as_bytes(), n.to_string().as_bytes(), kvflags::BOTH, self.depth)
            }
            Value::Bool(b) => {
                out.on_kv(key.as_bytes(), if *b { b"true" } else { b"false" }, kvflags::BOTH, self.depth)
            }
            Value::Null => {}
        }
    }
}

impl Parser for JsonParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        if self.error {
            return Ok(0);
        }
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        match serde_json::from_slice::<Value>(&self.buf) {
            Ok(value) => {
                self.walk("", &value, out);
                Ok(())
            }
            Err(_) => {
                self.error = true;
                Err(ParseError::Malformed("json"))
            }
        }
    }

    fn name(&self) -> &'static str {
        "json"
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
        let mut p = JsonParser::new(0);
        p.push(input, &mut out).unwrap();
        p.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn dotted_keys() {
        let kvs = run(br#"{"user":{"name":"admin","roles":["a","b"]}}"#);
        let keys: Vec<String> =
            kvs.iter().map(|kv| String::from_utf8_lossy(&kv.key).into_owned()).collect();
        assert_eq!(keys, vec!["user.name", "user.roles.0", "user.roles.1"]);
    }

    #[test]
    fn scalars_stringified() {
        let kvs = run(br#"{"n":42,"b":true}"#);
        assert_eq!(kvs[0].value, b"42");
        assert_eq!(kvs[1].value, b"true");
    }

    #[test]
    fn malformed_sets_error() {
        let mut out: Vec<KvPair> = Vec::new();
        let mut p = JsonParser::new(0);
        p.push(b"{broken", &mut out).unwrap();
        assert!(p.finish(&mut out).is_err());
        assert!(p.error());
        assert!(out.is_empty());
    }

    #[test]
    fn chunking_invariance() {
        let input = br#"{"a":{"b":"c"},"d":[1,2]}"#;
        let whole = run(input);
        let mut out = Vec::new();
        let mut p = JsonParser::new(0);
        for b in input.iter() {
            p.push(std::slice::from_ref(b), &mut out).unwrap();
        }
        p.finish(&mut out).unwrap();
        assert_eq!(out, whole);
    }
}
