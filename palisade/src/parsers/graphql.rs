// palisade/src/parsers/graphql.rs
//
// GraphQL document tokenizer. Emits operation names, variable names and
// their default values, plus string literals (the usual injection carrier).

use super::{kvflags, push_capped, KvSink, ParseError, Parser};

pub struct GraphqlParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
}

impl GraphqlParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
        }
    }
}

/// Quick shape probe for the deep parser.
pub fn looks_like_graphql(value: &[u8]) -> bool {
    let trimmed: Vec<u8> = value
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .collect();
    trimmed.starts_with(b"query")
        || trimmed.starts_with(b"mutation")
        || trimmed.starts_with(b"subscription")
        || trimmed.starts_with(b"fragment")
        || (trimmed.first() == Some(&b'{') && value.iter().any(|&b| b == b'{') && !value.contains(&b'"'))
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl Parser for GraphqlParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        let buf = &self.buf;
        let mut i = 0;

        while i < buf.len() {
            let ch = buf[i];

            // string literal
            if ch == b'"' {
                let start = i + 1;
                let mut j = start;
                while j < buf.len() && buf[j] != b'"' {
                    if buf[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                out.on_kv(b"", &buf[start..j.min(buf.len())], kvflags::BOTH | kvflags::UNNAMED, self.depth);
                i = j + 1;
                continue;
            }

            // variable: $name
            if ch == b'$' {
                let start = i + 1;
                let mut j = start;
                while j < buf.len() && is_name_byte(buf[j]) {
                    j += 1;
                }
                if j > start {
                    out.on_kv(b"variable", &buf[start..j], kvflags::BOTH, self.depth);
                }
                i = j;
                continue;
            }

            // operation keyword followed by a name
            if ch.is_ascii_alphabetic() {
                let start = i;
                let mut j = i;
                while j < buf.len() && is_name_byte(buf[j]) {
                    j += 1;
                }
                let word = &buf[start..j];
                if matches!(word, b"query" | b"mutation" | b"subscription" | b"fragment") {
                    let mut k = j;
                    while k < buf.len() && buf[k].is_ascii_whitespace() {
                        k += 1;
                    }
                    let name_start = k;
                    while k < buf.len() && is_name_byte(buf[k]) {
                        k += 1;
                    }
                    if k > name_start {
                        out.on_kv(b"operation", &buf[name_start..k], kvflags::BOTH, self.depth);
                    }
                    i = k;
                    continue;
                }
                i = j;
                continue;
            }

            i += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "graphql"
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::KvPair;

    fn run(input: &[u8]) -> Vec<KvPair> {
        let mut out = Vec::new();
        let mut p = GraphqlParser::new(0);
        p.push(input, &mut out).unwrap();
        p.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn operation_and_variables() {
        let kvs = run(b"query GetUser($id: ID!) { user(id: $id) { name } }");
        assert!(kvs.iter().any(|kv| kv.key == b"operation" && kv.value == b"GetUser"));
        assert!(kvs.iter().any(|kv| kv.key == b"variable" && kv.value == b"id"));
    }

    #[test]
    fn string_literals_emit() {
        let kvs = run(br#"mutation M { login(user: "admin' OR 1=1") }"#);
        assert!(kvs.iter().any(|kv| kv.value == b"admin' OR 1=1"));
    }

    #[test]
    fn probe() {
        assert!(looks_like_graphql(b"query Q { a }"));
        assert!(looks_like_graphql(b"  mutation M { x }"));
        assert!(!looks_like_graphql(b"user=admin"));
    }
}
