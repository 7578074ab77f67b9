// palisade/src/parsers/html.rs
//
// Tolerant HTML tokenizer. Real-world HTML payloads are routinely
// malformed, so this parser never errors: text runs emit keyed by their
// enclosing tag, attributes emit as "tag.attr", comments pass through.

use super::{kvflags, push_capped, KvSink, ParseError, Parser};

pub struct HtmlParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
}

impl HtmlParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

// Parse `name=value` attributes inside a tag body; values may be quoted
// with single or double quotes or bare.
fn emit_attributes(tag: &[u8], body: &[u8], depth: usize, out: &mut dyn KvSink) {
    let mut i = 0;
    while i < body.len() {
        while i < body.len() && !is_name_byte(body[i]) {
            i += 1;
        }
        let name_start = i;
        while i < body.len() && is_name_byte(body[i]) {
            i += 1;
        }
        if i == name_start {
            break;
        }
        let name = &body[name_start..i];
        while i < body.len() && body[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= body.len() || body[i] != b'=' {
            continue; // bare attribute, nothing to scan
        }
        i += 1;
        while i < body.len() && body[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = if i < body.len() && (body[i] == b'"' || body[i] == b'\'') {
            let quote = body[i];
            i += 1;
            let start = i;
            while i < body.len() && body[i] != quote {
                i += 1;
            }
            let v = &body[start..i];
            i += 1;
            v
        } else {
            let start = i;
            while i < body.len() && !body[i].is_ascii_whitespace() {
                i += 1;
            }
            &body[start..i]
        };
        let mut key = tag.to_vec();
        key.push(b'.');
        key.extend_from_slice(name);
        out.on_kv(&key, value, kvflags::BOTH, depth);
    }
}

impl Parser for HtmlParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        let buf = &self.buf;
        let mut current_tag: Vec<u8> = Vec::new();
        let mut i = 0;

        while i < buf.len() {
            if buf[i] == b'<' {
                // comment
                if buf[i..].starts_with(b"<!--") {
                    let end = find_sub(&buf[i + 4..], b"-->").map(|p| i + 4 + p);
                    let body_end = end.unwrap_or(buf.len());
                    out.on_kv(b"", &buf[i + 4..body_end], kvflags::BOTH | kvflags::UNNAMED, self.depth);
                    i = end.map(|e| e + 3).unwrap_or(buf.len());
                    continue;
                }
                // tag
                let close = buf[i..].iter().position(|&b| b == b'>').map(|p| i + p);
                let tag_end = close.unwrap_or(buf.len());
                let mut inner = &buf[i + 1..tag_end];
                let closing = inner.first() == Some(&b'/');
                if closing {
                    inner = &inner[1..];
                }
                let name_len = inner.iter().take_while(|&&b| is_name_byte(b)).count();
                let name: Vec<u8> =
                    inner[..name_len].iter().map(|b| b.to_ascii_lowercase()).collect();
                if !closing && !name.is_empty() {
                    emit_attributes(&name, &inner[name_len..], self.depth, out);
                    current_tag = name;
                } else if closing {
                    current_tag.clear();
                }
                i = close.map(|c| c + 1).unwrap_or(buf.len());
                continue;
            }

            // text run until the next tag
            let next_tag = buf[i..].iter().position(|&b| b == b'<').map(|p| i + p);
            let end = next_tag.unwrap_or(buf.len());
            let text = &buf[i..end];
            if !text.iter().all(|b| b.is_ascii_whitespace()) {
                out.on_kv(&current_tag, text, kvflags::BOTH, self.depth);
            }
            i = end;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "html"
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Quick lookahead used by the deep parser: does this look like markup
/// opening with a known HTML tag?
pub fn starts_with_html_tag(value: &[u8]) -> bool {
    const TAGS: &[&[u8]] = &[
        b"a", b"b", b"body", b"br", b"div", b"em", b"form", b"h1", b"h2", b"h3", b"head",
        b"html", b"iframe", b"img", b"input", b"li", b"link", b"meta", b"object", b"ol",
        b"option", b"p", b"script", b"select", b"span", b"style", b"svg", b"table", b"td",
        b"textarea", b"tr", b"ul",
    ];
    let rest = match value.strip_prefix(b"<") {
        Some(r) => r,
        None => return false,
    };
    let name_len = rest.iter().take_while(|&&b| is_name_byte(b)).count();
    if name_len == 0 {
        return false;
    }
    let name: Vec<u8> = rest[..name_len].iter().map(|b| b.to_ascii_lowercase()).collect();
    TAGS.contains(&name.as_slice())
}
