// palisade/src/parsers/multipart.rs
//
// multipart/form-data parser. Needs the boundary from the enclosing
// content-type; each part's name comes from its Content-Disposition
// header and the part body emits as one value (the deep parser walks
// it recursively).

use super::{kvflags, push_capped, KvSink, ParseError, Parser};

pub struct MultipartParser {
    boundary:  Vec<u8>,
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
    error:     bool,
}

impl MultipartParser {
    pub fn new(boundary: &[u8], depth: usize) -> Self {
        let mut b = b"--".to_vec();
        b.extend_from_slice(boundary);
        Self {
            boundary: b,
            depth,
            buf: Vec::new(),
            discarded: 0,
            error: false,
        }
    }
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// `name="..."` / `filename="..."` from a Content-Disposition line.
fn disposition_param(headers: &[u8], param: &[u8]) -> Option<Vec<u8>> {
    let lower: Vec<u8> = headers.iter().map(|b| b.to_ascii_lowercase()).collect();
    let mut needle = param.to_vec();
    needle.push(b'=');
    let at = find_sub(&lower, &needle)? + needle.len();
    let rest = &headers[at..];
    if rest.first() == Some(&b'"') {
        let end = rest[1..].iter().position(|&b| b == b'"')?;
        Some(rest[1..1 + end].to_vec())
    } else {
        let end = rest
            .iter()
            .position(|&b| b == b';' || b == b'\r' || b == b'\n')
            .unwrap_or(rest.len());
        Some(rest[..end].to_vec())
    }
}

impl Parser for MultipartParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        if self.error {
            return Ok(0);
        }
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        let buf = &self.buf;
        let mut pos = match find_sub(buf, &self.boundary) {
            Some(p) => p,
            None => {
                self.error = true;
                return Err(ParseError::Malformed("multipart"));
            }
        };

        loop {
            pos += self.boundary.len();
            // final boundary carries a trailing "--"
            if buf[pos..].starts_with(b"--") {
                break;
            }
            // skip the CRLF after the boundary
            while matches!(buf.get(pos), Some(b'\r') | Some(b'\n')) {
                pos += 1;
            }

            let part_end = find_sub(&buf[pos..], &self.boundary).map(|p| pos + p);
            let part = &buf[pos..part_end.unwrap_or(buf.len())];

            // headers terminate at an empty line
            let (headers, body) = match find_sub(part, b"\r\n\r\n") {
                Some(split) => (&part[..split], &part[split + 4..]),
                None => match find_sub(part, b"\n\n") {
                    Some(split) => (&part[..split], &part[split + 2..]),
                    None => (&part[..0], part),
                },
            };

            // strip the CRLF that precedes the next boundary
            let body = body
                .strip_suffix(b"\r\n")
                .or_else(|| body.strip_suffix(b"\n"))
                .unwrap_or(body);

            match disposition_param(headers, b"name") {
                Some(name) => out.on_kv(&name, body, kvflags::BOTH, self.depth),
                None => out.on_kv(b"", body, kvflags::BOTH | kvflags::UNNAMED, self.depth),
            }
            if let Some(filename) = disposition_param(headers, b"filename") {
                out.on_kv(b"filename", &filename, kvflags::BOTH, self.depth);
            }

            pos = match part_end {
                Some(p) => p,
                None => break,
            };
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "multipart"
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

    const BODY: &[u8] = b"--XX\r\n\
Content-Disposition: form-data; name=\"user\"\r\n\r\n\
admin\r\n\
--XX\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file body\r\n\
--XX--\r\n";

    fn run(input: &[u8], boundary: &[u8]) -> Vec<KvPair> {
        let mut out = Vec::new();
        let mut p = MultipartParser::new(boundary, 0);
        p.push(input, &mut out).unwrap();
        let _ = p.finish(&mut out);
        out
    }

    #[test]
    fn parts_with_names() {
        let kvs = run(BODY, b"XX");
        assert!(kvs.iter().any(|kv| kv.key == b"user" && kv.value == b"admin"));
        assert!(kvs.iter().any(|kv| kv.key == b"upload" && kv.value == b"file body"));
        assert!(kvs.iter().any(|kv| kv.key == b"filename" && kv.value == b"a.txt"));
    }

    #[test]
    fn missing_boundary_is_error() {
        let mut out: Vec<KvPair> = Vec::new();
        let mut p = MultipartParser::new(b"nope", 0);
        p.push(b"plain body", &mut out).unwrap();
        assert!(p.finish(&mut out).is_err());
        assert!(p.error());
    }

    #[test]
    fn part_without_disposition_is_unnamed() {
        let body = b"--B\r\nX-Other: 1\r\n\r\npayload\r\n--B--\r\n";
        let kvs = run(body, b"B");
        assert!(kvs.iter().any(|kv| kv.value == b"payload" && kv.flags & kvflags::UNNAMED != 0));
    }
}
