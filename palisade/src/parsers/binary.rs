// palisade/src/parsers/binary.rs
//
// Opaque passthrough for binary and WBXML payloads. Its presence on the
// deep-parser stack suppresses further textual decoding; the raw value
// still reaches the scanner (flagged binary) as one unnamed leaf.

use super::{kvflags, push_capped, KvSink, ParseError, Parser};

pub struct BinaryParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
}

impl BinaryParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
        }
    }
}

impl Parser for BinaryParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        out.on_kv(b"", &self.buf, kvflags::BOTH | kvflags::UNNAMED, self.depth);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "binary"
    }

    fn depth(&self) -> usize {
        self.depth
    }
}
