// palisade/src/parsers/percent.rs
//
// Percent decoding without pair semantics: the whole value is %HH-decoded
// and re-emitted as one unnamed leaf for another peel attempt.

use super::{kvflags, push_capped, KvSink, ParseError, Parser};
use crate::decode::unquote_plus;

pub struct PercentParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
}

impl PercentParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
        }
    }
}

impl Parser for PercentParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        let decoded = unquote_plus(&self.buf, true, false);
        out.on_kv(b"", &decoded, kvflags::BOTH | kvflags::UNNAMED, self.depth);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "percent"
    }

    fn depth(&self) -> usize {
        self.depth
    }
}
