// palisade/src/parsers/delimiter.rs
//
// Splits a value on one byte and emits each piece as an unnamed value.
// Used for learned delimiter types (pipe, semicolon, asterisk, comma).

use super::{kvflags, push_capped, KvSink, ParseError, Parser};

pub struct DelimiterParser {
    delimiter: u8,
    depth:     usize,
    piece:     Vec<u8>,
    discarded: usize,
}

impl DelimiterParser {
    pub fn new(delimiter: u8, depth: usize) -> Self {
        Self {
            delimiter,
            depth,
            piece: Vec::new(),
            discarded: 0,
        }
    }

    fn emit(&mut self, out: &mut dyn KvSink) {
        out.on_kv(b"", &self.piece, kvflags::BOTH | kvflags::UNNAMED, self.depth);
        self.piece.clear();
    }
}

impl Parser for DelimiterParser {
    fn push(&mut self, chunk: &[u8], out: &mut dyn KvSink) -> Result<usize, ParseError> {
        for &ch in chunk {
            if ch == self.delimiter {
                self.emit(out);
            } else {
                push_capped(&mut self.piece, &[ch], &mut self.discarded);
            }
        }
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        self.emit(out);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "delimiter"
    }

    fn depth(&self) -> usize {
        self.depth
    }
}
