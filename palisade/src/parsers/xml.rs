// palisade/src/parsers/xml.rs
//
// XML parser over quick-xml. Element text becomes a value keyed by the
// element name, attribute foo on element bar emits as "bar.foo", comments
// and CDATA blocks pass through as values.

use super::{kvflags, push_capped, KvSink, ParseError, Parser};
use quick_xml::events::Event;
use quick_xml::Reader;

pub struct XmlParser {
    depth:     usize,
    buf:       Vec<u8>,
    discarded: usize,
    error:     bool,
}

impl XmlParser {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buf: Vec::new(),
            discarded: 0,
            error: false,
        }
    }

    fn emit_attributes(
        &self,
        e: &quick_xml::events::BytesStart<'_>,
        out: &mut dyn KvSink,
    ) {
        let elem = e.name().as_ref().to_vec();
        for attr in e.attributes().with_checks(false).flatten() {
            let mut key = elem.clone();
            key.push(b'.');
            key.extend_from_slice(attr.key.as_ref());
            out.on_kv(&key, &attr.value, kvflags::BOTH, self.depth);
        }
    }
}

impl Parser for XmlParser {
    fn push(&mut self, chunk: &[u8], _out: &mut dyn KvSink) -> Result<usize, ParseError> {
        if self.error {
            return Ok(0);
        }
        push_capped(&mut self.buf, chunk, &mut self.discarded);
        Ok(chunk.len())
    }

    fn finish(&mut self, out: &mut dyn KvSink) -> Result<(), ParseError> {
        let mut reader = Reader::from_reader(self.buf.as_slice());
        reader.config_mut().check_end_names = false;

        let mut elem_stack: Vec<Vec<u8>> = Vec::new();
        let mut scratch = Vec::new();

        loop {
            match reader.read_event_into(&mut scratch) {
                Ok(Event::Start(e)) => {
                    self.emit_attributes(&e, out);
                    elem_stack.push(e.name().as_ref().to_vec());
                }
                Ok(Event::Empty(e)) => self.emit_attributes(&e, out),
                Ok(Event::End(_)) => {
                    elem_stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t.as_ref();
                    if !text.iter().all(|b| b.is_ascii_whitespace()) {
                        let key = elem_stack.last().map(|k| k.as_slice()).unwrap_or(b"");
                        out.on_kv(key, text, kvflags::BOTH, self.depth);
                    }
                }
                Ok(Event::CData(c)) => {
                    let key = elem_stack.last().map(|k| k.as_slice()).unwrap_or(b"");
                    out.on_kv(key, c.as_ref(), kvflags::BOTH, self.depth);
                }
                Ok(Event::Comment(c)) => {
                    out.on_kv(b"", c.as_ref(), kvflags::BOTH | kvflags::UNNAMED, self.depth);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(_) => {
                    self.error = true;
                    return Err(ParseError::Malformed("xml"));
                }
            }
            scratch.clear();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "xml"
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn error(&self) -> bool {
        self.error
    }
}
