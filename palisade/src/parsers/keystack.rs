// palisade/src/parsers/keystack.rs
//
// Dotted key path maintained while the deep parser descends through
// nested encodings. "a.b.c" names the innermost leaf; the first segment
// identifies the outermost parameter.

#[derive(Debug, Default)]
pub struct KeyStack {
    segments: Vec<Vec<u8>>,
}

impl KeyStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: &[u8]) {
        self.segments.push(segment.to_vec());
    }

    pub fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Full dotted path.
    pub fn full(&self) -> Vec<u8> {
        self.segments.join(&b'.')
    }

    /// The outermost segment.
    pub fn first(&self) -> &[u8] {
        self.segments.first().map(|s| s.as_slice()).unwrap_or(b"")
    }

    /// The innermost segment.
    pub fn last(&self) -> &[u8] {
        self.segments.last().map(|s| s.as_slice()).unwrap_or(b"")
    }
}
