// palisade/src/engine/multipat.rs
//
// First-tier multi-pattern engine: a set of literal byte patterns with
// optional begin/end anchors compiled into one Aho-Corasick automaton.
// Patterns carry a 32-bit index so the signature store can map hits back
// without holding references into the automaton.

use aho_corasick::AhoCorasick;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("empty pattern line")]
    Empty,
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("cannot prepare an empty pattern set")]
    EmptySet,
    #[error("automaton build failed: {0}")]
    Build(String),
}

/// An immutable literal pattern. `^` / `$` in the textual form pin the
/// match to the buffer start / end. Value-equal and orderable; the index
/// carries caller metadata and takes no part in comparisons.
#[derive(Debug, Clone)]
pub struct Pattern {
    bytes:              Vec<u8>,
    pub match_at_start: bool,
    pub match_at_end:   bool,
    pub index:          u32,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
            && self.match_at_start == other.match_at_start
            && self.match_at_end == other.match_at_end
    }
}

impl Eq for Pattern {}

impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.bytes, self.match_at_start, self.match_at_end).cmp(&(
            &other.bytes,
            other.match_at_start,
            other.match_at_end,
        ))
    }
}

impl std::hash::Hash for Pattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
        self.match_at_start.hash(state);
        self.match_at_end.hash(state);
    }
}

impl Pattern {
    /// Parse a pattern line. A leading `^` anchors the match to offset 0,
    /// a trailing `$` to the last offset; the rest is literal bytes.
    pub fn from_line(line: &str, index: u32) -> Result<Self, PatternError> {
        let mut bytes = line.as_bytes();
        let match_at_start = bytes.first() == Some(&b'^');
        if match_at_start {
            bytes = &bytes[1..];
        }
        let match_at_end = bytes.last() == Some(&b'$');
        if match_at_end {
            bytes = &bytes[..bytes.len() - 1];
        }
        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Pattern {
            bytes: bytes.to_vec(),
            match_at_start,
            match_at_end,
            index,
        })
    }

    /// Raw literal pattern without anchors.
    pub fn literal(bytes: impl Into<Vec<u8>>, index: u32) -> Self {
        Pattern {
            bytes: bytes.into(),
            match_at_start: false,
            match_at_end: false,
            index,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Prepared multi-pattern engine. Immutable after `prepare`; cheap to share.
pub struct MultiPatternEngine {
    ac:       AhoCorasick,
    patterns: Vec<Pattern>,
}

impl MultiPatternEngine {
    /// Compile the pattern set. Fails on an empty set.
    pub fn prepare(patterns: &BTreeSet<Pattern>) -> Result<Self, PrepareError> {
        if patterns.is_empty() {
            return Err(PrepareError::EmptySet);
        }
        let patterns: Vec<Pattern> = patterns.iter().cloned().collect();
        let ac = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(patterns.iter().map(|p| p.bytes()))
            .map_err(|e| PrepareError::Build(e.to_string()))?;
        Ok(MultiPatternEngine { ac, patterns })
    }

    /// All patterns with at least one anchor-respecting occurrence in `buf`.
    pub fn scan(&self, buf: &[u8]) -> BTreeSet<Pattern> {
        let mut found = BTreeSet::new();
        self.scan_with_offset_lambda(buf, |_, pat| {
            found.insert(pat.clone());
        });
        found
    }

    /// All `(end_offset, pattern)` hits.
    pub fn scan_with_offset(&self, buf: &[u8]) -> BTreeSet<(usize, Pattern)> {
        let mut found = BTreeSet::new();
        self.scan_with_offset_lambda(buf, |end, pat| {
            found.insert((end, pat.clone()));
        });
        found
    }

    /// Stream anchor-respecting hits in arrival order.
    pub fn scan_with_offset_lambda(&self, buf: &[u8], mut cb: impl FnMut(usize, &Pattern)) {
        for m in self.ac.find_overlapping_iter(buf) {
            let pat = &self.patterns[m.pattern().as_usize()];
            if pat.match_at_start && m.start() != 0 {
                continue;
            }
            if pat.match_at_end && m.end() != buf.len() {
                continue;
            }
            cb(m.end(), pat);
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
