// palisade/src/engine/regexes.rs
//
// Second-tier regex wrapper: case-insensitive compile, named captures,
// bounded match extraction, and substitution with caller-driven policy.
// The precondition index lets the scanner skip regexes whose trigger word
// never fired in the first-tier pass.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Matches produced per signature are capped; validation passes get a
/// slightly larger budget.
pub const MAX_MATCHES_PER_SIGNATURE: usize = 5;
pub const MAX_MATCHES_PER_VALIDATION: usize = 10;

#[derive(Debug, Error)]
#[error("regex '{name}' failed to compile: {source}")]
pub struct RegexCompileError {
    pub name: String,
    #[source]
    pub source: regex::Error,
}

/// One match: the whole matched text plus its named capture groups.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    pub whole:  String,
    pub groups: Vec<(String, String)>,
}

/// Substitution decision returned by `sub_callback`.
pub enum SubAction {
    Keep,
    Replace(String),
    Delete,
}

/// A compiled, named, case-insensitive regex.
pub struct ScanRegex {
    name: String,
    re:   Regex,
}

impl ScanRegex {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, RegexCompileError> {
        let name = name.into();
        let re = Regex::new(&format!("(?i){}", pattern)).map_err(|source| RegexCompileError {
            name: name.clone(),
            source,
        })?;
        Ok(ScanRegex { name, re })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }

    /// Collect up to `max` matches with their named capture values.
    pub fn find_all(&self, text: &str, max: usize) -> Vec<RegexMatch> {
        let mut out = Vec::new();
        for caps in self.re.captures_iter(text).take(max) {
            let whole = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            let mut groups = Vec::new();
            for name in self.re.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    groups.push((name.to_string(), m.as_str().to_string()));
                }
            }
            out.push(RegexMatch { whole, groups });
        }
        out
    }

    /// Byte ranges of up to `max` matches, optionally restricted to a window.
    pub fn find_ranges(
        &self,
        text: &str,
        max: usize,
        window: Option<(usize, usize)>,
    ) -> Vec<std::ops::Range<usize>> {
        let (base, slice) = match window {
            Some((start, end)) => {
                let end = end.min(text.len());
                let start = start.min(end);
                (start, &text[start..end])
            }
            None => (0, text),
        };
        self.re
            .find_iter(slice)
            .take(max)
            .map(|m| base + m.start()..base + m.end())
            .collect()
    }

    /// Delete every match.
    pub fn sub(&self, text: &str) -> String {
        self.re.replace_all(text, "").into_owned()
    }

    /// Substitute with a per-match policy: keep the match, replace it, or
    /// delete it.
    pub fn sub_callback(&self, text: &str, mut cb: impl FnMut(&str) -> SubAction) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in self.re.find_iter(text) {
            out.push_str(&text[last..m.start()]);
            match cb(m.as_str()) {
                SubAction::Keep => out.push_str(m.as_str()),
                SubAction::Replace(repl) => out.push_str(&repl),
                SubAction::Delete => {}
            }
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }
}

// ── Precondition index ────────────────────────────────────────────────────────

/// Gate decision for one regex under the fired first-tier words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionGate {
    /// No precondition registered, or the word fired: run the regex.
    Run,
    /// The word fired and the regex is tagged `noRegex`: the word hit is
    /// the match, skip the regex execution.
    CountAsMatched,
    /// The trigger word did not fire: skip entirely.
    Skip,
}

struct Precondition {
    word:     Vec<u8>,
    no_regex: bool,
}

/// Maps regex names to first-tier words. Regexes without an entry always run.
#[derive(Default)]
pub struct RegexPreconditions {
    by_name: HashMap<String, Precondition>,
}

impl RegexPreconditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, regex_name: impl Into<String>, word: impl Into<Vec<u8>>, no_regex: bool) {
        self.by_name.insert(
            regex_name.into(),
            Precondition { word: word.into(), no_regex },
        );
    }

    /// All trigger words, for first-tier aggregation.
    pub fn words(&self) -> Vec<Vec<u8>> {
        self.by_name.values().map(|p| p.word.clone()).collect()
    }

    pub fn gate(&self, regex_name: &str, fired_words: &HashSet<Vec<u8>>) -> PreconditionGate {
        match self.by_name.get(regex_name) {
            None => PreconditionGate::Run,
            Some(p) if !fired_words.contains(&p.word) => PreconditionGate::Skip,
            Some(p) if p.no_regex => PreconditionGate::CountAsMatched,
            Some(_) => PreconditionGate::Run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_match() {
        let re = ScanRegex::new("kw", r"select\s+\d+").unwrap();
        assert!(re.has_match("SELECT 1"));
        assert!(re.has_match("select   42"));
        assert!(!re.has_match("selec 1"));
    }

    #[test]
    fn named_captures() {
        let re = ScanRegex::new("kw", r"(?P<sqli>'\s*or\s*\d+=\d+)").unwrap();
        let matches = re.find_all("x' OR 1=1--", 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].groups[0].0, "sqli");
    }

    #[test]
    fn find_all_respects_max() {
        let re = ScanRegex::new("kw", r"\d+").unwrap();
        assert_eq!(re.find_all("1 2 3 4 5 6 7", 3).len(), 3);
    }

    #[test]
    fn find_ranges_window() {
        let re = ScanRegex::new("kw", r"ab").unwrap();
        let ranges = re.find_ranges("ab ab ab", 10, Some((3, 8)));
        assert_eq!(ranges, vec![3..5, 6..8]);
    }

    #[test]
    fn sub_deletes() {
        let re = ScanRegex::new("kw", r"/\*.*?\*/").unwrap();
        assert_eq!(re.sub("sel/*x*/ect"), "select");
    }

    #[test]
    fn sub_callback_policies() {
        let re = ScanRegex::new("kw", r"\d+").unwrap();
        let out = re.sub_callback("a1b22c333", |m| {
            if m.len() == 1 {
                SubAction::Keep
            } else if m.len() == 2 {
                SubAction::Replace("_".into())
            } else {
                SubAction::Delete
            }
        });
        assert_eq!(out, "a1b_c");
    }

    #[test]
    fn precondition_gating() {
        let mut pre = RegexPreconditions::new();
        pre.register("union_select", b"union".to_vec(), false);
        pre.register("fast_or", b"or".to_vec(), true);

        let mut fired = HashSet::new();
        fired.insert(b"union".to_vec());

        assert_eq!(pre.gate("union_select", &fired), PreconditionGate::Run);
        assert_eq!(pre.gate("fast_or", &fired), PreconditionGate::Skip);
        assert_eq!(pre.gate("unregistered", &fired), PreconditionGate::Run);

        fired.insert(b"or".to_vec());
        assert_eq!(pre.gate("fast_or", &fired), PreconditionGate::CountAsMatched);
    }
}
