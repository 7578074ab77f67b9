// palisade/src/signatures/keyword.rs
//
// Second-tier keyword rules. The `keywords` field of a simple signature
// is an opaque expression compiled through the shared regex wrapper and
// evaluated against the current context buffer.

use crate::engine::regexes::{RegexCompileError, ScanRegex};

pub struct KeywordRule {
    rule: ScanRegex,
}

impl KeywordRule {
    pub fn compile(sig_name: &str, keywords: &str) -> Result<Self, RegexCompileError> {
        Ok(KeywordRule {
            rule: ScanRegex::new(format!("{}::keywords", sig_name), keywords)?,
        })
    }

    pub fn is_match(&self, buffer: &str) -> bool {
        self.rule.has_match(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_matches() {
        let rule = KeywordRule::compile("sqli", r"'\s*or\s*\d+=\d+").unwrap();
        assert!(rule.is_match("user=admin' OR 1=1--"));
        assert!(!rule.is_match("user=admin"));
    }

    #[test]
    fn bad_pattern_is_compile_error() {
        assert!(KeywordRule::compile("broken", r"(unclosed").is_err());
    }
}
