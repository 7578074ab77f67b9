// palisade/src/engine/scanner.rs
//
// The evasion-aware scanner. One value at a time: unescape, run the
// keyword/words/pattern regexes, then re-run over progressively decoded
// variants for every evasion trigger that fired, keeping only evidence
// that survives the peel. Results are cached per asset.

use crate::decode::{
    contains_broken_utf8, contains_invalid_utf8, unescape, unescape_broken_utf8,
    unescape_invalid_utf8, unquote_plus,
};
use crate::engine::regexes::{RegexMatch, ScanRegex, MAX_MATCHES_PER_VALIDATION};
use crate::state::asset::AssetState;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Values longer than this bypass the scan caches.
pub const MAX_CACHE_VALUE_SIZE: usize = 1024;

// ── Scan result ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub keyword_matches:      Vec<String>,
    pub regex_matches:        Vec<String>,
    pub found_patterns:       HashMap<String, Vec<String>>,
    pub unescaped_line:       String,
    pub param_name:           String,
    pub location:             String,
    pub score:                f64,
    pub score_array:          Vec<f64>,
    pub keyword_combinations: Vec<String>,
    pub attack_types:         HashSet<String>,
}

impl ScanResult {
    pub fn clear(&mut self) {
        *self = ScanResult::default();
    }

    /// Merge evidence from another result (all fields deduplicated).
    pub fn merge_from(&mut self, other: &ScanResult) {
        self.location = other.location.clone();
        self.param_name = other.param_name.clone();
        for kw in &other.keyword_matches {
            if !self.keyword_matches.contains(kw) {
                self.keyword_matches.push(kw.clone());
            }
        }
        for rm in &other.regex_matches {
            if !self.regex_matches.contains(rm) {
                self.regex_matches.push(rm.clone());
            }
        }
        for (group, values) in &other.found_patterns {
            let entry = self.found_patterns.entry(group.clone()).or_default();
            for v in values {
                if !entry.contains(v) {
                    entry.push(v.clone());
                }
            }
        }
        if self.unescaped_line.is_empty() {
            self.unescaped_line = other.unescaped_line.clone();
        } else {
            self.unescaped_line = format!("{}?{}", other.unescaped_line, self.unescaped_line);
        }
        for s in &other.score_array {
            if !self.score_array.contains(s) {
                self.score_array.push(*s);
            }
        }
        self.attack_types.extend(other.attack_types.iter().cloned());
    }
}

// ── Scan signature set ────────────────────────────────────────────────────────

/// The compiled regex set the scanner runs. Built-in defaults cover the
/// common attack families; a data pack may replace them wholesale.
pub struct ScanSignatures {
    pub specific_acuracy_keywords_regex: ScanRegex,
    pub words_regex:                     ScanRegex,
    pub pattern_regex:                   ScanRegex,
    pub un_escape_pattern:               ScanRegex,
    pub quotes_ev_pattern:               ScanRegex,
    pub comment_ev_pattern:              ScanRegex,
    pub quotes_space_ev_pattern:         ScanRegex,
    pub comma_splice_pattern:            ScanRegex,
    pub longtext_re:                     ScanRegex,
    pub nospaces_long_value_re:          ScanRegex,
    pub url_ignored_re:                  ScanRegex,
    pub header_ignored_re:               ScanRegex,
    pub binary_data_kw_filter:           ScanRegex,
    pub resp_body_words_regex:           ScanRegex,
    pub resp_body_pattern_regex:         ScanRegex,
    pub global_ignored_keywords:         HashSet<String>,
    pub global_ignored_patterns:         HashSet<String>,
    pub url_ignored_keywords:            HashSet<String>,
    pub url_ignored_patterns:            HashSet<String>,
    pub header_ignored_keywords:         HashSet<String>,
    pub header_ignored_patterns:         HashSet<String>,
    pub ignored_for_nospace_long_value:  HashSet<String>,
    pub attack_types:                    HashMap<String, Vec<String>>,
}

fn set_of(words: &[&str]) -> HashSet<String> {
    words.iter().map(|s| s.to_string()).collect()
}

impl Default for ScanSignatures {
    fn default() -> Self {
        let re = |name: &str, pat: &str| {
            ScanRegex::new(name.to_string(), pat).expect("built-in scan regex")
        };

        let mut attack_types = HashMap::new();
        attack_types.insert("sql".to_string(), vec!["SQL Injection".to_string()]);
        attack_types.insert("xss".to_string(), vec!["Cross Site Scripting".to_string()]);
        attack_types.insert("os_cmd".to_string(), vec!["Remote Code Execution".to_string()]);
        attack_types.insert("path".to_string(), vec!["Path Traversal".to_string()]);
        attack_types.insert("ldap".to_string(), vec!["LDAP Injection".to_string()]);

        ScanSignatures {
            specific_acuracy_keywords_regex: re(
                "specific_acuracy_keywords",
                r"(?P<sql_hi_acur>\bunion\s+(?:all\s+)?select\b)|(?P<os_cmd_hi_acur>/etc/passwd\b|/bin/(?:ba)?sh\b)|(?P<xss_hi_acur><script[\s>/])|(?P<path_hi_acur>\.\./\.\./)",
            ),
            words_regex: re(
                "words",
                concat!(
                    r"(?P<sql_kw>\b(?:select|union|insert|update|delete|drop|exec|sleep|benchmark|waitfor)\b)",
                    r"|(?P<sql_fast_reg>'\s*or\s*\d+\s*=\s*\d+)",
                    r"|(?P<os_cmd_kw>\b(?:wget|curl|chmod|nc|netcat|whoami|passwd)\b)",
                    r"|(?P<os_cmd_sep_medium_acuracy>^[;|]\s*\w)",
                    r"|(?P<xss_kw><(?:script|img|iframe|svg|object|embed)\b)",
                    r"|(?P<xss_event_kw>\bon(?:error|load|click|mouseover)\s*=)",
                    r"|(?P<path_kw>\.\./)",
                    r"|(?P<quote_kw>')",
                    r"|(?P<os_cmd_ev>\[[a-z0-9]{2}\])",
                    r"|(?P<quotes_ev>''+|``+)",
                    r"|(?P<comment_ev>/\*[^*]*\*/)",
                    r#"|(?P<quotes_space_ev_fast_reg>"\s+"|'\s+')"#,
                    r"|(?P<evasion>%c0|%c1|\\x[0-9a-f]{2}|%u[0-9a-f]{4}|0x[0-9a-f]{2,})",
                    r"|(?P<backslash_ev>\\[abtnvfr]\b|//+)",
                ),
            ),
            pattern_regex: re(
                "patterns",
                concat!(
                    r"(?P<sql_pattern>'\s*(?:or|and)\s*(?:\d+\s*=\s*\d+|'[^']*'\s*=\s*'))",
                    r"|(?P<xss_pattern><script[^>]*>.*?</script|javascript\s*:)",
                    r"|(?P<os_cmd_pattern>[;|`]\s*(?:cat|ls|id|uname|whoami|rm)\b)",
                    r"|(?P<path_pattern>(?:\.\./)+(?:etc|bin|usr|var|windows)\b)",
                ),
            ),
            un_escape_pattern: re(
                "un_escape",
                r"\\x[0-9a-f]{2}|\\u[0-9a-f]{4}|%[0-9a-f]{2}|%u[0-9a-f]{4}",
            ),
            quotes_ev_pattern: re("quotes_ev", r"''+|``+"),
            comment_ev_pattern: re("comment_ev", r"/\*[^*]*\*/"),
            quotes_space_ev_pattern: re("quotes_space_ev", r#""\s+"|'\s+'"#),
            comma_splice_pattern: re("comma_splice", r#"",\s*,""#),
            longtext_re: re("longtext", r"^[a-z0-9_.+/=\-]{120,}$"),
            nospaces_long_value_re: re("nospaces_long_value", r"^\S{64,}$"),
            url_ignored_re: re(
                "url_ignored",
                r"^/?[\w\-./]*\.(?:css|js|png|jpg|jpeg|gif|svg|ico|woff2?|ttf|map)$",
            ),
            header_ignored_re: re(
                "header_ignored",
                r"^(?:mozilla|curl|wget|opera|chrome|safari)[/ ][\w./ ()+;:,-]*$",
            ),
            binary_data_kw_filter: re("binary_data_kw_filter", r"quote_kw|os_cmd_ev|backslash_ev"),
            resp_body_words_regex: re(
                "resp_body_words",
                r"(?P<err_disclosure>\b(?:ora-\d{5}|sql syntax|stack trace|traceback \(most recent call last\)|undefined index)\b)",
            ),
            resp_body_pattern_regex: re(
                "resp_body_patterns",
                r"(?P<err_disclosure_pattern>root:[x*]?:0:0:|<b>(?:warning|fatal error)</b>)",
            ),
            global_ignored_keywords: set_of(&["select", "update", "delete"]),
            global_ignored_patterns: set_of(&[]),
            url_ignored_keywords: set_of(&["select", "update", "delete", "'"]),
            url_ignored_patterns: set_of(&[]),
            header_ignored_keywords: set_of(&["select", "'"]),
            header_ignored_patterns: set_of(&[]),
            ignored_for_nospace_long_value: set_of(&["'", "../", "//"]),
            attack_types,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

// Printable representation of the distinct non-alphanumeric bytes in a
// matched evasion span, used to label "encoded_*" keywords.
fn repr_uniq(value: &str) -> String {
    let mut seen = [false; 256];
    let mut out = String::new();
    for &ch in value.as_bytes() {
        if ch <= 127 && !ch.is_ascii_alphanumeric() && !seen[ch as usize] {
            match ch {
                0x07 => out.push_str("\\a"),
                0x08 => out.push_str("\\b"),
                0x09 => out.push_str("\\t"),
                0x0A => out.push_str("\\n"),
                0x0B => out.push_str("\\v"),
                0x0C => out.push_str("\\f"),
                0x0D => out.push_str("\\r"),
                0x5C => out.push_str("\\\\"),
                0x27 => out.push_str("\\'"),
                0x22 => out.push_str("\\\""),
                0x3F => out.push_str("\\?"),
                ch if ch >= 32 => out.push(ch as char),
                ch => out.push_str(&format!("\\x{:02X}", ch)),
            }
            seen[ch as usize] = true;
        }
    }
    out
}

fn is_short_word(word: &str) -> bool {
    word.len() <= 2
}

fn is_short_html_tag(word: &str) -> bool {
    !word.is_empty() && word.len() <= 3 && word.starts_with('<')
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn count_not_in_set(words: &[String], ignored: &HashSet<String>) -> usize {
    words.iter().filter(|w| !ignored.contains(w.as_str())).count()
}

// Repeat count and word count over a line: a byte matching either of the
// two previous bytes counts as repetition; an alpha byte after a
// non-alpha byte starts a word.
fn calc_repeat_and_words(line: &str) -> (u32, u32) {
    let mut repeat = 0u32;
    let mut words = 0u32;
    let mut prev: i32 = -1;
    let mut prev_prev: i32 = -1;
    for &b in line.as_bytes() {
        let c = b as i32;
        if c == prev || c == prev_prev {
            repeat += 1;
        }
        let alpha = (b | 32).wrapping_sub(b'a') < 26;
        let prev_alpha = prev >= 0 && ((prev as u8) | 32).wrapping_sub(b'a') < 26;
        if alpha && !prev_alpha {
            words += 1;
        }
        prev_prev = prev;
        prev = c;
    }
    (repeat, words)
}

fn check_binary_data(line: &[u8], already: bool) -> bool {
    if already || line.len() <= 25 {
        return already;
    }
    let non_printable = line
        .iter()
        .filter(|&&ch| {
            !(0x20..0x7F).contains(&ch) && ch != b'\r' && ch != b'\t' && ch != b'\n'
        })
        .count();
    non_printable * 32 >= line.len() * 10
}

// ── The scanner ───────────────────────────────────────────────────────────────

pub struct Scanner;

const REPETITION_THRESHOLD: u32 = 100;

impl Scanner {
    // One regex pass: collect keywords, regex matches and found patterns
    // with the group-name rewriting and binary/longtext filters.
    fn check_regex(
        sigs: &ScanSignatures,
        regex: &ScanRegex,
        line: &str,
        keyword_matches: &mut Vec<String>,
        found_patterns: &mut HashMap<String, Vec<String>>,
        long_text_found: bool,
        binary_data_found: bool,
    ) {
        let matches: Vec<RegexMatch> = regex.find_all(line, MAX_MATCHES_PER_VALIDATION);
        for m in &matches {
            let mut word = m.whole.clone();

            if binary_data_found && word.len() <= 2 {
                continue;
            }

            for (group_name, value) in &m.groups {
                let mut group = group_name.clone();

                if group.contains("fast_reg") {
                    if group.contains("evasion") {
                        word = format!("encoded_{}", repr_uniq(value));
                        if word == "encoded_" {
                            word = "character_encoding".to_string();
                        } else if word
                            .trim_start_matches("encoded_")
                            .bytes()
                            .all(|b| b.is_ascii_alphanumeric())
                        {
                            group = "evasion".to_string();
                        }
                        if long_text_found {
                            group = "longtext".to_string();
                        }
                    } else {
                        word = group.clone();
                    }
                }

                let suppressed_by_longtext = (long_text_found || binary_data_found)
                    && (word == "character_encoding"
                        || word.starts_with('\\')
                        || word.starts_with("encoded_"));
                let suppressed_by_binary = binary_data_found
                    && (is_short_word(&word)
                        || is_short_html_tag(&word)
                        || sigs.binary_data_kw_filter.has_match(&group));

                if suppressed_by_binary {
                    continue;
                }
                if !suppressed_by_longtext && !keyword_matches.contains(&word) {
                    keyword_matches.push(word.clone());
                }

                let entry = found_patterns.entry(group).or_default();
                if !entry.contains(value) {
                    entry.push(value.clone());
                }
            }
        }
    }

    fn filter_keywords_due_to_long_text(sigs: &ScanSignatures, res: &mut ScanResult) {
        if sigs.nospaces_long_value_re.has_match(&res.unescaped_line) {
            res.keyword_matches
                .retain(|w| !sigs.ignored_for_nospace_long_value.contains(w));
        }
    }

    // `words_floor` carries the minimum word count seen across decoded
    // variants; a successfully peeled evasion lowers it, making the
    // probing ratio stricter.
    fn calc_repetition_and_probing(
        res: &mut ScanResult,
        ignored: &HashSet<String>,
        line: &str,
        detected_repetition: &mut bool,
        detected_probing: &mut bool,
        words_floor: &mut u32,
    ) {
        let (repeat, words) = calc_repeat_and_words(line);
        *words_floor = (*words_floor).min(words);

        if !*detected_repetition && repeat > REPETITION_THRESHOLD {
            *detected_repetition = true;
            res.keyword_matches.push("repetition".to_string());
        }

        let keywords_num = count_not_in_set(&res.keyword_matches, ignored);
        if !*detected_probing && keywords_num + 2 > *words_floor as usize && keywords_num != 0 {
            *detected_probing = true;
            res.keyword_matches.push("probing".to_string());
        }
    }

    // Standard scan pass over a decoded variant.
    fn scan_variant(
        sigs: &ScanSignatures,
        variant: &str,
        res: &mut ScanResult,
        long_text_found: bool,
        binary_data_found: bool,
        with_patterns: bool,
    ) {
        Self::check_regex(
            sigs,
            &sigs.specific_acuracy_keywords_regex,
            variant,
            &mut res.keyword_matches,
            &mut res.found_patterns,
            long_text_found,
            binary_data_found,
        );
        Self::check_regex(
            sigs,
            &sigs.words_regex,
            variant,
            &mut res.keyword_matches,
            &mut res.found_patterns,
            long_text_found,
            binary_data_found,
        );
        if with_patterns {
            Self::check_regex(
                sigs,
                &sigs.pattern_regex,
                variant,
                &mut res.regex_matches,
                &mut res.found_patterns,
                long_text_found,
                binary_data_found,
            );
        }
    }

    /// Response scan stages run the response regex lists only; any match
    /// reports suspicion, no scoring.
    pub fn scan_response(asset: &AssetState, stage: &str, line: &[u8], res: &mut ScanResult) -> bool {
        debug_assert!(stage == "resp_body" || stage == "resp_header");
        res.clear();
        let sigs = &asset.scan_signatures;
        let text = String::from_utf8_lossy(line).to_lowercase();
        Self::check_regex(
            sigs,
            &sigs.resp_body_words_regex,
            &text,
            &mut res.keyword_matches,
            &mut res.found_patterns,
            false,
            false,
        );
        Self::check_regex(
            sigs,
            &sigs.resp_body_pattern_regex,
            &text,
            &mut res.keyword_matches,
            &mut res.found_patterns,
            false,
            false,
        );
        !res.keyword_matches.is_empty()
    }

    /// Full WAAP scan of one value. Returns true when the value is
    /// suspicious; `res` carries the evidence.
    pub fn scan(
        asset: &AssetState,
        line: &[u8],
        scan_stage: &str,
        is_binary: bool,
        split_type: Option<&str>,
        res: &mut ScanResult,
    ) -> bool {
        let sigs = &asset.scan_signatures;

        let should_cache = line.len() <= MAX_CACHE_VALUE_SIZE;
        let cache_key = AssetState::cache_key(line, scan_stage, is_binary, split_type);

        if should_cache {
            if asset.is_clean_cached(&cache_key) {
                res.clear();
                return false;
            }
            if let Some(cached) = asset.suspicious_cached(&cache_key) {
                *res = cached;
                return true;
            }
        }

        let mut ignored_keywords = &sigs.global_ignored_keywords;
        let mut ignored_patterns = &sigs.global_ignored_patterns;
        let mut is_url_stage = false;

        let text = String::from_utf8_lossy(line).into_owned();

        // context-scoped fast exits
        if scan_stage == "url" || scan_stage == "referer" {
            if sigs.url_ignored_re.has_match(&text) {
                if should_cache {
                    asset.insert_clean(cache_key);
                }
                res.clear();
                return false;
            }
            ignored_keywords = &sigs.url_ignored_keywords;
            ignored_patterns = &sigs.url_ignored_patterns;
            is_url_stage = true;
        } else if scan_stage == "header" || scan_stage == "cookie" {
            if sigs.header_ignored_re.has_match(&text) {
                if should_cache {
                    asset.insert_clean(cache_key);
                }
                res.clear();
                return false;
            }
            ignored_keywords = &sigs.header_ignored_keywords;
            ignored_patterns = &sigs.header_ignored_patterns;
        }

        let unquote_line = unquote_plus(line, true, true);
        let binary_data_found =
            check_binary_data(&unquote_line, is_binary) || check_binary_data(line, is_binary);

        res.clear();
        res.unescaped_line = unescape(line);
        res.location = scan_stage.to_string();

        let long_text_found = sigs.longtext_re.has_match(&res.unescaped_line);

        // standard pass: keyword regexes only. The heavier pattern_regex is
        // gated behind pre-suspicion below; evasion variants run it freely.
        let unescaped = res.unescaped_line.clone();
        Self::scan_variant(sigs, &unescaped, res, long_text_found, binary_data_found, false);
        Self::filter_keywords_due_to_long_text(sigs, res);

        let mut detected_repetition = false;
        let mut detected_probing = false;
        let mut words_floor = u32::MAX;
        if !binary_data_found {
            Self::calc_repetition_and_probing(
                res,
                ignored_keywords,
                &unescaped,
                &mut detected_repetition,
                &mut detected_probing,
                &mut words_floor,
            );
        }

        let mut keywords_to_remove: Vec<String> = Vec::new();

        // a closure-free helper pattern: each evasion stage rescans a
        // variant, merges, and reports whether new keywords appeared
        macro_rules! rescan {
            ($variant:expr, $with_patterns:expr) => {{
                let before = res.keyword_matches.len();
                let variant: String = $variant;
                if variant != res.unescaped_line {
                    Self::scan_variant(
                        sigs,
                        &variant,
                        res,
                        long_text_found,
                        binary_data_found,
                        $with_patterns,
                    );
                    Self::filter_keywords_due_to_long_text(sigs, res);
                }
                let added = res.keyword_matches.len() > before;
                if added && !binary_data_found {
                    Self::calc_repetition_and_probing(
                        res,
                        ignored_keywords,
                        &variant,
                        &mut detected_repetition,
                        &mut detected_probing,
                        &mut words_floor,
                    );
                }
                added
            }};
        }

        // split values rescan with the separator prepended
        if scan_stage != "cookie" && split_type.is_some() && !is_all_digits(&res.unescaped_line) {
            let mut keywords_to_filter: HashSet<String> =
                set_of(&["probing", "os_cmd_sep_medium_acuracy"]);
            let variant = match split_type {
                Some("sem") => {
                    keywords_to_filter.insert(";".to_string());
                    format!(";{}", res.unescaped_line)
                }
                Some("pipe") => {
                    keywords_to_filter.insert("|".to_string());
                    format!("|{}", res.unescaped_line)
                }
                _ => res.unescaped_line.clone(),
            };
            rescan!(variant, true);
            if count_not_in_set(&res.keyword_matches, &keywords_to_filter) == 0 {
                keywords_to_remove.extend(keywords_to_filter.into_iter());
            }
        }

        // os command [xx]/[aa] wrappers
        if res.found_patterns.contains_key("os_cmd_ev") {
            let line = &res.unescaped_line;
            let mut stripped = String::with_capacity(line.len());
            let bytes = line.as_bytes();
            let mut pos = 0;
            while pos < bytes.len() {
                if bytes[pos] == b'['
                    && pos + 3 < bytes.len()
                    && bytes[pos + 1] == bytes[pos + 2]
                    && bytes[pos + 3] == b']'
                {
                    stripped.push(bytes[pos + 1] as char);
                    pos += 4;
                } else {
                    stripped.push(bytes[pos] as char);
                    pos += 1;
                }
            }
            if !rescan!(stripped, true) {
                keywords_to_remove.push("os_cmd_ev".to_string());
                res.found_patterns.remove("os_cmd_ev");
            }
        }

        // quotes-inside-quotes
        if res.found_patterns.contains_key("quotes_ev") {
            let variant = sigs.quotes_ev_pattern.sub(&res.unescaped_line);
            if !rescan!(variant, true) {
                keywords_to_remove.push("quotes_ev".to_string());
                res.found_patterns.remove("quotes_ev");
            }
        }

        // invalid (overlong) UTF-8
        if contains_invalid_utf8(line) {
            let variant = unescape(&unescape_invalid_utf8(line));
            rescan!(variant, true);
        }

        // broken UTF-8 (codepoint split across percent escapes)
        if let Some(repaired) = contains_broken_utf8(line, &unquote_line) {
            let variant = unescape(&unescape_broken_utf8(&repaired));
            rescan!(variant, true);
        }

        // comment stripping
        if res.found_patterns.contains_key("comment_ev") {
            let variant = sigs.comment_ev_pattern.sub(&res.unescaped_line);
            if !rescan!(variant, true) {
                keywords_to_remove.push("comment_ev".to_string());
                res.found_patterns.remove("comment_ev");
            }
        }

        // quoted-space collapse
        if res.found_patterns.contains_key("quotes_space_ev_fast_reg") {
            let variant = sigs.quotes_space_ev_pattern.sub(&res.unescaped_line);
            rescan!(variant, true);
        }

        let lower_raw = text.to_lowercase();

        // bare overlong: %c0 without its own escape terminator
        if lower_raw.contains("%c0") && !lower_raw.contains("%c0%") {
            let variant = unescape(lower_raw.replace("%c0", "%c0%").as_bytes());
            rescan!(variant, true);
        }

        // 0x-hex translate
        if res.unescaped_line.contains("0x") {
            let variant = unescape(res.unescaped_line.replace("0x", "\\x").as_bytes());
            rescan!(variant, true);
        }

        // overlong slash / dot escapes
        if lower_raw.contains("%c1%1c")
            || lower_raw.contains("%c1%9c")
            || lower_raw.contains("%c1%pc")
            || lower_raw.contains("%c1%8s")
        {
            let variant = lower_raw
                .replace("%c1%1c", "/")
                .replace("%c1%9c", "/")
                .replace("%c1%pc", "/")
                .replace("%c1%8s", "/");
            let added = rescan!(unescape(variant.as_bytes()), true);
            if added {
                let entry = res.found_patterns.entry("evasion".to_string()).or_default();
                if !entry.contains(&"overlong_slash".to_string()) {
                    entry.push("overlong_slash".to_string());
                }
            }
        }
        if lower_raw.contains("%c0%2e") || lower_raw.contains("%c0%ae") {
            let variant = lower_raw.replace("%c0%2e", ".").replace("%c0%ae", ".");
            rescan!(unescape(variant.as_bytes()), true);
        }

        // SQLi comma splice
        if sigs.comma_splice_pattern.has_match(&res.unescaped_line) {
            let variant = sigs.comma_splice_pattern.sub(&res.unescaped_line);
            rescan!(variant, true);
        }

        // general character-encoding evasions
        let general_evasion = res.found_patterns.contains_key("evasion")
            || res
                .found_patterns
                .keys()
                .any(|k| k.contains("fast_reg") && k.contains("evasion"));
        if general_evasion {
            let pre = res
                .unescaped_line
                .replace("0x", "\\x")
                .replace("%u", "\\u")
                .replace('\0', "");
            let variant = unescape(sigs.un_escape_pattern.sub(&pre).as_bytes());
            rescan!(variant, true);
        }

        // backslash aliasing and slash runs
        if res.found_patterns.contains_key("backslash_ev") {
            let mut variant = res.unescaped_line.clone();
            for (alias, plain) in
                [("\\a", "a"), ("\\b", "b"), ("\\t", "t"), ("\\n", "n"), ("\\v", "v"), ("\\f", "f"), ("\\r", "r")]
            {
                variant = variant.replace(alias, plain);
            }
            variant = variant.replace('\\', "");
            while variant.contains("//") {
                variant = variant.replace("//", "/");
            }
            if !rescan!(variant, true) {
                keywords_to_remove.push("backslash_ev".to_string());
                res.found_patterns.remove("backslash_ev");
            }
        }

        // a no-op evasion is not reported
        res.keyword_matches.retain(|w| !keywords_to_remove.contains(w));

        // ── pattern gate & scoring ────────────────────────────────────────────
        let mut keywords_num = count_not_in_set(&res.keyword_matches, ignored_keywords);
        let mut regex_num = count_not_in_set(&res.regex_matches, ignored_patterns);

        let force_report = is_url_stage && res.found_patterns.keys().any(|k| k.contains("url"));

        // pattern_regex only runs against the base line once a cheaper
        // pre-suspicion threshold already holds
        if keywords_num + regex_num > 2
            || res.found_patterns.keys().any(|k| k.contains("acur"))
            || force_report
            || detected_repetition
            || detected_probing
        {
            debug!(stage = scan_stage, "pre-suspicion found, applying pattern signatures");
            Self::check_regex(
                sigs,
                &sigs.pattern_regex,
                &unescaped,
                &mut res.regex_matches,
                &mut res.found_patterns,
                long_text_found,
                binary_data_found,
            );

            // fresh pattern hits can tip the probing ratio over
            if !binary_data_found
                && !res.regex_matches.is_empty()
                && !detected_probing
                && res.keyword_matches.len() + res.regex_matches.len() + 2 > words_floor as usize
            {
                detected_probing = true;
                res.keyword_matches.push("probing".to_string());
            }

            keywords_num = count_not_in_set(&res.keyword_matches, ignored_keywords);
            regex_num = count_not_in_set(&res.regex_matches, ignored_patterns);
        }

        let acuracy_bonus: usize = if res
            .found_patterns
            .keys()
            .any(|k| k.contains("high") || k.contains("hi_acur"))
        {
            2
        } else if res.found_patterns.keys().any(|k| k.contains("acur")) {
            1
        } else {
            0
        };

        res.score = (keywords_num + acuracy_bonus + 2 * regex_num) as f64;
        res.score_array.push(res.score);

        for (group, _) in res.found_patterns.iter() {
            for (family, types) in &sigs.attack_types {
                if group.contains(family.as_str()) {
                    res.attack_types.extend(types.iter().cloned());
                }
            }
        }

        let fast_reg_present = res.found_patterns.keys().any(|k| k.contains("fast_reg"));

        let suspicious = res.score > 2.0
            || force_report
            || fast_reg_present
            || detected_probing
            || detected_repetition;

        debug!(
            stage = scan_stage,
            score = res.score,
            keywords = keywords_num,
            suspicious,
            "scan done"
        );

        if should_cache {
            if suspicious {
                asset.insert_suspicious(cache_key, res.clone());
            } else {
                asset.insert_clean(cache_key);
            }
        }

        suspicious
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::asset::AssetState;

    fn asset() -> AssetState {
        AssetState::new("test-asset")
    }

    fn scan(asset: &AssetState, line: &[u8], stage: &str) -> (bool, ScanResult) {
        let mut res = ScanResult::default();
        let sus = Scanner::scan(asset, line, stage, false, None, &mut res);
        (sus, res)
    }

    #[test]
    fn empty_buffer_is_clean() {
        let a = asset();
        let (sus, res) = scan(&a, b"", "body");
        assert!(!sus);
        assert!(res.keyword_matches.is_empty());
    }

    #[test]
    fn plain_text_is_clean() {
        let a = asset();
        let (sus, _) = scan(&a, b"hello world", "body");
        assert!(!sus);
    }

    #[test]
    fn sqli_is_suspicious() {
        let a = asset();
        let (sus, res) = scan(&a, b"admin'+OR+1=1--", "url_param");
        assert!(sus);
        assert!(res.score > 2.0 || res.found_patterns.keys().any(|k| k.contains("fast_reg")));
    }

    #[test]
    fn encoded_sqli_is_suspicious() {
        let a = asset();
        let (sus, _) = scan(&a, b"%27%20OR%201%3D1--", "url_param");
        assert!(sus);
    }

    #[test]
    fn xss_is_suspicious() {
        let a = asset();
        let (sus, res) = scan(&a, b"<script>alert(1)</script>", "body");
        assert!(sus);
        assert!(res.attack_types.contains("Cross Site Scripting"));
    }

    #[test]
    fn pattern_regex_gated_behind_pre_suspicion() {
        let a = asset();
        // matches two pattern_regex groups but zero keywords: without the
        // pre-suspicion gate this would score 4 from patterns alone
        let (sus, res) = scan(&a, b"javascript: ;cat /tmp", "body");
        assert!(!sus);
        assert!(res.regex_matches.is_empty());

        // a keyword-suspicious value does consult pattern_regex
        let (sus, res) = scan(&a, b"' OR 1=1--", "body");
        assert!(sus);
        assert!(!res.regex_matches.is_empty());
    }

    #[test]
    fn clean_value_is_cached() {
        let a = asset();
        let (first, _) = scan(&a, b"hello world", "body");
        assert!(!first);
        let key = AssetState::cache_key(b"hello world", "body", false, None);
        assert!(a.is_clean_cached(&key));
    }

    #[test]
    fn suspicious_result_is_cached_and_replayed() {
        let a = asset();
        let (first, res1) = scan(&a, b"' OR 1=1--", "body");
        assert!(first);
        let (second, res2) = scan(&a, b"' OR 1=1--", "body");
        assert!(second);
        assert_eq!(res1.keyword_matches, res2.keyword_matches);
    }

    #[test]
    fn long_values_bypass_cache() {
        let a = asset();
        let long = vec![b'a'; MAX_CACHE_VALUE_SIZE + 1];
        scan(&a, &long, "body");
        let key = AssetState::cache_key(&long, "body", false, None);
        assert!(!a.is_clean_cached(&key));
    }

    #[test]
    fn url_static_resource_fast_exit() {
        let a = asset();
        let (sus, _) = scan(&a, b"/static/app.min.js", "url");
        assert!(!sus);
    }

    #[test]
    fn overlong_slash_evasion_detected() {
        let a = asset();
        let (sus, res) = scan(&a, b"/admin/%c1%1c../%c1%1c../etc/passwd", "url");
        assert!(sus, "evasion variant must be rescanned and flagged");
        assert!(res.found_patterns.contains_key("evasion"));
    }

    #[test]
    fn comment_evasion_peeled() {
        let a = asset();
        let (sus, _) = scan(&a, b"uni/**/on sel/**/ect 1,2 from users where '1'='1", "body");
        assert!(sus);
    }

    #[test]
    fn repetition_detected() {
        let a = asset();
        let line = "ab".repeat(200);
        let (_, res) = scan(&a, line.as_bytes(), "body");
        assert!(res.keyword_matches.iter().any(|k| k == "repetition"));
    }

    #[test]
    fn response_body_error_disclosure() {
        let a = asset();
        let mut res = ScanResult::default();
        assert!(Scanner::scan_response(
            &a,
            "resp_body",
            b"Warning: ORA-01017 invalid username",
            &mut res
        ));
        let mut res2 = ScanResult::default();
        assert!(!Scanner::scan_response(&a, "resp_body", b"<html>ok</html>", &mut res2));
    }

    #[test]
    fn merge_deduplicates() {
        let mut a = ScanResult::default();
        a.keyword_matches.push("x".into());
        let mut b = ScanResult::default();
        b.keyword_matches.push("x".into());
        b.keyword_matches.push("y".into());
        a.merge_from(&b);
        assert_eq!(a.keyword_matches, vec!["x".to_string(), "y".to_string()]);
    }
}
