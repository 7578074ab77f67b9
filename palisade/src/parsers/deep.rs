// palisade/src/parsers/deep.rs
//
// The recursion engine. Each key/value pair is probed for another layer
// of encoding (base64, UTF-16, JSON, XML, HTML, multipart, PHP-serialized,
// GraphQL, url-encoded or delimited pairs); chosen sub-parsers run to
// completion and their emissions recurse. Whatever survives un-peeled is
// emitted as a leaf for the scanner, under its full dotted key path.

use super::binary::BinaryParser;
use super::delimiter::DelimiterParser;
use super::graphql::{looks_like_graphql, GraphqlParser};
use super::html::{starts_with_html_tag, HtmlParser};
use super::json::JsonParser;
use super::keystack::KeyStack;
use super::multipart::MultipartParser;
use super::percent::PercentParser;
use super::phpser::{looks_like_php_serialized, PhpSerParser};
use super::urlencode::UrlEncodeParser;
use super::xml::XmlParser;
use super::{kvflags, KvPair, Parser};
use crate::decode::{b64_test, decode_utf16_value, B64Variant};
use crate::stats::{is_binary_sample, ValueStats};
use tracing::debug;

/// Maximum logical nesting depth of peeled layers.
pub const MAX_DEPTH: usize = 7;

/// Default cap on structural (JSON/XML) object depth across one value tree.
pub const DEFAULT_GLOBAL_OBJECT_DEPTH: usize = 25;

/// Kind of context the deep parser was entered from. Cookies never get the
/// split-by-delimiter fallback; taps only apply to cookie/header/body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Body,
    Url,
    Referer,
    Cookie,
    Header,
}

/// Delimiter-split flavor attached to leaves produced by the fallback split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitType {
    Semicolon,
    Pipe,
}

impl SplitType {
    pub fn as_str(self) -> &'static str {
        match self {
            SplitType::Semicolon => "sem",
            SplitType::Pipe => "pipe",
        }
    }
}

/// A fully-peeled leaf handed to the scanner.
#[derive(Debug, Clone)]
pub struct DeepLeaf {
    pub key:        Vec<u8>,
    pub value:      Vec<u8>,
    pub is_binary:  bool,
    pub split_type: Option<SplitType>,
}

/// Learned parameter types confirmed at runtime by the sample classifier.
pub trait LearnedTypes {
    fn types_for(&self, key: &[u8]) -> Vec<String>;

    /// Does the runtime value still look like the learned type?
    fn confirm(&self, _value: &[u8], _learned_type: &str) -> bool {
        true
    }
}

/// No learned types; pure shape-driven selection.
pub struct NoLearnedTypes;

impl LearnedTypes for NoLearnedTypes {
    fn types_for(&self, _key: &[u8]) -> Vec<String> {
        Vec::new()
    }
}

// Keys the attachment consumes verbatim (anti-CSRF token carriers);
// decoding them would corrupt the token comparison downstream.
const RESERVED_KEYS: &[&[u8]] = &[b"x-csrf-token", b"x-xsrf-token", b"csrf_token", b"csrfmiddlewaretoken"];

pub struct DeepParser<'a> {
    source:             SourceKind,
    key_stack:          KeyStack,
    multipart_boundary: Option<Vec<u8>>,
    learned:            &'a dyn LearnedTypes,
    global_object_cap:  usize,
    object_depth_used:  usize,
    leaves:             Vec<DeepLeaf>,
    is_wbxml:           bool,
}

impl<'a> DeepParser<'a> {
    pub fn new(source: SourceKind, learned: &'a dyn LearnedTypes) -> Self {
        Self {
            source,
            key_stack: KeyStack::new(),
            multipart_boundary: None,
            learned,
            global_object_cap: DEFAULT_GLOBAL_OBJECT_DEPTH,
            object_depth_used: 0,
            leaves: Vec::new(),
            is_wbxml: false,
        }
    }

    pub fn set_multipart_boundary(&mut self, boundary: &[u8]) {
        self.multipart_boundary = Some(boundary.to_vec());
    }

    pub fn set_global_object_cap(&mut self, cap: usize) {
        self.global_object_cap = cap;
    }

    pub fn is_wbxml(&self) -> bool {
        self.is_wbxml
    }

    /// Parse one top-level parameter; returns the peeled leaves.
    pub fn parse(&mut self, key: &[u8], value: &[u8]) -> Vec<DeepLeaf> {
        self.process_kv(key, value, 0, 0, None);
        std::mem::take(&mut self.leaves)
    }

    fn emit(&mut self, value: &[u8], is_binary: bool, split_type: Option<SplitType>) {
        if value.is_empty() && self.key_stack.is_empty() {
            return; // never hand an empty pair to the receiver
        }
        self.leaves.push(DeepLeaf {
            key: self.key_stack.full(),
            value: value.to_vec(),
            is_binary,
            split_type,
        });
    }

    fn process_kv(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u8,
        depth: usize,
        split_type: Option<SplitType>,
    ) {
        let named = flags & kvflags::UNNAMED == 0 && !key.is_empty();
        if named {
            self.key_stack.push(key);
        }

        self.process_value(value, depth, split_type);

        if named {
            self.key_stack.pop();
        }
    }

    fn process_value(&mut self, value: &[u8], depth: usize, split_type: Option<SplitType>) {
        // depth guard: too deep, emit unchanged
        if depth > MAX_DEPTH {
            debug!(depth, "depth limit reached, emitting raw");
            self.emit(value, false, split_type);
            return;
        }

        // reserved keys bypass all decoding
        let leaf_key: Vec<u8> = self.key_stack.last().to_ascii_lowercase();
        if matches!(self.source, SourceKind::Cookie | SourceKind::Header | SourceKind::Body)
            && RESERVED_KEYS.contains(&leaf_key.as_slice())
        {
            self.emit(value, false, None);
            return;
        }

        // base64 probe
        match b64_test(value) {
            B64Variant::SingleChunkConvert(decoded) => {
                self.key_stack.push(b"#base64");
                self.process_value(&decoded, depth + 1, None);
                self.key_stack.pop();
                return;
            }
            B64Variant::KeyValuePair(inner_key, decoded) => {
                self.key_stack.push(b"#base64");
                self.process_kv(inner_key.as_bytes(), &decoded, 0, depth + 1, None);
                self.key_stack.pop();
                return;
            }
            B64Variant::ContinueAsIs => {}
        }

        // stats + UTF-16 recovery
        let stats = ValueStats::new(value);
        if stats.is_utf16 {
            if let Some(decoded) = decode_utf16_value(&stats, value) {
                self.process_value(&decoded, depth + 1, split_type);
                return;
            }
        }

        // structured parser selection; a URL-shaped value yields an offset
        // so only its query portion is fed to the parser
        if let Some((mut parser, offset)) = self.select_parser(value, &stats, depth) {
            let structural = matches!(parser.name(), "json" | "xml");
            if structural {
                if self.object_depth_used >= self.global_object_cap {
                    debug!("global object depth cap reached, emitting raw");
                    self.emit(value, false, split_type);
                    return;
                }
                self.object_depth_used += 1;
            }

            let mut out: Vec<KvPair> = Vec::new();
            let pushed = parser.push(&value[offset.min(value.len())..], &mut out).is_ok();
            let finished = parser.finish(&mut out).is_ok();

            if !pushed || !finished {
                // degraded parse: scan the raw bytes as a leaf
                debug!(parser = parser.name(), "sub-parser failed, scanning raw value");
                self.emit(value, is_binary_sample(value), split_type);
                return;
            }

            // binary passthrough terminates the peel: its output is the leaf
            if parser.name() == "binary" {
                self.is_wbxml = crate::stats::is_wbxml_sample(value);
                for kv in out {
                    self.emit(&kv.value, true, None);
                }
                return;
            }

            // markup is evidence in its own right: scan the whole value too
            if matches!(parser.name(), "html" | "xml") {
                self.emit(value, false, split_type);
            }

            for kv in out {
                self.process_kv(&kv.key, &kv.value, kv.flags, depth + 1, None);
            }
            return;
        }

        // split-by-delimiter fallback (never inside cookies)
        if self.source != SourceKind::Cookie && depth <= MAX_DEPTH {
            if stats.has_char_semicolon && stats.can_split_semicolon {
                self.split_and_recurse(value, b';', SplitType::Semicolon, depth);
                return;
            }
            if stats.has_char_pipe && stats.can_split_pipe {
                self.split_and_recurse(value, b'|', SplitType::Pipe, depth);
                return;
            }
        }

        // leaf
        self.emit(value, is_binary_sample(value), split_type);
    }

    fn split_and_recurse(&mut self, value: &[u8], delim: u8, split: SplitType, depth: usize) {
        for piece in value.split(|&b| b == delim) {
            if piece.is_empty() {
                continue;
            }
            self.process_value(piece, depth + 1, Some(split));
        }
    }

    // Returns the chosen parser plus the byte offset at which to start
    // feeding it (non-zero only for URL-shaped values, whose scheme,
    // authority and path prefix are consumed before pair parsing).
    fn select_parser(
        &self,
        value: &[u8],
        stats: &ValueStats,
        depth: usize,
    ) -> Option<(Box<dyn Parser>, usize)> {
        if value.is_empty() {
            return None;
        }

        // multipart body, boundary known from the enclosing content-type
        if let Some(boundary) = &self.multipart_boundary {
            if depth == 0 && self.source == SourceKind::Body {
                let mut full = b"--".to_vec();
                full.extend_from_slice(boundary);
                if value.windows(full.len()).any(|w| w == full.as_slice()) {
                    return Some((Box::new(MultipartParser::new(boundary, depth)), 0));
                }
            }
        }

        // top-level binary payloads suppress textual decoding; nested
        // binary leaves are flagged at emission instead
        if depth == 0 && is_binary_sample(value) {
            return Some((Box::new(BinaryParser::new(depth)), 0));
        }

        let first = value[0];

        // JSON: '{' or '[' opener with pair/array shape
        if (first == b'{' || first == b'[') && value.len() >= 2 {
            let looks_json = value.iter().any(|&b| b == b':')
                || (first == b'[' && value.last() == Some(&b']'));
            if looks_json {
                return Some((Box::new(JsonParser::new(depth)), 0));
            }
        }

        // markup: HTML wins when the tag lookahead knows the name
        if first == b'<' {
            if starts_with_html_tag(value) {
                return Some((Box::new(HtmlParser::new(depth)), 0));
            }
            if value.len() > 1 && (value[1].is_ascii_alphabetic() || value[1] == b'?' || value[1] == b'!') {
                return Some((Box::new(XmlParser::new(depth)), 0));
            }
        }

        if looks_like_php_serialized(value) {
            return Some((Box::new(PhpSerParser::new(depth)), 0));
        }

        if looks_like_graphql(value) {
            return Some((Box::new(GraphqlParser::new(depth)), 0));
        }

        // learned parameter types, when the runtime shape still agrees
        let learned = self.learned.types_for(&self.key_stack.full());
        for t in learned.iter().filter(|t| self.learned.confirm(value, t)) {
            match t.as_str() {
                "ampersand_delimiter" if stats.has_char_ampersand && stats.has_char_equal => {
                    return Some((Box::new(UrlEncodeParser::new(b'&', true, depth)), 0));
                }
                "semicolon_delimiter" if stats.has_char_semicolon => {
                    return Some((Box::new(UrlEncodeParser::new(b';', true, depth)), 0));
                }
                "pipes" if stats.has_char_pipe => {
                    return Some((Box::new(DelimiterParser::new(b'|', depth)), 0));
                }
                "asterisk_delimiter" if value.contains(&b'*') => {
                    return Some((Box::new(DelimiterParser::new(b'*', depth)), 0));
                }
                "comma_delimiter" if value.contains(&b',') => {
                    return Some((Box::new(DelimiterParser::new(b',', depth)), 0));
                }
                "html_input" if stats.has_char_less => {
                    return Some((Box::new(HtmlParser::new(depth)), 0));
                }
                "binary_input" => return Some((Box::new(BinaryParser::new(depth)), 0)),
                _ => {}
            }
        }

        // URL shape: scheme/authority or path prefix is consumed, only the
        // query portion parses as pairs
        if let Some(offset) = url_query_offset(stats, value) {
            return Some((Box::new(UrlEncodeParser::new(b'&', true, depth)), offset));
        }

        // pair shape: a=b&c=d
        if stats.has_char_ampersand && stats.has_char_equal {
            return Some((Box::new(UrlEncodeParser::new(b'&', true, depth)), 0));
        }

        // top-level query strings and form bodies are pairs even without '&'
        if depth == 0
            && matches!(self.source, SourceKind::Body | SourceKind::Url)
            && stats.has_char_equal
        {
            return Some((Box::new(UrlEncodeParser::new(b'&', true, depth)), 0));
        }

        // ';'-separated pairs need two '=' to be worth pair-parsing
        if stats.has_char_semicolon && stats.has_two_chars_equal {
            return Some((Box::new(UrlEncodeParser::new(b';', true, depth)), 0));
        }

        // lone percent-encoded blob: one more peel
        if stats.is_url_encoded {
            return Some((Box::new(PercentParser::new(depth)), 0));
        }

        None
    }
}

// Offset of the query portion inside a URL-shaped value: for
// "/uri_path?param=value&..." or "http[s]://host[:port]/path?param=..."
// the offset points at the first byte after '?'. None when the value is
// not URL-shaped or carries no query.
fn url_query_offset(stats: &ValueStats, value: &[u8]) -> Option<usize> {
    let mut continue_flag = false;
    let mut p = 0usize;

    // leading /path segment
    if stats.has_char_slash && stats.has_char_equal && value.len() > 1 && value[0] == b'/' {
        p = 1;
        continue_flag = true;
        while p < value.len()
            && (value[p].is_ascii_alphanumeric() || matches!(value[p], b'.' | b'-' | b'_'))
        {
            p += 1;
        }
    }

    // http[s]://host[:port] authority; '@' and ':' allowed in the host part
    if !continue_flag && stats.has_char_colon && stats.has_char_slash && value.len() > 7 {
        if value.starts_with(b"http") {
            let mut q = 4;
            if value.get(q) == Some(&b's') {
                q += 1;
            }
            if value[q..].starts_with(b"://") {
                q += 3;
                while q < value.len()
                    && (value[q].is_ascii_alphanumeric()
                        || matches!(value[q], b'.' | b'-' | b'_' | b':' | b'@'))
                {
                    q += 1;
                }
                if value.get(q) != Some(&b'/') {
                    return None;
                }
                p = q;
                continue_flag = true;
            }
        }
    }

    if !continue_flag {
        return None;
    }

    // skip the rest of the path to the query marker
    let question = p + value[p..].iter().position(|&b| b == b'?')?;
    (question + 1 < value.len()).then_some(question + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: SourceKind, key: &[u8], value: &[u8]) -> Vec<DeepLeaf> {
        let mut dp = DeepParser::new(source, &NoLearnedTypes);
        dp.parse(key, value)
    }

    fn keys(leaves: &[DeepLeaf]) -> Vec<String> {
        leaves.iter().map(|l| String::from_utf8_lossy(&l.key).into_owned()).collect()
    }

    #[test]
    fn plain_value_is_one_leaf() {
        let leaves = parse(SourceKind::Body, b"user", b"admin");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].key, b"user");
        assert_eq!(leaves[0].value, b"admin");
    }

    #[test]
    fn query_pairs_recurse() {
        let leaves = parse(SourceKind::Body, b"body", b"user=admin&pass=x");
        assert_eq!(keys(&leaves), vec!["body.user", "body.pass"]);
    }

    #[test]
    fn base64_layer_gets_marker() {
        let leaves = parse(SourceKind::Body, b"data", b"PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==");
        // the peeled markup is scanned whole, its text fragments separately
        let key = String::from_utf8_lossy(&leaves[0].key);
        assert!(key.ends_with("#base64"), "key was {}", key);
        assert_eq!(leaves[0].value, b"<script>alert(1)</script>");
    }

    #[test]
    fn json_inside_query() {
        let leaves = parse(SourceKind::Body, b"q", br#"{"a":{"b":"payload"}}"#);
        assert_eq!(keys(&leaves), vec!["q.a.b"]);
        assert_eq!(leaves[0].value, b"payload");
    }

    #[test]
    fn utf16_is_peeled() {
        let raw: Vec<u8> = b"attack string".iter().flat_map(|&c| [0u8, c]).collect();
        let leaves = parse(SourceKind::Body, b"v", &raw);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, b"attack string");
    }

    #[test]
    fn url_path_prefix_consumed_before_pair_parse() {
        let leaves = parse(SourceKind::Body, b"v", b"/search?q=1&x=alpha");
        assert_eq!(keys(&leaves), vec!["v.q", "v.x"]);
        assert_eq!(leaves[0].value, b"1");
        assert_eq!(leaves[1].value, b"alpha");
    }

    #[test]
    fn url_authority_prefix_consumed_before_pair_parse() {
        let leaves =
            parse(SourceKind::Body, b"v", b"https://user@host.example.com:8443/path?a=1&b=2");
        assert_eq!(keys(&leaves), vec!["v.a", "v.b"]);
    }

    #[test]
    fn url_without_query_stays_a_leaf() {
        let leaves = parse(SourceKind::Body, b"v", b"http://host.example.com/nothing");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, b"http://host.example.com/nothing");
    }

    #[test]
    fn url_query_offset_shapes() {
        let probe = |v: &[u8]| url_query_offset(&ValueStats::new(v), v);
        assert_eq!(probe(b"/search?q=1"), Some(8));
        assert_eq!(probe(b"/?a=1"), Some(2));
        assert_eq!(probe(b"http://h.example.com/p?a=1"), Some(23));
        // authority must end in '/' to count as a URL
        assert_eq!(probe(b"http://hostonly"), None);
        // plain pairs carry no prefix
        assert_eq!(probe(b"a=1&b=2"), None);
    }

    #[test]
    fn semicolon_split_fallback() {
        let leaves = parse(SourceKind::Body, b"v", b"alpha;beta;gamma");
        assert_eq!(leaves.len(), 3);
        assert!(leaves.iter().all(|l| l.split_type == Some(SplitType::Semicolon)));
    }

    #[test]
    fn cookie_values_never_split() {
        let leaves = parse(SourceKind::Cookie, b"sid", b"alpha;beta");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, b"alpha;beta");
    }

    #[test]
    fn reserved_key_bypasses_decoding() {
        let leaves = parse(SourceKind::Header, b"X-CSRF-Token", b"YWJjZGVmZ2hpamtsbW5vcA==");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, b"YWJjZGVmZ2hpamtsbW5vcA==");
    }

    #[test]
    fn multipart_parts_recurse() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nuser=admin&x=1\r\n--B--\r\n";
        let mut dp = DeepParser::new(SourceKind::Body, &NoLearnedTypes);
        dp.set_multipart_boundary(b"B");
        let leaves = dp.parse(b"body", body);
        assert!(keys(&leaves).contains(&"body.f.user".to_string()));
    }

    #[test]
    fn depth_limit_emits_raw() {
        // 8 nested base64 layers exceed the depth cap of 7
        let mut payload = b"user=admin&pass=doesnotmatter".to_vec();
        use base64::Engine;
        for _ in 0..9 {
            payload = base64::engine::general_purpose::STANDARD
                .encode(&payload)
                .into_bytes();
        }
        // must terminate and emit something
        let leaves = parse(SourceKind::Body, b"v", &payload);
        assert!(!leaves.is_empty());
    }

    #[test]
    fn binary_value_flagged() {
        let value = [b'a', 0, 0, b'b', 0xFF, 0, b'c'];
        let leaves = parse(SourceKind::Body, b"v", &value);
        assert_eq!(leaves.len(), 1);
        assert!(leaves[0].is_binary);
    }

    #[test]
    fn empty_value_with_key_still_emits() {
        let leaves = parse(SourceKind::Body, b"k", b"");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, b"");
    }
}
