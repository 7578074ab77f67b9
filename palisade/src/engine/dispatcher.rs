// palisade/src/engine/dispatcher.rs
//
// The transaction dispatcher. HTTP events come in, context buffers are
// composed and published to the signature matcher and the deep-scan
// listener, verdicts go out. Publication order is the arrival order of
// events; the first DROP reply latches the transaction drop flag but
// every listener still observes every context.

use crate::engine::decision::{DecisionSet, DecisionType};
use crate::engine::matcher::{ExceptionRulebase, SignatureMatcher};
use crate::engine::scanner::{ScanResult, Scanner};
use crate::events::{
    ContextReply, DecisionLogRecord, EventVerdict, FeedRecord, HttpEvent, MatchEvent,
    ParsedContext,
};
use crate::parsers::deep::{DeepParser, SourceKind};
use crate::state::asset::AssetState;
use crate::state::transaction::TransactionCtx;
use dashmap::DashMap;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const HEADER_LOG_KEY: &str = "requests_header_for_log";
const DEFAULT_MAX_FIELD_SIZE: usize = 1536;

/// Score at or above which a suspicious value blocks in prevent mode.
const WAAP_BLOCK_SCORE: f64 = 3.0;

#[derive(Clone)]
pub struct DispatcherConfig {
    pub asset_id:            String,
    pub practice_id:         String,
    pub practice_name:       String,
    pub prevent_mode:        bool,
    pub max_field_size:      usize,
    pub transaction_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            asset_id:            "default-asset".to_string(),
            practice_id:         "default-practice".to_string(),
            practice_name:       "Web Application Protection".to_string(),
            prevent_mode:        true,
            max_field_size:      DEFAULT_MAX_FIELD_SIZE,
            transaction_timeout: Duration::from_secs(5),
        }
    }
}

/// What one event produced: the verdict plus, at transaction end, the
/// decision-log record and the accumulated match events.
pub struct EventOutcome {
    pub verdict:      EventVerdict,
    pub log_record:   Option<DecisionLogRecord>,
    pub match_events: Vec<MatchEvent>,
}

impl EventOutcome {
    fn verdict(verdict: EventVerdict) -> Self {
        Self { verdict, log_record: None, match_events: Vec::new() }
    }
}

struct TransactionEntry {
    txn:          TransactionCtx,
    match_events: Vec<MatchEvent>,
    decisions:    DecisionSet,
    waap_scan:    ScanResult,
}

impl TransactionEntry {
    fn new(deadline: Instant) -> Self {
        let mut txn = TransactionCtx::new();
        txn.deadline = Some(deadline);
        Self {
            txn,
            match_events: Vec::new(),
            decisions: DecisionSet::new(),
            waap_scan: ScanResult::default(),
        }
    }
}

pub struct Dispatcher {
    matcher:    Arc<SignatureMatcher>,
    exceptions: Arc<ExceptionRulebase>,
    asset:      Arc<AssetState>,
    config:     DispatcherConfig,
    entries:    DashMap<u64, TransactionEntry>,
    /// Listener failures answered with ACCEPT (fail-open), for telemetry.
    pub fail_open_count: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        matcher: Arc<SignatureMatcher>,
        exceptions: Arc<ExceptionRulebase>,
        asset: Arc<AssetState>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            matcher,
            exceptions,
            asset,
            config,
            entries: DashMap::new(),
            fail_open_count: AtomicU64::new(0),
        }
    }

    /// Process one transaction event and return its verdict.
    pub fn handle(&self, rec: &FeedRecord) -> EventOutcome {
        match &rec.event {
            HttpEvent::NewTransaction { method, uri, protocol } => {
                self.on_new_transaction(rec, method, uri, protocol)
            }
            HttpEvent::RequestHeader { name, value, is_last } => {
                self.on_request_header(rec.txn, name, value, *is_last)
            }
            HttpEvent::RequestBody { data } => self.on_request_body(rec.txn, data),
            HttpEvent::EndRequest => self.on_end_request(rec.txn),
            HttpEvent::ResponseCode { code } => self.on_response_code(rec.txn, *code),
            HttpEvent::ResponseHeader { name, value } => {
                self.on_response_header(rec.txn, name, value)
            }
            HttpEvent::ResponseBody { data, is_last } => {
                self.on_response_body(rec.txn, data, *is_last)
            }
            HttpEvent::EndTransaction => self.on_end_transaction(rec.txn),
        }
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    fn on_new_transaction(
        &self,
        rec: &FeedRecord,
        method: &str,
        uri: &str,
        protocol: &str,
    ) -> EventOutcome {
        let mut entry = TransactionEntry::new(Instant::now() + self.config.transaction_timeout);
        entry.txn.host = rec.host.clone();
        entry.txn.source_ip = rec.source_ip.clone();
        entry.txn.source_id = rec.source_id.clone();

        let txn = &mut entry.txn;
        txn.add_pending_context("HTTP_METHOD", method.as_bytes().to_vec());
        txn.add_pending_context("HTTP_COMPLETE_URL_ENCODED", uri.as_bytes().to_vec());

        let decoded_url = crate::decode::unescape::url_decode(uri.as_bytes());
        match decoded_url.iter().position(|&b| b == b'?') {
            Some(q) => {
                txn.add_pending_context("HTTP_QUERY_DECODED", decoded_url[q + 1..].to_vec());
                txn.add_pending_context("HTTP_PATH_DECODED", decoded_url[..q].to_vec());
            }
            None => {
                txn.add_pending_context("HTTP_PATH_DECODED", decoded_url.clone());
            }
        }
        txn.add_pending_context("HTTP_COMPLETE_URL_DECODED", decoded_url);
        txn.add_pending_context("HTTP_PROTOCOL", protocol.as_bytes().to_vec());

        let raw = format!("{} {} {}\r\n", method, uri, protocol);
        txn.add_pending_context("HTTP_RAW", raw.into_bytes());

        self.entries.insert(rec.txn, entry);
        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_request_header(&self, txn_id: u64, name: &str, value: &str, is_last: bool) -> EventOutcome {
        let Some(mut entry) = self.entries.get_mut(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };
        let entry = entry.value_mut();
        if self.deadline_expired(entry) {
            return EventOutcome::verdict(EventVerdict::Accept);
        }

        let header_value = format!("{}: {}", name, value);
        let full_header = format!("{}\r\n", header_value);
        let upper_name = name.to_ascii_uppercase();

        let txn = &mut entry.txn;
        txn.add_pending_context("HTTP_REQUEST_ONE_HEADER", header_value.clone().into_bytes());
        txn.add_pending_context("HTTP_REQUEST_HEADER", full_header.clone().into_bytes());
        txn.add_pending_context(
            &format!("HTTP_REQUEST_HEADER_{}", upper_name),
            value.as_bytes().to_vec(),
        );
        txn.add_pending_context("HTTP_RAW", full_header.into_bytes());

        // rolling request-header log, bounded by the max field size
        match txn.transaction_data(HEADER_LOG_KEY) {
            None => txn.set_transaction_data(HEADER_LOG_KEY, header_value.as_bytes()),
            Some(existing) => {
                if existing.len() + 2 + header_value.len() < self.config.max_field_size {
                    let mut combined = existing.to_vec();
                    combined.extend_from_slice(b", ");
                    combined.extend_from_slice(header_value.as_bytes());
                    txn.set_transaction_data(HEADER_LOG_KEY, &combined);
                }
            }
        }
        txn.set_transaction_data(name, value.as_bytes());

        if is_last {
            let pending = entry.txn.take_pending_contexts();
            for (ctx_name, buf) in pending {
                if self.publish(entry, &ctx_name, &buf) {
                    entry.txn.set_drop();
                }
            }
            if entry.txn.is_drop() {
                return EventOutcome::verdict(EventVerdict::Drop);
            }
        }

        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_request_body(&self, txn_id: u64, data: &[u8]) -> EventOutcome {
        let Some(mut entry) = self.entries.get_mut(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };
        let entry = entry.value_mut();
        if self.deadline_expired(entry) {
            return EventOutcome::verdict(EventVerdict::Accept);
        }

        if self.publish(entry, "HTTP_REQUEST_BODY", data) {
            entry.txn.set_drop();
        }

        if !entry.txn.is_flag_set("HttpRequestData") {
            entry.txn.set_flag("HttpRequestData");
            let composite = self.compose_request_data(&entry.txn, Some(data));
            if self.publish(entry, "HTTP_REQUEST_DATA", &composite) {
                entry.txn.set_drop();
            }
        }

        if self.publish(entry, "HTTP_RAW", data) {
            entry.txn.set_drop();
        }

        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_end_request(&self, txn_id: u64) -> EventOutcome {
        let Some(mut entry) = self.entries.get_mut(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };
        let entry = entry.value_mut();
        if self.deadline_expired(entry) {
            return EventOutcome::verdict(EventVerdict::Accept);
        }

        if !entry.txn.is_flag_set("HttpRequestData") {
            entry.txn.set_flag("HttpRequestData");
            let composite = self.compose_request_data(&entry.txn, None);
            if self.publish(entry, "HTTP_REQUEST_DATA", &composite) {
                entry.txn.set_drop();
            }
        }

        if entry.txn.is_drop() {
            entry.decisions.get_mut(DecisionType::AutonomousSecurity).block = true;
            entry.decisions.get_mut(DecisionType::AutonomousSecurity).log = true;
            return EventOutcome::verdict(EventVerdict::Drop);
        }

        // response contexts are always inspected: the error-disclosure
        // scan runs even when no response signature is installed
        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_response_code(&self, txn_id: u64, code: u16) -> EventOutcome {
        let Some(mut entry) = self.entries.get_mut(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };
        let entry = entry.value_mut();
        if self.deadline_expired(entry) {
            return EventOutcome::verdict(EventVerdict::Accept);
        }
        let buf = code.to_string();
        if self.publish(entry, "HTTP_RESPONSE_CODE", buf.as_bytes()) {
            entry.txn.set_drop();
            return EventOutcome::verdict(EventVerdict::Drop);
        }
        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_response_header(&self, txn_id: u64, name: &str, value: &str) -> EventOutcome {
        let Some(mut entry) = self.entries.get_mut(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };
        let entry = entry.value_mut();
        if self.deadline_expired(entry) {
            return EventOutcome::verdict(EventVerdict::Accept);
        }
        let header_value = format!("{}: {}", name, value);
        if self.publish(entry, "HTTP_RESPONSE_HEADER", header_value.as_bytes()) {
            entry.txn.set_drop();
            return EventOutcome::verdict(EventVerdict::Drop);
        }
        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_response_body(&self, txn_id: u64, data: &[u8], is_last: bool) -> EventOutcome {
        let Some(mut entry) = self.entries.get_mut(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };
        let entry = entry.value_mut();
        if self.deadline_expired(entry) {
            return EventOutcome::verdict(EventVerdict::Accept);
        }
        if self.publish(entry, "HTTP_RESPONSE_BODY", data) {
            entry.txn.set_drop();
            return EventOutcome::verdict(EventVerdict::Drop);
        }
        if is_last {
            return EventOutcome::verdict(EventVerdict::Accept);
        }
        EventOutcome::verdict(EventVerdict::Inspect)
    }

    fn on_end_transaction(&self, txn_id: u64) -> EventOutcome {
        let Some((_, entry)) = self.entries.remove(&txn_id) else {
            return EventOutcome::verdict(EventVerdict::Accept);
        };

        let mut details = HashMap::new();
        if let Some(hdrs) = entry.txn.transaction_data(HEADER_LOG_KEY) {
            details.insert(
                "httpRequestHeaders".to_string(),
                String::from_utf8_lossy(hdrs).into_owned(),
            );
        }
        let path = entry.txn.buffer("HTTP_PATH_DECODED");
        if !path.is_empty() {
            details.insert("httpUriPath".to_string(), String::from_utf8_lossy(&path).into_owned());
        }
        if let Some(host) = &entry.txn.host {
            details.insert("httpHostName".to_string(), host.clone());
        }

        let log_record = entry.decisions.log_record(
            &self.config.asset_id,
            &self.config.practice_id,
            &self.config.practice_name,
            entry.txn.source_ip.as_deref().unwrap_or(""),
            entry.waap_scan.score,
            entry.waap_scan.attack_types.iter().cloned().collect(),
            details,
        );

        EventOutcome {
            verdict: EventVerdict::Accept,
            log_record,
            match_events: entry.match_events,
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn deadline_expired(&self, entry: &TransactionEntry) -> bool {
        match entry.txn.deadline {
            Some(deadline) if Instant::now() > deadline => {
                debug!("transaction deadline expired, failing open");
                true
            }
            _ => false,
        }
    }

    fn compose_request_data(&self, txn: &TransactionCtx, body: Option<&[u8]>) -> Vec<u8> {
        let mut data = txn.buffer("HTTP_METHOD");
        data.push(b' ');
        data.extend_from_slice(&txn.buffer("HTTP_COMPLETE_URL_DECODED"));
        data.push(b' ');
        data.extend_from_slice(&txn.buffer("HTTP_PROTOCOL"));
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(&txn.buffer("HTTP_REQUEST_HEADER"));
        data.extend_from_slice(b"\r\n");
        if let Some(body) = body {
            data.extend_from_slice(body);
        }
        data
    }

    // Deliver one context to every listener and collect their replies.
    // Returns true when any listener answered DROP; a panicking listener
    // counts as an ACCEPT and increments the fail-open counter.
    fn publish(&self, entry: &mut TransactionEntry, name: &str, buf: &[u8]) -> bool {
        if self.deadline_expired(entry) {
            return false;
        }

        let observed = entry.txn.register(name, buf);
        let parsed = ParsedContext::new(name, observed);
        debug!(context = name, len = parsed.buf.len(), "publishing context");

        let mut replies: Vec<ContextReply> = Vec::with_capacity(2);

        // signature matcher listener
        let matcher = Arc::clone(&self.matcher);
        let exceptions = Arc::clone(&self.exceptions);
        let result = catch_unwind(AssertUnwindSafe(|| {
            matcher.is_matched_prevent(
                &parsed.name,
                &parsed.buf,
                &mut entry.txn,
                &exceptions,
                &mut entry.match_events,
            )
        }));
        match result {
            Ok(true) => replies.push(ContextReply::Drop),
            Ok(false) => replies.push(ContextReply::Accept),
            Err(_) => {
                self.fail_open_count.fetch_add(1, Ordering::Relaxed);
                error!(context = name, "signature listener panicked, failing open");
                replies.push(ContextReply::Accept);
            }
        }

        // deep-scan listener
        let result =
            catch_unwind(AssertUnwindSafe(|| self.waap_inspect(entry, &parsed.name, &parsed.buf)));
        match result {
            Ok(true) => replies.push(ContextReply::Drop),
            Ok(false) => replies.push(ContextReply::Accept),
            Err(_) => {
                self.fail_open_count.fetch_add(1, Ordering::Relaxed);
                error!(context = name, "scan listener panicked, failing open");
                replies.push(ContextReply::Accept);
            }
        }

        replies.contains(&ContextReply::Drop)
    }

    // The autonomous-protection path: deep-parse the context into leaves
    // and run the scanner over each, accumulating evidence and decisions.
    fn waap_inspect(&self, entry: &mut TransactionEntry, name: &str, buf: &[u8]) -> bool {
        let (source, stage, top_key): (SourceKind, &str, &[u8]) = match name {
            "HTTP_PATH_DECODED" | "HTTP_COMPLETE_URL_ENCODED" => (SourceKind::Url, "url", b"url"),
            "HTTP_QUERY_DECODED" => (SourceKind::Url, "url_param", b"query"),
            "HTTP_REQUEST_BODY" => (SourceKind::Body, "body", b"body"),
            "HTTP_REQUEST_HEADER_COOKIE" => (SourceKind::Cookie, "cookie", b"cookie"),
            "HTTP_REQUEST_HEADER_REFERER" => (SourceKind::Referer, "referer", b"referer"),
            _ if name.starts_with("HTTP_REQUEST_HEADER_") => {
                (SourceKind::Header, "header", b"header")
            }
            "HTTP_RESPONSE_BODY" => {
                let mut res = ScanResult::default();
                if Scanner::scan_response(&self.asset, "resp_body", buf, &mut res) {
                    entry.waap_scan.merge_from(&res);
                    entry.decisions.get_mut(DecisionType::ErrorDisclosure).log = true;
                }
                return false;
            }
            "HTTP_RESPONSE_HEADER" => {
                let mut res = ScanResult::default();
                if Scanner::scan_response(&self.asset, "resp_header", buf, &mut res) {
                    entry.waap_scan.merge_from(&res);
                    entry.decisions.get_mut(DecisionType::ErrorDisclosure).log = true;
                }
                return false;
            }
            _ => return false,
        };

        // the path and raw URL scan as single values; everything else goes deep
        let leaves = if name == "HTTP_PATH_DECODED" || name == "HTTP_COMPLETE_URL_ENCODED" {
            vec![crate::parsers::deep::DeepLeaf {
                key:        top_key.to_vec(),
                value:      buf.to_vec(),
                is_binary:  false,
                split_type: None,
            }]
        } else {
            let mut dp = DeepParser::new(source, self.asset.as_ref());
            if let Some(boundary) = multipart_boundary(&entry.txn) {
                dp.set_multipart_boundary(&boundary);
            }
            dp.parse(top_key, buf)
        };

        let mut blocked = false;
        for leaf in leaves {
            let mut res = ScanResult::default();
            let suspicious = Scanner::scan(
                &self.asset,
                &leaf.value,
                stage,
                leaf.is_binary,
                leaf.split_type.map(|s| s.as_str()),
                &mut res,
            );
            if !suspicious {
                continue;
            }
            res.param_name = String::from_utf8_lossy(&leaf.key).into_owned();
            let score = res.score;
            let probing = res.keyword_matches.iter().any(|k| k == "probing" || k == "repetition");
            entry.waap_scan.merge_from(&res);
            entry.waap_scan.score = entry.waap_scan.score.max(score);

            let decision = entry.decisions.get_mut(DecisionType::AutonomousSecurity);
            decision.log = true;
            if self.config.prevent_mode && (score >= WAAP_BLOCK_SCORE || probing) {
                decision.block = true;
                blocked = true;
            }
            warn!(
                context = name,
                param = res.param_name,
                score,
                "suspicious value detected"
            );
        }
        blocked
    }
}

// Boundary from the transaction's content-type header, when multipart.
fn multipart_boundary(txn: &TransactionCtx) -> Option<Vec<u8>> {
    let ct = txn.transaction_data("Content-Type").or_else(|| txn.transaction_data("content-type"))?;
    let text = String::from_utf8_lossy(ct);
    let lower = text.to_lowercase();
    if !lower.contains("multipart/") {
        return None;
    }
    let at = lower.find("boundary=")?;
    let rest = &text[at + "boundary=".len()..];
    let end = rest.find(';').unwrap_or(rest.len());
    let boundary = rest[..end].trim().trim_matches('"');
    (!boundary.is_empty()).then(|| boundary.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::matcher::FirstTierAggregator;
    use crate::signatures::policy::RuleSelector;
    use crate::signatures::store::SignatureStore;

    const SIGS: &str = r#"[
      {
        "protectionMetadata": {
          "maintrainId": "1", "protectionName": "Sqli.Or",
          "severity": "High", "confidenceLevel": "High", "performanceImpact": "Low",
          "cveList": [], "tags": ["Vul_Type_SQL_Injection"]
        },
        "detectionRules": {
          "type": "simple", "SSM": "or",
          "keywords": "'[\\s+]*or[\\s+]*\\d+=\\d+",
          "context": ["HTTP_QUERY_DECODED", "HTTP_PATH_DECODED"]
        }
      }
    ]"#;

    fn dispatcher() -> Dispatcher {
        let store = SignatureStore::load(SIGS, "local", "1").unwrap();
        let policy = r#"{ "rules": [], "defaultAction": "Prevent" }"#;
        let selected = RuleSelector::load(policy).unwrap().select_signatures(&store);
        let matcher = Arc::new(SignatureMatcher::new(selected, &FirstTierAggregator::new()));
        Dispatcher::new(
            matcher,
            Arc::new(ExceptionRulebase::default()),
            Arc::new(AssetState::new("test")),
            DispatcherConfig::default(),
        )
    }

    fn rec(txn: u64, event: HttpEvent) -> FeedRecord {
        FeedRecord { txn, host: None, source_ip: None, source_id: None, event }
    }

    fn start_request(d: &Dispatcher, txn: u64, method: &str, uri: &str) -> EventVerdict {
        d.handle(&rec(
            txn,
            HttpEvent::NewTransaction {
                method:   method.to_string(),
                uri:      uri.to_string(),
                protocol: "HTTP/1.1".to_string(),
            },
        ));
        d.handle(&rec(
            txn,
            HttpEvent::RequestHeader {
                name:    "Host".to_string(),
                value:   "app.example.com".to_string(),
                is_last: true,
            },
        ))
        .verdict
    }

    #[test]
    fn clean_request_passes() {
        let d = dispatcher();
        let verdict = start_request(&d, 1, "GET", "/index.html");
        assert_eq!(verdict, EventVerdict::Inspect);
        let end = d.handle(&rec(1, HttpEvent::EndRequest));
        assert_eq!(end.verdict, EventVerdict::Inspect);
    }

    #[test]
    fn sqli_in_query_drops_on_last_header() {
        let d = dispatcher();
        let verdict = start_request(&d, 2, "GET", "/login?user=admin%27+OR+1%3D1--");
        assert_eq!(verdict, EventVerdict::Drop);
    }

    #[test]
    fn signature_match_reported_in_match_events() {
        let d = dispatcher();
        start_request(&d, 3, "GET", "/login?user=admin%27+OR+1%3D1--");
        d.handle(&rec(3, HttpEvent::EndRequest));
        let outcome = d.handle(&rec(3, HttpEvent::EndTransaction));
        assert!(outcome.match_events.iter().any(|e| e.protection == "Sqli.Or"));
        assert!(outcome.log_record.is_some());
    }

    #[test]
    fn body_is_inspected() {
        let d = dispatcher();
        start_request(&d, 4, "POST", "/submit");
        d.handle(&rec(4, HttpEvent::RequestBody { data: b"comment=%3Cscript%3Ealert(1)%3C%2Fscript%3E".to_vec() }));
        let end = d.handle(&rec(4, HttpEvent::EndRequest));
        assert_eq!(end.verdict, EventVerdict::Drop);
    }

    #[test]
    fn response_last_chunk_accepts() {
        let d = dispatcher();
        start_request(&d, 5, "GET", "/ok");
        d.handle(&rec(5, HttpEvent::EndRequest));
        d.handle(&rec(5, HttpEvent::ResponseCode { code: 200 }));
        let mid = d.handle(&rec(5, HttpEvent::ResponseBody { data: b"partial".to_vec(), is_last: false }));
        assert_eq!(mid.verdict, EventVerdict::Inspect);
        let last = d.handle(&rec(5, HttpEvent::ResponseBody { data: b"done".to_vec(), is_last: true }));
        assert_eq!(last.verdict, EventVerdict::Accept);
    }

    #[test]
    fn unknown_transaction_accepts() {
        let d = dispatcher();
        let out = d.handle(&rec(99, HttpEvent::EndRequest));
        assert_eq!(out.verdict, EventVerdict::Accept);
    }

    #[test]
    fn end_transaction_cleans_up() {
        let d = dispatcher();
        start_request(&d, 6, "GET", "/page");
        d.handle(&rec(6, HttpEvent::EndTransaction));
        assert!(d.entries.is_empty());
    }

    #[test]
    fn request_header_log_is_bounded() {
        let d = dispatcher();
        d.handle(&rec(
            7,
            HttpEvent::NewTransaction {
                method:   "GET".into(),
                uri:      "/x".into(),
                protocol: "HTTP/1.1".into(),
            },
        ));
        for i in 0..100 {
            d.handle(&rec(
                7,
                HttpEvent::RequestHeader {
                    name:    format!("X-Header-{}", i),
                    value:   "v".repeat(64),
                    is_last: i == 99,
                },
            ));
        }
        let entry = d.entries.get(&7).unwrap();
        let log = entry.txn.transaction_data(HEADER_LOG_KEY).unwrap();
        assert!(log.len() <= DEFAULT_MAX_FIELD_SIZE);
    }
}
