// End-to-end pipeline scenarios: feed HTTP transaction events through the
// dispatcher and assert verdicts, evidence, and state behavior.

use std::sync::Arc;

use palisade::engine::dispatcher::{Dispatcher, DispatcherConfig};
use palisade::engine::matcher::{ExceptionRulebase, FirstTierAggregator, SignatureMatcher};
use palisade::engine::scanner::{ScanResult, Scanner};
use palisade::events::{EventVerdict, FeedRecord, HttpEvent};
use palisade::signatures::{RuleSelector, SignatureStore};
use palisade::state::transaction::TransactionCtx;
use palisade::state::AssetState;

const SQLI_SIGS: &str = r#"[
  {
    "protectionMetadata": {
      "maintrainId": "1001", "protectionName": "Sqli.BooleanOr",
      "severity": "High", "confidenceLevel": "High", "performanceImpact": "Low",
      "cveList": [], "tags": ["Vul_Type_SQL_Injection", "Threat_Year_2020"]
    },
    "detectionRules": {
      "type": "simple", "SSM": "OR",
      "keywords": "'[\\s+]*or[\\s+]*\\d+=\\d+",
      "context": ["HTTP_PATH_DECODED", "HTTP_QUERY_DECODED"]
    }
  }
]"#;

const ORDERED_SIGS: &str = r#"[
  {
    "protectionMetadata": {
      "maintrainId": "2001", "protectionName": "Staged.Attack",
      "severity": "High", "confidenceLevel": "High", "performanceImpact": "Low",
      "cveList": [], "tags": []
    },
    "detectionRules": {
      "type": "compound",
      "operation": "ordered_and",
      "operands": [
        { "type": "simple", "SSM": "marker-a", "keywords": "", "context": ["HTTP_QUERY_DECODED"] },
        { "type": "simple", "SSM": "marker-b", "keywords": "", "context": ["HTTP_REQUEST_BODY"] }
      ]
    }
  }
]"#;

const PREVENT_POLICY: &str = r#"{ "rules": [], "defaultAction": "Prevent" }"#;

fn dispatcher_with(sigs: &str) -> Dispatcher {
    let store = SignatureStore::load(sigs, "local", "1").unwrap();
    let selected = RuleSelector::load(PREVENT_POLICY).unwrap().select_signatures(&store);
    let matcher = Arc::new(SignatureMatcher::new(selected, &FirstTierAggregator::new()));
    Dispatcher::new(
        matcher,
        Arc::new(ExceptionRulebase::default()),
        Arc::new(AssetState::new("e2e-asset")),
        DispatcherConfig::default(),
    )
}

fn dispatcher_without_signatures() -> Dispatcher {
    Dispatcher::new(
        Arc::new(SignatureMatcher::default()),
        Arc::new(ExceptionRulebase::default()),
        Arc::new(AssetState::new("e2e-asset")),
        DispatcherConfig::default(),
    )
}

fn rec(txn: u64, event: HttpEvent) -> FeedRecord {
    FeedRecord { txn, host: Some("app.example.com".into()), source_ip: None, source_id: None, event }
}

fn send_request_line(d: &Dispatcher, txn: u64, method: &str, uri: &str) {
    d.handle(&rec(
        txn,
        HttpEvent::NewTransaction {
            method:   method.to_string(),
            uri:      uri.to_string(),
            protocol: "HTTP/1.1".to_string(),
        },
    ));
}

fn send_last_header(d: &Dispatcher, txn: u64) -> EventVerdict {
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

// ── Scenario 1: simple SQLi ──────────────────────────────────────────────────

#[test]
fn simple_sqli_drops_transaction() {
    let d = dispatcher_with(SQLI_SIGS);
    send_request_line(&d, 1, "GET", "/login?user=admin'+OR+1=1--");
    let header_verdict = send_last_header(&d, 1);
    assert_eq!(header_verdict, EventVerdict::Drop);

    let end = d.handle(&rec(1, HttpEvent::EndRequest));
    assert_eq!(end.verdict, EventVerdict::Drop);

    let outcome = d.handle(&rec(1, HttpEvent::EndTransaction));
    assert!(outcome.match_events.iter().any(|e| e.protection == "Sqli.BooleanOr"));
    let record = outcome.log_record.expect("decision log record");
    assert!(record.attack_types.iter().any(|t| t == "SQL Injection"));
}

// ── Scenario 2: base64-wrapped payload ───────────────────────────────────────

#[test]
fn base64_wrapped_script_drops() {
    let d = dispatcher_without_signatures();
    send_request_line(&d, 2, "POST", "/submit");
    send_last_header(&d, 2);
    d.handle(&rec(
        2,
        HttpEvent::RequestBody { data: b"data=PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==".to_vec() },
    ));
    let end = d.handle(&rec(2, HttpEvent::EndRequest));
    assert_eq!(end.verdict, EventVerdict::Drop);

    let outcome = d.handle(&rec(2, HttpEvent::EndTransaction));
    let record = outcome.log_record.expect("decision log record");
    assert!(record.attack_types.iter().any(|t| t == "Cross Site Scripting"));
}

#[test]
fn base64_layer_key_path_carries_marker() {
    use palisade::parsers::deep::{DeepParser, NoLearnedTypes, SourceKind};
    let mut dp = DeepParser::new(SourceKind::Body, &NoLearnedTypes);
    let leaves = dp.parse(b"body", b"data=PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==");
    let marked = leaves
        .iter()
        .find(|l| l.value == b"<script>alert(1)</script>")
        .expect("decoded leaf");
    assert!(String::from_utf8_lossy(&marked.key).contains("#base64"));
}

// ── Scenario 3: compound ORDERED_AND ─────────────────────────────────────────

#[test]
fn ordered_and_rejects_wrong_order() {
    let d = dispatcher_with(ORDERED_SIGS);
    // marker-b evidence arrives in the query (first), marker-a in the body
    // (second): the ordered compound never completes
    send_request_line(&d, 3, "POST", "/step?x=marker-b");
    send_last_header(&d, 3);
    d.handle(&rec(3, HttpEvent::RequestBody { data: b"y=marker-a".to_vec() }));
    let end = d.handle(&rec(3, HttpEvent::EndRequest));
    assert_eq!(end.verdict, EventVerdict::Inspect);

    let outcome = d.handle(&rec(3, HttpEvent::EndTransaction));
    assert!(outcome.match_events.is_empty());
}

#[test]
fn ordered_and_accepts_right_order() {
    let d = dispatcher_with(ORDERED_SIGS);
    send_request_line(&d, 4, "POST", "/step?x=marker-a");
    send_last_header(&d, 4);
    let body = d.handle(&rec(4, HttpEvent::RequestBody { data: b"y=marker-b".to_vec() }));
    // drop latched during body publication
    let end = d.handle(&rec(4, HttpEvent::EndRequest));
    assert!(
        body.verdict == EventVerdict::Drop || end.verdict == EventVerdict::Drop,
        "ordered compound in arrival order must block"
    );
}

// ── Scenario 4: overlong-slash evasion ───────────────────────────────────────

#[test]
fn overlong_slash_evasion_drops() {
    let d = dispatcher_without_signatures();
    send_request_line(&d, 5, "GET", "/admin/%c1%1c../etc/passwd");
    let verdict = send_last_header(&d, 5);
    assert_eq!(verdict, EventVerdict::Drop);
}

#[test]
fn overlong_slash_evasion_records_evidence() {
    let asset = AssetState::new("ev-asset");
    let mut res = ScanResult::default();
    let suspicious = Scanner::scan(
        &asset,
        b"/admin/%c1%1c../etc/passwd",
        "url",
        false,
        None,
        &mut res,
    );
    assert!(suspicious);
    assert!(res.found_patterns.contains_key("evasion"));
}

// ── Scenario 5: clean-value caching ──────────────────────────────────────────

#[test]
fn clean_value_scans_once_across_transactions() {
    let asset = Arc::new(AssetState::new("cache-asset"));
    let d = Dispatcher::new(
        Arc::new(SignatureMatcher::default()),
        Arc::new(ExceptionRulebase::default()),
        Arc::clone(&asset),
        DispatcherConfig::default(),
    );

    for txn in [10u64, 11u64] {
        send_request_line(&d, txn, "POST", "/echo");
        send_last_header(&d, txn);
        d.handle(&rec(txn, HttpEvent::RequestBody { data: b"hello world".to_vec() }));
        let end = d.handle(&rec(txn, HttpEvent::EndRequest));
        assert_eq!(end.verdict, EventVerdict::Inspect);
        let outcome = d.handle(&rec(txn, HttpEvent::EndTransaction));
        assert!(outcome.match_events.is_empty());
    }

    // the value landed in the clean cache after the first transaction
    let key = AssetState::cache_key(b"hello world", "body", false, None);
    assert!(asset.is_clean_cached(&key));
}

// ── Scenario 6: HISTORY policy bound ─────────────────────────────────────────

#[test]
fn history_policy_retains_last_1000_bytes() {
    let mut txn = TransactionCtx::new();
    txn.register("HTTP_REQUEST_BODY", &vec![b'a'; 1024]);
    txn.register("HTTP_REQUEST_BODY", &vec![b'b'; 1024]);
    let retained = txn.buffer("HTTP_REQUEST_BODY");
    assert_eq!(retained.len(), 1000);
    assert!(retained.iter().all(|&b| b == b'b'));
}

// ── Fail-open behavior ───────────────────────────────────────────────────────

#[test]
fn unknown_transaction_events_fail_open() {
    let d = dispatcher_without_signatures();
    for event in [
        HttpEvent::RequestHeader { name: "X".into(), value: "y".into(), is_last: true },
        HttpEvent::RequestBody { data: b"x".to_vec() },
        HttpEvent::EndRequest,
        HttpEvent::ResponseCode { code: 200 },
        HttpEvent::EndTransaction,
    ] {
        assert_eq!(d.handle(&rec(404, event)).verdict, EventVerdict::Accept);
    }
}

// ── Response-side scanning ───────────────────────────────────────────────────

#[test]
fn error_disclosure_logged_from_response() {
    let d = dispatcher_without_signatures();
    send_request_line(&d, 20, "GET", "/report");
    send_last_header(&d, 20);
    d.handle(&rec(20, HttpEvent::EndRequest));
    d.handle(&rec(20, HttpEvent::ResponseCode { code: 500 }));
    d.handle(&rec(
        20,
        HttpEvent::ResponseBody {
            data:    b"<b>Fatal error</b> in /var/www/db.php: SQL syntax near line 2".to_vec(),
            is_last: true,
        },
    ));
    let outcome = d.handle(&rec(20, HttpEvent::EndTransaction));
    let record = outcome.log_record.expect("error disclosure must produce a record");
    assert_eq!(record.incident_type, "Error Disclosure");
}
