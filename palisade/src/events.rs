// palisade/src/events.rs
//
// Shared event types and all domain types flowing through Palisade.
// HTTP transaction events arrive from the proxy attachment (or a JSONL
// feed in tail/replay modes); everything downstream of the dispatcher
// speaks ParsedContext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Transaction events ────────────────────────────────────────────────────────

/// One HTTP transaction event as delivered by the attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HttpEvent {
    NewTransaction {
        method:   String,
        uri:      String,
        protocol: String,
    },
    RequestHeader {
        name:    String,
        value:   String,
        is_last: bool,
    },
    RequestBody {
        #[serde(with = "serde_bytes_b64")]
        data: Vec<u8>,
    },
    EndRequest,
    ResponseCode {
        code: u16,
    },
    ResponseHeader {
        name:  String,
        value: String,
    },
    ResponseBody {
        #[serde(with = "serde_bytes_b64")]
        data:    Vec<u8>,
        is_last: bool,
    },
    EndTransaction,
}

/// Body bytes travel base64-encoded in the JSONL feed.
mod serde_bytes_b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One line of the inbound feed: transaction id + connection metadata + event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRecord {
    pub txn:        u64,
    #[serde(default)]
    pub host:       Option<String>,
    #[serde(default)]
    pub source_ip:  Option<String>,
    #[serde(default)]
    pub source_id:  Option<String>,
    pub event:      HttpEvent,
}

/// Verdict returned to the attachment for each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventVerdict {
    Accept,
    Inspect,
    Drop,
}

impl std::fmt::Display for EventVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept  => write!(f, "ACCEPT"),
            Self::Inspect => write!(f, "INSPECT"),
            Self::Drop    => write!(f, "DROP"),
        }
    }
}

// ── Parsed contexts ───────────────────────────────────────────────────────────

/// A named byte buffer derived from some aspect of the transaction,
/// published by the dispatcher to every signature listener.
#[derive(Debug, Clone)]
pub struct ParsedContext {
    pub name: String,
    pub buf:  bytes::Bytes,
}

impl ParsedContext {
    pub fn new(name: impl Into<String>, buf: impl Into<bytes::Bytes>) -> Self {
        Self { name: name.into(), buf: buf.into() }
    }
}

/// Reply of a single listener to one published context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextReply {
    Accept,
    Drop,
}

// ── Signature actions & match events ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAction {
    Prevent,
    Detect,
    Ignore,
}

impl std::fmt::Display for SignatureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prevent => write!(f, "Prevent"),
            Self::Detect  => write!(f, "Detect"),
            Self::Ignore  => write!(f, "Ignore"),
        }
    }
}

/// Emitted for metrics every time a signature concretely matches,
/// after exception resolution.
#[derive(Debug, Clone, Serialize)]
pub struct MatchEvent {
    pub protection_id: String,
    pub protection:    String,
    pub action:        SignatureAction,
    pub silent:        bool,
    pub context:       String,
    pub timestamp:     DateTime<Utc>,
}

// ── Decision log ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    NotBlocking,
    ForceException,
    ForceBlock,
    ApiBlock,
    BotBlock,
    WafBlock,
    CsrfBlock,
    LimitBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    NoThreat,
    ThreatInfo,
    LowThreat,
    MediumThreat,
    HighThreat,
}

// Thresholds applied to the scanner's final score.
const INFO_THRESHOLD: f64 = 1.0;
const LOW_THRESHOLD:  f64 = 3.0;
const MED_THRESHOLD:  f64 = 6.0;
const MAX_THRESHOLD:  f64 = 10.0;

impl ThreatLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= MAX_THRESHOLD {
            Self::HighThreat
        } else if score >= MED_THRESHOLD {
            Self::MediumThreat
        } else if score >= LOW_THRESHOLD {
            Self::LowThreat
        } else if score >= INFO_THRESHOLD {
            Self::ThreatInfo
        } else {
            Self::NoThreat
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoThreat     => write!(f, "NO_THREAT"),
            Self::ThreatInfo   => write!(f, "THREAT_INFO"),
            Self::LowThreat    => write!(f, "LOW_THREAT"),
            Self::MediumThreat => write!(f, "MEDIUM_THREAT"),
            Self::HighThreat   => write!(f, "HIGH_THREAT"),
        }
    }
}

/// One line of the decision log (JSONL).
#[derive(Debug, Clone, Serialize)]
pub struct DecisionLogRecord {
    pub asset_id:      String,
    pub practice_id:   String,
    pub practice_name: String,
    pub source:        String,
    pub block_type:    BlockType,
    pub threat:        ThreatLevel,
    pub attack_types:  Vec<String>,
    pub incident_type: String,
    pub details:       HashMap<String, String>,
    pub timestamp:     DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_level_thresholds() {
        assert_eq!(ThreatLevel::from_score(0.0), ThreatLevel::NoThreat);
        assert_eq!(ThreatLevel::from_score(1.0), ThreatLevel::ThreatInfo);
        assert_eq!(ThreatLevel::from_score(2.9), ThreatLevel::ThreatInfo);
        assert_eq!(ThreatLevel::from_score(3.0), ThreatLevel::LowThreat);
        assert_eq!(ThreatLevel::from_score(6.0), ThreatLevel::MediumThreat);
        assert_eq!(ThreatLevel::from_score(10.0), ThreatLevel::HighThreat);
    }

    #[test]
    fn feed_record_round_trip() {
        let rec = FeedRecord {
            txn:       7,
            host:      Some("app.example.com".into()),
            source_ip: Some("10.0.0.3".into()),
            source_id: None,
            event:     HttpEvent::RequestBody { data: b"user=admin".to_vec() },
        };
        let line = serde_json::to_string(&rec).unwrap();
        let back: FeedRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.txn, 7);
        match back.event {
            HttpEvent::RequestBody { data } => assert_eq!(data, b"user=admin"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
