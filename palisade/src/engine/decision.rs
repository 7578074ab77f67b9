// palisade/src/engine/decision.rs
//
// Decision aggregation: seven fixed slots combined into a prioritized
// list. Blocking decisions sort first, then logging ones, ties broken by
// slot index. The first decision drives the verdict, the first logging
// decision drives the top-line incident fields.

use crate::events::{BlockType, DecisionLogRecord, ThreatLevel};
use chrono::Utc;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecisionType {
    AutonomousSecurity = 0,
    Csrf,
    OpenRedirect,
    ErrorDisclosure,
    ErrorLimiting,
    RateLimiting,
    UserLimits,
}

pub const DECISION_TYPES: [DecisionType; 7] = [
    DecisionType::AutonomousSecurity,
    DecisionType::Csrf,
    DecisionType::OpenRedirect,
    DecisionType::ErrorDisclosure,
    DecisionType::ErrorLimiting,
    DecisionType::RateLimiting,
    DecisionType::UserLimits,
];

impl DecisionType {
    pub fn incident_type(&self) -> &'static str {
        match self {
            Self::AutonomousSecurity => "Web Attack",
            Self::Csrf => "Cross Site Request Forgery",
            Self::OpenRedirect => "Cross Site Redirect",
            Self::ErrorDisclosure => "Error Disclosure",
            Self::ErrorLimiting => "Error Limit",
            Self::RateLimiting => "Request Rate Limit",
            Self::UserLimits => "User Defined Limit",
        }
    }

    fn block_type(&self) -> BlockType {
        match self {
            Self::AutonomousSecurity | Self::OpenRedirect | Self::ErrorDisclosure => {
                BlockType::WafBlock
            }
            Self::Csrf => BlockType::CsrfBlock,
            Self::ErrorLimiting | Self::RateLimiting | Self::UserLimits => BlockType::LimitBlock,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleDecision {
    pub block:       bool,
    pub log:         bool,
    pub force_log:   bool,
    pub force_allow: bool,
    pub force_block: bool,
}

/// Per-transaction decision accumulator.
pub struct DecisionSet {
    slots: [SingleDecision; 7],
}

impl DecisionSet {
    pub fn new() -> Self {
        Self { slots: [SingleDecision::default(); 7] }
    }

    pub fn get_mut(&mut self, t: DecisionType) -> &mut SingleDecision {
        &mut self.slots[t as usize]
    }

    pub fn get(&self, t: DecisionType) -> &SingleDecision {
        &self.slots[t as usize]
    }

    /// Active decisions (block || log), blocking first, then logging,
    /// then ascending slot index.
    fn ordered(&self) -> Vec<(DecisionType, &SingleDecision)> {
        let mut active: Vec<(DecisionType, &SingleDecision)> = DECISION_TYPES
            .iter()
            .map(|&t| (t, self.get(t)))
            .filter(|(_, d)| d.block || d.log)
            .collect();
        active.sort_by_key(|(t, d)| (!d.block, !d.log, *t as usize));
        active
    }

    /// Final verdict: the highest-priority active decision, with the
    /// force flags applied on top.
    pub fn should_block(&self) -> bool {
        match self.ordered().into_iter().next() {
            Some((_, d)) if d.force_allow => false,
            Some((_, d)) => d.block || d.force_block,
            None => self.slots.iter().any(|d| d.force_block),
        }
    }

    pub fn any_to_log(&self) -> bool {
        self.slots.iter().any(|d| d.log || d.force_log)
    }

    /// The decision driving the top-line incident fields.
    pub fn first_to_log(&self) -> Option<DecisionType> {
        self.ordered().into_iter().find(|(_, d)| d.log).map(|(t, _)| t)
    }

    /// Compose the decision-log record for this transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn log_record(
        &self,
        asset_id: &str,
        practice_id: &str,
        practice_name: &str,
        source: &str,
        score: f64,
        attack_types: Vec<String>,
        details: HashMap<String, String>,
    ) -> Option<DecisionLogRecord> {
        if !self.any_to_log() && !self.should_block() {
            return None;
        }
        let first_log = self.first_to_log();
        let block_type = if self.should_block() {
            match first_log {
                Some(t) if self.get(t).force_block => BlockType::ForceBlock,
                Some(t) => t.block_type(),
                None => BlockType::ForceBlock,
            }
        } else if self.slots.iter().any(|d| d.force_allow) {
            BlockType::ForceException
        } else {
            BlockType::NotBlocking
        };

        Some(DecisionLogRecord {
            asset_id:      asset_id.to_string(),
            practice_id:   practice_id.to_string(),
            practice_name: practice_name.to_string(),
            source:        source.to_string(),
            block_type,
            threat:        ThreatLevel::from_score(score),
            attack_types,
            incident_type: first_log.map(|t| t.incident_type().to_string()).unwrap_or_default(),
            details,
            timestamp:     Utc::now(),
        })
    }
}

impl Default for DecisionSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_allows() {
        let d = DecisionSet::new();
        assert!(!d.should_block());
        assert!(!d.any_to_log());
        assert!(d.first_to_log().is_none());
    }

    #[test]
    fn blocking_decision_wins_over_logging() {
        let mut d = DecisionSet::new();
        d.get_mut(DecisionType::RateLimiting).log = true;
        d.get_mut(DecisionType::AutonomousSecurity).block = true;
        d.get_mut(DecisionType::AutonomousSecurity).log = true;
        assert!(d.should_block());
        assert_eq!(d.first_to_log(), Some(DecisionType::AutonomousSecurity));
    }

    #[test]
    fn lower_slot_index_breaks_ties() {
        let mut d = DecisionSet::new();
        d.get_mut(DecisionType::RateLimiting).block = true;
        d.get_mut(DecisionType::Csrf).block = true;
        let first = d.ordered()[0].0;
        assert_eq!(first, DecisionType::Csrf);
    }

    #[test]
    fn force_allow_overrides_block() {
        let mut d = DecisionSet::new();
        d.get_mut(DecisionType::AutonomousSecurity).block = true;
        d.get_mut(DecisionType::AutonomousSecurity).force_allow = true;
        assert!(!d.should_block());
    }

    #[test]
    fn force_log_preserves_record_without_block() {
        let mut d = DecisionSet::new();
        d.get_mut(DecisionType::ErrorDisclosure).force_log = true;
        assert!(d.any_to_log());
        let rec = d
            .log_record("a", "p", "pn", "src", 0.0, vec![], HashMap::new())
            .unwrap();
        assert_eq!(rec.block_type, BlockType::NotBlocking);
    }

    #[test]
    fn log_record_maps_block_type_and_threat() {
        let mut d = DecisionSet::new();
        d.get_mut(DecisionType::AutonomousSecurity).block = true;
        d.get_mut(DecisionType::AutonomousSecurity).log = true;
        let rec = d
            .log_record("a", "p", "pn", "src", 7.0, vec!["SQL Injection".into()], HashMap::new())
            .unwrap();
        assert_eq!(rec.block_type, BlockType::WafBlock);
        assert_eq!(rec.threat, ThreatLevel::MediumThreat);
        assert_eq!(rec.incident_type, "Web Attack");
    }
}
