// palisade/src/signatures/policy.rs
//
// Policy file: ordered RuleSelector entries with optional filters plus a
// defaultAction. The first rule matching a signature decides its action;
// Ignore-selected signatures are not installed at all.

use super::store::{CompleteSignature, ConfigError, Level, SignatureAndAction, SignatureStore};
use crate::events::SignatureAction;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Inactive,
    Detect,
    Prevent,
}

impl PolicyAction {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "Inactive" => Ok(Self::Inactive),
            "Detect" => Ok(Self::Detect),
            "Prevent" => Ok(Self::Prevent),
            _ => Err(ConfigError::UnknownAction(s.to_string())),
        }
    }

    fn to_signature_action(self) -> SignatureAction {
        match self {
            Self::Inactive => SignatureAction::Ignore,
            Self::Detect => SignatureAction::Detect,
            Self::Prevent => SignatureAction::Prevent,
        }
    }
}

fn parse_performance(s: &str) -> Result<Level, ConfigError> {
    match s {
        "Very low" => Ok(Level::VeryLow),
        "Low or lower" => Ok(Level::Low),
        "Medium or lower" => Ok(Level::Medium),
        "High or lower" => Ok(Level::High),
        _ => Err(ConfigError::UnknownLevel(s.to_string(), "performanceImpact")),
    }
}

fn parse_severity(s: &str) -> Result<Level, ConfigError> {
    match s {
        "Critical" => Ok(Level::Critical),
        "High or above" => Ok(Level::High),
        "Medium or above" => Ok(Level::Medium),
        "Low or above" => Ok(Level::Low),
        _ => Err(ConfigError::UnknownLevel(s.to_string(), "severityLevel")),
    }
}

fn parse_confidence(s: &str) -> Result<Level, ConfigError> {
    match s {
        "Low" => Ok(Level::Low),
        "Medium" => Ok(Level::Medium),
        "High" => Ok(Level::High),
        _ => Err(ConfigError::UnknownLevel(s.to_string(), "confidenceLevel")),
    }
}

pub struct Rule {
    action:             PolicyAction,
    performance_impact: Option<Level>,
    severity_level:     Option<Level>,
    confidence_level:   Option<Level>,
    from_year:          Option<i32>,
    protection_ids:     Option<Vec<String>>,
    protection_tags:    Option<Vec<String>>,
}

impl Rule {
    fn matches(&self, sig: &CompleteSignature) -> bool {
        let md = &sig.metadata;
        if let Some(conf) = self.confidence_level {
            if md.confidence != conf {
                return false;
            }
        }
        if let Some(sev) = self.severity_level {
            if md.severity < sev {
                return false;
            }
        }
        if let Some(perf) = self.performance_impact {
            if md.performance > perf {
                return false;
            }
        }
        if !md.is_year_at_least(self.from_year) {
            return false;
        }
        if let Some(ids) = &self.protection_ids {
            if !ids.contains(&md.protection_id) {
                return false;
            }
        }
        if let Some(tags) = &self.protection_tags {
            if !tags.iter().any(|t| md.tag_list.contains(t)) {
                return false;
            }
        }
        true
    }
}

#[derive(Deserialize)]
struct RawRule {
    action:                String,
    #[serde(rename = "performanceImpact", default)]
    performance_impact:    Option<String>,
    #[serde(rename = "severityLevel", default)]
    severity_level:        Option<String>,
    #[serde(rename = "confidenceLevel", default)]
    confidence_level:      Option<String>,
    #[serde(rename = "protectionsFromYear", default)]
    protections_from_year: Option<i32>,
    #[serde(rename = "protectionIds", default)]
    protection_ids:        Option<Vec<String>>,
    #[serde(rename = "protectionTags", default)]
    protection_tags:       Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawPolicy {
    #[serde(default)]
    rules:          Vec<RawRule>,
    #[serde(rename = "defaultAction")]
    default_action: String,
}

pub struct RuleSelector {
    rules: Vec<Rule>,
}

const YEAR_MIN: i32 = 1999;
const YEAR_MAX: i32 = 2021;

impl RuleSelector {
    /// Parse the policy JSON; the defaultAction becomes a terminal
    /// unconditional rule.
    pub fn load(json: &str) -> Result<Self, ConfigError> {
        let raw: RawPolicy = serde_json::from_str(json)?;
        let mut rules = Vec::with_capacity(raw.rules.len() + 1);

        for r in raw.rules {
            if let Some(year) = r.protections_from_year {
                if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
                    return Err(ConfigError::YearOutOfRange(year));
                }
            }
            rules.push(Rule {
                action:             PolicyAction::parse(&r.action)?,
                performance_impact: r.performance_impact.as_deref().map(parse_performance).transpose()?,
                severity_level:     r.severity_level.as_deref().map(parse_severity).transpose()?,
                confidence_level:   r.confidence_level.as_deref().map(parse_confidence).transpose()?,
                from_year:          r.protections_from_year,
                protection_ids:     r.protection_ids,
                protection_tags:    r.protection_tags,
            });
        }

        rules.push(Rule {
            action:             PolicyAction::parse(&raw.default_action)?,
            performance_impact: None,
            severity_level:     None,
            confidence_level:   None,
            from_year:          None,
            protection_ids:     None,
            protection_tags:    None,
        });

        Ok(RuleSelector { rules })
    }

    /// Ordered-first-match selection over the loaded signatures.
    pub fn select_signatures(&self, store: &SignatureStore) -> Vec<SignatureAndAction> {
        let mut selected = Vec::new();
        for sig in &store.signatures {
            for rule in &self.rules {
                if rule.matches(sig) {
                    if rule.action != PolicyAction::Inactive {
                        selected.push(SignatureAndAction {
                            signature: Arc::clone(sig),
                            action:    rule.action.to_signature_action(),
                        });
                    }
                    break;
                }
            }
        }
        debug!(selected = selected.len(), total = store.signatures.len(), "policy selection done");
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGS: &str = r#"[
      {
        "protectionMetadata": {
          "maintrainId": "1", "protectionName": "HighSev",
          "severity": "Critical", "confidenceLevel": "High", "performanceImpact": "Low",
          "cveList": [], "tags": ["Threat_Year_2020"]
        },
        "detectionRules": { "type": "simple", "SSM": "aaa", "keywords": "", "context": ["HTTP_RAW"] }
      },
      {
        "protectionMetadata": {
          "maintrainId": "2", "protectionName": "LowSev",
          "severity": "Low", "confidenceLevel": "Low", "performanceImpact": "Critical",
          "cveList": [], "tags": ["Threat_Year_2005"]
        },
        "detectionRules": { "type": "simple", "SSM": "bbb", "keywords": "", "context": ["HTTP_RAW"] }
      }
    ]"#;

    fn store() -> SignatureStore {
        SignatureStore::load(SIGS, "local", "1").unwrap()
    }

    #[test]
    fn ordered_first_match() {
        let policy = r#"{
          "rules": [
            { "action": "Prevent", "severityLevel": "High or above" },
            { "action": "Detect" }
          ],
          "defaultAction": "Inactive"
        }"#;
        let selector = RuleSelector::load(policy).unwrap();
        let selected = selector.select_signatures(&store());
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].action, crate::events::SignatureAction::Prevent);
        assert_eq!(selected[1].action, crate::events::SignatureAction::Detect);
    }

    #[test]
    fn inactive_signatures_not_installed() {
        let policy = r#"{
          "rules": [ { "action": "Inactive", "severityLevel": "High or above" } ],
          "defaultAction": "Detect"
        }"#;
        let selector = RuleSelector::load(policy).unwrap();
        let selected = selector.select_signatures(&store());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].signature.metadata.name, "LowSev");
    }

    #[test]
    fn performance_filter() {
        let policy = r#"{
          "rules": [ { "action": "Prevent", "performanceImpact": "Medium or lower" } ],
          "defaultAction": "Inactive"
        }"#;
        let selected = RuleSelector::load(policy).unwrap().select_signatures(&store());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].signature.metadata.name, "HighSev");
    }

    #[test]
    fn year_filter() {
        let policy = r#"{
          "rules": [ { "action": "Prevent", "protectionsFromYear": 2010 } ],
          "defaultAction": "Inactive"
        }"#;
        let selected = RuleSelector::load(policy).unwrap().select_signatures(&store());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].signature.metadata.name, "HighSev");
    }

    #[test]
    fn year_out_of_range_rejected() {
        let policy = r#"{
          "rules": [ { "action": "Prevent", "protectionsFromYear": 2030 } ],
          "defaultAction": "Detect"
        }"#;
        assert!(RuleSelector::load(policy).is_err());
    }

    #[test]
    fn unknown_action_rejected() {
        let policy = r#"{ "rules": [], "defaultAction": "Obliterate" }"#;
        assert!(RuleSelector::load(policy).is_err());
    }
}
