// palisade/src/signatures/store.rs
//
// Signature pack: JSON load, metadata scraping, and compilation of the
// simple/compound rule tree. The store owns every signature; everything
// downstream refers to them through Arc handles and pattern indices.

use super::keyword::KeywordRule;
use crate::engine::multipat::Pattern;
use crate::events::SignatureAction;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown level '{0}' in attribute {1}")]
    UnknownLevel(String, &'static str),
    #[error("unknown compound operation '{0}'")]
    UnknownOperation(String),
    #[error("unknown rule type '{0}'")]
    UnknownRuleType(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("protectionsFromYear {0} outside the permitted range")]
    YearOutOfRange(i32),
    #[error("both first-tier pattern and keywords empty in simple protection '{0}'")]
    EmptySimple(String),
    #[error("keyword rule failed to compile in signature '{0}'")]
    KeywordCompile(String),
    #[error("first-tier pattern failed to compile in signature '{0}'")]
    PatternCompile(String),
    #[error("obfuscated content cannot be compiled")]
    Obfuscated,
    #[error("signature pack is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity deobfuscation hook. Content with the magic prefix requires a
/// deobfuscation capability this build does not carry, so compilation
/// fails deterministically.
pub fn deobfuscate(s: &str) -> Result<&str, ConfigError> {
    if s.starts_with("obf:") {
        return Err(ConfigError::Obfuscated);
    }
    Ok(s)
}

// ── Levels & metadata ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    VeryLow,
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
    Critical,
}

impl Level {
    pub fn parse(s: &str, attr: &'static str) -> Result<Self, ConfigError> {
        match s {
            "Very Low" => Ok(Self::VeryLow),
            "Low" => Ok(Self::Low),
            "Medium Low" => Ok(Self::MediumLow),
            "Medium" => Ok(Self::Medium),
            "Medium High" => Ok(Self::MediumHigh),
            "High" => Ok(Self::High),
            "Critical" => Ok(Self::Critical),
            _ => Err(ConfigError::UnknownLevel(s.to_string(), attr)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "Very Low",
            Self::Low => "Low",
            Self::MediumLow => "Medium Low",
            Self::Medium => "Medium",
            Self::MediumHigh => "Medium High",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    /// Confidence renders on a coarser three-step scale.
    pub fn confidence_str(&self) -> &'static str {
        if *self <= Level::Low {
            "Low"
        } else if *self >= Level::High {
            "High"
        } else {
            "Medium"
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignatureMetadata {
    pub protection_id: String,
    pub name:          String,
    pub event_log:     String,
    pub update:        String,
    pub source:        String,
    pub version:       String,
    pub cve_list:      Vec<String>,
    pub tag_list:      Vec<String>,
    pub severity:      Level,
    pub confidence:    Level,
    pub performance:   Level,
    pub silent:        bool,
}

const VUL_TYPE_TAG: &str = "Vul_Type_";
const PROTECTION_TYPE_TAG: &str = "Protection_Type_";
const YEAR_TAG: &str = "Threat_Year_";

impl SignatureMetadata {
    /// Incident type scraped from `Vul_Type_*` / `Protection_Type_*` tags.
    pub fn incident_type(&self) -> String {
        for prefix in [VUL_TYPE_TAG, PROTECTION_TYPE_TAG] {
            for tag in &self.tag_list {
                if let Some(rest) = tag.strip_prefix(prefix) {
                    let incident = rest.replace('_', " ");
                    if incident == "Vulnerability" {
                        return "Vulnerability exploit attempt".to_string();
                    }
                    return incident;
                }
            }
        }
        String::new()
    }

    /// Threat year from a `Threat_Year_YYYY` tag.
    pub fn year(&self) -> Option<i32> {
        for tag in &self.tag_list {
            if let Some(rest) = tag.strip_prefix(YEAR_TAG) {
                if rest.len() != 4 {
                    warn!(tag, "threat year tag does not meet the expected format");
                    return None;
                }
                return rest.parse().ok();
            }
        }
        None
    }

    pub fn is_year_at_least(&self, year: Option<i32>) -> bool {
        match (year, self.year()) {
            (Some(wanted), Some(have)) => have >= wanted,
            _ => true,
        }
    }
}

// ── Rule tree ─────────────────────────────────────────────────────────────────

/// Tri-valued sub-signature outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    NoMatch,
    CacheMatch,
    Match,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    Or,
    And,
    OrderedAnd,
}

impl CompoundOp {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "or" => Ok(Self::Or),
            "and" => Ok(Self::And),
            "ordered_and" => Ok(Self::OrderedAnd),
            _ => Err(ConfigError::UnknownOperation(s.to_string())),
        }
    }
}

/// Evaluation collaborators a rule needs: the per-transaction flag set and
/// the context the buffer came from. Tests supply fakes.
pub trait EvalContext {
    fn is_flag_set(&self, id: &str) -> bool;
    fn set_flag(&mut self, id: &str);
    fn context_name(&self) -> &str;
    /// The current context buffer, as text for keyword rules.
    fn buffer(&self) -> &str;
}

pub enum RuleNode {
    Simple {
        id:           String,
        contexts:     Vec<String>,
        pattern:      Option<Pattern>,
        keyword_rule: Option<KeywordRule>,
    },
    Compound {
        id:       String,
        op:       CompoundOp,
        contexts: Vec<String>,
        children: Vec<RuleNode>,
    },
}

impl RuleNode {
    pub fn id(&self) -> &str {
        match self {
            RuleNode::Simple { id, .. } | RuleNode::Compound { id, .. } => id,
        }
    }

    pub fn contexts(&self) -> &[String] {
        match self {
            RuleNode::Simple { contexts, .. } | RuleNode::Compound { contexts, .. } => contexts,
        }
    }

    /// All first-tier patterns in this rule tree.
    pub fn patterns(&self) -> BTreeSet<Pattern> {
        match self {
            RuleNode::Simple { pattern, .. } => pattern.iter().cloned().collect(),
            RuleNode::Compound { children, .. } => {
                children.iter().flat_map(|c| c.patterns()).collect()
            }
        }
    }

    pub fn get_match(&self, fired: &BTreeSet<Pattern>, ctx: &mut dyn EvalContext) -> MatchType {
        match self {
            RuleNode::Simple { pattern, keyword_rule, .. } => {
                if let Some(pat) = pattern {
                    if !fired.contains(pat) {
                        return MatchType::NoMatch;
                    }
                }
                match keyword_rule {
                    None => MatchType::Match,
                    Some(rule) if rule.is_match(ctx.buffer()) => MatchType::Match,
                    Some(_) => MatchType::NoMatch,
                }
            }
            RuleNode::Compound { op, children, .. } => match op {
                CompoundOp::Or => {
                    let mut res = MatchType::NoMatch;
                    for child in children {
                        match self.sub_match(child, fired, ctx) {
                            MatchType::NoMatch => {}
                            MatchType::CacheMatch => res = MatchType::CacheMatch,
                            MatchType::Match => return MatchType::Match,
                        }
                    }
                    res
                }
                CompoundOp::And => {
                    let mut res = MatchType::CacheMatch;
                    for child in children {
                        match self.sub_match(child, fired, ctx) {
                            MatchType::NoMatch => res = MatchType::NoMatch,
                            MatchType::CacheMatch => {}
                            MatchType::Match => {
                                if res == MatchType::CacheMatch {
                                    res = MatchType::Match;
                                }
                            }
                        }
                    }
                    res
                }
                CompoundOp::OrderedAnd => {
                    let mut res = MatchType::CacheMatch;
                    for child in children {
                        match self.sub_match(child, fired, ctx) {
                            MatchType::NoMatch => return MatchType::NoMatch,
                            MatchType::CacheMatch => {}
                            MatchType::Match => res = MatchType::Match,
                        }
                    }
                    res
                }
            },
        }
    }

    // Sub-signature evaluation: memoized per transaction by id; contexts
    // outside the sub-signature's list yield NO_MATCH without caching.
    fn sub_match(
        &self,
        child: &RuleNode,
        fired: &BTreeSet<Pattern>,
        ctx: &mut dyn EvalContext,
    ) -> MatchType {
        if ctx.is_flag_set(child.id()) {
            return MatchType::CacheMatch;
        }
        if !child.contexts().iter().any(|c| c == ctx.context_name()) {
            return MatchType::NoMatch;
        }
        let res = child.get_match(fired, ctx);
        if res != MatchType::NoMatch {
            ctx.set_flag(child.id());
        }
        res
    }
}

// ── Complete signatures ───────────────────────────────────────────────────────

pub struct CompleteSignature {
    pub metadata: SignatureMetadata,
    pub rule:     RuleNode,
    /// Union of sub-signature contexts, discovery order preserved.
    pub contexts: Vec<String>,
}

#[derive(Clone)]
pub struct SignatureAndAction {
    pub signature: Arc<CompleteSignature>,
    pub action:    SignatureAction,
}

// ── JSON wire format ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(rename = "maintrainId")]
    protection_id: String,
    #[serde(rename = "protectionName")]
    name:          String,
    severity:      String,
    #[serde(rename = "lastUpdate", default)]
    update:        String,
    #[serde(rename = "confidenceLevel")]
    confidence:    String,
    #[serde(rename = "performanceImpact")]
    performance:   String,
    #[serde(rename = "cveList", default)]
    cve_list:      Vec<String>,
    #[serde(rename = "tags", default)]
    tags:          Vec<String>,
    #[serde(rename = "logAttackName", default)]
    event_log:     Option<String>,
    #[serde(default)]
    silent:        bool,
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    kind:      String,
    #[serde(rename = "SSM", default)]
    ssm:       String,
    #[serde(default)]
    keywords:  String,
    #[serde(default)]
    context:   Vec<String>,
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    operands:  Vec<RawRule>,
}

#[derive(Deserialize)]
struct RawSignature {
    #[serde(rename = "protectionMetadata")]
    metadata: RawMetadata,
    #[serde(rename = "detectionRules")]
    rules:    RawRule,
}

fn compile_rule(
    sig_name: &str,
    raw: &RawRule,
    next_pattern_index: &mut u32,
) -> Result<RuleNode, ConfigError> {
    match raw.kind.as_str() {
        "simple" => {
            let ssm = deobfuscate(&raw.ssm)?;
            let keywords = deobfuscate(&raw.keywords)?;

            let pattern = if ssm.is_empty() {
                None
            } else {
                let index = *next_pattern_index;
                *next_pattern_index += 1;
                Some(
                    Pattern::from_line(ssm, index)
                        .map_err(|_| ConfigError::PatternCompile(sig_name.to_string()))?,
                )
            };

            let keyword_rule = if keywords.is_empty() {
                None
            } else {
                Some(KeywordRule::compile(sig_name, keywords).map_err(|e| {
                    warn!(signature = sig_name, error = %e, "keyword rule failed to compile");
                    ConfigError::KeywordCompile(sig_name.to_string())
                })?)
            };

            if pattern.is_none() && keyword_rule.is_none() {
                return Err(ConfigError::EmptySimple(sig_name.to_string()));
            }

            Ok(RuleNode::Simple {
                id: sig_name.to_string(),
                contexts: raw.context.clone(),
                pattern,
                keyword_rule,
            })
        }
        "compound" => {
            let op = CompoundOp::parse(
                raw.operation
                    .as_deref()
                    .ok_or_else(|| ConfigError::UnknownOperation(String::new()))?,
            )?;

            let mut children = Vec::with_capacity(raw.operands.len());
            let mut contexts: Vec<String> = Vec::new();
            for (index, operand) in raw.operands.iter().enumerate() {
                let child_name = format!("{}##{}", sig_name, index);
                let child = compile_rule(&child_name, operand, next_pattern_index)?;
                for c in child.contexts() {
                    if !contexts.contains(c) {
                        contexts.push(c.clone());
                    }
                }
                children.push(child);
            }

            Ok(RuleNode::Compound {
                id: sig_name.to_string(),
                op,
                contexts,
                children,
            })
        }
        other => Err(ConfigError::UnknownRuleType(other.to_string())),
    }
}

// ── The store ─────────────────────────────────────────────────────────────────

/// Owns all loaded signatures. Shared immutable after load.
#[derive(Default)]
pub struct SignatureStore {
    pub signatures: Vec<Arc<CompleteSignature>>,
    pub source:     String,
    pub version:    String,
}

impl SignatureStore {
    /// Load a signature pack from JSON. A malformed pack is a
    /// `ConfigError`; an individual signature that fails to compile is
    /// dropped with a logged remediation while its siblings load.
    pub fn load(json: &str, source: &str, version: &str) -> Result<Self, ConfigError> {
        let raw: Vec<RawSignature> = serde_json::from_str(json)?;
        let mut store = SignatureStore {
            signatures: Vec::with_capacity(raw.len()),
            source: source.to_string(),
            version: version.to_string(),
        };

        let mut next_pattern_index = 0u32;
        for raw_sig in raw {
            let name = raw_sig.metadata.name.clone();
            match Self::compile_signature(raw_sig, source, version, &mut next_pattern_index) {
                Ok(sig) => store.signatures.push(Arc::new(sig)),
                Err(e) => {
                    warn!(
                        signature = name,
                        error = %e,
                        "failed to load signature; verify the validity of the '{}' signature",
                        name
                    );
                }
            }
        }
        Ok(store)
    }

    fn compile_signature(
        raw: RawSignature,
        source: &str,
        version: &str,
        next_pattern_index: &mut u32,
    ) -> Result<CompleteSignature, ConfigError> {
        let severity = Level::parse(&raw.metadata.severity, "severity")?;
        let confidence = Level::parse(&raw.metadata.confidence, "confidence")?;
        let performance = Level::parse(&raw.metadata.performance, "performance")?;

        let event_log = raw
            .metadata
            .event_log
            .unwrap_or_else(|| format!("IPS Signature '{}' Found", raw.metadata.name));

        let metadata = SignatureMetadata {
            protection_id: raw.metadata.protection_id,
            name: raw.metadata.name,
            event_log,
            update: raw.metadata.update,
            source: source.to_string(),
            version: version.to_string(),
            cve_list: raw.metadata.cve_list,
            tag_list: raw.metadata.tags,
            severity,
            confidence,
            performance,
            silent: raw.metadata.silent,
        };

        let rule = compile_rule(&metadata.name, &raw.rules, next_pattern_index)?;
        let contexts = rule.contexts().to_vec();

        Ok(CompleteSignature { metadata, rule, contexts })
    }
}
