// palisade/src/engine/matcher.rs
//
// Two-tier signature matcher. First tier: one shared multi-pattern engine
// per context, prepared from the union of all first-tier patterns bound to
// that context. Second tier: per-signature evaluation with per-transaction
// memoization of sub-signature outcomes. A concrete match resolves its
// action through the exception rulebase and emits a MatchEvent.

use crate::engine::multipat::{MultiPatternEngine, Pattern};
use crate::events::{MatchEvent, SignatureAction};
use crate::signatures::store::{EvalContext, MatchType, SignatureAndAction};
use crate::state::transaction::TransactionCtx;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

// ── First-tier aggregation ────────────────────────────────────────────────────

struct AggEntry {
    patterns: BTreeSet<Pattern>,
    hook:     Option<Arc<MultiPatternEngine>>,
}

/// Shared first-tier engines keyed by context name. Signature sets feed
/// their pattern unions in; the engine recompiles only when the union
/// grows. Cleared on configuration reload.
#[derive(Default)]
pub struct FirstTierAggregator {
    aggs: DashMap<String, AggEntry>,
}

impl FirstTierAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_hook(
        &self,
        ctx_name: &str,
        new_patterns: &BTreeSet<Pattern>,
    ) -> Option<Arc<MultiPatternEngine>> {
        let mut entry = self.aggs.entry(ctx_name.to_string()).or_insert_with(|| AggEntry {
            patterns: BTreeSet::new(),
            hook:     None,
        });
        let old_size = entry.patterns.len();
        entry.patterns.extend(new_patterns.iter().cloned());

        if entry.patterns.len() != old_size || (entry.hook.is_none() && !entry.patterns.is_empty()) {
            match MultiPatternEngine::prepare(&entry.patterns) {
                Ok(engine) => entry.hook = Some(Arc::new(engine)),
                Err(e) => {
                    tracing::error!(context = ctx_name, error = %e, "first tier compile failed");
                }
            }
        }
        entry.hook.clone()
    }

    pub fn clear(&self) {
        self.aggs.clear();
    }
}

// ── Exception rulebase ────────────────────────────────────────────────────────

/// Behavior forced by a matching exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionBehavior {
    /// Exception suppresses enforcement; the match is logged as Detect.
    Skip,
    /// Exception accepts the request; the match is logged as Detect.
    Accept,
    /// Exception forces a block.
    Drop,
}

pub struct ExceptionRule {
    /// All listed conditions must hold; keys are `protectionName`,
    /// `hostName`, `sourceIP`, `url`, `sourceIdentifier`.
    pub conditions: HashMap<String, String>,
    pub behavior:   ExceptionBehavior,
    pub id:         String,
}

#[derive(Default)]
pub struct ExceptionRulebase {
    pub rules: Vec<ExceptionRule>,
}

/// Resolved action + the override label and exception ids for logging.
pub struct ActionResolution {
    pub action:   SignatureAction,
    pub label:    &'static str,
    pub override_ids: Vec<String>,
}

impl ExceptionRulebase {
    fn behaviors(&self, facts: &HashMap<&str, String>) -> (Vec<ExceptionBehavior>, Vec<String>) {
        let mut matched = Vec::new();
        let mut ids = Vec::new();
        for rule in &self.rules {
            let holds = rule.conditions.iter().all(|(key, want)| {
                facts.get(key.as_str()).is_some_and(|have| have == want)
            });
            if holds {
                matched.push(rule.behavior);
                if !rule.id.is_empty() {
                    ids.push(rule.id.clone());
                }
            }
        }
        (matched, ids)
    }

    pub fn resolve(
        &self,
        default_action: SignatureAction,
        facts: &HashMap<&str, String>,
    ) -> ActionResolution {
        let (behaviors, override_ids) = self.behaviors(facts);
        if behaviors.contains(&ExceptionBehavior::Skip) {
            return ActionResolution { action: SignatureAction::Detect, label: "Skip", override_ids };
        }
        if behaviors.contains(&ExceptionBehavior::Accept) {
            return ActionResolution { action: SignatureAction::Detect, label: "Accept", override_ids };
        }
        if behaviors.contains(&ExceptionBehavior::Drop) {
            return ActionResolution { action: SignatureAction::Prevent, label: "Drop", override_ids };
        }
        ActionResolution { action: default_action, label: "None", override_ids }
    }
}

// ── Evaluation adapter ────────────────────────────────────────────────────────

// Bridges the rule tree's EvalContext onto the transaction state: the flag
// set memoizes sub-signature outcomes for the transaction lifetime.
struct TxnEval<'a> {
    txn:      &'a mut TransactionCtx,
    ctx_name: &'a str,
    buffer:   String,
}

impl EvalContext for TxnEval<'_> {
    fn is_flag_set(&self, id: &str) -> bool {
        self.txn.is_flag_set(id)
    }
    fn set_flag(&mut self, id: &str) {
        self.txn.set_flag(id);
    }
    fn context_name(&self) -> &str {
        self.ctx_name
    }
    fn buffer(&self) -> &str {
        &self.buffer
    }
}

// ── Per-context signature sets ────────────────────────────────────────────────

#[derive(Default)]
pub struct SignaturesPerContext {
    signatures_per_lss:     BTreeMap<Pattern, Vec<SignatureAndAction>>,
    signatures_without_lss: Vec<SignatureAndAction>,
    first_tier:             Option<Arc<MultiPatternEngine>>,
}

impl SignaturesPerContext {
    pub fn add_signature(&mut self, sig: SignatureAndAction) {
        let patterns = sig.signature.rule.patterns();
        if patterns.is_empty() {
            self.signatures_without_lss.push(sig);
            return;
        }
        for pat in patterns {
            self.signatures_per_lss.entry(pat).or_default().push(sig.clone());
        }
    }

    pub fn calc_first_tier(&mut self, ctx_name: &str, agg: &FirstTierAggregator) {
        let patterns: BTreeSet<Pattern> = self.signatures_per_lss.keys().cloned().collect();
        self.first_tier = agg.get_hook(ctx_name, &patterns);
    }

    fn first_tier_matches(&self, buffer: &[u8]) -> BTreeSet<Pattern> {
        match &self.first_tier {
            Some(engine) => engine.scan(buffer),
            None => BTreeSet::new(),
        }
    }

    pub fn is_matched_prevent(
        &self,
        ctx_name: &str,
        buffer: &[u8],
        txn: &mut TransactionCtx,
        exceptions: &ExceptionRulebase,
        match_events: &mut Vec<MatchEvent>,
    ) -> bool {
        let fired = self.first_tier_matches(buffer);
        debug!(context = ctx_name, fired = fired.len(), "first tier done");

        for pat in &fired {
            let Some(sigs) = self.signatures_per_lss.get(pat) else { continue };
            for sig in sigs {
                if self.signature_matched_prevent(sig, ctx_name, buffer, &fired, txn, exceptions, match_events) {
                    return true;
                }
            }
        }

        for sig in &self.signatures_without_lss {
            if self.signature_matched_prevent(sig, ctx_name, buffer, &fired, txn, exceptions, match_events) {
                return true;
            }
        }

        false
    }

    #[allow(clippy::too_many_arguments)]
    fn signature_matched_prevent(
        &self,
        sig: &SignatureAndAction,
        ctx_name: &str,
        buffer: &[u8],
        fired: &BTreeSet<Pattern>,
        txn: &mut TransactionCtx,
        exceptions: &ExceptionRulebase,
        match_events: &mut Vec<MatchEvent>,
    ) -> bool {
        let mut eval = TxnEval {
            txn,
            ctx_name,
            buffer: String::from_utf8_lossy(buffer).into_owned(),
        };

        if sig.signature.rule.get_match(fired, &mut eval) != MatchType::Match {
            return false;
        }

        let md = &sig.signature.metadata;

        if md.silent {
            // silent protections log internally and never block
            info!(
                protection = md.name,
                context = ctx_name,
                "silent protection matched"
            );
            match_events.push(MatchEvent {
                protection_id: md.protection_id.clone(),
                protection:    md.name.clone(),
                action:        SignatureAction::Ignore,
                silent:        true,
                context:       ctx_name.to_string(),
                timestamp:     Utc::now(),
            });
            return false;
        }

        let mut facts: HashMap<&str, String> = HashMap::new();
        facts.insert("protectionName", md.name.clone());
        if let Some(host) = &txn.host {
            facts.insert("hostName", host.clone());
        }
        if let Some(ip) = &txn.source_ip {
            facts.insert("sourceIP", ip.clone());
        }
        if let Some(sid) = &txn.source_id {
            facts.insert("sourceIdentifier", sid.clone());
        }
        let path = txn.buffer("HTTP_PATH_DECODED");
        if !path.is_empty() {
            facts.insert("url", String::from_utf8_lossy(&path).into_owned());
        }

        let resolution = exceptions.resolve(sig.action, &facts);

        match_events.push(MatchEvent {
            protection_id: md.protection_id.clone(),
            protection:    md.name.clone(),
            action:        resolution.action,
            silent:        false,
            context:       ctx_name.to_string(),
            timestamp:     Utc::now(),
        });

        if resolution.action == SignatureAction::Ignore {
            debug!(protection = md.name, "ignored signature");
            return false;
        }

        let is_prevent = resolution.action == SignatureAction::Prevent;
        info!(
            protection = md.name,
            context = ctx_name,
            action = %resolution.action,
            waap_override = resolution.label,
            "signature matched"
        );
        is_prevent
    }
}

// ── The matcher ───────────────────────────────────────────────────────────────

/// All installed signatures projected per context name. Shared immutable
/// after construction.
#[derive(Default)]
pub struct SignatureMatcher {
    per_context: HashMap<String, SignaturesPerContext>,
}

impl SignatureMatcher {
    pub fn new(selected: Vec<SignatureAndAction>, agg: &FirstTierAggregator) -> Self {
        let mut per_context: HashMap<String, SignaturesPerContext> = HashMap::new();
        for sig in selected {
            for ctx in &sig.signature.contexts {
                per_context.entry(ctx.clone()).or_default().add_signature(sig.clone());
            }
        }
        for (ctx_name, sigs) in per_context.iter_mut() {
            sigs.calc_first_tier(ctx_name, agg);
        }
        SignatureMatcher { per_context }
    }

    pub fn is_empty(&self) -> bool {
        self.per_context.is_empty()
    }

    pub fn has_context(&self, ctx_name: &str) -> bool {
        self.per_context.contains_key(ctx_name)
    }

    /// Evaluate one published context; true means PREVENT.
    pub fn is_matched_prevent(
        &self,
        ctx_name: &str,
        buffer: &[u8],
        txn: &mut TransactionCtx,
        exceptions: &ExceptionRulebase,
        match_events: &mut Vec<MatchEvent>,
    ) -> bool {
        let Some(sigs) = self.per_context.get(ctx_name) else {
            return false;
        };
        sigs.is_matched_prevent(ctx_name, buffer, txn, exceptions, match_events)
    }
}
