// palisade/src/state/transaction.rs
//
// Per-transaction scratch: accumulated context buffers under their
// policies, staged pending contexts, the string flag set used for
// sub-signature memoization, the cross-event transaction-data map, and
// the drop flag. Owned by the dispatcher for the transaction lifetime
// and borrowed by listeners.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Lifetime policy of an accumulated context buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPolicy {
    /// Visible only during the current event.
    Normal,
    /// Accumulates across events; listeners observe each new piece.
    Keep,
    /// Accumulates but is truncated to the last `n` bytes on each
    /// registration, before any listener observes the buffer.
    History(usize),
}

/// Fixed default policy per context name; configuration may override.
pub fn default_policy(name: &str) -> ContextPolicy {
    match name {
        "HTTP_METHOD" | "HTTP_COMPLETE_URL_DECODED" | "HTTP_PATH_DECODED"
        | "HTTP_QUERY_DECODED" | "HTTP_PROTOCOL" | "HTTP_REQUEST_HEADER"
        | "HTTP_RESPONSE_CODE" | "HTTP_RESPONSE_HEADER" => ContextPolicy::Keep,
        "HTTP_REQUEST_BODY" | "HTTP_RESPONSE_BODY" => ContextPolicy::History(1000),
        _ => ContextPolicy::Normal,
    }
}

pub struct TransactionCtx {
    past_contexts:    HashMap<String, Vec<u8>>,
    pending_contexts: Vec<(String, Vec<u8>)>,
    flags:            HashSet<String>,
    transaction_data: HashMap<String, Vec<u8>>,
    policy_overrides: HashMap<String, ContextPolicy>,
    drop:             bool,
    pub deadline:     Option<Instant>,
    pub host:         Option<String>,
    pub source_ip:    Option<String>,
    pub source_id:    Option<String>,
}

impl TransactionCtx {
    pub fn new() -> Self {
        Self {
            past_contexts:    HashMap::new(),
            pending_contexts: Vec::new(),
            flags:            HashSet::new(),
            transaction_data: HashMap::new(),
            policy_overrides: HashMap::new(),
            drop:             false,
            deadline:         None,
            host:             None,
            source_ip:        None,
            source_id:        None,
        }
    }

    pub fn override_policy(&mut self, name: &str, policy: ContextPolicy) {
        self.policy_overrides.insert(name.to_string(), policy);
    }

    fn policy(&self, name: &str) -> ContextPolicy {
        self.policy_overrides.get(name).copied().unwrap_or_else(|| default_policy(name))
    }

    /// Register an inbound piece for a context and return the buffer that
    /// listeners observe for this event. HISTORY truncation happens here,
    /// before observation.
    pub fn register(&mut self, name: &str, buf: &[u8]) -> Vec<u8> {
        match self.policy(name) {
            ContextPolicy::Normal => buf.to_vec(),
            ContextPolicy::Keep => {
                self.past_contexts
                    .entry(name.to_string())
                    .or_default()
                    .extend_from_slice(buf);
                buf.to_vec()
            }
            ContextPolicy::History(n) => {
                let entry = self.past_contexts.entry(name.to_string()).or_default();
                entry.extend_from_slice(buf);
                if entry.len() > n {
                    let cut = entry.len() - n;
                    entry.drain(..cut);
                }
                entry.clone()
            }
        }
    }

    /// Accumulated buffer for a context (KEEP/HISTORY), falling back to a
    /// still-pending staged buffer, else empty.
    pub fn buffer(&self, name: &str) -> Vec<u8> {
        if let Some(buf) = self.past_contexts.get(name) {
            return buf.clone();
        }
        for (pending_name, buf) in &self.pending_contexts {
            if pending_name == name {
                return buf.clone();
            }
        }
        Vec::new()
    }

    // ── Pending contexts ──────────────────────────────────────────────────────

    pub fn add_pending_context(&mut self, name: &str, buf: Vec<u8>) {
        self.pending_contexts.push((name.to_string(), buf));
    }

    pub fn take_pending_contexts(&mut self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut self.pending_contexts)
    }

    // ── Flags ─────────────────────────────────────────────────────────────────

    pub fn is_flag_set(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: &str) {
        self.flags.insert(flag.to_string());
    }

    // ── Transaction data ──────────────────────────────────────────────────────

    pub fn set_transaction_data(&mut self, key: &str, value: &[u8]) {
        self.transaction_data.insert(key.to_string(), value.to_vec());
    }

    pub fn transaction_data(&self, key: &str) -> Option<&[u8]> {
        self.transaction_data.get(key).map(|v| v.as_slice())
    }

    // ── Drop flag ─────────────────────────────────────────────────────────────

    pub fn set_drop(&mut self) {
        self.drop = true;
    }

    pub fn is_drop(&self) -> bool {
        self.drop
    }
}

impl Default for TransactionCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_contexts_are_not_retained() {
        let mut txn = TransactionCtx::new();
        let seen = txn.register("HTTP_REQUEST_ONE_HEADER", b"X: 1");
        assert_eq!(seen, b"X: 1");
        assert_eq!(txn.buffer("HTTP_REQUEST_ONE_HEADER"), b"");
    }

    #[test]
    fn keep_accumulates_but_observes_pieces() {
        let mut txn = TransactionCtx::new();
        let first = txn.register("HTTP_REQUEST_HEADER", b"A: 1\r\n");
        let second = txn.register("HTTP_REQUEST_HEADER", b"B: 2\r\n");
        assert_eq!(first, b"A: 1\r\n");
        assert_eq!(second, b"B: 2\r\n");
        assert_eq!(txn.buffer("HTTP_REQUEST_HEADER"), b"A: 1\r\nB: 2\r\n");
    }

    #[test]
    fn history_truncates_before_observation() {
        let mut txn = TransactionCtx::new();
        let chunk = vec![b'x'; 1024];
        let first = txn.register("HTTP_REQUEST_BODY", &chunk);
        assert_eq!(first.len(), 1000);

        let mut second_chunk = vec![b'y'; 1024];
        second_chunk[0] = b'z';
        let second = txn.register("HTTP_REQUEST_BODY", &second_chunk);
        // retained buffer is exactly the last 1000 bytes
        assert_eq!(second.len(), 1000);
        assert!(second.iter().all(|&b| b == b'y'));
        assert_eq!(txn.buffer("HTTP_REQUEST_BODY").len(), 1000);
    }

    #[test]
    fn history_bound_holds_at_all_times() {
        let mut txn = TransactionCtx::new();
        for _ in 0..10 {
            txn.register("HTTP_RESPONSE_BODY", &vec![b'a'; 333]);
            assert!(txn.buffer("HTTP_RESPONSE_BODY").len() <= 1000);
        }
    }

    #[test]
    fn pending_contexts_visible_to_buffer() {
        let mut txn = TransactionCtx::new();
        txn.add_pending_context("HTTP_METHOD", b"GET".to_vec());
        assert_eq!(txn.buffer("HTTP_METHOD"), b"GET");
        let pending = txn.take_pending_contexts();
        assert_eq!(pending.len(), 1);
        assert_eq!(txn.buffer("HTTP_METHOD"), b"");
    }

    #[test]
    fn flags_and_drop() {
        let mut txn = TransactionCtx::new();
        assert!(!txn.is_flag_set("HttpRequestData"));
        txn.set_flag("HttpRequestData");
        assert!(txn.is_flag_set("HttpRequestData"));
        assert!(!txn.is_drop());
        txn.set_drop();
        assert!(txn.is_drop());
    }

    #[test]
    fn policy_override() {
        let mut txn = TransactionCtx::new();
        txn.override_policy("HTTP_REQUEST_BODY", ContextPolicy::History(8));
        txn.register("HTTP_REQUEST_BODY", b"0123456789abcdef");
        assert_eq!(txn.buffer("HTTP_REQUEST_BODY"), b"89abcdef");
    }
}
