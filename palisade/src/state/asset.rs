// palisade/src/state/asset.rs
//
// Per-asset shared state: the compiled scan-signature set, the clean and
// suspicious value caches, and the learned parameter types. Shared across
// worker tasks; the caches tolerate lost updates (a value recomputes).

use crate::engine::scanner::{ScanResult, ScanSignatures};
use crate::parsers::deep::LearnedTypes;
use crate::stats::SampleType;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;

/// Capacity of each value cache.
pub const CACHE_CAPACITY: usize = 4096;

/// Digest key for the value caches: value + stage + binary flag + split type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

pub struct AssetState {
    pub asset_id:        String,
    pub scan_signatures: ScanSignatures,
    pub sample_types:    Vec<SampleType>,
    clean_cache:         Mutex<LruCache<CacheKey, ()>>,
    suspicious_cache:    Mutex<LruCache<CacheKey, ScanResult>>,
    learned_types:       DashMap<String, Vec<String>>,
}

fn default_sample_types() -> Vec<SampleType> {
    vec![SampleType {
        name: "html_input".to_string(),
        re:   Regex::new(r"(?i)<(?:html|body|div|span|p|a|script|img|table)\b").expect("html sample type"),
    }]
}

impl AssetState {
    pub fn new(asset_id: &str) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("non-zero cache capacity");
        Self {
            asset_id:         asset_id.to_string(),
            scan_signatures:  ScanSignatures::default(),
            sample_types:     default_sample_types(),
            clean_cache:      Mutex::new(LruCache::new(capacity)),
            suspicious_cache: Mutex::new(LruCache::new(capacity)),
            learned_types:    DashMap::new(),
        }
    }

    pub fn cache_key(
        value: &[u8],
        stage: &str,
        is_binary: bool,
        split_type: Option<&str>,
    ) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(value);
        hasher.update([0]);
        hasher.update(stage.as_bytes());
        hasher.update([is_binary as u8]);
        hasher.update(split_type.unwrap_or("").as_bytes());
        CacheKey(hasher.finalize().into())
    }

    pub fn is_clean_cached(&self, key: &CacheKey) -> bool {
        self.clean_cache.lock().get(key).is_some()
    }

    pub fn insert_clean(&self, key: CacheKey) {
        self.clean_cache.lock().put(key, ());
    }

    pub fn suspicious_cached(&self, key: &CacheKey) -> Option<ScanResult> {
        self.suspicious_cache.lock().get(key).cloned()
    }

    pub fn insert_suspicious(&self, key: CacheKey, res: ScanResult) {
        self.suspicious_cache.lock().put(key, res);
    }

    // ── Learned parameter types ───────────────────────────────────────────────

    pub fn learn_type(&self, key: &str, param_type: &str) {
        let mut entry = self.learned_types.entry(key.to_string()).or_default();
        if !entry.iter().any(|t| t == param_type) {
            entry.push(param_type.to_string());
        }
    }
}

impl LearnedTypes for AssetState {
    fn types_for(&self, key: &[u8]) -> Vec<String> {
        let key = String::from_utf8_lossy(key);
        self.learned_types.get(key.as_ref()).map(|v| v.clone()).unwrap_or_default()
    }

    // Learned types only apply while the runtime value still classifies
    // the same way; a drifted parameter falls back to shape detection.
    fn confirm(&self, value: &[u8], learned_type: &str) -> bool {
        match learned_type {
            "html_input" | "binary_input" => {
                crate::stats::sample_type(value, &self.sample_types).contains(learned_type)
            }
            _ => true,
        }
    }
}
