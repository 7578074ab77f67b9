// palisade/src/state/mod.rs
//
// Mutable state: per-transaction scratch owned for the transaction's
// lifetime, and per-asset shared state (caches, learned types, scan
// signatures) behind interior mutability.

pub mod asset;
pub mod transaction;

pub use asset::AssetState;
pub use transaction::{default_policy, ContextPolicy, TransactionCtx};
