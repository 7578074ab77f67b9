// palisade/src/signatures/mod.rs
//
// Signature pack loading and compilation: metadata, the simple/compound
// rule tree, keyword rules, and the ordered-first-match policy selector.

pub mod keyword;
pub mod policy;
pub mod store;

pub use keyword::KeywordRule;
pub use policy::{PolicyAction, RuleSelector};
pub use store::{
    deobfuscate, CompleteSignature, ConfigError, Level, MatchType, RuleNode, SignatureAndAction,
    SignatureMetadata, SignatureStore,
};
