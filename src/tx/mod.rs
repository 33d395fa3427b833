//! Transaction Module
//!
//! Builds token transfer drafts, encodes their locking scripts and
//! finalizes them once signed.

mod builder;
pub mod script;

pub use builder::*;
pub use script::{extract_envelope, LockingScriptEncoder, OrdCosignEncoder, TokenEnvelope};
