//! Transfer Module
//!
//! End-to-end token transfers: balance resolution, drafting, remote
//! signing and cosigner submission.

mod orchestrator;

pub use orchestrator::*;
