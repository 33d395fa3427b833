//! Fee Module
//!
//! Resolves the protocol fee owed for a token transfer.

mod tiers;

pub use tiers::*;
