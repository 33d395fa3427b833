//! Wallet Module
//!
//! Holdings of the transfer source: coin selection over token UTXOs.

pub mod utxo;

pub use utxo::*;
