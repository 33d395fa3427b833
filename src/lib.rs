//! Cosign Transfer Core
//!
//! Token transfers on a BSV-style UTXO ledger where every spend needs two
//! authorizations: a remote custodial signer holding the user's keys, and a
//! policy cosigner that may refuse the transfer.
//!
//! # Architecture
//!
//! This crate provides:
//! - **wallet**: Token UTXO selection
//! - **fees**: Tiered protocol fee resolution
//! - **tx**: Transfer drafts, token envelopes and signed transactions
//! - **signing**: Sighash preimages, remote signing jobs, DER canonicalization
//! - **api**: The policy cosigner boundary
//! - **transfer**: The end-to-end orchestrator
//! - **config**: File and environment configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use cosign_transfer::{CoreConfig, TransferOrchestrator};
//!
//! let config = CoreConfig::load(Path::new("cosign.json"))?;
//! let orchestrator = TransferOrchestrator::from_config(&config)?;
//! let receipt = orchestrator.transfer_tokens(&intent).await?;
//! println!("Accepted {}", receipt.txid);
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod fees;
pub mod signing;
pub mod transfer;
pub mod tx;
pub mod types;
pub mod utils;
pub mod wallet;

pub use config::CoreConfig;
pub use error::{ErrorCode, ErrorReport, TransferError, TransferResult};
pub use types::*;

pub use fees::resolve_fee;
pub use signing::{canonicalize, canonicalize_components, CanonicalSignature, SignatureCoordinator};
pub use transfer::{TransferAttempt, TransferOrchestrator, TransferReceipt, TransferStage};
pub use tx::{DraftTransaction, SignedTransaction, TransactionBuilder};
pub use wallet::{select_utxos, UtxoSelection};
