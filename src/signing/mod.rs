//! Signing
//!
//! Everything between an unsigned draft and per-input ledger signatures:
//! 1. Sighash preimages and signer content hashes (`preimage`)
//! 2. The remote custodial signer boundary (`remote`)
//! 3. Job submission, polling and response matching (`coordinator`)
//! 4. DER / low-S canonicalization of returned signatures (`der`)

pub mod coordinator;
pub mod der;
pub mod preimage;
pub mod remote;

pub use coordinator::*;
pub use der::{canonicalize, canonicalize_components, CanonicalSignature, DecodedSignature};
pub use preimage::{sighash_preimage, signer_content, TRANSFER_SCOPE};
pub use remote::*;

use bitcoin::{OutPoint, PublicKey, ScriptBuf};

/// What must be signed for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    pub input_index: usize,
    pub outpoint: OutPoint,
    /// Address owning the spent output
    pub address: String,
    pub derivation_index: u32,
    /// Locking script of the spent output
    pub script: ScriptBuf,
    pub satoshis: u64,
    /// Sighash scope byte
    pub scope: u8,
}

/// A verified, canonical signature for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
    pub input_index: usize,
    pub signature: CanonicalSignature,
    pub public_key: PublicKey,
}
