//! Signature Canonicalization
//!
//! Turns a raw `(r, s)` pair from the remote signer into the exact bytes the
//! ledger's script interpreter accepts: a strict DER `SEQUENCE` of two
//! minimal, non-negative `INTEGER`s with `s` in the lower half of the curve
//! order, followed by the one-byte sighash scope. Downstream validation
//! compares the hex of these bytes, so the encoding must be byte-exact.

use super::remote::RawSignature;
use crate::error::{TransferError, TransferResult};
use secp256k1::ecdsa::Signature;
use secp256k1::Scalar;
use serde::{Deserialize, Serialize};

/// Ledger-ready signature: DER bytes followed by the scope byte
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSignature {
    bytes: Vec<u8>,
}

impl CanonicalSignature {
    /// Full encoding, scope byte included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// DER portion only
    pub fn der(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    pub fn scope(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Strictly decode an encoded signature back into its parts
    pub fn parse(bytes: &[u8]) -> TransferResult<DecodedSignature> {
        let (scope, der) = bytes
            .split_last()
            .ok_or_else(|| TransferError::invalid_component("der", "empty encoding"))?;
        let signature = Signature::from_der(der)
            .map_err(|e| TransferError::invalid_component("der", format!("not strict DER: {}", e)))?;

        let compact = signature.serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        // the DER parser maps out-of-range integers to zero
        check_range(&r, "r")?;
        check_range(&s, "s")?;

        Ok(DecodedSignature { r, s, scope: *scope })
    }

    /// The DER portion as a `secp256k1` signature, for verification
    pub fn to_ecdsa(&self) -> TransferResult<Signature> {
        Ok(Signature::from_der(self.der())?)
    }
}

/// Components recovered from a [`CanonicalSignature`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSignature {
    /// 32-byte big-endian r
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub scope: u8,
}

impl DecodedSignature {
    pub fn is_low_s(&self) -> bool {
        match to_signature(&self.r, &self.s) {
            Ok(signature) => {
                let mut normalized = signature;
                normalized.normalize_s();
                normalized == signature
            }
            Err(_) => false,
        }
    }
}

/// Canonicalize a signer response under the given sighash scope
pub fn canonicalize(raw: &RawSignature, scope: u8) -> TransferResult<CanonicalSignature> {
    let r = decode_component(&raw.r, "r")?;
    let s = decode_component(&raw.s, "s")?;
    canonicalize_components(&r, &s, scope)
}

/// Canonicalize big-endian `r` and `s` bytes
pub fn canonicalize_components(r: &[u8], s: &[u8], scope: u8) -> TransferResult<CanonicalSignature> {
    let r = to_scalar(r, "r")?;
    let s = to_scalar(s, "s")?;
    check_range(&r, "r")?;
    check_range(&s, "s")?;

    let mut signature = to_signature(&r, &s)?;
    signature.normalize_s();

    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(scope);
    Ok(CanonicalSignature { bytes })
}

/// Raw `(r, s)` as 32-byte big-endian scalars, before normalization
pub(crate) fn raw_scalars(raw: &RawSignature) -> TransferResult<([u8; 32], [u8; 32])> {
    let r = to_scalar(&decode_component(&raw.r, "r")?, "r")?;
    let s = to_scalar(&decode_component(&raw.s, "s")?, "s")?;
    Ok((r, s))
}

fn decode_component(value: &str, component: &'static str) -> TransferResult<Vec<u8>> {
    let trimmed = value.trim().trim_start_matches("0x");
    // Odd-length hex from signers that drop a leading zero nibble
    let padded = if trimmed.len() % 2 == 1 {
        format!("0{}", trimmed)
    } else {
        trimmed.to_string()
    };
    hex::decode(padded)
        .map_err(|e| TransferError::invalid_component(component, format!("not hex: {}", e)))
}

/// Interpret big-endian bytes as a 256-bit unsigned integer
fn to_scalar(bytes: &[u8], component: &'static str) -> TransferResult<[u8; 32]> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > 32 {
        return Err(TransferError::invalid_component(
            component,
            format!("{} significant bytes exceed 256 bits", significant.len()),
        ));
    }

    let mut scalar = [0u8; 32];
    scalar[32 - significant.len()..].copy_from_slice(significant);
    Ok(scalar)
}

/// 0 < value < n
fn check_range(value: &[u8; 32], component: &'static str) -> TransferResult<()> {
    if value.iter().all(|b| *b == 0) {
        return Err(TransferError::invalid_component(component, "value is zero"));
    }
    Scalar::from_be_bytes(*value)
        .map_err(|_| TransferError::invalid_component(component, "value is not below the curve order"))?;
    Ok(())
}

fn to_signature(r: &[u8; 32], s: &[u8; 32]) -> TransferResult<Signature> {
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(r);
    compact[32..].copy_from_slice(s);
    Signature::from_compact(&compact)
        .map_err(|e| TransferError::invalid_component("signature", format!("not a valid (r, s) pair: {}", e)))
}
