//! Locking Scripts and Token Envelopes
//!
//! Every token output is locked by a cosign template (the owner's key *and*
//! the policy approver's key must sign) and carries an ordinal inscription
//! naming the token and the exact amount it holds.

use crate::error::{TransferError, TransferResult};
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_DUP, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF, OP_PUSHNUM_1,
};
use bitcoin::opcodes::OP_FALSE;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Address, PubkeyHash, PublicKey, Script, ScriptBuf};
use serde::{Deserialize, Serialize};

pub const INSCRIPTION_TAG: &[u8] = b"ord";
pub const BSV20_CONTENT_TYPE: &str = "application/bsv-20";
pub const BSV20_PROTOCOL: &str = "bsv-20";

/// BSV-20 transfer inscription payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEnvelope {
    pub p: String,
    pub op: String,
    pub id: String,
    /// Decimal string of base units
    pub amt: String,
}

impl TokenEnvelope {
    pub fn transfer(token_id: &str, amount: u64) -> Self {
        Self {
            p: BSV20_PROTOCOL.to_string(),
            op: "transfer".to_string(),
            id: token_id.to_string(),
            amt: amount.to_string(),
        }
    }

    pub fn amount(&self) -> TransferResult<u64> {
        self.amt
            .parse()
            .map_err(|_| TransferError::parse(format!("Envelope amount {:?} is not an integer", self.amt)))
    }
}

/// Produces output locking scripts
pub trait LockingScriptEncoder: Send + Sync {
    /// Script spendable only with signatures from `address`'s key and `approver`
    fn cosign_lock(&self, address: &str, approver: &PublicKey) -> TransferResult<ScriptBuf>;

    /// Prefix `script` with the token envelope
    fn inscribe(&self, script: &ScriptBuf, envelope: &TokenEnvelope) -> TransferResult<ScriptBuf>;

    fn token_output(
        &self,
        address: &str,
        approver: &PublicKey,
        envelope: &TokenEnvelope,
    ) -> TransferResult<ScriptBuf> {
        let lock = self.cosign_lock(address, approver)?;
        self.inscribe(&lock, envelope)
    }
}

/// Ordinal-inscribed BSV-20 outputs under a cosign template
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdCosignEncoder;

impl LockingScriptEncoder for OrdCosignEncoder {
    fn cosign_lock(&self, address: &str, approver: &PublicKey) -> TransferResult<ScriptBuf> {
        let pkh = address_pubkey_hash(address)?;
        Ok(Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(push_bytes(&pkh.to_byte_array())?)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_key(approver)
            .push_opcode(OP_CHECKSIG)
            .into_script())
    }

    fn inscribe(&self, script: &ScriptBuf, envelope: &TokenEnvelope) -> TransferResult<ScriptBuf> {
        let payload = serde_json::to_vec(envelope)?;
        let mut bytes = Builder::new()
            .push_opcode(OP_FALSE)
            .push_opcode(OP_IF)
            .push_slice(push_bytes(INSCRIPTION_TAG)?)
            .push_opcode(OP_PUSHNUM_1)
            .push_slice(push_bytes(BSV20_CONTENT_TYPE.as_bytes())?)
            .push_opcode(OP_FALSE)
            .push_slice(push_bytes(&payload)?)
            .push_opcode(OP_ENDIF)
            .into_script()
            .into_bytes();
        bytes.extend_from_slice(script.as_bytes());
        Ok(ScriptBuf::from_bytes(bytes))
    }
}

/// HASH160 of the key behind a P2PKH address
pub fn address_pubkey_hash(address: &str) -> TransferResult<PubkeyHash> {
    let parsed = address
        .trim()
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| TransferError::InvalidAddress(format!("{}: {}", address, e)))?;
    parsed
        .assume_checked()
        .pubkey_hash()
        .ok_or_else(|| TransferError::InvalidAddress(format!("{} is not a pay-to-pubkey-hash address", address)))
}

fn push_bytes(data: &[u8]) -> TransferResult<PushBytesBuf> {
    PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| TransferError::internal(format!("Push of {} bytes exceeds script limits", data.len())))
}

/// Read the token envelope at the start of a locking script, if any
pub fn extract_envelope(script: &Script) -> TransferResult<Option<TokenEnvelope>> {
    let mut pushes: Vec<Vec<u8>> = Vec::new();
    let mut ops = Vec::new();

    for (position, instruction) in script.instructions().enumerate().take(8) {
        let instruction =
            instruction.map_err(|e| TransferError::parse(format!("Malformed script: {}", e)))?;
        match instruction {
            Instruction::PushBytes(bytes) => pushes.push(bytes.as_bytes().to_vec()),
            Instruction::Op(op) => ops.push((position, op)),
        }
    }

    let shape_ok = ops == [(1, OP_IF), (3, OP_PUSHNUM_1), (7, OP_ENDIF)]
        && pushes.len() == 5
        && pushes[0].is_empty()
        && pushes[1] == INSCRIPTION_TAG
        && pushes[2] == BSV20_CONTENT_TYPE.as_bytes()
        && pushes[3].is_empty();
    if !shape_ok {
        return Ok(None);
    }

    let envelope: TokenEnvelope = serde_json::from_slice(&pushes[4])?;
    Ok(Some(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ADDRESS: &str = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT";
    const APPROVER: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn approver() -> PublicKey {
        PublicKey::from_str(APPROVER).unwrap()
    }

    #[test]
    fn test_cosign_lock_layout() {
        let script = OrdCosignEncoder.cosign_lock(ADDRESS, &approver()).unwrap();
        let bytes = script.as_bytes();

        assert_eq!(&bytes[..3], &[0x76, 0xa9, 0x14]);
        let pkh = address_pubkey_hash(ADDRESS).unwrap();
        assert_eq!(&bytes[3..23], &pkh.to_byte_array());
        assert_eq!(&bytes[23..25], &[0x88, 0xad]);
        assert_eq!(bytes[25], 0x21);
        assert_eq!(hex::encode(&bytes[26..59]), APPROVER);
        assert_eq!(bytes[59], 0xac);
        assert_eq!(bytes.len(), 60);
    }

    #[test]
    fn test_envelope_roundtrip_through_script() {
        let envelope = TokenEnvelope::transfer("abc_0", 1250);
        let script = OrdCosignEncoder.token_output(ADDRESS, &approver(), &envelope).unwrap();

        let extracted = extract_envelope(&script).unwrap().unwrap();
        assert_eq!(extracted, envelope);
        assert_eq!(extracted.amount().unwrap(), 1250);

        let lock = OrdCosignEncoder.cosign_lock(ADDRESS, &approver()).unwrap();
        assert!(script.as_bytes().ends_with(lock.as_bytes()));
    }

    #[test]
    fn test_envelope_json_shape() {
        let json = serde_json::to_string(&TokenEnvelope::transfer("tok", 7)).unwrap();
        assert_eq!(json, r#"{"p":"bsv-20","op":"transfer","id":"tok","amt":"7"}"#);
    }

    #[test]
    fn test_plain_script_has_no_envelope() {
        let lock = OrdCosignEncoder.cosign_lock(ADDRESS, &approver()).unwrap();
        assert_eq!(extract_envelope(&lock).unwrap(), None);
        assert_eq!(extract_envelope(&ScriptBuf::new()).unwrap(), None);
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(matches!(
            address_pubkey_hash("not-an-address"),
            Err(TransferError::InvalidAddress(_))
        ));
        // P2SH has no pubkey hash
        assert!(address_pubkey_hash("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy").is_err());
    }
}
