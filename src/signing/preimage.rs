//! Sighash Preimage
//!
//! BIP-143 style digest with the FORKID replay-protection bit, as used by the
//! token ledger for every input (legacy scripts included). The remote signer
//! is handed a content hash derived from the same preimage.

use crate::error::{TransferError, TransferResult};
use bitcoin::consensus::encode::VarInt;
use bitcoin::consensus::Encodable;
use bitcoin::hashes::{sha256, sha256d, Hash};
use bitcoin::Transaction;

pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_FORKID: u8 = 0x40;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Scope every transfer input is signed under
pub const TRANSFER_SCOPE: u8 = SIGHASH_ALL | SIGHASH_ANYONECANPAY | SIGHASH_FORKID;

fn base_type(scope: u8) -> u8 {
    scope & 0x1f
}

fn is_anyonecanpay(scope: u8) -> bool {
    scope & SIGHASH_ANYONECANPAY != 0
}

/// Serialized preimage for `input_index`, signing `script_code` worth `value`.
///
/// Only `ALL` scopes are produced, with or without `ANYONECANPAY`.
pub fn sighash_preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    value: u64,
    scope: u8,
) -> TransferResult<Vec<u8>> {
    if scope & SIGHASH_FORKID == 0 {
        return Err(TransferError::internal(format!(
            "Sighash scope {:#04x} lacks FORKID",
            scope
        )));
    }
    if base_type(scope) != SIGHASH_ALL {
        return Err(TransferError::internal(format!(
            "Sighash scope {:#04x} does not commit to all outputs",
            scope
        )));
    }
    let input = tx.input.get(input_index).ok_or_else(|| {
        TransferError::internal(format!(
            "Input index {} out of range ({} inputs)",
            input_index,
            tx.input.len()
        ))
    })?;

    let mut serialized = Vec::with_capacity(156 + script_code.len());

    // 1. nVersion
    serialized.extend_from_slice(&tx.version.0.to_le_bytes());

    // 2. hashPrevouts, 3. hashSequence
    let (hash_prevouts, hash_sequence) = if is_anyonecanpay(scope) {
        ([0u8; 32], [0u8; 32])
    } else {
        let mut prevouts = Vec::with_capacity(tx.input.len() * 36);
        let mut sequences = Vec::with_capacity(tx.input.len() * 4);
        for inp in &tx.input {
            encode_into(&inp.previous_output, &mut prevouts)?;
            encode_into(&inp.sequence, &mut sequences)?;
        }
        (double_sha256(&prevouts), double_sha256(&sequences))
    };
    serialized.extend_from_slice(&hash_prevouts);
    serialized.extend_from_slice(&hash_sequence);

    // 4. outpoint
    encode_into(&input.previous_output, &mut serialized)?;

    // 5. scriptCode
    encode_into(&VarInt(script_code.len() as u64), &mut serialized)?;
    serialized.extend_from_slice(script_code);

    // 6. value
    serialized.extend_from_slice(&value.to_le_bytes());

    // 7. nSequence
    encode_into(&input.sequence, &mut serialized)?;

    // 8. hashOutputs
    let mut outputs = Vec::new();
    for out in &tx.output {
        encode_into(out, &mut outputs)?;
    }
    serialized.extend_from_slice(&double_sha256(&outputs));

    // 9. nLocktime
    encode_into(&tx.lock_time, &mut serialized)?;

    // 10. sighash type (fork id 0)
    serialized.extend_from_slice(&(scope as u32).to_le_bytes());

    Ok(serialized)
}

/// SHA-256 of the preimage
pub fn base_hash(preimage: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}

/// Content handed to the remote signer: SHA-256 of the base hash.
/// Identical to the ledger sighash.
pub fn signer_content(preimage: &[u8]) -> [u8; 32] {
    double_sha256(preimage)
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

fn encode_into<T: Encodable + ?Sized>(value: &T, buf: &mut Vec<u8>) -> TransferResult<()> {
    value
        .consensus_encode(buf)
        .map_err(|e| TransferError::internal(format!("Preimage serialization failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness};

    fn sample_tx(inputs: usize) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: (0..inputs)
                .map(|i| TxIn {
                    previous_output: OutPoint::new(Txid::from_byte_array([i as u8 + 1; 32]), i as u32),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value: Amount::from_sat(1),
                script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
            }],
        }
    }

    #[test]
    fn test_transfer_scope_byte() {
        assert_eq!(TRANSFER_SCOPE, 0xc1);
    }

    #[test]
    fn test_preimage_layout_anyonecanpay() {
        let tx = sample_tx(2);
        let script = [0x76u8, 0xa9];
        let preimage = sighash_preimage(&tx, 1, &script, 1, TRANSFER_SCOPE).unwrap();

        // version + 2 zeroed hashes + outpoint + script + value + seq + outputs + locktime + type
        assert_eq!(preimage.len(), 4 + 32 + 32 + 36 + 1 + 2 + 8 + 4 + 32 + 4 + 4);
        assert_eq!(&preimage[..4], &[1, 0, 0, 0]);
        assert!(preimage[4..68].iter().all(|b| *b == 0));
        assert_eq!(&preimage[68..100], &[2u8; 32]);
        assert_eq!(&preimage[100..104], &1u32.to_le_bytes());
        assert_eq!(&preimage[preimage.len() - 4..], &[0xc1, 0, 0, 0]);
    }

    #[test]
    fn test_inputs_commit_only_to_themselves() {
        let two = sample_tx(2);
        let mut three = sample_tx(2);
        three.input.push(sample_tx(3).input[2].clone());

        let a = sighash_preimage(&two, 0, &[0x51], 1, TRANSFER_SCOPE).unwrap();
        let b = sighash_preimage(&three, 0, &[0x51], 1, TRANSFER_SCOPE).unwrap();
        assert_eq!(a, b);

        let all = SIGHASH_ALL | SIGHASH_FORKID;
        let c = sighash_preimage(&two, 0, &[0x51], 1, all).unwrap();
        let d = sighash_preimage(&three, 0, &[0x51], 1, all).unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn test_signer_content_equals_ledger_sighash() {
        let tx = sample_tx(1);
        let preimage = sighash_preimage(&tx, 0, &[0x51], 1, TRANSFER_SCOPE).unwrap();
        let ledger = sha256d::Hash::hash(&preimage).to_byte_array();
        assert_eq!(signer_content(&preimage), ledger);
        assert_ne!(base_hash(&preimage), ledger);
    }

    #[test]
    fn test_rejects_bad_index_and_missing_forkid() {
        let tx = sample_tx(1);
        assert!(sighash_preimage(&tx, 1, &[], 1, TRANSFER_SCOPE).is_err());
        assert!(sighash_preimage(&tx, 0, &[], 1, SIGHASH_ALL).is_err());
    }

    #[test]
    fn test_rejects_scopes_that_skip_outputs() {
        let tx = sample_tx(1);
        // NONE and SINGLE base types
        assert!(sighash_preimage(&tx, 0, &[], 1, 0x02 | SIGHASH_FORKID).is_err());
        assert!(sighash_preimage(&tx, 0, &[], 1, 0x03 | SIGHASH_FORKID | SIGHASH_ANYONECANPAY).is_err());
    }

    #[test]
    fn test_long_script_code_uses_compact_size() {
        let tx = sample_tx(1);
        let script = vec![0x51u8; 0xfd];
        let preimage = sighash_preimage(&tx, 0, &script, 1, TRANSFER_SCOPE).unwrap();
        // version + 2 hashes + outpoint, then 0xfd followed by a u16 length
        assert_eq!(&preimage[104..107], &[0xfd, 0xfd, 0x00]);
        assert_eq!(preimage.len(), 104 + 3 + 0xfd + 8 + 4 + 32 + 4 + 4);
    }
}
