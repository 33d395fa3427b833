//! Transfer Transaction Builder
//!
//! Turns an intent plus the sources' token UTXOs into an unsigned draft.
//! The draft only becomes a [`SignedTransaction`] once every input has
//! exactly one signature attached; the signed value is immutable.

use super::script::{LockingScriptEncoder, OrdCosignEncoder, TokenEnvelope};
use crate::error::{TransferError, TransferResult};
use crate::fees::resolve_fee;
use crate::signing::{InputSignature, SignatureRequest, TRANSFER_SCOPE};
use crate::types::{TokenConfig, TransferAmount, TransferIntent, TransferMode, Utxo};
use crate::wallet::{select_utxos, total_amount, UtxoSelection};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::{deserialize, serialize};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Satoshis locked in each token output
pub const DEFAULT_OUTPUT_SATOSHIS: u64 = 1;

/// Resolved accounting for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub mode: TransferMode,
    /// Amount the caller asked to move; the whole balance for `FullBalance`
    pub requested: u64,
    pub recipient_amount: u64,
    pub fee: u64,
    /// Tokens the inputs must cover
    pub coverage: u64,
    /// Whole balance of the sources is being withdrawn
    pub full_balance: bool,
}

/// Decide gross/net accounting for `amount` against `available` tokens.
///
/// A request within one whole token of the available balance is treated as
/// a full withdrawal and settled gross. The amount itself is never changed,
/// so a request above the balance still fails in selection.
pub fn plan_transfer(
    amount: TransferAmount,
    gross: bool,
    available: u64,
    token: &TokenConfig,
) -> TransferResult<TransferPlan> {
    let (requested, full_balance) = match amount {
        TransferAmount::FullBalance => {
            if available == 0 {
                return Err(TransferError::InsufficientFunds {
                    available: 0,
                    required: 1,
                });
            }
            (available, true)
        }
        TransferAmount::Exact(0) => return Err(TransferError::invalid_intent("Amount must be positive")),
        TransferAmount::Exact(value) => (value, available > 0 && value.abs_diff(available) < token.unit()),
    };

    let fee = resolve_fee(&token.fee_tiers, requested)?;

    if gross || full_balance {
        if requested <= fee {
            return Err(if full_balance {
                TransferError::InsufficientForFee { total: requested, fee }
            } else {
                TransferError::AmountTooSmall { amount: requested, fee }
            });
        }
        Ok(TransferPlan {
            mode: TransferMode::Gross,
            requested,
            recipient_amount: requested - fee,
            fee,
            coverage: requested,
            full_balance,
        })
    } else {
        let coverage = requested
            .checked_add(fee)
            .ok_or_else(|| TransferError::invalid_intent("Amount plus fee overflows"))?;
        Ok(TransferPlan {
            mode: TransferMode::Net,
            requested,
            recipient_amount: requested,
            fee,
            coverage,
            full_balance,
        })
    }
}

/// Role of a token output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    Recipient,
    Fee,
    Change,
}

/// A token output as planned, before script encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOutput {
    pub role: OutputRole,
    pub address: String,
    pub amount: u64,
}

/// Builder output: the draft plus the accounting behind it
#[derive(Debug, Clone)]
pub struct BuiltTransfer {
    pub draft: DraftTransaction,
    pub plan: TransferPlan,
    pub selection: UtxoSelection,
    pub outputs: Vec<PlannedOutput>,
}

impl BuiltTransfer {
    pub fn change(&self) -> u64 {
        self.outputs
            .iter()
            .find(|o| o.role == OutputRole::Change)
            .map(|o| o.amount)
            .unwrap_or(0)
    }
}

/// Plan and inputs chosen for a transfer, before any script is encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedInputs {
    pub plan: TransferPlan,
    pub selection: UtxoSelection,
}

/// Assembles transfer drafts
#[derive(Clone)]
pub struct TransactionBuilder {
    encoder: Arc<dyn LockingScriptEncoder>,
    output_satoshis: u64,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            encoder: Arc::new(OrdCosignEncoder),
            output_satoshis: DEFAULT_OUTPUT_SATOSHIS,
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn LockingScriptEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_output_satoshis(mut self, satoshis: u64) -> Self {
        self.output_satoshis = satoshis;
        self
    }

    /// Plan, select inputs and assemble the unsigned transaction
    pub fn build(
        &self,
        intent: &TransferIntent,
        utxos: &[Utxo],
        token: &TokenConfig,
    ) -> TransferResult<BuiltTransfer> {
        let selected = self.select(intent, utxos, token)?;
        self.assemble(intent, token, selected)
    }

    /// Resolve the gross/net plan and pick the inputs that cover it
    pub fn select(
        &self,
        intent: &TransferIntent,
        utxos: &[Utxo],
        token: &TokenConfig,
    ) -> TransferResult<SelectedInputs> {
        intent.validate()?;

        // Only outputs of this token held by a known source can be spent
        let eligible: Vec<Utxo> = utxos
            .iter()
            .filter(|u| intent.derivation_index(&u.address).is_some())
            .filter(|u| u.token_id.as_deref().map_or(true, |id| id == token.token_id))
            .cloned()
            .collect();

        let available = total_amount(&eligible)?;
        let plan = plan_transfer(intent.amount, intent.gross, available, token)?;
        let selection = select_utxos(&eligible, plan.coverage)?;
        Ok(SelectedInputs { plan, selection })
    }

    /// Encode the outputs and inputs for an already selected transfer
    pub fn assemble(
        &self,
        intent: &TransferIntent,
        token: &TokenConfig,
        selected: SelectedInputs,
    ) -> TransferResult<BuiltTransfer> {
        let SelectedInputs { plan, selection } = selected;
        let change = selection.excess_over(plan.coverage);

        let mut outputs = vec![PlannedOutput {
            role: OutputRole::Recipient,
            address: intent.destination.clone(),
            amount: plan.recipient_amount,
        }];
        if plan.fee > 0 {
            outputs.push(PlannedOutput {
                role: OutputRole::Fee,
                address: token.fee_address.clone(),
                amount: plan.fee,
            });
        }
        if change > 0 {
            outputs.push(PlannedOutput {
                role: OutputRole::Change,
                address: intent.sources[0].address.clone(),
                amount: change,
            });
        }

        let approver = token.approver_public_key()?;
        let tx_outputs = outputs
            .iter()
            .map(|planned| {
                let envelope = TokenEnvelope::transfer(&token.token_id, planned.amount);
                let script_pubkey = self.encoder.token_output(&planned.address, &approver, &envelope)?;
                Ok(TxOut {
                    value: Amount::from_sat(self.output_satoshis),
                    script_pubkey,
                })
            })
            .collect::<TransferResult<Vec<_>>>()?;

        let mut inputs = Vec::with_capacity(selection.selected.len());
        let mut requests = Vec::with_capacity(selection.selected.len());
        for (input_index, utxo) in selection.selected.iter().enumerate() {
            let outpoint = utxo.outpoint()?;
            let derivation_index = intent.derivation_index(&utxo.address).ok_or_else(|| {
                TransferError::internal(format!("No derivation index for {}", utxo.address))
            })?;

            inputs.push(TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
            requests.push(SignatureRequest {
                input_index,
                outpoint,
                address: utxo.address.clone(),
                derivation_index,
                script: utxo.script_pubkey()?,
                satoshis: utxo.satoshis,
                scope: TRANSFER_SCOPE,
            });
        }

        let tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: tx_outputs,
        };

        Ok(BuiltTransfer {
            draft: DraftTransaction { tx, requests },
            plan,
            selection,
            outputs,
        })
    }
}

/// An unsigned transfer and what each input needs signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftTransaction {
    tx: Transaction,
    requests: Vec<SignatureRequest>,
}

impl DraftTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn requests(&self) -> &[SignatureRequest] {
        &self.requests
    }

    pub fn input_count(&self) -> usize {
        self.tx.input.len()
    }

    /// Txids of the transactions the inputs spend from, deduplicated
    pub fn source_txids(&self) -> Vec<Txid> {
        let mut seen = HashSet::new();
        self.requests
            .iter()
            .map(|r| r.outpoint.txid)
            .filter(|txid| seen.insert(*txid))
            .collect()
    }

    /// Take each input's locking script and value from its source transaction
    pub fn bind_prevouts(mut self, sources: &[Transaction]) -> TransferResult<Self> {
        let by_txid: HashMap<Txid, &Transaction> =
            sources.iter().map(|tx| (tx.compute_txid(), tx)).collect();

        for request in &mut self.requests {
            let outpoint = request.outpoint;
            let prevout = by_txid
                .get(&outpoint.txid)
                .and_then(|tx| tx.output.get(outpoint.vout as usize))
                .ok_or_else(|| TransferError::PrevoutUnavailable {
                    txid: outpoint.txid.to_string(),
                    vout: outpoint.vout,
                })?;
            request.script = prevout.script_pubkey.clone();
            request.satoshis = prevout.value.to_sat();
        }
        Ok(self)
    }

    /// Attach exactly one signature per input
    pub fn attach(self, signatures: Vec<InputSignature>) -> TransferResult<SignedTransaction> {
        let input_count = self.tx.input.len();
        if signatures.len() != input_count {
            return Err(TransferError::internal(format!(
                "Expected {} signatures, got {}",
                input_count,
                signatures.len()
            )));
        }

        let mut script_sigs: Vec<Option<ScriptBuf>> = vec![None; input_count];
        for signature in signatures {
            let slot = script_sigs.get_mut(signature.input_index).ok_or_else(|| {
                TransferError::internal(format!("Signature for missing input {}", signature.input_index))
            })?;
            if slot.is_some() {
                return Err(TransferError::internal(format!(
                    "Input {} signed twice",
                    signature.input_index
                )));
            }
            let sig_push = PushBytesBuf::try_from(signature.signature.as_bytes().to_vec())
                .map_err(|_| TransferError::internal("Signature push too large"))?;
            *slot = Some(
                Builder::new()
                    .push_slice(sig_push)
                    .push_key(&signature.public_key)
                    .into_script(),
            );
        }

        let mut tx = self.tx;
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            // length check plus uniqueness leaves no empty slot
            input.script_sig = script_sig.ok_or_else(|| TransferError::internal("Unsigned input"))?;
        }
        Ok(SignedTransaction { tx })
    }
}

/// A fully signed transaction, ready for cosigner submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
}

impl SignedTransaction {
    /// Decode a raw transaction given as hex or base64
    pub fn from_encoded(encoded: &str) -> TransferResult<Self> {
        let trimmed = encoded.trim();
        let bytes = if trimmed.len() % 2 == 0 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(trimmed)?
        } else {
            BASE64.decode(trimmed)?
        };
        let tx: Transaction = deserialize(&bytes)?;
        Ok(Self { tx })
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(&self.tx)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn txid(&self) -> String {
        self.tx.compute_txid().to_string()
    }
}
