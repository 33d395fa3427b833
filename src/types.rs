//! Shared types for the transfer core
//!
//! Data structures that cross module boundaries are defined here
//! for consistent serialization.

use crate::error::{ErrorReport, TransferError, TransferResult};
use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Holdings
// =============================================================================

/// An unspent, token-bearing output as reported by the token index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Owning address
    #[serde(alias = "owner")]
    pub address: String,
    /// Token amount in base units
    #[serde(alias = "amt")]
    pub amount: u64,
    pub txid: String,
    pub vout: u32,
    /// Locking script (hex)
    #[serde(default)]
    pub script: String,
    /// Raw satoshi value of the output
    #[serde(default)]
    pub satoshis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl Utxo {
    pub fn new(address: &str, amount: u64, txid: &str, vout: u32) -> Self {
        Self {
            address: address.to_string(),
            amount,
            txid: txid.to_string(),
            vout,
            script: String::new(),
            satoshis: 1,
            token_id: None,
        }
    }

    pub fn with_script(mut self, script_hex: &str) -> Self {
        self.script = script_hex.to_string();
        self
    }

    pub fn with_satoshis(mut self, satoshis: u64) -> Self {
        self.satoshis = satoshis;
        self
    }

    pub fn with_token_id(mut self, token_id: &str) -> Self {
        self.token_id = Some(token_id.to_string());
        self
    }

    pub fn outpoint(&self) -> TransferResult<OutPoint> {
        let txid = Txid::from_str(&self.txid)
            .map_err(|e| TransferError::parse(format!("Invalid txid {}: {}", self.txid, e)))?;
        Ok(OutPoint::new(txid, self.vout))
    }

    pub fn script_pubkey(&self) -> TransferResult<ScriptBuf> {
        Ok(ScriptBuf::from_bytes(hex::decode(&self.script)?))
    }
}

// =============================================================================
// Token Policy
// =============================================================================

/// A fee bracket: transfers of `min..=max` tokens owe a flat `fee`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min: u64,
    pub max: u64,
    pub fee: u64,
}

impl FeeTier {
    pub fn new(min: u64, max: u64, fee: u64) -> Self {
        Self { min, max, fee }
    }

    pub fn contains(&self, amount: u64) -> bool {
        self.min <= amount && amount <= self.max
    }
}

/// Largest decimal precision whose unit fits in a `u64`
pub const MAX_TOKEN_DECIMALS: u8 = 19;

/// Token policy published by the cosigner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    /// Compressed public key (hex) of the policy approver
    pub approver_key: String,
    pub fee_address: String,
    pub burn_address: String,
    pub token_id: String,
    pub decimals: u8,
    pub fee_tiers: Vec<FeeTier>,
}

impl TokenConfig {
    pub fn approver_public_key(&self) -> TransferResult<bitcoin::PublicKey> {
        bitcoin::PublicKey::from_str(&self.approver_key)
            .map_err(|e| TransferError::config(format!("Invalid approver key: {}", e)))
    }

    /// Base units in one whole token
    pub fn unit(&self) -> u64 {
        10u64.saturating_pow(self.decimals as u32)
    }

    /// Reject a precision no `u64` amount can express
    pub fn check_decimals(&self) -> TransferResult<()> {
        if self.decimals > MAX_TOKEN_DECIMALS {
            return Err(TransferError::config(format!(
                "Token decimals {} exceed {}",
                self.decimals, MAX_TOKEN_DECIMALS
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Transfer Intent
// =============================================================================

/// A source address the custodial signer controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAddress {
    pub address: String,
    /// Address index under the signer account's derivation path
    pub derivation_index: u32,
}

impl SourceAddress {
    pub fn new(address: &str, derivation_index: u32) -> Self {
        Self {
            address: address.to_string(),
            derivation_index,
        }
    }
}

/// How much to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAmount {
    /// Exact amount in base units
    Exact(u64),
    /// Everything the sources hold
    FullBalance,
}

/// A requested transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub sources: Vec<SourceAddress>,
    /// Account (vault) identifier at the remote signer
    pub signer_account_id: String,
    pub destination: String,
    pub amount: TransferAmount,
    /// The amount already includes the fee
    #[serde(default)]
    pub gross: bool,
}

impl TransferIntent {
    pub fn new(sources: Vec<SourceAddress>, account: &str, destination: &str, amount: TransferAmount) -> Self {
        Self {
            sources,
            signer_account_id: account.to_string(),
            destination: destination.to_string(),
            amount,
            gross: false,
        }
    }

    pub fn gross(mut self, gross: bool) -> Self {
        self.gross = gross;
        self
    }

    /// Fail fast on malformed intents, before any external call
    pub fn validate(&self) -> TransferResult<()> {
        if self.sources.is_empty() {
            return Err(TransferError::invalid_intent("At least one source address is required"));
        }
        if let Some(blank) = self.sources.iter().find(|s| s.address.trim().is_empty()) {
            return Err(TransferError::invalid_intent(format!(
                "Source address with index {} is empty",
                blank.derivation_index
            )));
        }
        if self.destination.trim().is_empty() {
            return Err(TransferError::invalid_intent("Destination address is required"));
        }
        if self.signer_account_id.trim().is_empty() {
            return Err(TransferError::invalid_intent("Signer account id is required"));
        }
        if self.amount == TransferAmount::Exact(0) {
            return Err(TransferError::invalid_intent("Amount must be positive"));
        }
        Ok(())
    }

    pub fn source_addresses(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.address.clone()).collect()
    }

    pub fn derivation_index(&self, address: &str) -> Option<u32> {
        self.sources
            .iter()
            .find(|s| s.address == address)
            .map(|s| s.derivation_index)
    }
}

/// Whether the stated amount includes the fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Gross,
    Net,
}

// =============================================================================
// Amount Formatting
// =============================================================================

/// Parse a decimal token amount ("12.5") into base units
pub fn parse_token_amount(input: &str, decimals: u8) -> TransferResult<u64> {
    let trimmed = input.trim();
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(TransferError::invalid_intent("Empty amount"));
    }
    if frac.len() > decimals as usize {
        return Err(TransferError::invalid_intent(format!(
            "Amount {} has more than {} decimal places",
            trimmed, decimals
        )));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(TransferError::invalid_intent(format!("Invalid amount format: {}", trimmed)));
    }

    let padded = format!("{}{:0<width$}", whole, frac, width = decimals as usize);
    padded
        .parse::<u64>()
        .map_err(|_| TransferError::invalid_intent(format!("Amount out of range: {}", trimmed)))
}

/// Render base units as a decimal token amount
pub fn format_token_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    // every u64 is below 10^20, so wider precisions are all fraction
    let (whole, frac) = match 10u64.checked_pow(decimals as u32) {
        Some(unit) => (amount / unit, amount % unit),
        None => (0, amount),
    };
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

// =============================================================================
// API Response Wrapper
// =============================================================================

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorReport>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &TransferError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.report()),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":{"code":"internal","message":"Serialization failed"}}"#.to_string()
        })
    }
}

impl<T> From<TransferResult<T>> for ApiResponse<T> {
    fn from(result: TransferResult<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(&e),
        }
    }
}
