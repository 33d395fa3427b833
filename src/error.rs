//! Unified error types for the transfer core
//!
//! Every failure of a transfer attempt surfaces as a [`TransferError`]
//! carrying enough structured context (amounts, ids, statuses) to diagnose
//! it without re-deriving state. [`ErrorCode`] is the stable,
//! serializable category reported to API callers.

use serde::{Deserialize, Serialize};

/// Main error type for all transfer operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    // Validation
    #[error("Invalid transfer intent: {0}")]
    InvalidIntent(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Funds
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Balance of {total} cannot cover its own fee of {fee}")]
    InsufficientForFee { total: u64, fee: u64 },

    #[error("Amount {amount} is too small to pay fee {fee}")]
    AmountTooSmall { amount: u64, fee: u64 },

    #[error("No fee tier covers amount {amount}")]
    NoFeeTier { amount: u64 },

    // Protocol
    #[error("Signing job {job_id} ended as {status}{}", .sub_status.as_ref().map(|s| format!(" ({})", s)).unwrap_or_default())]
    SigningFailed {
        job_id: String,
        status: String,
        sub_status: Option<String>,
    },

    #[error("No signature returned for input {input_index} (content {content})")]
    UnmatchedSignature { input_index: usize, content: String },

    #[error("Invalid signature component {component}: {reason}")]
    InvalidSignatureComponent {
        component: &'static str,
        reason: String,
    },

    #[error("Signature for input {input_index} failed verification: {reason}")]
    SignatureVerification { input_index: usize, reason: String },

    #[error("Signing job {job_id} still {last_status} after {waited_secs}s")]
    TimedOut {
        job_id: String,
        waited_secs: u64,
        last_status: String,
    },

    #[error("Source output {txid}:{vout} is unavailable")]
    PrevoutUnavailable { txid: String, vout: u32 },

    // Policy / domain (cosigner verdicts)
    #[error("Address frozen: {0}")]
    AddressFrozen(String),

    #[error("Address blacklisted: {0}")]
    AddressBlacklisted(String),

    #[error("Service paused: {0}")]
    ServicePaused(String),

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    // Plumbing
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn invalid_intent(msg: impl Into<String>) -> Self {
        Self::InvalidIntent(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_component(component: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSignatureComponent {
            component,
            reason: reason.into(),
        }
    }

    /// Stable category for API reporting
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidIntent(_) => ErrorCode::InvalidInput,
            Self::InvalidAddress(_) => ErrorCode::InvalidAddress,
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::InsufficientForFee { .. } => ErrorCode::InsufficientForFee,
            Self::AmountTooSmall { .. } => ErrorCode::AmountTooSmall,
            Self::NoFeeTier { .. } => ErrorCode::NoFeeTier,
            Self::SigningFailed { .. } => ErrorCode::SigningFailed,
            Self::UnmatchedSignature { .. } => ErrorCode::UnmatchedSignature,
            Self::InvalidSignatureComponent { .. } => ErrorCode::InvalidSignatureComponent,
            Self::SignatureVerification { .. } => ErrorCode::VerificationFailed,
            Self::TimedOut { .. } => ErrorCode::Timeout,
            Self::PrevoutUnavailable { .. } => ErrorCode::InvalidTransaction,
            Self::AddressFrozen(_) => ErrorCode::AddressFrozen,
            Self::AddressBlacklisted(_) => ErrorCode::AddressBlacklisted,
            Self::ServicePaused(_) => ErrorCode::ServicePaused,
            Self::SubmissionRejected(_) => ErrorCode::TransactionRejected,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Parse(_) => ErrorCode::ParseError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for verdicts issued by the policy cosigner
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::AddressFrozen(_)
                | Self::AddressBlacklisted(_)
                | Self::ServicePaused(_)
                | Self::SubmissionRejected(_)
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Input errors
    InvalidInput,
    InvalidAddress,
    InvalidTransaction,

    // Funds
    InsufficientFunds,
    InsufficientForFee,
    AmountTooSmall,
    NoFeeTier,

    // Signing
    SigningFailed,
    UnmatchedSignature,
    InvalidSignatureComponent,
    VerificationFailed,
    Timeout,

    // Cosigner verdicts
    AddressFrozen,
    AddressBlacklisted,
    ServicePaused,
    TransactionRejected,

    // Plumbing
    NetworkError,
    ParseError,
    ConfigError,
    Internal,
}

/// Serializable form of an error for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

/// Result type alias for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

// Conversions from common error types

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Parse(format!("JSON error: {}", e))
    }
}

impl From<hex::FromHexError> for TransferError {
    fn from(e: hex::FromHexError) -> Self {
        TransferError::Parse(format!("Hex error: {}", e))
    }
}

impl From<base64::DecodeError> for TransferError {
    fn from(e: base64::DecodeError) -> Self {
        TransferError::Parse(format!("Base64 error: {}", e))
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransferError::Network("Request timed out".to_string())
        } else if e.is_connect() {
            TransferError::Network("Connection failed".to_string())
        } else {
            TransferError::Network(e.to_string())
        }
    }
}

impl From<bitcoin::consensus::encode::Error> for TransferError {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        TransferError::Parse(format!("Transaction decode error: {}", e))
    }
}

impl From<bitcoin::address::ParseError> for TransferError {
    fn from(e: bitcoin::address::ParseError) -> Self {
        TransferError::InvalidAddress(e.to_string())
    }
}

impl From<secp256k1::Error> for TransferError {
    fn from(e: secp256k1::Error) -> Self {
        TransferError::Parse(format!("Secp256k1 error: {}", e))
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Internal(e.to_string())
    }
}
