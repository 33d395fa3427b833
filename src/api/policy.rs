//! Token Policy Service
//!
//! The cosigner's API: token configuration, holdings, source transactions
//! and final submission. Submission rejections are translated into typed
//! policy errors with the cosigner's message preserved.

use crate::error::{TransferError, TransferResult};
use crate::types::{TokenConfig, Utxo};
use crate::utils::{join_url, parse_json, read_body, read_json, HttpFailure};
use async_trait::async_trait;
use bitcoin::Transaction;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Cosigner's answer to an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Cosigned transaction, hex or base64
    pub rawtx: String,
}

#[async_trait]
pub trait TokenPolicyService: Send + Sync {
    async fn fetch_config(&self) -> TransferResult<TokenConfig>;

    async fn fetch_utxos(&self, addresses: &[String]) -> TransferResult<Vec<Utxo>>;

    async fn fetch_transaction(&self, txid: &str) -> TransferResult<Transaction>;

    /// Submit a signed transaction (base64) for cosigning
    async fn submit_transaction(&self, tx_base64: &str) -> TransferResult<SubmissionReceipt>;
}

/// Map a cosigner rejection onto its error kind
pub fn classify_rejection(status: Option<&str>, message: &str) -> TransferError {
    let haystack = format!("{} {}", status.unwrap_or_default(), message).to_lowercase();
    let message = if message.trim().is_empty() {
        status.unwrap_or("rejected").to_string()
    } else {
        message.trim().to_string()
    };

    if haystack.contains("frozen") {
        TransferError::AddressFrozen(message)
    } else if haystack.contains("blacklist") {
        TransferError::AddressBlacklisted(message)
    } else if haystack.contains("paused") {
        TransferError::ServicePaused(message)
    } else {
        TransferError::SubmissionRejected(message)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RejectionBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn rejection_from_failure(failure: HttpFailure) -> TransferError {
    match serde_json::from_str::<RejectionBody>(&failure.body) {
        Ok(body) => {
            let message = body.message.or(body.error).unwrap_or_default();
            let status = body.status.unwrap_or_else(|| failure.status.to_string());
            classify_rejection(Some(&status), &message)
        }
        Err(_) => classify_rejection(Some(failure.status.as_str()), &failure.body),
    }
}

#[derive(Debug, Serialize)]
struct UtxoQuery<'a> {
    addresses: &'a [String],
}

#[derive(Debug, Serialize, Deserialize)]
struct RawTransaction {
    rawtx: String,
}

/// REST adapter for the token policy cosigner
pub struct HttpTokenPolicyService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpTokenPolicyService {
    pub fn new(client: Client, base_url: &str, api_key: Option<SecretString>) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key.expose_secret()),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

#[async_trait]
impl TokenPolicyService for HttpTokenPolicyService {
    async fn fetch_config(&self) -> TransferResult<TokenConfig> {
        let response = self.authorize(self.client.get(self.url("/v1/token/config"))).send().await?;
        read_json(response).await
    }

    async fn fetch_utxos(&self, addresses: &[String]) -> TransferResult<Vec<Utxo>> {
        let response = self
            .authorize(self.client.post(self.url("/v1/token/utxos")))
            .json(&UtxoQuery { addresses })
            .send()
            .await?;
        read_json(response).await
    }

    async fn fetch_transaction(&self, txid: &str) -> TransferResult<Transaction> {
        let response = self
            .authorize(self.client.get(self.url(&format!("/v1/tx/{}", txid))))
            .send()
            .await?;
        let raw: RawTransaction = read_json(response).await?;
        let tx = crate::tx::SignedTransaction::from_encoded(&raw.rawtx)?;
        Ok(tx.transaction().clone())
    }

    async fn submit_transaction(&self, tx_base64: &str) -> TransferResult<SubmissionReceipt> {
        let response = self
            .authorize(self.client.post(self.url("/v1/tx/submit")))
            .json(&RawTransaction {
                rawtx: tx_base64.to_string(),
            })
            .send()
            .await?;

        match read_body(response).await? {
            Ok(body) => parse_json(&body),
            Err(failure) => Err(rejection_from_failure(failure)),
        }
    }
}
