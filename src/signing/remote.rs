//! Remote Signer
//!
//! Boundary to the custodial signing service. A batch of content hashes is
//! submitted as one raw-signing job; the job is then polled until it reaches
//! a terminal status, at which point the signed messages are available.
//!
//! Every HTTP request carries the API key plus a short-lived RS256 bearer
//! token bound to the request path and the SHA-256 of its body.

use crate::error::{TransferError, TransferResult};
use crate::utils::{join_url, read_json};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Seconds a request token stays valid
pub const TOKEN_LIFETIME_SECS: i64 = 30;

/// Lifecycle status of a signing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Queued,
    PendingAuthorization,
    PendingSignature,
    Confirming,
    Cancelling,
    Completed,
    Broadcasting,
    Blocked,
    Cancelled,
    Failed,
    Rejected,
    /// Any status this client does not know; treated as still pending
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Signatures are available
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Broadcasting)
    }

    /// The job ended without signatures
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Blocked | Self::Cancelled | Self::Failed | Self::Rejected)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Queued => "QUEUED",
            Self::PendingAuthorization => "PENDING_AUTHORIZATION",
            Self::PendingSignature => "PENDING_SIGNATURE",
            Self::Confirming => "CONFIRMING",
            Self::Cancelling => "CANCELLING",
            Self::Completed => "COMPLETED",
            Self::Broadcasting => "BROADCASTING",
            Self::Blocked => "BLOCKED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One content hash to sign with the key at `derivation_path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningMessage {
    /// Hex content hash
    pub content: String,
    pub derivation_path: Vec<u32>,
}

/// A raw-signing job request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningBatch {
    /// Vault account at the signer
    pub account_id: String,
    pub asset_id: String,
    pub note: String,
    /// Idempotency key
    pub external_id: Uuid,
    pub messages: Vec<SigningMessage>,
}

impl SigningBatch {
    pub fn new(account_id: &str, asset_id: &str, note: String, messages: Vec<SigningMessage>) -> Self {
        Self {
            account_id: account_id.to_string(),
            asset_id: asset_id.to_string(),
            note,
            external_id: Uuid::new_v4(),
            messages,
        }
    }
}

/// ECDSA signature as returned by the signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignature {
    /// Hex big-endian r
    pub r: String,
    /// Hex big-endian s
    pub s: String,
    /// Recovery id
    #[serde(default)]
    pub v: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_sig: Option<String>,
}

impl RawSignature {
    pub fn new(r: &str, s: &str, v: u8) -> Self {
        Self {
            r: r.to_string(),
            s: s.to_string(),
            v,
            full_sig: None,
        }
    }
}

/// A signature produced for one message of the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    /// Hex content hash this signature covers
    pub content: String,
    pub signature: RawSignature,
    /// Hex compressed public key, when the signer reports it
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub derivation_path: Vec<u32>,
}

/// Point-in-time view of a signing job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub sub_status: Option<String>,
    #[serde(default)]
    pub signed_messages: Vec<SignedMessage>,
}

/// The custodial signing service
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Create a signing job; returns its id
    async fn submit_signing_job(&self, batch: &SigningBatch) -> TransferResult<String>;

    async fn job_status(&self, job_id: &str) -> TransferResult<JobSnapshot>;
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    id: String,
}

/// Claims of the per-request bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClaims {
    /// Path and query of the request
    pub uri: String,
    pub nonce: String,
    pub iat: i64,
    pub exp: i64,
    /// API key of the caller
    pub sub: String,
    /// Hex SHA-256 of the exact body bytes; empty bodies hash the empty string
    pub body_hash: String,
}

impl RequestClaims {
    pub fn new(uri: &str, api_key: &str, body: &[u8], issued_at: i64) -> Self {
        Self {
            uri: uri.to_string(),
            nonce: Uuid::new_v4().to_string(),
            iat: issued_at,
            exp: issued_at + TOKEN_LIFETIME_SECS,
            sub: api_key.to_string(),
            body_hash: hex::encode(Sha256::digest(body)),
        }
    }
}

/// REST adapter for the remote signer
pub struct HttpRemoteSigner {
    client: Client,
    base_url: String,
    api_key: SecretString,
    signing_key: EncodingKey,
}

impl HttpRemoteSigner {
    /// `private_key_pem` is the RSA key registered for `api_key`
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: SecretString,
        private_key_pem: &SecretString,
    ) -> TransferResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(private_key_pem.expose_secret().as_bytes())
            .map_err(|e| TransferError::config(format!("Invalid signer private key: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            signing_key,
        })
    }

    fn request_body(batch: &SigningBatch) -> serde_json::Value {
        serde_json::json!({
            "operation": "RAW",
            "assetId": batch.asset_id,
            "source": { "type": "VAULT_ACCOUNT", "id": batch.account_id },
            "note": batch.note,
            "externalTxId": batch.external_id.to_string(),
            "extraParameters": {
                "rawMessageData": { "messages": batch.messages }
            }
        })
    }

    fn bearer_token(&self, uri: &str, body: &[u8]) -> TransferResult<String> {
        let claims = RequestClaims::new(uri, self.api_key.expose_secret(), body, Utc::now().timestamp());
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| TransferError::internal(format!("Cannot sign signer request: {}", e)))
    }

    fn authorized(&self, request: RequestBuilder, uri: &str, body: &[u8]) -> TransferResult<RequestBuilder> {
        let token = self.bearer_token(uri, body)?;
        Ok(request
            .header("X-API-Key", self.api_key.expose_secret())
            .header(AUTHORIZATION, format!("Bearer {}", token)))
    }
}

#[async_trait]
impl RemoteSigner for HttpRemoteSigner {
    async fn submit_signing_job(&self, batch: &SigningBatch) -> TransferResult<String> {
        let uri = "/v1/transactions";
        // hashed and sent as the same bytes
        let body = serde_json::to_vec(&Self::request_body(batch))?;
        let request = self
            .client
            .post(join_url(&self.base_url, uri))
            .header(CONTENT_TYPE, "application/json");
        let response = self.authorized(request, uri, &body)?.body(body).send().await?;

        let created: CreatedJob = read_json(response).await?;
        if created.id.is_empty() {
            return Err(TransferError::parse("Signer returned an empty job id"));
        }
        Ok(created.id)
    }

    async fn job_status(&self, job_id: &str) -> TransferResult<JobSnapshot> {
        let uri = format!("/v1/transactions/{}", job_id);
        let request = self.client.get(join_url(&self.base_url, &uri));
        let response = self.authorized(request, &uri, &[])?.send().await?;

        read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    const TEST_KEY: &str = include_str!("../../tests/fixtures/signer_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/signer_key.pub.pem");

    fn signer() -> HttpRemoteSigner {
        HttpRemoteSigner::new(
            Client::new(),
            "https://signer.example.com",
            SecretString::from("api-key-1".to_string()),
            &SecretString::from(TEST_KEY.to_string()),
        )
        .unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(JobStatus::Completed.is_success());
        assert!(JobStatus::Broadcasting.is_success());
        for status in [JobStatus::Blocked, JobStatus::Cancelled, JobStatus::Failed, JobStatus::Rejected] {
            assert!(status.is_failure());
            assert!(status.is_terminal());
        }
        assert!(!JobStatus::PendingSignature.is_terminal());
        assert!(!JobStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_snapshot_deserialization() {
        let json = r#"{
            "id": "job-1",
            "status": "COMPLETED",
            "subStatus": "CONFIRMED",
            "signedMessages": [{
                "content": "ab",
                "algorithm": "MPC_ECDSA_SECP256K1",
                "derivationPath": [44, 236, 7, 0, 3],
                "signature": {"fullSig": "00", "r": "01", "s": "02", "v": 1},
                "publicKey": "02aa"
            }]
        }"#;
        let snapshot: JobSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.sub_status.as_deref(), Some("CONFIRMED"));
        let signed = &snapshot.signed_messages[0];
        assert_eq!(signed.signature, RawSignature {
            r: "01".into(),
            s: "02".into(),
            v: 1,
            full_sig: Some("00".into()),
        });
        assert_eq!(signed.derivation_path, vec![44, 236, 7, 0, 3]);
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let snapshot: JobSnapshot =
            serde_json::from_str(r#"{"id":"j","status":"PENDING_3RD_PARTY"}"#).unwrap();
        assert_eq!(snapshot.status, JobStatus::Unknown);
        assert!(snapshot.signed_messages.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let batch = SigningBatch::new(
            "7",
            "BSV",
            "Transfer 50 to 1dice".to_string(),
            vec![SigningMessage {
                content: "ab".into(),
                derivation_path: vec![44, 236, 7, 0, 0],
            }],
        );
        let body = HttpRemoteSigner::request_body(&batch);
        assert_eq!(body["operation"], "RAW");
        assert_eq!(body["source"]["id"], "7");
        assert_eq!(
            body["extraParameters"]["rawMessageData"]["messages"][0]["derivationPath"][1],
            236
        );
    }

    #[test]
    fn test_request_claims() {
        let claims = RequestClaims::new("/v1/transactions", "api-key-1", b"{}", 1_700_000_000);
        assert_eq!(claims.uri, "/v1/transactions");
        assert_eq!(claims.sub, "api-key-1");
        assert_eq!(claims.exp - claims.iat, TOKEN_LIFETIME_SECS);
        assert_eq!(
            claims.body_hash,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );

        let empty = RequestClaims::new("/v1/transactions/job-1", "api-key-1", &[], 1_700_000_000);
        assert_eq!(
            empty.body_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(claims.nonce, empty.nonce);

        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("bodyHash").is_some());
    }

    #[test]
    fn test_bearer_token_is_rs256_over_claims() {
        let body = br#"{"operation":"RAW"}"#;
        let token = signer().bearer_token("/v1/transactions", body).unwrap();

        let key = DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap();
        let decoded = jsonwebtoken::decode::<RequestClaims>(&token, &key, &Validation::new(Algorithm::RS256)).unwrap();
        assert_eq!(decoded.header.alg, Algorithm::RS256);
        assert_eq!(decoded.claims.uri, "/v1/transactions");
        assert_eq!(decoded.claims.sub, "api-key-1");
        assert_eq!(decoded.claims.body_hash, hex::encode(Sha256::digest(body)));
    }

    #[test]
    fn test_rejects_malformed_private_key() {
        let result = HttpRemoteSigner::new(
            Client::new(),
            "https://signer.example.com",
            SecretString::from("api-key-1".to_string()),
            &SecretString::from("not a pem".to_string()),
        );
        assert!(matches!(result, Err(TransferError::Config(_))));
    }
}
