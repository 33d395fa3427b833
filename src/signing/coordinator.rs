//! Signature Coordinator
//!
//! Drives one remote signing job per transfer:
//! 1. Compute the content hash of every input's sighash preimage
//! 2. Submit all hashes as a single batch, each tagged with its key path
//! 3. Poll the job until it reaches a terminal status or the wait ceiling
//! 4. Match returned signatures to inputs by content, then canonicalize
//!    and verify each one against the input's owning address
//!
//! There is no cancellation once a job is submitted: a caller that gives
//! up early leaves the job running at the signer.

use super::der::{canonicalize, raw_scalars};
use super::preimage::{sighash_preimage, signer_content};
use super::remote::{JobSnapshot, JobStatus, RemoteSigner, SignedMessage, SigningBatch, SigningMessage};
use super::{InputSignature, SignatureRequest};
use crate::error::{TransferError, TransferResult};
use crate::tx::script::address_pubkey_hash;
use crate::tx::DraftTransaction;
use crate::{log_debug, log_info, log_warn};
use async_trait::async_trait;
use bitcoin::PublicKey;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1, VerifyOnly};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// BIP-44 purpose field
const PURPOSE: u32 = 44;
/// SLIP-44 coin type of the token ledger
pub const DEFAULT_COIN_TYPE: u32 = 236;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Time source for the poll loop
#[async_trait]
pub trait PollClock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl PollClock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct SigningSettings {
    pub poll_interval: Duration,
    /// Ceiling on time spent polling one job
    pub max_wait: Duration,
    pub coin_type: u32,
    /// Asset identifier at the signer
    pub asset_id: String,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            coin_type: DEFAULT_COIN_TYPE,
            asset_id: "BSV".to_string(),
        }
    }
}

/// `m/44'/coin'/account'/0/index` as the signer expects it
pub fn derivation_path(coin_type: u32, account: u32, index: u32) -> Vec<u32> {
    vec![PURPOSE, coin_type, account, 0, index]
}

struct PendingInput<'a> {
    request: &'a SignatureRequest,
    content: [u8; 32],
    content_hex: String,
}

pub struct SignatureCoordinator {
    signer: Arc<dyn RemoteSigner>,
    clock: Arc<dyn PollClock>,
    settings: SigningSettings,
    secp: Secp256k1<VerifyOnly>,
}

impl SignatureCoordinator {
    pub fn new(signer: Arc<dyn RemoteSigner>) -> Self {
        Self {
            signer,
            clock: Arc::new(TokioClock),
            settings: SigningSettings::default(),
            secp: Secp256k1::verification_only(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn PollClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: SigningSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SigningSettings {
        &self.settings
    }

    /// Obtain one verified canonical signature per request, ordered by input
    pub async fn get_signatures(
        &self,
        draft: &DraftTransaction,
        requests: &[SignatureRequest],
        destination: &str,
        signer_account_id: &str,
        note_amount: &str,
    ) -> TransferResult<Vec<InputSignature>> {
        let account: u32 = signer_account_id.trim().parse().map_err(|_| {
            TransferError::invalid_intent(format!(
                "Signer account id {:?} is not a numeric account",
                signer_account_id
            ))
        })?;

        let pending = self.prepare(draft, requests)?;
        let by_content: HashMap<&str, usize> = pending
            .iter()
            .enumerate()
            .map(|(pos, p)| (p.content_hex.as_str(), pos))
            .collect();
        if by_content.len() != pending.len() {
            return Err(TransferError::internal("Two inputs share a signing content hash"));
        }

        let messages = pending
            .iter()
            .map(|p| SigningMessage {
                content: p.content_hex.clone(),
                derivation_path: derivation_path(self.settings.coin_type, account, p.request.derivation_index),
            })
            .collect();
        let batch = SigningBatch::new(
            signer_account_id,
            &self.settings.asset_id,
            format!("Transfer {} to {}", note_amount, destination),
            messages,
        );

        let job_id = self.signer.submit_signing_job(&batch).await?;
        log_info!("signing", "Signing job submitted", job_id = job_id, inputs = pending.len());

        let snapshot = self.await_completion(&job_id).await?;

        let mut matched: Vec<Option<&SignedMessage>> = vec![None; pending.len()];
        for signed in &snapshot.signed_messages {
            let key = normalize_content(&signed.content);
            match by_content.get(key.as_str()) {
                Some(&pos) if matched[pos].is_none() => matched[pos] = Some(signed),
                Some(_) => {
                    log_warn!("signing", "Ignoring repeated signature", job_id = job_id, content = key);
                }
                None => {
                    log_warn!("signing", "Ignoring signature for unknown content", job_id = job_id, content = key);
                }
            }
        }

        let mut signatures = Vec::with_capacity(pending.len());
        for (input, signed) in pending.iter().zip(matched) {
            let signed = signed.ok_or_else(|| TransferError::UnmatchedSignature {
                input_index: input.request.input_index,
                content: input.content_hex.clone(),
            })?;
            signatures.push(self.finalize(input, signed)?);
        }
        signatures.sort_by_key(|s| s.input_index);

        log_info!("signing", "Signatures matched", job_id = job_id, inputs = signatures.len());
        Ok(signatures)
    }

    fn prepare<'a>(
        &self,
        draft: &DraftTransaction,
        requests: &'a [SignatureRequest],
    ) -> TransferResult<Vec<PendingInput<'a>>> {
        if requests.len() != draft.input_count() {
            return Err(TransferError::internal(format!(
                "{} signature requests for {} inputs",
                requests.len(),
                draft.input_count()
            )));
        }

        requests
            .iter()
            .map(|request| {
                let preimage = sighash_preimage(
                    draft.transaction(),
                    request.input_index,
                    request.script.as_bytes(),
                    request.satoshis,
                    request.scope,
                )?;
                let content = signer_content(&preimage);
                Ok(PendingInput {
                    request,
                    content,
                    content_hex: hex::encode(content),
                })
            })
            .collect()
    }

    /// Poll until the job is terminal, sleeping before every check
    async fn await_completion(&self, job_id: &str) -> TransferResult<JobSnapshot> {
        let started = self.clock.now();
        let mut last_status = JobStatus::Submitted;

        loop {
            self.clock.sleep(self.settings.poll_interval).await;
            let snapshot = self.signer.job_status(job_id).await?;

            if snapshot.status != last_status {
                log_debug!("signing", "Signing job status changed", job_id = job_id, status = snapshot.status);
            }
            last_status = snapshot.status;

            if snapshot.status.is_terminal() {
                if snapshot.status.is_success() {
                    return Ok(snapshot);
                }
                return Err(TransferError::SigningFailed {
                    job_id: job_id.to_string(),
                    status: snapshot.status.to_string(),
                    sub_status: snapshot.sub_status,
                });
            }

            let waited = self.clock.now().saturating_duration_since(started);
            if waited >= self.settings.max_wait {
                log_warn!("signing", "Gave up waiting for signing job", job_id = job_id, status = last_status);
                return Err(TransferError::TimedOut {
                    job_id: job_id.to_string(),
                    waited_secs: waited.as_secs(),
                    last_status: last_status.to_string(),
                });
            }
        }
    }

    fn finalize(&self, input: &PendingInput<'_>, signed: &SignedMessage) -> TransferResult<InputSignature> {
        let input_index = input.request.input_index;
        let message = Message::from_digest(input.content);
        let signature = canonicalize(&signed.signature, input.request.scope)?;

        let public_key = match &signed.public_key {
            Some(hex_key) => PublicKey::from_str(hex_key.trim_start_matches("0x"))
                .map_err(|e| TransferError::invalid_component("public_key", e.to_string()))?,
            None => self.recover_public_key(signed, &message, input_index)?,
        };

        self.secp
            .verify_ecdsa(&message, &signature.to_ecdsa()?, &public_key.inner)
            .map_err(|e| TransferError::SignatureVerification {
                input_index,
                reason: e.to_string(),
            })?;

        let expected = address_pubkey_hash(&input.request.address)?;
        if public_key.pubkey_hash() != expected {
            return Err(TransferError::SignatureVerification {
                input_index,
                reason: format!("key does not belong to {}", input.request.address),
            });
        }

        Ok(InputSignature {
            input_index,
            signature,
            public_key,
        })
    }

    fn recover_public_key(
        &self,
        signed: &SignedMessage,
        message: &Message,
        input_index: usize,
    ) -> TransferResult<PublicKey> {
        let (r, s) = raw_scalars(&signed.signature)?;
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&r);
        compact[32..].copy_from_slice(&s);

        // Some signers report v as 27/28
        let v = if signed.signature.v >= 27 { signed.signature.v - 27 } else { signed.signature.v };
        let recovery_id = RecoveryId::from_i32(v as i32)
            .map_err(|_| TransferError::invalid_component("v", format!("bad recovery id {}", signed.signature.v)))?;

        let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)?;
        let key = self
            .secp
            .recover_ecdsa(message, &recoverable)
            .map_err(|e| TransferError::SignatureVerification {
                input_index,
                reason: format!("public key recovery failed: {}", e),
            })?;
        Ok(PublicKey::new(key))
    }
}

fn normalize_content(content: &str) -> String {
    content.trim().trim_start_matches("0x").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::RawSignature;
    use crate::tx::TransactionBuilder;
    use crate::types::*;
    use secp256k1::{All, SecretKey};
    use std::sync::Mutex;

    const DESTINATION: &str = "1dice8EMZmqKvrGE4Qc9bUFf9PX3xaYDp";

    struct ManualClock {
        start: Instant,
        elapsed: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
            }
        }
    }

    #[async_trait]
    impl PollClock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.elapsed.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            *self.elapsed.lock().unwrap() += duration;
        }
    }

    /// Signs every submitted content with one key after `pending_polls` polls
    struct ScriptedSigner {
        secp: Secp256k1<All>,
        key: SecretKey,
        pending_polls: usize,
        terminal: JobStatus,
        report_key: bool,
        high_s: bool,
        reverse: bool,
        extra: Option<SignedMessage>,
        batch: Mutex<Option<SigningBatch>>,
        polls: Mutex<usize>,
    }

    impl ScriptedSigner {
        fn new(key: SecretKey) -> Self {
            Self {
                secp: Secp256k1::new(),
                key,
                pending_polls: 1,
                terminal: JobStatus::Completed,
                report_key: true,
                high_s: false,
                reverse: false,
                extra: None,
                batch: Mutex::new(None),
                polls: Mutex::new(0),
            }
        }

        fn sign(&self, content_hex: &str) -> SignedMessage {
            let digest: [u8; 32] = hex::decode(content_hex).unwrap().try_into().unwrap();
            let msg = Message::from_digest(digest);
            let (recid, compact) = self.secp.sign_ecdsa_recoverable(&msg, &self.key).serialize_compact();
            let mut s = compact[32..].to_vec();
            let mut v = recid.to_i32() as u8;
            if self.high_s {
                // (r, n - s) pairs with the opposite R parity
                s = SecretKey::from_slice(&s).unwrap().negate().secret_bytes().to_vec();
                v ^= 1;
            }
            let public = secp256k1::PublicKey::from_secret_key(&self.secp, &self.key);
            SignedMessage {
                content: content_hex.to_string(),
                signature: RawSignature::new(&hex::encode(&compact[..32]), &hex::encode(s), v),
                public_key: self.report_key.then(|| hex::encode(public.serialize())),
                derivation_path: vec![],
            }
        }
    }

    #[async_trait]
    impl RemoteSigner for ScriptedSigner {
        async fn submit_signing_job(&self, batch: &SigningBatch) -> TransferResult<String> {
            *self.batch.lock().unwrap() = Some(batch.clone());
            Ok("job-42".to_string())
        }

        async fn job_status(&self, job_id: &str) -> TransferResult<JobSnapshot> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls <= self.pending_polls {
                return Ok(JobSnapshot {
                    id: job_id.to_string(),
                    status: JobStatus::PendingSignature,
                    sub_status: None,
                    signed_messages: vec![],
                });
            }

            let batch = self.batch.lock().unwrap().clone().unwrap();
            let mut signed: Vec<SignedMessage> = if self.terminal.is_success() {
                batch.messages.iter().map(|m| self.sign(&m.content)).collect()
            } else {
                vec![]
            };
            if self.reverse {
                signed.reverse();
            }
            signed.extend(self.extra.clone());
            Ok(JobSnapshot {
                id: job_id.to_string(),
                status: self.terminal,
                sub_status: (!self.terminal.is_success()).then(|| "REJECTED_BY_USER".to_string()),
                signed_messages: signed,
            })
        }
    }

    fn secret() -> SecretKey {
        SecretKey::from_slice(&[0x11; 32]).unwrap()
    }

    fn source_address(key: &SecretKey) -> String {
        let secp = Secp256k1::new();
        let public = PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, key));
        bitcoin::Address::p2pkh(public, bitcoin::Network::Bitcoin).to_string()
    }

    fn draft(address: &str, inputs: &[u64]) -> DraftTransaction {
        let token = TokenConfig {
            approver_key: "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798".to_string(),
            fee_address: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string(),
            burn_address: "1111111111111111111114oLvT2".to_string(),
            token_id: "abc_0".to_string(),
            decimals: 0,
            fee_tiers: vec![FeeTier::new(0, 1_000_000, 1)],
        };
        let utxos: Vec<Utxo> = inputs
            .iter()
            .enumerate()
            .map(|(i, amount)| Utxo::new(address, *amount, &format!("{:064x}", i + 1), 0).with_script("51"))
            .collect();
        let total: u64 = inputs.iter().sum();
        let intent = TransferIntent::new(
            vec![SourceAddress::new(address, 2)],
            "7",
            DESTINATION,
            TransferAmount::Exact(total),
        );
        TransactionBuilder::new().build(&intent, &utxos, &token).unwrap().draft
    }

    fn coordinator(signer: Arc<ScriptedSigner>) -> SignatureCoordinator {
        SignatureCoordinator::new(signer).with_clock(Arc::new(ManualClock::new()))
    }

    #[tokio::test]
    async fn test_signs_every_input_in_one_batch() {
        let key = secret();
        let address = source_address(&key);
        let draft = draft(&address, &[40, 30, 20]);
        let signer = Arc::new(ScriptedSigner {
            pending_polls: 3,
            reverse: true,
            ..ScriptedSigner::new(key)
        });

        let signatures = coordinator(signer.clone())
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "90")
            .await
            .unwrap();

        assert_eq!(signatures.len(), 3);
        assert_eq!(
            signatures.iter().map(|s| s.input_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(signatures.iter().all(|s| s.signature.scope() == 0xc1));
        assert_eq!(*signer.polls.lock().unwrap(), 4);

        let batch = signer.batch.lock().unwrap().clone().unwrap();
        assert_eq!(batch.note, format!("Transfer 90 to {}", DESTINATION));
        assert_eq!(batch.messages.len(), 3);
        assert_eq!(batch.messages[0].derivation_path, vec![44, 236, 7, 0, 2]);
    }

    #[tokio::test]
    async fn test_recovers_key_and_normalizes_high_s() {
        let key = secret();
        let address = source_address(&key);
        let draft = draft(&address, &[10]);
        let signer = Arc::new(ScriptedSigner {
            report_key: false,
            high_s: true,
            ..ScriptedSigner::new(key)
        });

        let signatures = coordinator(signer)
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "10")
            .await
            .unwrap();

        assert_eq!(signatures[0].public_key.pubkey_hash(), address_pubkey_hash(&address).unwrap());
        let decoded = crate::signing::CanonicalSignature::parse(signatures[0].signature.as_bytes()).unwrap();
        assert!(decoded.is_low_s());
    }

    #[tokio::test]
    async fn test_bad_recovery_id_is_rejected() {
        let key = secret();
        let draft = draft(&source_address(&key), &[10]);
        struct BadV(ScriptedSigner);

        #[async_trait]
        impl RemoteSigner for BadV {
            async fn submit_signing_job(&self, batch: &SigningBatch) -> TransferResult<String> {
                self.0.submit_signing_job(batch).await
            }

            async fn job_status(&self, job_id: &str) -> TransferResult<JobSnapshot> {
                let mut snapshot = self.0.job_status(job_id).await?;
                for signed in &mut snapshot.signed_messages {
                    signed.signature.v = 9;
                }
                Ok(snapshot)
            }
        }

        let signer = BadV(ScriptedSigner {
            report_key: false,
            ..ScriptedSigner::new(key)
        });
        let err = SignatureCoordinator::new(Arc::new(signer))
            .with_clock(Arc::new(ManualClock::new()))
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "10")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidSignatureComponent { component: "v", .. }));
    }

    #[tokio::test]
    async fn test_rejected_job_fails_with_status() {
        let key = secret();
        let draft = draft(&source_address(&key), &[10]);
        let signer = Arc::new(ScriptedSigner {
            terminal: JobStatus::Rejected,
            ..ScriptedSigner::new(key)
        });

        let err = coordinator(signer)
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "10")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::SigningFailed {
                job_id: "job-42".to_string(),
                status: "REJECTED".to_string(),
                sub_status: Some("REJECTED_BY_USER".to_string()),
            }
        );
        assert!(draft.transaction().input.iter().all(|i| i.script_sig.is_empty()));
    }

    #[tokio::test]
    async fn test_times_out_after_max_wait() {
        let key = secret();
        let draft = draft(&source_address(&key), &[10]);
        let signer = Arc::new(ScriptedSigner {
            pending_polls: usize::MAX,
            ..ScriptedSigner::new(key)
        });
        let settings = SigningSettings {
            max_wait: Duration::from_secs(10),
            ..SigningSettings::default()
        };

        let err = coordinator(signer.clone())
            .with_settings(settings)
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "10")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::TimedOut {
                job_id: "job-42".to_string(),
                waited_secs: 10,
                last_status: "PENDING_SIGNATURE".to_string(),
            }
        );
        assert_eq!(*signer.polls.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_signatures() {
        let key = secret();
        let address = source_address(&key);
        let draft = draft(&address, &[10, 20]);

        let other = ScriptedSigner::new(key).sign(&"ab".repeat(32));
        let signer = Arc::new(ScriptedSigner {
            extra: Some(other),
            ..ScriptedSigner::new(key)
        });
        assert!(coordinator(signer)
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "30")
            .await
            .is_ok());

        // a signer that answers for the first input twice and never the second
        struct Lopsided(ScriptedSigner);

        #[async_trait]
        impl RemoteSigner for Lopsided {
            async fn submit_signing_job(&self, batch: &SigningBatch) -> TransferResult<String> {
                self.0.submit_signing_job(batch).await
            }

            async fn job_status(&self, job_id: &str) -> TransferResult<JobSnapshot> {
                let mut snapshot = self.0.job_status(job_id).await?;
                let first = snapshot.signed_messages[0].clone();
                snapshot.signed_messages = vec![first.clone(), first];
                Ok(snapshot)
            }
        }

        let lopsided = Lopsided(ScriptedSigner {
            pending_polls: 0,
            ..ScriptedSigner::new(key)
        });
        let err = SignatureCoordinator::new(Arc::new(lopsided))
            .with_clock(Arc::new(ManualClock::new()))
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "30")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::UnmatchedSignature { input_index: 1, .. }));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_verification() {
        let owner = secret();
        let draft = draft(&source_address(&owner), &[10]);
        let impostor = SecretKey::from_slice(&[0x22; 32]).unwrap();

        let err = coordinator(Arc::new(ScriptedSigner::new(impostor)))
            .get_signatures(&draft, draft.requests(), DESTINATION, "7", "10")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SignatureVerification { input_index: 0, .. }));
    }

    #[tokio::test]
    async fn test_non_numeric_account_rejected() {
        let key = secret();
        let draft = draft(&source_address(&key), &[10]);
        let signer = Arc::new(ScriptedSigner::new(key));
        let err = coordinator(signer.clone())
            .get_signatures(&draft, draft.requests(), DESTINATION, "vault-a", "10")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidIntent(_)));
        assert!(signer.batch.lock().unwrap().is_none());
    }
}
