//! Transfer Orchestrator
//!
//! Runs one transfer attempt end to end:
//! `Idle → ResolvingBalance → SelectingInputs → BuildingTransaction →
//! AwaitingSignatures → Submitting → Done`, or `Aborted` on the first error.
//! Nothing is retried. The token configuration is cached per orchestrator
//! and only re-read on [`TransferOrchestrator::refresh_config`].
//!
//! Each attempt tracks its own stage. [`TransferOrchestrator::stage`] only
//! mirrors the most recent update from any attempt, so callers running
//! transfers concurrently should read the stage from [`TransferAttempt`].

use crate::api::{HttpTokenPolicyService, TokenPolicyService};
use crate::config::CoreConfig;
use crate::error::{TransferError, TransferResult};
use crate::fees::validate_tiers;
use crate::signing::{HttpRemoteSigner, SignatureCoordinator};
use crate::tx::script::address_pubkey_hash;
use crate::tx::{SignedTransaction, TransactionBuilder};
use crate::types::{format_token_amount, TokenConfig, TransferIntent, TransferMode};
use crate::utils::{build_client, HttpSettings};
use crate::{log_debug, log_error, log_info};
use chrono::Utc;
use futures::future::try_join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Where an attempt is, or where it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStage {
    Idle,
    ResolvingBalance,
    SelectingInputs,
    BuildingTransaction,
    AwaitingSignatures,
    Submitting,
    Done,
    Aborted(TransferError),
}

impl TransferStage {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }
}

/// One finished attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAttempt {
    /// `Done`, or the stage that was running when the attempt failed
    pub stage: TransferStage,
    pub result: TransferResult<TransferReceipt>,
}

/// Outcome of an accepted transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Txid of the cosigned transaction
    pub txid: String,
    pub recipient_amount: u64,
    pub fee: u64,
    pub change: u64,
    pub inputs: usize,
    pub mode: TransferMode,
    /// Cosigned transaction as returned by the cosigner
    pub rawtx: String,
    /// RFC 3339 time the cosigner accepted the transfer
    pub accepted_at: String,
}

pub struct TransferOrchestrator {
    policy: Arc<dyn TokenPolicyService>,
    coordinator: SignatureCoordinator,
    builder: TransactionBuilder,
    token_config: RwLock<Option<Arc<TokenConfig>>>,
    stage: Mutex<TransferStage>,
}

impl TransferOrchestrator {
    pub fn new(policy: Arc<dyn TokenPolicyService>, coordinator: SignatureCoordinator) -> Self {
        Self {
            policy,
            coordinator,
            builder: TransactionBuilder::new(),
            token_config: RwLock::new(None),
            stage: Mutex::new(TransferStage::Idle),
        }
    }

    pub fn with_builder(mut self, builder: TransactionBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Wire the HTTP adapters described by `config`
    pub fn from_config(config: &CoreConfig) -> TransferResult<Self> {
        let client = build_client(HttpSettings::default())?;

        let policy_key = config
            .policy
            .api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_owned()));
        let signer_key = config
            .signer
            .api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_owned()))
            .ok_or_else(|| TransferError::config("signer.apiKey is required"))?;

        let private_key = config
            .signer
            .private_key
            .as_ref()
            .ok_or_else(|| TransferError::config("signer.privateKey is required"))?;

        let policy = HttpTokenPolicyService::new(client.clone(), &config.policy.url, policy_key);
        let signer = HttpRemoteSigner::new(client, &config.signer.url, signer_key, private_key)?;
        let coordinator = SignatureCoordinator::new(Arc::new(signer)).with_settings(config.signing_settings());

        Ok(Self::new(Arc::new(policy), coordinator)
            .with_builder(TransactionBuilder::new().with_output_satoshis(config.transfer.output_satoshis)))
    }

    /// Latest stage reported by any attempt on this orchestrator
    pub fn stage(&self) -> TransferStage {
        self.lock_stage().clone()
    }

    /// Cached token configuration, fetched on first use
    pub async fn token_config(&self) -> TransferResult<Arc<TokenConfig>> {
        if let Some(cached) = self.token_config.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }
        self.refresh_config().await
    }

    /// Re-read the token configuration from the cosigner
    pub async fn refresh_config(&self) -> TransferResult<Arc<TokenConfig>> {
        let config = self.policy.fetch_config().await?;
        config.check_decimals()?;
        validate_tiers(&config.fee_tiers)?;
        config.approver_public_key()?;

        let config = Arc::new(config);
        *self.token_config.write().await = Some(Arc::clone(&config));
        log_info!(
            "transfer",
            "Token config loaded",
            token_id = config.token_id,
            tiers = config.fee_tiers.len()
        );
        Ok(config)
    }

    pub async fn transfer_tokens(&self, intent: &TransferIntent) -> TransferResult<TransferReceipt> {
        self.attempt(intent).await.result
    }

    /// Run one transfer and report the stage it stopped in
    pub async fn attempt(&self, intent: &TransferIntent) -> TransferAttempt {
        let mut stage = TransferStage::Idle;
        self.set_stage(TransferStage::Idle);
        match self.run(intent, &mut stage).await {
            Ok(receipt) => {
                self.set_stage(TransferStage::Done);
                log_info!(
                    "transfer",
                    "Transfer accepted",
                    txid = receipt.txid,
                    amount = receipt.recipient_amount,
                    fee = receipt.fee
                );
                TransferAttempt {
                    stage: TransferStage::Done,
                    result: Ok(receipt),
                }
            }
            Err(e) => {
                log_error!("transfer", "Transfer aborted", stage = format!("{:?}", stage), error = e);
                self.set_stage(TransferStage::Aborted(e.clone()));
                TransferAttempt { stage, result: Err(e) }
            }
        }
    }

    async fn run(&self, intent: &TransferIntent, stage: &mut TransferStage) -> TransferResult<TransferReceipt> {
        intent.validate()?;
        address_pubkey_hash(&intent.destination)?;
        for source in &intent.sources {
            address_pubkey_hash(&source.address)?;
        }

        self.enter(stage, TransferStage::ResolvingBalance);
        let token = self.token_config().await?;
        let utxos = self.policy.fetch_utxos(&intent.source_addresses()).await?;
        log_debug!("transfer", "Holdings fetched", utxos = utxos.len(), destination = intent.destination);

        self.enter(stage, TransferStage::SelectingInputs);
        let selected = self.builder.select(intent, &utxos, &token)?;
        let plan = selected.plan;
        log_info!(
            "transfer",
            "Inputs selected",
            inputs = selected.selection.input_count(),
            selected = selected.selection.total,
            coverage = plan.coverage,
            fee = plan.fee
        );

        self.enter(stage, TransferStage::BuildingTransaction);
        let built = self.builder.assemble(intent, &token, selected)?;
        let change = built.change();
        let txids: Vec<String> = built.draft.source_txids().iter().map(|t| t.to_string()).collect();
        let sources = try_join_all(txids.iter().map(|txid| self.policy.fetch_transaction(txid))).await?;
        let draft = built.draft.bind_prevouts(&sources)?;

        self.enter(stage, TransferStage::AwaitingSignatures);
        let note_amount = format_token_amount(plan.requested, token.decimals);
        let signatures = self
            .coordinator
            .get_signatures(
                &draft,
                draft.requests(),
                &intent.destination,
                &intent.signer_account_id,
                &note_amount,
            )
            .await?;
        let inputs = draft.input_count();
        let signed = draft.attach(signatures)?;

        self.enter(stage, TransferStage::Submitting);
        let submission = self.policy.submit_transaction(&signed.to_base64()).await?;
        let cosigned = SignedTransaction::from_encoded(&submission.rawtx)?;

        Ok(TransferReceipt {
            txid: cosigned.txid(),
            recipient_amount: plan.recipient_amount,
            fee: plan.fee,
            change,
            inputs,
            mode: plan.mode,
            rawtx: submission.rawtx,
            accepted_at: Utc::now().to_rfc3339(),
        })
    }

    fn lock_stage(&self) -> std::sync::MutexGuard<'_, TransferStage> {
        self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_stage(&self, stage: TransferStage) {
        *self.lock_stage() = stage;
    }

    fn enter(&self, current: &mut TransferStage, next: TransferStage) {
        *current = next.clone();
        self.set_stage(next);
    }
}
