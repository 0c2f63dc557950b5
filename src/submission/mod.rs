pub mod relay;

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::instruction::InstructionError;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Result, RetryPolicy, SwapError};
use crate::ledger::{LedgerRpc, SendOptions, SignatureCommitment};
use crate::types::{ConfirmationStatus, SubmissionResult};
use crate::wallet::WalletCapability;

pub use relay::{AntiMevRelay, JitoConfig, JitoRelay};

/// Jupiter v6 `SlippageToleranceExceeded` custom program error.
pub const SLIPPAGE_EXCEEDED_ERROR_CODE: u32 = 6001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Route through the anti-MEV relay instead of the public RPC.
    pub anti_mev: bool,
    pub tip_lamports: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmConfig {
    pub poll_interval: Duration,
    /// Wall-clock bound; reaching it leaves the outcome unknown.
    pub timeout: Duration,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Signs, broadcasts and confirms transactions.
#[derive(Clone)]
pub struct SubmissionChannel {
    ledger: Arc<dyn LedgerRpc>,
    relay: Option<Arc<dyn AntiMevRelay>>,
    retry: RetryPolicy,
    confirm: ConfirmConfig,
}

impl SubmissionChannel {
    pub fn new(ledger: Arc<dyn LedgerRpc>) -> Self {
        Self {
            ledger,
            relay: None,
            retry: RetryPolicy::default(),
            confirm: ConfirmConfig::default(),
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn AntiMevRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirm_config(mut self, confirm: ConfirmConfig) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }

    /// Has `signer` sign `transaction`, then broadcasts it once (with
    /// bounded retries on transient errors). Returns the signature without
    /// waiting for confirmation.
    pub async fn submit(
        &self,
        transaction: VersionedTransaction,
        signer: &dyn WalletCapability,
        last_valid_block_height: u64,
        options: SubmitOptions,
    ) -> Result<Signature> {
        self.ensure_route(options)?;
        let signed = self.sign(transaction, signer).await?;
        debug!(signature = %signed.signatures[0], last_valid_block_height, "Transaction signed");
        self.broadcast(&signed, options).await
    }

    /// Delegates signing to the wallet. A rejection surfaces as
    /// [`SwapError::UserRejection`] and is never retried.
    pub async fn sign(
        &self,
        transaction: VersionedTransaction,
        signer: &dyn WalletCapability,
    ) -> Result<VersionedTransaction> {
        let signed = signer.sign_transaction(transaction).await?;
        match signed.signatures.first() {
            Some(sig) if *sig != Signature::default() => Ok(signed),
            _ => Err(SwapError::Internal("Wallet returned an unsigned transaction".to_string())),
        }
    }

    /// Broadcasts a signed transaction on the route `options` selects.
    pub async fn broadcast(&self, signed: &VersionedTransaction, options: SubmitOptions) -> Result<Signature> {
        let relay = self.ensure_route(options)?;
        let signature = signed
            .signatures
            .first()
            .copied()
            .ok_or_else(|| SwapError::Internal("Transaction carries no signature".to_string()))?;

        let tip_lamports = options.tip_lamports;
        let sent = match &relay {
            Some(relay) => {
                self.retry
                    .run(|| async move { relay.send_transaction(signed, tip_lamports).await })
                    .await
            }
            None => {
                let ledger = &self.ledger;
                self.retry
                    .run(|| async move { ledger.send_transaction(signed, SendOptions::default()).await })
                    .await
            }
        };

        match sent {
            Ok(returned) => {
                if returned != signature {
                    warn!(expected = %signature, returned = %returned, "Broadcast returned a different signature");
                }
                info!(signature = %signature, anti_mev = options.anti_mev, "Transaction broadcast");
                Ok(signature)
            }
            // Transport failures and 5xx/429 that outlast the retries may
            // still have been forwarded; keep the signature for lookup.
            Err(e) if e.is_retryable() => {
                warn!(signature = %signature, error = %e, "Broadcast outcome unknown");
                Err(SwapError::NetworkTimeout {
                    signature: Some(signature),
                    message: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_route(&self, options: SubmitOptions) -> Result<Option<Arc<dyn AntiMevRelay>>> {
        match (options.anti_mev, &self.relay) {
            (true, Some(relay)) => Ok(Some(relay.clone())),
            (true, None) => Err(SwapError::invalid_input(
                "Anti-MEV submission requested but no relay is configured",
            )),
            (false, _) => Ok(None),
        }
    }

    /// Polls until `signature` is confirmed, fails, falls out of the
    /// blockhash window or the wall-clock timeout is reached.
    pub async fn confirm(&self, signature: Signature, last_valid_block_height: u64) -> Result<SubmissionResult> {
        let started = Instant::now();
        loop {
            if let Some(result) = self.poll_status(&signature).await? {
                return Ok(result);
            }

            match self.ledger.get_block_height().await {
                Ok(height) if height > last_valid_block_height => {
                    // It may have landed between the status poll and now
                    if let Some(result) = self.poll_status(&signature).await? {
                        return Ok(result);
                    }
                    warn!(signature = %signature, height, last_valid_block_height, "Blockhash expired before confirmation");
                    return Err(SwapError::TransactionExpired {
                        signature,
                        last_valid_block_height,
                    });
                }
                Ok(height) => debug!(signature = %signature, height, "Awaiting confirmation"),
                Err(e) => warn!(signature = %signature, error = %e, "Block height poll failed"),
            }

            if started.elapsed() >= self.confirm.timeout {
                return Err(SwapError::NetworkTimeout {
                    signature: Some(signature),
                    message: format!("No confirmation after {:?}", self.confirm.timeout),
                });
            }
            sleep(self.confirm.poll_interval).await;
        }
    }

    /// `Ok(None)` while the outcome is still open.
    async fn poll_status(&self, signature: &Signature) -> Result<Option<SubmissionResult>> {
        match self.ledger.get_signature_status(signature).await {
            Ok(Some(state)) => {
                if let Some(err) = state.err {
                    return Err(classify_failure(*signature, err));
                }
                if state.commitment >= SignatureCommitment::Confirmed {
                    info!(signature = %signature, commitment = ?state.commitment, "Transaction confirmed");
                    return Ok(Some(SubmissionResult {
                        signature: *signature,
                        confirmation_status: ConfirmationStatus::Confirmed,
                    }));
                }
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(signature = %signature, error = %e, "Signature status poll failed");
                Ok(None)
            }
        }
    }
}

/// Maps an on-chain execution error to the trade error taxonomy.
pub fn classify_failure(signature: Signature, err: TransactionError) -> SwapError {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) if code == SLIPPAGE_EXCEEDED_ERROR_CODE => {
            SwapError::SlippageExceeded { signature }
        }
        other => SwapError::TransactionFailed {
            signature,
            message: other.to_string(),
        },
    }
}
