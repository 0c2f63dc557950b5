use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use solana_transaction_status::TransactionConfirmationStatus;
use tracing::debug;

use crate::error::{Result, SwapError};
use crate::types::associated_token_address;

/// Offset of the `amount` field in an SPL token account.
const TOKEN_ACCOUNT_AMOUNT_OFFSET: usize = 64;
/// Offset of the `decimals` field in an SPL mint.
const MINT_DECIMALS_OFFSET: usize = 44;

/// Raw token amount as held on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub amount: u64,
    pub decimals: u8,
}

/// Commitment a signature has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignatureCommitment {
    Processed,
    Confirmed,
    Finalized,
}

/// Ledger's view of a submitted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureState {
    pub commitment: SignatureCommitment,
    /// Execution error, if the transaction landed but failed.
    pub err: Option<TransactionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub skip_preflight: bool,
    /// Retries the RPC node performs on its own; `Some(0)` leaves
    /// rebroadcasting entirely to the caller.
    pub max_retries: Option<usize>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: true,
            max_retries: Some(0),
        }
    }
}

/// The subset of the ledger RPC the engine needs.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Native balance in lamports.
    async fn get_balance(&self, owner: &Pubkey) -> Result<u64>;

    /// Balance of `owner`'s associated token account; zero if it does not exist.
    async fn get_token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<TokenAmount>;

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64)>;

    async fn get_block_height(&self) -> Result<u64>;

    async fn send_transaction(&self, transaction: &VersionedTransaction, options: SendOptions) -> Result<Signature>;

    /// `None` while the ledger has not seen the signature.
    async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureState>>;
}

/// Converts a Solana client error, keeping transport failures retryable.
pub fn handle_client_error(error: ClientError, context: &str) -> SwapError {
    match error.kind() {
        ClientErrorKind::Io(_) => SwapError::Network(format!("{}: {}", context, error)),
        ClientErrorKind::Reqwest(e) if e.is_timeout() || e.is_connect() || e.status().is_none() => {
            SwapError::Network(format!("{}: {}", context, error))
        }
        ClientErrorKind::Reqwest(e) => {
            SwapError::api("solana-rpc", format!("{}: {}", context, error), e.status().map(|s| s.as_u16()))
        }
        _ => SwapError::api("solana-rpc", format!("{}: {}", context, error), None),
    }
}

/// JSON-RPC backed ledger access.
#[derive(Clone)]
pub struct SolanaLedger {
    rpc_client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for SolanaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedger")
            .field("rpc_url", &self.rpc_client.url())
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

impl SolanaLedger {
    pub fn new(rpc_url: &str, timeout: Duration) -> Self {
        let commitment = CommitmentConfig::confirmed();
        let rpc_client = Arc::new(RpcClient::new_with_timeout_and_commitment(
            rpc_url.to_string(),
            timeout,
            commitment,
        ));
        Self { rpc_client, commitment }
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedger {
    async fn get_balance(&self, owner: &Pubkey) -> Result<u64> {
        self.rpc_client
            .get_balance(owner)
            .await
            .map_err(|e| handle_client_error(e, "Failed to get wallet balance"))
    }

    async fn get_token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<TokenAmount> {
        let token_account = associated_token_address(owner, mint);
        let accounts = self
            .rpc_client
            .get_multiple_accounts(&[token_account, *mint])
            .await
            .map_err(|e| handle_client_error(e, "Failed to get token accounts"))?;

        let mint_account = accounts
            .get(1)
            .cloned()
            .flatten()
            .ok_or_else(|| SwapError::invalid_input(format!("Mint {} does not exist", mint)))?;
        let decimals = *mint_account
            .data
            .get(MINT_DECIMALS_OFFSET)
            .ok_or_else(|| SwapError::invalid_input(format!("Account {} is not a mint", mint)))?;

        let amount = match accounts.first().cloned().flatten() {
            Some(account) => {
                let bytes = account
                    .data
                    .get(TOKEN_ACCOUNT_AMOUNT_OFFSET..TOKEN_ACCOUNT_AMOUNT_OFFSET + 8)
                    .ok_or_else(|| SwapError::api("solana-rpc", format!("Malformed token account {}", token_account), None))?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                u64::from_le_bytes(raw)
            }
            None => {
                debug!(owner = %owner, mint = %mint, "No associated token account, balance is zero");
                0
            }
        };
        Ok(TokenAmount { amount, decimals })
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64)> {
        self.rpc_client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| handle_client_error(e, "Failed to get latest blockhash"))
    }

    async fn get_block_height(&self) -> Result<u64> {
        self.rpc_client
            .get_block_height()
            .await
            .map_err(|e| handle_client_error(e, "Failed to get block height"))
    }

    async fn send_transaction(&self, transaction: &VersionedTransaction, options: SendOptions) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            max_retries: options.max_retries,
            ..RpcSendTransactionConfig::default()
        };
        self.rpc_client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| handle_client_error(e, "sendTransaction"))
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureState>> {
        let response = self
            .rpc_client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| handle_client_error(e, "getSignatureStatuses"))?;

        let status = match response.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(None),
        };
        let commitment = match status.confirmation_status {
            Some(TransactionConfirmationStatus::Finalized) => SignatureCommitment::Finalized,
            Some(TransactionConfirmationStatus::Confirmed) => SignatureCommitment::Confirmed,
            Some(TransactionConfirmationStatus::Processed) => SignatureCommitment::Processed,
            // Older nodes omit the field; no confirmations count means rooted
            None if status.confirmations.is_none() => SignatureCommitment::Finalized,
            None => SignatureCommitment::Processed,
        };
        Ok(Some(SignatureState { commitment, err: status.err }))
    }
}
