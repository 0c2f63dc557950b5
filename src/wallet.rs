use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, SwapError};

/// Signing capability of a connected wallet. Injected into the engine;
/// implementations return [`SwapError::UserRejection`] when the user declines.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Signs the fee payer slot of `transaction` and returns it.
    async fn sign_transaction(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction>;

    async fn sign_message(&self, message: &[u8]) -> Result<Signature>;
}

/// Wallet notifications, delivered as a typed stream instead of UI callbacks.
#[derive(Clone)]
pub enum WalletEvent {
    Connected(Arc<dyn WalletCapability>),
    /// The user switched accounts inside the same wallet.
    AccountChanged(Arc<dyn WalletCapability>),
    Disconnected,
}

impl fmt::Debug for WalletEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletEvent::Connected(w) => write!(f, "Connected({})", w.pubkey()),
            WalletEvent::AccountChanged(w) => write!(f, "AccountChanged({})", w.pubkey()),
            WalletEvent::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Creates a wallet event channel. The sender side belongs to whatever owns
/// the wallet connection; the receiver is handed to the engine.
pub fn wallet_event_channel(buffer: usize) -> (mpsc::Sender<WalletEvent>, mpsc::Receiver<WalletEvent>) {
    mpsc::channel(buffer)
}

/// Local keypair signer, used by the CLI and for headless operation.
pub struct KeypairWallet {
    keypair: Keypair,
}

impl fmt::Debug for KeypairWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairWallet")
            .field("pubkey", &self.keypair.pubkey())
            .finish()
    }
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Loads a keypair from its base58-encoded 64-byte secret.
    pub fn from_base58(private_key_bs58: &str) -> Result<Self> {
        let private_key_bytes = bs58::decode(private_key_bs58.trim())
            .into_vec()
            .map_err(|e| SwapError::Config(format!("Invalid base58 private key: {}", e)))?;

        let keypair = Keypair::from_bytes(&private_key_bytes)
            .map_err(|e| SwapError::Config(format!("Failed to create keypair from bytes: {}", e)))?;

        info!(pubkey = %keypair.pubkey(), "Loaded keypair wallet");
        Ok(Self { keypair })
    }
}

#[async_trait]
impl WalletCapability for KeypairWallet {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction> {
        let signed = VersionedTransaction::try_new(transaction.message, &[&self.keypair])
            .map_err(|e| SwapError::Internal(format!("Failed to sign transaction: {}", e)))?;
        debug!(signature = %signed.signatures[0], "Signed transaction with local keypair");
        Ok(signed)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        Ok(self.keypair.sign_message(message))
    }
}
