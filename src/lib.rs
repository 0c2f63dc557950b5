// Public modules that are part of the API
pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod fee;
pub mod jupiter_client;
pub mod ledger;
pub mod monitoring;
pub mod quote;
pub mod submission;
pub mod transaction_builder;
pub mod types;
pub mod wallet;

// Re-export common types
pub use balance::{BalanceKey, BalanceOracle, BalanceSnapshot, BalanceValue};
pub use engine::{EngineState, TradeEngine, TradeEngineBuilder};
pub use error::{ErrorKind, Result, RetryPolicy, SwapError};
pub use fee::{FeePolicy, FEE_RATE_BPS};
pub use jupiter_client::{AggregatorApi, JupiterClient, PrioritizationConfig};
pub use ledger::{LedgerRpc, SolanaLedger};
pub use quote::{Quote, QuoteProvider};
pub use submission::{AntiMevRelay, ConfirmConfig, JitoRelay, SubmissionChannel, SubmitOptions};
pub use transaction_builder::{BuiltTransaction, TransactionBuilder};
pub use types::{TradeMode, TradeReceipt, TradeRequest, TradeSettings};
pub use wallet::{KeypairWallet, WalletCapability, WalletEvent};

pub use swapseer_types::{TradeEvent, TradeStage};
