use std::env;
use std::str::FromStr;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;

use crate::error::{Result, RetryPolicy, SwapError};
use crate::jupiter_client::{DEFAULT_PRICE_API_URL, DEFAULT_QUOTE_API_URL, DEFAULT_TOKEN_API_URL};
use crate::submission::{ConfirmConfig, JitoConfig};
use crate::types::TradeSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    // Solana configuration
    pub solana_rpc_url: String,
    pub wallet_private_key: Option<String>,

    // Aggregator endpoints
    pub jupiter_api_url: String,
    pub jupiter_price_api_url: String,
    pub jupiter_token_api_url: String,

    /// Jito block-engine base URL; unset disables the anti-MEV path.
    pub jito_block_engine_url: Option<String>,
    pub jito_timeout_ms: u64,

    /// Wallet receiving the platform fee.
    pub fee_receiver: Option<String>,

    // Trade defaults
    pub slippage_bps: u16,
    pub priority_fee_lamports: u64,
    pub max_priority_fee_lamports: u64,
    pub anti_mev: bool,

    // Timing
    pub quote_ttl_secs: u64,
    pub confirm_timeout_secs: u64,
    pub confirm_poll_interval_ms: u64,
    pub balance_refresh_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,

    // Monitoring
    pub log_dir: String,
    pub log_level: String,
    pub metrics_addr: Option<String>,
}

impl Settings {
    /// Builder with a default for every tunable.
    pub fn defaults() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
        let trade = TradeSettings::default();
        let confirm = ConfirmConfig::default();
        Config::builder()
            .set_default("solana_rpc_url", "https://api.mainnet-beta.solana.com")?
            .set_default("jupiter_api_url", DEFAULT_QUOTE_API_URL)?
            .set_default("jupiter_price_api_url", DEFAULT_PRICE_API_URL)?
            .set_default("jupiter_token_api_url", DEFAULT_TOKEN_API_URL)?
            .set_default("jito_timeout_ms", JitoConfig::default().timeout_ms)?
            .set_default("slippage_bps", trade.slippage_bps as u64)?
            .set_default("priority_fee_lamports", trade.priority_fee_atomic)?
            .set_default("max_priority_fee_lamports", trade.max_priority_fee_atomic)?
            .set_default("anti_mev", trade.anti_mev)?
            .set_default("quote_ttl_secs", 30)?
            .set_default("confirm_timeout_secs", confirm.timeout.as_secs())?
            .set_default("confirm_poll_interval_ms", confirm.poll_interval.as_millis() as u64)?
            .set_default("balance_refresh_secs", 30)?
            .set_default("request_timeout_secs", 30)?
            .set_default("max_retries", 3)?
            .set_default("retry_backoff_ms", 500)?
            .set_default("log_dir", "logs")?
            .set_default("log_level", "info")
    }

    /// Defaults, then `config/{RUN_MODE}` and `config/local` files if present,
    /// then the environment (`__` separates nested keys).
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config = Self::defaults()?
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::default().separator("__"))
            .build()?;
        config.try_deserialize()
    }

    pub fn trade_settings(&self) -> TradeSettings {
        TradeSettings {
            slippage_bps: self.slippage_bps,
            priority_fee_atomic: self.priority_fee_lamports.min(self.max_priority_fee_lamports),
            max_priority_fee_atomic: self.max_priority_fee_lamports,
            anti_mev: self.anti_mev && self.jito_block_engine_url.is_some(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn confirm_config(&self) -> ConfirmConfig {
        ConfirmConfig {
            poll_interval: Duration::from_millis(self.confirm_poll_interval_ms),
            timeout: Duration::from_secs(self.confirm_timeout_secs),
        }
    }

    pub fn jito_config(&self) -> Option<JitoConfig> {
        self.jito_block_engine_url.as_ref().map(|url| JitoConfig {
            block_engine_url: url.clone(),
            timeout_ms: self.jito_timeout_ms,
        })
    }

    pub fn fee_receiver_pubkey(&self) -> Result<Pubkey> {
        let raw = self
            .fee_receiver
            .as_deref()
            .ok_or_else(|| SwapError::Config("FEE_RECEIVER is not set".to_string()))?;
        Pubkey::from_str(raw.trim()).map_err(|e| SwapError::Config(format!("Invalid FEE_RECEIVER '{}': {}", raw, e)))
    }

    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn balance_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_secs)
    }
}
