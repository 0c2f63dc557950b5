use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, info};

use crate::error::{handle_reqwest_error, Result, SwapError};

const SERVICE: &str = "jito";

pub const DEFAULT_JITO_URL: &str = "https://mainnet.block-engine.jito.wtf";

/// Private submission path that keeps a transaction out of the public
/// mempool until it is included.
#[async_trait]
pub trait AntiMevRelay: Send + Sync {
    /// Forwards an already signed transaction. The tip is paid inside the
    /// transaction itself; `tip_lamports` is informational.
    async fn send_transaction(&self, transaction: &VersionedTransaction, tip_lamports: u64) -> Result<Signature>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitoConfig {
    pub block_engine_url: String,
    pub timeout_ms: u64,
}

impl Default for JitoConfig {
    fn default() -> Self {
        Self {
            block_engine_url: DEFAULT_JITO_URL.to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Jito block-engine JSON-RPC client.
#[derive(Clone)]
pub struct JitoRelay {
    http: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for JitoRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitoRelay").field("endpoint", &self.endpoint).finish()
    }
}

impl JitoRelay {
    pub fn new(config: &JitoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SwapError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}/api/v1/transactions", config.block_engine_url.trim_end_matches('/'));
        info!(endpoint = %endpoint, "Jito relay configured");
        Ok(Self { http, endpoint })
    }

    fn request_body(transaction: &VersionedTransaction) -> Result<Value> {
        let bytes = bincode::serialize(transaction)?;
        Ok(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [BASE64.encode(bytes), { "encoding": "base64" }],
        }))
    }
}

#[async_trait]
impl AntiMevRelay for JitoRelay {
    async fn send_transaction(&self, transaction: &VersionedTransaction, tip_lamports: u64) -> Result<Signature> {
        let body = Self::request_body(transaction)?;
        debug!(tip_lamports, "Sending transaction through Jito");
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| handle_reqwest_error(e, "Jito sendTransaction"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| handle_reqwest_error(e, "Jito sendTransaction"))?;
        if !status.is_success() {
            return Err(SwapError::api(SERVICE, text, Some(status.as_u16())));
        }

        let parsed: RpcResponse = serde_json::from_str(&text)
            .map_err(|e| SwapError::api(SERVICE, format!("Unparseable response '{}': {}", text, e), None))?;
        if let Some(error) = parsed.error {
            return Err(SwapError::api(
                SERVICE,
                format!(
                    "sendTransaction rejected ({}): {}",
                    error.code.unwrap_or_default(),
                    error.message.unwrap_or_default()
                ),
                None,
            ));
        }
        let result = parsed
            .result
            .ok_or_else(|| SwapError::api(SERVICE, "Response carried no signature", None))?;
        Signature::from_str(&result)
            .map_err(|e| SwapError::api(SERVICE, format!("Invalid signature '{}': {}", result, e), None))
    }
}
