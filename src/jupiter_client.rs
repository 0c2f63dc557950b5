use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::error::{handle_reqwest_error, Result, SwapError};

const SERVICE: &str = "jupiter";

pub const DEFAULT_QUOTE_API_URL: &str = "https://quote-api.jup.ag/v6";
pub const DEFAULT_PRICE_API_URL: &str = "https://api.jup.ag/price/v2";
pub const DEFAULT_TOKEN_API_URL: &str = "https://tokens.jup.ag/token";

/// Information about a Solana token from Jupiter's API
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenInfo {
    pub address: String,
    pub decimals: u8,
    pub name: String,
    pub symbol: String,
    #[serde(rename = "logoURI")]
    pub logo_uri: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlatformFee {
    pub amount: String,
    #[serde(rename = "feeBps")]
    pub fee_bps: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SwapInfo {
    #[serde(rename = "ammKey")]
    pub amm_key: String,
    pub label: Option<String>,
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outAmount")]
    pub out_amount: String,
    #[serde(rename = "feeAmount")]
    pub fee_amount: String,
    #[serde(rename = "feeMint")]
    pub fee_mint: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoutePlan {
    #[serde(rename = "swapInfo")]
    pub swap_info: SwapInfo,
    pub percent: i32,
}

/// Route returned by the quote endpoint. Echoed back verbatim when building
/// the swap, so unknown fields are preserved.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuoteResponse {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    #[serde(rename = "outAmount")]
    pub out_amount: String,
    #[serde(rename = "otherAmountThreshold")]
    pub other_amount_threshold: String,
    #[serde(rename = "swapMode")]
    pub swap_mode: String,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: u16,
    #[serde(rename = "platformFee")]
    pub platform_fee: Option<PlatformFee>,
    #[serde(rename = "priceImpactPct")]
    pub price_impact_pct: String,
    #[serde(rename = "routePlan")]
    pub route_plan: Vec<RoutePlan>,
    #[serde(rename = "contextSlot", default, skip_serializing_if = "Option::is_none")]
    pub context_slot: Option<u64>,
    #[serde(rename = "timeTaken", default, skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<f64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Parameters for the quote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount: u64,
    pub slippage_bps: u16,
}

/// How the swap transaction pays for inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritizationConfig {
    /// Public path: priority fee capped at `max_lamports`.
    PriorityFee { max_lamports: u64 },
    /// Protected path: the fee is paid as a block-engine tip.
    JitoTip { lamports: u64 },
}

impl PrioritizationConfig {
    pub fn for_trade(anti_mev: bool, lamports: u64) -> Self {
        if anti_mev {
            PrioritizationConfig::JitoTip { lamports }
        } else {
            PrioritizationConfig::PriorityFee { max_lamports: lamports }
        }
    }

    pub fn lamports(&self) -> u64 {
        match self {
            PrioritizationConfig::PriorityFee { max_lamports } => *max_lamports,
            PrioritizationConfig::JitoTip { lamports } => *lamports,
        }
    }
}

#[derive(Serialize, Debug)]
struct PriorityLevelWithMaxLamports {
    #[serde(rename = "maxLamports")]
    max_lamports: u64,
    #[serde(rename = "priorityLevel")]
    priority_level: &'static str,
}

#[derive(Serialize, Debug)]
enum PrioritizationFeeLamports {
    #[serde(rename = "priorityLevelWithMaxLamports")]
    PriorityLevelWithMaxLamports(PriorityLevelWithMaxLamports),
    #[serde(rename = "jitoTipLamports")]
    JitoTipLamports(u64),
}

impl From<PrioritizationConfig> for PrioritizationFeeLamports {
    fn from(config: PrioritizationConfig) -> Self {
        match config {
            PrioritizationConfig::PriorityFee { max_lamports } => {
                PrioritizationFeeLamports::PriorityLevelWithMaxLamports(PriorityLevelWithMaxLamports {
                    max_lamports,
                    priority_level: "veryHigh",
                })
            }
            PrioritizationConfig::JitoTip { lamports } => PrioritizationFeeLamports::JitoTipLamports(lamports),
        }
    }
}

/// Parameters for the swap-build endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapBuildRequest {
    pub user_public_key: Pubkey,
    pub prioritization: PrioritizationConfig,
}

#[derive(Serialize)]
struct SwapRequest<'a> {
    #[serde(rename = "userPublicKey")]
    user_public_key: String,
    #[serde(rename = "wrapAndUnwrapSol")]
    wrap_and_unwrap_sol: bool,
    #[serde(rename = "useSharedAccounts")]
    use_shared_accounts: bool,
    #[serde(rename = "prioritizationFeeLamports")]
    prioritization_fee_lamports: PrioritizationFeeLamports,
    #[serde(rename = "asLegacyTransaction")]
    as_legacy_transaction: bool,
    #[serde(rename = "dynamicComputeUnitLimit")]
    dynamic_compute_unit_limit: bool,
    #[serde(rename = "quoteResponse")]
    quote_response: &'a QuoteResponse,
}

/// Result of the swap-build endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SwapBuild {
    /// Base64 of a bincode-serialized unsigned `VersionedTransaction`.
    #[serde(rename = "swapTransaction")]
    pub swap_transaction: Option<String>,
    #[serde(rename = "lastValidBlockHeight")]
    pub last_valid_block_height: Option<u64>,
    #[serde(rename = "prioritizationFeeLamports")]
    pub prioritization_fee_lamports: Option<u64>,
}

/// Error body returned by the aggregator on 4xx responses.
#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PriceResponse {
    data: HashMap<String, Option<PriceEntry>>,
}

#[derive(Deserialize, Debug)]
struct PriceEntry {
    price: Option<String>,
}

/// Third-party route aggregator.
#[async_trait]
pub trait AggregatorApi: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse>;

    async fn build_swap(&self, route: &QuoteResponse, request: &SwapBuildRequest) -> Result<SwapBuild>;

    /// Token metadata, `None` if the aggregator does not know the mint.
    async fn token_info(&self, mint: &Pubkey) -> Result<Option<TokenInfo>>;

    /// USD price of one whole token, `None` if unpriced.
    async fn price_usd(&self, mint: &Pubkey) -> Result<Option<f64>>;
}

/// Jupiter HTTP client.
#[derive(Clone)]
pub struct JupiterClient {
    http: reqwest::Client,
    quote_api_url: String,
    price_api_url: String,
    token_api_url: String,
}

impl std::fmt::Debug for JupiterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JupiterClient")
            .field("quote_api_url", &self.quote_api_url)
            .finish()
    }
}

impl JupiterClient {
    /// Create a new Jupiter API client
    pub fn new(quote_api_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SwapError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            quote_api_url: quote_api_url.trim_end_matches('/').to_string(),
            price_api_url: DEFAULT_PRICE_API_URL.to_string(),
            token_api_url: DEFAULT_TOKEN_API_URL.to_string(),
        })
    }

    pub fn with_price_api_url(mut self, url: &str) -> Self {
        self.price_api_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_api_url(mut self, url: &str) -> Self {
        self.token_api_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Maps a non-success response to an error using the structured error code.
    async fn error_from_response(response: reqwest::Response, context: &str) -> SwapError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
        let (code, message) = match parsed {
            Some(ApiErrorBody { error, error_code }) => (error_code, error.unwrap_or_else(|| body.clone())),
            None => (None, body.clone()),
        };
        map_api_error(status.as_u16(), code.as_deref(), message, context)
    }
}

/// Aggregator error code to error kind.
fn map_api_error(status: u16, code: Option<&str>, message: String, context: &str) -> SwapError {
    match code {
        Some("COULD_NOT_FIND_ANY_ROUTE")
        | Some("NO_ROUTES_FOUND")
        | Some("TOKEN_NOT_TRADABLE")
        | Some("ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT") => SwapError::NoRouteFound(message),
        Some("CIRCULAR_ARBITRAGE_IS_DISABLED") | Some("INVALID_AMOUNT") | Some("AMOUNT_TOO_SMALL") => {
            SwapError::InvalidInput(message)
        }
        _ => SwapError::api(SERVICE, format!("{}: {}", context, message), Some(status)),
    }
}

#[async_trait]
impl AggregatorApi for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse> {
        let url = format!("{}/quote", self.quote_api_url);
        debug!(input = %request.input_mint, output = %request.output_mint, amount = request.amount, "Requesting Jupiter quote");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| handle_reqwest_error(e, "Jupiter quote"))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "quote").await);
        }
        response
            .json::<QuoteResponse>()
            .await
            .map_err(|e| SwapError::api(SERVICE, format!("Failed to parse quote response: {}", e), None))
    }

    async fn build_swap(&self, route: &QuoteResponse, request: &SwapBuildRequest) -> Result<SwapBuild> {
        let swap_request = SwapRequest {
            user_public_key: request.user_public_key.to_string(),
            wrap_and_unwrap_sol: true,
            use_shared_accounts: true,
            prioritization_fee_lamports: request.prioritization.into(),
            as_legacy_transaction: false,
            dynamic_compute_unit_limit: true,
            quote_response: route,
        };
        let response = self
            .http
            .post(format!("{}/swap", self.quote_api_url))
            .json(&swap_request)
            .send()
            .await
            .map_err(|e| handle_reqwest_error(e, "Jupiter swap"))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "swap").await);
        }
        response
            .json::<SwapBuild>()
            .await
            .map_err(|e| SwapError::api(SERVICE, format!("Failed to parse Jupiter swap response: {}", e), None))
    }

    async fn token_info(&self, mint: &Pubkey) -> Result<Option<TokenInfo>> {
        let url = format!("{}/{}", self.token_api_url, mint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| handle_reqwest_error(e, "Jupiter token"))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "token").await);
        }
        // Unknown mints come back as `null`
        let info = response.json::<Option<TokenInfo>>().await?;
        Ok(info)
    }

    async fn price_usd(&self, mint: &Pubkey) -> Result<Option<f64>> {
        let response = self
            .http
            .get(&self.price_api_url)
            .query(&[("ids", mint.to_string())])
            .send()
            .await
            .map_err(|e| handle_reqwest_error(e, "Jupiter price"))?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "price").await);
        }
        let body = response.json::<PriceResponse>().await?;
        let price = body
            .data
            .get(&mint.to_string())
            .and_then(|entry| entry.as_ref())
            .and_then(|entry| entry.price.as_deref())
            .and_then(|p| match p.parse::<f64>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(mint = %mint, price = p, error = %e, "Unparseable price from Jupiter");
                    None
                }
            });
        Ok(price)
    }
}

impl QuoteResponse {
    pub fn in_amount_atomic(&self) -> Result<u64> {
        parse_atomic(&self.in_amount, "inAmount")
    }

    pub fn out_amount_atomic(&self) -> Result<u64> {
        parse_atomic(&self.out_amount, "outAmount")
    }

    pub fn other_amount_threshold_atomic(&self) -> Result<u64> {
        parse_atomic(&self.other_amount_threshold, "otherAmountThreshold")
    }

    /// Price impact as a fraction (0.01 = 1%). Unparseable values read as 0.
    pub fn price_impact(&self) -> f64 {
        self.price_impact_pct.parse::<f64>().unwrap_or(0.0)
    }

    pub fn input_mint_pubkey(&self) -> Result<Pubkey> {
        parse_pubkey(&self.input_mint, "inputMint")
    }

    pub fn output_mint_pubkey(&self) -> Result<Pubkey> {
        parse_pubkey(&self.output_mint, "outputMint")
    }

    /// Venue labels along the route, in order.
    pub fn route_labels(&self) -> Vec<String> {
        self.route_plan
            .iter()
            .map(|step| step.swap_info.label.clone().unwrap_or_else(|| step.swap_info.amm_key.clone()))
            .collect()
    }
}

fn parse_atomic(value: &str, field: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| SwapError::api(SERVICE, format!("Failed to parse {} '{}': {}", field, value, e), None))
}

fn parse_pubkey(value: &str, field: &str) -> Result<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|e| SwapError::api(SERVICE, format!("Invalid {} '{}': {}", field, value, e), None))
}
