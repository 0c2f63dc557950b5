use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey, signature::Signature};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SwapError};

/// Wrapped SOL mint; the aggregator's identifier for the native asset.
pub const NATIVE_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// Decimals of the native asset (lamports per SOL = 10^9).
pub const NATIVE_DECIMALS: u8 = 9;

/// SPL Token program.
pub const TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Associated Token Account program.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Upper bound for slippage tolerance in basis points.
pub const MAX_SLIPPAGE_BPS: u16 = 10_000;

/// Direction of a trade relative to the target token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    /// Spend the native asset, receive the token.
    Buy,
    /// Spend the token, receive the native asset.
    Sell,
}

impl FromStr for TradeMode {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(TradeMode::Buy),
            "sell" => Ok(TradeMode::Sell),
            _ => Err(SwapError::invalid_input(format!("Invalid trade mode: {}", s))),
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeMode::Buy => write!(f, "buy"),
            TradeMode::Sell => write!(f, "sell"),
        }
    }
}

/// Mint metadata. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub mint: Pubkey,
    pub decimals: u8,
    pub symbol: Option<String>,
}

impl TokenDescriptor {
    pub fn native() -> Self {
        Self {
            mint: NATIVE_MINT,
            decimals: NATIVE_DECIMALS,
            symbol: Some("SOL".to_string()),
        }
    }
}

/// A trade as entered by the user. Amount is the UI decimal string; it is
/// converted to atomic units during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRequest {
    pub mode: TradeMode,
    pub token_mint: Pubkey,
    pub amount: String,
    pub slippage_bps: u16,
    pub priority_fee_atomic: u64,
    pub anti_mev: bool,
}

impl TradeRequest {
    /// A request using the session's default settings.
    pub fn new(mode: TradeMode, token_mint: Pubkey, amount: impl Into<String>, settings: &TradeSettings) -> Self {
        Self {
            mode,
            token_mint,
            amount: amount.into(),
            slippage_bps: settings.slippage_bps,
            priority_fee_atomic: settings.priority_fee_atomic,
            anti_mev: settings.anti_mev,
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    pub fn with_priority_fee(mut self, priority_fee_atomic: u64) -> Self {
        self.priority_fee_atomic = priority_fee_atomic;
        self
    }

    pub fn with_anti_mev(mut self, anti_mev: bool) -> Self {
        self.anti_mev = anti_mev;
        self
    }

    /// (input, output) mints for this request's direction.
    pub fn mint_pair(&self) -> (Pubkey, Pubkey) {
        match self.mode {
            TradeMode::Buy => (NATIVE_MINT, self.token_mint),
            TradeMode::Sell => (self.token_mint, NATIVE_MINT),
        }
    }
}

/// A request that passed synchronous validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTrade {
    pub mode: TradeMode,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub input_decimals: u8,
    pub amount_atomic: u64,
    pub slippage_bps: u16,
    /// Already clamped to the session maximum.
    pub priority_fee_atomic: u64,
    pub anti_mev: bool,
}

/// Per-session trading defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSettings {
    pub slippage_bps: u16,
    pub priority_fee_atomic: u64,
    pub max_priority_fee_atomic: u64,
    pub anti_mev: bool,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            slippage_bps: 250,
            priority_fee_atomic: 100_000,
            max_priority_fee_atomic: 10_000_000,
            anti_mev: true,
        }
    }
}

impl TradeSettings {
    pub fn clamp_priority_fee(&self, requested: u64) -> u64 {
        requested.min(self.max_priority_fee_atomic)
    }
}

/// Token balance of one wallet for one mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub mint: Pubkey,
    /// Atomic units.
    pub balance: u64,
    pub decimals: u8,
    pub symbol: Option<String>,
    pub usd_value: Option<f64>,
}

impl TokenBalance {
    pub fn ui_amount(&self) -> f64 {
        self.balance as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// A balance value with freshness information. `stale` is set when the last
/// refresh failed and the previous value was kept.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReading<T> {
    pub value: T,
    pub stale: bool,
    pub warning: Option<String>,
}

impl<T> BalanceReading<T> {
    pub fn fresh(value: T) -> Self {
        Self { value, stale: false, warning: None }
    }

    pub fn stale(value: T, warning: impl Into<String>) -> Self {
        Self { value, stale: true, warning: Some(warning.into()) }
    }
}

/// Asset the platform fee is paid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeAsset {
    Native,
    Token { mint: Pubkey, decimals: u8 },
}

/// The platform fee transfer appended to a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeInstruction {
    pub payer: Pubkey,
    /// Owner wallet of the fee; token fees go to its associated token account.
    pub receiver: Pubkey,
    pub amount_atomic: u64,
    pub asset: FeeAsset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Expired,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionResult {
    pub signature: Signature,
    pub confirmation_status: ConfirmationStatus,
}

/// Successful trade outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReceipt {
    pub trade_id: Uuid,
    pub signature: Signature,
    pub mode: TradeMode,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub input_amount: u64,
    /// Quoted output; the executed amount is bounded below by slippage.
    pub output_amount: u64,
    pub fee_amount: u64,
    pub confirmed_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of `submit_trade`.
pub type TradeOutcome = Result<TradeReceipt>;

/// Largest precision a u64 amount can carry in its fractional part.
pub const MAX_DECIMALS: u8 = 19;

/// Converts a UI decimal string (e.g. "1.5") into atomic units.
pub fn parse_ui_amount(input: &str, decimals: u8) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SwapError::invalid_input("Amount is empty"));
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(SwapError::invalid_input(format!("Invalid amount: {}", input)));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(SwapError::invalid_input(format!("Invalid amount: {}", input)));
    }
    if decimals > MAX_DECIMALS {
        return Err(SwapError::invalid_input(format!(
            "Unsupported token precision: {} decimals",
            decimals
        )));
    }
    if frac.len() > decimals as usize {
        return Err(SwapError::invalid_input(format!(
            "Amount {} has more than {} decimal places",
            input, decimals
        )));
    }

    let overflow = || SwapError::invalid_input(format!("Amount too large: {}", input));
    let scale = 10u64.checked_pow(decimals as u32).ok_or_else(overflow)?;
    let whole_atomic = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u64>()
            .map_err(|_| overflow())?
            .checked_mul(scale)
            .ok_or_else(overflow)?
    };
    let frac_atomic = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded.parse::<u64>().map_err(|_| overflow())?
    };
    whole_atomic.checked_add(frac_atomic).ok_or_else(overflow)
}

/// Formats atomic units as a UI decimal string without trailing zeros.
pub fn format_atomic(amount: u64, decimals: u8) -> String {
    if decimals == 0 || amount == 0 {
        return amount.to_string();
    }
    // Every u64 is below 10^20, so larger scales leave no whole part.
    let Some(scale) = 10u128.checked_pow(decimals as u32) else {
        return format!("0.{:0>width$}", amount, width = decimals as usize)
            .trim_end_matches('0')
            .to_string();
    };
    let whole = amount as u128 / scale;
    let frac = amount as u128 % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Associated token account address for `owner` and `mint`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    let seeds = &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()];
    let (address, _bump) = Pubkey::find_program_address(seeds, &ASSOCIATED_TOKEN_PROGRAM_ID);
    address
}
