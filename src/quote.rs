use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use crate::error::{Result, SwapError};
use crate::jupiter_client::{AggregatorApi, QuoteRequest, QuoteResponse};
use crate::types::{TradeMode, MAX_SLIPPAGE_BPS, NATIVE_MINT};

/// Default time a quote may be used for building a transaction.
pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(30);

/// A best-route price quote. Single-use: not `Clone`, and consumed by the
/// transaction builder.
#[derive(Debug)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output after slippage.
    pub other_amount_threshold: u64,
    pub price_impact: f64,
    pub slippage_bps: u16,
    /// Route as returned by the aggregator, echoed back when building.
    pub route: QuoteResponse,
    pub issued_at: Instant,
}

impl Quote {
    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Errors with `QuoteExpired` once the quote is older than `ttl`.
    pub fn ensure_fresh(&self, ttl: Duration) -> Result<()> {
        if self.is_stale(ttl) {
            return Err(SwapError::QuoteExpired {
                age_ms: self.age().as_millis() as u64,
            });
        }
        Ok(())
    }

    fn from_response(route: QuoteResponse, issued_at: Instant) -> Result<Self> {
        let in_amount = route.in_amount_atomic()?;
        let out_amount = route.out_amount_atomic()?;
        if route.route_plan.is_empty() || out_amount == 0 {
            return Err(SwapError::NoRouteFound(format!(
                "Aggregator returned an empty route for {} -> {}",
                route.input_mint, route.output_mint
            )));
        }
        Ok(Self {
            input_mint: route.input_mint_pubkey()?,
            output_mint: route.output_mint_pubkey()?,
            in_amount,
            out_amount,
            other_amount_threshold: route.other_amount_threshold_atomic()?,
            price_impact: route.price_impact(),
            slippage_bps: route.slippage_bps,
            route,
            issued_at,
        })
    }
}

/// Obtains quotes from the aggregator.
#[derive(Clone)]
pub struct QuoteProvider {
    aggregator: Arc<dyn AggregatorApi>,
    native_mint: Pubkey,
}

impl QuoteProvider {
    pub fn new(aggregator: Arc<dyn AggregatorApi>) -> Self {
        Self {
            aggregator,
            native_mint: NATIVE_MINT,
        }
    }

    /// (input, output) mints for a trade direction against `token_mint`.
    pub fn pair_for(&self, mode: TradeMode, token_mint: Pubkey) -> (Pubkey, Pubkey) {
        match mode {
            TradeMode::Buy => (self.native_mint, token_mint),
            TradeMode::Sell => (token_mint, self.native_mint),
        }
    }

    pub async fn get_quote(
        &self,
        input_mint: Pubkey,
        output_mint: Pubkey,
        amount_atomic: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        if amount_atomic == 0 {
            return Err(SwapError::invalid_input("Amount must be greater than zero"));
        }
        if slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(SwapError::invalid_input(format!(
                "Slippage {} bps exceeds maximum {} bps",
                slippage_bps, MAX_SLIPPAGE_BPS
            )));
        }
        if input_mint == output_mint {
            return Err(SwapError::invalid_input("Input and output mints are identical"));
        }

        let request = QuoteRequest {
            input_mint,
            output_mint,
            amount: amount_atomic,
            slippage_bps,
        };
        debug!(input = %input_mint, output = %output_mint, amount = amount_atomic, slippage_bps, "Fetching quote");
        let route = self.aggregator.quote(&request).await?;
        let quote = Quote::from_response(route, Instant::now())?;

        if quote.input_mint != input_mint || quote.output_mint != output_mint || quote.in_amount != amount_atomic {
            return Err(SwapError::api(
                "jupiter",
                format!(
                    "Quote does not match request: {} {} -> {} (asked {} {} -> {})",
                    quote.in_amount, quote.input_mint, quote.output_mint, amount_atomic, input_mint, output_mint
                ),
                None,
            ));
        }

        info!(
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            price_impact = quote.price_impact,
            route = ?quote.route.route_labels(),
            "Quote received"
        );
        Ok(quote)
    }
}
