use solana_sdk::pubkey::Pubkey;

use crate::error::{Result, SwapError};
use crate::types::{parse_ui_amount, TradeRequest, TradeSettings, ValidatedTrade, MAX_SLIPPAGE_BPS, NATIVE_MINT};

/// Checks that need no balance: slippage bound, token mint and relay
/// availability. Returns the (input, output) mints.
pub fn check_request(request: &TradeRequest, relay_available: bool) -> Result<(Pubkey, Pubkey)> {
    if request.slippage_bps > MAX_SLIPPAGE_BPS {
        return Err(SwapError::invalid_input(format!(
            "Slippage {} bps exceeds maximum {} bps",
            request.slippage_bps, MAX_SLIPPAGE_BPS
        )));
    }
    if request.token_mint == NATIVE_MINT || request.token_mint == Pubkey::default() {
        return Err(SwapError::invalid_input(format!(
            "Token mint {} cannot be traded against the native asset",
            request.token_mint
        )));
    }
    if request.anti_mev && !relay_available {
        return Err(SwapError::invalid_input(
            "Anti-MEV submission requested but no relay is configured",
        ));
    }
    Ok(request.mint_pair())
}

/// Converts the UI amount with the input asset's decimals and checks it
/// against the balance being spent.
pub fn validate_amount(
    request: &TradeRequest,
    settings: &TradeSettings,
    input_decimals: u8,
    available: u64,
) -> Result<ValidatedTrade> {
    let (input_mint, output_mint) = request.mint_pair();
    let amount_atomic = parse_ui_amount(&request.amount, input_decimals)?;
    if amount_atomic == 0 {
        return Err(SwapError::invalid_input("Amount must be greater than zero"));
    }
    if amount_atomic > available {
        return Err(SwapError::InsufficientBalance {
            required: amount_atomic,
            available,
        });
    }
    Ok(ValidatedTrade {
        mode: request.mode,
        input_mint,
        output_mint,
        input_decimals,
        amount_atomic,
        slippage_bps: request.slippage_bps,
        priority_fee_atomic: settings.clamp_priority_fee(request.priority_fee_atomic),
        anti_mev: request.anti_mev,
    })
}
