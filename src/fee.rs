use solana_sdk::pubkey::Pubkey;

use crate::types::{FeeAsset, FeeInstruction, NATIVE_MINT};

/// Platform fee in basis points (1%).
pub const FEE_RATE_BPS: u64 = 100;

const BPS_DENOMINATOR: u128 = 10_000;

/// Computes the platform fee and describes its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    receiver: Pubkey,
    rate_bps: u64,
}

impl FeePolicy {
    pub fn new(receiver: Pubkey) -> Self {
        Self {
            receiver,
            rate_bps: FEE_RATE_BPS,
        }
    }

    pub fn receiver(&self) -> Pubkey {
        self.receiver
    }

    pub fn rate_bps(&self) -> u64 {
        self.rate_bps
    }

    /// Fee in atomic units of the input asset, rounded down.
    pub fn compute_fee(&self, input_notional: u64) -> u64 {
        (input_notional as u128 * self.rate_bps as u128 / BPS_DENOMINATOR) as u64
    }

    /// Fee transfer from `payer` in the trade's input asset.
    pub fn fee_instruction(
        &self,
        payer: Pubkey,
        input_mint: Pubkey,
        input_decimals: u8,
        input_notional: u64,
    ) -> FeeInstruction {
        let asset = if input_mint == NATIVE_MINT {
            FeeAsset::Native
        } else {
            FeeAsset::Token {
                mint: input_mint,
                decimals: input_decimals,
            }
        };
        FeeInstruction {
            payer,
            receiver: self.receiver,
            amount_atomic: self.compute_fee(input_notional),
            asset,
        }
    }
}
