use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use solana_sdk::instruction::{AccountMeta, CompiledInstruction, Instruction};
use solana_sdk::message::{MessageHeader, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::system_instruction::{self, SystemInstruction};
use solana_sdk::system_program;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, info};

use crate::error::{Result, SwapError};
use crate::jupiter_client::{AggregatorApi, PrioritizationConfig, SwapBuildRequest};
use crate::ledger::LedgerRpc;
use crate::quote::{Quote, DEFAULT_QUOTE_TTL};
use crate::types::{associated_token_address, FeeAsset, FeeInstruction, TOKEN_PROGRAM_ID};

/// Account table limit of a transaction message (indexes are `u8`).
const MAX_ACCOUNT_KEYS: usize = 256;

/// SPL Token `TransferChecked` instruction tag.
const TRANSFER_CHECKED_TAG: u8 = 12;

/// An unsigned swap transaction with the platform fee appended.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub transaction: VersionedTransaction,
    /// Bincode serialization of `transaction` with default signatures.
    pub bytes: Vec<u8>,
    pub last_valid_block_height: u64,
    pub in_amount: u64,
    pub out_amount: u64,
    pub fee_amount: u64,
}

/// A fee transfer found in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFeeTransfer {
    pub asset: FeeAsset,
    /// Receiver wallet, or its associated token account for token fees.
    pub destination: Pubkey,
    pub amount_atomic: u64,
    /// Position of the instruction in the message.
    pub instruction_index: usize,
}

/// Builds fee-carrying swap transactions from quotes.
#[derive(Clone)]
pub struct TransactionBuilder {
    aggregator: Arc<dyn AggregatorApi>,
    ledger: Arc<dyn LedgerRpc>,
    quote_ttl: Duration,
}

impl TransactionBuilder {
    pub fn new(aggregator: Arc<dyn AggregatorApi>, ledger: Arc<dyn LedgerRpc>) -> Self {
        Self {
            aggregator,
            ledger,
            quote_ttl: DEFAULT_QUOTE_TTL,
        }
    }

    pub fn with_quote_ttl(mut self, quote_ttl: Duration) -> Self {
        self.quote_ttl = quote_ttl;
        self
    }

    /// Consumes `quote` and returns the unsigned transaction for `wallet`.
    pub async fn build(
        &self,
        quote: Quote,
        wallet: &Pubkey,
        fee: &FeeInstruction,
        prioritization: PrioritizationConfig,
    ) -> Result<BuiltTransaction> {
        quote.ensure_fresh(self.quote_ttl)?;
        if fee.payer != *wallet {
            return Err(SwapError::build(format!(
                "Fee payer {} is not the trading wallet {}",
                fee.payer, wallet
            )));
        }
        if fee.receiver == Pubkey::default() {
            return Err(SwapError::build("Fee receiver is not set"));
        }

        let request = SwapBuildRequest {
            user_public_key: *wallet,
            prioritization,
        };
        let swap = self.aggregator.build_swap(&quote.route, &request).await?;

        let encoded = swap
            .swap_transaction
            .ok_or_else(|| SwapError::build("Aggregator response did not include a transaction"))?;
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| SwapError::build(format!("Invalid base64 swap transaction: {}", e)))?;
        let mut transaction: VersionedTransaction = bincode::deserialize(&raw)
            .map_err(|e| SwapError::build(format!("Failed to deserialize swap transaction: {}", e)))?;

        if transaction.message.static_account_keys().first() != Some(wallet) {
            return Err(SwapError::build(format!("Wallet {} is not the transaction fee payer", wallet)));
        }

        let fee_ix = fee_instruction_for(fee);
        append_fee_instruction(&mut transaction, &fee_ix)?;

        let last_valid_block_height = match swap.last_valid_block_height {
            Some(height) => height,
            None => {
                debug!("Aggregator omitted lastValidBlockHeight, using latest blockhash window");
                self.ledger.get_latest_blockhash().await?.1
            }
        };

        let bytes = bincode::serialize(&transaction)?;
        info!(
            wallet = %wallet,
            fee = fee.amount_atomic,
            instructions = transaction.message.instructions().len(),
            last_valid_block_height,
            size = bytes.len(),
            "Built swap transaction"
        );
        Ok(BuiltTransaction {
            transaction,
            bytes,
            last_valid_block_height,
            in_amount: quote.in_amount,
            out_amount: quote.out_amount,
            fee_amount: fee.amount_atomic,
        })
    }
}

/// Instruction moving the platform fee from the payer to the receiver.
pub fn fee_instruction_for(fee: &FeeInstruction) -> Instruction {
    match fee.asset {
        FeeAsset::Native => system_instruction::transfer(&fee.payer, &fee.receiver, fee.amount_atomic),
        FeeAsset::Token { mint, decimals } => {
            let source = associated_token_address(&fee.payer, &mint);
            let destination = associated_token_address(&fee.receiver, &mint);
            let mut data = Vec::with_capacity(10);
            data.push(TRANSFER_CHECKED_TAG);
            data.extend_from_slice(&fee.amount_atomic.to_le_bytes());
            data.push(decimals);
            Instruction {
                program_id: TOKEN_PROGRAM_ID,
                accounts: vec![
                    AccountMeta::new(source, false),
                    AccountMeta::new_readonly(mint, false),
                    AccountMeta::new(destination, false),
                    AccountMeta::new_readonly(fee.payer, true),
                ],
                data,
            }
        }
    }
}

/// Appends `instruction` as the last instruction of `transaction` and resets
/// its signatures. The static account table is regrouped into the
/// signer/writable layout the header describes and every compiled index,
/// including those loaded from address lookup tables, is remapped.
pub fn append_fee_instruction(transaction: &mut VersionedTransaction, instruction: &Instruction) -> Result<()> {
    let required = match &mut transaction.message {
        VersionedMessage::Legacy(message) => append_compiled(
            &mut message.header,
            &mut message.account_keys,
            &mut message.instructions,
            0,
            instruction,
        )?,
        VersionedMessage::V0(message) => {
            let loaded: usize = message
                .address_table_lookups
                .iter()
                .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
                .sum();
            append_compiled(
                &mut message.header,
                &mut message.account_keys,
                &mut message.instructions,
                loaded,
                instruction,
            )?
        }
    };
    transaction.signatures = vec![Signature::default(); required];
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct KeyRole {
    signer: bool,
    writable: bool,
}

impl KeyRole {
    fn group(&self) -> u8 {
        match (self.signer, self.writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }
}

fn append_compiled(
    header: &mut MessageHeader,
    keys: &mut Vec<Pubkey>,
    instructions: &mut Vec<CompiledInstruction>,
    loaded_len: usize,
    instruction: &Instruction,
) -> Result<usize> {
    let old_len = keys.len();
    let signers = header.num_required_signatures as usize;
    let readonly_signed = header.num_readonly_signed_accounts as usize;
    let readonly_unsigned = header.num_readonly_unsigned_accounts as usize;
    if signers > old_len || readonly_signed > signers || readonly_unsigned > old_len - signers {
        return Err(SwapError::build("Malformed message header"));
    }

    let mut roles: Vec<KeyRole> = (0..old_len)
        .map(|i| {
            let signer = i < signers;
            let writable = if signer {
                i < signers - readonly_signed
            } else {
                i < old_len - readonly_unsigned
            };
            KeyRole { signer, writable }
        })
        .collect();
    let mut all_keys = keys.clone();

    let program_meta = AccountMeta::new_readonly(instruction.program_id, false);
    for meta in instruction.accounts.iter().chain(std::iter::once(&program_meta)) {
        match all_keys.iter().position(|k| *k == meta.pubkey) {
            Some(index) => {
                let role = &mut roles[index];
                if meta.is_signer && !role.signer {
                    return Err(SwapError::build(format!(
                        "Account {} would need a new signature",
                        meta.pubkey
                    )));
                }
                role.writable |= meta.is_writable;
            }
            None => {
                if meta.is_signer {
                    return Err(SwapError::build(format!(
                        "Account {} would need a new signature",
                        meta.pubkey
                    )));
                }
                all_keys.push(meta.pubkey);
                roles.push(KeyRole {
                    signer: false,
                    writable: meta.is_writable,
                });
            }
        }
    }

    let new_len = all_keys.len();
    if new_len + loaded_len > MAX_ACCOUNT_KEYS {
        return Err(SwapError::build(format!(
            "Account table overflow: {} static and {} loaded keys",
            new_len, loaded_len
        )));
    }

    // Stable sort keeps the fee payer first and the original relative order
    let mut order: Vec<usize> = (0..new_len).collect();
    order.sort_by_key(|&i| roles[i].group());
    let mut position = vec![0u8; new_len];
    for (new_index, &old_index) in order.iter().enumerate() {
        position[old_index] = new_index as u8;
    }

    let shift = new_len - old_len;
    let remap = |index: u8| -> u8 {
        let index = index as usize;
        if index < old_len {
            position[index]
        } else {
            (index + shift) as u8
        }
    };
    for compiled in instructions.iter_mut() {
        compiled.program_id_index = remap(compiled.program_id_index);
        for account in compiled.accounts.iter_mut() {
            *account = remap(*account);
        }
    }

    let index_of = |key: &Pubkey| -> u8 {
        let old_index = all_keys.iter().position(|k| k == key).unwrap_or_default();
        position[old_index]
    };
    instructions.push(CompiledInstruction {
        program_id_index: index_of(&instruction.program_id),
        accounts: instruction.accounts.iter().map(|m| index_of(&m.pubkey)).collect(),
        data: instruction.data.clone(),
    });

    *keys = order.iter().map(|&i| all_keys[i]).collect();
    let sorted: Vec<KeyRole> = order.iter().map(|&i| roles[i]).collect();
    header.num_required_signatures = sorted.iter().filter(|r| r.signer).count() as u8;
    header.num_readonly_signed_accounts = sorted.iter().filter(|r| r.signer && !r.writable).count() as u8;
    header.num_readonly_unsigned_accounts = sorted.iter().filter(|r| !r.signer && !r.writable).count() as u8;

    Ok(header.num_required_signatures as usize)
}

/// Decodes the fee transfers to `receiver` in `transaction`: native transfers
/// to the receiver and SPL `TransferChecked` into its associated token
/// account. Accounts loaded from lookup tables are not resolved.
pub fn fee_transfers(transaction: &VersionedTransaction, receiver: &Pubkey) -> Vec<DecodedFeeTransfer> {
    let keys = transaction.message.static_account_keys();
    let key_at = |index: u8| keys.get(index as usize).copied();

    transaction
        .message
        .instructions()
        .iter()
        .enumerate()
        .filter_map(|(instruction_index, ix)| {
            let program = key_at(ix.program_id_index)?;
            if program == system_program::ID {
                let lamports = match bincode::deserialize::<SystemInstruction>(&ix.data).ok()? {
                    SystemInstruction::Transfer { lamports } => lamports,
                    _ => return None,
                };
                let destination = key_at(*ix.accounts.get(1)?)?;
                (destination == *receiver).then_some(DecodedFeeTransfer {
                    asset: FeeAsset::Native,
                    destination,
                    amount_atomic: lamports,
                    instruction_index,
                })
            } else if program == TOKEN_PROGRAM_ID {
                if ix.data.len() != 10 || ix.data[0] != TRANSFER_CHECKED_TAG {
                    return None;
                }
                let mint = key_at(*ix.accounts.get(1)?)?;
                let destination = key_at(*ix.accounts.get(2)?)?;
                if destination != associated_token_address(receiver, &mint) {
                    return None;
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&ix.data[1..9]);
                Some(DecodedFeeTransfer {
                    asset: FeeAsset::Token {
                        mint,
                        decimals: ix.data[9],
                    },
                    destination,
                    amount_atomic: u64::from_le_bytes(raw),
                    instruction_index,
                })
            } else {
                None
            }
        })
        .collect()
}
