// Shared test doubles for the ledger, aggregator, relay and wallet
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::{TransactionError, VersionedTransaction};

use swapseer::jupiter_client::{
    QuoteRequest, QuoteResponse, RoutePlan, SwapBuild, SwapBuildRequest, SwapInfo, TokenInfo,
};
use swapseer::ledger::{SendOptions, SignatureCommitment, SignatureState, TokenAmount};
use swapseer::submission::ConfirmConfig;
use swapseer::{
    AggregatorApi, AntiMevRelay, LedgerRpc, Result, RetryPolicy, SwapError, TradeEngine, TradeEngineBuilder,
    TradeSettings, WalletCapability, WalletEvent,
};

pub const SOL: u64 = 1_000_000_000;
pub const TOKEN_DECIMALS: u8 = 6;
pub const LAST_VALID_BLOCK_HEIGHT: u64 = 150;

// Helper to build a quote response for `request` paying out `out_amount`
pub fn quote_response(request: &QuoteRequest, out_amount: u64) -> QuoteResponse {
    QuoteResponse {
        input_mint: request.input_mint.to_string(),
        in_amount: request.amount.to_string(),
        output_mint: request.output_mint.to_string(),
        out_amount: out_amount.to_string(),
        other_amount_threshold: (out_amount as u128 * (10_000 - request.slippage_bps as u128) / 10_000).to_string(),
        swap_mode: "ExactIn".into(),
        slippage_bps: request.slippage_bps,
        platform_fee: None,
        price_impact_pct: "0.0012".into(),
        route_plan: vec![RoutePlan {
            swap_info: SwapInfo {
                amm_key: Pubkey::new_unique().to_string(),
                label: Some("Whirlpool".into()),
                input_mint: request.input_mint.to_string(),
                output_mint: request.output_mint.to_string(),
                in_amount: request.amount.to_string(),
                out_amount: out_amount.to_string(),
                fee_amount: "0".into(),
                fee_mint: request.input_mint.to_string(),
            },
            percent: 100,
        }],
        context_slot: Some(1),
        time_taken: Some(0.01),
        extra: HashMap::new(),
    }
}

// Helper to build an unsigned swap-like transaction with `payer` at index 0
pub fn swap_transaction(payer: &Pubkey) -> VersionedTransaction {
    let program = Pubkey::new_unique();
    let budget = Instruction {
        program_id: Pubkey::new_unique(),
        accounts: vec![],
        data: vec![2, 0, 0, 0],
    };
    let swap = Instruction {
        program_id: program,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(Pubkey::new_unique(), false),
            AccountMeta::new_readonly(Pubkey::new_unique(), false),
        ],
        data: vec![229, 23, 203, 151],
    };
    let message = Message::new_with_blockhash(&[budget, swap], Some(payer), &Hash::new_unique());
    VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::Legacy(message),
    }
}

pub fn encode_transaction(transaction: &VersionedTransaction) -> String {
    BASE64.encode(bincode::serialize(transaction).unwrap())
}

/// Aggregator that quotes 2x the input and builds a two-instruction swap.
pub struct MockAggregator {
    pub quotes: AtomicUsize,
    pub builds: AtomicUsize,
    pub last_valid_block_height: Option<u64>,
    pub omit_transaction: AtomicBool,
    /// Answer quotes with an empty route plan.
    pub no_route: AtomicBool,
}

impl MockAggregator {
    pub fn new() -> Self {
        Self {
            quotes: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            last_valid_block_height: Some(LAST_VALID_BLOCK_HEIGHT),
            omit_transaction: AtomicBool::new(false),
            no_route: AtomicBool::new(false),
        }
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AggregatorApi for MockAggregator {
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        let mut response = quote_response(request, request.amount * 2);
        if self.no_route.load(Ordering::SeqCst) {
            response.route_plan.clear();
            response.out_amount = "0".into();
        }
        Ok(response)
    }

    async fn build_swap(&self, _route: &QuoteResponse, request: &SwapBuildRequest) -> Result<SwapBuild> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.omit_transaction.load(Ordering::SeqCst) {
            return Ok(SwapBuild::default());
        }
        Ok(SwapBuild {
            swap_transaction: Some(encode_transaction(&swap_transaction(&request.user_public_key))),
            last_valid_block_height: self.last_valid_block_height,
            prioritization_fee_lamports: Some(request.prioritization.lamports()),
        })
    }

    async fn token_info(&self, mint: &Pubkey) -> Result<Option<TokenInfo>> {
        Ok(Some(TokenInfo {
            address: mint.to_string(),
            decimals: TOKEN_DECIMALS,
            name: "Test Token".into(),
            symbol: "TEST".into(),
            logo_uri: None,
            tags: None,
        }))
    }

    async fn price_usd(&self, _mint: &Pubkey) -> Result<Option<f64>> {
        Ok(Some(2.0))
    }
}

/// Scripted ledger. Block height advances by `height_step` per query;
/// signature statuses are served from `statuses`, then `None` forever.
/// The next `send_failures` sends fail with a transport error, and every
/// accepted send debits `send_debit` lamports from the native balance.
pub struct MockLedger {
    pub native_balance: AtomicU64,
    pub token_balance: AtomicU64,
    pub fail_balances: AtomicBool,
    pub balance_calls: AtomicUsize,
    pub balance_delay: Duration,
    pub block_height: AtomicU64,
    pub height_step: u64,
    pub statuses: Mutex<VecDeque<Option<SignatureState>>>,
    pub sends: AtomicUsize,
    pub send_failures: AtomicUsize,
    pub send_debit: AtomicU64,
    pub sent: Mutex<Vec<VersionedTransaction>>,
}

impl MockLedger {
    pub fn new(native_balance: u64) -> Self {
        Self {
            native_balance: AtomicU64::new(native_balance),
            token_balance: AtomicU64::new(0),
            fail_balances: AtomicBool::new(false),
            balance_calls: AtomicUsize::new(0),
            balance_delay: Duration::ZERO,
            block_height: AtomicU64::new(100),
            height_step: 0,
            statuses: Mutex::new(VecDeque::new()),
            sends: AtomicUsize::new(0),
            send_failures: AtomicUsize::new(0),
            send_debit: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_balance_delay(mut self, delay: Duration) -> Self {
        self.balance_delay = delay;
        self
    }

    pub fn with_height_step(mut self, step: u64) -> Self {
        self.height_step = step;
        self
    }

    pub fn with_token_balance(self, amount: u64) -> Self {
        self.token_balance.store(amount, Ordering::SeqCst);
        self
    }

    pub fn failing_sends(self, count: usize) -> Self {
        self.send_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn debiting(self, lamports: u64) -> Self {
        self.send_debit.store(lamports, Ordering::SeqCst);
        self
    }

    pub fn script_statuses(&self, statuses: Vec<Option<SignatureState>>) {
        *self.statuses.lock() = statuses.into();
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    async fn read_balance(&self) -> Result<()> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if !self.balance_delay.is_zero() {
            tokio::time::sleep(self.balance_delay).await;
        }
        if self.fail_balances.load(Ordering::SeqCst) {
            return Err(SwapError::Network("connection reset by peer".into()));
        }
        Ok(())
    }
}

pub fn confirmed() -> Option<SignatureState> {
    Some(SignatureState {
        commitment: SignatureCommitment::Confirmed,
        err: None,
    })
}

pub fn failed(err: TransactionError) -> Option<SignatureState> {
    Some(SignatureState {
        commitment: SignatureCommitment::Confirmed,
        err: Some(err),
    })
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn get_balance(&self, _owner: &Pubkey) -> Result<u64> {
        self.read_balance().await?;
        Ok(self.native_balance.load(Ordering::SeqCst))
    }

    async fn get_token_balance(&self, _owner: &Pubkey, _mint: &Pubkey) -> Result<TokenAmount> {
        self.read_balance().await?;
        Ok(TokenAmount {
            amount: self.token_balance.load(Ordering::SeqCst),
            decimals: TOKEN_DECIMALS,
        })
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64)> {
        Ok((Hash::new_unique(), self.block_height.load(Ordering::SeqCst) + 150))
    }

    async fn get_block_height(&self) -> Result<u64> {
        Ok(self.block_height.fetch_add(self.height_step, Ordering::SeqCst))
    }

    async fn send_transaction(&self, transaction: &VersionedTransaction, _options: SendOptions) -> Result<Signature> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SwapError::Network("connection reset by peer".into()));
        }
        self.sent.lock().push(transaction.clone());
        let debit = self.send_debit.load(Ordering::SeqCst);
        let _ = self
            .native_balance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| Some(b.saturating_sub(debit)));
        Ok(transaction.signatures[0])
    }

    async fn get_signature_status(&self, _signature: &Signature) -> Result<Option<SignatureState>> {
        Ok(self.statuses.lock().pop_front().flatten())
    }
}

/// Relay that accepts everything, or answers every send with `fail_status`.
#[derive(Default)]
pub struct MockRelay {
    pub sends: AtomicUsize,
    pub last_tip: AtomicU64,
    pub fail_status: Option<u16>,
}

impl MockRelay {
    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::default()
        }
    }
}

#[async_trait]
impl AntiMevRelay for MockRelay {
    async fn send_transaction(&self, transaction: &VersionedTransaction, tip_lamports: u64) -> Result<Signature> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.last_tip.store(tip_lamports, Ordering::SeqCst);
        if let Some(status) = self.fail_status {
            return Err(SwapError::api("jito", "Service Unavailable", Some(status)));
        }
        Ok(transaction.signatures[0])
    }
}

/// Keypair wallet that can be told to decline, or to take its time.
pub struct MockWallet {
    keypair: Keypair,
    pub reject: AtomicBool,
    pub sign_delay: Duration,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            keypair: Keypair::new(),
            reject: AtomicBool::new(false),
            sign_delay: Duration::ZERO,
        }
    }

    pub fn rejecting() -> Self {
        let wallet = Self::new();
        wallet.reject.store(true, Ordering::SeqCst);
        wallet
    }

    pub fn with_sign_delay(mut self, delay: Duration) -> Self {
        self.sign_delay = delay;
        self
    }
}

#[async_trait]
impl WalletCapability for MockWallet {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction> {
        if !self.sign_delay.is_zero() {
            tokio::time::sleep(self.sign_delay).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(SwapError::UserRejection);
        }
        VersionedTransaction::try_new(transaction.message, &[&self.keypair])
            .map_err(|e| SwapError::Internal(e.to_string()))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SwapError::UserRejection);
        }
        Ok(self.keypair.sign_message(message))
    }
}

pub fn fast_confirm() -> ConfirmConfig {
    ConfirmConfig {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

pub fn public_path_settings() -> TradeSettings {
    TradeSettings {
        anti_mev: false,
        ..TradeSettings::default()
    }
}

pub struct Harness {
    pub engine: TradeEngine,
    pub aggregator: Arc<MockAggregator>,
    pub ledger: Arc<MockLedger>,
    pub relay: Arc<MockRelay>,
    pub wallet: Arc<MockWallet>,
    pub fee_receiver: Pubkey,
}

// Helper to build an engine on the public path with a connected wallet
pub fn harness(ledger: MockLedger, wallet: MockWallet) -> Harness {
    build_harness(ledger, wallet, false, |builder| builder)
}

// Helper to build an engine with a relay and anti-MEV on by default
pub fn protected_harness(ledger: MockLedger, wallet: MockWallet) -> Harness {
    build_harness(ledger, wallet, true, |builder| builder)
}

// Public-path engine with extra builder settings applied last
pub fn harness_with(
    ledger: MockLedger,
    wallet: MockWallet,
    configure: impl FnOnce(TradeEngineBuilder) -> TradeEngineBuilder,
) -> Harness {
    build_harness(ledger, wallet, false, configure)
}

fn build_harness(
    ledger: MockLedger,
    wallet: MockWallet,
    with_relay: bool,
    configure: impl FnOnce(TradeEngineBuilder) -> TradeEngineBuilder,
) -> Harness {
    let aggregator = Arc::new(MockAggregator::new());
    let ledger = Arc::new(ledger);
    let relay = Arc::new(MockRelay::default());
    let wallet = Arc::new(wallet);
    let fee_receiver = Pubkey::new_unique();

    let settings = if with_relay {
        TradeSettings::default()
    } else {
        public_path_settings()
    };
    let mut builder = TradeEngine::builder(aggregator.clone(), ledger.clone(), fee_receiver)
        .with_settings(settings)
        .with_retry_policy(RetryPolicy::none())
        .with_confirm_config(fast_confirm())
        .with_balance_timeout(Duration::from_secs(1));
    if with_relay {
        builder = builder.with_relay(relay.clone());
    }
    let engine = configure(builder).build();
    let connected: Arc<dyn WalletCapability> = wallet.clone();
    engine.handle_wallet_event(WalletEvent::Connected(connected));

    Harness {
        engine,
        aggregator,
        ledger,
        relay,
        wallet,
        fee_receiver,
    }
}
