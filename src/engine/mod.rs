mod state;
pub mod validation;

pub use state::EngineState;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use swapseer_types::{TradeEvent, TradeStage};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::balance::{BalanceKey, BalanceOracle, BalanceSnapshot, BalanceValue};
use crate::error::{log_error, Result, RetryPolicy, SwapError};
use crate::fee::FeePolicy;
use crate::jupiter_client::{AggregatorApi, PrioritizationConfig};
use crate::ledger::LedgerRpc;
use crate::quote::{Quote, QuoteProvider, DEFAULT_QUOTE_TTL};
use crate::submission::{AntiMevRelay, ConfirmConfig, SubmissionChannel, SubmitOptions};
use crate::transaction_builder::TransactionBuilder;
use crate::types::{TradeMode, TradeReceipt, TradeRequest, TradeSettings, ValidatedTrade, NATIVE_DECIMALS};
use crate::wallet::{WalletCapability, WalletEvent};
use state::{Session, SessionFlag};

const EVENT_BUFFER: usize = 64;

/// Shared engine internals. Held behind an `Arc` so spawned trade tasks
/// outlive the caller's future.
struct EngineInner {
    /// Route quotes from the aggregator
    quotes: QuoteProvider,
    fees: FeePolicy,
    builder: TransactionBuilder,
    /// Signing handoff, broadcast and confirmation
    submission: SubmissionChannel,
    balances: BalanceOracle,
    settings: TradeSettings,
    session: Mutex<Session>,
    state_tx: watch::Sender<EngineState>,
    events: broadcast::Sender<TradeEvent>,
}

/// Trade execution engine: sequences quote, fee, build, sign, broadcast and
/// confirmation for one wallet session, one trade at a time.
#[derive(Clone)]
pub struct TradeEngine {
    inner: Arc<EngineInner>,
}

/// Configures and assembles a [`TradeEngine`].
pub struct TradeEngineBuilder {
    aggregator: Arc<dyn AggregatorApi>,
    ledger: Arc<dyn LedgerRpc>,
    fee_receiver: Pubkey,
    relay: Option<Arc<dyn AntiMevRelay>>,
    settings: TradeSettings,
    retry: RetryPolicy,
    confirm: ConfirmConfig,
    quote_ttl: Duration,
    balance_timeout: Duration,
}

impl TradeEngineBuilder {
    pub fn new(aggregator: Arc<dyn AggregatorApi>, ledger: Arc<dyn LedgerRpc>, fee_receiver: Pubkey) -> Self {
        Self {
            aggregator,
            ledger,
            fee_receiver,
            relay: None,
            settings: TradeSettings::default(),
            retry: RetryPolicy::default(),
            confirm: ConfirmConfig::default(),
            quote_ttl: DEFAULT_QUOTE_TTL,
            balance_timeout: Duration::from_secs(10),
        }
    }

    /// Enables the anti-MEV submission path
    pub fn with_relay(mut self, relay: Arc<dyn AntiMevRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_settings(mut self, settings: TradeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirm_config(mut self, confirm: ConfirmConfig) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_quote_ttl(mut self, quote_ttl: Duration) -> Self {
        self.quote_ttl = quote_ttl;
        self
    }

    pub fn with_balance_timeout(mut self, balance_timeout: Duration) -> Self {
        self.balance_timeout = balance_timeout;
        self
    }

    pub fn build(self) -> TradeEngine {
        let balances = BalanceOracle::new(self.ledger.clone(), self.aggregator.clone())
            .with_retry_policy(self.retry)
            .with_read_timeout(self.balance_timeout);
        let mut submission = SubmissionChannel::new(self.ledger.clone())
            .with_retry_policy(self.retry)
            .with_confirm_config(self.confirm);
        if let Some(relay) = self.relay {
            submission = submission.with_relay(relay);
        }
        let builder = TransactionBuilder::new(self.aggregator.clone(), self.ledger).with_quote_ttl(self.quote_ttl);
        let (state_tx, _) = watch::channel(EngineState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        TradeEngine {
            inner: Arc::new(EngineInner {
                quotes: QuoteProvider::new(self.aggregator),
                fees: FeePolicy::new(self.fee_receiver),
                builder,
                submission,
                balances,
                settings: self.settings,
                session: Mutex::new(Session::default()),
                state_tx,
                events,
            }),
        }
    }
}

/// Clears a session flag when dropped, whatever way the guarded operation
/// ends.
struct SessionGuard {
    inner: Arc<EngineInner>,
    flag: SessionFlag,
}

impl SessionGuard {
    /// Sets `flag` and publishes the resulting state.
    fn acquire(inner: &Arc<EngineInner>, session: &mut Session, flag: SessionFlag) -> Self {
        session.set(flag, true);
        inner.state_tx.send_replace(session.state());
        Self {
            inner: inner.clone(),
            flag,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut session = self.inner.session.lock();
        session.set(self.flag, false);
        let state = session.state();
        self.inner.state_tx.send_replace(state);
        debug!(flag = ?self.flag, state = %state, "Session flag released");
    }
}

impl TradeEngine {
    pub fn builder(
        aggregator: Arc<dyn AggregatorApi>,
        ledger: Arc<dyn LedgerRpc>,
        fee_receiver: Pubkey,
    ) -> TradeEngineBuilder {
        TradeEngineBuilder::new(aggregator, ledger, fee_receiver)
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TradeEvent> {
        self.inner.events.subscribe()
    }

    pub fn settings(&self) -> &TradeSettings {
        &self.inner.settings
    }

    pub fn balances(&self) -> &BalanceOracle {
        &self.inner.balances
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.inner.fees
    }

    /// Public key of the connected wallet.
    pub fn wallet(&self) -> Option<Pubkey> {
        self.inner.session.lock().wallet.as_ref().map(|w| w.pubkey())
    }

    /// Applies a wallet notification to the session.
    pub fn handle_wallet_event(&self, event: WalletEvent) {
        let mut session = self.inner.session.lock();
        let previous = session.wallet.as_ref().map(|w| w.pubkey());
        match event {
            WalletEvent::Connected(wallet) | WalletEvent::AccountChanged(wallet) => {
                let pubkey = wallet.pubkey();
                info!(wallet = %pubkey, previous = ?previous, "Wallet connected");
                session.switch_wallet(Some(wallet));
                if let Some(previous) = previous.filter(|p| *p != pubkey) {
                    self.inner.balances.clear_wallet(&previous);
                }
            }
            WalletEvent::Disconnected => {
                info!(wallet = ?previous, trading = session.trading, "Wallet disconnected");
                session.switch_wallet(None);
                if let Some(previous) = previous {
                    self.inner.balances.clear_wallet(&previous);
                }
            }
        }
        self.inner.state_tx.send_replace(session.state());
    }

    /// Feeds wallet events from `receiver` into the engine until the sender
    /// side is dropped.
    pub fn spawn_wallet_listener(&self, mut receiver: mpsc::Receiver<WalletEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                debug!(event = ?event, "Wallet event");
                engine.handle_wallet_event(event);
            }
            debug!("Wallet event stream closed");
        })
    }

    /// One-time authentication handshake: the wallet signs `message`.
    /// Connected → Signing → Signed, or back to Connected on rejection.
    pub async fn authenticate(&self, message: &[u8]) -> Result<Signature> {
        let (wallet, epoch, _guard) = {
            let mut session = self.inner.session.lock();
            let wallet = match session.state() {
                EngineState::Connected => session.wallet.clone().ok_or(SwapError::NotConnected)?,
                EngineState::Disconnected => return Err(SwapError::NotConnected),
                EngineState::Signed => return Err(SwapError::InvalidState("Wallet already authenticated".into())),
                EngineState::Signing => return Err(SwapError::InvalidState("Authentication in progress".into())),
                EngineState::Trading => return Err(SwapError::TradeInProgress),
            };
            let guard = SessionGuard::acquire(&self.inner, &mut session, SessionFlag::Signing);
            (wallet, session.epoch, guard)
        };

        let result = wallet.sign_message(message).await;

        let mut session = self.inner.session.lock();
        if session.epoch != epoch {
            return Err(SwapError::InvalidState("Wallet changed during authentication".into()));
        }
        match result {
            Ok(signature) if signature.verify(wallet.pubkey().as_ref(), message) => {
                session.authenticated = true;
                info!(wallet = %wallet.pubkey(), "Wallet authenticated");
                Ok(signature)
            }
            Ok(_) => Err(SwapError::InvalidState("Wallet returned an invalid signature".into())),
            Err(e) => {
                log_error(&e, "Authentication");
                Err(e)
            }
        }
        // The guard drops after the session lock is released and publishes
        // the resting state.
    }

    /// Quote for display; no state change.
    pub async fn request_quote(
        &self,
        input_mint: Pubkey,
        output_mint: Pubkey,
        amount_atomic: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        self.inner
            .quotes
            .get_quote(input_mint, output_mint, amount_atomic, slippage_bps)
            .await
    }

    /// Refreshes the native balance and, if given, one token balance.
    pub async fn refresh_balances(&self, token_mint: Option<Pubkey>) -> Result<BalanceSnapshot> {
        let wallet = self.wallet().ok_or(SwapError::NotConnected)?;
        let mints: Vec<Pubkey> = token_mint.into_iter().collect();
        Ok(self.inner.balances.refresh(&wallet, &mints).await)
    }

    /// Validates and executes a trade. Request checks run first; the trading
    /// slot is then reserved before the balance read, so a second call while
    /// a trade is validating or in flight is rejected with
    /// [`SwapError::TradeInProgress`] before any I/O.
    /// Once validation passes the trade runs on its own task, so dropping
    /// the returned future does not abandon confirmation.
    pub async fn submit_trade(&self, request: TradeRequest) -> Result<TradeReceipt> {
        validation::check_request(&request, self.inner.submission.has_relay()).map_err(|e| self.rejected(e))?;
        let (wallet, epoch, guard) = self.reserve_trade()?;
        // A balance rejection drops the guard and restores the resting state.
        let trade = self.validate(&request, &wallet.pubkey()).await?;

        if self.inner.session.lock().epoch != epoch {
            return Err(SwapError::InvalidState("Wallet changed during validation".into()));
        }

        let trade_id = Uuid::new_v4();
        let span = info_span!("trade", trade_id = %trade_id, mode = %trade.mode, wallet = %wallet.pubkey());
        let inner = self.inner.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                inner.run_trade(trade_id, trade, wallet).await
            }
            .instrument(span),
        );

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(SwapError::Internal(format!("Trade task failed: {}", e))),
        }
    }

    /// Checks the synchronous preconditions and takes the trading slot.
    fn reserve_trade(&self) -> Result<(Arc<dyn WalletCapability>, u64, SessionGuard)> {
        let mut session = self.inner.session.lock();
        match session.state() {
            EngineState::Disconnected => Err(SwapError::NotConnected),
            EngineState::Trading => Err(SwapError::TradeInProgress),
            EngineState::Signing => Err(SwapError::InvalidState("Wallet is signing a message".into())),
            EngineState::Connected | EngineState::Signed => {
                let wallet = session.wallet.clone().ok_or(SwapError::NotConnected)?;
                let epoch = session.epoch;
                let guard = SessionGuard::acquire(&self.inner, &mut session, SessionFlag::Trading);
                Ok((wallet, epoch, guard))
            }
        }
    }

    async fn validate(&self, request: &TradeRequest, wallet: &Pubkey) -> Result<ValidatedTrade> {
        self.validate_inner(request, wallet).await.map_err(|e| self.rejected(e))
    }

    fn rejected(&self, error: SwapError) -> SwapError {
        log_error(&error, "Trade validation");
        counter!("swapseer_trades_rejected_total", 1, "kind" => error.kind().as_str());
        error
    }

    async fn validate_inner(&self, request: &TradeRequest, wallet: &Pubkey) -> Result<ValidatedTrade> {
        let (input_mint, _) = validation::check_request(request, self.inner.submission.has_relay())?;
        let key = if input_mint == request.token_mint {
            BalanceKey::token(*wallet, input_mint)
        } else {
            BalanceKey::native(*wallet)
        };
        let (decimals, available) = match self.inner.balances.balance_for_validation(key).await? {
            BalanceValue::Native(lamports) => (NATIVE_DECIMALS, lamports),
            BalanceValue::Token(token) => (token.decimals, token.balance),
        };
        validation::validate_amount(request, &self.inner.settings, decimals, available)
    }
}

impl EngineInner {
    fn emit(&self, event: TradeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn run_trade(
        &self,
        trade_id: Uuid,
        trade: ValidatedTrade,
        wallet: Arc<dyn WalletCapability>,
    ) -> Result<TradeReceipt> {
        counter!("swapseer_trades_submitted_total", 1);
        self.emit(TradeEvent::new(
            trade_id,
            TradeStage::Validated,
            format!("{} {} of {}", trade.mode, trade.amount_atomic, trade.input_mint),
        ));

        let outcome = self.execute(trade_id, &trade, wallet.as_ref()).await;

        let token_mint = match trade.mode {
            TradeMode::Buy => trade.output_mint,
            TradeMode::Sell => trade.input_mint,
        };
        // The spent asset is no longer known; drop it before re-reading.
        self.balances.invalidate(&BalanceKey::native(wallet.pubkey()));
        self.balances.invalidate(&BalanceKey::token(wallet.pubkey(), token_mint));
        self.balances.spawn_refresh(wallet.pubkey(), vec![token_mint]);

        match &outcome {
            Ok(receipt) => {
                counter!("swapseer_trades_confirmed_total", 1);
                info!(signature = %receipt.signature, fee = receipt.fee_amount, "Trade confirmed");
                self.emit(
                    TradeEvent::new(trade_id, TradeStage::Confirmed, format!("out {}", receipt.output_amount))
                        .with_signature(receipt.signature),
                );
            }
            Err(e) => {
                counter!("swapseer_trades_failed_total", 1, "kind" => e.kind().as_str());
                log_error(e, "Trade");
                let mut event = TradeEvent::new(trade_id, TradeStage::Failed, e.kind().as_str());
                if let Some(signature) = e.signature() {
                    event = event.with_signature(signature);
                }
                self.emit(event);
            }
        }
        outcome
    }

    async fn execute(
        &self,
        trade_id: Uuid,
        trade: &ValidatedTrade,
        wallet: &dyn WalletCapability,
    ) -> Result<TradeReceipt> {
        let payer = wallet.pubkey();
        let quote = self
            .quotes
            .get_quote(trade.input_mint, trade.output_mint, trade.amount_atomic, trade.slippage_bps)
            .await?;
        self.emit(TradeEvent::new(
            trade_id,
            TradeStage::Quoted,
            format!("in {} out {} min {}", quote.in_amount, quote.out_amount, quote.other_amount_threshold),
        ));

        let fee = self
            .fees
            .fee_instruction(payer, trade.input_mint, trade.input_decimals, trade.amount_atomic);
        let prioritization = PrioritizationConfig::for_trade(trade.anti_mev, trade.priority_fee_atomic);
        let built = self.builder.build(quote, &payer, &fee, prioritization).await?;
        self.emit(TradeEvent::new(
            trade_id,
            TradeStage::Built,
            format!("fee {} last valid height {}", built.fee_amount, built.last_valid_block_height),
        ));

        let options = SubmitOptions {
            anti_mev: trade.anti_mev,
            tip_lamports: trade.priority_fee_atomic,
        };
        let signed = self.submission.sign(built.transaction, wallet).await?;
        let signature = signed.signatures[0];
        self.emit(TradeEvent::new(trade_id, TradeStage::Signed, "").with_signature(signature));

        self.submission.broadcast(&signed, options).await?;
        self.emit(
            TradeEvent::new(
                trade_id,
                TradeStage::Broadcast,
                if trade.anti_mev { "relay" } else { "rpc" },
            )
            .with_signature(signature),
        );

        let result = self
            .submission
            .confirm(signature, built.last_valid_block_height)
            .await?;
        if result.signature != signature {
            warn!(expected = %signature, got = %result.signature, "Confirmation for unexpected signature");
        }

        Ok(TradeReceipt {
            trade_id,
            signature,
            mode: trade.mode,
            input_mint: trade.input_mint,
            output_mint: trade.output_mint,
            input_amount: built.in_amount,
            output_amount: built.out_amount,
            fee_amount: built.fee_amount,
            confirmed_at: Utc::now(),
        })
    }
}
