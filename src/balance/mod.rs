use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, RetryPolicy, SwapError};
use crate::jupiter_client::AggregatorApi;
use crate::ledger::LedgerRpc;
use crate::types::{BalanceReading, TokenBalance, TokenDescriptor};

/// Identifies one balance: a wallet and either the native asset (`None`) or a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    pub wallet: Pubkey,
    pub mint: Option<Pubkey>,
}

impl BalanceKey {
    pub fn native(wallet: Pubkey) -> Self {
        Self { wallet, mint: None }
    }

    pub fn token(wallet: Pubkey, mint: Pubkey) -> Self {
        Self { wallet, mint: Some(mint) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BalanceValue {
    Native(u64),
    Token(TokenBalance),
}

impl BalanceValue {
    /// Atomic amount regardless of asset.
    pub fn atomic(&self) -> u64 {
        match self {
            BalanceValue::Native(lamports) => *lamports,
            BalanceValue::Token(token) => token.balance,
        }
    }
}

/// Result of a multi-balance refresh. Failures without a fallback value are
/// reported as warnings instead of failing the whole refresh.
#[derive(Debug, Clone, Default)]
pub struct BalanceSnapshot {
    pub native: Option<BalanceReading<u64>>,
    pub tokens: HashMap<Pubkey, BalanceReading<TokenBalance>>,
    pub warnings: Vec<String>,
}

type SharedQuery = Shared<BoxFuture<'static, Result<BalanceValue>>>;

struct OracleInner {
    ledger: Arc<dyn LedgerRpc>,
    aggregator: Arc<dyn AggregatorApi>,
    retry: RetryPolicy,
    read_timeout: Duration,
    /// Last known value per key.
    cache: DashMap<BalanceKey, BalanceValue>,
    /// Token metadata, immutable once fetched.
    descriptors: DashMap<Pubkey, TokenDescriptor>,
    /// At most one outstanding query per key.
    in_flight: Mutex<HashMap<BalanceKey, SharedQuery>>,
    /// Bumped by `clear_wallet`; queries started under an older value
    /// must not write back.
    generations: DashMap<Pubkey, u64>,
}

/// Reads native and token balances for a wallet with single-flight
/// deduplication and stale-while-revalidate fallback.
#[derive(Clone)]
pub struct BalanceOracle {
    inner: Arc<OracleInner>,
}

impl std::fmt::Debug for BalanceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceOracle")
            .field("cached", &self.inner.cache.len())
            .field("retry", &self.inner.retry)
            .finish()
    }
}

impl BalanceOracle {
    pub fn new(ledger: Arc<dyn LedgerRpc>, aggregator: Arc<dyn AggregatorApi>) -> Self {
        Self {
            inner: Arc::new(OracleInner {
                ledger,
                aggregator,
                retry: RetryPolicy::default(),
                read_timeout: Duration::from_secs(10),
                cache: DashMap::new(),
                descriptors: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
                generations: DashMap::new(),
            }),
        }
    }

    /// Builder-style configuration; only valid before the oracle is shared.
    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        self.reconfigure(|inner| inner.retry = retry)
    }

    pub fn with_read_timeout(self, read_timeout: Duration) -> Self {
        self.reconfigure(|inner| inner.read_timeout = read_timeout)
    }

    fn reconfigure(self, apply: impl FnOnce(&mut OracleInner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self { inner: Arc::new(inner) }
            }
            Err(shared) => {
                warn!("BalanceOracle already shared, configuration change ignored");
                Self { inner: shared }
            }
        }
    }

    /// Native balance in lamports.
    pub async fn native_balance(&self, wallet: &Pubkey) -> Result<BalanceReading<u64>> {
        let reading = self.refresh_key(BalanceKey::native(*wallet)).await?;
        match reading.value {
            BalanceValue::Native(lamports) => Ok(BalanceReading {
                value: lamports,
                stale: reading.stale,
                warning: reading.warning,
            }),
            BalanceValue::Token(_) => Err(SwapError::Internal("Native key resolved to token balance".into())),
        }
    }

    /// Token balance with metadata and USD value.
    pub async fn token_balance(&self, wallet: &Pubkey, mint: &Pubkey) -> Result<BalanceReading<TokenBalance>> {
        let reading = self.refresh_key(BalanceKey::token(*wallet, *mint)).await?;
        match reading.value {
            BalanceValue::Token(token) => Ok(BalanceReading {
                value: token,
                stale: reading.stale,
                warning: reading.warning,
            }),
            BalanceValue::Native(_) => Err(SwapError::Internal("Token key resolved to native balance".into())),
        }
    }

    /// Refreshes the native balance and every listed mint concurrently.
    pub async fn refresh(&self, wallet: &Pubkey, mints: &[Pubkey]) -> BalanceSnapshot {
        let native = self.native_balance(wallet);
        let tokens = future::join_all(mints.iter().map(|mint| async move {
            (*mint, self.token_balance(wallet, mint).await)
        }));
        let (native, tokens) = future::join(native, tokens).await;

        let mut snapshot = BalanceSnapshot::default();
        match native {
            Ok(reading) => {
                if let Some(warning) = &reading.warning {
                    snapshot.warnings.push(warning.clone());
                }
                snapshot.native = Some(reading);
            }
            Err(e) => snapshot.warnings.push(format!("Native balance unavailable: {}", e)),
        }
        for (mint, result) in tokens {
            match result {
                Ok(reading) => {
                    if let Some(warning) = &reading.warning {
                        snapshot.warnings.push(warning.clone());
                    }
                    snapshot.tokens.insert(mint, reading);
                }
                Err(e) => snapshot.warnings.push(format!("Balance for {} unavailable: {}", mint, e)),
            }
        }
        snapshot
    }

    /// Last known value without any network I/O.
    pub fn cached(&self, key: &BalanceKey) -> Option<BalanceValue> {
        self.inner.cache.get(key).map(|entry| entry.value().clone())
    }

    pub fn cached_native(&self, wallet: &Pubkey) -> Option<u64> {
        self.cached(&BalanceKey::native(*wallet)).map(|v| v.atomic())
    }

    pub fn cached_token(&self, wallet: &Pubkey, mint: &Pubkey) -> Option<TokenBalance> {
        match self.cached(&BalanceKey::token(*wallet, *mint)) {
            Some(BalanceValue::Token(token)) => Some(token),
            _ => None,
        }
    }

    /// Balance for pre-trade validation: a fresh read bounded by the read
    /// timeout. The last known value is used only when that read fails.
    pub async fn balance_for_validation(&self, key: BalanceKey) -> Result<BalanceValue> {
        match tokio::time::timeout(self.inner.read_timeout, self.refresh_key(key)).await {
            Ok(reading) => reading.map(|r| r.value),
            Err(_) => {
                let timed_out = SwapError::Network(format!(
                    "Balance query for {} timed out after {:?}",
                    key.wallet, self.inner.read_timeout
                ));
                match self.cached(&key) {
                    Some(last_known) => {
                        warn!(wallet = %key.wallet, mint = ?key.mint, "{}, validating against last known value", timed_out);
                        Ok(last_known)
                    }
                    None => Err(timed_out),
                }
            }
        }
    }

    /// Forgets the last known value for one key.
    pub fn invalidate(&self, key: &BalanceKey) {
        self.inner.cache.remove(key);
    }

    /// Metadata for a mint, fetched once and then served from memory.
    pub async fn token_descriptor(&self, mint: &Pubkey) -> Option<TokenDescriptor> {
        self.inner.descriptor(mint).await
    }

    /// Drops cached values and outstanding queries for a wallet, e.g. on
    /// account change. Queries already running finish for their callers but
    /// no longer write back.
    pub fn clear_wallet(&self, wallet: &Pubkey) {
        let mut in_flight = self.inner.in_flight.lock();
        *self.inner.generations.entry(*wallet).or_insert(0) += 1;
        in_flight.retain(|key, _| key.wallet != *wallet);
        self.inner.cache.retain(|key, _| key.wallet != *wallet);
    }

    /// Starts the timer-driven refresh. Abort the handle to stop it.
    pub fn spawn_refresh_loop(&self, wallet: Pubkey, mints: Vec<Pubkey>, period: Duration) -> JoinHandle<()> {
        let oracle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(wallet = %wallet, tokens = mints.len(), period = ?period, "Balance refresh loop started");
            loop {
                ticker.tick().await;
                let snapshot = oracle.refresh(&wallet, &mints).await;
                for warning in &snapshot.warnings {
                    warn!(target: "balance", wallet = %wallet, "{}", warning);
                }
            }
        })
    }

    /// One-shot background refresh, used after a trade settles.
    pub fn spawn_refresh(&self, wallet: Pubkey, mints: Vec<Pubkey>) -> JoinHandle<()> {
        let oracle = self.clone();
        tokio::spawn(async move {
            let snapshot = oracle.refresh(&wallet, &mints).await;
            debug!(wallet = %wallet, warnings = snapshot.warnings.len(), "Post-trade balance refresh done");
        })
    }

    async fn refresh_key(&self, key: BalanceKey) -> Result<BalanceReading<BalanceValue>> {
        match self.query(key).await {
            Ok(value) => Ok(BalanceReading::fresh(value)),
            Err(e) => match self.cached(&key) {
                Some(last_known) => {
                    warn!(wallet = %key.wallet, mint = ?key.mint, error = %e, "Balance refresh failed, serving last known value");
                    Ok(BalanceReading::stale(last_known, format!("Balance may be outdated: {}", e)))
                }
                None => Err(e),
            },
        }
    }

    /// Returns the in-flight query for `key`, starting one if none exists.
    fn query(&self, key: BalanceKey) -> SharedQuery {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.get(&key) {
            debug!(wallet = %key.wallet, mint = ?key.mint, "Attaching to in-flight balance query");
            return existing.clone();
        }

        let inner = self.inner.clone();
        let generation = inner.generation(&key.wallet);
        let query = async move {
            let result = inner.fetch(key).await;
            {
                let mut in_flight = inner.in_flight.lock();
                if inner.generation(&key.wallet) == generation {
                    if let Ok(value) = &result {
                        inner.cache.insert(key, value.clone());
                    }
                    in_flight.remove(&key);
                }
            }
            result
        }
        .boxed()
        .shared();
        in_flight.insert(key, query.clone());
        query
    }
}

impl OracleInner {
    fn generation(&self, wallet: &Pubkey) -> u64 {
        self.generations.get(wallet).map(|g| *g).unwrap_or(0)
    }

    async fn fetch(&self, key: BalanceKey) -> Result<BalanceValue> {
        let ledger = &self.ledger;
        let wallet = key.wallet;
        match key.mint {
            None => {
                let lamports = self.retry.run(|| async move { ledger.get_balance(&wallet).await }).await?;
                Ok(BalanceValue::Native(lamports))
            }
            Some(mint) => {
                let amount = self
                    .retry
                    .run(|| async move { ledger.get_token_balance(&wallet, &mint).await })
                    .await?;
                let symbol = self.descriptor(&mint).await.and_then(|d| d.symbol);
                let mut balance = TokenBalance {
                    mint,
                    balance: amount.amount,
                    decimals: amount.decimals,
                    symbol,
                    usd_value: None,
                };
                balance.usd_value = match self.aggregator.price_usd(&mint).await {
                    Ok(Some(price)) => Some(balance.ui_amount() * price),
                    Ok(None) => None,
                    Err(e) => {
                        debug!(mint = %mint, error = %e, "Price unavailable for USD value");
                        None
                    }
                };
                Ok(BalanceValue::Token(balance))
            }
        }
    }

    async fn descriptor(&self, mint: &Pubkey) -> Option<TokenDescriptor> {
        if let Some(descriptor) = self.descriptors.get(mint) {
            return Some(descriptor.value().clone());
        }
        match self.aggregator.token_info(mint).await {
            Ok(Some(info)) => {
                let descriptor = TokenDescriptor {
                    mint: *mint,
                    decimals: info.decimals,
                    symbol: Some(info.symbol),
                };
                self.descriptors.insert(*mint, descriptor.clone());
                Some(descriptor)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(mint = %mint, error = %e, "Token metadata unavailable");
                None
            }
        }
    }
}
