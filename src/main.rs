use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info};

use swapseer::config::Settings;
use swapseer::monitoring::{
    check_aggregator_health, check_ledger_health, check_wallet_balance, init_logging, install_metrics_exporter,
    summarize, ComponentStatus,
};
use swapseer::types::{format_atomic, parse_ui_amount, NATIVE_DECIMALS};
use swapseer::{
    AggregatorApi, BalanceOracle, JitoRelay, JupiterClient, KeypairWallet, LedgerRpc, QuoteProvider, SolanaLedger,
    TradeEngine, TradeMode, TradeRequest, WalletCapability, WalletEvent,
};

#[derive(Parser)]
#[command(name = "swapseer")]
#[command(about = "Swap SOL and SPL tokens through Jupiter", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the best route for a trade without executing it
    Quote {
        #[arg(long)]
        mode: TradeMode,
        #[arg(long)]
        mint: String,
        /// Amount of the input asset, e.g. 0.5
        #[arg(long)]
        amount: String,
        #[arg(long)]
        slippage_bps: Option<u16>,
    },
    /// Spend SOL to buy a token
    Buy(TradeArgs),
    /// Sell a token for SOL
    Sell(TradeArgs),
    /// Show SOL and optional token balance of the configured wallet
    Balance {
        #[arg(long)]
        mint: Option<String>,
    },
    /// Check RPC, aggregator and wallet health once
    Health,
}

#[derive(clap::Args)]
struct TradeArgs {
    #[arg(long)]
    mint: String,
    #[arg(long)]
    amount: String,
    #[arg(long)]
    slippage_bps: Option<u16>,
    /// Priority fee (or relay tip) in lamports
    #[arg(long)]
    priority_fee: Option<u64>,
    /// Send through the public RPC even if a relay is configured
    #[arg(long)]
    no_anti_mev: bool,
}

fn parse_mint(raw: &str) -> Result<Pubkey> {
    Pubkey::from_str(raw.trim()).with_context(|| format!("Invalid mint address: {}", raw))
}

fn load_wallet(settings: &Settings) -> Result<KeypairWallet> {
    let key = settings
        .wallet_private_key
        .as_deref()
        .ok_or_else(|| anyhow!("WALLET_PRIVATE_KEY is not set"))?;
    Ok(KeypairWallet::from_base58(key)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::from_env().context("Failed to load configuration")?;
    let _guard = init_logging(&settings.log_dir, "debug", &settings.log_level)?;
    if let Some(addr) = &settings.metrics_addr {
        install_metrics_exporter(addr)?;
    }
    info!(rpc = %settings.solana_rpc_url, "Starting swapseer");

    let timeout = settings.request_timeout();
    let ledger: Arc<dyn LedgerRpc> = Arc::new(SolanaLedger::new(&settings.solana_rpc_url, timeout));
    let aggregator: Arc<dyn AggregatorApi> = Arc::new(
        JupiterClient::new(&settings.jupiter_api_url, timeout)?
            .with_price_api_url(&settings.jupiter_price_api_url)
            .with_token_api_url(&settings.jupiter_token_api_url),
    );

    match cli.command {
        Commands::Quote {
            mode,
            mint,
            amount,
            slippage_bps,
        } => {
            let mint = parse_mint(&mint)?;
            let oracle = BalanceOracle::new(ledger.clone(), aggregator.clone());
            let decimals = match mode {
                TradeMode::Buy => NATIVE_DECIMALS,
                TradeMode::Sell => oracle
                    .token_descriptor(&mint)
                    .await
                    .map(|d| d.decimals)
                    .ok_or_else(|| anyhow!("Unknown token {}", mint))?,
            };
            let provider = QuoteProvider::new(aggregator);
            let (input, output) = provider.pair_for(mode, mint);
            let quote = provider
                .get_quote(
                    input,
                    output,
                    parse_ui_amount(&amount, decimals)?,
                    slippage_bps.unwrap_or(settings.slippage_bps),
                )
                .await?;
            println!("route:         {}", quote.route.route_labels().join(" -> "));
            println!("in:            {} {}", quote.in_amount, quote.input_mint);
            println!("out:           {} {}", quote.out_amount, quote.output_mint);
            println!("min out:       {}", quote.other_amount_threshold);
            println!("price impact:  {:.4}%", quote.price_impact * 100.0);
        }
        Commands::Buy(args) => run_trade(&settings, ledger, aggregator, TradeMode::Buy, args).await?,
        Commands::Sell(args) => run_trade(&settings, ledger, aggregator, TradeMode::Sell, args).await?,
        Commands::Balance { mint } => {
            let wallet = load_wallet(&settings)?;
            let owner = wallet.pubkey();
            let mints = match mint {
                Some(m) => vec![parse_mint(&m)?],
                None => Vec::new(),
            };
            let oracle = BalanceOracle::new(ledger, aggregator).with_retry_policy(settings.retry_policy());
            let snapshot = oracle.refresh(&owner, &mints).await;
            if let Some(native) = &snapshot.native {
                println!("SOL:  {}", format_atomic(native.value, NATIVE_DECIMALS));
            }
            for (mint, reading) in &snapshot.tokens {
                let token = &reading.value;
                let label = token.symbol.clone().unwrap_or_else(|| mint.to_string());
                match token.usd_value {
                    Some(usd) => println!("{}: {} (${:.2})", label, format_atomic(token.balance, token.decimals), usd),
                    None => println!("{}: {}", label, format_atomic(token.balance, token.decimals)),
                }
            }
            for warning in &snapshot.warnings {
                eprintln!("warning: {}", warning);
            }
        }
        Commands::Health => {
            let mut checks = vec![
                check_ledger_health(ledger.as_ref()).await,
                check_aggregator_health(aggregator.as_ref()).await,
            ];
            if settings.wallet_private_key.is_some() {
                let wallet = load_wallet(&settings)?;
                checks.push(check_wallet_balance(ledger.as_ref(), &wallet.pubkey()).await);
            }
            for check in &checks {
                println!("{:<12} {:?}", check.name, check.status);
            }
            if let ComponentStatus::Error(msg) = summarize(&checks) {
                return Err(anyhow!(msg));
            }
        }
    }
    Ok(())
}

async fn run_trade(
    settings: &Settings,
    ledger: Arc<dyn LedgerRpc>,
    aggregator: Arc<dyn AggregatorApi>,
    mode: TradeMode,
    args: TradeArgs,
) -> Result<()> {
    let wallet: Arc<dyn WalletCapability> = Arc::new(load_wallet(settings)?);
    let mut builder = TradeEngine::builder(aggregator, ledger, settings.fee_receiver_pubkey()?)
        .with_settings(settings.trade_settings())
        .with_retry_policy(settings.retry_policy())
        .with_confirm_config(settings.confirm_config())
        .with_quote_ttl(settings.quote_ttl());
    if let Some(jito) = settings.jito_config() {
        builder = builder.with_relay(Arc::new(JitoRelay::new(&jito)?));
    }
    let engine = builder.build();
    engine.handle_wallet_event(WalletEvent::Connected(wallet));

    let mut request = TradeRequest::new(mode, parse_mint(&args.mint)?, args.amount, engine.settings());
    if let Some(bps) = args.slippage_bps {
        request = request.with_slippage_bps(bps);
    }
    if let Some(fee) = args.priority_fee {
        request = request.with_priority_fee(fee);
    }
    if args.no_anti_mev {
        request = request.with_anti_mev(false);
    }

    match engine.submit_trade(request).await {
        Ok(receipt) => {
            println!("confirmed:  {}", receipt.signature);
            println!("in:         {} {}", receipt.input_amount, receipt.input_mint);
            println!("quoted out: {} {}", receipt.output_amount, receipt.output_mint);
            println!("fee:        {}", receipt.fee_amount);
            Ok(())
        }
        Err(e) => {
            error!(kind = %e.kind(), "Trade failed: {}", e);
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}
