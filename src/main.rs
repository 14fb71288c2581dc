//! pricer - multi-venue swap quotes from the command line
//!
//! Run with: cargo run -- quote WETH WBTC 1.5
//!
//! Market state comes from `--snapshot <file>` or, without it, from the RPC
//! in RPC_URL pinned to `--block` (latest by default).

use alloy_primitives::utils::{format_units, parse_units};
use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onchain_pricer::config::MAX_BPS;
use onchain_pricer::oracle::TwapGuard;
use onchain_pricer::snapshot::{FileSnapshotSource, RpcSnapshotSource, SnapshotSource};
use onchain_pricer::tokens::{self, BTC_DENOMINATION, ETH_DENOMINATION, USD_DENOMINATION};
use onchain_pricer::{MarketSnapshot, OnChainPricer, PricerConfig, SwapExecutor, SwapRequest};

#[derive(Parser)]
#[command(name = "pricer", version, about = "Best swap route across Uniswap, SushiSwap and Balancer")]
struct Cli {
    /// JSON market snapshot to price against (RPC otherwise)
    #[arg(short, long, global = true)]
    snapshot: Option<PathBuf>,

    /// Block to pin RPC reads to
    #[arg(short, long, global = true)]
    block: Option<u64>,

    /// TOML configuration file (environment otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Best route for selling AMOUNT of SELL for BUY
    Quote {
        sell: String,
        buy: String,
        /// Human units, e.g. 1.5
        amount: String,

        /// Also report what the search touched
        #[arg(long)]
        probe: bool,
    },

    /// Oracle prices for the given tokens
    Feeds {
        tokens: Vec<String>,
    },

    /// TWAP guard verdict for every V3 pool of a pair
    Twap {
        token_a: String,
        token_b: String,
    },

    /// Execute the best route against the snapshot and print the calldata
    Execute {
        sell: String,
        buy: String,
        amount: String,

        /// Accepted output below the quote, in bps
        #[arg(long, default_value_t = 50)]
        max_slippage_bps: u32,

        #[arg(long)]
        recipient: Option<String>,

        /// Seconds after the snapshot timestamp
        #[arg(long, default_value_t = 600)]
        deadline_secs: u64,

        /// Write the post-trade snapshot here
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Fetch a snapshot from the RPC and write it as JSON
    Fetch {
        /// Output file
        #[arg(short, long, default_value = "./snapshots/latest.json")]
        out: PathBuf,

        /// Tokens to include (the known token table when empty)
        tokens: Vec<String>,
    },
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 📈 ON-CHAIN PRICER - Multi-Venue Route Selection").cyan().bold()
    );
    println!(
        "{}",
        style("    UniV2 | Sushi | UniV3 | Balancer | Chainlink | TWAP Guard").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn token(input: &str) -> Result<Address> {
    tokens::parse_token(input).ok_or_else(|| eyre!("Unknown token: {}", input))
}

fn amount(input: &str, decimals: u8) -> Result<U256> {
    Ok(parse_units(input, decimals)
        .map_err(|e| eyre!("Invalid amount {}: {}", input, e))?
        .get_absolute())
}

fn human(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}

async fn load_snapshot(cli: &Cli, config: &PricerConfig, universe: Vec<Address>) -> Result<MarketSnapshot> {
    match &cli.snapshot {
        Some(path) => FileSnapshotSource::new(path).load().await,
        None => RpcSnapshotSource::new(config, universe, cli.block).load().await,
    }
}

fn load_config(cli: &Cli) -> Result<PricerConfig> {
    let config = match &cli.config {
        Some(path) => PricerConfig::from_file(path)?,
        None => PricerConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn quote(cli: &Cli, config: &PricerConfig, sell: &str, buy: &str, raw_amount: &str, probe: bool) -> Result<()> {
    let (sell, buy) = (token(sell)?, token(buy)?);
    let snapshot = load_snapshot(cli, config, vec![sell, buy]).await?;
    let amount_in = amount(raw_amount, snapshot.decimals(&sell))?;

    let start = Instant::now();
    let pricer = OnChainPricer::new(&snapshot, config);
    let (report, best) = if probe {
        let (report, best) = pricer.unsafe_find_executable_swap(&sell, &buy, amount_in)?;
        (Some(report), best)
    } else {
        (None, pricer.find_optimal_swap(&sell, &buy, amount_in)?)
    };
    let elapsed = start.elapsed();

    let buy_decimals = snapshot.decimals(&buy);
    println!(
        "{} {} {} → {} {}",
        style("Quote").bold(),
        raw_amount,
        snapshot.symbol(&sell),
        style(human(best.amount_out, buy_decimals)).green().bold(),
        snapshot.symbol(&buy)
    );
    println!("  Venue:     {} (id {})", best.venue, best.venue.id());
    println!("  Route:     {}", best.quote.route);
    println!("  Gas:       {}", best.quote.gas_estimate);
    if !best.quote.fee_tiers.is_empty() {
        println!("  Fee tiers: {:?}", best.quote.fee_tiers);
    }

    let feed = match best.oracle_estimate {
        Some(estimate) => estimate,
        None => pricer.try_quote_with_feed(&sell, &buy, amount_in),
    };
    if feed.is_zero() {
        println!("  Feed:      {}", style("unavailable").dim());
    } else {
        println!("  Feed:      {} {}", human(feed, buy_decimals), snapshot.symbol(&buy));
    }

    if let Some(report) = report {
        println!(
            "  Probe:     {} venues, {} v3 pools, {} steps, {} TWAP checks, ~{} gas",
            report.venues_queried,
            report.v3_pools_simulated,
            report.v3_steps,
            report.twap_checks,
            report.gas_equivalent()
        );
    }
    info!("Quoted in {:?}", elapsed);
    Ok(())
}

async fn feeds(cli: &Cli, config: &PricerConfig, symbols: &[String]) -> Result<()> {
    let assets = if symbols.is_empty() {
        tokens::known_tokens().iter().map(|t| t.address).collect()
    } else {
        symbols.iter().map(|s| token(s)).collect::<Result<Vec<_>>>()?
    };
    let snapshot = load_snapshot(cli, config, assets.clone()).await?;
    let pricer = OnChainPricer::new(&snapshot, config);
    let oracle = pricer.oracle();

    let show = |value: onchain_pricer::PricingResult<U256>, decimals: u8| match value {
        Ok(v) if v.is_zero() => style("-".to_string()).dim().to_string(),
        Ok(v) => human(v, decimals),
        Err(e) => style(e.to_string()).red().to_string(),
    };

    println!("{}", style(format!("Feeds at block {}", snapshot.block_number)).bold());
    println!("  ETH/USD: {}", show(oracle.get_eth_usd_price(), 8));
    println!("  BTC/USD: {}", show(oracle.get_btc_usd_price(), 8));
    if let Some(round) = oracle.latest_round_data(&BTC_DENOMINATION, &ETH_DENOMINATION) {
        println!("  BTC/ETH: {} (round at {})", round.answer, round.updated_at);
    }
    println!();

    for asset in &assets {
        let decimals_for = |quote: &Address| {
            oracle
                .latest_round_data(&tokens::feed_denomination(asset), quote)
                .map(|r| r.decimals)
                .unwrap_or(18)
        };
        println!("  {}", style(snapshot.symbol(asset)).bold());
        println!("    USD:   {}", show(oracle.get_price_in_usd(asset), decimals_for(&USD_DENOMINATION)));
        println!("    ETH:   {}", show(oracle.get_price_in_eth(asset), decimals_for(&ETH_DENOMINATION)));
        println!("    BTC:   {}", show(oracle.get_price_in_btc(asset), decimals_for(&BTC_DENOMINATION)));
        println!("    → USD: {}", show(oracle.fetch_usd_feed(asset), 8));
    }
    Ok(())
}

async fn twap(cli: &Cli, config: &PricerConfig, a: &str, b: &str) -> Result<()> {
    let (a, b) = (token(a)?, token(b)?);
    let snapshot = load_snapshot(cli, config, vec![a, b]).await?;
    let guard = TwapGuard::from(config);

    let mut found = false;
    for pool in snapshot.v3_pools_for(&a, &b) {
        found = true;
        let verdict = guard.evaluate(pool, pool.liquidity, snapshot.timestamp);
        let status = if verdict.trusted {
            style("✅ trusted").green()
        } else {
            style("❌ untrusted").red()
        };
        println!("{:?} fee {}: {} ({})", pool.address, pool.fee, status, verdict.reason);
        println!(
            "  raw price {:.6e} {} per {}",
            pool.price_f64(),
            snapshot.symbol(&pool.token1),
            snapshot.symbol(&pool.token0)
        );
        println!(
            "  tick {} vs twap {:?} | liquidity {} vs mean {:?} ({:?} bps)",
            verdict.current_tick, verdict.twap_tick, pool.liquidity, verdict.mean_liquidity, verdict.liquidity_step_bps
        );
    }
    if !found {
        println!("{}", style("No Uniswap V3 pools for this pair").yellow());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    cli: &Cli,
    config: &PricerConfig,
    sell: &str,
    buy: &str,
    raw_amount: &str,
    max_slippage_bps: u32,
    recipient: Option<&str>,
    deadline_secs: u64,
    save: Option<&PathBuf>,
) -> Result<()> {
    let (sell, buy) = (token(sell)?, token(buy)?);
    let recipient = match recipient {
        Some(r) => r.parse::<Address>().map_err(|e| eyre!("Invalid recipient {}: {}", r, e))?,
        None => Address::ZERO,
    };
    let mut snapshot = load_snapshot(cli, config, vec![sell, buy]).await?;
    let amount_in = amount(raw_amount, snapshot.decimals(&sell))?;

    let quoted = OnChainPricer::new(&snapshot, config).find_optimal_swap(&sell, &buy, amount_in)?;
    let keep = MAX_BPS.saturating_sub(max_slippage_bps);
    let min_amount_out = quoted.amount_out * U256::from(keep) / U256::from(MAX_BPS);

    let request = SwapRequest {
        sell,
        buy,
        amount_in,
        min_amount_out,
        recipient,
        deadline: snapshot.timestamp + deadline_secs,
    };
    let receipt = SwapExecutor::new(config.clone()).execute(&mut snapshot, &request)?;

    let buy_decimals = snapshot.decimals(&buy);
    println!("{}", style("Executed against snapshot").green().bold());
    println!("  Venue:   {}", receipt.venue);
    println!("  Route:   {}", receipt.route);
    println!("  Out:     {} {}", human(receipt.amount_out, buy_decimals), snapshot.symbol(&buy));
    println!("  Minimum: {} {}", human(min_amount_out, buy_decimals), snapshot.symbol(&buy));
    println!("  Gas:     {}", receipt.gas_estimate);
    println!("  To:      {:?}", receipt.calldata.to);
    println!("  Data:    0x{}", hex::encode(&receipt.calldata.data));

    if let Some(path) = save {
        snapshot.save_to_file(path)?;
        println!("  Saved post-trade snapshot to {}", path.display());
    }
    Ok(())
}

async fn fetch(cli: &Cli, config: &PricerConfig, out: &PathBuf, symbols: &[String]) -> Result<()> {
    let universe = if symbols.is_empty() {
        tokens::known_tokens().iter().map(|t| t.address).collect()
    } else {
        symbols.iter().map(|s| token(s)).collect::<Result<Vec<_>>>()?
    };
    let snapshot = RpcSnapshotSource::new(config, universe, cli.block).load().await?;
    snapshot.save_to_file(out)?;
    println!("{} {}", style("Saved").green().bold(), out.display());
    println!("  {}", snapshot.summary());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("onchain_pricer=info".parse()?)
                .add_directive("pricer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    print_banner();

    match &cli.command {
        Commands::Quote { sell, buy, amount, probe } => quote(&cli, &config, sell, buy, amount, *probe).await,
        Commands::Feeds { tokens } => feeds(&cli, &config, tokens).await,
        Commands::Twap { token_a, token_b } => twap(&cli, &config, token_a, token_b).await,
        Commands::Execute {
            sell,
            buy,
            amount,
            max_slippage_bps,
            recipient,
            deadline_secs,
            save,
        } => {
            execute(
                &cli,
                &config,
                sell,
                buy,
                amount,
                *max_slippage_bps,
                recipient.as_deref(),
                *deadline_secs,
                save.as_ref(),
            )
            .await
        }
        Commands::Fetch { out, tokens } => fetch(&cli, &config, out, tokens).await,
    }
}
