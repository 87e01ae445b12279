//! Operator tool for the rebalancing state store
//! Bootstraps the schema and singletons, manages coins, shows status

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use condex_state::config::{BootstrapSettings, DatabaseSettings};
use condex_state::database::*;
use condex_state::utils::logging;
use condex_state::{PgRepository, Stores};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "condex-admin", about = "Administer the index rebalancing state store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create tables and seed the index info and tick singletons
    Init {
        /// Start with rebalancing switched on
        #[arg(long)]
        active: bool,
    },
    /// Add a supported coin, optionally indexing it at a target weight
    AddCoin {
        ticker: String,
        #[arg(long)]
        percentage: Option<Decimal>,
    },
    /// Remove a coin together with its ticker, balance and index rows
    RemoveCoin { ticker: String },
    /// Print index, balances, locks and counters
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Release a coin lock left behind by a crashed coordinator
    Unlock { ticker: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let args = Args::parse();

    let settings = DatabaseSettings::from_env()?;
    let pool = PgRepository::create_pool(&settings).await?;
    let repo = PgRepository::new(pool);

    if let Command::Init { .. } = args.command {
        repo.ensure_schema().await?;
    }
    let stores = Stores::new(Arc::new(repo));
    stores.ping().await.context("Database connection test failed")?;

    match args.command {
        Command::Init { active } => init(&stores, active).await,
        Command::AddCoin { ticker, percentage } => add_coin(&stores, &ticker.to_uppercase(), percentage).await,
        Command::RemoveCoin { ticker } => remove_coin(&stores, &ticker.to_uppercase()).await,
        Command::Status { json } => status(&stores, json).await,
        Command::Unlock { ticker } => unlock(&stores, &ticker.to_uppercase()).await,
    }
}

async fn init(stores: &Stores, active: bool) -> Result<()> {
    let seed = BootstrapSettings::from_env()?;
    let info = IndexInfo {
        active,
        total_btc_val: Decimal::ZERO,
        total_usd_val: Decimal::ZERO,
        balance_threshold: seed.balance_threshold,
        order_timeout_secs: seed.order_timeout_secs,
        order_retry_amount: seed.order_retry_amount,
        rebalance_tick_setting: seed.rebalance_tick_setting,
    };

    match stores.info().create(&info).await? {
        CreateOutcome::Created => println!("✅ Index info created"),
        CreateOutcome::Duplicate => println!("Index info already present, left unchanged"),
    }
    match stores.ticks().create(0).await? {
        CreateOutcome::Created => println!("✅ Rebalance tick counter created"),
        CreateOutcome::Duplicate => println!("Rebalance tick counter already present, left unchanged"),
    }
    Ok(())
}

async fn add_coin(stores: &Stores, ticker: &str, percentage: Option<Decimal>) -> Result<()> {
    match stores.supported().create(ticker).await? {
        CreateOutcome::Created => println!("✅ {} is now supported", ticker),
        CreateOutcome::Duplicate => println!("{} was already supported", ticker),
    }

    if let Some(pct) = percentage {
        match stores.index().create(ticker, pct, Decimal::ZERO, SoftLockFlag::CLEAR).await? {
            CreateOutcome::Created => println!("✅ {} indexed at {}%", ticker, pct),
            CreateOutcome::Duplicate => bail!("{} is already in the index", ticker),
        }
    }
    Ok(())
}

async fn remove_coin(stores: &Stores, ticker: &str) -> Result<()> {
    match stores.supported().remove(ticker).await? {
        DeleteOutcome::Deleted => {
            println!("✅ {} removed", ticker);
            Ok(())
        }
        DeleteOutcome::NotFound => bail!("{} is not a supported coin", ticker),
    }
}

async fn unlock(stores: &Stores, ticker: &str) -> Result<()> {
    match stores.locks().release(ticker).await? {
        ReleaseOutcome::Released => println!("🔓 {} unlocked", ticker),
        ReleaseOutcome::NotHeld => println!("{} was not locked", ticker),
    }
    Ok(())
}

async fn status(stores: &Stores, as_json: bool) -> Result<()> {
    let info = stores.info().get().await?.into_option();
    let tick = stores.ticks().get().await?.into_option();
    let index = stores.index().get_all().await?;
    let tickers = stores.tickers().get_all().await?;
    let locks = stores.locks().held().await?;

    let mut balances = Vec::new();
    for coin in stores.supported().get_all().await? {
        if let Lookup::Found(balance) = stores.balances().get(&coin.ticker).await? {
            balances.push(balance);
        }
    }

    if as_json {
        let report = json!({
            "index_info": info,
            "rebalance_tick": tick,
            "index": index,
            "tickers": tickers,
            "balances": balances,
            "locks": locks,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match &info {
        Some(info) => {
            println!("📊 Index info");
            println!("   active:            {}", info.active);
            println!("   total:             {} BTC / {} USD", info.total_btc_val, info.total_usd_val);
            println!("   balance threshold: {}%", info.balance_threshold);
            println!("   order timeout:     {}s x{} retries", info.order_timeout_secs, info.order_retry_amount);
            println!("   ticks per pass:    {}", info.rebalance_tick_setting);
        }
        None => println!("Index info not initialised (run `condex-admin init`)"),
    }
    if let Some(tick) = tick {
        println!("   tick count:        {}", tick.tick_count);
    }

    println!("\n📈 Index ({} coins)", index.len());
    for coin in &index {
        let price = tickers.iter().find(|t| t.ticker == coin.ticker);
        println!(
            "   {:<8} target {:>6}%  distance {:>7}%  {}{}",
            coin.ticker,
            coin.desired_percentage,
            coin.distance_from_target,
            price.map(|t| format!("{} BTC", t.btc_val)).unwrap_or_else(|| "no price".to_string()),
            if coin.locked.is_set() { "  [flagged]" } else { "" },
        );
    }

    println!("\n💰 Balances");
    for balance in &balances {
        println!(
            "   {:<8} {} BTC (prior {}), {} USD, {} coins",
            balance.coin, balance.btc_balance, balance.prior_btc_balance, balance.usd_balance, balance.total_coins
        );
    }

    println!("\n🔒 Held locks ({})", locks.len());
    for lock in &locks {
        println!("   {:<8} since {}", lock.ticker, lock.locked_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
