use std::{sync::Arc, time::Duration};

use chrono::{Datelike, Utc};
use clap::Parser;
use console::style;
use inflow_api::AppState;
use inflow_common::{cache_key, period::parse_year, text::mask_secret, Period};
use inflow_pipeline::{
    gap_fill::year_view,
    store::{FileStore, VolumeStore},
    PipelineOptions, VolumePipeline,
};
use inflow_utils::{
    alchemy::Alchemy,
    cache::TtlCache,
    config::Config,
    disk_storage::DiskStorageInterface,
    price_manager::{AlchemyPriceFeed, PriceManager},
};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};

mod cli;
mod error;
mod panic_hook;

use error::Result;

type Pipeline = VolumePipeline<Arc<Alchemy>, AlchemyPriceFeed, FileStore>;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    inflow_utils::log::init();
    panic_hook::set();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{} {err}", style("error:").red());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    cli.apply(&mut config)?;

    match cli.cmd {
        Commands::Refresh {
            year,
            force,
            from_block,
        } => refresh(&config, year, force, from_block).await,
        Commands::Serve { port } => serve(&config, port).await,
        Commands::Show { period, year } => show(&config, &period, year),
        Commands::Config => print_config(&config),
    }
}

fn year_or_current(year: Option<String>) -> Result<i32> {
    match year {
        Some(year) => Ok(parse_year(&year)?),
        None => Ok(Utc::now().year()),
    }
}

fn store(config: &Config) -> Result<FileStore> {
    let ttl = config.cache_ttl_secs.map(Duration::from_secs);
    Ok(FileStore::new(config.cache_dir()?, ttl))
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let alchemy = Arc::new(Alchemy::new(config.alchemy_api_key()?, &config.network));
    let prices = PriceManager::new(
        AlchemyPriceFeed::new(alchemy.clone()),
        config.price.clone(),
        Arc::new(TtlCache::new()),
    );

    Ok(VolumePipeline::new(
        alchemy,
        prices,
        store(config)?,
        PipelineOptions::from(&config.fetch),
        Arc::new(TtlCache::new()),
    ))
}

async fn refresh(
    config: &Config,
    year: Option<String>,
    force: bool,
    from_block: Option<u64>,
) -> Result<()> {
    let wallet = config.wallet_address()?;
    let year = year_or_current(year)?;
    let pipeline = build_pipeline(config)?;

    let outcome = pipeline
        .refresh_volume(&format!("{wallet:#x}"), &year.to_string(), from_block, force)
        .await?;

    match outcome.range {
        Some((from, to)) => println!(
            "Processed blocks {} to {}: {} new transactions",
            style(from).cyan(),
            style(to).cyan(),
            style(outcome.new_transactions).green()
        ),
        None => println!("No new blocks to process."),
    }
    if outcome.failed_ranges > 0 {
        println!(
            "{} {} block ranges failed and are fetched again on the next run",
            style("warning:").yellow(),
            outcome.failed_ranges
        );
    }
    if outcome.truncated_ranges > 0 {
        println!(
            "{} {} block ranges hit the page limit, raise fetch.max_pages to see all transfers",
            style("warning:").yellow(),
            outcome.truncated_ranges
        );
    }
    if let Some(err) = &outcome.cache_error {
        println!("{} {err}", style("warning:").yellow());
    }

    let stats = &outcome.cache.stats;
    println!(
        "{year}: {} incoming, {} outgoing, {} USD total, last block {}",
        stats.incoming_count,
        stats.outgoing_count,
        style(format!("{:.2}", stats.total_volume)).bold(),
        outcome.cache.block_info.last_processed_block
    );
    Ok(())
}

async fn serve(config: &Config, port: Option<u16>) -> Result<()> {
    let wallet = config.wallet_address()?;
    let pipeline = build_pipeline(config)?;
    let port = port.unwrap_or(config.server.port);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        signal.cancel();
    });

    inflow_api::serve(AppState::new(pipeline, wallet), port, shutdown).await?;
    Ok(())
}

fn show(config: &Config, period: &str, year: Option<String>) -> Result<()> {
    let wallet = config.wallet_address()?;
    let period = Period::parse(period)?;
    let year = year_or_current(year)?;

    let cache = store(config)?.get(&cache_key(&wallet, year))?;
    if cache.is_none() {
        println!(
            "{} no cached volume for {year}, run `inflow refresh` first",
            style("note:").yellow()
        );
    }

    let view = year_view(cache.as_ref(), period, year)?;
    for bucket in &view.data {
        let volume = match bucket.volume {
            Some(volume) => style(format!("{volume:>14.2}")).green(),
            None => style(format!("{:>14}", "-")).dim(),
        };
        println!("{}  {volume}", bucket.date);
    }
    println!(
        "{} {:.2} USD (last block {})",
        style("total").bold(),
        view.total,
        view.last_processed_block
    );
    Ok(())
}

fn print_config(config: &Config) -> Result<()> {
    println!("{} {}", style("config file:").bold(), Config::path()?.display());
    println!("{} {}", style("cache dir:").bold(), config.cache_dir()?.display());

    let mut shown = config.clone();
    shown.alchemy_api_key = shown.alchemy_api_key.map(|key| mask_secret(&key, 4));
    println!("\n{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
