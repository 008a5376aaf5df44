use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use chrono::Utc;
use inflow_common::{cache_key, period::parse_year, Direction, TransferCategory, VolumeCache};
use inflow_utils::{
    alloy::StringExt,
    cache::TtlCache,
    config::FetchConfig,
    price_manager::{PriceFeed, PriceManager},
};

use crate::{
    aggregator::aggregate,
    block_finder::BlockFinder,
    fetcher::{BlockRangeFetcher, FetchOptions, FetchReport},
    normalizer::{Normalizer, UNKNOWN_TOKEN},
    provider::TransferProvider,
    retry::with_retry,
    store::VolumeStore,
    PipelineError,
};

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOptions {
    pub fetch: FetchOptions,
    /// Blocks this close to the head are left for a later run.
    pub safety_buffer: u64,
    pub categories: Vec<TransferCategory>,
    pub block_cache_ttl: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for PipelineOptions {
    fn from(config: &FetchConfig) -> Self {
        let mut categories = vec![TransferCategory::External, TransferCategory::Erc20];
        if config.include_internal {
            categories.push(TransferCategory::Internal);
        }
        Self {
            fetch: FetchOptions::from(config),
            safety_buffer: config.safety_buffer,
            categories,
            block_cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub key: String,
    pub cache: VolumeCache,
    /// Blocks fetched during this run, `None` when there was nothing new.
    pub range: Option<(u64, u64)>,
    pub new_transactions: usize,
    pub skipped_transfers: usize,
    pub failed_ranges: usize,
    pub truncated_ranges: usize,
    /// Set when the cache could not be read or written; `cache` is still current.
    pub cache_error: Option<PipelineError>,
}

/// Fetches, prices, aggregates and persists the inflow volume of a wallet.
pub struct VolumePipeline<P, F, S> {
    provider: P,
    prices: PriceManager<F>,
    store: S,
    options: PipelineOptions,
    block_times: Arc<TtlCache<i64>>,
}

impl<P, F, S> VolumePipeline<P, F, S> {
    pub fn new(
        provider: P,
        prices: PriceManager<F>,
        store: S,
        options: PipelineOptions,
        block_times: Arc<TtlCache<i64>>,
    ) -> Self {
        Self {
            provider,
            prices,
            store,
            options,
            block_times,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }
}

impl<P, F, S> VolumePipeline<P, F, S>
where
    P: TransferProvider,
    F: PriceFeed,
    S: VolumeStore,
{

    fn parse_wallet(wallet: &str) -> crate::Result<Address> {
        if wallet.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "wallet address is not set".to_string(),
            ));
        }
        wallet
            .parse_as_address()
            .map_err(|e| PipelineError::Configuration(e.to_string()))
    }

    /// Brings the cached volume of `wallet` for `year` up to date.
    ///
    /// Blocks after `last_processed_block` (or the cached one) are fetched,
    /// unless `force_refresh` asks for the whole year to be rebuilt.
    pub async fn refresh_volume(
        &self,
        wallet: &str,
        year: &str,
        last_processed_block: Option<u64>,
        force_refresh: bool,
    ) -> crate::Result<RefreshOutcome> {
        let address = Self::parse_wallet(wallet)?;
        let year = parse_year(year).map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let key = cache_key(&address, year);

        let mut cache_error = None;
        let existing = match self.store.get(&key) {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(error = %err, "cache read failed, continuing without it");
                cache_error = Some(err);
                None
            }
        };

        let retry = &self.options.fetch.retry;
        let head = with_retry(retry, "eth_blockNumber", || self.provider.block_number())
            .await
            .map_err(|e| PipelineError::ProviderUnavailable(format!("head block unavailable: {e}")))?;
        let safe_head = head.saturating_sub(self.options.safety_buffer);

        let finder = BlockFinder::new(
            &self.provider,
            &self.block_times,
            self.options.block_cache_ttl,
            retry,
        );
        let year_range = finder
            .year_range(year, safe_head)
            .await
            .map_err(|e| PipelineError::ProviderUnavailable(format!("year block range unavailable: {e}")))?;

        let start = year_range.map(|(year_start, _)| {
            let resume = last_processed_block.or_else(|| {
                existing
                    .as_ref()
                    .map(|cache| cache.block_info.last_processed_block)
                    .filter(|block| *block > 0)
            });
            match resume {
                Some(block) if !force_refresh => year_start.max(block.saturating_add(1)),
                _ => year_start,
            }
        });

        let (from_block, to_block) = match (start, year_range) {
            (Some(from), Some((_, to))) if from <= to => (from, to),
            _ => {
                tracing::info!(%key, safe_head, "no new blocks to process");
                let mut cache = existing.unwrap_or_default();
                cache.last_updated = Some(Utc::now());
                if cache.block_info.last_processed_block > 0 {
                    if let Err(err) = self.store.set(&key, &cache) {
                        tracing::warn!(error = %err, "cache write failed");
                        cache_error = Some(err);
                    }
                }
                return Ok(RefreshOutcome {
                    key,
                    cache,
                    range: None,
                    new_transactions: 0,
                    skipped_transfers: 0,
                    failed_ranges: 0,
                    truncated_ranges: 0,
                    cache_error,
                });
            }
        };

        tracing::info!(%key, from_block, to_block, force_refresh, "refreshing volume");

        let fetcher = BlockRangeFetcher::new(&self.provider, &self.options.fetch);
        let categories = &self.options.categories;
        let incoming = fetcher
            .fetch(address, from_block, to_block, Direction::In, categories)
            .await;
        let outgoing = fetcher
            .fetch(address, from_block, to_block, Direction::Out, categories)
            .await;

        if incoming.is_total_failure() && outgoing.is_total_failure() {
            return Err(PipelineError::ProviderUnavailable(format!(
                "every request for blocks {from_block}..={to_block} failed"
            )));
        }

        let symbols: Vec<String> = incoming
            .transfers
            .iter()
            .chain(&outgoing.transfers)
            .filter_map(|transfer| transfer.asset.clone())
            .filter(|symbol| !symbol.eq_ignore_ascii_case(UNKNOWN_TOKEN))
            .collect();
        let prices = self.prices.resolve_prices(&symbols).await;

        let mut normalizer = Normalizer::new(year, &prices);
        if !force_refresh {
            if let Some(cache) = &existing {
                normalizer = normalizer.with_seen(cache.transactions.iter().map(|tx| &tx.hash));
            }
        }
        let (mut transactions, in_stats) = normalizer.normalize_all(&incoming.transfers, Direction::In);
        let (outgoing_txs, out_stats) = normalizer.normalize_all(&outgoing.transfers, Direction::Out);
        transactions.extend(outgoing_txs);

        // failed sub-ranges are fetched again on the next run
        let as_of_block = earliest_failed_block(&incoming, &outgoing)
            .map(|block| block.saturating_sub(1))
            .unwrap_or(to_block);
        let covered_through = match finder.block_date(as_of_block).await {
            Ok(date) => Some(date),
            Err(err) => {
                tracing::warn!(error = %err, as_of_block, "block date unavailable, keeping previous coverage");
                None
            }
        };
        let new_transactions = transactions.len();
        let cache = aggregate(
            existing,
            transactions,
            as_of_block,
            covered_through,
            force_refresh,
            Utc::now(),
        );

        if let Err(err) = self.store.set(&key, &cache) {
            tracing::warn!(error = %err, "cache write failed, returning the in-memory result");
            cache_error = Some(err);
        }

        let outcome = RefreshOutcome {
            key,
            cache,
            range: Some((from_block, to_block)),
            new_transactions,
            skipped_transfers: in_stats.skipped() + out_stats.skipped(),
            failed_ranges: incoming.failed_ranges.len() + outgoing.failed_ranges.len(),
            truncated_ranges: incoming.truncated_ranges.len() + outgoing.truncated_ranges.len(),
            cache_error,
        };
        tracing::info!(
            key = %outcome.key,
            new_transactions,
            skipped = outcome.skipped_transfers,
            failed_ranges = outcome.failed_ranges,
            truncated_ranges = outcome.truncated_ranges,
            last_processed_block = outcome.cache.block_info.last_processed_block,
            "volume refreshed"
        );
        Ok(outcome)
    }
}

fn earliest_failed_block(incoming: &FetchReport, outgoing: &FetchReport) -> Option<u64> {
    match (incoming.earliest_failed_block(), outgoing.earliest_failed_block()) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
