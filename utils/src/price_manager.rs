use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use inflow_common::pair::IUniswapV2Pair;

use crate::{
    alchemy::Alchemy,
    alloy::StringExt,
    cache::TtlCache,
    config::{DexPairConfig, PriceConfig},
};

/// Symbols pegged to one US dollar.
pub const STABLECOINS: &[&str] = &["USDC", "USDT", "DAI", "USDBC", "USDC.E"];

const ETH_SYMBOLS: &[&str] = &["ETH", "WETH"];

pub fn is_stablecoin(symbol: &str) -> bool {
    STABLECOINS.contains(&symbol.to_uppercase().as_str())
}

fn is_eth(symbol: &str) -> bool {
    ETH_SYMBOLS.contains(&symbol)
}

/// Upstream price sources consulted by the [`PriceManager`].
pub trait PriceFeed: Send + Sync {
    fn symbol_price(&self, symbol: &str) -> impl Future<Output = crate::Result<f64>> + Send;

    fn pair_price(&self, pair: &DexPairConfig) -> impl Future<Output = crate::Result<f64>> + Send;
}

/// Alchemy's price API for symbols, the chain RPC for pair reserves.
pub struct AlchemyPriceFeed {
    alchemy: Arc<Alchemy>,
}

impl AlchemyPriceFeed {
    pub fn new(alchemy: Arc<Alchemy>) -> Self {
        Self { alchemy }
    }
}

impl PriceFeed for AlchemyPriceFeed {
    async fn symbol_price(&self, symbol: &str) -> crate::Result<f64> {
        self.alchemy.get_price(symbol).await.map(|(price, _)| price)
    }

    async fn pair_price(&self, pair: &DexPairConfig) -> crate::Result<f64> {
        let rpc_url = self.alchemy.rpc_url();
        let provider = rpc_url.to_alloy_provider()?;

        let reserves = IUniswapV2Pair::new(pair.address, provider)
            .getReserves()
            .call()
            .await
            .map_err(|error| crate::Error::PairReservesFailed {
                pair: pair.address,
                error: self.alchemy.redact(&error.to_string()),
            })?;

        let reserve0 = reserves.reserve0.to_string().parse::<f64>()?;
        let reserve1 = reserves.reserve1.to_string().parse::<f64>()?;

        reserve_ratio_price(reserve0, reserve1, pair)
            .ok_or(crate::Error::PairEmptyReserve(pair.address))
    }
}

/// Price of the base token in quote units, each reserve scaled by its decimals.
pub fn reserve_ratio_price(reserve0: f64, reserve1: f64, pair: &DexPairConfig) -> Option<f64> {
    let (base, quote) = if pair.base_is_token0 {
        (reserve0, reserve1)
    } else {
        (reserve1, reserve0)
    };
    let base = base / 10f64.powi(pair.base_decimals as i32);
    let quote = quote / 10f64.powi(pair.quote_decimals as i32);

    (base > 0.0 && quote > 0.0).then(|| quote / base)
}

/// Resolves USD prices per symbol. Never fails: a lookup error falls back to
/// the last price seen for the symbol, then the static table, then 1.0.
pub struct PriceManager<F> {
    feed: F,
    config: PriceConfig,
    cache: Arc<TtlCache<f64>>,
    last_known: Arc<ArcSwap<HashMap<String, f64>>>,
}

impl<F: PriceFeed> PriceManager<F> {
    pub fn new(feed: F, config: PriceConfig, cache: Arc<TtlCache<f64>>) -> Self {
        Self {
            feed,
            config,
            cache,
            last_known: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Last successfully fetched price, regardless of cache expiry.
    pub fn last_known(&self, symbol: &str) -> Option<f64> {
        self.last_known.load().get(&symbol.to_uppercase()).copied()
    }

    fn static_price(&self, symbol: &str) -> Option<f64> {
        if is_stablecoin(symbol) {
            Some(1.0)
        } else if is_eth(symbol) {
            Some(self.config.eth_fallback_usd)
        } else {
            None
        }
    }

    async fn fetch(&self, symbol: &str) -> crate::Result<f64> {
        if is_eth(symbol) {
            if let Some(pair) = &self.config.dex_pair {
                match self.feed.pair_price(pair).await {
                    Ok(price) => return Ok(price),
                    Err(err) => {
                        tracing::warn!(error = %err, pair = %pair.address, "pair price lookup failed");
                    }
                }
            }
            return self.feed.symbol_price("ETH").await;
        }
        self.feed.symbol_price(symbol).await
    }

    pub async fn get_price(&self, symbol: &str) -> f64 {
        let symbol = symbol.to_uppercase();

        if is_stablecoin(&symbol) {
            return 1.0;
        }

        if let Some(price) = self.cache.get(&symbol) {
            return price;
        }

        match self.fetch(&symbol).await {
            Ok(price) if price.is_finite() && price > 0.0 => {
                self.cache
                    .set(&symbol, price, Duration::from_secs(self.config.ttl_secs));
                self.last_known.rcu(|prices| {
                    let mut prices = HashMap::clone(prices);
                    prices.insert(symbol.clone(), price);
                    prices
                });
                price
            }
            result => {
                if let Err(err) = &result {
                    tracing::warn!(error = %err, %symbol, "price lookup failed, using fallback");
                } else {
                    tracing::warn!(?result, %symbol, "price source returned an unusable price");
                }

                if let Some(price) = self.last_known(&symbol) {
                    price
                } else if let Some(price) = self.static_price(&symbol) {
                    price
                } else {
                    tracing::warn!(%symbol, "unknown token, defaulting price to 1.0");
                    1.0
                }
            }
        }
    }

    /// Prices for every distinct symbol, keyed by upper-cased symbol.
    pub async fn resolve_prices(&self, symbols: &[String]) -> HashMap<String, f64> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            let key = symbol.to_uppercase();
            if !prices.contains_key(&key) {
                let price = self.get_price(&key).await;
                prices.insert(key, price);
            }
        }
        prices
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use alloy::primitives::Address;

    use super::*;

    #[derive(Default)]
    struct MockFeed {
        symbol_prices: Mutex<HashMap<String, crate::Result<f64>>>,
        pair: Mutex<Option<crate::Result<f64>>>,
        calls: AtomicUsize,
    }

    impl MockFeed {
        fn with_symbol(self, symbol: &str, result: crate::Result<f64>) -> Self {
            self.symbol_prices
                .lock()
                .unwrap()
                .insert(symbol.to_string(), result);
            self
        }

        fn set_symbol(&self, symbol: &str, result: crate::Result<f64>) {
            self.symbol_prices
                .lock()
                .unwrap()
                .insert(symbol.to_string(), result);
        }
    }

    fn take(result: Option<&crate::Result<f64>>, symbol: &str) -> crate::Result<f64> {
        match result {
            Some(Ok(price)) => Ok(*price),
            _ => Err(crate::Error::NoPrice(symbol.to_string())),
        }
    }

    impl PriceFeed for &MockFeed {
        async fn symbol_price(&self, symbol: &str) -> crate::Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            take(self.symbol_prices.lock().unwrap().get(symbol), symbol)
        }

        async fn pair_price(&self, _pair: &DexPairConfig) -> crate::Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            take(self.pair.lock().unwrap().as_ref(), "pair")
        }
    }

    fn pair() -> DexPairConfig {
        DexPairConfig {
            address: Address::ZERO,
            base_decimals: 18,
            quote_decimals: 6,
            base_is_token0: true,
        }
    }

    fn manager(feed: &MockFeed, config: PriceConfig) -> PriceManager<&MockFeed> {
        PriceManager::new(feed, config, Arc::new(TtlCache::new()))
    }

    #[test]
    fn test_reserve_ratio_price() {
        // 10 WETH against 30,000 USDC
        let price = reserve_ratio_price(10e18, 30_000e6, &pair()).unwrap();
        assert!((price - 3000.0).abs() < 1e-9);

        let flipped = DexPairConfig {
            base_is_token0: false,
            ..pair()
        };
        let price = reserve_ratio_price(30_000e6, 10e18, &flipped).unwrap();
        assert!((price - 3000.0).abs() < 1e-9);

        assert!(reserve_ratio_price(0.0, 30_000e6, &pair()).is_none());
    }

    #[tokio::test]
    async fn test_stablecoins_are_one_dollar() {
        let feed = MockFeed::default();
        let prices = manager(&feed, PriceConfig::default());
        assert_eq!(prices.get_price("USDC").await, 1.0);
        assert_eq!(prices.get_price("usdt").await, 1.0);
        assert_eq!(prices.get_price("DAI").await, 1.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_eth_prefers_pair_and_caches() {
        let feed = MockFeed::default().with_symbol("ETH", Ok(2500.0));
        *feed.pair.lock().unwrap() = Some(Ok(3100.0));
        let config = PriceConfig {
            dex_pair: Some(pair()),
            ..Default::default()
        };
        let prices = manager(&feed, config);

        assert_eq!(prices.get_price("WETH").await, 3100.0);
        assert_eq!(prices.get_price("ETH").await, 3100.0);
        // ETH and WETH are cached under their own keys
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
        assert_eq!(prices.get_price("WETH").await, 3100.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_eth_falls_back_to_symbol_then_constant() {
        let feed = MockFeed::default().with_symbol("ETH", Ok(2500.0));
        *feed.pair.lock().unwrap() = Some(Err(crate::Error::NoPrice("pair".into())));
        let config = PriceConfig {
            dex_pair: Some(pair()),
            eth_fallback_usd: 1234.0,
            ..Default::default()
        };
        let prices = manager(&feed, config.clone());
        assert_eq!(prices.get_price("ETH").await, 2500.0);

        let feed = MockFeed::default();
        let prices = manager(&feed, config);
        assert_eq!(prices.get_price("ETH").await, 1234.0);
    }

    #[tokio::test]
    async fn test_failure_uses_last_known_price() {
        let feed = MockFeed::default().with_symbol("AERO", Ok(1.5));
        let config = PriceConfig {
            ttl_secs: 0,
            ..Default::default()
        };
        let prices = manager(&feed, config);

        assert_eq!(prices.get_price("AERO").await, 1.5);
        feed.set_symbol("AERO", Err(crate::Error::NoPrice("AERO".into())));
        // ttl of zero forces a refetch, which fails
        assert_eq!(prices.get_price("AERO").await, 1.5);
        assert_eq!(prices.last_known("aero"), Some(1.5));
    }

    #[tokio::test]
    async fn test_unknown_token_defaults_to_one() {
        let feed = MockFeed::default().with_symbol("ZERO", Ok(0.0));
        let prices = manager(&feed, PriceConfig::default());
        assert_eq!(prices.get_price("NOPE").await, 1.0);
        assert_eq!(prices.get_price("ZERO").await, 1.0);
    }

    #[tokio::test]
    async fn test_resolve_prices_dedups_symbols() {
        let feed = MockFeed::default().with_symbol("AERO", Ok(1.5));
        let prices = manager(&feed, PriceConfig::default());

        let resolved = prices
            .resolve_prices(&["aero".to_string(), "AERO".to_string(), "USDC".to_string()])
            .await;
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["AERO"], 1.5);
        assert_eq!(resolved["USDC"], 1.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }
}
