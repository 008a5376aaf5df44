use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use alloy::primitives::Address;
use chrono::{DateTime, TimeZone, Utc};
use inflow_common::{Direction, Transfer, VolumeCache};
use inflow_utils::{config::DexPairConfig, price_manager::PriceFeed};

use crate::{
    provider::{TransferPage, TransferProvider, TransferQuery},
    store::VolumeStore,
    PipelineError,
};

pub const WALLET: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";
pub const SENDER: &str = "0x1111111111111111111111111111111111111111";

pub fn wallet() -> Address {
    WALLET.parse().unwrap()
}

pub fn sender() -> Address {
    SENDER.parse().unwrap()
}

pub fn rpc_error(code: i64, message: &str) -> inflow_utils::Error {
    inflow_utils::Error::RpcError {
        method: "alchemy_getAssetTransfers".to_string(),
        code,
        message: message.to_string(),
    }
}

pub fn rate_limited() -> inflow_utils::Error {
    rpc_error(429, "Your app has exceeded its compute units per second capacity")
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// An incoming transfer to [`WALLET`].
pub fn incoming(hash: &str, block: u64, timestamp: &str, asset: &str, amount: f64) -> Transfer {
    Transfer {
        hash: hash.to_string(),
        unique_id: format!("{hash}:log:0"),
        from: sender(),
        to: Some(wallet()),
        block_number: block,
        timestamp: Some(utc(timestamp)),
        asset: Some(asset.to_string()),
        amount: Some(amount),
        raw_value: None,
        decimals: None,
        category: Some("erc20".to_string()),
    }
}

/// An outgoing transfer from [`WALLET`].
pub fn outgoing(hash: &str, block: u64, timestamp: &str, asset: &str, amount: f64) -> Transfer {
    Transfer {
        from: wallet(),
        to: Some(sender()),
        ..incoming(hash, block, timestamp, asset, amount)
    }
}

/// Chain with one block every `block_time` seconds starting at `genesis`.
pub struct MockProvider {
    pub head: u64,
    pub genesis: i64,
    pub block_time: i64,
    pub transfers: Vec<Transfer>,
    pub page_size: usize,
    /// Queries overlapping one of these ranges are rate limited.
    pub failing: Vec<(u64, u64)>,
    /// Queries spanning more blocks than this are rejected as too wide.
    pub max_span: Option<u64>,
    pub head_fails: bool,
    pub queries: Mutex<Vec<(u64, u64, Direction)>>,
    pub timestamp_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            genesis: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .unwrap()
                .timestamp(),
            block_time: 2,
            transfers: Vec::new(),
            page_size: 1000,
            failing: Vec::new(),
            max_span: None,
            head_fails: false,
            queries: Mutex::new(Vec::new()),
            timestamp_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_transfers(mut self, transfers: Vec<Transfer>) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn timestamp_of(&self, block: u64) -> i64 {
        self.genesis + block as i64 * self.block_time
    }

    /// Block mined at or right after the given instant.
    pub fn block_at(&self, at: &str) -> u64 {
        let elapsed = utc(at).timestamp() - self.genesis;
        ((elapsed + self.block_time - 1) / self.block_time) as u64
    }

    /// Incoming transfer whose block matches its timestamp.
    pub fn incoming_at(&self, hash: &str, at: &str, asset: &str, amount: f64) -> Transfer {
        incoming(hash, self.block_at(at), at, asset, amount)
    }

    pub fn queried(&self) -> Vec<(u64, u64, Direction)> {
        self.queries.lock().unwrap().clone()
    }

    fn matches(&self, transfer: &Transfer, query: &TransferQuery) -> bool {
        let in_range =
            transfer.block_number >= query.from_block && transfer.block_number <= query.to_block;
        let party = match query.direction {
            Direction::In => transfer.to == Some(query.address),
            Direction::Out => transfer.from == query.address,
        };
        in_range && party
    }
}

impl TransferProvider for MockProvider {
    async fn block_number(&self) -> inflow_utils::Result<u64> {
        if self.head_fails {
            return Err(rpc_error(-32603, "internal error"));
        }
        Ok(self.head)
    }

    async fn block_timestamp(&self, block: u64) -> inflow_utils::Result<DateTime<Utc>> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        if block > self.head {
            return Err(inflow_utils::Error::BlockNotFound(block));
        }
        Utc.timestamp_opt(self.timestamp_of(block), 0)
            .single()
            .ok_or(inflow_utils::Error::BlockNotFound(block))
    }

    async fn asset_transfers(&self, query: &TransferQuery) -> inflow_utils::Result<TransferPage> {
        self.queries
            .lock()
            .unwrap()
            .push((query.from_block, query.to_block, query.direction));

        if let Some(max_span) = self.max_span {
            if query.to_block - query.from_block + 1 > max_span {
                return Err(rpc_error(-32602, "block range too wide"));
            }
        }
        let overlaps_failure = self
            .failing
            .iter()
            .any(|(from, to)| query.from_block <= *to && *from <= query.to_block);
        if overlaps_failure {
            return Err(rate_limited());
        }

        let matching: Vec<Transfer> = self
            .transfers
            .iter()
            .filter(|t| self.matches(t, query))
            .cloned()
            .collect();
        let offset = query
            .page_key
            .as_deref()
            .map(|key| key.parse::<usize>().unwrap())
            .unwrap_or(0);
        let end = (offset + self.page_size).min(matching.len());

        Ok(TransferPage {
            transfers: matching[offset.min(end)..end].to_vec(),
            next_page_key: (end < matching.len()).then(|| end.to_string()),
        })
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl FailingStore {
    fn error(key: &str) -> PipelineError {
        PipelineError::CacheUnavailable {
            key: key.to_string(),
            source: inflow_utils::Error::FileWriteFailed(
                key.into(),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ),
        }
    }
}

impl VolumeStore for FailingStore {
    fn get(&self, key: &str) -> crate::Result<Option<VolumeCache>> {
        Err(Self::error(key))
    }

    fn set(&self, key: &str, _cache: &VolumeCache) -> crate::Result<()> {
        Err(Self::error(key))
    }

    fn exists(&self, key: &str) -> crate::Result<bool> {
        Err(Self::error(key))
    }
}

/// Price feed answering from a fixed table.
#[derive(Default)]
pub struct StaticFeed {
    pub prices: HashMap<String, f64>,
}

impl StaticFeed {
    pub fn with(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }
}

impl PriceFeed for StaticFeed {
    async fn symbol_price(&self, symbol: &str) -> inflow_utils::Result<f64> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| inflow_utils::Error::NoPrice(symbol.to_string()))
    }

    async fn pair_price(&self, _pair: &DexPairConfig) -> inflow_utils::Result<f64> {
        Err(inflow_utils::Error::NoPrice("pair".to_string()))
    }
}
