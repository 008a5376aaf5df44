use std::fmt::{Display, Formatter};

use alloy::primitives::Address;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Period;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// Transfer categories understood by the data provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferCategory {
    External,
    Internal,
    Erc20,
}

impl TransferCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::External => "external",
            TransferCategory::Internal => "internal",
            TransferCategory::Erc20 => "erc20",
        }
    }
}

/// A value movement as reported by the data provider.
#[derive(Clone, Debug, PartialEq)]
pub struct Transfer {
    pub hash: String,
    pub unique_id: String,
    pub from: Address,
    pub to: Option<Address>,
    pub block_number: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub asset: Option<String>,
    /// Decimal adjusted amount.
    pub amount: Option<f64>,
    pub raw_value: Option<String>,
    pub decimals: Option<u8>,
    pub category: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: Address,
    pub to: Option<Address>,
    pub date: NaiveDate,
    pub block_number: u64,
    pub token: String,
    pub token_amount: f64,
    pub usd_value: f64,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeBucket {
    pub date: NaiveDate,
    pub volume: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub last_processed_block: u64,
    pub processing_date: Option<DateTime<Utc>>,
    /// UTC day of the `last_processed_block` timestamp.
    #[serde(default)]
    pub covered_through: Option<NaiveDate>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    pub incoming_count: u64,
    pub outgoing_count: u64,
    pub total_volume: f64,
}

/// Persisted aggregation state for one wallet and year.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCache {
    pub daily: Vec<VolumeBucket>,
    pub weekly: Vec<VolumeBucket>,
    pub monthly: Vec<VolumeBucket>,
    pub last_updated: Option<DateTime<Utc>>,
    pub block_info: BlockInfo,
    #[serde(default)]
    pub stats: VolumeStats,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl VolumeCache {
    pub fn buckets(&self, period: Period) -> &[VolumeBucket] {
        match period {
            Period::Daily => &self.daily,
            Period::Weekly => &self.weekly,
            Period::Monthly => &self.monthly,
        }
    }

    pub fn buckets_mut(&mut self, period: Period) -> &mut Vec<VolumeBucket> {
        match period {
            Period::Daily => &mut self.daily,
            Period::Weekly => &mut self.weekly,
            Period::Monthly => &mut self.monthly,
        }
    }

    /// Last calendar day for which blocks have been fetched.
    pub fn covered_through(&self) -> Option<NaiveDate> {
        self.block_info
            .covered_through
            .filter(|_| self.block_info.last_processed_block > 0)
    }
}

/// Storage key of the cache for a wallet and year.
pub fn cache_key(wallet: &Address, year: i32) -> String {
    format!("volume-{wallet:#x}-{year}")
}
