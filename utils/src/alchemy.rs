use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use inflow_common::{text::redact, Transfer, TransferCategory};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::skip_serializing_none;

use crate::{
    rpc_types::{parse_hex_quantity, to_hex_quantity, JsonRpcRequest, JsonRpcResponse},
    serde::SerdeResponseParse,
    Reqwest,
};

/// Page size requested from `alchemy_getAssetTransfers`, the API maximum.
pub const MAX_COUNT_PER_PAGE: u64 = 1000;

#[derive(Debug, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub prices: Vec<Price>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Price {
    pub currency: String,
    pub value: String,
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AlchemyData<T> {
    pub data: T,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfersParams {
    pub from_block: String,
    pub to_block: String,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub category: Vec<String>,
    pub with_metadata: bool,
    pub exclude_zero_value: bool,
    pub max_count: String,
    pub order: Option<String>,
    pub page_key: Option<String>,
}

impl AssetTransfersParams {
    pub fn new(from_block: u64, to_block: u64, categories: &[TransferCategory]) -> Self {
        Self {
            from_block: to_hex_quantity(from_block),
            to_block: to_hex_quantity(to_block),
            category: categories.iter().map(|c| c.as_str().to_string()).collect(),
            with_metadata: true,
            exclude_zero_value: true,
            max_count: to_hex_quantity(MAX_COUNT_PER_PAGE),
            order: Some("asc".to_string()),
            ..Default::default()
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub decimal: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    #[serde(default)]
    pub block_timestamp: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfer {
    pub block_num: String,
    pub unique_id: String,
    pub hash: String,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub asset: Option<String>,
    pub category: String,
    #[serde(default)]
    pub raw_contract: Option<RawContract>,
    #[serde(default)]
    pub metadata: Option<TransferMetadata>,
}

impl AssetTransfer {
    pub fn into_transfer(self) -> crate::Result<Transfer> {
        let block_number = parse_hex_quantity(&self.block_num)?;
        // an unparsable timestamp is treated like a missing one
        let timestamp = self
            .metadata
            .and_then(|m| m.block_timestamp)
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let (raw_value, decimals) = match self.raw_contract {
            Some(raw) => (
                raw.value,
                raw.decimal
                    .and_then(|d| parse_hex_quantity(&d).ok())
                    .and_then(|d| u8::try_from(d).ok()),
            ),
            None => (None, None),
        };

        Ok(Transfer {
            hash: self.hash.to_lowercase(),
            unique_id: self.unique_id,
            from: self.from,
            to: self.to,
            block_number,
            timestamp,
            asset: self.asset,
            amount: self.value,
            raw_value,
            decimals,
            category: Some(self.category),
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfersResult {
    pub transfers: Vec<AssetTransfer>,
    #[serde(default)]
    pub page_key: Option<String>,
}

#[derive(Deserialize, Debug)]
struct BlockHeader {
    timestamp: String,
}

/// JSON-RPC and REST client for one Alchemy network.
pub struct Alchemy {
    api_key: String,
    network: String,
    next_id: AtomicU64,
}

impl Alchemy {
    pub fn new(api_key: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            network: network.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Masks the API key in text that may have picked up a request url.
    pub fn redact(&self, text: &str) -> String {
        redact(text, &self.api_key)
    }

    pub fn rpc_url(&self) -> String {
        format!("https://{}.g.alchemy.com/v2/{}", self.network, self.api_key)
    }

    async fn rpc_call(&self, method: &str, params: Value) -> crate::Result<Value> {
        let request = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        Reqwest::post(self.rpc_url())?
            .secret(&self.api_key)
            .json_body(&request)
            .receive_json::<JsonRpcResponse>()
            .await?
            .into_result(method)
    }

    pub async fn block_number(&self) -> crate::Result<u64> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or(crate::Error::AlchemyResponse("block number is not a string"))?;
        parse_hex_quantity(hex)
    }

    pub async fn block_timestamp(&self, block: u64) -> crate::Result<DateTime<Utc>> {
        let result = self
            .rpc_call(
                "eth_getBlockByNumber",
                json!([to_hex_quantity(block), false]),
            )
            .await?;
        if result.is_null() {
            return Err(crate::Error::BlockNotFound(block));
        }
        let header: BlockHeader = result.serde_parse_custom()?;
        let seconds = parse_hex_quantity(&header.timestamp)?;
        i64::try_from(seconds)
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .ok_or(crate::Error::InvalidHexQuantity(header.timestamp))
    }

    // docs: https://docs.alchemy.com/reference/alchemy-getassettransfers
    pub async fn asset_transfers(
        &self,
        params: &AssetTransfersParams,
    ) -> crate::Result<AssetTransfersResult> {
        let result = self
            .rpc_call("alchemy_getAssetTransfers", json!([params]))
            .await?;
        result.serde_parse_custom()
    }

    pub async fn get_price(&self, symbol: &str) -> crate::Result<(f64, String)> {
        let response = Reqwest::get(format!(
            "https://api.g.alchemy.com/prices/v1/{}/tokens/by-symbol",
            self.api_key
        ))?
        .secret(&self.api_key)
        .query(&[("symbols", symbol)])
        .receive_json::<AlchemyData<Vec<Asset>>>()
        .await?;

        let asset = response
            .data
            .into_iter()
            .find(|asset| asset.symbol == symbol)
            .ok_or_else(|| crate::Error::AlchemyResponse("asset not found"))?;

        let usd_price = asset
            .prices
            .into_iter()
            .find(|price| price.currency == "usd")
            .ok_or_else(|| crate::Error::AlchemyResponse("usd price not found"))?;

        Ok((usd_price.value.parse()?, usd_price.last_updated_at))
    }
}
