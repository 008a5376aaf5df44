use std::path::PathBuf;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::disk_storage::{base_dir, DiskStorageInterface, FileFormat};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub alchemy_api_key: Option<String>,
    pub wallet_address: Option<Address>,
    #[serde(default = "default_network")]
    pub network: String,
    pub cache_dir: Option<PathBuf>,
    /// Cached volume documents older than this are refetched from scratch.
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alchemy_api_key: None,
            wallet_address: None,
            network: default_network(),
            cache_dir: None,
            cache_ttl_secs: None,
            fetch: FetchConfig::default(),
            price: PriceConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn default_network() -> String {
    "base-mainnet".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub max_block_span: u64,
    pub max_pages: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub safety_buffer: u64,
    pub include_internal: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_block_span: 10_000,
            max_pages: 5,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            safety_buffer: 5,
            include_internal: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PriceConfig {
    pub ttl_secs: u64,
    pub eth_fallback_usd: f64,
    pub dex_pair: Option<DexPairConfig>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            eth_fallback_usd: 3000.0,
            dex_pair: None,
        }
    }
}

/// A token/USDC pair whose reserves give the ETH price.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DexPairConfig {
    pub address: Address,
    #[serde(default = "default_base_decimals")]
    pub base_decimals: u8,
    #[serde(default = "default_quote_decimals")]
    pub quote_decimals: u8,
    /// Whether the priced token (WETH) is `token0` of the pair.
    #[serde(default = "default_true")]
    pub base_is_token0: bool,
}

fn default_base_decimals() -> u8 {
    18
}

fn default_quote_decimals() -> u8 {
    6
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3001 }
    }
}

impl DiskStorageInterface for Config {
    const FILE_NAME: &'static str = "config";
    const FORMAT: FileFormat = FileFormat::TOML;
}

impl Config {
    pub fn alchemy_api_key(&self) -> crate::Result<&str> {
        self.alchemy_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(crate::Error::AlchemyApiKeyNotSet)
    }

    pub fn set_alchemy_api_key(alchemy_api_key: String) -> crate::Result<()> {
        let mut config = Config::load()?;
        config.alchemy_api_key = Some(alchemy_api_key);
        config.save()?;
        Ok(())
    }

    pub fn wallet_address(&self) -> crate::Result<Address> {
        self.wallet_address.ok_or(crate::Error::WalletAddressNotSet)
    }

    pub fn set_wallet_address(address: Address) -> crate::Result<()> {
        let mut config = Config::load()?;
        config.wallet_address = Some(address);
        config.save()?;
        Ok(())
    }

    pub fn cache_dir(&self) -> crate::Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(base_dir()?.join("cache")),
        }
    }
}
