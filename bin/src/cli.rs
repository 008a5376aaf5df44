use std::path::PathBuf;

use clap::{Parser, Subcommand};
use inflow_utils::{alloy::StringExt, config::Config};

#[derive(Parser, Debug)]
#[command(name = "inflow", bin_name = "inflow", version, about)]
pub struct Cli {
    /// Alchemy API key, overrides the config file
    #[arg(long, global = true, env = "ALCHEMY_API_KEY", hide_env_values = true)]
    pub alchemy_api_key: Option<String>,

    /// Wallet whose inflow is tracked
    #[arg(long, global = true, env = "INFLOW_WALLET")]
    pub wallet: Option<String>,

    /// Alchemy network, e.g. base-mainnet
    #[arg(long, global = true, env = "INFLOW_NETWORK")]
    pub network: Option<String>,

    /// Directory holding the volume cache files
    #[arg(long, global = true, env = "INFLOW_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch new transfers and update the cached volume
    Refresh {
        /// Calendar year, defaults to the current one
        #[arg(long)]
        year: Option<String>,

        /// Rebuild the whole year instead of resuming
        #[arg(long)]
        force: bool,

        /// Resume after this block instead of the cached one
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// Run the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the cached volume
    Show {
        #[arg(long, default_value = "monthly")]
        period: String,

        #[arg(long)]
        year: Option<String>,
    },

    /// Print the config file path and the effective config
    Config,
}

impl Cli {
    /// Applies command line and environment values on top of the config file.
    pub fn apply(&self, config: &mut Config) -> inflow_utils::Result<()> {
        if let Some(key) = &self.alchemy_api_key {
            config.alchemy_api_key = Some(key.clone());
        }
        if let Some(wallet) = &self.wallet {
            config.wallet_address = Some(wallet.parse_as_address()?);
        }
        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        Ok(())
    }
}
