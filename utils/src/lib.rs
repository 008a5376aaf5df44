pub mod alchemy;
pub mod alloy;
pub mod cache;
pub mod config;
pub mod disk_storage;
pub mod error;
pub mod log;
pub mod price_manager;
pub mod reqwest;
pub mod rpc_types;
pub mod serde;

pub use error::{Result, UtilsError as Error};

pub use reqwest::Reqwest;
