use std::path::PathBuf;

use alloy::primitives::Address;
use serde_json::Value;

use crate::reqwest::{ReqwestErrorContext, ReqwestInnerError, ReqwestStage};

pub type Result<T> = std::result::Result<T, UtilsError>;

#[derive(Debug, thiserror::Error)]
pub enum UtilsError {
    #[error(transparent)]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("Failed to parse Alchemy response: {0}.")]
    AlchemyResponse(&'static str),

    #[error("Unexpected JSON shape at {1}. (Value: {0})")]
    SerdeJsonValueParseFailed(Box<Value>, crate::serde::SerdePathError),

    #[error("Address '{0}' is not a valid Ethereum address.")]
    InvalidAddress(String),

    #[error("Alchemy API key not set, please set it in the config or ALCHEMY_API_KEY.")]
    AlchemyApiKeyNotSet,

    #[error("Wallet address not set, please set it in the config or INFLOW_WALLET.")]
    WalletAddressNotSet,

    #[error("Failed to get base directories.")]
    BaseDirsFailed,

    #[error("Failed to create directory: {0:?}. (Error: {1:?})")]
    CreateDirAllFailed(PathBuf, std::io::Error),

    #[error("Failed to read the file: {0}. (Error: {1:?})")]
    FileReadFailed(PathBuf, std::io::Error),

    #[error("Failed to write to the file: {0}. (Error: {1:?})")]
    FileWriteFailed(PathBuf, std::io::Error),

    #[error("Failed to move {0} into place. (Error: {1:?})")]
    FileRenameFailed(PathBuf, std::io::Error),

    #[error("Failed to remove the file: {0}. (Error: {1:?})")]
    FileRemoveFailed(PathBuf, std::io::Error),

    #[error("Parsing the toml file failed: {0}. (Error: {1:?})")]
    TomlParsingFailed(PathBuf, toml::de::Error),

    #[error("Formatting to toml format failed: {0}. (Error: {1:?})")]
    TomlFormattingFailed(String, toml::ser::Error),

    #[error("Parsing the json file failed: {0}. (Error: {1:?})")]
    JsonParsingFailed(PathBuf, serde_json::Error),

    #[error("Formatting to json format failed: {0}. (Error: {1:?})")]
    JsonFormattingFailed(String, serde_json::Error),

    #[error("Failed to parse URL: {0}. (Error: {1:?})")]
    UrlParsingFailed(String, url::ParseError),

    #[error("Please check your internet connection, the URL seems to be unreachable: {0}")]
    Internet(String),

    #[error("{method} {url} failed at {stage:?}: {inner:?}", method = context.method, url = context.url)]
    ReqwestFailed {
        stage: ReqwestStage,
        context: Box<ReqwestErrorContext>,
        inner: ReqwestInnerError,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("JSON-RPC call '{method}' failed with code {code}: {message}")]
    RpcError {
        method: String,
        code: i64,
        message: String,
    },

    #[error("JSON-RPC call '{0}' returned neither a result nor an error.")]
    RpcMissingResult(String),

    #[error("Value '{0}' is not a valid hex quantity.")]
    InvalidHexQuantity(String),

    #[error("Block {0} not found.")]
    BlockNotFound(u64),

    #[error("Failed to read reserves of pair {pair}. (Error: {error})")]
    PairReservesFailed { pair: Address, error: String },

    #[error("Pair {0} has an empty reserve.")]
    PairEmptyReserve(Address),

    #[error("No price available for {0}.")]
    NoPrice(String),
}

impl UtilsError {
    pub fn is_connect(&self) -> bool {
        match self {
            Self::Internet(_) => true,
            Self::ReqwestFailed { inner, .. } => inner.is_connect(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ReqwestFailed { inner, .. } => inner.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status of a failed request, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ReqwestFailed { inner, .. } => inner.status_code(),
            _ => None,
        }
    }

    /// Body of a rejected request, providers put the reason there.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::ReqwestFailed {
                inner: ReqwestInnerError::Status { body, .. },
                ..
            } => Some(body),
            _ => None,
        }
    }
}
