#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider request failed after retries. (Error: {0})")]
    TransientProvider(#[source] inflow_utils::Error),

    #[error("Provider rejected blocks {from}..={to} as too wide even at a single block.")]
    RangeTooWide { from: u64, to: u64 },

    #[error("Transfer {hash} dropped: {reason}.")]
    DataShape { hash: String, reason: &'static str },

    #[error("No usable price for {symbol}, valued at 1.0 USD per token.")]
    PriceLookup { symbol: String },

    #[error("Cache '{key}' is unavailable. (Error: {source})")]
    CacheUnavailable {
        key: String,
        #[source]
        source: inflow_utils::Error,
    },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl PipelineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
