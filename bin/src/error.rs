pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Utils(#[from] inflow_utils::Error),

    #[error(transparent)]
    InvalidInput(#[from] inflow_common::Error),

    #[error(transparent)]
    Pipeline(#[from] inflow_pipeline::PipelineError),

    #[error(transparent)]
    Api(#[from] inflow_api::Error),

    #[error("Formatting the config failed. (Error: {0})")]
    ConfigFormatFailed(#[from] toml::ser::Error),
}
