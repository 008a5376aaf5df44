//! Transfer ingestion and volume aggregation for a single wallet.
//!
//! The flow of one refresh is: [`fetcher`] pulls transfers for a block range,
//! [`normalizer`] turns them into USD valued transactions, [`aggregator`]
//! merges them into the persisted [`inflow_common::VolumeCache`] and
//! [`gap_fill`] shapes the result for display. [`refresh`] ties it together.

pub mod aggregator;
pub mod block_finder;
pub mod error;
pub mod fetcher;
pub mod gap_fill;
pub mod normalizer;
pub mod provider;
pub mod refresh;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testutils;

pub use error::PipelineError;
pub use refresh::{PipelineOptions, RefreshOutcome, VolumePipeline};

pub type Result<T> = std::result::Result<T, PipelineError>;
