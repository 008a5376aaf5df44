//! HTTP endpoints serving the cached volume of one wallet and triggering
//! refreshes of it.
pub mod error;
mod serve;

pub use error::{ApiError as Error, Result};
pub use serve::*;
