pub mod error;
pub mod pair;
pub mod period;
pub mod text;
pub mod types;

pub use error::Error;
pub use period::Period;
pub use types::*;

pub type Result<T> = std::result::Result<T, Error>;
