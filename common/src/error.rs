use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Year '{0}' is not a valid calendar year.")]
    InvalidYear(String),

    #[error("Period '{0}' is not one of daily, weekly or monthly.")]
    InvalidPeriod(String),
}
