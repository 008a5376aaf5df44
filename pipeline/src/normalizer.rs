use std::collections::{HashMap, HashSet};

use chrono::Datelike;
use inflow_common::{Direction, Transaction, Transfer};

use crate::PipelineError;

/// Symbol used for transfers the provider could not name.
pub const UNKNOWN_TOKEN: &str = "UNKNOWN";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skipped {
    MissingTimestamp,
    OutsideYear,
    Duplicate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub missing_timestamp: usize,
    pub outside_year: usize,
    pub duplicate: usize,
}

impl NormalizeStats {
    pub fn skipped(&self) -> usize {
        self.missing_timestamp + self.outside_year + self.duplicate
    }
}

/// Turns provider transfers into USD valued transactions of one calendar year.
/// The first transfer seen for a hash wins, later ones are dropped.
pub struct Normalizer<'a> {
    year: i32,
    prices: &'a HashMap<String, f64>,
    seen: HashSet<String>,
}

impl<'a> Normalizer<'a> {
    /// `prices` is keyed by upper-cased symbol.
    pub fn new(year: i32, prices: &'a HashMap<String, f64>) -> Self {
        Self {
            year,
            prices,
            seen: HashSet::new(),
        }
    }

    /// Marks hashes as already processed, e.g. the ones in an existing cache.
    pub fn with_seen<I, S>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.seen
            .extend(hashes.into_iter().map(|h| h.as_ref().to_lowercase()));
        self
    }

    fn price(&self, symbol: &str) -> f64 {
        match self.prices.get(&symbol.to_uppercase()) {
            Some(price) => *price,
            None => {
                let fallback = PipelineError::PriceLookup {
                    symbol: symbol.to_string(),
                };
                tracing::debug!("{fallback}");
                1.0
            }
        }
    }

    pub fn normalize_one(
        &mut self,
        transfer: &Transfer,
        direction: Direction,
    ) -> Result<Transaction, Skipped> {
        let Some(timestamp) = transfer.timestamp else {
            return Err(Skipped::MissingTimestamp);
        };
        if timestamp.year() != self.year {
            return Err(Skipped::OutsideYear);
        }
        let hash = transfer.hash.to_lowercase();
        if self.seen.contains(&hash) {
            return Err(Skipped::Duplicate);
        }

        let token = transfer
            .asset
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(UNKNOWN_TOKEN)
            .to_string();
        let token_amount = transfer.amount.unwrap_or(0.0);
        let usd_value = token_amount * self.price(&token);

        self.seen.insert(hash.clone());
        Ok(Transaction {
            hash,
            from: transfer.from,
            to: transfer.to,
            date: timestamp.date_naive(),
            block_number: transfer.block_number,
            token,
            token_amount,
            usd_value,
            direction,
        })
    }

    pub fn normalize_all(
        &mut self,
        transfers: &[Transfer],
        direction: Direction,
    ) -> (Vec<Transaction>, NormalizeStats) {
        let mut stats = NormalizeStats::default();
        let mut transactions = Vec::with_capacity(transfers.len());

        for transfer in transfers {
            match self.normalize_one(transfer, direction) {
                Ok(tx) => {
                    stats.accepted += 1;
                    transactions.push(tx);
                }
                Err(skipped) => {
                    match skipped {
                        Skipped::MissingTimestamp => stats.missing_timestamp += 1,
                        Skipped::OutsideYear => stats.outside_year += 1,
                        Skipped::Duplicate => stats.duplicate += 1,
                    }
                    tracing::debug!(hash = %transfer.hash, ?skipped, "transfer skipped");
                }
            }
        }

        (transactions, stats)
    }
}
