use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use inflow_utils::cache::TtlCache;

use crate::{
    provider::TransferProvider,
    retry::{with_retry, RetryPolicy},
};

/// Blocks used to estimate the average block time.
const SAMPLE_WINDOW: u64 = 10_000;

/// First bracketing step around the estimate, doubled until the target is enclosed.
const INITIAL_STEP: u64 = 64;

/// Maps timestamps to block numbers by searching block headers.
pub struct BlockFinder<'a, P> {
    provider: &'a P,
    timestamps: &'a TtlCache<i64>,
    ttl: Duration,
    retry: &'a RetryPolicy,
}

impl<'a, P: TransferProvider> BlockFinder<'a, P> {
    pub fn new(
        provider: &'a P,
        timestamps: &'a TtlCache<i64>,
        ttl: Duration,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            provider,
            timestamps,
            ttl,
            retry,
        }
    }

    async fn timestamp(&self, block: u64) -> inflow_utils::Result<i64> {
        let key = block.to_string();
        if let Some(timestamp) = self.timestamps.get(&key) {
            return Ok(timestamp);
        }
        let timestamp = with_retry(self.retry, "eth_getBlockByNumber", || {
            self.provider.block_timestamp(block)
        })
        .await?
        .timestamp();
        self.timestamps.set(key, timestamp, self.ttl);
        Ok(timestamp)
    }

    /// UTC day the block was produced on.
    pub async fn block_date(&self, block: u64) -> inflow_utils::Result<NaiveDate> {
        let timestamp = self.timestamp(block).await?;
        DateTime::from_timestamp(timestamp, 0)
            .map(|time| time.date_naive())
            .ok_or_else(|| inflow_utils::Error::InvalidHexQuantity(timestamp.to_string()))
    }

    /// Smallest block whose timestamp is at or after `target` (unix seconds).
    /// Returns `head + 1` when `target` is later than the head block.
    pub async fn block_at_or_after(&self, target: i64, head: u64) -> inflow_utils::Result<u64> {
        let head_ts = self.timestamp(head).await?;
        if target > head_ts {
            return Ok(head + 1);
        }
        if head == 0 || target <= self.timestamp(0).await? {
            return Ok(0);
        }

        // here ts(0) < target <= ts(head)
        let sample = head.min(SAMPLE_WINDOW);
        let sample_ts = self.timestamp(head - sample).await?;
        let block_time = ((head_ts - sample_ts) as f64 / sample as f64).max(f64::EPSILON);
        let behind = ((head_ts - target) as f64 / block_time) as u64;
        let estimate = head.saturating_sub(behind);

        let mut lo;
        let mut hi;
        let mut step = INITIAL_STEP;
        if self.timestamp(estimate).await? >= target {
            hi = estimate;
            lo = estimate.saturating_sub(step);
            while self.timestamp(lo).await? >= target {
                hi = lo;
                step = step.saturating_mul(2);
                lo = lo.saturating_sub(step);
            }
        } else {
            lo = estimate;
            hi = estimate.saturating_add(step).min(head);
            while self.timestamp(hi).await? < target {
                lo = hi;
                step = step.saturating_mul(2);
                hi = hi.saturating_add(step).min(head);
            }
        }

        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.timestamp(mid).await? >= target {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Ok(hi)
    }

    /// First and last block of a UTC calendar year, clamped to `head`.
    /// `None` when the year has no blocks up to `head`.
    pub async fn year_range(&self, year: i32, head: u64) -> inflow_utils::Result<Option<(u64, u64)>> {
        let (Some(start), Some(end)) = (
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single(),
            Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single(),
        ) else {
            return Ok(None);
        };

        let first = self.block_at_or_after(start.timestamp(), head).await?;
        if first > head {
            return Ok(None);
        }
        let next_year_first = self.block_at_or_after(end.timestamp(), head).await?;
        if next_year_first <= first {
            return Ok(None);
        }
        Ok(Some((first, next_year_first - 1)))
    }
}
