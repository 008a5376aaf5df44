//! Turns sparse volume buckets into the contiguous series a chart expects.
//!
//! A period without a bucket is `0` when its blocks were already fetched and
//! `null` when nothing is known about it yet.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use inflow_common::{period::year_bounds, Period, VolumeBucket, VolumeCache};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilledBucket {
    pub date: NaiveDate,
    pub volume: Option<f64>,
}

/// One entry per `period` instance between `start` and `end` inclusive, in
/// ascending order.
pub fn fill_gaps(
    buckets: &[VolumeBucket],
    period: Period,
    start: NaiveDate,
    end: NaiveDate,
    covered_through: Option<NaiveDate>,
) -> Vec<FilledBucket> {
    let mut volumes: HashMap<NaiveDate, f64> = HashMap::new();
    for bucket in buckets {
        *volumes.entry(period.bucket_start(bucket.date)).or_default() += bucket.volume;
    }

    period
        .instances(start, end)
        .map(|date| {
            let volume = match volumes.get(&date) {
                Some(volume) => Some(*volume),
                None if covered_through.is_some_and(|covered| date <= covered) => Some(0.0),
                None => None,
            };
            FilledBucket { date, volume }
        })
        .collect()
}

pub fn fill_daily(
    buckets: &[VolumeBucket],
    start: NaiveDate,
    end: NaiveDate,
    covered_through: Option<NaiveDate>,
) -> Vec<FilledBucket> {
    fill_gaps(buckets, Period::Daily, start, end, covered_through)
}

pub fn fill_weekly(
    buckets: &[VolumeBucket],
    start: NaiveDate,
    end: NaiveDate,
    covered_through: Option<NaiveDate>,
) -> Vec<FilledBucket> {
    fill_gaps(buckets, Period::Weekly, start, end, covered_through)
}

pub fn fill_monthly(
    buckets: &[VolumeBucket],
    start: NaiveDate,
    end: NaiveDate,
    covered_through: Option<NaiveDate>,
) -> Vec<FilledBucket> {
    fill_gaps(buckets, Period::Monthly, start, end, covered_through)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeView {
    pub period: Period,
    pub year: i32,
    pub data: Vec<FilledBucket>,
    pub total: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_processed_block: u64,
}

/// Full-year series of one period, `cache` being `None` when the year was
/// never fetched.
pub fn year_view(
    cache: Option<&VolumeCache>,
    period: Period,
    year: i32,
) -> inflow_common::Result<VolumeView> {
    let (start, end) = year_bounds(year)?;
    let buckets = cache.map(|c| c.buckets(period)).unwrap_or_default();
    let covered_through = cache.and_then(|c| c.covered_through());

    let data = fill_gaps(buckets, period, start, end, covered_through);
    let total = data.iter().filter_map(|bucket| bucket.volume).sum();

    Ok(VolumeView {
        period,
        year,
        data,
        total,
        last_updated: cache.and_then(|c| c.last_updated),
        last_processed_block: cache
            .map(|c| c.block_info.last_processed_block)
            .unwrap_or(0),
    })
}
