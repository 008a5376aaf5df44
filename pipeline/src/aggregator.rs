use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use inflow_common::{Direction, Period, Transaction, VolumeBucket, VolumeCache};
use strum::IntoEnumIterator;

/// Adds `volume` to the bucket starting at `date`, inserting it in order if new.
fn add_volume(buckets: &mut Vec<VolumeBucket>, date: NaiveDate, volume: f64) {
    match buckets.binary_search_by_key(&date, |bucket| bucket.date) {
        Ok(index) => buckets[index].volume += volume,
        Err(index) => buckets.insert(index, VolumeBucket { date, volume }),
    }
}

/// Merges `transactions` into `existing`.
///
/// Incoming transactions add their USD value to the daily, weekly and monthly
/// bucket covering their date; outgoing ones are only counted. Transactions
/// whose hash is already in the cache are ignored. With `force_refresh` the
/// buckets, counters and transaction list are rebuilt from `transactions`
/// alone, including `blockInfo.lastProcessedBlock`.
///
/// `covered_through` is the UTC day of `as_of_block`. When it is unknown the
/// previous coverage is kept.
pub fn aggregate(
    existing: Option<VolumeCache>,
    transactions: Vec<Transaction>,
    as_of_block: u64,
    covered_through: Option<NaiveDate>,
    force_refresh: bool,
    now: DateTime<Utc>,
) -> VolumeCache {
    let previous_block = existing
        .as_ref()
        .filter(|_| !force_refresh)
        .map(|cache| cache.block_info.last_processed_block)
        .unwrap_or(0);

    let mut cache = match existing {
        Some(cache) if !force_refresh => cache,
        _ => VolumeCache::default(),
    };

    let mut seen: HashSet<String> = cache.transactions.iter().map(|tx| tx.hash.clone()).collect();
    for tx in transactions {
        if !seen.insert(tx.hash.clone()) {
            continue;
        }
        match tx.direction {
            Direction::In => {
                for period in Period::iter() {
                    let start = period.bucket_start(tx.date);
                    add_volume(cache.buckets_mut(period), start, tx.usd_value);
                }
                cache.stats.incoming_count += 1;
                cache.stats.total_volume += tx.usd_value;
            }
            Direction::Out => cache.stats.outgoing_count += 1,
        }
        cache.transactions.push(tx);
    }
    cache.transactions.sort_by_key(|tx| tx.block_number);

    if as_of_block >= previous_block {
        cache.block_info.last_processed_block = as_of_block;
        if covered_through.is_some() {
            cache.block_info.covered_through = covered_through;
        }
    }
    cache.block_info.processing_date = Some(now);
    cache.last_updated = Some(now);

    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{sender, utc, wallet};

    fn tx(hash: &str, date: &str, usd_value: f64, direction: Direction) -> Transaction {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        Transaction {
            hash: hash.to_string(),
            from: sender(),
            to: Some(wallet()),
            date,
            block_number: 1,
            token: "USDC".to_string(),
            token_amount: usd_value,
            usd_value,
            direction,
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn volume(buckets: &[VolumeBucket], date: &str) -> Option<f64> {
        buckets
            .iter()
            .find(|bucket| bucket.date == day(date))
            .map(|bucket| bucket.volume)
    }

    fn sample() -> Vec<Transaction> {
        vec![
            tx("0x1", "2025-03-05", 100.0, Direction::In),
            tx("0x2", "2025-03-09", 50.0, Direction::In),
            tx("0x3", "2025-03-10", 25.0, Direction::In),
            tx("0x4", "2025-04-01", 10.0, Direction::In),
            tx("0x5", "2025-03-10", 999.0, Direction::Out),
        ]
    }

    #[test]
    fn test_single_transfer_scenario() {
        let now = utc("2025-03-06T00:00:00Z");
        let cache = aggregate(
            None,
            vec![tx("0xa", "2025-03-05", 100.0, Direction::In)],
            42,
            Some(day("2025-03-06")),
            false,
            now,
        );
        assert_eq!(volume(&cache.daily, "2025-03-05"), Some(100.0));
        assert_eq!(volume(&cache.weekly, "2025-03-03"), Some(100.0));
        assert_eq!(volume(&cache.monthly, "2025-03-01"), Some(100.0));
        assert_eq!(cache.block_info.last_processed_block, 42);
        assert_eq!(cache.covered_through(), Some(day("2025-03-06")));
        assert_eq!(cache.last_updated, Some(now));
    }

    #[test]
    fn test_buckets_and_stats() {
        let cache = aggregate(None, sample(), 10, None, false, utc("2025-05-01T00:00:00Z"));

        assert_eq!(cache.daily.len(), 4);
        // Sunday the 9th belongs to the week of Monday the 3rd
        assert_eq!(volume(&cache.weekly, "2025-03-03"), Some(150.0));
        assert_eq!(volume(&cache.weekly, "2025-03-10"), Some(25.0));
        assert_eq!(volume(&cache.monthly, "2025-03-01"), Some(175.0));
        assert_eq!(volume(&cache.monthly, "2025-04-01"), Some(10.0));
        assert_eq!(volume(&cache.daily, "2025-03-10"), Some(25.0));

        assert_eq!(cache.stats.incoming_count, 4);
        assert_eq!(cache.stats.outgoing_count, 1);
        assert_eq!(cache.stats.total_volume, 185.0);
        assert_eq!(cache.transactions.len(), 5);
        assert!(cache.daily.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_daily_sums_match_weekly_and_monthly() {
        let cache = aggregate(None, sample(), 10, None, false, utc("2025-05-01T00:00:00Z"));

        for period in [Period::Weekly, Period::Monthly] {
            for bucket in cache.buckets(period) {
                let daily_sum: f64 = cache
                    .daily
                    .iter()
                    .filter(|d| period.bucket_start(d.date) == bucket.date)
                    .map(|d| d.volume)
                    .sum();
                assert!((daily_sum - bucket.volume).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_merge_adds_and_skips_known_hashes() {
        let now = utc("2025-05-01T00:00:00Z");
        let first = aggregate(None, sample(), 10, None, false, now);
        let second = aggregate(
            Some(first),
            vec![
                tx("0x1", "2025-03-05", 100.0, Direction::In),
                tx("0x6", "2025-03-05", 1.0, Direction::In),
            ],
            20,
            None,
            false,
            now,
        );

        assert_eq!(volume(&second.daily, "2025-03-05"), Some(101.0));
        assert_eq!(second.stats.incoming_count, 5);
        assert_eq!(second.block_info.last_processed_block, 20);
    }

    #[test]
    fn test_force_refresh_is_idempotent() {
        let now = utc("2025-05-01T00:00:00Z");
        let first = aggregate(None, sample(), 10, None, true, now);
        let second = aggregate(Some(first.clone()), sample(), 10, None, true, now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_last_processed_block_never_decreases() {
        let now = utc("2025-05-01T00:00:00Z");
        let cache = aggregate(None, vec![], 100, Some(day("2025-04-30")), false, now);
        let cache = aggregate(Some(cache), vec![], 50, Some(day("2025-04-01")), false, now);
        assert_eq!(cache.block_info.last_processed_block, 100);
        assert_eq!(cache.covered_through(), Some(day("2025-04-30")));
    }

    #[test]
    fn test_unknown_coverage_keeps_previous_day() {
        let now = utc("2025-05-01T00:00:00Z");
        let cache = aggregate(None, vec![], 100, Some(day("2025-04-30")), false, now);
        let cache = aggregate(Some(cache), vec![], 120, None, false, now);
        assert_eq!(cache.block_info.last_processed_block, 120);
        assert_eq!(cache.covered_through(), Some(day("2025-04-30")));
    }
}
