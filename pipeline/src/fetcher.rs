use std::collections::{HashSet, VecDeque};

use alloy::primitives::Address;
use inflow_common::{Direction, Transfer, TransferCategory};
use inflow_utils::config::FetchConfig;

use crate::{
    provider::{TransferProvider, TransferQuery},
    retry::{classify, with_retry, FailureKind, RetryPolicy},
    PipelineError,
};

#[derive(Clone, Debug, PartialEq)]
pub struct FetchOptions {
    pub max_block_span: u64,
    pub max_pages: usize,
    pub retry: RetryPolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_block_span: config.max_block_span.max(1),
            max_pages: config.max_pages.max(1),
            retry: RetryPolicy::from(config),
        }
    }
}

/// Splits `[from, to]` into consecutive chunks of at most `span` blocks.
pub fn chunk_range(from: u64, to: u64, span: u64) -> Vec<(u64, u64)> {
    let span = span.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(span - 1).min(to);
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

#[derive(Debug)]
pub struct FailedRange {
    pub from: u64,
    pub to: u64,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub transfers: Vec<Transfer>,
    pub completed_ranges: usize,
    pub failed_ranges: Vec<FailedRange>,
    /// Ranges that still had pages left when the page ceiling was hit.
    pub truncated_ranges: Vec<(u64, u64)>,
}

impl FetchReport {
    /// Every attempted sub-range failed.
    pub fn is_total_failure(&self) -> bool {
        self.completed_ranges == 0 && !self.failed_ranges.is_empty()
    }

    pub fn earliest_failed_block(&self) -> Option<u64> {
        self.failed_ranges.iter().map(|range| range.from).min()
    }
}

struct RangeTransfers {
    transfers: Vec<Transfer>,
    truncated: bool,
}

/// Pulls every transfer to or from an address over a block range, one
/// sub-range at a time.
pub struct BlockRangeFetcher<'a, P> {
    provider: &'a P,
    options: &'a FetchOptions,
}

impl<'a, P: TransferProvider> BlockRangeFetcher<'a, P> {
    pub fn new(provider: &'a P, options: &'a FetchOptions) -> Self {
        Self { provider, options }
    }

    pub async fn fetch(
        &self,
        address: Address,
        from: u64,
        to: u64,
        direction: Direction,
        categories: &[TransferCategory],
    ) -> FetchReport {
        let mut report = FetchReport::default();
        if from > to {
            return report;
        }

        let mut queue: VecDeque<(u64, u64)> =
            chunk_range(from, to, self.options.max_block_span).into();
        tracing::debug!(%direction, from, to, chunks = queue.len(), "fetching transfers");

        while let Some((start, end)) = queue.pop_front() {
            match self
                .fetch_range(address, start, end, direction, categories)
                .await
            {
                Ok(range) => {
                    if range.truncated {
                        tracing::warn!(
                            %direction,
                            from = start,
                            to = end,
                            max_pages = self.options.max_pages,
                            "page ceiling reached, later transfers in this range are skipped"
                        );
                        report.truncated_ranges.push((start, end));
                    }
                    report.completed_ranges += 1;
                    report.transfers.extend(range.transfers);
                }
                Err(err) => match classify(&err) {
                    FailureKind::RangeTooWide if start < end => {
                        let mid = start + (end - start) / 2;
                        tracing::debug!(from = start, to = end, "range too wide, splitting");
                        queue.push_front((mid + 1, end));
                        queue.push_front((start, mid));
                    }
                    kind => {
                        let error = match kind {
                            FailureKind::RangeTooWide => PipelineError::RangeTooWide {
                                from: start,
                                to: end,
                            },
                            FailureKind::Transient => PipelineError::TransientProvider(err),
                            FailureKind::Fatal => PipelineError::ProviderUnavailable(err.to_string()),
                        };
                        tracing::warn!(
                            %direction,
                            from = start,
                            to = end,
                            error = %error,
                            "sub-range failed, continuing without it"
                        );
                        report.failed_ranges.push(FailedRange {
                            from: start,
                            to: end,
                            error,
                        });
                    }
                },
            }
        }

        let mut seen = HashSet::new();
        report.transfers.retain(|transfer| {
            transfer.block_number >= from
                && transfer.block_number <= to
                && seen.insert(transfer.unique_id.clone())
        });
        report.transfers.sort_by_key(|transfer| transfer.block_number);

        report
    }

    async fn fetch_range(
        &self,
        address: Address,
        from: u64,
        to: u64,
        direction: Direction,
        categories: &[TransferCategory],
    ) -> inflow_utils::Result<RangeTransfers> {
        let mut query = TransferQuery {
            from_block: from,
            to_block: to,
            address,
            direction,
            categories: categories.to_vec(),
            page_key: None,
        };
        let mut transfers = Vec::new();

        for _ in 0..self.options.max_pages {
            let page = with_retry(&self.options.retry, "alchemy_getAssetTransfers", || {
                self.provider.asset_transfers(&query)
            })
            .await?;
            transfers.extend(page.transfers);

            match page.next_page_key {
                Some(key) => query.page_key = Some(key),
                None => {
                    return Ok(RangeTransfers {
                        transfers,
                        truncated: false,
                    })
                }
            }
        }

        Ok(RangeTransfers {
            transfers,
            truncated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{incoming, outgoing, wallet, MockProvider};

    fn options(max_block_span: u64, max_pages: usize) -> FetchOptions {
        FetchOptions {
            max_block_span,
            max_pages,
            retry: RetryPolicy::immediate(3),
        }
    }

    fn transfers_every(step: u64, until: u64) -> Vec<Transfer> {
        (0..=until)
            .step_by(step as usize)
            .map(|block| incoming(&format!("0x{block:x}"), block, "2025-03-05T10:00:00Z", "USDC", 1.0))
            .collect()
    }

    fn blocks(report: &FetchReport) -> Vec<u64> {
        report.transfers.iter().map(|t| t.block_number).collect()
    }

    #[test]
    fn test_chunk_range() {
        assert_eq!(
            chunk_range(0, 24_999, 10_000),
            vec![(0, 9_999), (10_000, 19_999), (20_000, 24_999)]
        );
        assert_eq!(chunk_range(5, 5, 10), vec![(5, 5)]);
        assert!(chunk_range(6, 5, 10).is_empty());
    }

    #[tokio::test]
    async fn test_results_stay_in_range_and_sorted() {
        let provider = MockProvider::new(1_000).with_transfers(transfers_every(10, 1_000));
        let options = options(100, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 95, 405, Direction::In, &[TransferCategory::Erc20])
            .await;

        let blocks = blocks(&report);
        assert_eq!(blocks.first(), Some(&100));
        assert_eq!(blocks.last(), Some(&400));
        assert!(blocks.windows(2).all(|w| w[0] <= w[1]));
        assert!(blocks.iter().all(|b| (95..=405).contains(b)));
        assert_eq!(report.completed_ranges, 4);
        assert!(report.failed_ranges.is_empty());
    }

    #[tokio::test]
    async fn test_direction_selects_counterparty() {
        let provider = MockProvider::new(100).with_transfers(vec![
            incoming("0xa", 10, "2025-03-05T10:00:00Z", "USDC", 1.0),
            outgoing("0xb", 20, "2025-03-05T10:00:00Z", "USDC", 1.0),
        ]);
        let options = options(1_000, 5);
        let fetcher = BlockRangeFetcher::new(&provider, &options);

        let report = fetcher
            .fetch(wallet(), 0, 100, Direction::Out, &[TransferCategory::Erc20])
            .await;
        assert_eq!(report.transfers.len(), 1);
        assert_eq!(report.transfers[0].hash, "0xb");
    }

    #[tokio::test]
    async fn test_failed_sub_range_does_not_stop_the_rest() {
        let mut provider = MockProvider::new(1_000).with_transfers(transfers_every(50, 299));
        provider.failing = vec![(100, 199)];
        let options = options(100, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 0, 299, Direction::In, &[TransferCategory::Erc20])
            .await;

        assert_eq!(blocks(&report), vec![0, 50, 200, 250]);
        assert_eq!(report.completed_ranges, 2);
        assert_eq!(report.failed_ranges.len(), 1);
        assert_eq!(report.earliest_failed_block(), Some(100));
        assert!(matches!(
            report.failed_ranges[0].error,
            PipelineError::TransientProvider(_)
        ));
        assert!(!report.is_total_failure());
        // three attempts on the failing chunk, one on each healthy chunk
        assert_eq!(provider.queried().len(), 5);
    }

    #[tokio::test]
    async fn test_total_failure() {
        let mut provider = MockProvider::new(1_000);
        provider.failing = vec![(0, 1_000)];
        let options = options(100, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 0, 199, Direction::In, &[TransferCategory::Erc20])
            .await;
        assert!(report.is_total_failure());
        assert_eq!(report.failed_ranges.len(), 2);
    }

    #[tokio::test]
    async fn test_too_wide_ranges_are_halved() {
        let mut provider = MockProvider::new(1_000).with_transfers(transfers_every(7, 999));
        provider.max_span = Some(300);
        let options = options(1_000, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 0, 999, Direction::In, &[TransferCategory::Erc20])
            .await;

        assert!(report.failed_ranges.is_empty());
        assert_eq!(report.transfers.len(), transfers_every(7, 999).len());
        // 1000 -> 500 -> 250, four successful quarters
        assert_eq!(report.completed_ranges, 4);
    }

    #[tokio::test]
    async fn test_single_block_too_wide_fails() {
        let mut provider = MockProvider::new(10);
        provider.max_span = Some(0);
        let options = options(100, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 0, 1, Direction::In, &[TransferCategory::Erc20])
            .await;
        assert_eq!(report.failed_ranges.len(), 2);
        assert!(matches!(
            report.failed_ranges[0].error,
            PipelineError::RangeTooWide { from: 0, to: 0 }
        ));
    }

    #[tokio::test]
    async fn test_pagination_and_page_ceiling() {
        let mut provider = MockProvider::new(1_000).with_transfers(transfers_every(1, 99));
        provider.page_size = 10;

        let all_pages = options(1_000, 20);
        let report = BlockRangeFetcher::new(&provider, &all_pages)
            .fetch(wallet(), 0, 99, Direction::In, &[TransferCategory::Erc20])
            .await;
        assert_eq!(report.transfers.len(), 100);
        assert!(report.truncated_ranges.is_empty());

        let capped = options(1_000, 5);
        let report = BlockRangeFetcher::new(&provider, &capped)
            .fetch(wallet(), 0, 99, Direction::In, &[TransferCategory::Erc20])
            .await;
        assert_eq!(report.transfers.len(), 50);
        assert_eq!(report.truncated_ranges, vec![(0, 99)]);
        assert_eq!(report.completed_ranges, 1);
    }

    #[tokio::test]
    async fn test_duplicate_unique_ids_are_dropped() {
        let transfer = incoming("0xa", 10, "2025-03-05T10:00:00Z", "USDC", 1.0);
        let provider = MockProvider::new(100).with_transfers(vec![transfer.clone(), transfer]);
        let options = options(1_000, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 0, 100, Direction::In, &[TransferCategory::Erc20])
            .await;
        assert_eq!(report.transfers.len(), 1);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let provider = MockProvider::new(100);
        let options = options(1_000, 5);
        let report = BlockRangeFetcher::new(&provider, &options)
            .fetch(wallet(), 50, 10, Direction::In, &[TransferCategory::Erc20])
            .await;
        assert!(report.transfers.is_empty());
        assert!(!report.is_total_failure());
        assert!(provider.queried().is_empty());
    }
}
