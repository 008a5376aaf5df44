use std::{future::Future, sync::Arc};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use inflow_common::{Direction, Transfer, TransferCategory};
use inflow_utils::alchemy::{Alchemy, AssetTransfersParams};

use crate::PipelineError;

#[derive(Clone, Debug, PartialEq)]
pub struct TransferQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Address,
    pub direction: Direction,
    pub categories: Vec<TransferCategory>,
    pub page_key: Option<String>,
}

#[derive(Debug, Default)]
pub struct TransferPage {
    pub transfers: Vec<Transfer>,
    pub next_page_key: Option<String>,
}

/// What the pipeline needs from a blockchain data provider.
pub trait TransferProvider: Send + Sync {
    fn block_number(&self) -> impl Future<Output = inflow_utils::Result<u64>> + Send;

    fn block_timestamp(
        &self,
        block: u64,
    ) -> impl Future<Output = inflow_utils::Result<DateTime<Utc>>> + Send;

    fn asset_transfers(
        &self,
        query: &TransferQuery,
    ) -> impl Future<Output = inflow_utils::Result<TransferPage>> + Send;
}

impl<P: TransferProvider> TransferProvider for Arc<P> {
    fn block_number(&self) -> impl Future<Output = inflow_utils::Result<u64>> + Send {
        (**self).block_number()
    }

    fn block_timestamp(
        &self,
        block: u64,
    ) -> impl Future<Output = inflow_utils::Result<DateTime<Utc>>> + Send {
        (**self).block_timestamp(block)
    }

    fn asset_transfers(
        &self,
        query: &TransferQuery,
    ) -> impl Future<Output = inflow_utils::Result<TransferPage>> + Send {
        (**self).asset_transfers(query)
    }
}

impl TransferProvider for Alchemy {
    async fn block_number(&self) -> inflow_utils::Result<u64> {
        Alchemy::block_number(self).await
    }

    async fn block_timestamp(&self, block: u64) -> inflow_utils::Result<DateTime<Utc>> {
        Alchemy::block_timestamp(self, block).await
    }

    async fn asset_transfers(&self, query: &TransferQuery) -> inflow_utils::Result<TransferPage> {
        let mut params = AssetTransfersParams::new(query.from_block, query.to_block, &query.categories);
        match query.direction {
            Direction::In => params.to_address = Some(query.address),
            Direction::Out => params.from_address = Some(query.address),
        }
        params.page_key = query.page_key.clone();

        let result = Alchemy::asset_transfers(self, &params).await?;

        let mut transfers = Vec::with_capacity(result.transfers.len());
        for raw in result.transfers {
            let hash = raw.hash.clone();
            match raw.into_transfer() {
                Ok(transfer) => transfers.push(transfer),
                Err(err) => {
                    let dropped = PipelineError::DataShape {
                        hash,
                        reason: "unreadable block number",
                    };
                    tracing::debug!(error = %err, "{dropped}");
                }
            }
        }

        Ok(TransferPage {
            transfers,
            next_page_key: result.page_key,
        })
    }
}
