//! Data-source aggregation.
//!
//! The explorer runs with two capability sets: the lite source answers
//! summary queries from the node and the stake database alone, while the
//! full source is the PostgreSQL query layer. `DataSources` aggregates
//! whichever are wired and answers each request from the most capable
//! source available; full-only operations fail with a lite-mode error
//! rather than a panic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use consensus_core::Hash;
use rpc_core::{BestBlock, NodeApi, StakeDiff};
use stakedb::{PoolInfo, StakeDatabase};

use crate::charts::{ChartData, ChartType, ChartsCache, ALL_CHART_TYPES};
use crate::database::ChainDb;
use crate::error::{ExplorerError, Result};
use crate::models::*;

/// Summary reads available in every mode.
#[async_trait]
pub trait LiteDataSource: Send + Sync {
    async fn best_block(&self) -> Result<BestBlock>;
    fn pool_info(&self, block_hash: &Hash) -> Result<Option<PoolInfo>>;
    fn pool_info_best(&self) -> Result<Option<PoolInfo>>;
    async fn stake_difficulty(&self) -> Result<StakeDiff>;
}

/// Chain summaries derived from the node and the stake database.
pub struct ChainSummarySource {
    node: Arc<dyn NodeApi>,
    stake_db: Arc<StakeDatabase>,
}

impl ChainSummarySource {
    pub fn new(node: Arc<dyn NodeApi>, stake_db: Arc<StakeDatabase>) -> Self {
        Self { node, stake_db }
    }
}

#[async_trait]
impl LiteDataSource for ChainSummarySource {
    async fn best_block(&self) -> Result<BestBlock> {
        Ok(self.node.best_block().await?)
    }

    fn pool_info(&self, block_hash: &Hash) -> Result<Option<PoolInfo>> {
        Ok(self.stake_db.pool_info(block_hash)?)
    }

    fn pool_info_best(&self) -> Result<Option<PoolInfo>> {
        Ok(self.stake_db.pool_info_best()?)
    }

    async fn stake_difficulty(&self) -> Result<StakeDiff> {
        Ok(self.node.stake_difficulty().await?)
    }
}

/// The aggregator handed to the presentation layer. Owns the charts cache;
/// chart reads are served from cache when its height matches the current
/// tip and recomputed under the cache's try-lock otherwise.
pub struct DataSources {
    pub lite: Arc<dyn LiteDataSource>,
    full: Option<ChainDb>,
    pub charts: Arc<ChartsCache>,
}

impl DataSources {
    pub fn new(lite: Arc<dyn LiteDataSource>, full: Option<ChainDb>, charts: Arc<ChartsCache>) -> Self {
        Self { lite, full, charts }
    }

    pub fn is_lite(&self) -> bool {
        self.full.is_none()
    }

    fn full(&self) -> Result<&ChainDb> {
        self.full.as_ref().ok_or(ExplorerError::LiteMode)
    }

    pub async fn address_balance(&self, address: &str) -> Result<AddressBalance> {
        self.full()?.address_balance(address).await
    }

    pub async fn address_utxos(&self, address: &str, current_height: i64) -> Result<Vec<AddressUtxo>> {
        self.full()?.address_utxos(address, current_height).await
    }

    pub async fn address_history(
        &self,
        address: &str,
        limit: i64,
        offset: i64,
        view: AddrTxViewType,
    ) -> Result<Vec<AddressHistoryRow>> {
        self.full()?.address_history(address, limit, offset, view).await
    }

    pub async fn ticket_status(&self, ticket_hash: Hash) -> Result<TicketStatus> {
        self.full()?.ticket_status(ticket_hash).await
    }

    pub async fn missed_votes_in_block(&self, block_hash: Hash) -> Result<Vec<Hash>> {
        self.full()?.missed_votes_in_block(block_hash).await
    }

    pub async fn block_status(&self, hash: Hash) -> Result<BlockStatus> {
        self.full()?.block_status(hash).await
    }

    pub async fn tx_block_placements(&self, tx_hash: Hash) -> Result<Vec<TxBlockPlacement>> {
        self.full()?.tx_block_placements(tx_hash).await
    }

    /// Chart data for the given tip. Cache hit requires the cache height
    /// to equal `tip_height` exactly; on a miss this task recomputes under
    /// the cache's update try-lock, and a task losing that race serves
    /// stale data rather than blocking.
    pub async fn chart_data(&self, chart: ChartType, tip_height: i64) -> Result<ChartData> {
        let db = self.full()?;
        if let Some(data) = self.charts.get(chart, tip_height) {
            return Ok(data);
        }

        let Some(_update) = self.charts.try_begin_update() else {
            debug!("charts recompute in flight; serving stale {chart:?}");
            return self
                .charts
                .get_stale(chart)
                .ok_or_else(|| ExplorerError::NotFound("charts not yet computed".into()));
        };

        // Lost-then-won race: the previous holder may have stored this tip.
        if let Some(data) = self.charts.get(chart, tip_height) {
            return Ok(data);
        }

        let mut charts = HashMap::new();
        for chart_type in ALL_CHART_TYPES {
            charts.insert(chart_type, db.chart_data(chart_type).await?);
        }
        self.charts.store(tip_height, charts);
        self.charts
            .get(chart, tip_height)
            .ok_or_else(|| ExplorerError::NotFound(format!("chart {chart:?}")))
    }
}
