//! In-process cache for aggregate chart data, keyed by the main-chain tip
//! height so it can never serve pre-reorg aggregates for a post-reorg tip.
//!
//! Readers take the data lock only briefly; recomputation is serialized by
//! a separate try-lock so at most one rebuild runs while readers stay
//! non-blocking. The cache is owned by the service root and passed down,
//! never ambient state.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChartType {
    TxPerDay,
    PoolSize,
    PoolValue,
    ChainWork,
    CoinSupply,
    TicketPrice,
}

pub const ALL_CHART_TYPES: [ChartType; 6] = [
    ChartType::TxPerDay,
    ChartType::PoolSize,
    ChartType::PoolValue,
    ChartType::ChainWork,
    ChartType::CoinSupply,
    ChartType::TicketPrice,
];

/// Parallel axes of one chart. Which fields are populated depends on the
/// chart type; consumers index `time` or `height` against `value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub time: Vec<i64>,
    pub height: Vec<i64>,
    pub value: Vec<f64>,
}

#[derive(Default)]
struct CacheState {
    /// Tip height the cached data was computed at; `None` until the first
    /// fill.
    height: Option<i64>,
    charts: HashMap<ChartType, ChartData>,
}

#[derive(Default)]
pub struct ChartsCache {
    state: RwLock<CacheState>,
    update_guard: tokio::sync::Mutex<()>,
}

impl ChartsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a chart if the cache was computed at exactly `tip_height`.
    pub fn get(&self, chart: ChartType, tip_height: i64) -> Option<ChartData> {
        let state = self.state.read();
        if state.height != Some(tip_height) {
            return None;
        }
        state.charts.get(&chart).cloned()
    }

    /// Serve whatever is cached regardless of tip, for readers that lose
    /// the recompute race and prefer stale data over blocking.
    pub fn get_stale(&self, chart: ChartType) -> Option<ChartData> {
        self.state.read().charts.get(&chart).cloned()
    }

    /// The tip height of the cached data, if any.
    pub fn cached_height(&self) -> Option<i64> {
        self.state.read().height
    }

    /// Replace the cache contents wholesale.
    pub fn store(&self, tip_height: i64, charts: HashMap<ChartType, ChartData>) {
        let mut state = self.state.write();
        state.height = Some(tip_height);
        state.charts = charts;
    }

    /// Drop everything; the next read misses and triggers a recompute.
    /// Called by the reorg coordinator.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.height = None;
        state.charts.clear();
    }

    /// Claim the recompute slot without blocking. Returns `None` when
    /// another recompute is already in flight; readers then fall back to
    /// stale data instead of waiting. Hold the returned guard across the
    /// rebuild and release it after [`store`](Self::store).
    pub fn try_begin_update(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.update_guard.try_lock().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_chart(v: f64) -> HashMap<ChartType, ChartData> {
        let mut m = HashMap::new();
        m.insert(
            ChartType::PoolSize,
            ChartData { time: vec![0], height: vec![1], value: vec![v] },
        );
        m
    }

    #[test]
    fn serves_only_exact_tip_height() {
        let cache = ChartsCache::new();
        assert!(cache.get(ChartType::PoolSize, 10).is_none());

        cache.store(10, one_chart(5.0));
        assert!(cache.get(ChartType::PoolSize, 10).is_some());
        // A new tip means the cache is stale, even though data exists.
        assert!(cache.get(ChartType::PoolSize, 11).is_none());
    }

    #[test]
    fn invalidate_clears() {
        let cache = ChartsCache::new();
        cache.store(10, one_chart(5.0));
        cache.invalidate();
        assert_eq!(cache.cached_height(), None);
        assert!(cache.get(ChartType::PoolSize, 10).is_none());
    }

    #[test]
    fn update_slot_is_exclusive() {
        let cache = ChartsCache::new();
        let held = cache.try_begin_update();
        assert!(held.is_some());
        // Second claimant is turned away without blocking.
        assert!(cache.try_begin_update().is_none());
        drop(held);
        assert!(cache.try_begin_update().is_some());
    }

    #[test]
    fn stale_reads_survive_a_tip_change() {
        let cache = ChartsCache::new();
        cache.store(10, one_chart(1.0));
        assert!(cache.get(ChartType::PoolSize, 11).is_none());
        assert_eq!(cache.get_stale(ChartType::PoolSize).unwrap().value, vec![1.0]);
    }
}
