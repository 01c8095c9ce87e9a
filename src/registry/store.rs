//! Aggregator registry
//!
//! Maps game ids to their live aggregator. The registry only holds weak
//! references: an aggregator lives as long as some ingestion, viewer, or
//! archive task holds it, and a game id seen again after that starts a
//! fresh aggregator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use super::aggregator::{AggregatorStats, StreamAggregator};
use super::config::AggregatorConfig;

/// Central registry of live games
pub struct AggregatorRegistry {
    aggregators: Mutex<HashMap<u64, Weak<StreamAggregator>>>,
    config: AggregatorConfig,
}

impl AggregatorRegistry {
    /// Create a registry with default aggregator configuration
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    pub fn with_config(config: AggregatorConfig) -> Self {
        Self {
            aggregators: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn aggregators(&self) -> MutexGuard<'_, HashMap<u64, Weak<StreamAggregator>>> {
        self.aggregators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Live aggregator for a game, creating it if needed
    ///
    /// The flag is true when this call created the aggregator; the caller
    /// is then responsible for starting its archive writer.
    pub fn get_or_create(&self, game_id: u64) -> (Arc<StreamAggregator>, bool) {
        let mut aggregators = self.aggregators();

        if let Some(existing) = aggregators.get(&game_id).and_then(Weak::upgrade) {
            return (existing, false);
        }

        let aggregator = Arc::new(StreamAggregator::new(game_id, self.config.clone()));
        aggregators.insert(game_id, Arc::downgrade(&aggregator));
        aggregators.retain(|_, weak| weak.strong_count() > 0);

        tracing::info!(
            game_id = game_id,
            active = aggregators.len(),
            "Stream aggregator created"
        );

        (aggregator, true)
    }

    /// Live aggregator for a game, if one exists
    pub fn get(&self, game_id: u64) -> Option<Arc<StreamAggregator>> {
        self.aggregators().get(&game_id).and_then(Weak::upgrade)
    }

    /// Drop entries whose aggregator is gone; returns how many were removed
    pub fn prune(&self) -> usize {
        let mut aggregators = self.aggregators();
        let before = aggregators.len();
        aggregators.retain(|_, weak| weak.strong_count() > 0);
        let removed = before - aggregators.len();
        if removed > 0 {
            tracing::debug!(removed = removed, "Pruned finished aggregators");
        }
        removed
    }

    /// Number of live aggregators
    pub fn len(&self) -> usize {
        self.aggregators()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of games with a live aggregator, sorted
    pub fn active_games(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .aggregators()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Statistics of every live aggregator
    pub fn stats(&self) -> Vec<AggregatorStats> {
        let live: Vec<Arc<StreamAggregator>> = self
            .aggregators()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        let mut stats: Vec<AggregatorStats> = live.iter().map(|a| a.stats()).collect();
        stats.sort_unstable_by_key(|s| s.game_id);
        stats
    }

    /// Spawn background pruning
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_prune_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.prune();
            }
        })
    }
}

impl Default for AggregatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_shares_aggregator() {
        let registry = AggregatorRegistry::new();

        let (a, created) = registry.get_or_create(7);
        assert!(created);
        let (b, created) = registry.get_or_create(7);
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.game_id(), 7);

        assert!(Arc::ptr_eq(&registry.get(7).unwrap(), &a));
        assert!(registry.get(8).is_none());
    }

    #[test]
    fn test_weak_entries_expire() {
        let registry = AggregatorRegistry::new();

        let (a, _) = registry.get_or_create(1);
        let (_b, _) = registry.get_or_create(2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_games(), vec![1, 2]);

        drop(a);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.prune(), 0);

        // A game id seen again gets a fresh aggregator
        let (again, created) = registry.get_or_create(1);
        assert!(created);
        assert_eq!(again.current_tick(), 0);
    }

    #[test]
    fn test_stats_sorted() {
        let registry = AggregatorRegistry::with_config(AggregatorConfig::default().live_delay_steps(1));
        let (_c, _) = registry.get_or_create(30);
        let (_a, _) = registry.get_or_create(10);

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].game_id, 10);
        assert_eq!(stats[1].game_id, 30);
        assert!(!stats[0].complete);
        assert_eq!(registry.config().live_delay_steps, 1);
    }

    #[tokio::test]
    async fn test_prune_task() {
        let registry = Arc::new(AggregatorRegistry::new());
        let (a, _) = registry.get_or_create(5);
        drop(a);

        let handle = registry.spawn_prune_task(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();

        assert_eq!(registry.aggregators().len(), 0);
        assert!(registry.is_empty());
    }
}
