//! Performance aggregator: windowed impression/click/conversion counts per
//! creative, cached for a short TTL to bound read load on the event store.
//!
//! Invalidation is time-based only; new events become visible once the cached
//! snapshot expires. When the event store is unreachable a stale snapshot is
//! served for up to `ttl * stale_grace_multiplier`.

use crate::scoring::snapshot_from_counts;
use chrono::Duration;
use futures_util::future::join_all;
use optimizer_cache::LocalCache;
use optimizer_core::config::{AggregatorConfig, StoreConfig};
use optimizer_core::store::with_timeout;
use optimizer_core::types::{BatchFailure, Creative, EventType, PerformanceSnapshot};
use optimizer_core::{CampaignStore, Clock, EventQuery, EventStore, OptimizerError, OptimizerResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache key: one snapshot per creative, campaign and window length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub campaign_id: String,
    pub creative_id: String,
    pub window_minutes: i64,
}

/// Per-creative snapshots for one campaign. Creatives whose data could not be
/// read carry an all-zero snapshot and are listed in `unavailable`.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignPerformance {
    pub campaign_id: String,
    pub snapshots: HashMap<String, PerformanceSnapshot>,
    pub unavailable: Vec<BatchFailure>,
}

impl CampaignPerformance {
    /// True when there were creatives but none had readable data.
    pub fn all_unavailable(&self) -> bool {
        !self.snapshots.is_empty() && self.unavailable.len() >= self.snapshots.len()
    }

    pub fn total_score(&self) -> f64 {
        self.snapshots.values().map(|s| s.performance_score).sum()
    }
}

pub struct PerformanceAggregator {
    events: Arc<dyn EventStore>,
    campaigns: Arc<dyn CampaignStore>,
    cache: LocalCache<SnapshotKey, PerformanceSnapshot>,
    clock: Arc<dyn Clock>,
    default_window_minutes: i64,
    max_window_minutes: i64,
    stale_grace: Duration,
    store_timeout: std::time::Duration,
}

impl PerformanceAggregator {
    pub fn new(
        events: Arc<dyn EventStore>,
        campaigns: Arc<dyn CampaignStore>,
        clock: Arc<dyn Clock>,
        config: &AggregatorConfig,
        store: &StoreConfig,
    ) -> Self {
        let ttl = Duration::seconds(config.cache_ttl_secs as i64);
        Self {
            events,
            campaigns,
            cache: LocalCache::new(ttl, config.max_entries, clock.clone()),
            clock,
            default_window_minutes: config.default_window_minutes,
            max_window_minutes: config.max_window_minutes,
            stale_grace: ttl * config.stale_grace_multiplier.max(1) as i32,
            store_timeout: store.timeout(),
        }
    }

    pub fn default_window_minutes(&self) -> i64 {
        self.default_window_minutes
    }

    /// The requested window, or the default, checked against `1..=max`.
    pub fn resolve_window(&self, window_minutes: Option<i64>) -> OptimizerResult<i64> {
        let window = window_minutes.unwrap_or(self.default_window_minutes);
        if window <= 0 || window > self.max_window_minutes {
            return Err(OptimizerError::InvalidInput(format!(
                "window_minutes must be between 1 and {}, got {window}",
                self.max_window_minutes
            )));
        }
        Ok(window)
    }

    /// Snapshot for one creative over `[now - window, now]`.
    pub async fn get_performance(
        &self,
        creative_id: &str,
        campaign_id: &str,
        window_minutes: Option<i64>,
    ) -> OptimizerResult<PerformanceSnapshot> {
        let window_minutes = self.resolve_window(window_minutes)?;
        let key = SnapshotKey {
            campaign_id: campaign_id.to_string(),
            creative_id: creative_id.to_string(),
            window_minutes,
        };

        if let Some(snapshot) = self.cache.get(&key) {
            metrics::counter!("aggregator.cache.hit").increment(1);
            return Ok(snapshot);
        }
        metrics::counter!("aggregator.cache.miss").increment(1);

        match self.fetch_snapshot(&key).await {
            Ok(snapshot) => {
                self.cache.put(key, snapshot.clone());
                Ok(snapshot)
            }
            Err(e) if e.is_data_unavailable() => match self.cache.get_within(&key, self.stale_grace) {
                Some(stale) => {
                    metrics::counter!("aggregator.cache.stale_served").increment(1);
                    warn!(
                        campaign_id = campaign_id,
                        creative_id = creative_id,
                        age_secs = stale.age.num_seconds(),
                        error = %e,
                        "Event store unavailable, serving stale snapshot"
                    );
                    Ok(stale.value)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn fetch_snapshot(&self, key: &SnapshotKey) -> OptimizerResult<PerformanceSnapshot> {
        let now = self.clock.now();
        let since = Duration::try_minutes(key.window_minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                OptimizerError::InvalidInput(format!(
                    "window of {} minutes is out of range",
                    key.window_minutes
                ))
            })?;
        let query = |event_type| {
            EventQuery::creative(key.campaign_id.as_str(), key.creative_id.as_str(), event_type, since)
        };
        let impressions_q = query(EventType::Impression);
        let clicks_q = query(EventType::Click);
        let conversions_q = query(EventType::Conversion);

        let (impressions, clicks, conversions) = with_timeout(self.store_timeout, "count_events", async {
            tokio::try_join!(
                self.events.count_events(&impressions_q),
                self.events.count_events(&clicks_q),
                self.events.count_events(&conversions_q),
            )
        })
        .await?;

        debug!(
            campaign_id = %key.campaign_id,
            creative_id = %key.creative_id,
            impressions = impressions,
            clicks = clicks,
            conversions = conversions,
            "Performance snapshot computed"
        );

        Ok(snapshot_from_counts(
            &key.creative_id,
            &key.campaign_id,
            impressions,
            clicks,
            conversions,
            key.window_minutes,
            now,
        ))
    }

    /// Snapshots for every active creative of a campaign, fetched concurrently.
    pub async fn get_campaign_performance(
        &self,
        campaign_id: &str,
        window_minutes: Option<i64>,
    ) -> OptimizerResult<CampaignPerformance> {
        let creatives = with_timeout(
            self.store_timeout,
            "get_active_creatives",
            self.campaigns.get_active_creatives(campaign_id),
        )
        .await?;
        self.performance_for(campaign_id, &creatives, window_minutes).await
    }

    /// Fan out one fetch per creative and fan back in. A failed fetch only
    /// zeroes its own creative; an invalid window fails the whole call.
    pub async fn performance_for(
        &self,
        campaign_id: &str,
        creatives: &[Creative],
        window_minutes: Option<i64>,
    ) -> OptimizerResult<CampaignPerformance> {
        let window = self.resolve_window(window_minutes)?;
        let results = join_all(
            creatives
                .iter()
                .map(|c| self.get_performance(&c.id, campaign_id, Some(window))),
        )
        .await;

        let now = self.clock.now();
        let mut snapshots = HashMap::with_capacity(creatives.len());
        let mut unavailable = Vec::new();
        for (creative, result) in creatives.iter().zip(results) {
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(
                        campaign_id = campaign_id,
                        creative_id = %creative.id,
                        error = %e,
                        "Performance unavailable, treating creative as unexplored"
                    );
                    unavailable.push(BatchFailure::new(creative.id.clone(), e.to_string()));
                    PerformanceSnapshot::empty(creative.id.clone(), campaign_id, window, now)
                }
            };
            snapshots.insert(creative.id.clone(), snapshot);
        }

        Ok(CampaignPerformance {
            campaign_id: campaign_id.to_string(),
            snapshots,
            unavailable,
        })
    }

    /// Drop snapshots too old to be served even as stale fallback.
    pub fn maintenance(&self) -> usize {
        self.cache.evict_older_than(self.stale_grace)
    }

    pub fn cached_snapshots(&self) -> usize {
        self.cache.len()
    }
}
