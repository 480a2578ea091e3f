//! Traffic-weight rebalancing: converts performance scores into creative
//! weights with a minimum floor so no creative is starved of traffic.

use futures_util::future::join_all;
use optimizer_analytics::PerformanceAggregator;
use optimizer_core::config::{RebalancerConfig, StoreConfig};
use optimizer_core::store::with_timeout;
use optimizer_core::types::BatchFailure;
use optimizer_core::{CampaignStore, OptimizerError, OptimizerResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeightUpdate {
    pub creative_id: String,
    pub score: f64,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RebalanceReport {
    pub campaign_id: String,
    /// Set when the rebalance was a no-op.
    pub skipped_reason: Option<String>,
    pub updates: Vec<WeightUpdate>,
    pub failures: Vec<BatchFailure>,
}

impl RebalanceReport {
    fn skipped(campaign_id: &str, reason: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            skipped_reason: Some(reason.into()),
            updates: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

/// Map scores to integer weights. Returns `None` when the total score is zero.
///
/// Creatives whose proportional share falls below `min_weight` are pinned to
/// it and the remaining budget is split proportionally among the rest, so the
/// weights sum to `total_weight` whenever `min_weight * n <= total_weight`.
/// Fractional shares are resolved by largest remainder.
pub fn compute_weights(scores: &[f64], min_weight: u32, total_weight: u32) -> Option<Vec<u32>> {
    let scores: Vec<f64> = scores
        .iter()
        .map(|s| if s.is_finite() { s.max(0.0) } else { 0.0 })
        .collect();
    let total: f64 = scores.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let n = scores.len();
    let mut pinned = vec![false; n];
    loop {
        let budget = total_weight.saturating_sub(min_weight * pinned.iter().filter(|p| **p).count() as u32);
        let free_score: f64 = (0..n).filter(|i| !pinned[*i]).map(|i| scores[i]).sum();
        if free_score <= 0.0 {
            pinned.iter_mut().for_each(|p| *p = true);
            break;
        }
        let mut changed = false;
        for i in 0..n {
            if !pinned[i] && (budget as f64 * scores[i] / free_score) < min_weight as f64 {
                pinned[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let pinned_count = pinned.iter().filter(|p| **p).count() as u32;
    let budget = total_weight.saturating_sub(min_weight * pinned_count);
    let free_score: f64 = (0..n).filter(|i| !pinned[*i]).map(|i| scores[i]).sum();

    let mut weights = vec![min_weight; n];
    let mut remainders = Vec::new();
    let mut assigned = 0u32;
    for i in (0..n).filter(|i| !pinned[*i]) {
        let share = budget as f64 * scores[i] / free_score;
        weights[i] = share.floor() as u32;
        assigned += weights[i];
        remainders.push((i, share - share.floor()));
    }
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    for (i, _) in remainders.iter().take(budget.saturating_sub(assigned) as usize) {
        weights[*i] += 1;
    }

    Some(weights)
}

pub struct WeightRebalancer {
    aggregator: Arc<PerformanceAggregator>,
    campaigns: Arc<dyn CampaignStore>,
    config: RebalancerConfig,
    store_timeout: std::time::Duration,
}

impl WeightRebalancer {
    pub fn new(
        aggregator: Arc<PerformanceAggregator>,
        campaigns: Arc<dyn CampaignStore>,
        config: RebalancerConfig,
        store: &StoreConfig,
    ) -> Self {
        Self {
            aggregator,
            campaigns,
            config,
            store_timeout: store.timeout(),
        }
    }

    /// Recompute and write weights for every active creative of the campaign.
    /// Writes are issued concurrently; a failed write is reported, not fatal.
    pub async fn rebalance(&self, campaign_id: &str) -> OptimizerResult<RebalanceReport> {
        let creatives = with_timeout(
            self.store_timeout,
            "get_active_creatives",
            self.campaigns.get_active_creatives(campaign_id),
        )
        .await?;
        if creatives.is_empty() {
            return Ok(RebalanceReport::skipped(campaign_id, "no active creatives"));
        }

        let performance = self
            .aggregator
            .performance_for(campaign_id, &creatives, None)
            .await?;
        if !performance.unavailable.is_empty() {
            warn!(
                campaign_id = campaign_id,
                unavailable = performance.unavailable.len(),
                "Skipping rebalance, performance data incomplete"
            );
            return Ok(RebalanceReport::skipped(campaign_id, "performance data unavailable"));
        }

        let scores: Vec<f64> = creatives
            .iter()
            .map(|c| {
                performance
                    .snapshots
                    .get(&c.id)
                    .map(|s| s.performance_score)
                    .unwrap_or(0.0)
            })
            .collect();

        let Some(weights) =
            compute_weights(&scores, self.config.min_weight, self.config.total_weight)
        else {
            info!(campaign_id = campaign_id, "Skipping rebalance, total score is zero");
            return Ok(RebalanceReport::skipped(campaign_id, "insufficient data"));
        };

        let updates: Vec<WeightUpdate> = creatives
            .iter()
            .zip(scores)
            .zip(weights)
            .map(|((creative, score), weight)| WeightUpdate {
                creative_id: creative.id.clone(),
                score,
                weight,
            })
            .collect();

        let results = join_all(updates.iter().map(|u| {
            with_timeout(
                self.store_timeout,
                "update_creative_weight",
                self.campaigns.update_creative_weight(&u.creative_id, u.weight),
            )
        }))
        .await;

        let mut applied = Vec::with_capacity(updates.len());
        let mut failures = Vec::new();
        for (update, result) in updates.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    metrics::counter!("rebalancer.writes").increment(1);
                    applied.push(update);
                }
                Err(e) => {
                    metrics::counter!("rebalancer.write_failures").increment(1);
                    warn!(
                        campaign_id = campaign_id,
                        creative_id = %update.creative_id,
                        weight = update.weight,
                        error = %e,
                        "Weight update failed"
                    );
                    failures.push(BatchFailure::new(update.creative_id, e.to_string()));
                }
            }
        }

        if applied.is_empty() {
            return Err(OptimizerError::PartialFailure {
                succeeded: 0,
                failures,
            });
        }

        info!(
            campaign_id = campaign_id,
            updated = applied.len(),
            failed = failures.len(),
            "Campaign weights rebalanced"
        );

        Ok(RebalanceReport {
            campaign_id: campaign_id.to_string(),
            skipped_reason: None,
            updates: applied,
            failures,
        })
    }
}
