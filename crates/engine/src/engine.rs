//! Engine facade: serve-path selection, event recording and the
//! campaign-level reports and actions exposed to callers.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use optimizer_analytics::{CampaignPerformance, PerformanceAggregator};
use optimizer_cache::LocalCache;
use optimizer_core::config::AppConfig;
use optimizer_core::store::with_timeout;
use optimizer_core::types::{
    Alert, BanditAlgorithm, BatchFailure, BayesianResult, Campaign, Creative, Event, EventType,
    RevenueEstimate, RevenueSummary, UserFeatures,
};
use optimizer_core::{
    CampaignStore, Clock, EventStore, NotificationSink, OptimizerError, OptimizerResult,
};
use optimizer_reporting::{AlertEvaluator, EstimatedRevenueLedger, RevenueEstimator, RevenueLedger};
use optimizer_rl::{BanditParams, BanditSelector, BayesianEvaluator, RebalanceReport, WeightRebalancer};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one serve request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectionDecision {
    pub campaign_id: String,
    pub creative_id: String,
    pub algorithm: BanditAlgorithm,
    /// Served without live data: a stale creative list or the round-robin
    /// fallback.
    pub degraded: bool,
}

/// Result of trying to close out a campaign's A/B test.
#[derive(Debug, Clone, Serialize)]
pub struct TestConclusion {
    pub campaign_id: String,
    pub concluded: bool,
    pub winner: Option<BayesianResult>,
    pub deactivated: Vec<String>,
    pub failures: Vec<BatchFailure>,
    pub reason: Option<String>,
}

impl TestConclusion {
    fn not_concluded(campaign_id: &str, reason: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            concluded: false,
            winner: None,
            deactivated: Vec::new(),
            failures: Vec::new(),
            reason: Some(reason.to_string()),
        }
    }
}

pub struct CreativeEngine {
    config: AppConfig,
    events: Arc<dyn EventStore>,
    campaigns: Arc<dyn CampaignStore>,
    aggregator: Arc<PerformanceAggregator>,
    selector: BanditSelector,
    bayesian: Arc<BayesianEvaluator>,
    revenue: Arc<RevenueEstimator>,
    alerts: AlertEvaluator,
    rebalancer: WeightRebalancer,
    /// Last known active creatives per campaign, served stale while the
    /// configuration store is down.
    creatives: LocalCache<String, Vec<Creative>>,
    round_robin: DashMap<String, AtomicUsize>,
    stale_grace: Duration,
    store_timeout: std::time::Duration,
}

impl CreativeEngine {
    pub fn new(
        config: AppConfig,
        events: Arc<dyn EventStore>,
        campaigns: Arc<dyn CampaignStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_ledger(
            config,
            events,
            campaigns,
            sink,
            clock,
            Arc::new(EstimatedRevenueLedger),
        )
    }

    pub fn with_ledger(
        config: AppConfig,
        events: Arc<dyn EventStore>,
        campaigns: Arc<dyn CampaignStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn RevenueLedger>,
    ) -> Self {
        let aggregator = Arc::new(PerformanceAggregator::new(
            events.clone(),
            campaigns.clone(),
            clock.clone(),
            &config.aggregator,
            &config.store,
        ));
        let bayesian = Arc::new(BayesianEvaluator::new(
            aggregator.clone(),
            campaigns.clone(),
            config.bayesian.clone(),
            &config.store,
        ));
        let revenue = Arc::new(RevenueEstimator::new(
            events.clone(),
            campaigns.clone(),
            ledger,
            clock.clone(),
            &config.store,
        ));
        let alerts = AlertEvaluator::new(
            campaigns.clone(),
            revenue.clone(),
            bayesian.clone(),
            sink,
            clock.clone(),
            config.alerts.clone(),
            &config.store,
        );
        let rebalancer = WeightRebalancer::new(
            aggregator.clone(),
            campaigns.clone(),
            config.rebalancer.clone(),
            &config.store,
        );

        let ttl = Duration::seconds(config.aggregator.cache_ttl_secs as i64);
        let stale_grace = ttl * config.aggregator.stale_grace_multiplier.max(1) as i32;

        Self {
            selector: BanditSelector::new(BanditParams::from(&config.bandit)),
            creatives: LocalCache::new(ttl, config.aggregator.max_entries, clock),
            round_robin: DashMap::new(),
            stale_grace,
            store_timeout: config.store.timeout(),
            config,
            events,
            campaigns,
            aggregator,
            bayesian,
            revenue,
            alerts,
            rebalancer,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn default_algorithm(&self) -> BanditAlgorithm {
        self.config.bandit.default_algorithm
    }

    pub fn aggregator(&self) -> &Arc<PerformanceAggregator> {
        &self.aggregator
    }

    /// Pick a creative for one serve request.
    pub async fn select_ad_for_request(
        &self,
        campaign_id: &str,
        algorithm: BanditAlgorithm,
        features: Option<&UserFeatures>,
    ) -> OptimizerResult<SelectionDecision> {
        self.select_ad_seeded(campaign_id, algorithm, features, None)
            .await
    }

    /// As `select_ad_for_request`; a fixed `seed` makes the draw reproducible.
    pub async fn select_ad_seeded(
        &self,
        campaign_id: &str,
        algorithm: BanditAlgorithm,
        features: Option<&UserFeatures>,
        seed: Option<u64>,
    ) -> OptimizerResult<SelectionDecision> {
        let (creatives, stale) = self.active_creatives(campaign_id).await?;
        let performance = self
            .aggregator
            .performance_for(campaign_id, &creatives, None)
            .await?;

        if performance.all_unavailable() {
            let eligible: Vec<&Creative> = creatives.iter().filter(|c| c.active).collect();
            if !eligible.is_empty() {
                let index = self
                    .round_robin
                    .entry(campaign_id.to_string())
                    .or_default()
                    .fetch_add(1, Ordering::Relaxed)
                    % eligible.len();
                let chosen = eligible[index];
                metrics::counter!("engine.selections.degraded").increment(1);
                warn!(
                    campaign_id = campaign_id,
                    creative_id = %chosen.id,
                    "Performance unavailable, serving round-robin"
                );
                return Ok(SelectionDecision {
                    campaign_id: campaign_id.to_string(),
                    creative_id: chosen.id.clone(),
                    algorithm,
                    degraded: true,
                });
            }
        }

        let chosen = self.selector.select_with_seed(
            &creatives,
            &performance.snapshots,
            algorithm,
            features,
            seed,
        )?;
        if stale {
            metrics::counter!("engine.selections.degraded").increment(1);
        }

        Ok(SelectionDecision {
            campaign_id: campaign_id.to_string(),
            creative_id: chosen.id.clone(),
            algorithm,
            degraded: stale,
        })
    }

    /// Active creatives, from the short-lived cache when fresh. Returns
    /// `true` alongside when the list is a stale fallback.
    async fn active_creatives(&self, campaign_id: &str) -> OptimizerResult<(Vec<Creative>, bool)> {
        let key = campaign_id.to_string();
        if let Some(creatives) = self.creatives.get(&key) {
            return Ok((creatives, false));
        }

        match with_timeout(
            self.store_timeout,
            "get_active_creatives",
            self.campaigns.get_active_creatives(campaign_id),
        )
        .await
        {
            Ok(creatives) => {
                self.creatives.put(key, creatives.clone());
                Ok((creatives, false))
            }
            Err(e) if e.is_data_unavailable() => match self.creatives.get_within(&key, self.stale_grace) {
                Some(stale) => {
                    warn!(
                        campaign_id = campaign_id,
                        age_secs = stale.age.num_seconds(),
                        error = %e,
                        "Campaign store unavailable, using last known creatives"
                    );
                    Ok((stale.value, true))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Validate and append a tracking event.
    pub async fn record_event(&self, event: Event) -> OptimizerResult<()> {
        validate_event(&event)?;
        with_timeout(
            self.store_timeout,
            "get_campaign",
            self.campaigns.get_campaign(&event.campaign_id),
        )
        .await?;

        let event_type = event.event_type;
        with_timeout(self.store_timeout, "append_event", self.events.append_event(event)).await?;
        metrics::counter!("events.recorded", "type" => event_type.as_str()).increment(1);
        Ok(())
    }

    pub async fn get_campaign_performance(
        &self,
        campaign_id: &str,
        window_minutes: Option<i64>,
    ) -> OptimizerResult<CampaignPerformance> {
        self.aggregator
            .get_campaign_performance(campaign_id, window_minutes)
            .await
    }

    pub async fn get_campaign_revenue(
        &self,
        campaign_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> OptimizerResult<RevenueEstimate> {
        self.revenue.estimate_campaign(campaign_id, start, end).await
    }

    pub async fn get_revenue_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> OptimizerResult<RevenueSummary> {
        self.revenue.estimate_all(start, end).await
    }

    pub async fn get_bayesian_analysis(
        &self,
        campaign_id: &str,
        baseline_creative_id: Option<&str>,
    ) -> OptimizerResult<Vec<BayesianResult>> {
        self.bayesian.analyze(campaign_id, baseline_creative_id, None).await
    }

    pub async fn get_alerts(&self, campaign_id: &str) -> OptimizerResult<Vec<Alert>> {
        self.alerts.evaluate(campaign_id).await
    }

    pub async fn rebalance(&self, campaign_id: &str) -> OptimizerResult<RebalanceReport> {
        self.rebalancer.rebalance(campaign_id).await
    }

    pub async fn list_campaigns(&self) -> OptimizerResult<Vec<Campaign>> {
        with_timeout(
            self.store_timeout,
            "list_campaigns",
            self.campaigns.list_campaigns(),
        )
        .await
    }

    /// Close out the campaign's A/B test once a winner is significant and has
    /// enough traffic: losers are deactivated and the test flag cleared. The
    /// flag stays set if any deactivation fails so the next run retries; a run
    /// that finds a single active creative only clears the flag.
    pub async fn conclude_test(&self, campaign_id: &str) -> OptimizerResult<TestConclusion> {
        let campaign = with_timeout(
            self.store_timeout,
            "get_campaign",
            self.campaigns.get_campaign(campaign_id),
        )
        .await?;
        if !campaign.ab_test_enabled {
            return Ok(TestConclusion::not_concluded(campaign_id, "A/B testing not enabled"));
        }

        let results = self.bayesian.analyze(campaign_id, None, None).await?;
        if results.iter().any(|r| r.unavailable) {
            return Ok(TestConclusion::not_concluded(campaign_id, "performance data unavailable"));
        }
        if let [survivor] = results.as_slice() {
            // Losers already deactivated by an earlier run; only the flag is left.
            self.clear_ab_flag(campaign_id).await?;
            info!(
                campaign_id = campaign_id,
                creative_id = %survivor.creative_id,
                "A/B test closed with a single active creative"
            );
            return Ok(TestConclusion {
                campaign_id: campaign_id.to_string(),
                concluded: true,
                winner: Some(survivor.clone()),
                deactivated: Vec::new(),
                failures: Vec::new(),
                reason: None,
            });
        }
        let Some(winner) = self.bayesian.winner(&results).cloned() else {
            debug!(campaign_id = campaign_id, "No significant winner yet");
            return Ok(TestConclusion::not_concluded(campaign_id, "no significant winner"));
        };

        let losers: Vec<&str> = results
            .iter()
            .filter(|r| r.creative_id != winner.creative_id)
            .map(|r| r.creative_id.as_str())
            .collect();
        let writes = join_all(losers.iter().map(|id| {
            with_timeout(
                self.store_timeout,
                "set_creative_active",
                self.campaigns.set_creative_active(id, false),
            )
        }))
        .await;

        let mut deactivated = Vec::new();
        let mut failures = Vec::new();
        for (id, result) in losers.into_iter().zip(writes) {
            match result {
                Ok(()) => deactivated.push(id.to_string()),
                Err(e) => {
                    warn!(campaign_id = campaign_id, creative_id = id, error = %e, "Failed to deactivate creative");
                    failures.push(BatchFailure::new(id, e.to_string()));
                }
            }
        }
        self.creatives.invalidate(&campaign_id.to_string());

        let concluded = failures.is_empty();
        if concluded {
            self.clear_ab_flag(campaign_id).await?;
            info!(
                campaign_id = campaign_id,
                winner = %winner.creative_id,
                probability = winner.probability_of_best,
                deactivated = deactivated.len(),
                "A/B test concluded"
            );
        }

        Ok(TestConclusion {
            campaign_id: campaign_id.to_string(),
            concluded,
            winner: Some(winner),
            deactivated,
            reason: (!concluded).then(|| "some creatives could not be deactivated".to_string()),
            failures,
        })
    }

    async fn clear_ab_flag(&self, campaign_id: &str) -> OptimizerResult<()> {
        with_timeout(
            self.store_timeout,
            "set_campaign_ab_test_enabled",
            self.campaigns.set_campaign_ab_test_enabled(campaign_id, false),
        )
        .await?;
        metrics::counter!("engine.tests_concluded").increment(1);
        Ok(())
    }

    /// Readiness: the campaign store answers within the store timeout.
    pub async fn ready(&self) -> bool {
        self.list_campaigns().await.is_ok()
    }

    /// Evict cache entries too old to serve even as a fallback.
    pub fn maintenance(&self) -> usize {
        self.aggregator.maintenance() + self.creatives.evict_older_than(self.stale_grace)
    }
}

fn validate_event(event: &Event) -> OptimizerResult<()> {
    if event.campaign_id.trim().is_empty() || event.creative_id.trim().is_empty() {
        return Err(OptimizerError::InvalidInput(
            "campaign_id and creative_id are required".to_string(),
        ));
    }
    match (event.event_type, event.value) {
        (EventType::Conversion, Some(value)) if !value.is_finite() || value < 0.0 => Err(
            OptimizerError::InvalidInput(format!("conversion value must be non-negative, got {value}")),
        ),
        (EventType::Conversion, _) | (_, None) => Ok(()),
        (other, Some(_)) => Err(OptimizerError::InvalidInput(format!(
            "value is only accepted on conversions, not {}",
            other.as_str()
        ))),
    }
}
