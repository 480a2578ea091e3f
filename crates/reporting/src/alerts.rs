//! Threshold alerts over campaign performance.
//!
//! Rules are independent; one evaluation may raise several alerts. Alerts are
//! forwarded to the notification sink fire-and-forget.

use crate::revenue::RevenueEstimator;
use chrono::{DateTime, Duration, Utc};
use optimizer_core::config::{AlertConfig, StoreConfig};
use optimizer_core::store::with_timeout;
use optimizer_core::types::{Alert, AlertKind, AlertMetrics, BayesianResult, Campaign, RevenueEstimate};
use optimizer_core::{CampaignStore, Clock, NotificationSink, OptimizerResult};
use optimizer_rl::BayesianEvaluator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Current A/B leader: creative id and probability of being best.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbLeader {
    pub creative_id: String,
    pub probability: f64,
}

impl AbLeader {
    /// Highest probability-of-best among creatives with readable data. A
    /// test needs at least two such creatives to have a leader.
    pub fn from_results(results: &[BayesianResult]) -> Option<Self> {
        let live: Vec<&BayesianResult> = results.iter().filter(|r| !r.unavailable).collect();
        if live.len() < 2 {
            return None;
        }
        live.into_iter()
            .max_by(|a, b| a.probability_of_best.total_cmp(&b.probability_of_best))
            .map(|r| Self {
                creative_id: r.creative_id.clone(),
                probability: r.probability_of_best,
            })
    }
}

/// Apply every rule to one campaign's numbers.
pub fn evaluate_rules(
    campaign: &Campaign,
    estimate: &RevenueEstimate,
    leader: Option<&AbLeader>,
    now: DateTime<Utc>,
    config: &AlertConfig,
) -> Vec<Alert> {
    let base = AlertMetrics {
        impressions: estimate.impressions,
        clicks: estimate.clicks,
        ctr: estimate.ctr,
        estimated_revenue: estimate.estimated_revenue,
        ..AlertMetrics::default()
    };
    let alert = |kind: AlertKind, message: String, metrics: AlertMetrics| Alert {
        id: Uuid::new_v4(),
        campaign_id: campaign.id.clone(),
        kind,
        message,
        metrics,
        created_at: now,
    };

    let mut alerts = Vec::new();

    if estimate.ctr < config.low_ctr_percent && estimate.impressions > config.low_ctr_min_impressions {
        alerts.push(alert(
            AlertKind::LowCtr,
            format!(
                "Campaign '{}' CTR is {:.2}% over {} impressions (threshold {:.2}%)",
                campaign.name, estimate.ctr, estimate.impressions, config.low_ctr_percent
            ),
            base.clone(),
        ));
    }

    if estimate.impressions < config.low_impressions {
        alerts.push(alert(
            AlertKind::LowImpressions,
            format!(
                "Campaign '{}' has only {} impressions",
                campaign.name, estimate.impressions
            ),
            base.clone(),
        ));
    }

    if estimate.estimated_revenue < config.low_revenue
        && estimate.impressions > config.low_revenue_min_impressions
    {
        alerts.push(alert(
            AlertKind::LowRevenue,
            format!(
                "Campaign '{}' estimated revenue {:.2} after {} impressions",
                campaign.name, estimate.estimated_revenue, estimate.impressions
            ),
            base.clone(),
        ));
    }

    if campaign.ab_test_enabled {
        if let Some(leader) = leader.filter(|l| l.probability > config.ab_ready_probability) {
            alerts.push(alert(
                AlertKind::AbTestReady,
                format!(
                    "A/B test for '{}' has a leader: {} ({:.1}% probability of best)",
                    campaign.name,
                    leader.creative_id,
                    leader.probability * 100.0
                ),
                AlertMetrics {
                    best_creative_id: Some(leader.creative_id.clone()),
                    best_probability: Some(leader.probability),
                    ..base.clone()
                },
            ));
        }
    }

    if let Some(end) = campaign.end_date {
        let remaining = end - now;
        if remaining > Duration::zero() && remaining <= Duration::days(config.ending_within_days) {
            let days = remaining.num_seconds() as f64 / 86_400.0;
            alerts.push(alert(
                AlertKind::CampaignEnding,
                format!("Campaign '{}' ends in {:.1} days", campaign.name, days),
                AlertMetrics {
                    days_remaining: Some(days),
                    ..base
                },
            ));
        }
    }

    alerts
}

pub struct AlertEvaluator {
    campaigns: Arc<dyn CampaignStore>,
    revenue: Arc<RevenueEstimator>,
    bayesian: Arc<BayesianEvaluator>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: AlertConfig,
    store_timeout: std::time::Duration,
}

impl AlertEvaluator {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        revenue: Arc<RevenueEstimator>,
        bayesian: Arc<BayesianEvaluator>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: AlertConfig,
        store: &StoreConfig,
    ) -> Self {
        Self {
            campaigns,
            revenue,
            bayesian,
            sink,
            clock,
            config,
            store_timeout: store.timeout(),
        }
    }

    /// Evaluate every rule against the campaign's lifetime numbers and forward
    /// the raised alerts to the sink.
    pub async fn evaluate(&self, campaign_id: &str) -> OptimizerResult<Vec<Alert>> {
        let campaign = with_timeout(
            self.store_timeout,
            "get_campaign",
            self.campaigns.get_campaign(campaign_id),
        )
        .await?;
        let estimate = self.revenue.estimate_for(&campaign, None, None).await?;

        let leader = if campaign.ab_test_enabled {
            match self.bayesian.analyze(campaign_id, None, None).await {
                Ok(results) => AbLeader::from_results(&results),
                Err(e) => {
                    warn!(campaign_id = campaign_id, error = %e, "Skipping A/B readiness check");
                    None
                }
            }
        } else {
            None
        };

        let alerts = evaluate_rules(
            &campaign,
            &estimate,
            leader.as_ref(),
            self.clock.now(),
            &self.config,
        );

        for alert in &alerts {
            metrics::counter!("alerts.raised", "kind" => alert.kind.as_str()).increment(1);
            self.sink.notify(alert.clone());
        }
        debug!(campaign_id = campaign_id, alerts = alerts.len(), "Alerts evaluated");
        Ok(alerts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::revenue::EstimatedRevenueLedger;
    use optimizer_analytics::PerformanceAggregator;
    use optimizer_core::config::{AggregatorConfig, BayesianConfig};
    use optimizer_core::event_bus::capture_sink;
    use optimizer_core::store::{InMemoryCampaignStore, InMemoryEventStore};
    use optimizer_core::types::{Creative, EventType};
    use optimizer_core::ManualClock;

    fn estimate(impressions: u64, clicks: u64, revenue: f64) -> RevenueEstimate {
        RevenueEstimate {
            campaign_id: "camp-1".into(),
            campaign_name: "Spring".into(),
            impressions,
            clicks,
            ctr: if impressions > 0 {
                100.0 * clicks as f64 / impressions as f64
            } else {
                0.0
            },
            estimated_revenue: revenue,
            actual_revenue: revenue,
            window_start: None,
            window_end: Utc::now(),
        }
    }

    fn kinds(alerts: &[Alert]) -> Vec<AlertKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    fn posterior(id: &str, probability: f64, unavailable: bool) -> BayesianResult {
        BayesianResult {
            creative_id: id.into(),
            impressions: 1000,
            clicks: 100,
            conversions: 10,
            alpha: 11.0,
            beta: 91.0,
            posterior_mean: 10.8,
            credible_interval_lower: 5.0,
            credible_interval_upper: 16.0,
            probability_of_best: probability,
            bayes_factor: None,
            meets_min_sample: true,
            unavailable,
        }
    }

    #[test]
    fn test_leader_needs_two_readable_creatives() {
        let pair = [posterior("cr-1", 0.3, false), posterior("cr-2", 0.7, false)];
        let leader = AbLeader::from_results(&pair).unwrap();
        assert_eq!(leader.creative_id, "cr-2");
        assert!((leader.probability - 0.7).abs() < 1e-12);

        // A lone survivor of a concluded test is not a leader.
        assert!(AbLeader::from_results(&[posterior("cr-1", 1.0, false)]).is_none());

        let with_missing = [
            posterior("cr-1", 1.0, false),
            posterior("cr-2", 0.0, true),
        ];
        assert!(AbLeader::from_results(&with_missing).is_none());

        let three = [
            posterior("cr-1", 0.4, false),
            posterior("cr-2", 0.6, false),
            posterior("cr-3", 0.9, true),
        ];
        assert_eq!(AbLeader::from_results(&three).unwrap().creative_id, "cr-2");
    }

    #[test]
    fn test_low_impressions_only() {
        let campaign = Campaign::new("camp-1", "Spring");
        let alerts = evaluate_rules(
            &campaign,
            &estimate(40, 0, 0.0),
            None,
            Utc::now(),
            &AlertConfig::default(),
        );
        assert_eq!(kinds(&alerts), vec![AlertKind::LowImpressions]);
    }

    #[test]
    fn test_low_ctr_and_low_revenue() {
        let campaign = Campaign::new("camp-1", "Spring");
        let config = AlertConfig::default();

        let alerts = evaluate_rules(&campaign, &estimate(2000, 10, 20.0), None, Utc::now(), &config);
        assert_eq!(kinds(&alerts), vec![AlertKind::LowCtr, AlertKind::LowRevenue]);

        // Healthy CTR and revenue.
        let alerts = evaluate_rules(&campaign, &estimate(2000, 100, 500.0), None, Utc::now(), &config);
        assert!(alerts.is_empty());

        // Exactly at the impression floor does not fire.
        let alerts = evaluate_rules(&campaign, &estimate(100, 0, 0.0), None, Utc::now(), &config);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_ab_ready_requires_enabled_test() {
        let config = AlertConfig::default();
        let leader = AbLeader {
            creative_id: "cr-1".into(),
            probability: 0.9,
        };
        let mut campaign = Campaign::new("camp-1", "Spring");

        let alerts = evaluate_rules(&campaign, &estimate(500, 50, 500.0), Some(&leader), Utc::now(), &config);
        assert!(alerts.is_empty());

        campaign.ab_test_enabled = true;
        let alerts = evaluate_rules(&campaign, &estimate(500, 50, 500.0), Some(&leader), Utc::now(), &config);
        assert_eq!(kinds(&alerts), vec![AlertKind::AbTestReady]);
        assert_eq!(alerts[0].metrics.best_creative_id.as_deref(), Some("cr-1"));

        let weak = AbLeader {
            creative_id: "cr-1".into(),
            probability: 0.6,
        };
        let alerts = evaluate_rules(&campaign, &estimate(500, 50, 500.0), Some(&weak), Utc::now(), &config);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_campaign_ending_window() {
        let config = AlertConfig::default();
        let now = Utc::now();
        let mut campaign = Campaign::new("camp-1", "Spring");

        campaign.end_date = Some(now + Duration::days(2));
        let alerts = evaluate_rules(&campaign, &estimate(500, 50, 500.0), None, now, &config);
        assert_eq!(kinds(&alerts), vec![AlertKind::CampaignEnding]);
        let days = alerts[0].metrics.days_remaining.unwrap();
        assert!((days - 2.0).abs() < 1e-6);

        campaign.end_date = Some(now + Duration::days(10));
        assert!(evaluate_rules(&campaign, &estimate(500, 50, 500.0), None, now, &config).is_empty());

        // Already ended.
        campaign.end_date = Some(now - Duration::hours(1));
        assert!(evaluate_rules(&campaign, &estimate(500, 50, 500.0), None, now, &config).is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_forwards_to_sink() {
        let events = Arc::new(InMemoryEventStore::new());
        let campaigns = Arc::new(InMemoryCampaignStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = StoreConfig::default();
        let sink = capture_sink();

        let mut campaign = Campaign::new("camp-1", "Spring");
        campaign.ab_test_enabled = true;
        campaign.end_date = Some(clock.now() + Duration::days(1));
        campaigns.upsert_campaign(campaign);
        campaigns.upsert_creative(Creative::new("cr-1", "camp-1"));
        campaigns.upsert_creative(Creative::new("cr-2", "camp-1"));

        let at = clock.now() - Duration::minutes(10);
        events.insert_many(EventType::Impression, "cr-1", "camp-1", at, 20);
        events.insert_many(EventType::Impression, "cr-2", "camp-1", at, 20);
        // cr-1 converts on every click, cr-2 never does.
        events.insert_many(EventType::Click, "cr-1", "camp-1", at, 10);
        events.insert_many(EventType::Conversion, "cr-1", "camp-1", at, 10);
        events.insert_many(EventType::Click, "cr-2", "camp-1", at, 10);

        let aggregator = Arc::new(PerformanceAggregator::new(
            events.clone(),
            campaigns.clone(),
            clock.clone(),
            &AggregatorConfig::default(),
            &store,
        ));
        let revenue = Arc::new(RevenueEstimator::new(
            events.clone(),
            campaigns.clone(),
            Arc::new(EstimatedRevenueLedger),
            clock.clone(),
            &store,
        ));
        let bayesian = Arc::new(BayesianEvaluator::new(
            aggregator,
            campaigns.clone(),
            BayesianConfig::default(),
            &store,
        ));
        let evaluator = AlertEvaluator::new(
            campaigns.clone(),
            revenue,
            bayesian,
            sink.clone(),
            clock.clone(),
            AlertConfig::default(),
            &store,
        );

        let alerts = evaluator.evaluate("camp-1").await.unwrap();
        let raised = kinds(&alerts);
        assert!(raised.contains(&AlertKind::LowImpressions));
        assert!(raised.contains(&AlertKind::AbTestReady));
        assert!(raised.contains(&AlertKind::CampaignEnding));
        assert_eq!(sink.count(), alerts.len());
        assert_eq!(sink.count_kind(AlertKind::AbTestReady), 1);

        assert!(evaluator.evaluate("camp-404").await.unwrap_err().is_not_found());
    }
}
