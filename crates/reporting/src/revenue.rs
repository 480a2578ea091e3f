//! Revenue estimation from impression/click counts and campaign rates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use optimizer_core::config::StoreConfig;
use optimizer_core::store::with_timeout;
use optimizer_core::types::{BatchFailure, Campaign, EventType, RevenueEstimate, RevenueSummary};
use optimizer_core::{
    CampaignStore, Clock, EventQuery, EventStore, OptimizerError, OptimizerResult,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of reconciled ("actual") revenue.
#[async_trait]
pub trait RevenueLedger: Send + Sync {
    async fn actual_revenue(
        &self,
        campaign: &Campaign,
        estimated: f64,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> OptimizerResult<f64>;
}

/// Placeholder ledger: actual revenue is reported as the estimate until a
/// payments ledger is wired in.
pub struct EstimatedRevenueLedger;

#[async_trait]
impl RevenueLedger for EstimatedRevenueLedger {
    async fn actual_revenue(
        &self,
        _campaign: &Campaign,
        estimated: f64,
        _start: Option<DateTime<Utc>>,
        _end: DateTime<Utc>,
    ) -> OptimizerResult<f64> {
        Ok(estimated)
    }
}

/// `impressions * revenue_per_impression + clicks * revenue_per_click`.
pub fn estimate_revenue(campaign: &Campaign, impressions: u64, clicks: u64) -> f64 {
    impressions as f64 * campaign.impression_rate() + clicks as f64 * campaign.click_rate()
}

/// Sum per-campaign estimates. CTR is recomputed from the summed counts rather
/// than averaged across campaigns.
pub fn summarize(
    campaigns: Vec<RevenueEstimate>,
    failures: Vec<BatchFailure>,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
) -> RevenueSummary {
    let total_impressions: u64 = campaigns.iter().map(|c| c.impressions).sum();
    let total_clicks: u64 = campaigns.iter().map(|c| c.clicks).sum();
    let overall_ctr = if total_impressions > 0 {
        100.0 * total_clicks as f64 / total_impressions as f64
    } else {
        0.0
    };

    RevenueSummary {
        total_estimated_revenue: campaigns.iter().map(|c| c.estimated_revenue).sum(),
        total_actual_revenue: campaigns.iter().map(|c| c.actual_revenue).sum(),
        campaigns,
        total_impressions,
        total_clicks,
        overall_ctr,
        window_start: start,
        window_end: end,
        failures,
    }
}

pub struct RevenueEstimator {
    events: Arc<dyn EventStore>,
    campaigns: Arc<dyn CampaignStore>,
    ledger: Arc<dyn RevenueLedger>,
    clock: Arc<dyn Clock>,
    store_timeout: std::time::Duration,
}

impl RevenueEstimator {
    pub fn new(
        events: Arc<dyn EventStore>,
        campaigns: Arc<dyn CampaignStore>,
        ledger: Arc<dyn RevenueLedger>,
        clock: Arc<dyn Clock>,
        store: &StoreConfig,
    ) -> Self {
        Self {
            events,
            campaigns,
            ledger,
            clock,
            store_timeout: store.timeout(),
        }
    }

    /// Estimate for one campaign. `start` defaults to the campaign start date
    /// and `end` to now.
    pub async fn estimate_campaign(
        &self,
        campaign_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> OptimizerResult<RevenueEstimate> {
        let campaign = with_timeout(
            self.store_timeout,
            "get_campaign",
            self.campaigns.get_campaign(campaign_id),
        )
        .await?;
        self.estimate_for(&campaign, start, end).await
    }

    pub async fn estimate_for(
        &self,
        campaign: &Campaign,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> OptimizerResult<RevenueEstimate> {
        let window_end = end.unwrap_or_else(|| self.clock.now());
        if let Some(start) = start.filter(|s| *s > window_end) {
            return Err(OptimizerError::InvalidInput(format!(
                "revenue window starts after it ends ({start} > {window_end})"
            )));
        }
        // A campaign that has not started yet has an empty window.
        let window_start = start.or(campaign.start_date.map(|s| s.min(window_end)));

        let impressions_q = EventQuery::campaign(
            campaign.id.as_str(),
            EventType::Impression,
            window_start,
            Some(window_end),
        );
        let clicks_q =
            EventQuery::campaign(campaign.id.as_str(), EventType::Click, window_start, Some(window_end));

        let (impressions, clicks) = with_timeout(self.store_timeout, "count_events", async {
            tokio::try_join!(
                self.events.count_events(&impressions_q),
                self.events.count_events(&clicks_q),
            )
        })
        .await?;
        let clicks = clicks.min(impressions);

        let estimated_revenue = estimate_revenue(campaign, impressions, clicks);
        let actual_revenue = self
            .ledger
            .actual_revenue(campaign, estimated_revenue, window_start, window_end)
            .await?;
        let ctr = if impressions > 0 {
            100.0 * clicks as f64 / impressions as f64
        } else {
            0.0
        };

        debug!(
            campaign_id = %campaign.id,
            impressions = impressions,
            clicks = clicks,
            estimated_revenue = estimated_revenue,
            "Revenue estimated"
        );

        Ok(RevenueEstimate {
            campaign_id: campaign.id.clone(),
            campaign_name: campaign.name.clone(),
            impressions,
            clicks,
            ctr,
            estimated_revenue,
            actual_revenue,
            window_start,
            window_end,
        })
    }

    /// Aggregate over every campaign. Campaigns that fail to estimate are
    /// excluded and listed in `failures`.
    pub async fn estimate_all(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> OptimizerResult<RevenueSummary> {
        let campaigns = with_timeout(
            self.store_timeout,
            "list_campaigns",
            self.campaigns.list_campaigns(),
        )
        .await?;
        let end = end.unwrap_or_else(|| self.clock.now());

        let results = join_all(
            campaigns
                .iter()
                .map(|campaign| self.estimate_for(campaign, start, Some(end))),
        )
        .await;

        let mut estimates = Vec::with_capacity(campaigns.len());
        let mut failures = Vec::new();
        for (campaign, result) in campaigns.iter().zip(results) {
            match result {
                Ok(estimate) => estimates.push(estimate),
                Err(e) => {
                    warn!(campaign_id = %campaign.id, error = %e, "Excluding campaign from revenue summary");
                    metrics::counter!("revenue.campaign_failures").increment(1);
                    failures.push(BatchFailure::new(campaign.id.clone(), e.to_string()));
                }
            }
        }

        Ok(summarize(estimates, failures, start, end))
    }
}
