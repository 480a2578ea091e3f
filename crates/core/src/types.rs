use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Optional per-request hints consumed by the feature-weighted scorer.
pub type UserFeatures = HashMap<String, f64>;

/// An ad creative competing for traffic within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Creative {
    pub id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Traffic weight in `0..=100`.
    #[serde(default)]
    pub weight: u32,
    /// A/B test variant label, e.g. "A" or "control".
    #[serde(default)]
    pub variant: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Creative {
    pub fn new(id: impl Into<String>, campaign_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            campaign_id: campaign_id.into(),
            name: None,
            active: true,
            weight: 0,
            variant: None,
        }
    }
}

/// Campaign configuration record. Only `ab_test_enabled` is ever written by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub revenue_per_click: Option<f64>,
    #[serde(default)]
    pub revenue_per_impression: Option<f64>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ab_test_enabled: bool,
}

impl Campaign {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            revenue_per_click: None,
            revenue_per_impression: None,
            start_date: None,
            end_date: None,
            ab_test_enabled: false,
        }
    }

    pub fn click_rate(&self) -> f64 {
        self.revenue_per_click.unwrap_or(0.0)
    }

    pub fn impression_rate(&self) -> f64 {
        self.revenue_per_impression.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Impression,
    Click,
    Conversion,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Impression => "impression",
            Self::Click => "click",
            Self::Conversion => "conversion",
        }
    }
}

/// Append-only tracking event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub creative_id: String,
    pub campaign_id: String,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    /// Monetary value, conversions only.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        creative_id: impl Into<String>,
        campaign_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            creative_id: creative_id.into(),
            campaign_id: campaign_id.into(),
            event_type,
            occurred_at,
            value: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Derived, cached view of one creative's performance in a window.
/// Invariants: `clicks <= impressions`, `conversions <= clicks`, `0 <= ctr <= 100`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub creative_id: String,
    pub campaign_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    /// Percent.
    pub ctr: f64,
    /// Percent of clicks that converted.
    pub conversion_rate: f64,
    pub performance_score: f64,
    pub window_minutes: i64,
    pub computed_at: DateTime<Utc>,
}

impl PerformanceSnapshot {
    /// All-zero snapshot used when no data could be read.
    pub fn empty(
        creative_id: impl Into<String>,
        campaign_id: impl Into<String>,
        window_minutes: i64,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            creative_id: creative_id.into(),
            campaign_id: campaign_id.into(),
            impressions: 0,
            clicks: 0,
            conversions: 0,
            ctr: 0.0,
            conversion_rate: 0.0,
            performance_score: 0.0,
            window_minutes,
            computed_at,
        }
    }
}

/// Bandit algorithm keyed dispatch. Unknown names deserialize to
/// `PerformanceBased` rather than failing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum BanditAlgorithm {
    #[default]
    ThompsonSampling,
    Ucb1,
    EpsilonGreedy,
    FeatureWeighted,
    /// Highest observed CTR.
    PerformanceBased,
}

impl BanditAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThompsonSampling => "thompson_sampling",
            Self::Ucb1 => "ucb1",
            Self::EpsilonGreedy => "epsilon_greedy",
            Self::FeatureWeighted => "feature_weighted",
            Self::PerformanceBased => "performance_based",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "thompson_sampling" | "thompson" => Self::ThompsonSampling,
            "ucb1" | "ucb" => Self::Ucb1,
            "epsilon_greedy" | "epsilon" => Self::EpsilonGreedy,
            "feature_weighted" | "linear" | "contextual" => Self::FeatureWeighted,
            _ => Self::PerformanceBased,
        }
    }
}

impl From<String> for BanditAlgorithm {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

/// Bayesian posterior summary for one creative. Rates are in percent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BayesianResult {
    pub creative_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub alpha: f64,
    pub beta: f64,
    pub posterior_mean: f64,
    pub credible_interval_lower: f64,
    pub credible_interval_upper: f64,
    pub probability_of_best: f64,
    #[serde(default)]
    pub bayes_factor: Option<f64>,
    /// Whether the creative cleared the minimum-impression floor for winning.
    pub meets_min_sample: bool,
    /// Counts could not be read; the posterior is the prior and the creative
    /// takes no part in the simulation.
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevenueEstimate {
    pub campaign_id: String,
    pub campaign_name: String,
    pub impressions: u64,
    pub clicks: u64,
    /// Percent.
    pub ctr: f64,
    pub estimated_revenue: f64,
    /// Pass-through of `estimated_revenue` until ledger reconciliation exists.
    pub actual_revenue: f64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: DateTime<Utc>,
}

/// Aggregate across campaigns. CTR is recomputed from summed counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevenueSummary {
    pub campaigns: Vec<RevenueEstimate>,
    pub total_impressions: u64,
    pub total_clicks: u64,
    pub overall_ctr: f64,
    pub total_estimated_revenue: f64,
    pub total_actual_revenue: f64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: DateTime<Utc>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowCtr,
    LowImpressions,
    LowRevenue,
    AbTestReady,
    CampaignEnding,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowCtr => "low_ctr",
            Self::LowImpressions => "low_impressions",
            Self::LowRevenue => "low_revenue",
            Self::AbTestReady => "ab_test_ready",
            Self::CampaignEnding => "campaign_ending",
        }
    }
}

/// Metric values an alert was raised against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertMetrics {
    pub impressions: u64,
    pub clicks: u64,
    pub ctr: f64,
    pub estimated_revenue: f64,
    #[serde(default)]
    pub best_creative_id: Option<String>,
    #[serde(default)]
    pub best_probability: Option<f64>,
    #[serde(default)]
    pub days_remaining: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub campaign_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub metrics: AlertMetrics,
    pub created_at: DateTime<Utc>,
}

/// One failed item of a batch operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: String,
    pub reason: String,
}

impl BatchFailure {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_algorithm_falls_back() {
        let algo: BanditAlgorithm = serde_json::from_str("\"neural_magic\"").unwrap();
        assert_eq!(algo, BanditAlgorithm::PerformanceBased);

        let algo: BanditAlgorithm = serde_json::from_str("\"epsilon_greedy\"").unwrap();
        assert_eq!(algo, BanditAlgorithm::EpsilonGreedy);
        assert_eq!(BanditAlgorithm::parse("UCB1"), BanditAlgorithm::Ucb1);
        assert_eq!(BanditAlgorithm::parse("thompson-sampling"), BanditAlgorithm::ThompsonSampling);
    }

    #[test]
    fn test_algorithm_serializes_snake_case() {
        let json = serde_json::to_string(&BanditAlgorithm::FeatureWeighted).unwrap();
        assert_eq!(json, "\"feature_weighted\"");
    }

    #[test]
    fn test_creative_defaults_on_deserialize() {
        let creative: Creative =
            serde_json::from_str(r#"{ "id": "cr-1", "campaign_id": "camp-1" }"#).unwrap();
        assert!(creative.active);
        assert_eq!(creative.weight, 0);
        assert!(creative.variant.is_none());
    }

    #[test]
    fn test_campaign_rates_default_to_zero() {
        let campaign = Campaign::new("camp-1", "Spring");
        assert_eq!(campaign.click_rate(), 0.0);
        assert_eq!(campaign.impression_rate(), 0.0);
    }
}
