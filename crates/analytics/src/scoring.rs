//! Rate and score arithmetic for performance snapshots.

use chrono::{DateTime, Utc};
use optimizer_core::types::PerformanceSnapshot;

/// Click-through rate in percent.
pub fn ctr(impressions: u64, clicks: u64) -> f64 {
    if clicks > 0 && impressions > 0 {
        100.0 * clicks as f64 / impressions as f64
    } else {
        0.0
    }
}

/// Share of clicks that converted, in percent.
pub fn conversion_rate(clicks: u64, conversions: u64) -> f64 {
    if clicks > 0 {
        100.0 * conversions as f64 / clicks as f64
    } else {
        0.0
    }
}

/// Blend of click performance (60%), conversion quality (30%) and sample
/// confidence (10%). Each term is capped so no single factor dominates.
pub fn performance_score(ctr: f64, conversion_rate: f64, impressions: u64) -> f64 {
    0.6 * (ctr * 10.0).min(100.0)
        + 0.3 * (conversion_rate * 5.0).min(50.0)
        + 0.1 * (impressions as f64 / 10.0).min(20.0)
}

/// Build a snapshot from raw counts. Counts from an inconsistent store are
/// clamped so that `conversions <= clicks <= impressions`.
pub fn snapshot_from_counts(
    creative_id: &str,
    campaign_id: &str,
    impressions: u64,
    clicks: u64,
    conversions: u64,
    window_minutes: i64,
    computed_at: DateTime<Utc>,
) -> PerformanceSnapshot {
    let clicks = clicks.min(impressions);
    let conversions = conversions.min(clicks);
    let ctr = ctr(impressions, clicks);
    let conversion_rate = conversion_rate(clicks, conversions);

    PerformanceSnapshot {
        creative_id: creative_id.to_string(),
        campaign_id: campaign_id.to_string(),
        impressions,
        clicks,
        conversions,
        ctr,
        conversion_rate,
        performance_score: performance_score(ctr, conversion_rate, impressions),
        window_minutes,
        computed_at,
    }
}
