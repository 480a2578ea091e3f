//! Windowed performance aggregation over the event store, fronted by a
//! short-TTL snapshot cache.

#![warn(clippy::unwrap_used)]

pub mod aggregator;
pub mod scoring;

pub use aggregator::{CampaignPerformance, PerformanceAggregator, SnapshotKey};
