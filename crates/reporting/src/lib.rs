//! Campaign reporting: revenue estimation and threshold alerts.

#![warn(clippy::unwrap_used)]

pub mod alerts;
pub mod revenue;

pub use alerts::{evaluate_rules, AbLeader, AlertEvaluator};
pub use revenue::{estimate_revenue, EstimatedRevenueLedger, RevenueEstimator, RevenueLedger};
