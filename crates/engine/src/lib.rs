//! Creative optimization engine: wires the aggregator, bandit selector,
//! Bayesian evaluator, revenue estimator, alert evaluator and weight
//! rebalancer behind one facade, plus the periodic control loop.

#![warn(clippy::unwrap_used)]

pub mod control_loop;
pub mod engine;

pub use control_loop::{ControlLoop, CycleReport};
pub use engine::{CreativeEngine, SelectionDecision, TestConclusion};
