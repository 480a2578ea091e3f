//! Online learning over creative performance: multi-armed bandits (Thompson
//! Sampling, UCB1, Epsilon-Greedy, feature-weighted scoring), Bayesian A/B
//! evaluation and traffic-weight rebalancing.

#![warn(clippy::unwrap_used)]

pub mod bandits;
pub mod bayesian;
pub mod rebalancer;
pub mod sampling;

pub use bandits::{ArmStats, BanditParams, BanditSelector};
pub use bayesian::{is_statistically_significant, BayesianEvaluator, BetaPosterior};
pub use rebalancer::{compute_weights, RebalanceReport, WeightRebalancer};
