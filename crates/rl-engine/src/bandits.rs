//! Multi-Armed Bandit selection: Thompson Sampling, UCB1, Epsilon-Greedy and a
//! feature-weighted linear scorer, dispatched through one closed algorithm enum.
//!
//! Every strategy draws randomness from a caller-supplied RNG, so a seeded
//! `StdRng` makes selections reproducible.

use crate::sampling::sample_beta;
use optimizer_core::config::BanditConfig;
use optimizer_core::types::{BanditAlgorithm, Creative, PerformanceSnapshot, UserFeatures};
use optimizer_core::{OptimizerError, OptimizerResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

/// Observed counts for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmStats {
    pub impressions: u64,
    pub clicks: u64,
}

impl ArmStats {
    pub fn new(impressions: u64, clicks: u64) -> Self {
        Self {
            impressions,
            clicks: clicks.min(impressions),
        }
    }

    /// Missing performance data counts as an unexplored arm.
    pub fn from_snapshot(snapshot: Option<&PerformanceSnapshot>) -> Self {
        snapshot
            .map(|s| Self::new(s.impressions, s.clicks))
            .unwrap_or_default()
    }

    /// Observed CTR as a fraction.
    pub fn mean_ctr(&self) -> f64 {
        if self.impressions > 0 {
            self.clicks as f64 / self.impressions as f64
        } else {
            0.0
        }
    }
}

/// A per-request selection policy over a fixed set of arms.
pub trait SelectionStrategy {
    fn scores<R: Rng>(&self, arms: &[ArmStats], rng: &mut R) -> Vec<f64>;

    fn select<R: Rng>(&self, arms: &[ArmStats], rng: &mut R) -> usize {
        let scores = self.scores(arms, rng);
        argmax(&scores, rng)
    }
}

/// Index of the highest score. Ties are broken with the supplied RNG.
pub fn argmax<R: Rng>(scores: &[f64], rng: &mut R) -> usize {
    let best = scores
        .iter()
        .copied()
        .filter(|s| !s.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    let ties: Vec<usize> = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == best)
        .map(|(i, _)| i)
        .collect();
    match ties.len() {
        0 => 0,
        1 => ties[0],
        n => ties[rng.gen_range(0..n)],
    }
}

/// Sample each arm's Beta(clicks + 1, misses + 1) posterior and pick the best draw.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThompsonSampling;

impl SelectionStrategy for ThompsonSampling {
    fn scores<R: Rng>(&self, arms: &[ArmStats], rng: &mut R) -> Vec<f64> {
        arms.iter()
            .map(|arm| {
                let alpha = arm.clicks as f64 + 1.0;
                let beta = arm.impressions.saturating_sub(arm.clicks) as f64 + 1.0;
                sample_beta(rng, alpha, beta)
            })
            .collect()
    }
}

/// Optimistic mean + confidence bound. Unplayed arms score +inf.
#[derive(Debug, Clone, Copy)]
pub struct Ucb1 {
    pub confidence_level: f64,
}

impl SelectionStrategy for Ucb1 {
    fn scores<R: Rng>(&self, arms: &[ArmStats], _rng: &mut R) -> Vec<f64> {
        let total: u64 = arms.iter().map(|a| a.impressions).sum();
        let log_total = (total.max(1) as f64).ln();
        arms.iter()
            .map(|arm| {
                if arm.impressions == 0 {
                    f64::INFINITY
                } else {
                    let exploration = (log_total / arm.impressions as f64).sqrt();
                    arm.mean_ctr() + self.confidence_level * exploration
                }
            })
            .collect()
    }
}

/// Uniform exploration with probability `epsilon`, best observed CTR otherwise.
#[derive(Debug, Clone, Copy)]
pub struct EpsilonGreedy {
    pub epsilon: f64,
}

impl SelectionStrategy for EpsilonGreedy {
    fn scores<R: Rng>(&self, arms: &[ArmStats], _rng: &mut R) -> Vec<f64> {
        arms.iter().map(ArmStats::mean_ctr).collect()
    }

    fn select<R: Rng>(&self, arms: &[ArmStats], rng: &mut R) -> usize {
        if rng.gen::<f64>() < self.epsilon {
            return rng.gen_range(0..arms.len().max(1));
        }
        let scores = self.scores(arms, rng);
        argmax(&scores, rng)
    }
}

/// Predicted CTR from observed CTR and a multiplicative feature boost.
/// Stand-in for a trained model: higher predicted CTR always wins.
#[derive(Debug, Clone, Copy)]
pub struct FeatureWeighted {
    pub boost: f64,
}

impl SelectionStrategy for FeatureWeighted {
    fn scores<R: Rng>(&self, arms: &[ArmStats], _rng: &mut R) -> Vec<f64> {
        arms.iter().map(|arm| arm.mean_ctr() * self.boost).collect()
    }
}

/// Fallback: highest observed CTR.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestCtr;

impl SelectionStrategy for HighestCtr {
    fn scores<R: Rng>(&self, arms: &[ArmStats], _rng: &mut R) -> Vec<f64> {
        arms.iter().map(ArmStats::mean_ctr).collect()
    }
}

#[derive(Debug, Clone)]
pub struct BanditParams {
    pub confidence_level: f64,
    pub epsilon: f64,
    pub feature_key: String,
    pub feature_threshold: f64,
    pub feature_boost: f64,
}

impl From<&BanditConfig> for BanditParams {
    fn from(config: &BanditConfig) -> Self {
        Self {
            confidence_level: config.confidence_level,
            epsilon: config.epsilon.clamp(0.0, 1.0),
            feature_key: config.feature_key.clone(),
            feature_threshold: config.feature_threshold,
            feature_boost: config.feature_boost,
        }
    }
}

impl Default for BanditParams {
    fn default() -> Self {
        Self::from(&BanditConfig::default())
    }
}

impl BanditParams {
    /// Boost applied by the feature-weighted scorer for this request.
    pub fn feature_multiplier(&self, features: Option<&UserFeatures>) -> f64 {
        match features.and_then(|f| f.get(&self.feature_key)) {
            Some(value) if *value > self.feature_threshold => self.feature_boost,
            _ => 1.0,
        }
    }
}

/// Picks one creative per serve request.
#[derive(Debug, Clone, Default)]
pub struct BanditSelector {
    params: BanditParams,
}

impl BanditSelector {
    pub fn new(params: BanditParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BanditParams {
        &self.params
    }

    /// Select among the active creatives. Creatives without a snapshot are
    /// treated as unexplored.
    pub fn select_creative<'a, R: Rng>(
        &self,
        creatives: &'a [Creative],
        performance: &HashMap<String, PerformanceSnapshot>,
        algorithm: BanditAlgorithm,
        features: Option<&UserFeatures>,
        rng: &mut R,
    ) -> OptimizerResult<&'a Creative> {
        if creatives.is_empty() {
            return Err(OptimizerError::InvalidConfiguration(
                "no eligible creative: creative list is empty".to_string(),
            ));
        }
        let eligible: Vec<&Creative> = creatives.iter().filter(|c| c.active).collect();
        if eligible.is_empty() {
            return Err(OptimizerError::InvalidConfiguration(
                "no eligible creative: all creatives are inactive".to_string(),
            ));
        }
        if eligible.len() == 1 {
            return Ok(eligible[0]);
        }

        let arms: Vec<ArmStats> = eligible
            .iter()
            .map(|c| ArmStats::from_snapshot(performance.get(&c.id)))
            .collect();

        let index = match algorithm {
            BanditAlgorithm::ThompsonSampling => ThompsonSampling.select(&arms, rng),
            BanditAlgorithm::Ucb1 => Ucb1 {
                confidence_level: self.params.confidence_level,
            }
            .select(&arms, rng),
            BanditAlgorithm::EpsilonGreedy => EpsilonGreedy {
                epsilon: self.params.epsilon,
            }
            .select(&arms, rng),
            BanditAlgorithm::FeatureWeighted => FeatureWeighted {
                boost: self.params.feature_multiplier(features),
            }
            .select(&arms, rng),
            BanditAlgorithm::PerformanceBased => HighestCtr.select(&arms, rng),
        };

        let chosen = eligible[index];
        metrics::counter!("bandit.selections", "algorithm" => algorithm.as_str()).increment(1);
        debug!(
            creative_id = %chosen.id,
            algorithm = algorithm.as_str(),
            arms = arms.len(),
            "Creative selected"
        );
        Ok(chosen)
    }

    /// Same as `select_creative`, seeding the RNG when `seed` is given and
    /// drawing from entropy otherwise.
    pub fn select_with_seed<'a>(
        &self,
        creatives: &'a [Creative],
        performance: &HashMap<String, PerformanceSnapshot>,
        algorithm: BanditAlgorithm,
        features: Option<&UserFeatures>,
        seed: Option<u64>,
    ) -> OptimizerResult<&'a Creative> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.select_creative(creatives, performance, algorithm, features, &mut rng)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn creatives(ids: &[&str]) -> Vec<Creative> {
        ids.iter().map(|id| Creative::new(*id, "camp-1")).collect()
    }

    fn snapshot(id: &str, impressions: u64, clicks: u64) -> PerformanceSnapshot {
        let mut snap = PerformanceSnapshot::empty(id, "camp-1", 1440, Utc::now());
        snap.impressions = impressions;
        snap.clicks = clicks;
        snap.ctr = if impressions > 0 {
            100.0 * clicks as f64 / impressions as f64
        } else {
            0.0
        };
        snap
    }

    fn perf(entries: &[(&str, u64, u64)]) -> HashMap<String, PerformanceSnapshot> {
        entries
            .iter()
            .map(|(id, i, c)| (id.to_string(), snapshot(id, *i, *c)))
            .collect()
    }

    #[test]
    fn test_empty_and_inactive_are_invalid_configuration() {
        let selector = BanditSelector::default();
        let err = selector
            .select_with_seed(&[], &HashMap::new(), BanditAlgorithm::Ucb1, None, Some(1))
            .unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidConfiguration(_)));

        let mut list = creatives(&["a", "b"]);
        list.iter_mut().for_each(|c| c.active = false);
        let err = selector
            .select_with_seed(&list, &HashMap::new(), BanditAlgorithm::Ucb1, None, Some(1))
            .unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_single_creative_returned_unchanged() {
        let selector = BanditSelector::default();
        let list = creatives(&["only"]);
        let chosen = selector
            .select_with_seed(&list, &HashMap::new(), BanditAlgorithm::ThompsonSampling, None, None)
            .unwrap();
        assert_eq!(chosen, &list[0]);
    }

    #[test]
    fn test_thompson_prefers_strong_arm() {
        let selector = BanditSelector::default();
        let list = creatives(&["strong", "weak"]);
        let perf = perf(&[("strong", 1000, 200), ("weak", 10, 1)]);
        let mut rng = StdRng::seed_from_u64(42);

        let wins = (0..1000)
            .filter(|_| {
                selector
                    .select_creative(&list, &perf, BanditAlgorithm::ThompsonSampling, None, &mut rng)
                    .unwrap()
                    .id
                    == "strong"
            })
            .count();
        // Beta(2, 10) exceeds 0.2 about a third of the time, so the weak arm
        // keeps a real share of traffic.
        assert!(wins >= 600, "strong arm selected {wins}/1000");
    }

    #[test]
    fn test_thompson_strong_arm_dominates_unproven_arm() {
        let selector = BanditSelector::default();
        let list = creatives(&["strong", "weak"]);
        let perf = perf(&[("strong", 1000, 200), ("weak", 10, 0)]);
        let mut rng = StdRng::seed_from_u64(42);

        let wins = (0..1000)
            .filter(|_| {
                selector
                    .select_creative(&list, &perf, BanditAlgorithm::ThompsonSampling, None, &mut rng)
                    .unwrap()
                    .id
                    == "strong"
            })
            .count();
        assert!(wins >= 800, "strong arm selected {wins}/1000");
    }

    #[test]
    fn test_thompson_explores_creatives_without_data() {
        let selector = BanditSelector::default();
        let list = creatives(&["known", "new"]);
        let perf = perf(&[("known", 1000, 10)]);
        let mut rng = StdRng::seed_from_u64(9);

        let new_wins = (0..500)
            .filter(|_| {
                selector
                    .select_creative(&list, &perf, BanditAlgorithm::ThompsonSampling, None, &mut rng)
                    .unwrap()
                    .id
                    == "new"
            })
            .count();
        assert!(new_wins > 300, "new creative selected {new_wins}/500");
    }

    #[test]
    fn test_ucb1_scores_unplayed_arms_infinite() {
        let arms = [ArmStats::new(0, 0), ArmStats::new(100, 10)];
        let mut rng = StdRng::seed_from_u64(1);
        let scores = Ucb1 { confidence_level: 1.96 }.scores(&arms, &mut rng);
        assert_eq!(scores[0], f64::INFINITY);
        assert!(scores[1].is_finite());
        let expected = 0.1 + 1.96 * ((100f64).ln() / 100.0).sqrt();
        assert!((scores[1] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ucb1_explores_every_unplayed_creative_before_repeating() {
        let selector = BanditSelector::default();
        let list = creatives(&["seasoned", "fresh-1", "fresh-2"]);
        let mut counts: HashMap<String, (u64, u64)> = HashMap::new();
        counts.insert("seasoned".into(), (500, 100));
        let mut rng = StdRng::seed_from_u64(5);

        let mut order = Vec::new();
        for _ in 0..3 {
            let perf: HashMap<String, PerformanceSnapshot> = counts
                .iter()
                .map(|(id, (i, c))| (id.clone(), snapshot(id, *i, *c)))
                .collect();
            let chosen = selector
                .select_creative(&list, &perf, BanditAlgorithm::Ucb1, None, &mut rng)
                .unwrap();
            order.push(chosen.id.clone());
            counts.entry(chosen.id.clone()).or_insert((0, 0)).0 += 1;
        }

        assert!(order[..2].contains(&"fresh-1".to_string()));
        assert!(order[..2].contains(&"fresh-2".to_string()));
    }

    #[test]
    fn test_epsilon_zero_is_deterministic_greedy() {
        let selector = BanditSelector::new(BanditParams {
            epsilon: 0.0,
            ..BanditParams::default()
        });
        let list = creatives(&["a", "b", "c"]);
        let perf = perf(&[("a", 100, 2), ("b", 100, 9), ("c", 100, 5)]);
        let mut rng = StdRng::from_entropy();

        for _ in 0..100 {
            let chosen = selector
                .select_creative(&list, &perf, BanditAlgorithm::EpsilonGreedy, None, &mut rng)
                .unwrap();
            assert_eq!(chosen.id, "b");
        }
    }

    #[test]
    fn test_epsilon_one_explores_uniformly() {
        let selector = BanditSelector::new(BanditParams {
            epsilon: 1.0,
            ..BanditParams::default()
        });
        let list = creatives(&["a", "b"]);
        let perf = perf(&[("a", 100, 50), ("b", 100, 1)]);
        let mut rng = StdRng::seed_from_u64(17);

        let b = (0..1000)
            .filter(|_| {
                selector
                    .select_creative(&list, &perf, BanditAlgorithm::EpsilonGreedy, None, &mut rng)
                    .unwrap()
                    .id
                    == "b"
            })
            .count();
        assert!((400..=600).contains(&b), "b selected {b}/1000");
    }

    #[test]
    fn test_feature_weighted_prefers_higher_predicted_ctr() {
        let selector = BanditSelector::default();
        let list = creatives(&["a", "b"]);
        let perf = perf(&[("a", 100, 3), ("b", 100, 7)]);
        let mut features = UserFeatures::new();
        features.insert("coin_balance".into(), 5000.0);

        let chosen = selector
            .select_with_seed(&list, &perf, BanditAlgorithm::FeatureWeighted, Some(&features), Some(3))
            .unwrap();
        assert_eq!(chosen.id, "b");

        let params = selector.params();
        assert!((params.feature_multiplier(Some(&features)) - 1.1).abs() < 1e-9);
        features.insert("coin_balance".into(), 10.0);
        assert_eq!(params.feature_multiplier(Some(&features)), 1.0);
        assert_eq!(params.feature_multiplier(None), 1.0);
    }

    #[test]
    fn test_performance_based_fallback_picks_highest_ctr() {
        let selector = BanditSelector::default();
        let list = creatives(&["a", "b"]);
        let perf = perf(&[("a", 100, 12), ("b", 100, 7)]);
        let algorithm = BanditAlgorithm::parse("not-a-real-algorithm");
        let chosen = selector
            .select_with_seed(&list, &perf, algorithm, None, Some(1))
            .unwrap();
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let selector = BanditSelector::default();
        let list = creatives(&["a", "b", "c", "d"]);
        let perf = perf(&[("a", 50, 5), ("b", 50, 5), ("c", 40, 4)]);

        for algorithm in [
            BanditAlgorithm::ThompsonSampling,
            BanditAlgorithm::Ucb1,
            BanditAlgorithm::EpsilonGreedy,
            BanditAlgorithm::FeatureWeighted,
            BanditAlgorithm::PerformanceBased,
        ] {
            let first: Vec<String> = (0..20u64)
                .map(|seed| {
                    selector
                        .select_with_seed(&list, &perf, algorithm, None, Some(seed))
                        .unwrap()
                        .id
                        .clone()
                })
                .collect();
            let second: Vec<String> = (0..20u64)
                .map(|seed| {
                    selector
                        .select_with_seed(&list, &perf, algorithm, None, Some(seed))
                        .unwrap()
                        .id
                        .clone()
                })
                .collect();
            assert_eq!(first, second, "{algorithm:?} not reproducible");
        }
    }

    #[test]
    fn test_argmax_breaks_ties_among_maxima_only() {
        let mut rng = StdRng::seed_from_u64(2);
        let scores = [0.5, 0.9, 0.1, 0.9];
        for _ in 0..50 {
            let i = argmax(&scores, &mut rng);
            assert!(i == 1 || i == 3);
        }
        assert_eq!(argmax(&[f64::NAN, 0.2], &mut rng), 1);
    }
}
