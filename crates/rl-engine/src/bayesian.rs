//! Bayesian A/B evaluation: Beta-Binomial posteriors over conversion rate,
//! normal-approximation credible intervals, Monte Carlo probability-of-best and
//! approximate Bayes factors against a baseline creative.

use crate::sampling::sample_beta;
use optimizer_analytics::PerformanceAggregator;
use optimizer_core::config::{BayesianConfig, StoreConfig};
use optimizer_core::store::with_timeout;
use optimizer_core::types::{BayesianResult, PerformanceSnapshot};
use optimizer_core::{CampaignStore, OptimizerError, OptimizerResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Beta posterior under a uniform Beta(1, 1) prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPosterior {
    pub fn from_counts(trials: u64, successes: u64) -> Self {
        let successes = successes.min(trials);
        Self {
            alpha: 1.0 + successes as f64,
            beta: 1.0 + (trials - successes) as f64,
        }
    }

    /// Posterior mean as a fraction.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let sum = self.alpha + self.beta;
        self.alpha * self.beta / (sum * sum * (sum + 1.0))
    }

    /// `mean ± z * sd`, clamped to [0, 1]. A normal approximation to the
    /// Beta quantiles.
    pub fn credible_interval(&self, z: f64) -> (f64, f64) {
        let mean = self.mean();
        let half_width = z * self.variance().sqrt();
        ((mean - half_width).clamp(0.0, 1.0), (mean + half_width).clamp(0.0, 1.0))
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        sample_beta(rng, self.alpha, self.beta)
    }
}

fn win_counts<R: Rng>(posteriors: &[BetaPosterior], trials: usize, rng: &mut R) -> Vec<u64> {
    let mut wins = vec![0u64; posteriors.len()];
    for _ in 0..trials {
        let mut best = 0;
        let mut best_sample = f64::NEG_INFINITY;
        for (i, posterior) in posteriors.iter().enumerate() {
            let sample = posterior.sample(rng);
            if sample > best_sample {
                best_sample = sample;
                best = i;
            }
        }
        wins[best] += 1;
    }
    wins
}

/// Monte Carlo estimate of each posterior being the best.
///
/// Trials are split across `workers` threads, each with its own RNG derived
/// from `seed`, so a fixed seed and worker count give identical results.
pub fn probability_of_best(
    posteriors: &[BetaPosterior],
    simulations: usize,
    workers: usize,
    seed: Option<u64>,
) -> Vec<f64> {
    if posteriors.is_empty() {
        return Vec::new();
    }
    if posteriors.len() == 1 {
        return vec![1.0];
    }
    let simulations = simulations.max(1);
    let workers = workers.clamp(1, simulations);
    let base_seed = seed.unwrap_or_else(rand::random);
    let chunk = simulations.div_ceil(workers);

    let wins = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let trials = chunk.min(simulations.saturating_sub(worker * chunk));
                let worker_seed =
                    base_seed.wrapping_add((worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(worker_seed);
                    win_counts(posteriors, trials, &mut rng)
                })
            })
            .collect();

        let mut totals = vec![0u64; posteriors.len()];
        for handle in handles {
            // A panicking worker only loses its own trials.
            if let Ok(counts) = handle.join() {
                for (total, count) in totals.iter_mut().zip(counts) {
                    *total += count;
                }
            }
        }
        totals
    });

    let total: u64 = wins.iter().sum();
    wins.iter()
        .map(|w| if total > 0 { *w as f64 / total as f64 } else { 0.0 })
        .collect()
}

/// Log of `mean^successes * (1 - mean)^(trials - successes)`.
fn log_likelihood(mean: f64, trials: u64, successes: u64) -> f64 {
    let successes = successes.min(trials);
    successes as f64 * mean.ln() + (trials - successes) as f64 * (1.0 - mean).ln()
}

/// Approximate Bayes factor of a variant against a baseline, each likelihood
/// evaluated at its own posterior mean.
pub fn bayes_factor(
    variant: &BetaPosterior,
    variant_trials: u64,
    variant_successes: u64,
    baseline: &BetaPosterior,
    baseline_trials: u64,
    baseline_successes: u64,
) -> f64 {
    let variant_ll = log_likelihood(variant.mean(), variant_trials, variant_successes);
    let baseline_ll = log_likelihood(baseline.mean(), baseline_trials, baseline_successes);
    (variant_ll - baseline_ll).exp()
}

/// Two-condition stopping gate: the leader's probability-of-best reaches
/// `threshold` and its credible interval sits entirely above the runner-up's.
/// Creatives without readable data are not candidates.
pub fn is_statistically_significant(results: &[BayesianResult], threshold: f64) -> bool {
    let Some((best, runner_up)) = top_two(results) else {
        return false;
    };
    best.probability_of_best >= threshold
        && best.credible_interval_lower > runner_up.credible_interval_upper
}

fn top_two(results: &[BayesianResult]) -> Option<(&BayesianResult, &BayesianResult)> {
    let mut ranked: Vec<&BayesianResult> = results.iter().filter(|r| !r.unavailable).collect();
    if ranked.len() < 2 {
        return None;
    }
    ranked.sort_by(|a, b| b.probability_of_best.total_cmp(&a.probability_of_best));
    Some((ranked[0], ranked[1]))
}

pub struct BayesianEvaluator {
    aggregator: Arc<PerformanceAggregator>,
    campaigns: Arc<dyn CampaignStore>,
    config: BayesianConfig,
    store_timeout: std::time::Duration,
}

impl BayesianEvaluator {
    pub fn new(
        aggregator: Arc<PerformanceAggregator>,
        campaigns: Arc<dyn CampaignStore>,
        config: BayesianConfig,
        store: &StoreConfig,
    ) -> Self {
        Self {
            aggregator,
            campaigns,
            config,
            store_timeout: store.timeout(),
        }
    }

    pub fn config(&self) -> &BayesianConfig {
        &self.config
    }

    pub async fn analyze(
        &self,
        campaign_id: &str,
        baseline_creative_id: Option<&str>,
        window_minutes: Option<i64>,
    ) -> OptimizerResult<Vec<BayesianResult>> {
        self.analyze_seeded(campaign_id, baseline_creative_id, window_minutes, None)
            .await
    }

    /// Posterior summary for every active creative of the campaign, in store
    /// order. Creatives whose counts could not be read are returned flagged
    /// `unavailable` and left out of the simulation.
    pub async fn analyze_seeded(
        &self,
        campaign_id: &str,
        baseline_creative_id: Option<&str>,
        window_minutes: Option<i64>,
        seed: Option<u64>,
    ) -> OptimizerResult<Vec<BayesianResult>> {
        let creatives = with_timeout(
            self.store_timeout,
            "get_active_creatives",
            self.campaigns.get_active_creatives(campaign_id),
        )
        .await?;
        let performance = self
            .aggregator
            .performance_for(campaign_id, &creatives, window_minutes)
            .await?;

        let unavailable: HashSet<&str> =
            performance.unavailable.iter().map(|f| f.id.as_str()).collect();
        if let Some(baseline) = baseline_creative_id.filter(|id| unavailable.contains(id)) {
            return Err(OptimizerError::DataUnavailable(format!(
                "performance for baseline creative {baseline} is unavailable"
            )));
        }
        if !unavailable.is_empty() {
            warn!(
                campaign_id = campaign_id,
                unavailable = unavailable.len(),
                "Bayesian analysis excludes creatives without data"
            );
        }

        let live: Vec<PerformanceSnapshot> = creatives
            .iter()
            .filter(|c| !unavailable.contains(c.id.as_str()))
            .filter_map(|c| performance.snapshots.get(&c.id).cloned())
            .collect();

        let config = self.config.clone();
        let baseline = baseline_creative_id.map(str::to_string);
        let evaluated = tokio::task::spawn_blocking(move || {
            evaluate_snapshots(&live, baseline.as_deref(), &config, seed)
        })
        .await
        .map_err(|e| OptimizerError::Internal(anyhow::anyhow!("bayesian simulation failed: {e}")))??;

        let mut evaluated: HashMap<String, BayesianResult> = evaluated
            .into_iter()
            .map(|r| (r.creative_id.clone(), r))
            .collect();
        let results: Vec<BayesianResult> = creatives
            .iter()
            .filter_map(|c| {
                evaluated.remove(&c.id).or_else(|| {
                    performance
                        .snapshots
                        .get(&c.id)
                        .map(|s| unavailable_result(s, &self.config))
                })
            })
            .collect();

        debug!(
            campaign_id = campaign_id,
            creatives = results.len(),
            unavailable = unavailable.len(),
            "Bayesian analysis complete"
        );
        Ok(results)
    }

    pub fn is_statistically_significant(&self, results: &[BayesianResult]) -> bool {
        is_statistically_significant(results, self.config.significance_threshold)
    }

    /// The declared winner: the significance gate passes and the leader has
    /// cleared the minimum-impression floor.
    pub fn winner<'a>(&self, results: &'a [BayesianResult]) -> Option<&'a BayesianResult> {
        if !self.is_statistically_significant(results) {
            return None;
        }
        let (best, _) = top_two(results)?;
        if !best.meets_min_sample {
            info!(
                creative_id = %best.creative_id,
                impressions = best.impressions,
                floor = self.config.min_impressions,
                "Significant leader below minimum sample size"
            );
            return None;
        }
        Some(best)
    }
}

/// Prior-only entry for a creative whose counts could not be read.
fn unavailable_result(snapshot: &PerformanceSnapshot, config: &BayesianConfig) -> BayesianResult {
    let prior = BetaPosterior::from_counts(0, 0);
    let (lower, upper) = prior.credible_interval(config.credible_z);
    BayesianResult {
        creative_id: snapshot.creative_id.clone(),
        impressions: 0,
        clicks: 0,
        conversions: 0,
        alpha: prior.alpha,
        beta: prior.beta,
        posterior_mean: prior.mean() * 100.0,
        credible_interval_lower: lower * 100.0,
        credible_interval_upper: upper * 100.0,
        probability_of_best: 0.0,
        bayes_factor: None,
        meets_min_sample: false,
        unavailable: true,
    }
}

/// Pure analysis over snapshots; conversions are successes out of clicks.
pub fn evaluate_snapshots(
    snapshots: &[PerformanceSnapshot],
    baseline_creative_id: Option<&str>,
    config: &BayesianConfig,
    seed: Option<u64>,
) -> OptimizerResult<Vec<BayesianResult>> {
    let posteriors: Vec<BetaPosterior> = snapshots
        .iter()
        .map(|s| BetaPosterior::from_counts(s.clicks, s.conversions))
        .collect();

    let baseline = match baseline_creative_id {
        Some(id) => {
            let index = snapshots
                .iter()
                .position(|s| s.creative_id == id)
                .ok_or_else(|| OptimizerError::creative_not_found(id))?;
            Some(index)
        }
        None => None,
    };

    let probabilities =
        probability_of_best(&posteriors, config.simulations, config.workers, seed);

    let results = snapshots
        .iter()
        .zip(&posteriors)
        .zip(probabilities)
        .map(|((snapshot, posterior), probability)| {
            let (lower, upper) = posterior.credible_interval(config.credible_z);
            let bayes_factor = baseline.map(|b| {
                bayes_factor(
                    posterior,
                    snapshot.clicks,
                    snapshot.conversions,
                    &posteriors[b],
                    snapshots[b].clicks,
                    snapshots[b].conversions,
                )
            });
            BayesianResult {
                creative_id: snapshot.creative_id.clone(),
                impressions: snapshot.impressions,
                clicks: snapshot.clicks,
                conversions: snapshot.conversions,
                alpha: posterior.alpha,
                beta: posterior.beta,
                posterior_mean: posterior.mean() * 100.0,
                credible_interval_lower: lower * 100.0,
                credible_interval_upper: upper * 100.0,
                probability_of_best: probability,
                bayes_factor,
                meets_min_sample: snapshot.impressions >= config.min_impressions,
                unavailable: false,
            }
        })
        .collect();

    Ok(results)
}
