//! Random variate generation for Beta posteriors.
//!
//! Beta(a, b) is drawn as `X / (X + Y)` with `X ~ Gamma(a)` and `Y ~ Gamma(b)`.
//! Integer shapes up to `ERLANG_MAX_SHAPE` use the Erlang construction (sum of
//! unit exponentials); larger or fractional shapes use Marsaglia-Tsang.

use rand::Rng;

/// Largest integer shape drawn as a sum of exponentials.
pub const ERLANG_MAX_SHAPE: f64 = 64.0;

/// Unit-rate exponential draw.
pub fn sample_exponential<R: Rng>(rng: &mut R) -> f64 {
    // gen() is in [0, 1), so 1 - u is in (0, 1]
    let u: f64 = rng.gen();
    -(1.0 - u).ln()
}

/// Sample from Gamma(shape, 1).
pub fn sample_gamma<R: Rng>(rng: &mut R, shape: f64) -> f64 {
    if shape <= 0.0 || !shape.is_finite() {
        return 0.0;
    }

    if shape.fract() == 0.0 && shape <= ERLANG_MAX_SHAPE {
        return (0..shape as u32).map(|_| sample_exponential(rng)).sum();
    }

    if shape < 1.0 {
        // Boost: Gamma(a) = Gamma(a+1) * U^(1/a)
        let u: f64 = rng.gen();
        return sample_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    // Marsaglia-Tsang method for shape >= 1
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        // Box-Muller for a standard normal
        let u1: f64 = rng.gen::<f64>().max(1e-15);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

        let v = (1.0 + c * z).powi(3);
        if v <= 0.0 {
            continue;
        }

        let u: f64 = rng.gen();
        if u < 1.0 - 0.0331 * z.powi(4) || u.ln() < 0.5 * z * z + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Sample from Beta(alpha, beta). Returns a value in [0, 1].
pub fn sample_beta<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha);
    let y = sample_gamma(rng, beta);
    if x + y > 0.0 {
        x / (x + y)
    } else {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mean_of(samples: impl Iterator<Item = f64>) -> f64 {
        let (sum, n) = samples.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
        sum / n as f64
    }

    #[test]
    fn test_gamma_mean_matches_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        // Erlang path
        let m = mean_of((0..20_000).map(|_| sample_gamma(&mut rng, 3.0)));
        assert!((m - 3.0).abs() < 0.1, "erlang mean {m}");
        // Marsaglia-Tsang path
        let m = mean_of((0..20_000).map(|_| sample_gamma(&mut rng, 250.0)));
        assert!((m - 250.0).abs() < 1.0, "mt mean {m}");
        // Boost path
        let m = mean_of((0..20_000).map(|_| sample_gamma(&mut rng, 0.5)));
        assert!((m - 0.5).abs() < 0.05, "boost mean {m}");
    }

    #[test]
    fn test_beta_samples_in_unit_interval_with_expected_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<f64> = (0..20_000).map(|_| sample_beta(&mut rng, 21.0, 81.0)).collect();
        assert!(samples.iter().all(|x| (0.0..=1.0).contains(x)));
        let m = mean_of(samples.into_iter());
        assert!((m - 21.0 / 102.0).abs() < 0.01, "beta mean {m}");
    }

    #[test]
    fn test_uniform_prior_covers_interval() {
        let mut rng = StdRng::seed_from_u64(3);
        let samples: Vec<f64> = (0..10_000).map(|_| sample_beta(&mut rng, 1.0, 1.0)).collect();
        let low = samples.iter().filter(|x| **x < 0.1).count();
        let high = samples.iter().filter(|x| **x > 0.9).count();
        assert!(low > 700 && high > 700, "low {low} high {high}");
    }

    #[test]
    fn test_degenerate_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_gamma(&mut rng, 0.0), 0.0);
        assert_eq!(sample_gamma(&mut rng, f64::NAN), 0.0);
        assert_eq!(sample_beta(&mut rng, 0.0, 0.0), 0.5);
    }
}
