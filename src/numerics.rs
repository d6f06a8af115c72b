//! Log-domain numerics shared by the partition model.
//!
//! Everything here is a free function over plain `f64`/slices so the
//! component models, partitions and grids can share it without owning it.

/**
 * File: /src/numerics.rs
 * Created Date: Monday, March 2nd 2026
 * Author: Zihan
 * -----
 * Last Modified: Wednesday, 4th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-02		Zihan	Log-space helpers, CRP and conjugate normalizers
 * 2026-03-04		Zihan	Categorical draws from log weights
 */

use ndarray_rand::rand::Rng;
use statrs::function::gamma::ln_gamma;

use crate::error::{violation, Result};

pub const LN_2: f64 = std::f64::consts::LN_2;
pub const LN_PI: f64 = 1.144_729_885_849_400_2;
pub const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Tolerance used when checking that a normalized distribution sums to one
pub const PROB_SUM_TOL: f64 = 1e-9;

/// log(Σ exp(x_i)), stable for large magnitudes; -inf entries are allowed
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// `n` points evenly spaced in log space between `start` and `stop` (both > 0)
pub fn log_linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    linspace(start.ln(), stop.ln(), n)
        .into_iter()
        .map(f64::exp)
        .collect()
}

/// Log probability of a partition with the given cluster sizes under CRP(alpha)
pub fn crp_logp(counts: &[usize], alpha: f64) -> f64 {
    let n: usize = counts.iter().sum();
    let k = counts.len() as f64;
    let sum_ln_gamma: f64 = counts.iter().map(|&c| ln_gamma(c as f64)).sum();
    k * alpha.ln() + sum_ln_gamma + ln_gamma(alpha) - ln_gamma(n as f64 + alpha)
}

/// Log normalizer of the normal-gamma prior with parameters (r, nu, s)
pub fn continuous_log_z(r: f64, nu: f64, s: f64) -> f64 {
    let half_nu = 0.5 * nu;
    (half_nu + 0.5) * LN_2 + 0.5 * LN_PI - 0.5 * r.ln() - half_nu * s.ln() + ln_gamma(half_nu)
}

/// Posterior (r', nu', s', mu') after absorbing `count` values with sample
/// mean `mean` and sum of squared deviations `m2`.
///
/// `s'` is formed from centered statistics; expanding it into raw sums of
/// squares cancels catastrophically once values are large next to their spread.
pub fn update_continuous_hypers(
    count: f64,
    mean: f64,
    m2: f64,
    r: f64,
    nu: f64,
    s: f64,
    mu: f64,
) -> (f64, f64, f64, f64) {
    let r_prime = r + count;
    let nu_prime = nu + count;
    let mu_prime = (r * mu + count * mean) / r_prime;
    let shift = mean - mu;
    let s_prime = s + m2 + r * count / r_prime * shift * shift;
    (r_prime, nu_prime, s_prime, mu_prime)
}

/// Log marginal likelihood of a categorical cluster under a symmetric Dirichlet
pub fn categorical_marginal_logp(counts: &[usize], alpha: f64) -> f64 {
    let n: usize = counts.iter().sum();
    let k = counts.len() as f64;
    let per_category: f64 = counts
        .iter()
        .map(|&c| ln_gamma(alpha + c as f64) - ln_gamma(alpha))
        .sum();
    ln_gamma(k * alpha) - ln_gamma(k * alpha + n as f64) + per_category
}

/// Turn log weights into probabilities. Masked options carry -inf.
///
/// Fails if any weight is NaN or +inf, or if every option is masked: such a
/// vector cannot describe a distribution and points at a defect upstream.
pub fn normalize_log_weights(log_weights: &[f64]) -> Result<Vec<f64>> {
    if log_weights.is_empty() {
        return violation("cannot draw from an empty set of options");
    }
    if let Some(bad) = log_weights
        .iter()
        .find(|w| w.is_nan() || **w == f64::INFINITY)
    {
        return violation(format!("non-finite sampling weight {}", bad));
    }
    let max = log_weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return violation("every sampling weight is zero");
    }

    let unnormalized: Vec<f64> = log_weights.iter().map(|&w| (w - max).exp()).collect();
    let total: f64 = unnormalized.iter().sum();
    let probs: Vec<f64> = unnormalized.iter().map(|&p| p / total).collect();

    let check: f64 = probs.iter().sum();
    if (check - 1.0).abs() > PROB_SUM_TOL {
        return violation(format!("sampling distribution sums to {}", check));
    }
    Ok(probs)
}

/// Inverse-CDF draw from a normalized probability vector
pub fn draw_index<R: Rng + ?Sized>(probs: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (idx, &p) in probs.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return idx;
        }
    }
    // u landed in the rounding slack above the last cumulative sum
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len() - 1)
}

/// Categorical draw proportional to exp(log_weights)
pub fn sample_log_weights<R: Rng + ?Sized>(log_weights: &[f64], rng: &mut R) -> Result<usize> {
    let probs = normalize_log_weights(log_weights)?;
    Ok(draw_index(&probs, rng))
}

/// Guard for quantities that must stay finite (scores, log likelihoods)
pub fn ensure_finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        violation(format!("{} evaluated to {}", what, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn test_logsumexp_matches_naive() {
        let values = [0.1, -2.0, 1.5];
        let naive = values.iter().map(|v: &f64| v.exp()).sum::<f64>().ln();
        assert!((logsumexp(&values) - naive).abs() < 1e-12);

        // large magnitudes must not overflow
        let big = [1000.0, 1000.0];
        assert!((logsumexp(&big) - (1000.0 + LN_2)).abs() < 1e-9);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_log_linspace_endpoints() {
        let grid = log_linspace(1.0, 100.0, 3);
        assert_eq!(grid.len(), 3);
        assert!((grid[0] - 1.0).abs() < 1e-12);
        assert!((grid[1] - 10.0).abs() < 1e-9);
        assert!((grid[2] - 100.0).abs() < 1e-9);
        assert_eq!(linspace(2.0, 4.0, 1), vec![2.0]);
    }

    #[test]
    fn test_crp_logp_small_partition() {
        // P({0,1},{2}) under CRP(1) = 1 * (1/2) * (1/3) = 1/6
        let logp = crp_logp(&[2, 1], 1.0);
        assert!((logp - (1.0f64 / 6.0).ln()).abs() < 1e-12);
        // all rows together: (1/2)*(2/3) = 1/3
        assert!((crp_logp(&[3], 1.0) - (1.0f64 / 3.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_categorical_marginal_sequential() {
        // Dirichlet(1,1): P(a, a) = 1/2 * 2/3 = 1/3
        let logp = categorical_marginal_logp(&[2, 0], 1.0);
        assert!((logp - (1.0f64 / 3.0).ln()).abs() < 1e-12);
        assert!(categorical_marginal_logp(&[0, 0, 0], 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_continuous_hypers_single_value() {
        let (r, nu, s, mu) = update_continuous_hypers(1.0, 2.0, 0.0, 1.0, 1.0, 1.0, 0.0);
        assert_eq!(r, 2.0);
        assert_eq!(nu, 2.0);
        assert!((mu - 1.0).abs() < 1e-12);
        // s' = 1 + 0 + (1 * 1 / 2) * 2^2 = 3
        assert!((s - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_continuous_hypers_matches_raw_sums() {
        // small values, where the raw-sum form s + Σx² + r mu² - r' mu'² is exact enough
        let xs = [0.5, 1.5, 2.0, -0.25];
        let (r, nu, s, mu) = (2.0, 3.0, 1.5, 0.3);
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let m2: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
        let sum_sq: f64 = xs.iter().map(|x| x * x).sum();

        let (r_p, _, s_p, mu_p) = update_continuous_hypers(n, mean, m2, r, nu, s, mu);
        let raw = s + sum_sq + r * mu * mu - r_p * mu_p * mu_p;
        assert!((s_p - raw).abs() < 1e-10, "{} vs {}", s_p, raw);
    }

    #[test]
    fn test_update_continuous_hypers_large_offset_stays_positive() {
        // ten values at 1.7e9 + {0, 1}: m2 = 2.5
        let (_, _, s_p, mu_p) = update_continuous_hypers(10.0, 1.7e9 + 0.5, 2.5, 1.0, 1.0, 0.01, 1.7e9);
        assert!(s_p > 2.5, "s' = {}", s_p);
        assert!(continuous_log_z(11.0, 11.0, s_p).is_finite());
        assert!(mu_p > 1.7e9);
    }

    #[test]
    fn test_normalize_log_weights_sums_to_one() {
        let probs = normalize_log_weights(&[-1000.0, -1001.0, f64::NEG_INFINITY]).unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < PROB_SUM_TOL);
        assert_eq!(probs[2], 0.0);
    }

    #[test]
    fn test_normalize_rejects_degenerate_weights() {
        assert!(normalize_log_weights(&[]).is_err());
        assert!(normalize_log_weights(&[f64::NEG_INFINITY, f64::NEG_INFINITY]).is_err());
        let err = normalize_log_weights(&[0.0, f64::NAN]).unwrap_err();
        assert!(err.is_fatal());
        assert!(normalize_log_weights(&[0.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn test_sample_log_weights_never_picks_masked() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let idx = sample_log_weights(&[f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY], &mut rng)
                .unwrap();
            assert_eq!(idx, 1);
        }
    }

    #[test]
    fn test_sample_log_weights_frequencies() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = [(0.25f64).ln(), (0.75f64).ln()];
        let n = 20_000;
        let ones = (0..n)
            .filter(|_| sample_log_weights(&weights, &mut rng).unwrap() == 1)
            .count();
        let freq = ones as f64 / n as f64;
        assert!((freq - 0.75).abs() < 0.02, "frequency {}", freq);
    }
}
