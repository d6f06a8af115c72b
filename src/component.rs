//! # Component models
//!
//! One component holds the sufficient statistics of a single cluster for a
//! single column. Hyperparameters are shared by every cluster of a column, so
//! they are passed in rather than stored.

/**
 * File: /src/component.rs
 * Created Date: Tuesday, March 3rd 2026
 * Author: Zihan
 * -----
 * Last Modified: Friday, 6th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-03		Zihan	Conjugate component models (normal-gamma, Dirichlet-multinomial)
 * 2026-03-06		Zihan	Posterior predictive draws
 */

use std::collections::BTreeMap;
use std::fmt;

use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{invalid, violation, Result};
use crate::numerics::{
    categorical_marginal_logp, continuous_log_z, draw_index, update_continuous_hypers, LN_2PI,
};

/// Sufficient statistics plus conjugate math for one cluster × column
pub trait ComponentModel: Clone + fmt::Debug {
    type Hypers: Clone + fmt::Debug;

    /// A component with no values assigned
    fn empty(hypers: &Self::Hypers) -> Self;

    fn count(&self) -> usize;

    fn insert(&mut self, value: f64);

    /// Removing from an empty component is a consistency defect
    fn remove(&mut self, value: f64) -> Result<()>;

    /// Closed-form log marginal likelihood of every value currently held
    fn marginal_logp(&self, hypers: &Self::Hypers) -> f64;

    /// Log posterior-predictive density of a value not yet inserted
    fn predictive_logp(&self, hypers: &Self::Hypers, value: f64) -> f64;

    /// Sample from the posterior predictive
    fn draw<R: Rng + ?Sized>(&self, hypers: &Self::Hypers, rng: &mut R) -> Result<f64>;

    fn suffstats(&self) -> BTreeMap<String, f64>;
}

// ============================================================================
// Continuous: normal-gamma
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuousHypers {
    /// 均值的精度缩放
    pub r: f64,
    /// degrees of freedom
    pub nu: f64,
    /// scale of the precision prior
    pub s: f64,
    /// prior location
    pub mu: f64,
}

impl ContinuousHypers {
    pub fn new(r: f64, nu: f64, s: f64, mu: f64) -> Result<Self> {
        let hypers = Self { r, nu, s, mu };
        hypers.validate()?;
        Ok(hypers)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.r > 0.0 && self.nu > 0.0 && self.s > 0.0) || !self.r.is_finite()
            || !self.nu.is_finite() || !self.s.is_finite() || !self.mu.is_finite()
        {
            return invalid(format!(
                "continuous hypers must have r, nu, s > 0 and finite mu, got {:?}",
                self
            ));
        }
        Ok(())
    }

    fn log_z(&self) -> f64 {
        continuous_log_z(self.r, self.nu, self.s)
    }
}

impl Default for ContinuousHypers {
    fn default() -> Self {
        Self {
            r: 1.0,
            nu: 1.0,
            s: 1.0,
            mu: 0.0,
        }
    }
}

/// Count, running mean and sum of squared deviations (Welford)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinuousComponent {
    count: usize,
    mean: f64,
    m2: f64,
}

impl ContinuousComponent {
    fn posterior(&self, hypers: &ContinuousHypers) -> ContinuousHypers {
        let (r, nu, s, mu) = update_continuous_hypers(
            self.count as f64,
            self.mean,
            self.m2,
            hypers.r,
            hypers.nu,
            hypers.s,
            hypers.mu,
        );
        ContinuousHypers { r, nu, s, mu }
    }
}

impl ComponentModel for ContinuousComponent {
    type Hypers = ContinuousHypers;

    fn empty(_hypers: &ContinuousHypers) -> Self {
        Self::default()
    }

    fn count(&self) -> usize {
        self.count
    }

    fn insert(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn remove(&mut self, value: f64) -> Result<()> {
        if self.count == 0 {
            return violation("remove from an empty continuous component");
        }
        self.count -= 1;
        if self.count == 0 {
            // drop accumulated rounding so an emptied component is exactly empty
            self.mean = 0.0;
            self.m2 = 0.0;
        } else {
            let delta = value - self.mean;
            self.mean -= delta / self.count as f64;
            self.m2 = (self.m2 - delta * (value - self.mean)).max(0.0);
        }
        Ok(())
    }

    fn marginal_logp(&self, hypers: &ContinuousHypers) -> f64 {
        let post = self.posterior(hypers);
        -0.5 * self.count as f64 * LN_2PI + post.log_z() - hypers.log_z()
    }

    fn predictive_logp(&self, hypers: &ContinuousHypers, value: f64) -> f64 {
        let before = self.posterior(hypers);
        let mut with_value = self.clone();
        with_value.insert(value);
        let after = with_value.posterior(hypers);
        -0.5 * LN_2PI + after.log_z() - before.log_z()
    }

    fn draw<R: Rng + ?Sized>(&self, hypers: &ContinuousHypers, rng: &mut R) -> Result<f64> {
        let post = self.posterior(hypers);
        let precision = Gamma::new(0.5 * post.nu, 2.0 / post.s)
            .map_err(|e| bad_draw(format!("gamma({}, {}): {:?}", post.nu, post.s, e)))?
            .sample(rng);
        let mean = Normal::new(post.mu, (1.0 / (post.r * precision)).sqrt())
            .map_err(|e| bad_draw(format!("{:?}", e)))?
            .sample(rng);
        let value = Normal::new(mean, (1.0 / precision).sqrt())
            .map_err(|e| bad_draw(format!("{:?}", e)))?
            .sample(rng);
        Ok(value)
    }

    fn suffstats(&self) -> BTreeMap<String, f64> {
        let mut stats = BTreeMap::new();
        let n = self.count as f64;
        stats.insert("N".to_string(), n);
        stats.insert("mean".to_string(), self.mean);
        stats.insert("sum_x".to_string(), n * self.mean);
        stats.insert("sum_x_squared".to_string(), self.m2 + n * self.mean * self.mean);
        stats
    }
}

// ============================================================================
// Categorical: Dirichlet-multinomial
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoricalHypers {
    /// symmetric Dirichlet pseudo-count
    pub alpha: f64,
    pub cardinality: usize,
}

impl CategoricalHypers {
    pub fn new(alpha: f64, cardinality: usize) -> Result<Self> {
        let hypers = Self { alpha, cardinality };
        hypers.validate()?;
        Ok(hypers)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0) || !self.alpha.is_finite() {
            return invalid(format!("dirichlet alpha must be > 0, got {}", self.alpha));
        }
        if self.cardinality == 0 {
            return invalid("categorical cardinality must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalComponent {
    count: usize,
    counts: Vec<usize>,
}

/// Categorical values are stored as f64 holding a small non-negative integer
fn category(value: f64) -> usize {
    debug_assert!(value >= 0.0 && value.fract() == 0.0, "bad category {}", value);
    value as usize
}

impl ComponentModel for CategoricalComponent {
    type Hypers = CategoricalHypers;

    fn empty(hypers: &CategoricalHypers) -> Self {
        Self {
            count: 0,
            counts: vec![0; hypers.cardinality],
        }
    }

    fn count(&self) -> usize {
        self.count
    }

    fn insert(&mut self, value: f64) {
        self.count += 1;
        self.counts[category(value)] += 1;
    }

    fn remove(&mut self, value: f64) -> Result<()> {
        let k = category(value);
        match self.counts.get_mut(k) {
            Some(c) if *c > 0 => {
                *c -= 1;
                self.count -= 1;
                Ok(())
            }
            _ => violation(format!(
                "remove of category {} not present in component (N = {})",
                k, self.count
            )),
        }
    }

    fn marginal_logp(&self, hypers: &CategoricalHypers) -> f64 {
        categorical_marginal_logp(&self.counts, hypers.alpha)
    }

    fn predictive_logp(&self, hypers: &CategoricalHypers, value: f64) -> f64 {
        match self.counts.get(category(value)) {
            Some(&c) => {
                let k = self.counts.len() as f64;
                ((c as f64 + hypers.alpha) / (self.count as f64 + k * hypers.alpha)).ln()
            }
            None => f64::NEG_INFINITY,
        }
    }

    fn draw<R: Rng + ?Sized>(&self, hypers: &CategoricalHypers, rng: &mut R) -> Result<f64> {
        let total = self.count as f64 + self.counts.len() as f64 * hypers.alpha;
        let probs: Vec<f64> = self
            .counts
            .iter()
            .map(|&c| (c as f64 + hypers.alpha) / total)
            .collect();
        Ok(draw_index(&probs, rng) as f64)
    }

    fn suffstats(&self) -> BTreeMap<String, f64> {
        let mut stats = BTreeMap::new();
        stats.insert("N".to_string(), self.count as f64);
        for (k, &c) in self.counts.iter().enumerate() {
            if c > 0 {
                stats.insert(k.to_string(), c as f64);
            }
        }
        stats
    }
}

fn bad_draw(msg: String) -> crate::error::CrossCatError {
    crate::error::CrossCatError::InvariantViolation(format!("predictive draw failed: {}", msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    fn filled_continuous(values: &[f64]) -> ContinuousComponent {
        let mut component = ContinuousComponent::default();
        for &v in values {
            component.insert(v);
        }
        component
    }

    #[test]
    fn test_continuous_empty_marginal_is_zero() {
        let hypers = ContinuousHypers::default();
        assert_eq!(ContinuousComponent::empty(&hypers).marginal_logp(&hypers), 0.0);
    }

    #[test]
    fn test_continuous_predictive_matches_marginal_difference() {
        let hypers = ContinuousHypers::new(2.0, 3.0, 1.5, 0.5).unwrap();
        let component = filled_continuous(&[1.0, 1.2, 0.7]);
        let mut bigger = component.clone();
        bigger.insert(0.9);
        let diff = bigger.marginal_logp(&hypers) - component.marginal_logp(&hypers);
        assert!((component.predictive_logp(&hypers, 0.9) - diff).abs() < 1e-10);
    }

    #[test]
    fn test_continuous_single_value_is_student_t() {
        // one value under (r, nu, s, mu) is Student-t with nu dof,
        // location mu and scale^2 = s (r + 1) / (r nu)
        let hypers = ContinuousHypers::new(1.0, 2.0, 2.0, 0.0).unwrap();
        let x: f64 = 0.5;
        let nu = 2.0;
        let scale_sq = 2.0 * 2.0 / 2.0;
        let expected = statrs::function::gamma::ln_gamma((nu + 1.0) / 2.0)
            - statrs::function::gamma::ln_gamma(nu / 2.0)
            - 0.5 * (nu * std::f64::consts::PI * scale_sq).ln()
            - (nu + 1.0) / 2.0 * (1.0 + x * x / (nu * scale_sq)).ln();
        let logp = ContinuousComponent::default().predictive_logp(&hypers, x);
        assert!((logp - expected).abs() < 1e-10, "{} vs {}", logp, expected);
    }

    #[test]
    fn test_continuous_remove_round_trip() {
        let hypers = ContinuousHypers::default();
        let mut component = filled_continuous(&[1.0, 2.0, 3.0]);
        let before = component.marginal_logp(&hypers);
        component.remove(2.0).unwrap();
        component.insert(2.0);
        assert!((component.marginal_logp(&hypers) - before).abs() < 1e-12);
        assert_eq!(component.count(), 3);
    }

    #[test]
    fn test_continuous_large_offset_stays_finite() {
        // epoch-seconds scale: tiny spread next to the magnitude
        let hypers = ContinuousHypers::new(1.0, 1.0, 1.0, 1.7e9).unwrap();
        let values: Vec<f64> = (0..200).map(|i| 1.7e9 + (i % 7) as f64).collect();
        let mut component = filled_continuous(&values);
        assert!(component.marginal_logp(&hypers).is_finite());
        assert!(component.predictive_logp(&hypers, 1.7e9 + 3.0).is_finite());

        for &v in values.iter().take(150) {
            component.remove(v).unwrap();
        }
        let fresh = filled_continuous(&values[150..]);
        let kept = component.marginal_logp(&hypers);
        assert!(kept.is_finite());
        let expected = fresh.marginal_logp(&hypers);
        assert!((kept - expected).abs() < 1e-3, "{} vs {}", kept, expected);
    }

    #[test]
    fn test_continuous_suffstats_report_raw_sums() {
        let stats = filled_continuous(&[1.0, 2.0, 3.0]).suffstats();
        assert_eq!(stats["N"], 3.0);
        assert!((stats["mean"] - 2.0).abs() < 1e-12);
        assert!((stats["sum_x"] - 6.0).abs() < 1e-12);
        assert!((stats["sum_x_squared"] - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_remove_from_empty_is_violation() {
        let mut component = ContinuousComponent::default();
        assert!(component.remove(1.0).unwrap_err().is_fatal());

        let hypers = CategoricalHypers::new(1.0, 3).unwrap();
        let mut component = CategoricalComponent::empty(&hypers);
        assert!(component.remove(1.0).unwrap_err().is_fatal());
    }

    #[test]
    fn test_emptied_continuous_resets_sums() {
        let mut component = filled_continuous(&[0.1, 0.2]);
        component.remove(0.1).unwrap();
        component.remove(0.2).unwrap();
        assert_eq!(component, ContinuousComponent::default());
    }

    #[test]
    fn test_categorical_predictive_and_marginal() {
        let hypers = CategoricalHypers::new(1.0, 2).unwrap();
        let mut component = CategoricalComponent::empty(&hypers);
        component.insert(0.0);
        component.insert(0.0);
        // (2 + 1) / (2 + 2)
        assert!((component.predictive_logp(&hypers, 0.0) - (0.75f64).ln()).abs() < 1e-12);
        assert!((component.marginal_logp(&hypers) - (1.0f64 / 3.0).ln()).abs() < 1e-12);
        assert_eq!(component.predictive_logp(&hypers, 5.0), f64::NEG_INFINITY);
        let stats = component.suffstats();
        assert_eq!(stats["N"], 2.0);
        assert_eq!(stats["0"], 2.0);
        assert!(!stats.contains_key("1"));
    }

    #[test]
    fn test_draws_follow_posterior() {
        let mut rng = StdRng::seed_from_u64(11);
        let hypers = ContinuousHypers::new(1.0, 1.0, 1.0, 0.0).unwrap();
        let component = filled_continuous(&vec![10.0; 200]);
        let mean: f64 = (0..500)
            .map(|_| component.draw(&hypers, &mut rng).unwrap())
            .sum::<f64>()
            / 500.0;
        assert!((mean - 10.0).abs() < 0.5, "mean of draws {}", mean);

        let cat_hypers = CategoricalHypers::new(0.1, 3).unwrap();
        let mut cat = CategoricalComponent::empty(&cat_hypers);
        for _ in 0..100 {
            cat.insert(2.0);
        }
        let twos = (0..200)
            .filter(|_| cat.draw(&cat_hypers, &mut rng).unwrap() == 2.0)
            .count();
        assert!(twos > 190);
    }

    #[test]
    fn test_hypers_validation() {
        assert!(ContinuousHypers::new(0.0, 1.0, 1.0, 0.0).is_err());
        assert!(ContinuousHypers::new(1.0, 1.0, 1.0, f64::NAN).is_err());
        assert!(CategoricalHypers::new(-1.0, 2).is_err());
        assert!(CategoricalHypers::new(1.0, 0).is_err());
    }
}
