//! # Hyperparameter grids
//!
//! Concentration parameters and per-column hyperparameters are resampled by
//! scoring every candidate on a fixed grid and making a categorical draw over
//! the exponentiated log scores. The grid is the prior: uniform over its points.

/**
 * File: /src/grid.rs
 * Created Date: Tuesday, March 3rd 2026
 * Author: Zihan
 * -----
 * Last Modified: Tuesday, 3rd March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-03		Zihan	Discretized hyperparameter grids
 */

use log::warn;
use ndarray::ArrayView1;
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};
use crate::numerics::{linspace, log_linspace, normalize_log_weights, draw_index};

/// Default number of points per grid
pub const DEFAULT_N_GRID: usize = 31;

/// An ordered, non-empty set of finite candidate values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperGrid {
    values: Vec<f64>,
}

impl HyperGrid {
    /// Grid over a location-like parameter: any finite value is allowed
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return invalid("hyperparameter grid is empty");
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return invalid(format!("hyperparameter grid contains {}", bad));
        }
        Ok(Self { values })
    }

    /// Grid over a scale/concentration parameter: values must be > 0
    pub fn positive(values: Vec<f64>) -> Result<Self> {
        let grid = Self::new(values)?;
        if let Some(bad) = grid.values.iter().find(|&&v| v <= 0.0) {
            return invalid(format!("grid value {} is not strictly positive", bad));
        }
        Ok(grid)
    }

    /// Log-spaced grid for a CRP concentration over `n_values` items
    pub fn crp_alpha(n_values: usize, n_grid: usize) -> Result<Self> {
        Self::positive(log_linspace(1.0, n_values.max(1) as f64, n_grid))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Draw a grid point uniformly (the grid prior)
    pub fn draw_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.values[rng.gen_range(0..self.values.len())]
    }

    /// Score every candidate with `log_score` and draw one proportionally to
    /// exp(score). Returns the drawn value and its score.
    pub fn resample<R, F>(&self, mut log_score: F, rng: &mut R) -> Result<(f64, f64)>
    where
        R: Rng + ?Sized,
        F: FnMut(f64) -> f64,
    {
        let scores: Vec<f64> = self.values.iter().map(|&v| log_score(v)).collect();
        let probs = normalize_log_weights(&scores)?;
        let idx = draw_index(&probs, rng);
        Ok((self.values[idx], scores[idx]))
    }
}

/// Grids for the hyperparameters of one column, kept with the column model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnGrid {
    Continuous {
        r: HyperGrid,
        nu: HyperGrid,
        s: HyperGrid,
        mu: HyperGrid,
    },
    Categorical {
        alpha: HyperGrid,
    },
}

impl ColumnGrid {
    /// Grids for a continuous column, derived from the column's data.
    ///
    /// `r` and `nu` are log-spaced over [1, n_rows]; `s` is log-spaced over
    /// [ssd/100, ssd] with ssd the sum of squared deviations; `mu` spans the
    /// data range. Explicit `s_grid`/`mu_grid` override the data-driven ones.
    pub fn continuous(
        column: ArrayView1<f64>,
        n_grid: usize,
        s_grid: Option<&[f64]>,
        mu_grid: Option<&[f64]>,
    ) -> Result<Self> {
        let n_rows = column.len().max(1) as f64;
        let r = HyperGrid::positive(log_linspace(1.0, n_rows, n_grid))?;
        let nu = r.clone();

        let s = match s_grid {
            Some(values) => HyperGrid::positive(values.to_vec())?,
            None => {
                let ssd = sum_sq_deviation(column);
                if ssd > 0.0 {
                    HyperGrid::positive(log_linspace(ssd / 100.0, ssd, n_grid))?
                } else {
                    warn!("Column has zero variance, falling back to a unit s grid");
                    HyperGrid::positive(log_linspace(0.01, 1.0, n_grid))?
                }
            }
        };

        let mu = match mu_grid {
            Some(values) => HyperGrid::new(values.to_vec())?,
            None => {
                let min = column.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = column.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                if min.is_finite() && max.is_finite() {
                    HyperGrid::new(linspace(min, max, n_grid))?
                } else {
                    HyperGrid::new(vec![0.0])?
                }
            }
        };

        Ok(ColumnGrid::Continuous { r, nu, s, mu })
    }

    /// Dirichlet concentration grid, log-spaced over [1, n_rows]
    pub fn categorical(n_rows: usize, n_grid: usize) -> Result<Self> {
        Ok(ColumnGrid::Categorical {
            alpha: HyperGrid::positive(log_linspace(1.0, n_rows.max(1) as f64, n_grid))?,
        })
    }
}

fn sum_sq_deviation(column: ArrayView1<f64>) -> f64 {
    if column.is_empty() {
        return 0.0;
    }
    let mean = column.sum() / column.len() as f64;
    column.iter().map(|&x| (x - mean).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn test_grid_validation() {
        assert!(HyperGrid::new(vec![]).is_err());
        assert!(HyperGrid::new(vec![1.0, f64::NAN]).is_err());
        assert!(HyperGrid::new(vec![-1.0, 0.0, 1.0]).is_ok());
        assert!(HyperGrid::positive(vec![0.0, 1.0]).is_err());
        assert!(HyperGrid::positive(vec![0.5, 1.0]).is_ok());
    }

    #[test]
    fn test_crp_alpha_grid_shape() {
        let grid = HyperGrid::crp_alpha(100, DEFAULT_N_GRID).unwrap();
        assert_eq!(grid.len(), 31);
        assert!((grid.values()[0] - 1.0).abs() < 1e-12);
        assert!((grid.values()[30] - 100.0).abs() < 1e-9);
        // a single item still yields a usable grid
        assert!(HyperGrid::crp_alpha(1, 5).unwrap().values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_resample_concentrates_on_best_candidate() {
        let grid = HyperGrid::new(vec![-1.0, 0.0, 1.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let (value, _) = grid
                .resample(|v| if v == 1.0 { 0.0 } else { -1e6 }, &mut rng)
                .unwrap();
            assert_eq!(value, 1.0);
        }
    }

    #[test]
    fn test_resample_rejects_nan_scores() {
        let grid = HyperGrid::new(vec![1.0, 2.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(grid.resample(|_| f64::NAN, &mut rng).is_err());
    }

    #[test]
    fn test_continuous_grid_from_data() {
        let column = array![1.0, 2.0, 3.0, 4.0];
        let grid = ColumnGrid::continuous(column.view(), 5, None, None).unwrap();
        match grid {
            ColumnGrid::Continuous { r, s, mu, .. } => {
                assert!((r.values()[4] - 4.0).abs() < 1e-9);
                // ssd = 5.0
                assert!((s.values()[4] - 5.0).abs() < 1e-9);
                assert!((s.values()[0] - 0.05).abs() < 1e-9);
                assert_eq!(mu.values()[0], 1.0);
                assert_eq!(mu.values()[4], 4.0);
            }
            _ => panic!("Expected continuous grid"),
        }
    }

    #[test]
    fn test_continuous_grid_overrides_and_constant_column() {
        let column = array![2.0, 2.0, 2.0];
        let grid = ColumnGrid::continuous(column.view(), 4, Some(&[1.0, 2.0]), None).unwrap();
        match grid {
            ColumnGrid::Continuous { s, mu, .. } => {
                assert_eq!(s.values(), &[1.0, 2.0]);
                assert!(mu.values().iter().all(|&v| v == 2.0));
            }
            _ => panic!("Expected continuous grid"),
        }
        // zero variance falls back to a positive s grid
        assert!(ColumnGrid::continuous(column.view(), 4, None, None).is_ok());
        assert!(ColumnGrid::continuous(column.view(), 4, Some(&[0.0]), None).is_err());
    }
}
