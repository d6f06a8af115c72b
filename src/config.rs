/**
 * File: /src/config.rs
 * Created Date: Friday, January 26th 2024
 * Author: Zihan
 * -----
 * Last Modified: Saturday, 7th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-07		Zihan	Replaced CLI config with sampler configuration
 */

use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};
use crate::grid::{HyperGrid, DEFAULT_N_GRID};

/// How a partition is drawn when no explicit latent state is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Initialization {
    /// Sequential CRP draw with alpha drawn from its grid
    #[default]
    FromThePrior,
    /// One cluster / view holding everything
    Together,
    /// One cluster / view per item
    Apart,
}

/// Kernel used to move columns between views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColumnKernel {
    /// Draw from the full conditional over every view plus a new one
    #[default]
    Gibbs,
    /// Propose a view from the CRP prior, accept on the likelihood ratio
    MetropolisHastings,
}

/// Sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// 每个超参数网格的点数
    pub n_grid: usize,
    /// Seed of the state's own RNG
    pub seed: u64,
    pub column_initialization: Initialization,
    pub row_initialization: Initialization,
    pub column_kernel: ColumnKernel,
    /// Overrides the log-spaced [1, n_rows] grid
    pub row_crp_alpha_grid: Option<Vec<f64>>,
    /// Overrides the log-spaced [1, n_cols] grid
    pub column_crp_alpha_grid: Option<Vec<f64>>,
    /// Overrides the data-driven `s` grid of every continuous column
    pub s_grid: Option<Vec<f64>>,
    /// Overrides the data range `mu` grid of every continuous column
    pub mu_grid: Option<Vec<f64>>,
    pub dependencies: Vec<(usize, usize)>,
    pub independencies: Vec<(usize, usize)>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            n_grid: DEFAULT_N_GRID,
            seed: 0,
            column_initialization: Initialization::FromThePrior,
            row_initialization: Initialization::FromThePrior,
            column_kernel: ColumnKernel::Gibbs,
            row_crp_alpha_grid: None,
            column_crp_alpha_grid: None,
            s_grid: None,
            mu_grid: None,
            dependencies: Vec::new(),
            independencies: Vec::new(),
        }
    }
}

impl StateConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_n_grid(mut self, n_grid: usize) -> Self {
        self.n_grid = n_grid;
        self
    }

    pub fn with_initialization(mut self, columns: Initialization, rows: Initialization) -> Self {
        self.column_initialization = columns;
        self.row_initialization = rows;
        self
    }

    pub fn with_column_kernel(mut self, kernel: ColumnKernel) -> Self {
        self.column_kernel = kernel;
        self
    }

    pub fn with_row_crp_alpha_grid(mut self, grid: Vec<f64>) -> Self {
        self.row_crp_alpha_grid = Some(grid);
        self
    }

    pub fn with_column_crp_alpha_grid(mut self, grid: Vec<f64>) -> Self {
        self.column_crp_alpha_grid = Some(grid);
        self
    }

    pub fn with_s_grid(mut self, grid: Vec<f64>) -> Self {
        self.s_grid = Some(grid);
        self
    }

    pub fn with_mu_grid(mut self, grid: Vec<f64>) -> Self {
        self.mu_grid = Some(grid);
        self
    }

    pub fn with_dependencies(mut self, pairs: Vec<(usize, usize)>) -> Self {
        self.dependencies = pairs;
        self
    }

    pub fn with_independencies(mut self, pairs: Vec<(usize, usize)>) -> Self {
        self.independencies = pairs;
        self
    }

    /// Check grid sizes and any explicit grids
    pub fn validate(&self) -> Result<()> {
        if self.n_grid == 0 {
            return invalid("n_grid must be at least 1");
        }
        for (name, grid) in [
            ("row_crp_alpha_grid", &self.row_crp_alpha_grid),
            ("column_crp_alpha_grid", &self.column_crp_alpha_grid),
            ("s_grid", &self.s_grid),
        ] {
            if let Some(values) = grid {
                HyperGrid::positive(values.clone()).map_err(|e| e.with_context(name))?;
            }
        }
        if let Some(values) = &self.mu_grid {
            HyperGrid::new(values.clone()).map_err(|e| e.with_context("mu_grid"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrossCatError;

    #[test]
    fn test_default_config() {
        let config = StateConfig::default();
        assert_eq!(config.n_grid, 31);
        assert_eq!(config.seed, 0);
        assert_eq!(config.column_kernel, ColumnKernel::Gibbs);
        assert_eq!(config.row_initialization, Initialization::FromThePrior);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = StateConfig::default()
            .with_seed(7)
            .with_n_grid(11)
            .with_initialization(Initialization::Apart, Initialization::Together)
            .with_column_kernel(ColumnKernel::MetropolisHastings)
            .with_dependencies(vec![(0, 1)])
            .with_s_grid(vec![0.5, 1.0]);
        assert_eq!(config.seed, 7);
        assert_eq!(config.s_grid, Some(vec![0.5, 1.0]));
        assert_eq!(config.n_grid, 11);
        assert_eq!(config.column_initialization, Initialization::Apart);
        assert_eq!(config.row_initialization, Initialization::Together);
        assert_eq!(config.dependencies, vec![(0, 1)]);
    }

    #[test]
    fn test_validate_rejects_bad_grids() {
        assert!(StateConfig::default().with_n_grid(0).validate().is_err());
        assert!(StateConfig::default()
            .with_row_crp_alpha_grid(vec![0.0, 1.0])
            .validate()
            .is_err());
        let err = StateConfig::default().with_mu_grid(vec![]).validate().unwrap_err();
        match err {
            CrossCatError::InvalidArgument(msg) => assert!(msg.starts_with("mu_grid: "), "{}", msg),
            other => panic!("Expected invalid argument, got {:?}", other),
        }
        assert!(StateConfig::default()
            .with_mu_grid(vec![-3.0, 3.0])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_config_json_round_trip_with_defaults() {
        let config: StateConfig = serde_json::from_str(r#"{"seed": 42}"#).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.n_grid, 31);
    }
}
