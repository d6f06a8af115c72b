//! A column as seen by the view it lives in: one component per row cluster,
//! the column's hyperparameters and the grids they are resampled on.

/**
 * File: /src/column.rs
 * Created Date: Wednesday, March 4th 2026
 * Author: Zihan
 * -----
 * Last Modified: Monday, 9th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-04		Zihan	Column model: hypers, grids and per-cluster components
 * 2026-03-09		Zihan	Grid Gibbs over column hyperparameters
 */

use std::collections::BTreeMap;

use ndarray::ArrayView1;
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::component::{
    CategoricalComponent, CategoricalHypers, ComponentModel, ContinuousComponent,
    ContinuousHypers,
};
use crate::error::{invalid, violation, CrossCatError, Result};
use crate::grid::{ColumnGrid, HyperGrid};

/// Datatype tag of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Continuous,
    Categorical { cardinality: usize },
}

impl ColumnType {
    /// Whether `value` is a legal cell for this column
    pub fn accepts(&self, value: f64) -> bool {
        match *self {
            ColumnType::Continuous => value.is_finite(),
            ColumnType::Categorical { cardinality } => {
                value.is_finite()
                    && value >= 0.0
                    && value.fract() == 0.0
                    && (value as usize) < cardinality
            }
        }
    }
}

/// Hyperparameters of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColumnHypers {
    Continuous(ContinuousHypers),
    Categorical(CategoricalHypers),
}

impl ColumnHypers {
    /// Draw each hyperparameter uniformly from its grid
    pub fn from_grid<R: Rng + ?Sized>(grid: &ColumnGrid, column_type: ColumnType, rng: &mut R) -> Result<Self> {
        match (grid, column_type) {
            (ColumnGrid::Continuous { r, nu, s, mu }, ColumnType::Continuous) => {
                Ok(ColumnHypers::Continuous(ContinuousHypers::new(
                    r.draw_uniform(rng),
                    nu.draw_uniform(rng),
                    s.draw_uniform(rng),
                    mu.draw_uniform(rng),
                )?))
            }
            (ColumnGrid::Categorical { alpha }, ColumnType::Categorical { cardinality }) => Ok(
                ColumnHypers::Categorical(CategoricalHypers::new(alpha.draw_uniform(rng), cardinality)?),
            ),
            _ => invalid("column grid does not match the column type"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ColumnHypers::Continuous(h) => h.validate(),
            ColumnHypers::Categorical(h) => h.validate(),
        }
    }

    /// Flat name → value view, used by queries and the text dump
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        match self {
            ColumnHypers::Continuous(h) => {
                map.insert("r".to_string(), h.r);
                map.insert("nu".to_string(), h.nu);
                map.insert("s".to_string(), h.s);
                map.insert("mu".to_string(), h.mu);
            }
            ColumnHypers::Categorical(h) => {
                map.insert("dirichlet_alpha".to_string(), h.alpha);
                map.insert("K".to_string(), h.cardinality as f64);
            }
        }
        map
    }
}

/// Hypers and per-cluster components of one data family
#[derive(Debug, Clone)]
pub struct Column<C: ComponentModel> {
    hypers: C::Hypers,
    components: Vec<C>,
}

impl<C: ComponentModel> Column<C> {
    fn new(hypers: C::Hypers) -> Self {
        Self {
            hypers,
            components: Vec::new(),
        }
    }

    fn fit(hypers: C::Hypers, values: ArrayView1<f64>, assignments: &[usize], n_clusters: usize) -> Self {
        let mut components: Vec<C> = (0..n_clusters).map(|_| C::empty(&hypers)).collect();
        for (&value, &cluster) in values.iter().zip(assignments) {
            components[cluster].insert(value);
        }
        Self { hypers, components }
    }

    fn score_with(&self, hypers: &C::Hypers) -> f64 {
        self.components.iter().map(|c| c.marginal_logp(hypers)).sum()
    }

    fn score(&self) -> f64 {
        self.score_with(&self.hypers)
    }

    fn component(&self, cluster: usize) -> Result<&C> {
        self.components
            .get(cluster)
            .ok_or_else(|| missing_cluster(cluster, self.components.len()))
    }

    fn component_mut(&mut self, cluster: usize) -> Result<&mut C> {
        let n = self.components.len();
        self.components
            .get_mut(cluster)
            .ok_or_else(|| missing_cluster(cluster, n))
    }

    fn predictive_logp(&self, cluster: Option<usize>, value: f64) -> Result<f64> {
        Ok(match cluster {
            Some(k) => self.component(k)?.predictive_logp(&self.hypers, value),
            None => C::empty(&self.hypers).predictive_logp(&self.hypers, value),
        })
    }

    fn swap_remove_cluster(&mut self, cluster: usize) -> Result<()> {
        let count = self.component(cluster)?.count();
        if count != 0 {
            return violation(format!(
                "dissolving cluster {} which still holds {} values",
                cluster, count
            ));
        }
        self.components.swap_remove(cluster);
        Ok(())
    }

    /// Resample one scalar hyperparameter on its grid, all others held fixed
    fn resample_hyper<R, F>(&mut self, grid: &HyperGrid, set: F, rng: &mut R) -> Result<()>
    where
        R: Rng + ?Sized,
        F: Fn(&mut C::Hypers, f64),
    {
        let (value, _) = grid.resample(
            |candidate| {
                let mut hypers = self.hypers.clone();
                set(&mut hypers, candidate);
                self.score_with(&hypers)
            },
            rng,
        )?;
        set(&mut self.hypers, value);
        Ok(())
    }
}

fn missing_cluster(cluster: usize, n_clusters: usize) -> CrossCatError {
    CrossCatError::InvariantViolation(format!(
        "cluster {} out of range for a column with {} clusters",
        cluster, n_clusters
    ))
}

#[derive(Debug, Clone)]
enum Family {
    Continuous(Column<ContinuousComponent>),
    Categorical(Column<CategoricalComponent>),
}

/// One column inside a view
#[derive(Debug, Clone)]
pub struct ColumnModel {
    family: Family,
    grid: ColumnGrid,
}

impl ColumnModel {
    /// A column with no clusters yet; call [`ColumnModel::refit`] or
    /// [`ColumnModel::push_cluster`] before inserting values
    pub fn new(hypers: ColumnHypers, grid: ColumnGrid) -> Result<Self> {
        hypers.validate()?;
        let family = match (hypers, &grid) {
            (ColumnHypers::Continuous(h), ColumnGrid::Continuous { .. }) => {
                Family::Continuous(Column::new(h))
            }
            (ColumnHypers::Categorical(h), ColumnGrid::Categorical { .. }) => {
                Family::Categorical(Column::new(h))
            }
            _ => return invalid("column hypers do not match the column grid"),
        };
        Ok(Self { family, grid })
    }

    /// A fresh model with the same hypers and grid whose components hold the
    /// column's values grouped by `assignments`
    pub fn refit(&self, values: ArrayView1<f64>, assignments: &[usize], n_clusters: usize) -> Self {
        let family = match &self.family {
            Family::Continuous(c) => {
                Family::Continuous(Column::fit(c.hypers, values, assignments, n_clusters))
            }
            Family::Categorical(c) => {
                Family::Categorical(Column::fit(c.hypers, values, assignments, n_clusters))
            }
        };
        Self {
            family,
            grid: self.grid.clone(),
        }
    }

    pub fn hypers(&self) -> ColumnHypers {
        match &self.family {
            Family::Continuous(c) => ColumnHypers::Continuous(c.hypers),
            Family::Categorical(c) => ColumnHypers::Categorical(c.hypers),
        }
    }

    pub fn grid(&self) -> &ColumnGrid {
        &self.grid
    }

    pub fn num_clusters(&self) -> usize {
        match &self.family {
            Family::Continuous(c) => c.components.len(),
            Family::Categorical(c) => c.components.len(),
        }
    }

    /// Sum of the cluster marginal log likelihoods
    pub fn score(&self) -> f64 {
        match &self.family {
            Family::Continuous(c) => c.score(),
            Family::Categorical(c) => c.score(),
        }
    }

    pub fn push_cluster(&mut self) {
        match &mut self.family {
            Family::Continuous(c) => c.components.push(ContinuousComponent::empty(&c.hypers)),
            Family::Categorical(c) => c.components.push(CategoricalComponent::empty(&c.hypers)),
        }
    }

    /// Drop an empty cluster, moving the last cluster into its slot
    pub fn swap_remove_cluster(&mut self, cluster: usize) -> Result<()> {
        match &mut self.family {
            Family::Continuous(c) => c.swap_remove_cluster(cluster),
            Family::Categorical(c) => c.swap_remove_cluster(cluster),
        }
    }

    pub fn insert(&mut self, cluster: usize, value: f64) -> Result<()> {
        match &mut self.family {
            Family::Continuous(c) => c.component_mut(cluster)?.insert(value),
            Family::Categorical(c) => c.component_mut(cluster)?.insert(value),
        }
        Ok(())
    }

    pub fn remove(&mut self, cluster: usize, value: f64) -> Result<()> {
        match &mut self.family {
            Family::Continuous(c) => c.component_mut(cluster)?.remove(value),
            Family::Categorical(c) => c.component_mut(cluster)?.remove(value),
        }
    }

    /// Predictive log density of `value` in `cluster`, or in a new cluster for `None`
    pub fn predictive_logp(&self, cluster: Option<usize>, value: f64) -> Result<f64> {
        match &self.family {
            Family::Continuous(c) => c.predictive_logp(cluster, value),
            Family::Categorical(c) => c.predictive_logp(cluster, value),
        }
    }

    pub fn draw<R: Rng + ?Sized>(&self, cluster: usize, rng: &mut R) -> Result<f64> {
        match &self.family {
            Family::Continuous(c) => c.component(cluster)?.draw(&c.hypers, rng),
            Family::Categorical(c) => c.component(cluster)?.draw(&c.hypers, rng),
        }
    }

    pub fn suffstats(&self) -> Vec<BTreeMap<String, f64>> {
        match &self.family {
            Family::Continuous(c) => c.components.iter().map(|x| x.suffstats()).collect(),
            Family::Categorical(c) => c.components.iter().map(|x| x.suffstats()).collect(),
        }
    }

    /// Grid Gibbs over every hyperparameter of the column, one at a time.
    /// Returns the change in the column score.
    pub fn transition_hypers<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<f64> {
        let before = self.score();
        match (&mut self.family, &self.grid) {
            (Family::Continuous(c), ColumnGrid::Continuous { r, nu, s, mu }) => {
                c.resample_hyper(r, |h, v| h.r = v, rng)?;
                c.resample_hyper(nu, |h, v| h.nu = v, rng)?;
                c.resample_hyper(s, |h, v| h.s = v, rng)?;
                c.resample_hyper(mu, |h, v| h.mu = v, rng)?;
            }
            (Family::Categorical(c), ColumnGrid::Categorical { alpha }) => {
                c.resample_hyper(alpha, |h, v| h.alpha = v, rng)?;
            }
            _ => return violation("column grid does not match the column family"),
        }
        Ok(self.score() - before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    fn continuous_model(values: ArrayView1<f64>) -> ColumnModel {
        let grid = ColumnGrid::continuous(values, 11, None, None).unwrap();
        ColumnModel::new(ColumnHypers::Continuous(ContinuousHypers::default()), grid).unwrap()
    }

    #[test]
    fn test_column_type_accepts() {
        let cat = ColumnType::Categorical { cardinality: 3 };
        assert!(cat.accepts(0.0));
        assert!(cat.accepts(2.0));
        assert!(!cat.accepts(3.0));
        assert!(!cat.accepts(1.5));
        assert!(!cat.accepts(-1.0));
        assert!(ColumnType::Continuous.accepts(-4.2));
        assert!(!ColumnType::Continuous.accepts(f64::NAN));
    }

    #[test]
    fn test_refit_groups_values_by_cluster() {
        let values = array![1.0, 2.0, 10.0, 11.0];
        let model = continuous_model(values.view()).refit(values.view(), &[0, 0, 1, 1], 2);
        assert_eq!(model.num_clusters(), 2);
        let stats = model.suffstats();
        assert_eq!(stats[0]["sum_x"], 3.0);
        assert_eq!(stats[1]["sum_x"], 21.0);
        assert_eq!(stats[1]["N"], 2.0);
    }

    #[test]
    fn test_mismatched_hypers_and_grid_rejected() {
        let grid = ColumnGrid::categorical(10, 5).unwrap();
        let hypers = ColumnHypers::Continuous(ContinuousHypers::default());
        assert!(ColumnModel::new(hypers, grid).is_err());
    }

    #[test]
    fn test_swap_remove_requires_empty_cluster() {
        let values = array![1.0, 2.0];
        let mut model = continuous_model(values.view()).refit(values.view(), &[0, 1], 2);
        assert!(model.swap_remove_cluster(0).unwrap_err().is_fatal());
        model.remove(0, 1.0).unwrap();
        model.swap_remove_cluster(0).unwrap();
        assert_eq!(model.num_clusters(), 1);
        assert_eq!(model.suffstats()[0]["sum_x"], 2.0);
    }

    #[test]
    fn test_transition_hypers_stays_on_grid() {
        let values = array![0.0, 0.0, 1.0, 1.0, 5.0, 6.0];
        let mut model = continuous_model(values.view()).refit(values.view(), &[0, 0, 0, 0, 1, 1], 2);
        let mut rng = StdRng::seed_from_u64(5);
        let delta = model.transition_hypers(&mut rng).unwrap();
        assert!(delta.is_finite());
        match (model.hypers(), model.grid()) {
            (ColumnHypers::Continuous(h), ColumnGrid::Continuous { r, nu, s, mu }) => {
                assert!(r.values().contains(&h.r));
                assert!(nu.values().contains(&h.nu));
                assert!(s.values().contains(&h.s));
                assert!(mu.values().contains(&h.mu));
            }
            _ => panic!("Expected continuous column"),
        }
    }

    #[test]
    fn test_categorical_hypers_from_grid() {
        let grid = ColumnGrid::categorical(20, 7).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let hypers =
            ColumnHypers::from_grid(&grid, ColumnType::Categorical { cardinality: 4 }, &mut rng)
                .unwrap();
        let map = hypers.to_map();
        assert_eq!(map["K"], 4.0);
        assert!(map["dirichlet_alpha"] >= 1.0 && map["dirichlet_alpha"] <= 20.0);
        assert!(ColumnHypers::from_grid(&grid, ColumnType::Continuous, &mut rng).is_err());
    }
}
