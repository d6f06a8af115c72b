//! # View
//!
//! A group of columns that share one row partition. Every member column keeps
//! one component per row cluster; row moves update all of them inside a
//! single `&mut self` call so no caller can see a half-moved row.

/**
 * File: /src/view.rs
 * Created Date: Thursday, March 5th 2026
 * Author: Zihan
 * -----
 * Last Modified: Wednesday, 11th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-05		Zihan	View: columns sharing one row partition
 * 2026-03-09		Zihan	Row insertion and predictive scoring
 * 2026-03-11		Zihan	Consistency check against recomputed statistics
 */

use std::collections::BTreeMap;

use log::debug;
use ndarray::{Array2, ArrayView1};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::Rng;

use crate::column::ColumnModel;
use crate::error::{invalid, violation, Result};
use crate::grid::HyperGrid;
use crate::numerics::{ensure_finite, logsumexp, sample_log_weights};
use crate::row_partition::{Removal, RowPartition};

/// Relative tolerance when comparing incremental and recomputed statistics
const DRIFT_TOL: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct View {
    partition: RowPartition,
    /// 列索引 -> 列模型
    columns: BTreeMap<usize, ColumnModel>,
}

impl View {
    /// A view with no columns yet
    pub fn new(partition: RowPartition) -> Self {
        Self {
            partition,
            columns: BTreeMap::new(),
        }
    }

    pub fn partition(&self) -> &RowPartition {
        &self.partition
    }

    pub fn num_rows(&self) -> usize {
        self.partition.num_rows()
    }

    pub fn num_clusters(&self) -> usize {
        self.partition.num_clusters()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_indices(&self) -> Vec<usize> {
        self.columns.keys().cloned().collect()
    }

    pub fn column(&self, col: usize) -> Result<&ColumnModel> {
        match self.columns.get(&col) {
            Some(model) => Ok(model),
            None => invalid(format!("column {} is not in this view", col)),
        }
    }

    /// `model` refit under this view's row partition
    pub fn fit_column(&self, model: &ColumnModel, values: ArrayView1<f64>) -> ColumnModel {
        model.refit(
            values,
            self.partition.assignments(),
            self.partition.num_clusters(),
        )
    }

    /// Refit `model` under this view's partition and score it
    pub fn fit_column_logp(&self, model: &ColumnModel, values: ArrayView1<f64>) -> (ColumnModel, f64) {
        let fitted = self.fit_column(model, values);
        let score = fitted.score();
        (fitted, score)
    }

    /// Add a column whose components were fit to this view's partition
    pub fn insert_column(&mut self, col: usize, model: ColumnModel) -> Result<()> {
        if model.num_clusters() != self.partition.num_clusters() {
            return violation(format!(
                "column {} fit with {} clusters, view has {}",
                col,
                model.num_clusters(),
                self.partition.num_clusters()
            ));
        }
        if self.columns.insert(col, model).is_some() {
            return violation(format!("column {} inserted twice into one view", col));
        }
        Ok(())
    }

    pub fn remove_column(&mut self, col: usize) -> Result<ColumnModel> {
        match self.columns.remove(&col) {
            Some(model) => Ok(model),
            None => invalid(format!("column {} is not in this view", col)),
        }
    }

    /// Sum of every member column's cluster marginal log likelihoods
    pub fn score(&self) -> f64 {
        self.columns.values().map(|m| m.score()).sum()
    }

    /// CRP log probability of the row partition
    pub fn crp_score(&self) -> f64 {
        self.partition.crp_score()
    }

    fn total_score(&self) -> f64 {
        self.score() + self.crp_score()
    }

    pub fn row_crp_alpha(&self) -> f64 {
        self.partition.alpha()
    }

    // ------------------------------------------------------------------
    // Row transitions
    // ------------------------------------------------------------------

    /// Collapsed Gibbs sweep over `which_rows` (all rows for `None`) in a
    /// random order. Returns the change in view score.
    pub fn transition_rows<R: Rng + ?Sized>(
        &mut self,
        data: &Array2<f64>,
        which_rows: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<f64> {
        let mut rows: Vec<usize> = match which_rows {
            Some(rows) => rows.to_vec(),
            None => (0..self.num_rows()).collect(),
        };
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.num_rows()) {
            return invalid(format!("row {} out of range ({} rows)", bad, self.num_rows()));
        }
        rows.shuffle(rng);

        let before = self.total_score();
        for row in rows {
            self.reassign_row(data, row, rng)?;
        }
        ensure_finite(self.total_score() - before, "row transition score delta")
    }

    fn reassign_row<R: Rng + ?Sized>(
        &mut self,
        data: &Array2<f64>,
        row: usize,
        rng: &mut R,
    ) -> Result<()> {
        let old = self.partition.cluster_of(row)?;
        for (&col, model) in self.columns.iter_mut() {
            model.remove(old, data[[row, col]])?;
        }
        if let Removal::Dissolved { cluster, .. } = self.partition.unassign(row)? {
            for model in self.columns.values_mut() {
                model.swap_remove_cluster(cluster)?;
            }
        }

        let log_weights = self.conditional_log_weights(
            self.partition.gibbs_log_weights(),
            |col| data[[row, col]],
        )?;
        let choice = sample_log_weights(&log_weights, rng)?;
        self.place_row(row, choice, |col| data[[row, col]])
    }

    /// Add the likelihood of a row's values to prior log weights laid out as
    /// [existing clusters..., new cluster]
    fn conditional_log_weights<F>(&self, mut log_weights: Vec<f64>, value_of: F) -> Result<Vec<f64>>
    where
        F: Fn(usize) -> f64,
    {
        let n_clusters = self.partition.num_clusters();
        for (&col, model) in self.columns.iter() {
            let x = value_of(col);
            for (k, w) in log_weights.iter_mut().enumerate() {
                let cluster = if k < n_clusters { Some(k) } else { None };
                *w += model.predictive_logp(cluster, x)?;
            }
        }
        Ok(log_weights)
    }

    /// Seat an unassigned row at `choice` (== num_clusters means a new
    /// cluster) and add its values to every member column
    fn place_row<F>(&mut self, row: usize, choice: usize, value_of: F) -> Result<()>
    where
        F: Fn(usize) -> f64,
    {
        let fresh = choice == self.partition.num_clusters();
        let k = self
            .partition
            .assign(row, if fresh { None } else { Some(choice) })?;
        for (&col, model) in self.columns.iter_mut() {
            if fresh {
                model.push_cluster();
            }
            model.insert(k, value_of(col))?;
        }
        Ok(())
    }

    /// Grid resample of the row CRP alpha
    pub fn transition_row_partition_hyper<R: Rng + ?Sized>(
        &mut self,
        grid: &HyperGrid,
        rng: &mut R,
    ) -> Result<f64> {
        let delta = self.partition.resample_alpha(grid, rng)?;
        debug!("Row CRP alpha resampled to {:.4}", self.partition.alpha());
        Ok(delta)
    }

    /// Grid resample of the hyperparameters of `which_cols` (all members for
    /// `None`). Columns not in this view are skipped.
    pub fn transition_column_hypers<R: Rng + ?Sized>(
        &mut self,
        which_cols: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<f64> {
        let mut delta = 0.0;
        for (col, model) in self.columns.iter_mut() {
            if which_cols.map_or(true, |cols| cols.contains(col)) {
                delta += model.transition_hypers(rng)?;
            }
        }
        ensure_finite(delta, "column hyper score delta")
    }

    // ------------------------------------------------------------------
    // Rows arriving after construction
    // ------------------------------------------------------------------

    /// Append a row given by its full-width `values` (indexed by global
    /// column). With `matching_row` the row joins that row's cluster without
    /// scoring; otherwise its cluster is drawn from the Gibbs conditional.
    /// Returns the change in view score.
    pub fn insert_row<R: Rng + ?Sized>(
        &mut self,
        values: &[f64],
        matching_row: Option<usize>,
        rng: &mut R,
    ) -> Result<f64> {
        let before = self.total_score();
        let choice = match matching_row {
            Some(matching) => self.partition.cluster_of(matching)?,
            None => {
                let log_weights = self
                    .conditional_log_weights(self.partition.gibbs_log_weights(), |col| values[col])?;
                sample_log_weights(&log_weights, rng)?
            }
        };

        let fresh = choice == self.partition.num_clusters();
        let k = self.partition.push_row(if fresh { None } else { Some(choice) })?;
        for (&col, model) in self.columns.iter_mut() {
            if fresh {
                model.push_cluster();
            }
            model.insert(k, values[col])?;
        }
        ensure_finite(self.total_score() - before, "row insertion score delta")
    }

    /// Log probability of a new row's values, marginalizing over which
    /// cluster (existing or new) it would join. Read-only.
    pub fn calc_row_predictive_logp(&self, values: &[f64]) -> Result<f64> {
        let log_weights = self
            .conditional_log_weights(self.partition.predictive_log_weights(), |col| values[col])?;
        ensure_finite(logsumexp(&log_weights), "row predictive logp")
    }

    // ------------------------------------------------------------------
    // Draws and queries
    // ------------------------------------------------------------------

    /// Posterior-predictive values for every member column of `row`
    pub fn draw_row<R: Rng + ?Sized>(&self, row: usize, rng: &mut R) -> Result<Vec<(usize, f64)>> {
        let k = self.partition.cluster_of(row)?;
        self.columns
            .iter()
            .map(|(&col, model)| Ok((col, model.draw(k, rng)?)))
            .collect()
    }

    /// Posterior-predictive values of `col` for every row
    pub fn draw_column<R: Rng + ?Sized>(&self, col: usize, rng: &mut R) -> Result<Vec<f64>> {
        let model = self.column(col)?;
        self.partition
            .assignments()
            .iter()
            .map(|&k| model.draw(k, rng))
            .collect()
    }

    pub fn column_suffstats(&self, col: usize) -> Result<Vec<BTreeMap<String, f64>>> {
        Ok(self.column(col)?.suffstats())
    }

    /// Recompute every column's statistics from `data` and compare with the
    /// incrementally maintained ones
    pub fn check_consistency(&self, data: &Array2<f64>) -> Result<()> {
        let counts = self.partition.counts();
        if counts.iter().any(|&c| c == 0) {
            return violation("view holds an empty row cluster");
        }
        if counts.iter().sum::<usize>() != self.num_rows() {
            return violation(format!(
                "row clusters hold {} rows, view has {}",
                counts.iter().sum::<usize>(),
                self.num_rows()
            ));
        }
        for (&col, model) in self.columns.iter() {
            if model.num_clusters() != counts.len() {
                return violation(format!(
                    "column {} has {} components for {} clusters",
                    col,
                    model.num_clusters(),
                    counts.len()
                ));
            }
            let fresh = self.fit_column(model, data.column(col));
            for (k, (kept, truth)) in model.suffstats().iter().zip(fresh.suffstats()).enumerate() {
                for (name, &expected) in truth.iter() {
                    let actual = kept.get(name).cloned().unwrap_or(0.0);
                    if (actual - expected).abs() > DRIFT_TOL * (1.0 + expected.abs()) {
                        return violation(format!(
                            "column {} cluster {} statistic {} drifted: {} vs {}",
                            col, k, name, actual, expected
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnHypers;
    use crate::component::{CategoricalHypers, ContinuousHypers};
    use crate::grid::ColumnGrid;
    use ndarray::array;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    /// col 0 continuous, col 1 categorical with 2 categories
    fn fixture() -> (Array2<f64>, View) {
        let data = array![
            [1.0, 0.0],
            [1.1, 0.0],
            [5.0, 1.0],
            [5.2, 1.0],
            [0.9, 0.0]
        ];
        let partition =
            RowPartition::from_clusters(&[vec![0, 1, 4], vec![2, 3]], 5, 1.0).unwrap();
        let mut view = View::new(partition);

        let grid = ColumnGrid::continuous(data.column(0), 7, None, None).unwrap();
        let hypers = ColumnHypers::Continuous(ContinuousHypers::new(1.0, 1.0, 0.1, 3.0).unwrap());
        let template = ColumnModel::new(hypers, grid).unwrap();
        let model = view.fit_column(&template, data.column(0));
        view.insert_column(0, model).unwrap();

        let grid = ColumnGrid::categorical(5, 7).unwrap();
        let hypers = ColumnHypers::Categorical(CategoricalHypers::new(1.0, 2).unwrap());
        let template = ColumnModel::new(hypers, grid).unwrap();
        let model = view.fit_column(&template, data.column(1));
        view.insert_column(1, model).unwrap();

        (data, view)
    }

    #[test]
    fn test_fixture_is_consistent() {
        let (data, view) = fixture();
        view.check_consistency(&data).unwrap();
        assert_eq!(view.num_columns(), 2);
        assert!(view.score().is_finite());
    }

    #[test]
    fn test_transition_rows_keeps_consistency() {
        let (data, mut view) = fixture();
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..50 {
            view.transition_rows(&data, None, &mut rng).unwrap();
            view.check_consistency(&data).unwrap();
            assert_eq!(view.partition().counts().iter().sum::<usize>(), 5);
        }
    }

    #[test]
    fn test_transition_subset_of_rows() {
        let (data, mut view) = fixture();
        let mut rng = StdRng::seed_from_u64(2);
        view.transition_rows(&data, Some(&[0, 3][..]), &mut rng).unwrap();
        view.check_consistency(&data).unwrap();
        assert!(view.transition_rows(&data, Some(&[9][..]), &mut rng).is_err());
    }

    #[test]
    fn test_insert_row_fast_path_joins_matching_cluster() {
        let (_, mut view) = fixture();
        let mut rng = StdRng::seed_from_u64(4);
        view.insert_row(&[5.1, 1.0], Some(2), &mut rng).unwrap();
        assert_eq!(view.num_rows(), 6);
        assert_eq!(
            view.partition().cluster_of(5).unwrap(),
            view.partition().cluster_of(2).unwrap()
        );
        assert_eq!(view.partition().counts()[1], 3);
    }

    #[test]
    fn test_insert_row_by_draw_keeps_consistency() {
        let (data, mut view) = fixture();
        let mut rng = StdRng::seed_from_u64(4);
        let delta = view.insert_row(&[1.05, 0.0], None, &mut rng).unwrap();
        assert!(delta.is_finite());

        let mut grown = data.clone();
        grown.push_row(ndarray::aview1(&[1.05, 0.0])).unwrap();
        view.check_consistency(&grown).unwrap();
    }

    #[test]
    fn test_row_predictive_prefers_supported_values() {
        let (_, view) = fixture();
        let inside = view.calc_row_predictive_logp(&[1.0, 0.0]).unwrap();
        let outside = view.calc_row_predictive_logp(&[40.0, 0.0]).unwrap();
        assert!(inside > outside);
    }

    #[test]
    fn test_remove_and_reinsert_round_trip() {
        let (data, mut view) = fixture();
        let before = view.score();
        let cluster = view.partition.cluster_of(1).unwrap();
        for (&col, model) in view.columns.iter_mut() {
            model.remove(cluster, data[[1, col]]).unwrap();
        }
        assert_eq!(view.partition.unassign(1).unwrap(), Removal::Kept(cluster));
        view.place_row(1, cluster, |col| data[[1, col]]).unwrap();
        assert!((view.score() - before).abs() < 1e-10);
        view.check_consistency(&data).unwrap();
    }

    #[test]
    fn test_column_hypers_transition_only_touches_selected() {
        let (_, mut view) = fixture();
        let untouched = view.column(1).unwrap().hypers();
        let mut rng = StdRng::seed_from_u64(8);
        view.transition_column_hypers(Some(&[0][..]), &mut rng).unwrap();
        assert_eq!(view.column(1).unwrap().hypers(), untouched);
    }

    #[test]
    fn test_draws_cover_members() {
        let (_, view) = fixture();
        let mut rng = StdRng::seed_from_u64(8);
        let drawn = view.draw_row(2, &mut rng).unwrap();
        assert_eq!(drawn.len(), 2);
        assert!(drawn[1].1 == 0.0 || drawn[1].1 == 1.0);
        assert_eq!(view.draw_column(0, &mut rng).unwrap().len(), 5);
        assert!(view.draw_column(5, &mut rng).is_err());
    }

    #[test]
    fn test_insert_column_rejects_misfit_model() {
        let (data, mut view) = fixture();
        let model = view.remove_column(0).unwrap();
        let misfit = model.refit(data.column(0), &[0, 0, 0, 0, 0], 1);
        assert!(view.insert_column(0, misfit).is_err());
    }
}
