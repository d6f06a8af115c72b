//! # Cross-categorization state
//!
//! The top level of the model: a CRP over columns whose clusters are
//! [`View`]s, each with its own CRP over rows. `State` owns the data, the
//! views, the grids and a seeded RNG, and exposes the Gibbs transitions and
//! read-only queries.
//!
//! Views are kept in a `BTreeMap` keyed by a stable [`ViewId`]. Queries that
//! take or return a view *index* use the dense position of the view in id
//! order.
//!
//! ## Example
//!
//! ```
//! use crosscat_core::{ColumnType, State, StateConfig};
//! use ndarray::array;
//!
//! let data = array![[1.0, 0.0], [1.1, 0.0], [5.0, 1.0], [5.2, 1.0]];
//! let types = vec![ColumnType::Continuous, ColumnType::Categorical { cardinality: 2 }];
//! let mut state = State::new(data, types, StateConfig::default().with_seed(3)).unwrap();
//! for _ in 0..10 {
//!     state.transition().unwrap();
//! }
//! assert!(state.get_marginal_logp().is_finite());
//! ```

/**
 * File: /src/state.rs
 * Created Date: Saturday, March 7th 2026
 * Author: Zihan
 * -----
 * Last Modified: Thursday, 12th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-07		Zihan	Column partition and sweep orchestration
 * 2026-03-09		Zihan	Dependency blocks, MH column kernel
 * 2026-03-10		Zihan	Queries, snapshots, posterior draws
 * 2026-03-12		Zihan	Poison the chain after an invariant violation
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, info, warn};
use ndarray::{aview1, Array2};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::{Rng, SeedableRng};
use statrs::function::gamma::ln_gamma;

use crate::column::{ColumnHypers, ColumnModel, ColumnType};
use crate::config::{ColumnKernel, Initialization, StateConfig};
use crate::constraints::ColumnConstraints;
use crate::error::{invalid, violation, CrossCatError, Result};
use crate::grid::{ColumnGrid, HyperGrid};
use crate::numerics::{crp_logp, ensure_finite, sample_log_weights};
use crate::row_partition::{check_alpha, RowPartition};
use crate::snapshot::{LatentState, StateSnapshot, ViewSnapshot};
use crate::view::View;

/// Stable identifier of a view inside one state
pub type ViewId = usize;

/// Everything derived from the inputs before any latent variable is chosen
struct Setup {
    data: Array2<f64>,
    column_types: Vec<ColumnType>,
    column_grids: Vec<ColumnGrid>,
    row_alpha_grid: HyperGrid,
    column_alpha_grid: HyperGrid,
    constraints: ColumnConstraints,
    kernel: ColumnKernel,
    rng: StdRng,
}

/// Structural defects of an explicit latent state are construction errors
fn malformed_latent(err: CrossCatError) -> CrossCatError {
    match err {
        CrossCatError::InvalidArgument(msg) => CrossCatError::Construction(msg),
        other => other,
    }
}

fn construction<T>(msg: impl Into<String>) -> Result<T> {
    Err(CrossCatError::Construction(msg.into()))
}

impl Setup {
    fn new(data: Array2<f64>, column_types: Vec<ColumnType>, config: &StateConfig) -> Result<Self> {
        config.validate()?;
        let (n_rows, n_cols) = data.dim();
        if n_rows == 0 || n_cols == 0 {
            return construction(format!("data must be non-empty, got {}x{}", n_rows, n_cols));
        }
        if column_types.len() != n_cols {
            return construction(format!(
                "{} column types for {} columns",
                column_types.len(),
                n_cols
            ));
        }
        for (col, column_type) in column_types.iter().enumerate() {
            if let ColumnType::Categorical { cardinality: 0 } = column_type {
                return construction(format!("categorical column {} has cardinality 0", col));
            }
            if let Some(row) = data.column(col).iter().position(|&v| !column_type.accepts(v)) {
                return construction(format!(
                    "value {} at row {} is not valid for column {} ({:?})",
                    data[[row, col]],
                    row,
                    col,
                    column_type
                ));
            }
        }

        let constraints =
            ColumnConstraints::new(n_cols, &config.dependencies, &config.independencies)?;

        let row_alpha_grid = match &config.row_crp_alpha_grid {
            Some(values) => HyperGrid::positive(values.clone()),
            None => HyperGrid::crp_alpha(n_rows, config.n_grid),
        }
        .map_err(|e| e.with_context("row_crp_alpha_grid"))?;
        let column_alpha_grid = match &config.column_crp_alpha_grid {
            Some(values) => HyperGrid::positive(values.clone()),
            None => HyperGrid::crp_alpha(n_cols, config.n_grid),
        }
        .map_err(|e| e.with_context("column_crp_alpha_grid"))?;

        let column_grids = column_types
            .iter()
            .enumerate()
            .map(|(col, column_type)| match column_type {
                ColumnType::Continuous => ColumnGrid::continuous(
                    data.column(col),
                    config.n_grid,
                    config.s_grid.as_deref(),
                    config.mu_grid.as_deref(),
                ),
                ColumnType::Categorical { .. } => ColumnGrid::categorical(n_rows, config.n_grid),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            data,
            column_types,
            column_grids,
            row_alpha_grid,
            column_alpha_grid,
            constraints,
            kernel: config.column_kernel,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Seat dependency blocks into views, never joining a view that holds a
    /// column independent of the block. Returns a dense view label per column.
    fn column_labels(&mut self, init: Initialization, alpha: f64) -> Result<Vec<usize>> {
        let mut members: Vec<Vec<usize>> = Vec::new();
        for block in self.constraints.blocks() {
            let allowed: Vec<bool> = members
                .iter()
                .map(|m| self.constraints.allowed(block, m.iter().cloned()))
                .collect();
            let choice = match init {
                Initialization::Apart => None,
                Initialization::Together => allowed.iter().position(|&a| a),
                Initialization::FromThePrior => {
                    let log_weights: Vec<f64> = members
                        .iter()
                        .zip(&allowed)
                        .map(|(m, &ok)| if ok { (m.len() as f64).ln() } else { f64::NEG_INFINITY })
                        .chain(std::iter::once(alpha.ln()))
                        .collect();
                    let k = sample_log_weights(&log_weights, &mut self.rng)?;
                    if k < members.len() {
                        Some(k)
                    } else {
                        None
                    }
                }
            };
            match choice {
                Some(k) => members[k].extend_from_slice(block),
                None => members.push(block.clone()),
            }
        }

        let mut labels = vec![0; self.data.ncols()];
        for (view, cols) in members.iter().enumerate() {
            for &col in cols {
                labels[col] = view;
            }
        }
        Ok(labels)
    }

    fn row_partition(&mut self, init: Initialization) -> Result<RowPartition> {
        let n_rows = self.data.nrows();
        let alpha = self.row_alpha_grid.draw_uniform(&mut self.rng);
        match init {
            Initialization::FromThePrior => RowPartition::from_prior(n_rows, alpha, &mut self.rng),
            Initialization::Together => RowPartition::together(n_rows, alpha),
            Initialization::Apart => RowPartition::apart(n_rows, alpha),
        }
    }
}

/// Refit every column of a block under `view`'s row partition
fn fit_block(
    view: &View,
    templates: &[(usize, ColumnModel)],
    data: &Array2<f64>,
) -> (Vec<(usize, ColumnModel)>, f64) {
    let mut total = 0.0;
    let fitted = templates
        .iter()
        .map(|(col, template)| {
            let (model, score) = view.fit_column_logp(template, data.column(*col));
            total += score;
            (*col, model)
        })
        .collect();
    (fitted, total)
}

/// Cross-categorization chain state
#[derive(Debug, Clone)]
pub struct State {
    data: Array2<f64>,
    column_types: Vec<ColumnType>,
    views: BTreeMap<ViewId, View>,
    next_view_id: ViewId,
    /// Owning view of every column
    column_view: Vec<ViewId>,
    column_crp_alpha: f64,
    column_alpha_grid: HyperGrid,
    row_alpha_grid: HyperGrid,
    constraints: ColumnConstraints,
    kernel: ColumnKernel,
    rng: StdRng,
    /// Set by the first invariant violation; mutation is refused afterwards
    poisoned: Option<CrossCatError>,
}

impl State {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Draw a starting state from the prior (or the configured initialization)
    pub fn new(data: Array2<f64>, column_types: Vec<ColumnType>, config: StateConfig) -> Result<Self> {
        let mut setup = Setup::new(data, column_types, &config)?;

        let column_crp_alpha = setup.column_alpha_grid.draw_uniform(&mut setup.rng);
        let labels = setup.column_labels(config.column_initialization, column_crp_alpha)?;
        let n_views = labels.iter().max().map_or(0, |&m| m + 1);
        let row_partitions = (0..n_views)
            .map(|_| setup.row_partition(config.row_initialization))
            .collect::<Result<Vec<_>>>()?;
        let hypers = (0..setup.column_types.len())
            .map(|col| {
                ColumnHypers::from_grid(
                    &setup.column_grids[col],
                    setup.column_types[col],
                    &mut setup.rng,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Self::assemble(setup, column_crp_alpha, &labels, row_partitions, hypers)
    }

    /// Rebuild a chain from an explicit latent state
    pub fn from_latent(
        data: Array2<f64>,
        column_types: Vec<ColumnType>,
        latent: LatentState,
        config: StateConfig,
    ) -> Result<Self> {
        let setup = Setup::new(data, column_types, &config)?;
        let (n_rows, n_cols) = setup.data.dim();

        check_alpha(latent.column_crp_alpha)?;
        if latent.column_partition.len() != n_cols {
            return construction(format!(
                "column partition covers {} columns, data has {}",
                latent.column_partition.len(),
                n_cols
            ));
        }
        let n_views = latent.row_partitions.len();
        if latent.row_crp_alphas.len() != n_views {
            return construction(format!(
                "{} row alphas for {} views",
                latent.row_crp_alphas.len(),
                n_views
            ));
        }
        let mut used = vec![false; n_views];
        for (col, &label) in latent.column_partition.iter().enumerate() {
            match used.get_mut(label) {
                Some(flag) => *flag = true,
                None => return construction(format!("column {} assigned to missing view {}", col, label)),
            }
        }
        if let Some(view) = used.iter().position(|&u| !u) {
            return construction(format!("view {} has no columns", view));
        }
        if let Some(msg) = setup.constraints.first_violation(&latent.column_partition) {
            return construction(msg);
        }

        let mut row_partitions = Vec::with_capacity(n_views);
        for (view, (labels, &alpha)) in latent
            .row_partitions
            .iter()
            .zip(&latent.row_crp_alphas)
            .enumerate()
        {
            if labels.len() != n_rows {
                return construction(format!(
                    "row partition of view {} covers {} rows, data has {}",
                    view,
                    labels.len(),
                    n_rows
                ));
            }
            let n_clusters = labels.iter().max().map_or(0, |&m| m + 1);
            let mut clusters = vec![Vec::new(); n_clusters];
            for (row, &k) in labels.iter().enumerate() {
                clusters[k].push(row);
            }
            check_alpha(alpha)?;
            row_partitions.push(
                RowPartition::from_clusters(&clusters, n_rows, alpha)
                    .map_err(|e| malformed_latent(e.with_context(&format!("view {}", view))))?,
            );
        }

        if latent.column_hypers.len() != n_cols {
            return construction(format!(
                "{} column hypers for {} columns",
                latent.column_hypers.len(),
                n_cols
            ));
        }
        for (col, (hypers, column_type)) in latent
            .column_hypers
            .iter()
            .zip(&setup.column_types)
            .enumerate()
        {
            let matches = match (hypers, column_type) {
                (ColumnHypers::Continuous(_), ColumnType::Continuous) => true,
                (ColumnHypers::Categorical(h), ColumnType::Categorical { cardinality }) => {
                    h.cardinality == *cardinality
                }
                _ => false,
            };
            if !matches {
                return construction(format!("hypers of column {} do not match its type", col));
            }
        }

        let labels = latent.column_partition.clone();
        Self::assemble(
            setup,
            latent.column_crp_alpha,
            &labels,
            row_partitions,
            latent.column_hypers,
        )
    }

    fn assemble(
        setup: Setup,
        column_crp_alpha: f64,
        labels: &[usize],
        row_partitions: Vec<RowPartition>,
        hypers: Vec<ColumnHypers>,
    ) -> Result<Self> {
        let mut views: BTreeMap<ViewId, View> = row_partitions
            .into_iter()
            .enumerate()
            .map(|(id, partition)| (id, View::new(partition)))
            .collect();
        for (col, (hypers, grid)) in hypers.into_iter().zip(setup.column_grids).enumerate() {
            let template = ColumnModel::new(hypers, grid)
                .map_err(|e| malformed_latent(e.with_context(&format!("column {}", col))))?;
            let view = match views.get_mut(&labels[col]) {
                Some(view) => view,
                None => return construction(format!("column {} has no view", col)),
            };
            let model = view.fit_column(&template, setup.data.column(col));
            view.insert_column(col, model)?;
        }

        let state = Self {
            next_view_id: views.len(),
            views,
            column_view: labels.to_vec(),
            column_crp_alpha,
            column_alpha_grid: setup.column_alpha_grid,
            row_alpha_grid: setup.row_alpha_grid,
            constraints: setup.constraints,
            kernel: setup.kernel,
            rng: setup.rng,
            data: setup.data,
            column_types: setup.column_types,
            poisoned: None,
        };
        ensure_finite(state.get_marginal_logp(), "initial marginal logp")?;
        info!(
            "Initialized state: {} rows, {} columns, {} views, score {:.4}",
            state.num_rows(),
            state.num_cols(),
            state.num_views(),
            state.get_marginal_logp()
        );
        Ok(state)
    }

    // ========================================================================
    // Guards
    // ========================================================================

    /// Run a mutation unless the chain is poisoned; poison it on a fatal error
    fn mutate<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        let result = op(self);
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!("State poisoned: {}", err);
                self.poisoned = Some(err.clone());
            }
        }
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn check_view_index(&self, view_idx: usize) -> Result<ViewId> {
        match self.views.keys().nth(view_idx) {
            Some(&id) => Ok(id),
            None => invalid(format!(
                "view {} out of range ({} views)",
                view_idx,
                self.views.len()
            )),
        }
    }

    fn check_columns(&self, cols: &[usize]) -> Result<()> {
        match cols.iter().find(|&&c| c >= self.num_cols()) {
            Some(bad) => invalid(format!("column {} out of range ({} columns)", bad, self.num_cols())),
            None => Ok(()),
        }
    }

    fn check_rows(&self, rows: &[usize]) -> Result<()> {
        match rows.iter().find(|&&r| r >= self.num_rows()) {
            Some(bad) => invalid(format!("row {} out of range ({} rows)", bad, self.num_rows())),
            None => Ok(()),
        }
    }

    /// A full-width row: one accepted value per column
    fn check_row_values(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.num_cols() {
            return invalid(format!(
                "row has {} values, state has {} columns",
                values.len(),
                self.num_cols()
            ));
        }
        for (col, (&value, column_type)) in values.iter().zip(&self.column_types).enumerate() {
            if !column_type.accepts(value) {
                return invalid(format!(
                    "value {} is not valid for column {} ({:?})",
                    value, col, column_type
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Column partition transitions
    // ========================================================================

    /// Reassign every column (block) to a view
    pub fn transition_views(&mut self) -> Result<f64> {
        self.mutate(|state| state.transition_blocks(None))
    }

    /// Reassign the blocks containing `which_cols` (all columns for `None`)
    pub fn transition_features(&mut self, which_cols: Option<&[usize]>) -> Result<f64> {
        if let Some(cols) = which_cols {
            self.check_columns(cols)?;
        }
        self.mutate(|state| state.transition_blocks(which_cols))
    }

    fn transition_blocks(&mut self, which_cols: Option<&[usize]>) -> Result<f64> {
        let before = self.get_marginal_logp();
        let mut blocks: Vec<Vec<usize>> = self
            .constraints
            .blocks()
            .iter()
            .filter(|block| which_cols.map_or(true, |cols| block.iter().any(|c| cols.contains(c))))
            .cloned()
            .collect();
        blocks.shuffle(&mut self.rng);
        for block in blocks.iter() {
            self.transition_block(block)?;
        }
        ensure_finite(self.get_marginal_logp() - before, "column transition score delta")
    }

    /// Move one dependency block: detach it, score every view it may join
    /// plus a new one, draw a destination and attach refit models there
    fn transition_block(&mut self, block: &[usize]) -> Result<()> {
        let source = self.column_view[block[0]];
        let source_view = match self.views.get_mut(&source) {
            Some(view) => view,
            None => return violation(format!("column {} points at missing view {}", block[0], source)),
        };
        let mut templates = Vec::with_capacity(block.len());
        for &col in block {
            templates.push((col, source_view.remove_column(col)?));
        }

        // A view emptied by the move is the new-view candidate, otherwise the
        // candidate's rows are drawn from the prior
        let dissolved = source_view.is_empty();
        let candidate = if dissolved {
            match self.views.remove(&source) {
                Some(view) => view,
                None => return violation(format!("view {} vanished", source)),
            }
        } else {
            let alpha = self.row_alpha_grid.draw_uniform(&mut self.rng);
            View::new(RowPartition::from_prior(self.num_rows(), alpha, &mut self.rng)?)
        };

        let ids: Vec<ViewId> = self.views.keys().cloned().collect();
        let m = block.len() as f64;
        let prior: Vec<f64> = self
            .views
            .values()
            .map(|view| {
                if self.constraints.allowed(block, view.column_indices()) {
                    let k = view.num_columns() as f64;
                    ln_gamma(k + m) - ln_gamma(k)
                } else {
                    f64::NEG_INFINITY
                }
            })
            .chain(std::iter::once(self.column_crp_alpha.ln() + ln_gamma(m)))
            .collect();

        let n_existing = ids.len();
        let current = if dissolved {
            n_existing
        } else {
            match ids.iter().position(|&id| id == source) {
                Some(i) => i,
                None => return violation(format!("view {} vanished", source)),
            }
        };

        let choice = {
            let data = &self.data;
            let targets: Vec<&View> = ids
                .iter()
                .map(|id| &self.views[id])
                .chain(std::iter::once(&candidate))
                .collect();
            let target = |i: usize| targets[i];
            match self.kernel {
                ColumnKernel::Gibbs => {
                    let log_weights: Vec<f64> = prior
                        .iter()
                        .enumerate()
                        .map(|(i, &p)| {
                            if p == f64::NEG_INFINITY {
                                p
                            } else {
                                p + fit_block(target(i), &templates, data).1
                            }
                        })
                        .collect();
                    sample_log_weights(&log_weights, &mut self.rng)?
                }
                ColumnKernel::MetropolisHastings => {
                    let proposal = sample_log_weights(&prior, &mut self.rng)?;
                    if proposal == current {
                        current
                    } else {
                        let log_ratio = fit_block(target(proposal), &templates, data).1
                            - fit_block(target(current), &templates, data).1;
                        if log_ratio.is_nan() {
                            return violation("column MH acceptance ratio is NaN");
                        }
                        if log_ratio >= 0.0 || self.rng.gen::<f64>().ln() < log_ratio {
                            proposal
                        } else {
                            current
                        }
                    }
                }
            }
        };

        let destination = if choice < n_existing {
            if dissolved {
                debug!("View {} dissolved", source);
            }
            ids[choice]
        } else {
            let id = if dissolved {
                source
            } else {
                let id = self.next_view_id;
                self.next_view_id += 1;
                debug!("Opened view {} for columns {:?}", id, block);
                id
            };
            self.views.insert(id, candidate);
            id
        };

        let view = match self.views.get_mut(&destination) {
            Some(view) => view,
            None => return violation(format!("destination view {} missing", destination)),
        };
        let (fitted, _) = fit_block(view, &templates, &self.data);
        for (col, model) in fitted {
            view.insert_column(col, model)?;
            self.column_view[col] = destination;
        }
        Ok(())
    }

    /// Grid resample of the column CRP alpha
    pub fn transition_column_crp_alpha(&mut self) -> Result<f64> {
        self.mutate(|state| {
            let counts = state.get_column_partition_counts();
            let before = crp_logp(&counts, state.column_crp_alpha);
            let (alpha, score) = state
                .column_alpha_grid
                .resample(|a| crp_logp(&counts, a), &mut state.rng)?;
            state.column_crp_alpha = alpha;
            debug!("Column CRP alpha resampled to {:.4}", alpha);
            Ok(score - before)
        })
    }

    // ========================================================================
    // Row partition transitions
    // ========================================================================

    /// Gibbs sweep over the rows of one view
    pub fn transition_view_i(&mut self, view_idx: usize) -> Result<f64> {
        let id = self.check_view_index(view_idx)?;
        self.mutate(|state| match state.views.get_mut(&id) {
            Some(view) => view.transition_rows(&state.data, None, &mut state.rng),
            None => violation(format!("view {} missing", id)),
        })
    }

    /// Gibbs sweep over the rows of every view
    pub fn transition_views_zs(&mut self) -> Result<f64> {
        self.transition_row_partition_assignments(None)
    }

    /// Gibbs moves for `which_rows` (all rows for `None`) in every view
    pub fn transition_row_partition_assignments(&mut self, which_rows: Option<&[usize]>) -> Result<f64> {
        if let Some(rows) = which_rows {
            self.check_rows(rows)?;
        }
        self.mutate(|state| {
            let mut delta = 0.0;
            for view in state.views.values_mut() {
                delta += view.transition_rows(&state.data, which_rows, &mut state.rng)?;
            }
            Ok(delta)
        })
    }

    /// Resample the row CRP alpha of every view
    pub fn transition_views_row_partition_hyper(&mut self) -> Result<f64> {
        self.transition_row_partition_hyperparameters(None)
    }

    /// Resample the row CRP alpha of the views holding `which_cols`
    pub fn transition_row_partition_hyperparameters(&mut self, which_cols: Option<&[usize]>) -> Result<f64> {
        if let Some(cols) = which_cols {
            self.check_columns(cols)?;
        }
        self.mutate(|state| {
            let targets: BTreeSet<ViewId> = match which_cols {
                Some(cols) => cols.iter().map(|&c| state.column_view[c]).collect(),
                None => state.views.keys().cloned().collect(),
            };
            let mut delta = 0.0;
            for id in targets {
                if let Some(view) = state.views.get_mut(&id) {
                    delta += view.transition_row_partition_hyper(&state.row_alpha_grid, &mut state.rng)?;
                }
            }
            Ok(delta)
        })
    }

    // ========================================================================
    // Column hyperparameter transitions
    // ========================================================================

    /// Resample the hypers of every column
    pub fn transition_views_col_hypers(&mut self) -> Result<f64> {
        self.transition_column_hyperparameters(None)
    }

    /// Resample the hypers of `which_cols` (all columns for `None`)
    pub fn transition_column_hyperparameters(&mut self, which_cols: Option<&[usize]>) -> Result<f64> {
        if let Some(cols) = which_cols {
            self.check_columns(cols)?;
        }
        self.mutate(|state| {
            let mut delta = 0.0;
            for view in state.views.values_mut() {
                delta += view.transition_column_hypers(which_cols, &mut state.rng)?;
            }
            Ok(delta)
        })
    }

    /// One full sweep: views, rows, row alphas, column hypers, column alpha
    pub fn transition(&mut self) -> Result<f64> {
        let mut delta = self.transition_views()?;
        delta += self.transition_views_zs()?;
        delta += self.transition_views_row_partition_hyper()?;
        delta += self.transition_views_col_hypers()?;
        delta += self.transition_column_crp_alpha()?;
        debug!(
            "Sweep complete: {} views, score {:.4} (delta {:.4})",
            self.num_views(),
            self.get_marginal_logp(),
            delta
        );
        Ok(delta)
    }

    // ========================================================================
    // Rows arriving after construction
    // ========================================================================

    /// Append a row. With `matching_row` the new row joins that row's cluster
    /// in every view; otherwise each view draws its cluster. Returns the
    /// change in marginal logp.
    pub fn insert_row(&mut self, values: &[f64], matching_row: Option<usize>) -> Result<f64> {
        self.check_row_values(values)?;
        if let Some(row) = matching_row {
            self.check_rows(&[row])?;
        }
        self.mutate(|state| {
            let before = state.get_marginal_logp();
            for view in state.views.values_mut() {
                view.insert_row(values, matching_row, &mut state.rng)?;
            }
            if let Err(e) = state.data.push_row(aview1(values)) {
                return violation(format!("data matrix rejected the new row: {}", e));
            }
            debug!("Inserted row {}", state.num_rows() - 1);
            ensure_finite(state.get_marginal_logp() - before, "row insertion score delta")
        })
    }

    /// Log predictive probability of a full-width row. Read-only.
    pub fn calc_row_predictive_logp(&self, values: &[f64]) -> Result<f64> {
        self.check_row_values(values)?;
        let mut total = 0.0;
        for view in self.views.values() {
            total += view.calc_row_predictive_logp(values)?;
        }
        Ok(total)
    }

    // ========================================================================
    // Scores
    // ========================================================================

    /// Sum of every view's cluster marginal log likelihoods
    pub fn get_data_score(&self) -> f64 {
        self.views.values().map(|v| v.score()).sum()
    }

    pub fn get_column_crp_score(&self) -> f64 {
        crp_logp(&self.get_column_partition_counts(), self.column_crp_alpha)
    }

    /// Data score plus the row CRP scores of every view plus the column CRP score
    pub fn get_marginal_logp(&self) -> f64 {
        self.views
            .values()
            .map(|v| v.score() + v.crp_score())
            .sum::<f64>()
            + self.get_column_crp_score()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn num_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn get_column_crp_alpha(&self) -> f64 {
        self.column_crp_alpha
    }

    fn view_at(&self, view_idx: usize) -> Result<&View> {
        let id = self.check_view_index(view_idx)?;
        match self.views.get(&id) {
            Some(view) => Ok(view),
            None => violation(format!("view {} missing", id)),
        }
    }

    pub fn get_row_partition_model_hypers_i(&self, view_idx: usize) -> Result<BTreeMap<String, f64>> {
        let view = self.view_at(view_idx)?;
        let mut hypers = BTreeMap::new();
        hypers.insert("alpha".to_string(), view.row_crp_alpha());
        Ok(hypers)
    }

    pub fn get_row_partition_model_counts_i(&self, view_idx: usize) -> Result<Vec<usize>> {
        Ok(self.view_at(view_idx)?.partition().counts().to_vec())
    }

    /// Per member column (ascending), per cluster statistics of one view
    pub fn get_column_component_suffstats_i(
        &self,
        view_idx: usize,
    ) -> Result<Vec<Vec<BTreeMap<String, f64>>>> {
        let view = self.view_at(view_idx)?;
        view.column_indices()
            .into_iter()
            .map(|col| view.column_suffstats(col))
            .collect()
    }

    pub fn get_column_hypers(&self) -> Result<Vec<ColumnHypers>> {
        (0..self.num_cols())
            .map(|col| Ok(self.column_model(col)?.hypers()))
            .collect()
    }

    fn column_model(&self, col: usize) -> Result<&ColumnModel> {
        match self.views.get(&self.column_view[col]) {
            Some(view) => view.column(col),
            None => violation(format!("column {} points at a missing view", col)),
        }
    }

    pub fn get_column_partition_hypers(&self) -> BTreeMap<String, f64> {
        let mut hypers = BTreeMap::new();
        hypers.insert("alpha".to_string(), self.column_crp_alpha);
        hypers
    }

    /// Dense view index of every column.
    ///
    /// Read off the views, which own their columns; every column sits in
    /// exactly one view (`check_invariants` verifies this against `column_view`).
    pub fn get_column_partition_assignments(&self) -> Vec<usize> {
        let mut labels = vec![0; self.num_cols()];
        for (i, view) in self.views.values().enumerate() {
            for col in view.column_indices() {
                if let Some(label) = labels.get_mut(col) {
                    *label = i;
                }
            }
        }
        labels
    }

    /// Number of columns in each view, in view index order
    pub fn get_column_partition_counts(&self) -> Vec<usize> {
        self.views.values().map(|v| v.num_columns()).collect()
    }

    pub fn get_column_dependencies(&self) -> BTreeMap<usize, BTreeSet<usize>> {
        self.constraints.dependencies().clone()
    }

    pub fn get_column_independencies(&self) -> BTreeMap<usize, BTreeSet<usize>> {
        self.constraints.independencies().clone()
    }

    /// Row to cluster assignments, one vector per view
    pub fn get_x_d(&self) -> Vec<Vec<usize>> {
        self.views
            .values()
            .map(|v| v.partition().assignments().to_vec())
            .collect()
    }

    /// View index to its member columns
    pub fn get_column_groups(&self) -> BTreeMap<usize, Vec<usize>> {
        self.views
            .values()
            .enumerate()
            .map(|(i, v)| (i, v.column_indices()))
            .collect()
    }

    // ========================================================================
    // Draws
    // ========================================================================

    /// Posterior-predictive draw of every cell of `row`, from a dedicated RNG
    /// seeded with `seed`. The state's own RNG is untouched.
    pub fn get_draw(&self, row: usize, seed: u64) -> Result<Vec<f64>> {
        self.check_rows(&[row])?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut values = vec![0.0; self.num_cols()];
        for view in self.views.values() {
            for (col, value) in view.draw_row(row, &mut rng)? {
                values[col] = value;
            }
        }
        Ok(values)
    }

    /// Posterior-predictive draw of every cell of `col`
    pub fn get_column_draw(&self, col: usize, seed: u64) -> Result<Vec<f64>> {
        self.check_columns(&[col])?;
        let mut rng = StdRng::seed_from_u64(seed);
        match self.views.get(&self.column_view[col]) {
            Some(view) => view.draw_column(col, &mut rng),
            None => violation(format!("column {} points at a missing view", col)),
        }
    }

    /// Uniform draw in [0, 1) from the state's RNG
    pub fn draw_rand_u(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Integer draw from the state's RNG, handy for seeding derived chains
    pub fn draw_rand_i(&mut self) -> u32 {
        self.rng.gen::<u32>()
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Recompute everything derivable from scratch and compare
    pub fn check_invariants(&self) -> Result<()> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        check_alpha(self.column_crp_alpha)
            .or_else(|_| violation(format!("column CRP alpha {} is not positive", self.column_crp_alpha)))?;

        let mut seen = vec![false; self.num_cols()];
        for (&id, view) in self.views.iter() {
            if view.is_empty() {
                return violation(format!("view {} has no columns", id));
            }
            if view.num_rows() != self.num_rows() {
                return violation(format!(
                    "view {} holds {} rows, data has {}",
                    id,
                    view.num_rows(),
                    self.num_rows()
                ));
            }
            if !(view.row_crp_alpha() > 0.0) {
                return violation(format!("view {} has row alpha {}", id, view.row_crp_alpha()));
            }
            for col in view.column_indices() {
                if self.column_view.get(col) != Some(&id) {
                    return violation(format!("column {} is held by view {} but mapped elsewhere", col, id));
                }
                seen[col] = true;
            }
            view.check_consistency(&self.data)?;
        }
        if let Some(col) = seen.iter().position(|&s| !s) {
            return violation(format!("column {} is in no view", col));
        }
        if let Some(msg) = self
            .constraints
            .first_violation(&self.get_column_partition_assignments())
        {
            return violation(msg);
        }
        Ok(())
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot(&self) -> Result<StateSnapshot> {
        let views = self
            .views
            .values()
            .map(|view| {
                let columns = view.column_indices();
                let suffstats = columns
                    .iter()
                    .map(|&col| view.column_suffstats(col))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ViewSnapshot {
                    row_crp_alpha: view.row_crp_alpha(),
                    row_assignments: view.partition().assignments().to_vec(),
                    cluster_counts: view.partition().counts().to_vec(),
                    suffstats,
                    score: view.score(),
                    columns,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StateSnapshot {
            num_rows: self.num_rows(),
            num_cols: self.num_cols(),
            column_crp_alpha: self.column_crp_alpha,
            column_assignments: self.get_column_partition_assignments(),
            column_hypers: self.get_column_hypers()?,
            views,
            dependencies: self.get_column_dependencies(),
            independencies: self.get_column_independencies(),
            marginal_logp: self.get_marginal_logp(),
        })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.snapshot() {
            Ok(snapshot) => write!(f, "{}", snapshot),
            Err(e) => write!(f, "State unavailable: {}", e),
        }
    }
}
