//! Plain-data copies of the latent state.
//!
//! [`LatentState`] is what a caller hands in to rebuild a chain;
//! [`StateSnapshot`] is what a state hands out. A snapshot converts back to a
//! `LatentState` so a chain can be restarted from it.

/**
 * File: /src/snapshot.rs
 * Created Date: Tuesday, March 10th 2026
 * Author: Zihan
 * -----
 * Last Modified: Tuesday, 10th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-10		Zihan	Serializable latent state and text dump
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::column::ColumnHypers;

/// Explicit latent state used to construct a [`crate::State`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentState {
    pub column_crp_alpha: f64,
    /// View label of every column, dense in `0..n_views`
    pub column_partition: Vec<usize>,
    /// Per view, the cluster label of every row, dense in `0..n_clusters`
    pub row_partitions: Vec<Vec<usize>>,
    pub row_crp_alphas: Vec<f64>,
    pub column_hypers: Vec<ColumnHypers>,
}

/// One view of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    pub columns: Vec<usize>,
    pub row_crp_alpha: f64,
    pub row_assignments: Vec<usize>,
    pub cluster_counts: Vec<usize>,
    /// Per member column (in `columns` order), per cluster
    pub suffstats: Vec<Vec<BTreeMap<String, f64>>>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub num_rows: usize,
    pub num_cols: usize,
    pub column_crp_alpha: f64,
    /// Dense view index of every column
    pub column_assignments: Vec<usize>,
    pub column_hypers: Vec<ColumnHypers>,
    pub views: Vec<ViewSnapshot>,
    pub dependencies: BTreeMap<usize, BTreeSet<usize>>,
    pub independencies: BTreeMap<usize, BTreeSet<usize>>,
    pub marginal_logp: f64,
}

impl StateSnapshot {
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Latent state that rebuilds this chain position
    pub fn to_latent(&self) -> LatentState {
        LatentState {
            column_crp_alpha: self.column_crp_alpha,
            column_partition: self.column_assignments.clone(),
            row_partitions: self.views.iter().map(|v| v.row_assignments.clone()).collect(),
            row_crp_alphas: self.views.iter().map(|v| v.row_crp_alpha).collect(),
            column_hypers: self.column_hypers.clone(),
        }
    }
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "State: {} rows x {} columns in {} views",
            self.num_rows,
            self.num_cols,
            self.views.len()
        )?;
        writeln!(
            f,
            "Column CRP alpha: {:.4}, marginal logp: {:.4}",
            self.column_crp_alpha, self.marginal_logp
        )?;
        writeln!(f, "Column assignments: {:?}", self.column_assignments)?;
        for (i, view) in self.views.iter().enumerate() {
            writeln!(
                f,
                "  View #{}: columns {:?}, alpha {:.4}, {} clusters {:?}, score {:.4}",
                i,
                view.columns,
                view.row_crp_alpha,
                view.cluster_counts.len(),
                view.cluster_counts,
                view.score
            )?;
            for &col in view.columns.iter() {
                let hypers = self.column_hypers[col]
                    .to_map()
                    .iter()
                    .map(|(name, value)| format!("{}={:.4}", name, value))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "    column {}: {}", col, hypers)?;
            }
        }
        if !self.dependencies.is_empty() {
            writeln!(f, "Dependencies: {:?}", self.dependencies)?;
        }
        if !self.independencies.is_empty() {
            writeln!(f, "Independencies: {:?}", self.independencies)?;
        }
        Ok(())
    }
}
