//! # Row partition
//!
//! A CRP(alpha) clustering of the rows of one view. Clusters are dense
//! indices `0..num_clusters`; when a cluster empties, the last cluster takes
//! its index and the caller is told so it can move its per-cluster data the
//! same way.

/**
 * File: /src/row_partition.rs
 * Created Date: Wednesday, March 4th 2026
 * Author: Zihan
 * -----
 * Last Modified: Thursday, 5th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-04		Zihan	CRP row partition local to one view
 * 2026-03-05		Zihan	Grid resampling of the row concentration
 */

use ndarray_rand::rand::Rng;

use crate::error::{invalid, violation, Result};
use crate::grid::HyperGrid;
use crate::numerics::crp_logp;

const UNASSIGNED: usize = usize::MAX;

/// Outcome of taking a row out of its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The cluster still has other rows
    Kept(usize),
    /// The cluster emptied and was dissolved. If `moved_from` is set, the
    /// cluster that used to be last now lives at index `cluster`.
    Dissolved {
        cluster: usize,
        moved_from: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowPartition {
    assignments: Vec<usize>,
    counts: Vec<usize>,
    alpha: f64,
}

pub(crate) fn check_alpha(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha.is_finite() {
        Ok(())
    } else {
        invalid(format!("CRP alpha must be strictly positive, got {}", alpha))
    }
}

impl RowPartition {
    /// Sequential CRP seating of `n_rows` rows
    pub fn from_prior<R: Rng + ?Sized>(n_rows: usize, alpha: f64, rng: &mut R) -> Result<Self> {
        check_alpha(alpha)?;
        let mut partition = Self {
            assignments: Vec::with_capacity(n_rows),
            counts: Vec::new(),
            alpha,
        };
        for seated in 0..n_rows {
            let u: f64 = rng.gen::<f64>() * (seated as f64 + alpha);
            let mut cumulative = 0.0;
            let mut choice = None;
            for (k, &count) in partition.counts.iter().enumerate() {
                cumulative += count as f64;
                if u < cumulative {
                    choice = Some(k);
                    break;
                }
            }
            partition.push_row(choice)?;
        }
        Ok(partition)
    }

    /// Every row in one cluster
    pub fn together(n_rows: usize, alpha: f64) -> Result<Self> {
        check_alpha(alpha)?;
        let counts = if n_rows > 0 { vec![n_rows] } else { Vec::new() };
        Ok(Self {
            assignments: vec![0; n_rows],
            counts,
            alpha,
        })
    }

    /// Every row in its own cluster
    pub fn apart(n_rows: usize, alpha: f64) -> Result<Self> {
        check_alpha(alpha)?;
        Ok(Self {
            assignments: (0..n_rows).collect(),
            counts: vec![1; n_rows],
            alpha,
        })
    }

    /// Build from explicit clusters, which must cover `0..n_rows` exactly once
    pub fn from_clusters(clusters: &[Vec<usize>], n_rows: usize, alpha: f64) -> Result<Self> {
        check_alpha(alpha)?;
        let mut assignments = vec![UNASSIGNED; n_rows];
        let mut counts = Vec::with_capacity(clusters.len());
        for (k, rows) in clusters.iter().enumerate() {
            if rows.is_empty() {
                return invalid(format!("row cluster {} is empty", k));
            }
            for &row in rows {
                match assignments.get_mut(row) {
                    Some(slot) if *slot == UNASSIGNED => *slot = k,
                    Some(_) => return invalid(format!("row {} appears in two clusters", row)),
                    None => return invalid(format!("row {} out of range ({} rows)", row, n_rows)),
                }
            }
            counts.push(rows.len());
        }
        if let Some(row) = assignments.iter().position(|&a| a == UNASSIGNED) {
            return invalid(format!("row {} is not in any cluster", row));
        }
        Ok(Self {
            assignments,
            counts,
            alpha,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        check_alpha(alpha)?;
        self.alpha = alpha;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.assignments.len()
    }

    pub fn num_clusters(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn cluster_of(&self, row: usize) -> Result<usize> {
        match self.assignments.get(row) {
            Some(&k) if k != UNASSIGNED => Ok(k),
            Some(_) => violation(format!("row {} is not assigned", row)),
            None => invalid(format!("row {} out of range ({} rows)", row, self.num_rows())),
        }
    }

    /// Put an unassigned row into `cluster`, or into a new singleton for `None`.
    /// Returns the cluster the row landed in.
    pub fn assign(&mut self, row: usize, cluster: Option<usize>) -> Result<usize> {
        match self.assignments.get(row) {
            Some(&UNASSIGNED) => {}
            Some(&k) => return violation(format!("row {} already in cluster {}", row, k)),
            None => return invalid(format!("row {} out of range ({} rows)", row, self.num_rows())),
        }
        let k = self.seat(cluster)?;
        self.assignments[row] = k;
        Ok(k)
    }

    /// Append a new row, seated like [`RowPartition::assign`]
    pub fn push_row(&mut self, cluster: Option<usize>) -> Result<usize> {
        let k = self.seat(cluster)?;
        self.assignments.push(k);
        Ok(k)
    }

    fn seat(&mut self, cluster: Option<usize>) -> Result<usize> {
        match cluster {
            Some(k) if k < self.counts.len() => {
                self.counts[k] += 1;
                Ok(k)
            }
            Some(k) => invalid(format!(
                "cluster {} out of range ({} clusters)",
                k,
                self.counts.len()
            )),
            None => {
                self.counts.push(1);
                Ok(self.counts.len() - 1)
            }
        }
    }

    /// Take a row out of its cluster, dissolving the cluster if it empties
    pub fn unassign(&mut self, row: usize) -> Result<Removal> {
        let k = self.cluster_of(row)?;
        self.assignments[row] = UNASSIGNED;
        self.counts[k] -= 1;
        if self.counts[k] > 0 {
            return Ok(Removal::Kept(k));
        }

        let last = self.counts.len() - 1;
        self.counts.swap_remove(k);
        if k == last {
            return Ok(Removal::Dissolved {
                cluster: k,
                moved_from: None,
            });
        }
        for a in self.assignments.iter_mut() {
            if *a == last {
                *a = k;
            }
        }
        Ok(Removal::Dissolved {
            cluster: k,
            moved_from: Some(last),
        })
    }

    /// CRP log probability of the current partition under `alpha`
    pub fn crp_logp_with(&self, alpha: f64) -> f64 {
        crp_logp(&self.counts, alpha)
    }

    pub fn crp_score(&self) -> f64 {
        self.crp_logp_with(self.alpha)
    }

    /// Unnormalized Gibbs prior weights: ln n_k per existing cluster, then ln alpha
    pub fn gibbs_log_weights(&self) -> Vec<f64> {
        self.counts
            .iter()
            .map(|&n| (n as f64).ln())
            .chain(std::iter::once(self.alpha.ln()))
            .collect()
    }

    /// Normalized CRP predictive weights for one more row:
    /// ln(n_k / (N + alpha)) per cluster, then ln(alpha / (N + alpha))
    pub fn predictive_log_weights(&self) -> Vec<f64> {
        let seated: usize = self.counts.iter().sum();
        let log_norm = (seated as f64 + self.alpha).ln();
        self.gibbs_log_weights()
            .into_iter()
            .map(|w| w - log_norm)
            .collect()
    }

    /// Grid Gibbs update of alpha. Returns the change in the CRP score.
    pub fn resample_alpha<R: Rng + ?Sized>(&mut self, grid: &HyperGrid, rng: &mut R) -> Result<f64> {
        let before = self.crp_score();
        let (alpha, score) = grid.resample(|a| self.crp_logp_with(a), rng)?;
        self.set_alpha(alpha)?;
        Ok(score - before)
    }
}
