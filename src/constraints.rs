//! # Column constraints
//!
//! Dependencies force columns into the same view, independencies keep them
//! apart. Dependencies are closed transitively with union-find; each closed
//! group is a *block* that always moves between views as one unit. A
//! constraint set is satisfiable iff no independence pair falls inside one
//! block.

/**
 * File: /src/constraints.rs
 * Created Date: Friday, March 6th 2026
 * Author: Zihan
 * -----
 * Last Modified: Friday, 6th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-06		Zihan	Column dependency / independence constraints
 */

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CrossCatError, Result};

/// Disjoint-set forest with path halving
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // smaller index as root keeps block labels stable
            if ra < rb {
                self.parent[rb] = ra;
            } else {
                self.parent[ra] = rb;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnConstraints {
    dependencies: BTreeMap<usize, BTreeSet<usize>>,
    independencies: BTreeMap<usize, BTreeSet<usize>>,
    /// Blocks ordered by their smallest column
    blocks: Vec<Vec<usize>>,
}

impl ColumnConstraints {
    /// Validate and close the given pairs over `n_cols` columns
    pub fn new(
        n_cols: usize,
        dependencies: &[(usize, usize)],
        independencies: &[(usize, usize)],
    ) -> Result<Self> {
        let check = |kind: &str, &(a, b): &(usize, usize)| -> Result<()> {
            if a >= n_cols || b >= n_cols {
                return Err(CrossCatError::Construction(format!(
                    "{} pair ({}, {}) out of range for {} columns",
                    kind, a, b, n_cols
                )));
            }
            Ok(())
        };

        let mut sets = DisjointSet::new(n_cols);
        let mut dep_map: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for pair in dependencies {
            check("dependency", pair)?;
            let (a, b) = *pair;
            sets.union(a, b);
            if a != b {
                dep_map.entry(a).or_default().insert(b);
                dep_map.entry(b).or_default().insert(a);
            }
        }

        let roots: Vec<usize> = (0..n_cols).map(|c| sets.find(c)).collect();
        let mut ind_map: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for pair in independencies {
            check("independency", pair)?;
            let (a, b) = *pair;
            if roots[a] == roots[b] {
                return Err(CrossCatError::Construction(format!(
                    "columns {} and {} are required both dependent and independent",
                    a, b
                )));
            }
            ind_map.entry(a).or_default().insert(b);
            ind_map.entry(b).or_default().insert(a);
        }

        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (col, &root) in roots.iter().enumerate() {
            by_root.entry(root).or_default().push(col);
        }
        Ok(Self {
            dependencies: dep_map,
            independencies: ind_map,
            blocks: by_root.into_values().collect(),
        })
    }

    pub fn blocks(&self) -> &[Vec<usize>] {
        &self.blocks
    }

    pub fn dependencies(&self) -> &BTreeMap<usize, BTreeSet<usize>> {
        &self.dependencies
    }

    pub fn independencies(&self) -> &BTreeMap<usize, BTreeSet<usize>> {
        &self.independencies
    }

    pub fn is_independent(&self, a: usize, b: usize) -> bool {
        self.independencies
            .get(&a)
            .map_or(false, |s| s.contains(&b))
    }

    /// Whether `block` may join a view holding `members`
    pub fn allowed<I>(&self, block: &[usize], members: I) -> bool
    where
        I: IntoIterator<Item = usize>,
    {
        if self.independencies.is_empty() {
            return true;
        }
        members
            .into_iter()
            .all(|m| block.iter().all(|&c| !self.is_independent(c, m)))
    }

    /// Check a column labelling (column -> view label) against every pair.
    /// Returns a description of the first broken pair.
    pub fn first_violation(&self, labels: &[usize]) -> Option<String> {
        for (&a, deps) in self.dependencies.iter() {
            if let Some(&b) = deps.iter().find(|&&b| labels[a] != labels[b]) {
                return Some(format!("dependent columns {} and {} are in different views", a, b));
            }
        }
        for (&a, inds) in self.independencies.iter() {
            if let Some(&b) = inds.iter().find(|&&b| labels[a] == labels[b]) {
                return Some(format!("independent columns {} and {} share a view", a, b));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pairs_gives_singleton_blocks() {
        let constraints = ColumnConstraints::new(3, &[], &[]).unwrap();
        assert_eq!(constraints.blocks(), &[vec![0], vec![1], vec![2]]);
        assert!(constraints.allowed(&[0], vec![1, 2]));
    }

    #[test]
    fn test_dependencies_close_transitively() {
        let constraints = ColumnConstraints::new(5, &[(0, 2), (2, 4)], &[]).unwrap();
        assert_eq!(constraints.blocks(), &[vec![0, 2, 4], vec![1], vec![3]]);
        // direct pairs only
        let direct: Vec<usize> = constraints.dependencies()[&0].iter().cloned().collect();
        assert_eq!(direct, vec![2]);
        let direct: Vec<usize> = constraints.dependencies()[&2].iter().cloned().collect();
        assert_eq!(direct, vec![0, 4]);
    }

    #[test]
    fn test_unsatisfiable_sets_rejected() {
        // 0~1~2 but 0 !~ 2
        let err = ColumnConstraints::new(3, &[(0, 1), (1, 2)], &[(0, 2)]).unwrap_err();
        assert!(matches!(err, CrossCatError::Construction(_)));
        // a column independent of itself
        assert!(ColumnConstraints::new(2, &[], &[(1, 1)]).is_err());
        assert!(ColumnConstraints::new(2, &[(0, 5)], &[]).is_err());
    }

    #[test]
    fn test_allowed_masks_independent_members() {
        let constraints = ColumnConstraints::new(4, &[(0, 1)], &[(1, 3)]).unwrap();
        assert_eq!(constraints.blocks()[0], vec![0, 1]);
        assert!(!constraints.allowed(&constraints.blocks()[0], vec![3]));
        assert!(constraints.allowed(&constraints.blocks()[0], vec![2]));
        assert!(constraints.is_independent(3, 1));
        assert!(constraints.independencies()[&3].contains(&1));
    }

    #[test]
    fn test_first_violation() {
        let constraints = ColumnConstraints::new(3, &[(0, 1)], &[(0, 2)]).unwrap();
        assert!(constraints.first_violation(&[0, 0, 1]).is_none());
        assert!(constraints.first_violation(&[0, 1, 1]).is_some());
        assert!(constraints.first_violation(&[0, 0, 0]).is_some());
    }
}
