//! Cross-categorization inference core.
//!
//! Columns of a table are clustered into views by a CRP, and within each view
//! rows are clustered by another CRP. Inference is collapsed Gibbs sampling
//! over both levels with conjugate components and grid-sampled
//! hyperparameters. See [`State`] for the entry point.

/**
 * File: /src/lib.rs
 * Created Date: Monday, January 22nd 2024
 * Author: Zihan
 * -----
 * Last Modified: Thursday, 12th March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-12		Zihan	Crate root for the cross-categorization core
 */

pub mod column;
pub mod component;
pub mod config;
pub mod constraints;
pub mod error;
pub mod grid;
pub mod numerics;
pub mod row_partition;
pub mod snapshot;
pub mod state;
pub mod view;

pub use column::{ColumnHypers, ColumnModel, ColumnType};
pub use component::{CategoricalHypers, ContinuousHypers};
pub use config::{ColumnKernel, Initialization, StateConfig};
pub use constraints::ColumnConstraints;
pub use error::{CrossCatError, Result};
pub use grid::{ColumnGrid, HyperGrid, DEFAULT_N_GRID};
pub use row_partition::RowPartition;
pub use snapshot::{LatentState, StateSnapshot, ViewSnapshot};
pub use state::{State, ViewId};
pub use view::View;
