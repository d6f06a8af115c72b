/**
 * File: /src/error.rs
 * Created Date: Monday, March 2nd 2026
 * Author: Zihan
 * -----
 * Last Modified: Monday, 2nd March 2026
 * Modified By: Zihan Wu <wzh4464@gmail.com>
 * -----
 * HISTORY:
 * Date      		By   	Comments
 * ----------		------	---------------------------------------------------------
 * 2026-03-02		Zihan	Error taxonomy for the cross-categorization core
 */

use std::error::Error;
use std::fmt;

/// Errors raised by the inference core
#[derive(Debug, Clone, PartialEq)]
pub enum CrossCatError {
    /// Inputs cannot form a valid state (dimensions, cardinalities, constraints)
    Construction(String),
    /// Out-of-range index, bad concentration, malformed grid or row
    InvalidArgument(String),
    /// A programming defect: non-finite likelihood or broken consistency.
    /// Fatal, the instance refuses further mutation after this.
    InvariantViolation(String),
}

impl fmt::Display for CrossCatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CrossCatError::Construction(msg) => write!(f, "Construction error: {}", msg),
            CrossCatError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CrossCatError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
        }
    }
}

impl Error for CrossCatError {}

impl CrossCatError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrossCatError::InvariantViolation(_))
    }

    /// Same kind, message prefixed with `context`
    pub fn with_context(self, context: &str) -> Self {
        match self {
            CrossCatError::Construction(msg) => CrossCatError::Construction(format!("{}: {}", context, msg)),
            CrossCatError::InvalidArgument(msg) => {
                CrossCatError::InvalidArgument(format!("{}: {}", context, msg))
            }
            CrossCatError::InvariantViolation(msg) => {
                CrossCatError::InvariantViolation(format!("{}: {}", context, msg))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CrossCatError>;

/// Shorthand used all over the crate
pub(crate) fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(CrossCatError::InvalidArgument(msg.into()))
}

pub(crate) fn violation<T>(msg: impl Into<String>) -> Result<T> {
    Err(CrossCatError::InvariantViolation(msg.into()))
}
