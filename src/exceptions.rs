//! ## Custom Errors for mqr-tree
//!
//! This module defines the errors returned by the public API. Per the error taxonomy,
//! caller-input errors are returned before any mutation takes place, and the
//! iteration-cap error signals that the tree was left in an undefined state.

use std::error::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Represents errors specific to invalid operations or parameters in `mqr-tree`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MqrTreeError {
    /// Occurs when an envelope is constructed with `max < min` on one or both axes.
    InvalidEnvelope {
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
    },
    /// Occurs when `knn_search` is called with `k == 0`.
    InvalidK {
        /// The value of `k` that was rejected.
        k: usize,
    },
    /// Occurs when the insertion work queue exceeds its iteration cap.
    ///
    /// This indicates a bug in invariant maintenance rather than a normal operating
    /// condition. The tree must not be used again after this error is returned.
    IterationCapExceeded {
        /// The cap that was exceeded.
        cap: u64,
    },
}

impl fmt::Display for MqrTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqrTreeError::InvalidEnvelope {
                min_x,
                max_x,
                min_y,
                max_y,
            } => write!(
                f,
                "Invalid envelope: min_x={min_x}, max_x={max_x}, min_y={min_y}, max_y={max_y} \
                 (require min_x <= max_x and min_y <= max_y)"
            ),
            MqrTreeError::InvalidK { k } => {
                write!(f, "Invalid k: {k}. k must be at least 1.")
            }
            MqrTreeError::IterationCapExceeded { cap } => {
                write!(
                    f,
                    "Insertion exceeded the iteration cap of {cap}; this indicates a \
                     rebalancing pathology and the tree must not be used further."
                )
            }
        }
    }
}

impl Error for MqrTreeError {}
