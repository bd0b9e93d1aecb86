//! Structured error types for the atacama toolkit.

use thiserror::Error;

/// Broad class of a failure, so callers can decide whether to fix their
/// input or adjust parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Shape mismatch, degenerate rows/columns, negative counts, bad arguments.
    InputContract,
    /// The request cannot be satisfied numerically (rank, cluster count).
    NumericalInfeasibility,
}

/// Unified error type for all atacama operations.
#[derive(Debug, Error)]
pub enum AtacamaError {
    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed configuration or serialized input
    #[error("parse error: {0}")]
    Parse(String),

    /// Row/column count or ordering does not match what the operation expects
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// A cell or feature carries no counts at all
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Count matrices must be non-negative
    #[error("negative count {value} at ({row}, {col})")]
    NegativeCount { row: usize, col: usize, value: f64 },

    /// The neighbor graph was required to be connected but is not
    #[error("graph has {components} connected components, expected 1")]
    DisconnectedInput { components: usize },

    /// More components were requested than the matrix rank supports
    #[error("requested {requested} components but matrix rank is {rank}")]
    RankDeficiency { requested: usize, rank: usize },

    /// Silhouette and similar scores need at least two clusters
    #[error("found {found} clusters, need at least {required}")]
    InsufficientClusters { found: usize, required: usize },
}

impl AtacamaError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AtacamaError::RankDeficiency { .. } | AtacamaError::InsufficientClusters { .. } => {
                ErrorCategory::NumericalInfeasibility
            }
            _ => ErrorCategory::InputContract,
        }
    }

    /// Shorthand for a [`AtacamaError::ShapeMismatch`].
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        AtacamaError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Convenience alias used throughout the atacama crates.
pub type Result<T> = std::result::Result<T, AtacamaError>;
