//! Error types for graph editing

use crate::config::ConfigError;
use crate::nn::ModuleKind;
use thiserror::Error;

/// Result type for editing operations
pub type Result<T> = std::result::Result<T, EditingError>;

/// Errors that can occur while tracing, editing or evaluating a graph
#[derive(Debug, Error)]
pub enum EditingError {
    /// A constructor argument is outside its enumerated set of valid values.
    #[error("[{component}] Invalid argument {parameter}: Got {value}, expected {expected}")]
    InvalidConfiguration {
        component: &'static str,
        parameter: &'static str,
        value: String,
        expected: String,
    },

    /// An applier (or finder) precondition on the local graph structure does not hold.
    #[error("Structural assumption violated at node `{node}`: {detail}")]
    StructuralAssumptionViolated { node: String, detail: String },

    /// Two application points of the same batch reference the same node.
    #[error("[{rewriter}] Overlapping application points: node `{node}` is referenced {count} times")]
    Overlap {
        rewriter: String,
        node: String,
        count: usize,
    },

    /// An application point was handed to a rewriter that did not produce it.
    #[error("[{rewriter}] Application point was produced by `{producer}`")]
    ForeignApplicationPoint { rewriter: String, producer: String },

    #[error("Node not found: {0}")]
    MissingNode(String),

    #[error("Submodule not found: {0}")]
    MissingSubmodule(String),

    #[error("Epsilon must be strictly positive: {which} contains {value}")]
    NonPositiveEps { which: &'static str, value: f64 },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The graph no longer is a valid single-output dataflow graph.
    #[error("Graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("Module `{target}` ({kind}) cannot be traced through; register it as a leaf type")]
    NotTraceable { target: String, kind: ModuleKind },

    #[error("[{rewriter}] No fixpoint reached after {iterations} iterations")]
    FixpointNotReached { rewriter: String, iterations: usize },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EditingError {
    /// Build an `InvalidConfiguration` error listing the accepted values as `a, b or c`.
    pub fn invalid_argument(
        component: &'static str,
        parameter: &'static str,
        value: impl Into<String>,
        valid_values: &[&str],
    ) -> Self {
        let expected = match valid_values {
            [] => String::from("nothing"),
            [only] => (*only).to_string(),
            [init @ .., last] => format!("{} or {}", init.join(", "), last),
        };

        EditingError::InvalidConfiguration {
            component,
            parameter,
            value: value.into(),
            expected,
        }
    }

    pub(crate) fn structural(node: impl Into<String>, detail: impl Into<String>) -> Self {
        EditingError::StructuralAssumptionViolated {
            node: node.into(),
            detail: detail.into(),
        }
    }
}
