//! Discrete factor graphs and loopy belief propagation.
//!
//! A factor graph is a bipartite graph between *variables* (each with a
//! finite state set) and *factors* (nonnegative functions of subsets of the
//! variables). The [`bp`] module runs loopy belief propagation on such a
//! graph and exposes approximate marginals ("beliefs") and a Bethe
//! approximation of the log partition function.
//!
//! The building blocks are usable on their own:
//!
//! - [`var::Var`] / [`var::VarSet`]: variables and label-ordered sets thereof;
//! - [`prob::ProbVec`]: dense nonnegative vectors with norms and distances;
//! - [`factor::Factor`]: multi-dimensional tables indexed by joint variable
//!   states, with product, quotient, marginalization and slicing;
//! - [`graph::FactorGraph`]: the owning container with neighbor lists.

pub mod bp;
pub mod factor;
pub mod graph;
pub mod index;
pub mod prob;
pub mod var;

use thiserror::Error;

/// Everything that can go wrong in this crate.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Variable sets of the operands do not match.")]
    VarSetMismatch,
    #[error("Variable set is not contained in the factor scope.")]
    NotSubset,
    #[error("Joint state {0} is out of range (only {1} states).")]
    StateOutOfRange(usize, usize),
    #[error("Variable label {0} occurs with conflicting state counts.")]
    InconsistentStates(usize),
    #[error("No variable with label {0} in the graph.")]
    UnknownVar(usize),
    #[error("No factor scope contains the queried variable set.")]
    NoContainingFactor,
    #[error("Missing property `{0}`.")]
    MissingProperty(&'static str),
    #[error("Cannot parse property `{key}={value}`.")]
    InvalidProperty { key: &'static str, value: String },
    #[error("Cannot normalize a vector with no mass.")]
    NonNormalizable,
    #[error("NaN or negative value encountered.")]
    NumericFailure,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Knobs that are about the execution environment rather than the algorithm.
#[derive(Clone)]
pub struct Config {
    /// Show progress bars for long-running computations.
    pub show_progress: bool,
    /// Computation time after which a progress bar appears, so that short
    /// runs stay silent.
    pub progress_min_time: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            show_progress: true,
            progress_min_time: std::time::Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn no_progress() -> Self {
        Self {
            show_progress: false,
            ..Self::default()
        }
    }
}

pub use bp::{Bp, BpOptions, Properties, UpdateRule};
pub use factor::Factor;
pub use graph::{FactorGraph, Neighbor};
pub use index::SubsetIndex;
pub use prob::{dist, DistKind, NormKind, ProbVec};
pub use var::{Var, VarSet};
