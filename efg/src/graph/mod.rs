//! Factor graphs, evidence and inference.

mod belief_propagation;
mod bp_compute;
mod factor_graph;
mod gibbs;

use indexmap::IndexMap;
use thiserror::Error;

use crate::categoric::GroupError;
use crate::distribution::FactorError;

pub use belief_propagation::{PropagationConfig, PropagationKind, PropagationReport};
pub use factor_graph::FactorGraph;
pub use gibbs::GibbsConfig;

pub(crate) type NamedList<T> = IndexMap<String, T>;
pub(crate) type VarId = usize;
pub(crate) type FactorId = usize;

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Unknown variable {0}.")]
    UnknownVariable(String),
    #[error("Invalid evidence {name}={value}: unknown variable or value out of the domain.")]
    InvalidEvidence { name: String, value: usize },
    #[error("Variable {name} already has size {expected}, got {got}.")]
    CardinalityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Only unary and binary factors are supported, got a factor over {0} variables.")]
    FactorArity(usize),
    #[error("Variables {0} and {1} are already connected by a factor.")]
    AlreadyConnected(String, String),
    #[error("Factor is not tunable.")]
    NotTunable,
    #[error("No tunable factor over group {0}.")]
    NoTunableGroup(String),
    #[error("Wrong number of weights: got {got}, expected {expected}.")]
    WeightCount { expected: usize, got: usize },
    #[error(transparent)]
    Factor(#[from] FactorError),
}

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Loopy belief propagation did not converge in {iterations} iterations (last delta {delta:e}).")]
    NotConverged { iterations: usize, delta: f64 },
    #[error("Zero probability mass around variable {0}: evidence is inconsistent with the factors.")]
    Degenerate(String),
    #[error("Unknown variable {0}.")]
    UnknownVariable(String),
    #[error("Invalid parameter: {0}.")]
    InvalidParameter(&'static str),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Factor(#[from] FactorError),
}
