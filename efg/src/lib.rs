//! Inference and learning on discrete factor graphs.
//!
//! A model is a set of categoric variables joined by unary and binary factors. Factors are
//! either explicit tables or exponential shapes `exp(w * shape)`, whose weight may be tunable.
//! Marginals are computed by belief propagation (exact on trees, iterative on loops), samples
//! are drawn by Gibbs sampling, and tunable weights are fit to a train set by gradient ascent
//! on the log-likelihood.

pub mod categoric;
pub mod distribution;
pub mod executor;
pub mod graph;
pub mod train;
pub(crate) mod utils;

pub use categoric::{Combination, Group, GroupError, GroupRange, Variable};
pub use distribution::{Evaluator, Factor, FactorError, SharedWeight};
pub use executor::Executor;
pub use graph::{
    FactorGraph, GibbsConfig, GraphError, InferenceError, PropagationConfig, PropagationKind,
    PropagationReport,
};
pub use train::{
    BatchExtractor, ConditionalRandomField, GradientDescent, RandomField, TrainError, TrainReport,
    TrainSet, TunableModel,
};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EfgError>;

#[derive(Error, Debug)]
pub enum EfgError {
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Factor(#[from] FactorError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error("Cannot build the thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Computation time after which a progress bar is displayed.
    /// This avoids showing progress bars for negligible amounts of time.
    progress_min_time: std::time::Duration,
    /// Never display the progress bar if false.
    show_progress: bool,
}

impl Config {
    pub fn with_default_timing() -> Self {
        Self {
            progress_min_time: std::time::Duration::from_millis(500),
            show_progress: true,
        }
    }
    pub fn no_progress() -> Self {
        Self {
            progress_min_time: std::time::Duration::MAX,
            show_progress: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::no_progress()
    }
}
