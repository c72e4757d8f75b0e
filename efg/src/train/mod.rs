//! Learning the weights of tunable factors from a train set.

mod gradient;
mod model;
mod train_set;

use thiserror::Error;

use crate::categoric::GroupError;
use crate::distribution::FactorError;
use crate::graph::{GraphError, InferenceError};

pub use gradient::{BatchExtractor, GradientDescent, TrainReport};
pub use model::{ConditionalRandomField, RandomField, TunableModel};
pub use train_set::TrainSet;

#[derive(Debug, Clone, Error)]
pub enum TrainError {
    #[error("The train set is empty.")]
    EmptyTrainSet,
    #[error("The train set does not cover the variables of {0}.")]
    InconsistentTrainSet(String),
    #[error("The model has no tunable weight.")]
    NoTunableWeights,
    #[error("Invalid parameter: {0}.")]
    InvalidParameter(&'static str),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Factor(#[from] FactorError),
}
