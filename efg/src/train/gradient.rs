use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use tracing::{debug, info};

use super::{TrainError, TrainSet, TunableModel};
use crate::utils::with_progress;
use crate::Config;

type Result<T> = std::result::Result<T, TrainError>;

/// Samples used at each iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchExtractor {
    /// The whole train set.
    Full,
    /// A random subset with the given fraction of the train set, redrawn at every iteration.
    Stochastic { percentage: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    pub iterations: usize,
    /// True if the gradient norm fell below the tolerance.
    pub converged: bool,
    /// Norm of the last computed gradient.
    pub gradient_norm: f64,
}

/// Gradient ascent on the log-likelihood: `w <- w + step * (alpha - beta)`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    step: f64,
    max_iterations: usize,
    tolerance: f64,
    batch: BatchExtractor,
    seed: u64,
    config: Config,
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self {
            step: 0.1,
            max_iterations: 100,
            tolerance: 1e-3,
            batch: BatchExtractor::Full,
            seed: 0,
            config: Config::no_progress(),
        }
    }
}

impl GradientDescent {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
    pub fn with_batch(mut self, batch: BatchExtractor) -> Self {
        self.batch = batch;
        self
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn check(&self) -> Result<()> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(TrainError::InvalidParameter("step must be positive"));
        }
        if let BatchExtractor::Stochastic { percentage } = self.batch {
            if !(percentage > 0.0 && percentage <= 1.0) {
                return Err(TrainError::InvalidParameter("percentage must be in (0, 1]"));
            }
        }
        Ok(())
    }

    /// Fit the tunable weights of `model` to `train_set`.
    pub fn train<M>(&self, model: &mut M, train_set: &TrainSet) -> Result<TrainReport>
    where
        M: TunableModel + Send,
    {
        self.check()?;
        if model.weights().is_empty() {
            return Err(TrainError::NoTunableWeights);
        }
        let mut rng = Xoshiro256StarStar::seed_from_u64(self.seed);
        let full_alpha = match self.batch {
            BatchExtractor::Full => Some(model.alpha_part(train_set)?),
            BatchExtractor::Stochastic { .. } => None,
        };
        let report = with_progress(
            |it_cnt| -> Result<TrainReport> {
                let mut report = TrainReport {
                    iterations: 0,
                    converged: false,
                    gradient_norm: f64::INFINITY,
                };
                for iteration in 1..=self.max_iterations {
                    let (alpha, beta) = match (&self.batch, &full_alpha) {
                        (BatchExtractor::Full, Some(alpha)) => {
                            (alpha.clone(), model.beta_part(train_set)?)
                        }
                        (BatchExtractor::Full, None) => (
                            model.alpha_part(train_set)?,
                            model.beta_part(train_set)?,
                        ),
                        (BatchExtractor::Stochastic { percentage }, _) => {
                            let batch = train_set.random_subset(*percentage, &mut rng)?;
                            (model.alpha_part(&batch)?, model.beta_part(&batch)?)
                        }
                    };
                    let gradient: Vec<f64> =
                        alpha.iter().zip(beta.iter()).map(|(a, b)| a - b).collect();
                    let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
                    report.iterations = iteration;
                    report.gradient_norm = norm;
                    it_cnt.inc(1);
                    debug!(iteration, gradient_norm = norm, "training step");
                    if norm < self.tolerance {
                        report.converged = true;
                        break;
                    }
                    let weights: Vec<f64> = model
                        .weights()
                        .iter()
                        .zip(gradient.iter())
                        .map(|(w, g)| w + self.step * g)
                        .collect();
                    model.set_weights(&weights)?;
                }
                Ok(report)
            },
            self.max_iterations as u64,
            "Training",
            &self.config,
        )?;
        info!(
            iterations = report.iterations,
            converged = report.converged,
            gradient_norm = report.gradient_norm,
            "training finished"
        );
        Ok(report)
    }
}
