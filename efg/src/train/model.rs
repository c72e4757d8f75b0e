use super::{TrainError, TrainSet};
use crate::categoric::{Combination, Group};
use crate::distribution::Factor;
use crate::executor::Executor;
use crate::graph::{FactorGraph, InferenceError};

type Result<T> = std::result::Result<T, TrainError>;

/// A model whose tunable weights can be fit to a train set.
///
/// For a weight `w` bound to factors `f`, the log-likelihood gradient is `alpha - beta`, where
/// `alpha` is the mean over the samples of the raw images of the `f`, and `beta` is their
/// expectation under the model.
pub trait TunableModel {
    fn graph(&self) -> &FactorGraph;
    fn graph_mut(&mut self) -> &mut FactorGraph;

    fn weights(&self) -> Vec<f64> {
        self.graph().weights()
    }

    fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        Ok(self.graph_mut().set_weights(weights)?)
    }

    fn alpha_part(&self, batch: &TrainSet) -> Result<Vec<f64>> {
        let graph = self.graph();
        graph
            .tunables
            .iter()
            .map(|cluster| {
                cluster
                    .factors
                    .iter()
                    .map(|f| batch.mean_image(&graph.factors[*f].factor))
                    .sum::<Result<f64>>()
            })
            .collect()
    }

    fn beta_part(&mut self, batch: &TrainSet) -> Result<Vec<f64>>;

    /// Mean log-probability of the samples of `batch`.
    fn likelihood_estimation(&mut self, batch: &TrainSet) -> Result<f64>;

    fn weight_gradient(&mut self, batch: &TrainSet) -> Result<Vec<f64>> {
        let alpha = self.alpha_part(batch)?;
        let beta = self.beta_part(batch)?;
        Ok(alpha.iter().zip(beta.iter()).map(|(a, b)| a - b).collect())
    }
}

/// Expected raw images of the tunable factors under the current evidence, summed per weight.
fn expected_images(graph: &mut FactorGraph) -> std::result::Result<Vec<f64>, InferenceError> {
    let clusters: Vec<Vec<Factor>> = graph
        .tunables
        .iter()
        .map(|c| {
            c.factors
                .iter()
                .map(|f| graph.factors[*f].factor.clone())
                .collect()
        })
        .collect();
    let mut res = Vec::with_capacity(clusters.len());
    for factors in clusters.iter() {
        let mut expected = 0.0;
        for factor in factors.iter() {
            let joint = graph.joint_marginal(factor.group())?;
            expected += joint
                .images()
                .map(|(comb, p)| p * factor.find(comb))
                .sum::<f64>();
        }
        res.push(expected);
    }
    Ok(res)
}

fn check_covers(graph: &FactorGraph, batch: &TrainSet) -> Result<()> {
    let group = graph.group();
    group
        .positions_in(batch.group())
        .map_err(|_| TrainError::InconsistentTrainSet(group.to_string()))?;
    Ok(())
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len() as f64;
    values.sum::<f64>() / n
}

/// A model of the joint distribution of all the variables of the graph.
///
/// Samples cover every variable; the graph's evidence is ignored while training.
#[derive(Debug, Clone)]
pub struct RandomField {
    graph: FactorGraph,
}

impl RandomField {
    pub fn new(graph: FactorGraph) -> Self {
        Self { graph }
    }
    pub fn into_graph(self) -> FactorGraph {
        self.graph
    }

    /// Run `f` with the evidence cleared, then restore it.
    fn without_evidence<T>(
        &mut self,
        f: impl FnOnce(&mut FactorGraph) -> std::result::Result<T, InferenceError>,
    ) -> Result<T> {
        let evidence: Vec<(String, usize)> = self
            .graph
            .evidences()
            .map(|(var, value)| (var.name().to_owned(), value))
            .collect();
        self.graph.clear_evidence();
        let res = f(&mut self.graph);
        if !evidence.is_empty() {
            self.graph
                .reset_evidences(evidence.iter().map(|(name, value)| (name.as_str(), *value)))?;
        }
        Ok(res?)
    }
}

impl TunableModel for RandomField {
    fn graph(&self) -> &FactorGraph {
        &self.graph
    }
    fn graph_mut(&mut self) -> &mut FactorGraph {
        &mut self.graph
    }
    fn beta_part(&mut self, _batch: &TrainSet) -> Result<Vec<f64>> {
        self.without_evidence(expected_images)
    }
    fn likelihood_estimation(&mut self, batch: &TrainSet) -> Result<f64> {
        check_covers(&self.graph, batch)?;
        self.without_evidence(|graph| {
            let log_z = graph.log_partition()?;
            let log_p = batch
                .combinations()
                .iter()
                .map(|comb| graph.log_unnormalized(batch.group(), comb))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(mean(log_p.into_iter()) - log_z)
        })
    }
}

/// A model of the distribution of the hidden variables given a fixed set of observed ones.
///
/// Every sample provides the values of the observed variables, which are set as evidence when
/// computing the model expectations and the partition function of that sample.
#[derive(Debug, Clone)]
pub struct ConditionalRandomField {
    graph: FactorGraph,
    observed: Group,
}

impl ConditionalRandomField {
    pub fn new(mut graph: FactorGraph, observed: Group) -> Result<Self> {
        observed.positions_in(&graph.group())?;
        graph.clear_evidence();
        Ok(Self { graph, observed })
    }
    pub fn observed_group(&self) -> &Group {
        &self.observed
    }
    pub fn hidden_group(&self) -> Group {
        self.graph.group().difference(&self.observed)
    }
    pub fn into_graph(self) -> FactorGraph {
        self.graph
    }

    /// Evaluate `f` for every sample of `batch`, on a copy of the graph with the observed
    /// values of the sample as evidence.
    fn per_sample<T, F>(&self, batch: &TrainSet, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&mut FactorGraph, &Combination) -> std::result::Result<T, InferenceError>
            + Sync
            + Send,
    {
        let positions = self
            .observed
            .positions_in(batch.group())
            .map_err(|_| TrainError::InconsistentTrainSet(self.observed.to_string()))?;
        let names = self.observed.names();
        self.graph.executor().try_map(batch.len(), |i| -> Result<T> {
            let comb = &batch.combinations()[i];
            let mut graph = self.graph.clone();
            graph.set_executor(Executor::Sequential);
            let observed = comb.restrict(&positions);
            graph.reset_evidences(names.iter().copied().zip(observed.data().iter().copied()))?;
            Ok(f(&mut graph, comb)?)
        })
    }
}

impl TunableModel for ConditionalRandomField {
    fn graph(&self) -> &FactorGraph {
        &self.graph
    }
    fn graph_mut(&mut self) -> &mut FactorGraph {
        &mut self.graph
    }
    fn beta_part(&mut self, batch: &TrainSet) -> Result<Vec<f64>> {
        let per_sample = self.per_sample(batch, |graph, _| expected_images(graph))?;
        let mut beta = vec![0.0; self.graph.num_weights()];
        for sample in per_sample.iter() {
            beta.iter_mut().zip(sample.iter()).for_each(|(b, s)| *b += s);
        }
        beta.iter_mut()
            .for_each(|b| *b /= per_sample.len() as f64);
        Ok(beta)
    }
    fn likelihood_estimation(&mut self, batch: &TrainSet) -> Result<f64> {
        check_covers(&self.graph, batch)?;
        let per_sample = self.per_sample(batch, |graph, comb| {
            Ok(graph.log_unnormalized(batch.group(), comb)? - graph.log_partition()?)
        })?;
        Ok(mean(per_sample.into_iter()))
    }
}
