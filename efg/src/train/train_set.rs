use rand::Rng;
use serde::{Deserialize, Serialize};

use super::TrainError;
use crate::categoric::{Combination, Group};
use crate::distribution::Factor;
use crate::graph::{FactorGraph, GibbsConfig};
use crate::utils::normalize_in_place;

type Result<T> = std::result::Result<T, TrainError>;

/// Ordered samples, each a combination over `group`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSet {
    group: Group,
    combinations: Vec<Combination>,
}

impl TrainSet {
    pub fn new(group: Group, combinations: Vec<Combination>) -> Result<Self> {
        if combinations.is_empty() {
            return Err(TrainError::EmptyTrainSet);
        }
        for comb in combinations.iter() {
            group.check(comb)?;
        }
        Ok(Self {
            group,
            combinations,
        })
    }

    /// Train set made of Gibbs samples of the hidden variables of `graph`.
    pub fn from_gibbs(graph: &mut FactorGraph, config: &GibbsConfig) -> Result<Self> {
        let samples = graph.sample(config)?;
        Self::new(graph.hidden_group(), samples)
    }

    pub fn group(&self) -> &Group {
        &self.group
    }
    pub fn combinations(&self) -> &[Combination] {
        &self.combinations
    }
    pub fn len(&self) -> usize {
        self.combinations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    /// Random subset holding `percentage` of the samples (at least one), in their original
    /// order.
    pub fn random_subset<R: Rng>(&self, percentage: f64, rng: &mut R) -> Result<Self> {
        if !(percentage > 0.0 && percentage <= 1.0) {
            return Err(TrainError::InvalidParameter("percentage must be in (0, 1]"));
        }
        let count = ((self.len() as f64 * percentage).round() as usize).clamp(1, self.len());
        let mut picked = rand::seq::index::sample(rng, self.len(), count).into_vec();
        picked.sort_unstable();
        Ok(Self {
            group: self.group.clone(),
            combinations: picked
                .into_iter()
                .map(|i| self.combinations[i].clone())
                .collect(),
        })
    }

    /// Frequencies of the sub-combinations over `group`, as an explicit factor.
    pub fn empirical_frequency(&self, group: &Group) -> Result<Factor> {
        let positions = group.positions_in(&self.group)?;
        let mut counts = vec![0.0; group.size()?];
        for comb in self.combinations.iter() {
            counts[group.index_of(&comb.restrict(&positions))] += 1.0;
        }
        normalize_in_place(&mut counts);
        Ok(Factor::from_dense(group.clone(), &counts)?)
    }

    /// Mean raw image of `factor` over the samples.
    pub(crate) fn mean_image(&self, factor: &Factor) -> Result<f64> {
        let positions = factor
            .group()
            .positions_in(&self.group)
            .map_err(|_| TrainError::InconsistentTrainSet(factor.group().to_string()))?;
        let total: f64 = self
            .combinations
            .iter()
            .map(|comb| factor.find(&comb.restrict(&positions)))
            .sum();
        Ok(total / self.len() as f64)
    }
}
