use ndarray::Array1;
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use super::factor_graph::FactorGraph;
use super::{InferenceError, VarId};
use crate::categoric::Combination;

type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GibbsConfig {
    /// Total number of samples, split evenly across chains.
    pub samples: usize,
    /// Sweeps discarded at the start of each chain.
    pub burn_in: usize,
    /// Sweeps between two recorded samples.
    pub thinning: usize,
    pub seed: u64,
    /// Number of independent chains. Chain `i` is seeded with `seed + i`.
    pub chains: usize,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            burn_in: 100,
            thinning: 1,
            seed: 0,
            chains: 1,
        }
    }
}

impl GibbsConfig {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            ..Self::default()
        }
    }
    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }
    pub fn with_thinning(mut self, thinning: usize) -> Self {
        self.thinning = thinning;
        self
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn with_chains(mut self, chains: usize) -> Self {
        self.chains = chains;
        self
    }
    fn check(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(InferenceError::InvalidParameter("chains must be positive"));
        }
        if self.thinning == 0 {
            return Err(InferenceError::InvalidParameter("thinning must be positive"));
        }
        Ok(())
    }
}

impl FactorGraph {
    /// Draw samples of the hidden variables (in `hidden_group` order) given the evidence.
    pub fn sample(&mut self, config: &GibbsConfig) -> Result<Vec<Combination>> {
        config.check()?;
        self.refresh_tables();
        let hidden = self.hidden_ids();
        let potentials: Vec<Array1<f64>> = hidden.iter().map(|id| self.potential(*id)).collect();
        let graph = &*self;
        let chains = graph.executor.try_map(config.chains, |chain| {
            run_chain(graph, &hidden, &potentials, config, chain)
        })?;
        Ok(chains.into_iter().flatten().collect())
    }

    /// Empirical frequencies of the values of `name` over Gibbs samples.
    pub fn gibbs_marginal(&mut self, name: &str, config: &GibbsConfig) -> Result<Vec<f64>> {
        let id = self.var_id(name)?;
        let size = self.nodes[id].variable.size();
        let mut freqs = vec![0.0; size];
        if let Some(value) = self.evidence.get(&id) {
            freqs[*value] = 1.0;
            return Ok(freqs);
        }
        if config.samples == 0 {
            return Err(InferenceError::InvalidParameter("samples must be positive"));
        }
        let position = self
            .hidden_ids()
            .iter()
            .position(|h| *h == id)
            .ok_or_else(|| InferenceError::UnknownVariable(name.to_owned()))?;
        let samples = self.sample(config)?;
        for sample in samples.iter() {
            freqs[sample[position]] += 1.0;
        }
        freqs
            .iter_mut()
            .for_each(|f| *f /= samples.len() as f64);
        Ok(freqs)
    }
}

fn run_chain(
    graph: &FactorGraph,
    hidden: &[VarId],
    potentials: &[Array1<f64>],
    config: &GibbsConfig,
    chain: usize,
) -> Result<Vec<Combination>> {
    let n_samples = config.samples / config.chains + usize::from(chain < config.samples % config.chains);
    let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed.wrapping_add(chain as u64));
    let mut state = graph.evidence_assignment();
    for id in hidden.iter() {
        state[*id] = rng.gen_range(0..graph.nodes[*id].variable.size());
    }
    for _ in 0..config.burn_in {
        sweep(graph, hidden, potentials, &mut state, &mut rng)?;
    }
    let mut samples = Vec::with_capacity(n_samples);
    for _ in 0..n_samples {
        for _ in 0..config.thinning {
            sweep(graph, hidden, potentials, &mut state, &mut rng)?;
        }
        samples.push(Combination::new(hidden.iter().map(|id| state[*id]).collect()));
    }
    Ok(samples)
}

/// Resample every hidden variable from its distribution conditioned on its neighbours.
fn sweep<R: Rng>(
    graph: &FactorGraph,
    hidden: &[VarId],
    potentials: &[Array1<f64>],
    state: &mut [usize],
    rng: &mut R,
) -> Result<()> {
    for (id, phi) in hidden.iter().zip(potentials.iter()) {
        let node = &graph.nodes[*id];
        let mut weights = phi.clone();
        for w in node.active.iter() {
            weights *= &graph.factors[node.connections[w]]
                .pair(*id)
                .column(state[*w]);
        }
        let distr = WeightedIndex::<f64>::new(weights.iter()).map_err(|_| {
            InferenceError::Degenerate(node.variable.name().to_owned())
        })?;
        state[*id] = distr.sample(rng);
    }
    Ok(())
}
