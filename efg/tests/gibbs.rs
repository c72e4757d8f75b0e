mod common;

use approx::assert_relative_eq;
use common::*;
use efg::{Executor, GibbsConfig, InferenceError};

#[test]
fn anti_correlated_cycle_samples() {
    let mut graph = anti_cycle(3);
    let samples = graph.sample(&GibbsConfig::new(10).with_seed(42)).unwrap();
    assert_eq!(samples.len(), 10);
    for sample in samples.iter() {
        assert_eq!(sample.len(), 3);
        assert!(sample.data().iter().all(|x| *x < 3));
        // Anti-correlation forbids equal neighbours.
        assert!(sample[0] != sample[1] && sample[1] != sample[2] && sample[2] != sample[0]);
    }
}

#[test]
fn samples_are_reproducible() {
    let config = GibbsConfig::new(200)
        .with_seed(7)
        .with_chains(4)
        .with_thinning(2);
    let mut graph = tree(1);
    let first = graph.sample(&config).unwrap();
    let second = graph.sample(&config).unwrap();
    assert_eq!(first, second);
    graph.set_executor(Executor::with_threads(4).unwrap());
    assert_eq!(first, graph.sample(&config).unwrap());
    let other = graph.sample(&config.clone().with_seed(8)).unwrap();
    assert_ne!(first, other);
}

#[test]
fn samples_cover_hidden_variables_only() {
    let mut graph = chain();
    graph.set_evidence("B", 2).unwrap();
    let samples = graph
        .sample(&GibbsConfig::new(50).with_chains(3))
        .unwrap();
    assert_eq!(samples.len(), 50);
    assert!(samples.iter().all(|s| s.len() == 2));
}

#[test]
fn frequencies_match_belief_propagation() {
    let mut graph = chain();
    graph.set_evidence("C", 0).unwrap();
    let config = GibbsConfig::new(20_000)
        .with_seed(42)
        .with_burn_in(200)
        .with_chains(4);
    for name in ["A", "B"] {
        let freqs = graph.gibbs_marginal(name, &config).unwrap();
        let exact = graph.marginal(name).unwrap();
        for (f, e) in freqs.iter().zip(exact.iter()) {
            assert_relative_eq!(f, e, epsilon = 2e-2);
        }
    }
    assert_eq!(graph.gibbs_marginal("C", &config).unwrap(), vec![1.0, 0.0]);
}

#[test]
fn invalid_configurations() {
    let mut graph = chain();
    assert!(matches!(
        graph.sample(&GibbsConfig::new(10).with_chains(0)),
        Err(InferenceError::InvalidParameter(_))
    ));
    assert!(matches!(
        graph.sample(&GibbsConfig::new(10).with_thinning(0)),
        Err(InferenceError::InvalidParameter(_))
    ));
    assert!(matches!(
        graph.gibbs_marginal("A", &GibbsConfig::new(0)),
        Err(InferenceError::InvalidParameter(_))
    ));
}
