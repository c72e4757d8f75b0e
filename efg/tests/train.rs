mod common;

use approx::assert_relative_eq;
use common::*;
use efg::{
    BatchExtractor, Combination, ConditionalRandomField, Factor, FactorGraph, GibbsConfig,
    GradientDescent, Group, RandomField, TrainError, TrainSet, TunableModel,
};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

/// A(2) - B(2) with a tunable correlation factor of weight `w`.
fn tunable_pair(w: f64) -> FactorGraph {
    let (a, b) = (var("A", 2), var("B", 2));
    let mut graph = FactorGraph::new();
    let shape = Factor::correlation(group(&[&a, &b])).unwrap();
    graph
        .insert_tunable_factor(Factor::tunable(shape, w))
        .unwrap();
    graph
}

/// 80% of the samples have equal values.
fn correlated_samples(group: Group) -> TrainSet {
    let mut combinations = Vec::new();
    for _ in 0..4 {
        combinations.push(Combination::new(vec![0, 0]));
        combinations.push(Combination::new(vec![1, 1]));
    }
    combinations.push(Combination::new(vec![0, 1]));
    combinations.push(Combination::new(vec![1, 0]));
    TrainSet::new(group, combinations).unwrap()
}

#[test]
fn training_does_not_increase_nll() {
    let mut model = RandomField::new(tunable_pair(0.0));
    let train_set = correlated_samples(model.graph().group());
    let nll_before = -model.likelihood_estimation(&train_set).unwrap();
    assert_relative_eq!(nll_before, 4f64.ln(), epsilon = 1e-12);
    let report = GradientDescent::new()
        .with_step(0.5)
        .with_max_iterations(500)
        .with_tolerance(1e-6)
        .train(&mut model, &train_set)
        .unwrap();
    let nll_after = -model.likelihood_estimation(&train_set).unwrap();
    assert!(nll_after <= nll_before);
    assert!(report.converged);
    assert!(report.gradient_norm < 1e-6);
    // Maximum likelihood: P(A = B) = e^w / (1 + e^w) = 0.8.
    assert_relative_eq!(model.weights()[0], 4f64.ln(), epsilon = 1e-4);
}

#[test]
fn gradient_is_alpha_minus_beta() {
    let mut model = RandomField::new(tunable_pair(0.0));
    let train_set = correlated_samples(model.graph().group());
    assert_relative_eq!(model.alpha_part(&train_set).unwrap()[0], 0.8);
    assert_relative_eq!(model.beta_part(&train_set).unwrap()[0], 0.5, epsilon = 1e-12);
    assert_relative_eq!(model.weight_gradient(&train_set).unwrap()[0], 0.3, epsilon = 1e-12);
}

#[test]
fn shared_weight_is_recovered() {
    let (a, b, c) = (var("A", 2), var("B", 2), var("C", 2));
    let build = |w: f64| {
        let mut graph = FactorGraph::new();
        let ab = Factor::correlation(group(&[&a, &b])).unwrap();
        let bc = Factor::correlation(group(&[&b, &c])).unwrap();
        graph
            .insert_tunable_factor(Factor::tunable(ab, w))
            .unwrap();
        graph
            .insert_tunable_factor_sharing(Factor::tunable(bc, 0.0), &group(&[&b, &a]))
            .unwrap();
        graph
    };
    let mut reference = build(1.5);
    assert_eq!(reference.num_weights(), 1);
    let config = GibbsConfig::new(5000)
        .with_seed(3)
        .with_burn_in(100)
        .with_thinning(2)
        .with_chains(2);
    let train_set = TrainSet::from_gibbs(&mut reference, &config).unwrap();

    let mut model = RandomField::new(build(0.0));
    model.graph_mut().set_ones();
    assert_eq!(model.weights(), vec![1.0]);
    GradientDescent::new()
        .with_step(0.5)
        .with_max_iterations(300)
        .with_tolerance(1e-5)
        .train(&mut model, &train_set)
        .unwrap();
    assert_relative_eq!(model.weights()[0], 1.5, epsilon = 0.25);
    for factor in model.graph().tunable_factors() {
        assert_eq!(factor.weight(), Some(model.weights()[0]));
    }
}

#[test]
fn conditional_random_field_training() {
    let graph = tunable_pair(0.0);
    let observed = Group::single(var("A", 2));
    let mut model = ConditionalRandomField::new(graph, observed).unwrap();
    assert_eq!(model.hidden_group().names(), vec!["B"]);
    let train_set = correlated_samples(model.graph().group());
    let before = model.likelihood_estimation(&train_set).unwrap();
    assert_relative_eq!(before, 0.5f64.ln(), epsilon = 1e-12);
    let report = GradientDescent::new()
        .with_step(1.0)
        .with_max_iterations(500)
        .with_tolerance(1e-6)
        .train(&mut model, &train_set)
        .unwrap();
    assert!(report.converged);
    let after = model.likelihood_estimation(&train_set).unwrap();
    assert!(after >= before);
    // P(B = A | A) = e^w / (1 + e^w) = 0.8.
    assert_relative_eq!(model.weights()[0], 4f64.ln(), epsilon = 1e-4);
    assert!(model.graph().evidences().next().is_none());
}

#[test]
fn stochastic_batches() {
    let mut model = RandomField::new(tunable_pair(0.0));
    let train_set = correlated_samples(model.graph().group());
    let report = GradientDescent::new()
        .with_batch(BatchExtractor::Stochastic { percentage: 0.5 })
        .with_step(0.2)
        .with_max_iterations(50)
        .with_tolerance(0.0)
        .with_seed(11)
        .train(&mut model, &train_set)
        .unwrap();
    assert_eq!(report.iterations, 50);
    assert!(!report.converged);
    let w = model.weights()[0];
    assert!(w.is_finite() && w > 0.0);

    assert!(matches!(
        GradientDescent::new()
            .with_batch(BatchExtractor::Stochastic { percentage: 0.0 })
            .train(&mut model, &train_set),
        Err(TrainError::InvalidParameter(_))
    ));
}

#[test]
fn train_set_utilities() {
    let (a, b) = (var("A", 2), var("B", 2));
    let train_set = correlated_samples(group(&[&a, &b]));
    let mut rng = Xoshiro256StarStar::seed_from_u64(42);
    let subset = train_set.random_subset(0.3, &mut rng).unwrap();
    assert_eq!(subset.len(), 3);
    assert!(subset
        .combinations()
        .iter()
        .all(|c| train_set.combinations().contains(c)));
    let freqs = train_set.empirical_frequency(&group(&[&b])).unwrap();
    assert_eq!(freqs.find(&Combination::new(vec![0])), 0.5);
    let joint = train_set.empirical_frequency(&group(&[&a, &b])).unwrap();
    assert_relative_eq!(joint.find(&Combination::new(vec![1, 1])), 0.4);
    assert!(matches!(
        TrainSet::new(group(&[&a]), Vec::new()),
        Err(TrainError::EmptyTrainSet)
    ));
    assert!(TrainSet::new(group(&[&a]), vec![Combination::new(vec![2])]).is_err());
}

#[test]
fn inconsistent_models_are_rejected() {
    let mut model = RandomField::new(tunable_pair(0.0));
    let a_only = TrainSet::new(
        Group::single(var("A", 2)),
        vec![Combination::new(vec![0])],
    )
    .unwrap();
    assert!(matches!(
        GradientDescent::new().train(&mut model, &a_only),
        Err(TrainError::InconsistentTrainSet(_))
    ));

    let mut constant = RandomField::new(chain());
    let train_set = TrainSet::new(
        constant.graph().group(),
        vec![Combination::new(vec![0, 0, 0])],
    )
    .unwrap();
    assert!(matches!(
        GradientDescent::new().train(&mut constant, &train_set),
        Err(TrainError::NoTunableWeights)
    ));
    assert!(ConditionalRandomField::new(chain(), Group::single(var("Z", 2))).is_err());
}
