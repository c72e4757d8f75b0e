#![allow(dead_code)]

use efg::{Combination, Factor, FactorGraph, Group, Variable};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

pub fn var(name: &str, size: usize) -> Variable {
    Variable::new(name, size).unwrap()
}

pub fn group(vars: &[&Variable]) -> Group {
    Group::new(vars.iter().map(|v| (*v).clone())).unwrap()
}

/// Explicit factor over `vars` with images `f(comb)`.
pub fn explicit(vars: &[&Variable], f: impl Fn(&[usize]) -> f64) -> Factor {
    let mut factor = Factor::new(group(vars));
    for comb in factor.group().range().collect::<Vec<_>>() {
        let value = f(comb.data());
        factor.add(comb, value).unwrap();
    }
    factor
}

/// Explicit factor over `vars` with random images in `[0.1, 1.1)`.
pub fn random_factor(vars: &[&Variable], rng: &mut Xoshiro256StarStar) -> Factor {
    let mut factor = Factor::new(group(vars));
    for comb in factor.group().range().collect::<Vec<_>>() {
        factor.add(comb, 0.1 + rng.gen::<f64>()).unwrap();
    }
    factor
}

/// A(2) - B(3) - C(2), with a unary factor on A.
pub fn chain() -> FactorGraph {
    let (a, b, c) = (var("A", 2), var("B", 3), var("C", 2));
    let mut graph = FactorGraph::new();
    graph
        .insert_factor(explicit(&[&a], |x| [1.0, 3.0][x[0]]))
        .unwrap();
    graph
        .insert_factor(explicit(&[&a, &b], |x| 1.0 + x[0] as f64 + 2.0 * x[1] as f64))
        .unwrap();
    graph
        .insert_factor(explicit(&[&b, &c], |x| 1.0 + 0.5 * (x[0] + 2 * x[1]) as f64))
        .unwrap();
    graph
}

/// A tree rooted in A: A - B, A - C, B - D, B - E, with random tables.
pub fn tree(seed: u64) -> FactorGraph {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let (a, b, c, d, e) = (
        var("A", 2),
        var("B", 3),
        var("C", 2),
        var("D", 3),
        var("E", 2),
    );
    let mut graph = FactorGraph::new();
    graph.insert_factor(random_factor(&[&a, &b], &mut rng)).unwrap();
    graph.insert_factor(random_factor(&[&c, &a], &mut rng)).unwrap();
    graph.insert_factor(random_factor(&[&b, &d], &mut rng)).unwrap();
    graph.insert_factor(random_factor(&[&e, &b], &mut rng)).unwrap();
    graph.insert_factor(random_factor(&[&d], &mut rng)).unwrap();
    graph.insert_factor(random_factor(&[&e], &mut rng)).unwrap();
    graph
}

/// Three variables of size `size` in a loop of anti-correlation factors.
pub fn anti_cycle(size: usize) -> FactorGraph {
    let (a, b, c) = (var("A", size), var("B", size), var("C", size));
    let mut graph = FactorGraph::new();
    for (x, y) in [(&a, &b), (&b, &c), (&c, &a)] {
        graph
            .insert_factor(Factor::anti_correlation(group(&[x, y])).unwrap())
            .unwrap();
    }
    graph
}

/// Four binary variables in a loop of weak exponential correlations, with unary factors.
pub fn weak_loop() -> FactorGraph {
    let vars: Vec<Variable> = ["A", "B", "C", "D"].iter().map(|n| var(n, 2)).collect();
    let mut graph = FactorGraph::new();
    for i in 0..4 {
        let (x, y) = (&vars[i], &vars[(i + 1) % 4]);
        let shape = Factor::correlation(group(&[x, y])).unwrap();
        graph
            .insert_factor(Factor::exponential(shape, 0.3))
            .unwrap();
    }
    graph
        .insert_factor(explicit(&[&vars[0]], |x| [2.0, 1.0][x[0]]))
        .unwrap();
    graph
        .insert_factor(explicit(&[&vars[2]], |x| [1.0, 1.5][x[0]]))
        .unwrap();
    graph
}

/// Unnormalized probability of every combination of all the variables that agrees with
/// the evidence, by enumeration.
fn consistent_joint(graph: &FactorGraph) -> (Group, Vec<(Combination, f64)>) {
    let all = graph.group();
    let evidence: Vec<(usize, usize)> = graph
        .evidences()
        .map(|(v, x)| (all.find(v.name()).unwrap(), x))
        .collect();
    let joint = all
        .range()
        .filter(|comb| evidence.iter().all(|(p, x)| comb[*p] == *x))
        .map(|comb| {
            let value: f64 = graph
                .factors()
                .map(|f| f.evaluate_in(&comb, &all).unwrap())
                .product();
            (comb, value)
        })
        .collect();
    (all, joint)
}

/// Exact joint distribution of `target` given the evidence, in `target.range()` order.
pub fn brute_force_joint(graph: &FactorGraph, target: &Group) -> Vec<f64> {
    let (all, joint) = consistent_joint(graph);
    let positions = target.positions_in(&all).unwrap();
    let mut res = vec![0.0; target.size().unwrap()];
    for (comb, value) in joint {
        res[target.index_of(&comb.restrict(&positions))] += value;
    }
    let total: f64 = res.iter().sum();
    res.iter().map(|v| v / total).collect()
}

pub fn brute_force_marginal(graph: &FactorGraph, name: &str) -> Vec<f64> {
    let target = Group::single(graph.find_variable(name).unwrap().clone());
    brute_force_joint(graph, &target)
}

/// Most likely values of the hidden variables given the evidence, by enumeration.
pub fn brute_force_map(graph: &FactorGraph) -> Combination {
    let hidden = graph.hidden_group();
    let (all, joint) = consistent_joint(graph);
    let positions = hidden.positions_in(&all).unwrap();
    let (best, _) = joint
        .into_iter()
        .fold((None, f64::NEG_INFINITY), |(best, max), (comb, value)| {
            if value > max {
                (Some(comb), value)
            } else {
                (best, max)
            }
        });
    best.unwrap().restrict(&positions)
}
