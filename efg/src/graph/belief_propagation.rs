//! Belief propagation over the hidden part of a factor graph.
//!
//! Messages only flow between hidden variables: factors towards observed variables are folded
//! into the potential of their hidden endpoint. Each connected component is handled on its
//! own. Trees are solved exactly by a sweep towards a root followed by a sweep back to the
//! leaves. Components with cycles are iterated with synchronous sweeps until the messages
//! stop moving.

use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::Array1;
use tracing::{debug, warn};

use super::bp_compute;
use super::factor_graph::FactorGraph;
use super::{InferenceError, VarId};
use crate::categoric::{Combination, Group, GroupError};
use crate::distribution::Factor;
use crate::utils::normalize_in_place;

type Result<T> = std::result::Result<T, InferenceError>;

type Messages = IndexMap<(VarId, VarId), Array1<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropagationKind {
    /// Marginal probabilities.
    #[default]
    SumProduct,
    /// Max-marginals, for maximum a posteriori estimation.
    MaxProduct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropagationConfig {
    /// Maximum number of sweeps on a component with cycles.
    pub max_iterations: usize,
    /// Convergence threshold on the largest L1 change of a message during a sweep.
    pub tolerance: f64,
    /// Fraction of the previous message kept at each sweep, in `[0, 1)`.
    pub damping: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-6,
            damping: 0.0,
        }
    }
}

impl PropagationConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }
    fn check(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(InferenceError::InvalidParameter("max_iterations must be positive"));
        }
        if !(self.tolerance > 0.0) {
            return Err(InferenceError::InvalidParameter("tolerance must be positive"));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(InferenceError::InvalidParameter("damping must be in [0, 1)"));
        }
        Ok(())
    }
}

/// Outcome of the last propagation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PropagationReport {
    /// True if at least one component has cycles.
    pub loopy: bool,
    /// Largest number of sweeps over the components with cycles.
    pub iterations: usize,
    /// Largest message change during the last sweep of the components with cycles.
    pub max_delta: f64,
}

/// Result of a propagation: messages between hidden variables and per-variable beliefs.
#[derive(Debug)]
pub(crate) struct Propagation {
    potentials: Vec<Array1<f64>>,
    messages: Messages,
    beliefs: Vec<Array1<f64>>,
    report: PropagationReport,
}

impl FactorGraph {
    /// Run (or fetch from the cache) the propagation for the current state of the graph.
    pub(crate) fn propagate(&mut self, kind: PropagationKind) -> Result<Arc<Propagation>> {
        self.refresh_tables();
        let key = self.state_key(kind);
        if let Some((cached_key, propagation)) = &self.last_propagation {
            if *cached_key == key {
                return Ok(propagation.clone());
            }
        }
        self.propagation_config.check()?;
        let propagation = Arc::new(run(self, kind)?);
        self.last_propagation = Some((key, propagation.clone()));
        Ok(propagation)
    }

    pub fn last_propagation_report(&self) -> Option<PropagationReport> {
        self.last_propagation.as_ref().map(|(_, p)| p.report)
    }

    /// Marginal probabilities of variable `name` given the evidence.
    pub fn marginal(&mut self, name: &str) -> Result<Vec<f64>> {
        let id = self.var_id(name)?;
        let propagation = self.propagate(PropagationKind::SumProduct)?;
        Ok(propagation.beliefs[id].to_vec())
    }

    /// Joint probabilities of the variables of `group` given the evidence, as an explicit
    /// factor over `group`.
    ///
    /// When the hidden members are connected, the joint is the product of their potentials,
    /// of the factors between them and of the messages entering the group. Otherwise it is
    /// built with the chain rule, conditioning a copy of the graph on one member at a time.
    /// Both are exact on trees.
    pub fn joint_marginal(&mut self, group: &Group) -> Result<Factor> {
        let ids = group
            .iter()
            .map(|var| -> Result<VarId> {
                let id = self.var_id(var.name())?;
                let size = self.nodes[id].variable.size();
                if size != var.size() {
                    return Err(GroupError::SizeMismatch {
                        name: var.name().to_owned(),
                        expected: size,
                        got: var.size(),
                    }
                    .into());
                }
                Ok(id)
            })
            .collect::<Result<Vec<_>>>()?;
        group.size()?;
        let hidden: Vec<VarId> = ids
            .iter()
            .copied()
            .filter(|id| !self.is_observed(*id))
            .collect();
        let mut values = if self.is_connected(&hidden) {
            self.cluster_joint(group, &ids)?
        } else {
            debug!(group = %group, "joint marginal by conditioning");
            let mut values = Vec::new();
            self.clone().chain_rule_joint(&ids, 1.0, &mut values)?;
            values
        };
        if !normalize_in_place(&mut values) {
            return Err(InferenceError::Degenerate(group.to_string()));
        }
        Ok(Factor::from_dense(group.clone(), &values)?)
    }

    /// True if `ids` induce a connected subgraph of the hidden subgraph.
    fn is_connected(&self, ids: &[VarId]) -> bool {
        let Some(first) = ids.first() else {
            return true;
        };
        let mut reached = vec![*first];
        let mut next = 0;
        while next < reached.len() {
            for w in self.nodes[reached[next]].active.iter() {
                if ids.contains(w) && !reached.contains(w) {
                    reached.push(*w);
                }
            }
            next += 1;
        }
        reached.len() == ids.len()
    }

    /// Unnormalized joint of a group whose hidden members are connected, in `group.range()`
    /// order.
    fn cluster_joint(&mut self, group: &Group, ids: &[VarId]) -> Result<Vec<f64>> {
        let propagation = self.propagate(PropagationKind::SumProduct)?;
        let locals: Vec<Array1<f64>> = ids
            .iter()
            .map(|id| match self.evidence.get(id) {
                Some(value) => bp_compute::one_hot(self.nodes[*id].variable.size(), *value),
                None => {
                    let mut local = propagation.potentials[*id].clone();
                    for w in self.nodes[*id].active.iter().filter(|w| !ids.contains(*w)) {
                        local *= &propagation.messages[&(*w, *id)];
                    }
                    local
                }
            })
            .collect();
        let mut internal = Vec::new();
        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate().skip(i + 1) {
                if self.is_observed(*a) || self.is_observed(*b) {
                    continue;
                }
                if let Some(f) = self.nodes[*a].connections.get(b) {
                    internal.push((i, j, self.factors[*f].pair(*a)));
                }
            }
        }
        Ok(group
            .range()
            .map(|comb| {
                let x = comb.data();
                let local: f64 = locals.iter().zip(x).map(|(l, v)| l[*v]).product();
                internal
                    .iter()
                    .fold(local, |acc, (i, j, table)| acc * table[[x[*i], x[*j]]])
            })
            .collect())
    }

    /// Append to `values` the joint of `ids` scaled by `mass`, in lexicographic order, as
    /// `P(x_0) P(x_1 | x_0) ...`. The evidence of the graph is modified along the way.
    fn chain_rule_joint(&mut self, ids: &[VarId], mass: f64, values: &mut Vec<f64>) -> Result<()> {
        let Some((id, rest)) = ids.split_first() else {
            values.push(mass);
            return Ok(());
        };
        let block: usize = rest
            .iter()
            .map(|r| self.nodes[*r].variable.size())
            .product();
        let observed = self.evidence.get(id).copied();
        let marginal = match observed {
            Some(value) => bp_compute::one_hot(self.nodes[*id].variable.size(), value),
            None => self.propagate(PropagationKind::SumProduct)?.beliefs[*id].clone(),
        };
        for (value, p) in marginal.iter().enumerate() {
            if *p == 0.0 {
                values.extend(std::iter::repeat(0.0).take(block));
                continue;
            }
            if observed.is_none() {
                self.insert_evidence(*id, value);
            }
            self.chain_rule_joint(rest, mass * p, values)?;
        }
        if observed.is_none() {
            self.drop_evidence(*id);
        }
        Ok(())
    }

    /// Most likely value of `name` according to its max-marginal.
    pub fn map_estimate(&mut self, name: &str) -> Result<usize> {
        let id = self.var_id(name)?;
        let propagation = self.propagate(PropagationKind::MaxProduct)?;
        Ok(bp_compute::argmax(propagation.beliefs[id].view()))
    }

    /// Most likely values of the hidden variables, in `hidden_group` order.
    pub fn hidden_set_map(&mut self) -> Result<Combination> {
        let propagation = self.propagate(PropagationKind::MaxProduct)?;
        Ok(Combination::new(
            self.hidden_ids()
                .into_iter()
                .map(|id| bp_compute::argmax(propagation.beliefs[id].view()))
                .collect(),
        ))
    }
}

fn run(graph: &FactorGraph, kind: PropagationKind) -> Result<Propagation> {
    let n_vars = graph.nodes.len();
    let potentials: Vec<Array1<f64>> = (0..n_vars).map(|id| graph.potential(id)).collect();
    let mut messages = Messages::new();
    let mut report = PropagationReport::default();
    let mut visited = vec![false; n_vars];
    for root in graph.hidden_ids() {
        if visited[root] {
            continue;
        }
        let order = propagation_order(graph, root, &mut visited);
        let n_edges = order
            .iter()
            .map(|(v, _)| graph.nodes[*v].active.len())
            .sum::<usize>()
            / 2;
        if n_edges + 1 == order.len() {
            propagate_acyclic(graph, &potentials, &order, kind, &mut messages)?;
        } else {
            let (iterations, delta) =
                propagate_loopy(graph, &potentials, &order, kind, &mut messages)?;
            report.loopy = true;
            report.iterations = report.iterations.max(iterations);
            report.max_delta = report.max_delta.max(delta);
        }
    }
    let beliefs = (0..n_vars)
        .map(|id| match graph.evidence.get(&id) {
            Some(value) => Ok(bp_compute::one_hot(potentials[id].len(), *value)),
            None => {
                let mut belief = potentials[id].clone();
                for w in graph.nodes[id].active.iter() {
                    belief *= &messages[&(*w, id)];
                }
                bp_compute::normalized(belief).ok_or_else(|| degenerate(graph, id))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Propagation {
        potentials,
        messages,
        beliefs,
        report,
    })
}

fn degenerate(graph: &FactorGraph, id: VarId) -> InferenceError {
    InferenceError::Degenerate(graph.nodes[id].variable.name().to_owned())
}

/// Breadth-first order of the component of `root` in the hidden subgraph, with the parent of
/// each variable.
fn propagation_order(
    graph: &FactorGraph,
    root: VarId,
    visited: &mut [bool],
) -> Vec<(VarId, Option<VarId>)> {
    let mut order = vec![(root, None)];
    visited[root] = true;
    let mut next = 0;
    while next < order.len() {
        let (var, _) = order[next];
        for neighbour in graph.nodes[var].active.iter() {
            if !visited[*neighbour] {
                visited[*neighbour] = true;
                order.push((*neighbour, Some(var)));
            }
        }
        next += 1;
    }
    order
}

fn compute_message(
    graph: &FactorGraph,
    potentials: &[Array1<f64>],
    messages: &Messages,
    from: VarId,
    to: VarId,
    kind: PropagationKind,
) -> Result<Array1<f64>> {
    let node = &graph.nodes[from];
    let mut prod = potentials[from].clone();
    for w in node.active.iter().filter(|w| **w != to) {
        prod *= &messages[&(*w, from)];
    }
    let table = graph.factors[node.connections[&to]].pair(from);
    bp_compute::normalized(bp_compute::message(prod.view(), table, kind))
        .ok_or_else(|| degenerate(graph, from))
}

fn propagate_acyclic(
    graph: &FactorGraph,
    potentials: &[Array1<f64>],
    order: &[(VarId, Option<VarId>)],
    kind: PropagationKind,
    messages: &mut Messages,
) -> Result<()> {
    for (var, parent) in order.iter().rev() {
        if let Some(parent) = parent {
            let msg = compute_message(graph, potentials, messages, *var, *parent, kind)?;
            messages.insert((*var, *parent), msg);
        }
    }
    for (var, parent) in order.iter() {
        for child in graph.nodes[*var].active.iter() {
            if Some(*child) != *parent {
                let msg = compute_message(graph, potentials, messages, *var, *child, kind)?;
                messages.insert((*var, *child), msg);
            }
        }
    }
    Ok(())
}

/// Returns the number of sweeps and the last largest message change.
fn propagate_loopy(
    graph: &FactorGraph,
    potentials: &[Array1<f64>],
    order: &[(VarId, Option<VarId>)],
    kind: PropagationKind,
    messages: &mut Messages,
) -> Result<(usize, f64)> {
    let config = &graph.propagation_config;
    let edges: Vec<(VarId, VarId)> = order
        .iter()
        .flat_map(|(v, _)| graph.nodes[*v].active.iter().map(move |w| (*v, *w)))
        .collect();
    let mut current: Messages = edges
        .iter()
        .map(|(v, w)| ((*v, *w), bp_compute::uniform(graph.nodes[*w].variable.size())))
        .collect();
    let mut delta = f64::INFINITY;
    for iteration in 1..=config.max_iterations {
        let next = graph.executor.try_map(edges.len(), |i| {
            let (from, to) = edges[i];
            compute_message(graph, potentials, &current, from, to, kind)
        })?;
        delta = 0.0;
        for (old, mut new) in current.values_mut().zip(next) {
            if config.damping > 0.0 {
                bp_compute::damp(&mut new, old.view(), config.damping);
            }
            delta = f64::max(delta, bp_compute::l1_distance(old.view(), new.view()));
            *old = new;
        }
        if delta < config.tolerance {
            debug!(iterations = iteration, delta, "loopy propagation converged");
            messages.extend(current);
            return Ok((iteration, delta));
        }
    }
    warn!(
        iterations = config.max_iterations,
        delta, "loopy propagation did not converge"
    );
    Err(InferenceError::NotConverged {
        iterations: config.max_iterations,
        delta,
    })
}
