use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::belief_propagation::{Propagation, PropagationConfig, PropagationKind};
use super::{FactorId, GraphError, InferenceError, NamedList, VarId};
use crate::categoric::{Combination, Group, Variable};
use crate::distribution::{Factor, SharedWeight};
use crate::executor::Executor;

type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) variable: Variable,
    pub(crate) unary: Vec<FactorId>,
    /// Every binary connection, neighbour -> factor.
    pub(crate) connections: IndexMap<VarId, FactorId>,
    /// Neighbours that are hidden.
    pub(crate) active: Vec<VarId>,
    /// Neighbours that are observed.
    pub(crate) disabled: Vec<VarId>,
}

impl Node {
    fn new(variable: Variable) -> Self {
        Self {
            variable,
            unary: Vec::new(),
            connections: IndexMap::new(),
            active: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

/// Dense evaluation of a factor. Binary tables are indexed in the factor's variable order.
#[derive(Debug, Clone)]
pub(crate) enum Table {
    Unary(Array1<f64>),
    Binary(Array2<f64>),
}

impl Table {
    fn build(factor: &Factor) -> Self {
        let sizes: Vec<usize> = factor.group().iter().map(|v| v.size()).collect();
        match sizes.as_slice() {
            [n] => Table::Unary(Array1::from_shape_fn(*n, |a| {
                factor.evaluate(&Combination::new(vec![a]))
            })),
            [n0, n1] => Table::Binary(Array2::from_shape_fn((*n0, *n1), |(a, b)| {
                factor.evaluate(&Combination::new(vec![a, b]))
            })),
            _ => unreachable!("factor arity is checked on insertion"),
        }
    }
}

/// A value derived from a tunable weight, with the weight version it was computed against.
#[derive(Debug, Clone)]
struct Cached<T> {
    version: u64,
    value: T,
}

#[derive(Debug, Clone)]
pub(crate) struct FactorEntry {
    pub(crate) factor: Factor,
    /// Variables of the factor, in the factor's group order.
    pub(crate) vars: Vec<VarId>,
    /// Index of the tunable cluster, None for constant factors.
    pub(crate) cluster: Option<usize>,
    table: Cached<Table>,
}

impl FactorEntry {
    fn new(factor: Factor, vars: Vec<VarId>, cluster: Option<usize>) -> Self {
        let table = Cached {
            version: weight_version(&factor),
            value: Table::build(&factor),
        };
        Self {
            factor,
            vars,
            cluster,
            table,
        }
    }
    fn refresh(&mut self) {
        let version = weight_version(&self.factor);
        if version != self.table.version {
            self.table = Cached {
                version,
                value: Table::build(&self.factor),
            };
        }
    }
    pub(crate) fn table(&self) -> &Table {
        &self.table.value
    }
    pub(crate) fn unary(&self) -> ArrayView1<'_, f64> {
        match &self.table.value {
            Table::Unary(t) => t.view(),
            Table::Binary(_) => unreachable!("not a unary factor"),
        }
    }
    /// Binary table with the axis of `from` first.
    pub(crate) fn pair(&self, from: VarId) -> ArrayView2<'_, f64> {
        match &self.table.value {
            Table::Binary(t) if self.vars[0] == from => t.view(),
            Table::Binary(t) => t.view().reversed_axes(),
            Table::Unary(_) => unreachable!("not a binary factor"),
        }
    }
}

fn weight_version(factor: &Factor) -> u64 {
    factor.shared_weight().map(|w| w.version()).unwrap_or(0)
}

/// Factors bound to the same tunable weight.
#[derive(Debug)]
pub(crate) struct TunableCluster {
    pub(crate) weight: SharedWeight,
    pub(crate) factors: Vec<FactorId>,
}

/// Everything the result of a propagation depends on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StateKey {
    structure: u64,
    evidence: u64,
    weights: Vec<u64>,
    kind: PropagationKind,
    config: PropagationConfig,
}

/// A graph of categoric variables connected by unary and binary factors, with evidence.
///
/// Tunable factors are grouped in clusters sharing one weight; `weights` and `set_weights`
/// address clusters in insertion order.
#[derive(Debug)]
pub struct FactorGraph {
    pub(crate) nodes: NamedList<Node>,
    pub(crate) factors: Vec<FactorEntry>,
    pub(crate) tunables: Vec<TunableCluster>,
    pub(crate) evidence: IndexMap<VarId, usize>,
    pub(crate) propagation_config: PropagationConfig,
    pub(crate) executor: Executor,
    structure_epoch: u64,
    evidence_epoch: u64,
    pub(crate) last_propagation: Option<(StateKey, Arc<Propagation>)>,
}

impl Default for FactorGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FactorGraph {
    /// The clone owns its own tunable weights, initialized to the current values.
    fn clone(&self) -> Self {
        let tunables: Vec<TunableCluster> = self
            .tunables
            .iter()
            .map(|c| TunableCluster {
                weight: c.weight.detached(),
                factors: c.factors.clone(),
            })
            .collect();
        let mut factors = self.factors.clone();
        for cluster in tunables.iter() {
            for f in cluster.factors.iter() {
                factors[*f].factor.bind_weight(cluster.weight.clone());
            }
        }
        Self {
            nodes: self.nodes.clone(),
            factors,
            tunables,
            evidence: self.evidence.clone(),
            propagation_config: self.propagation_config.clone(),
            executor: self.executor.clone(),
            structure_epoch: self.structure_epoch,
            evidence_epoch: self.evidence_epoch,
            last_propagation: self.last_propagation.clone(),
        }
    }
}

impl FactorGraph {
    pub fn new() -> Self {
        Self {
            nodes: NamedList::new(),
            factors: Vec::new(),
            tunables: Vec::new(),
            evidence: IndexMap::new(),
            propagation_config: PropagationConfig::default(),
            executor: Executor::Sequential,
            structure_epoch: 0,
            evidence_epoch: 0,
            last_propagation: None,
        }
    }

    pub fn with_executor(executor: Executor) -> Self {
        Self {
            executor,
            ..Self::new()
        }
    }
    pub fn executor(&self) -> &Executor {
        &self.executor
    }
    pub fn set_executor(&mut self, executor: Executor) {
        self.executor = executor;
    }
    pub fn propagation_config(&self) -> &PropagationConfig {
        &self.propagation_config
    }
    pub fn set_propagation_config(&mut self, config: PropagationConfig) {
        self.propagation_config = config;
    }

    /// Insert a constant factor. A tunable factor is inserted with its weight frozen to the
    /// current value.
    pub fn insert_factor(&mut self, mut factor: Factor) -> Result<()> {
        factor.freeze();
        self.insert_entry(factor, None)?;
        Ok(())
    }

    /// Insert a tunable factor, with a weight of its own.
    pub fn insert_tunable_factor(&mut self, mut factor: Factor) -> Result<()> {
        let weight = factor
            .shared_weight()
            .ok_or(GraphError::NotTunable)?
            .detached();
        factor.bind_weight(weight.clone());
        let cluster = self.tunables.len();
        let id = self.insert_entry(factor, Some(cluster))?;
        self.tunables.push(TunableCluster {
            weight,
            factors: vec![id],
        });
        Ok(())
    }

    /// Insert a tunable factor sharing the weight of the tunable factor over `group`.
    pub fn insert_tunable_factor_sharing(&mut self, mut factor: Factor, group: &Group) -> Result<()> {
        if !factor.is_tunable() {
            return Err(GraphError::NotTunable);
        }
        let cluster = self
            .factors
            .iter()
            .find(|e| e.cluster.is_some() && e.factor.group() == group)
            .and_then(|e| e.cluster)
            .ok_or_else(|| GraphError::NoTunableGroup(group.to_string()))?;
        factor.bind_weight(self.tunables[cluster].weight.clone());
        let id = self.insert_entry(factor, Some(cluster))?;
        self.tunables[cluster].factors.push(id);
        Ok(())
    }

    fn insert_entry(&mut self, factor: Factor, cluster: Option<usize>) -> Result<FactorId> {
        let vars = factor.group().variables();
        if vars.is_empty() || vars.len() > 2 {
            return Err(GraphError::FactorArity(vars.len()));
        }
        for var in vars {
            if let Some(node) = self.nodes.get(var.name()) {
                if node.variable.size() != var.size() {
                    return Err(GraphError::CardinalityMismatch {
                        name: var.name().to_owned(),
                        expected: node.variable.size(),
                        got: var.size(),
                    });
                }
            }
        }
        if let [a, b] = vars {
            if let (Some(ia), Some(ib)) = (
                self.nodes.get_index_of(a.name()),
                self.nodes.get_index_of(b.name()),
            ) {
                if self.nodes[ia].connections.contains_key(&ib) {
                    return Err(GraphError::AlreadyConnected(
                        a.name().to_owned(),
                        b.name().to_owned(),
                    ));
                }
            }
        }
        let ids: Vec<VarId> = vars.iter().map(|v| self.node_or_insert(v)).collect();
        let id = self.factors.len();
        match ids.as_slice() {
            [a] => self.nodes[*a].unary.push(id),
            [a, b] => {
                self.nodes[*a].connections.insert(*b, id);
                self.nodes[*b].connections.insert(*a, id);
            }
            _ => unreachable!(),
        }
        self.factors.push(FactorEntry::new(factor, ids, cluster));
        self.rebuild_partitions();
        self.structure_epoch += 1;
        Ok(id)
    }

    fn node_or_insert(&mut self, var: &Variable) -> VarId {
        let entry = self.nodes.entry(var.name().to_owned());
        let id = entry.index();
        entry.or_insert_with(|| Node::new(var.clone()));
        id
    }

    fn rebuild_partitions(&mut self) {
        let evidence = &self.evidence;
        for node in self.nodes.values_mut() {
            let (disabled, active): (Vec<VarId>, Vec<VarId>) = node
                .connections
                .keys()
                .copied()
                .partition(|n| evidence.contains_key(n));
            node.active = active;
            node.disabled = disabled;
        }
    }

    fn check_evidence(&self, name: &str, value: usize) -> Result<VarId> {
        self.nodes
            .get_full(name)
            .filter(|(_, _, node)| value < node.variable.size())
            .map(|(id, _, _)| id)
            .ok_or_else(|| GraphError::InvalidEvidence {
                name: name.to_owned(),
                value,
            })
    }

    fn check_evidences<'a>(
        &self,
        evidences: impl IntoIterator<Item = (&'a str, usize)>,
    ) -> Result<Vec<(VarId, usize)>> {
        evidences
            .into_iter()
            .map(|(name, value)| Ok((self.check_evidence(name, value)?, value)))
            .collect()
    }

    fn evidence_changed(&mut self) {
        self.rebuild_partitions();
        self.evidence_epoch += 1;
    }

    pub fn set_evidence(&mut self, name: &str, value: usize) -> Result<()> {
        self.set_evidences([(name, value)])
    }

    /// Add evidences to the current ones. Nothing is changed if any of them is invalid.
    pub fn set_evidences<'a>(
        &mut self,
        evidences: impl IntoIterator<Item = (&'a str, usize)>,
    ) -> Result<()> {
        let checked = self.check_evidences(evidences)?;
        self.evidence.extend(checked);
        self.evidence_changed();
        Ok(())
    }

    /// Replace the current evidences. Nothing is changed if any of them is invalid.
    pub fn reset_evidences<'a>(
        &mut self,
        evidences: impl IntoIterator<Item = (&'a str, usize)>,
    ) -> Result<()> {
        let checked = self.check_evidences(evidences)?;
        self.evidence = checked.into_iter().collect();
        self.evidence_changed();
        Ok(())
    }

    /// Remove the evidence on `name`, returning its value if it was observed.
    pub fn remove_evidence(&mut self, name: &str) -> Result<Option<usize>> {
        let id = self
            .nodes
            .get_index_of(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_owned()))?;
        let removed = self.evidence.shift_remove(&id);
        if removed.is_some() {
            self.evidence_changed();
        }
        Ok(removed)
    }

    /// Observe a known variable at a value within its domain.
    pub(crate) fn insert_evidence(&mut self, id: VarId, value: usize) {
        self.evidence.insert(id, value);
        self.evidence_changed();
    }

    pub(crate) fn drop_evidence(&mut self, id: VarId) {
        if self.evidence.shift_remove(&id).is_some() {
            self.evidence_changed();
        }
    }

    pub fn clear_evidence(&mut self) {
        if !self.evidence.is_empty() {
            self.evidence.clear();
            self.evidence_changed();
        }
    }

    pub fn evidences(&self) -> impl Iterator<Item = (&Variable, usize)> + '_ {
        self.evidence
            .iter()
            .map(|(id, value)| (&self.nodes[*id].variable, *value))
    }

    pub fn evidence_of(&self, name: &str) -> Option<usize> {
        let id = self.nodes.get_index_of(name)?;
        self.evidence.get(&id).copied()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.nodes.values().map(|n| &n.variable)
    }

    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.nodes.get(name).map(|n| &n.variable)
    }

    pub fn factors(&self) -> impl Iterator<Item = &Factor> + '_ {
        self.factors.iter().map(|e| &e.factor)
    }

    pub fn tunable_factors(&self) -> impl Iterator<Item = &Factor> + '_ {
        self.factors
            .iter()
            .filter(|e| e.cluster.is_some())
            .map(|e| &e.factor)
    }

    pub fn hidden_variables(&self) -> Vec<&Variable> {
        self.hidden_ids()
            .into_iter()
            .map(|id| &self.nodes[id].variable)
            .collect()
    }

    pub fn observed_variables(&self) -> Vec<&Variable> {
        self.nodes
            .values()
            .enumerate()
            .filter(|(id, _)| self.evidence.contains_key(id))
            .map(|(_, n)| &n.variable)
            .collect()
    }

    /// Hidden variables, in graph order.
    pub fn hidden_group(&self) -> Group {
        Group::from_distinct(self.hidden_variables().into_iter().cloned().collect())
    }

    /// Observed variables, in graph order.
    pub fn observed_group(&self) -> Group {
        Group::from_distinct(self.observed_variables().into_iter().cloned().collect())
    }

    /// All the variables, in graph order.
    pub fn group(&self) -> Group {
        Group::from_distinct(self.variables().cloned().collect())
    }

    pub fn active_neighbours(&self, name: &str) -> Result<Vec<&str>> {
        let node = self.node(name)?;
        Ok(self.names(&node.active))
    }

    pub fn disabled_neighbours(&self, name: &str) -> Result<Vec<&str>> {
        let node = self.node(name)?;
        Ok(self.names(&node.disabled))
    }

    fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_owned()))
    }

    fn names(&self, ids: &[VarId]) -> Vec<&str> {
        ids.iter()
            .map(|id| self.nodes[*id].variable.name())
            .collect()
    }

    pub(crate) fn var_id(&self, name: &str) -> std::result::Result<VarId, InferenceError> {
        self.nodes
            .get_index_of(name)
            .ok_or_else(|| InferenceError::UnknownVariable(name.to_owned()))
    }

    pub(crate) fn hidden_ids(&self) -> Vec<VarId> {
        (0..self.nodes.len())
            .filter(|id| !self.evidence.contains_key(id))
            .collect()
    }

    pub(crate) fn is_observed(&self, id: VarId) -> bool {
        self.evidence.contains_key(&id)
    }

    /// Number of tunable weights (clusters of factors sharing a weight).
    pub fn num_weights(&self) -> usize {
        self.tunables.len()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.tunables.iter().map(|c| c.weight.get()).collect()
    }

    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.tunables.len() {
            return Err(GraphError::WeightCount {
                expected: self.tunables.len(),
                got: weights.len(),
            });
        }
        for (cluster, w) in self.tunables.iter().zip(weights.iter()) {
            cluster.weight.set(*w);
        }
        Ok(())
    }

    pub fn set_ones(&mut self) {
        for cluster in self.tunables.iter() {
            cluster.weight.set(1.0);
        }
    }

    /// Bring the tables of tunable factors up to date with their weights.
    pub(crate) fn refresh_tables(&mut self) {
        for entry in self.factors.iter_mut() {
            entry.refresh();
        }
    }

    pub(crate) fn state_key(&self, kind: PropagationKind) -> StateKey {
        StateKey {
            structure: self.structure_epoch,
            evidence: self.evidence_epoch,
            weights: self.tunables.iter().map(|c| c.weight.version()).collect(),
            kind,
            config: self.propagation_config.clone(),
        }
    }

    /// Product of the unary factors of `id` and of its factors towards observed neighbours,
    /// evaluated at the observed values.
    pub(crate) fn potential(&self, id: VarId) -> Array1<f64> {
        let node = &self.nodes[id];
        let mut phi = Array1::<f64>::ones(node.variable.size());
        for f in node.unary.iter() {
            phi *= &self.factors[*f].unary();
        }
        for n in node.disabled.iter() {
            let value = self.evidence[n];
            phi *= &self.factors[node.connections[n]].pair(id).column(value);
        }
        phi
    }

    /// Unnormalized probability of a complete assignment indexed by variable id.
    pub(crate) fn assignment_value(&self, values: &[usize]) -> f64 {
        self.factors
            .iter()
            .map(|e| match e.table() {
                Table::Unary(t) => t[values[e.vars[0]]],
                Table::Binary(t) => t[[values[e.vars[0]], values[e.vars[1]]]],
            })
            .product()
    }

    /// Complete assignment with the evidences set, and 0 for hidden variables.
    pub(crate) fn evidence_assignment(&self) -> Vec<usize> {
        let mut values = vec![0; self.nodes.len()];
        for (id, value) in self.evidence.iter() {
            values[*id] = *value;
        }
        values
    }

    /// Log of the unnormalized probability of `comb`, a combination over a group containing
    /// every variable of the graph.
    pub fn log_unnormalized(
        &mut self,
        group: &Group,
        comb: &Combination,
    ) -> std::result::Result<f64, InferenceError> {
        self.refresh_tables();
        group.check(comb)?;
        let positions = self.group().positions_in(group)?;
        Ok(self
            .assignment_value(comb.restrict(&positions).data())
            .ln())
    }

    /// Log of the sum of the unnormalized probabilities of every assignment of the hidden
    /// variables, with observed variables at their evidence.
    pub fn log_partition(&mut self) -> std::result::Result<f64, InferenceError> {
        self.refresh_tables();
        let hidden_ids = self.hidden_ids();
        let hidden = self.hidden_group();
        let size = hidden.size()?;
        let base = self.evidence_assignment();
        let graph = &*self;
        let total = graph.executor.sum(size, |i| {
            let comb = hidden.combination_at(i);
            let mut values = base.clone();
            for (id, x) in hidden_ids.iter().zip(comb.data()) {
                values[*id] = *x;
            }
            graph.assignment_value(&values)
        });
        Ok(total.ln())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn var(name: &str, size: usize) -> Variable {
        Variable::new(name, size).unwrap()
    }

    fn pair(a: &Variable, b: &Variable) -> Factor {
        Factor::correlation(Group::new([a.clone(), b.clone()]).unwrap()).unwrap()
    }

    #[test]
    fn insertion_checks() {
        let (a, b, c) = (var("A", 2), var("B", 2), var("C", 2));
        let mut graph = FactorGraph::new();
        graph.insert_factor(pair(&a, &b)).unwrap();
        assert!(matches!(
            graph.insert_factor(pair(&b, &a)),
            Err(GraphError::AlreadyConnected(..))
        ));
        assert!(matches!(
            graph.insert_factor(Factor::new(Group::single(var("A", 3)))),
            Err(GraphError::CardinalityMismatch { .. })
        ));
        let triple = Factor::new(Group::new([a, b, c]).unwrap());
        assert!(matches!(
            graph.insert_factor(triple),
            Err(GraphError::FactorArity(3))
        ));
        assert_eq!(graph.variables().count(), 2);
        assert_eq!(graph.factors().count(), 1);
    }

    #[test]
    fn tables_follow_weight_versions() {
        let (a, b) = (var("A", 2), var("B", 2));
        let mut graph = FactorGraph::new();
        graph
            .insert_tunable_factor(Factor::tunable(pair(&a, &b), 1.0))
            .unwrap();
        let key = graph.state_key(PropagationKind::SumProduct);
        graph.set_weights(&[2.0]).unwrap();
        assert_ne!(key, graph.state_key(PropagationKind::SumProduct));
        graph.refresh_tables();
        assert_eq!(graph.factors[0].pair(0)[[1, 1]], 2f64.exp());
    }

    #[test]
    fn log_partition_sums_hidden_states() {
        let (a, b) = (var("A", 2), var("B", 2));
        let mut graph = FactorGraph::new();
        graph
            .insert_tunable_factor(Factor::tunable(pair(&a, &b), 1.0))
            .unwrap();
        let e = 1f64.exp();
        assert_relative_eq!(graph.log_partition().unwrap(), (2.0 * e + 2.0).ln(), epsilon = 1e-12);
        graph.set_executor(Executor::with_threads(3).unwrap());
        assert_relative_eq!(graph.log_partition().unwrap(), (2.0 * e + 2.0).ln(), epsilon = 1e-12);
        graph.set_evidence("A", 1).unwrap();
        assert_relative_eq!(graph.log_partition().unwrap(), (e + 1.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn clone_owns_weights() {
        let (a, b) = (var("A", 2), var("B", 2));
        let mut graph = FactorGraph::new();
        graph
            .insert_tunable_factor(Factor::tunable(pair(&a, &b), 1.0))
            .unwrap();
        let copy = graph.clone();
        graph.set_weights(&[3.0]).unwrap();
        assert_eq!(copy.weights(), vec![1.0]);
        assert_eq!(copy.factors[0].factor.weight(), Some(1.0));
    }
}
