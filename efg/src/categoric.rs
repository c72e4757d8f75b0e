//! Categoric variables, their joint assignments (combinations) and ensembles (groups).

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Variable {0} has an empty domain.")]
    EmptyDomain(String),
    #[error("Variable {0} appears more than once in the group.")]
    DuplicateName(String),
    #[error("Replacement group has {got} variables, expected {expected}.")]
    ReplacementLength { expected: usize, got: usize },
    #[error("Replacement changes the domain size at position {position}: got {got}, expected {expected}.")]
    ReplacementDomain {
        position: usize,
        expected: usize,
        got: usize,
    },
    #[error("The joint domain size does not fit in usize.")]
    DomainOverflow,
    #[error("Variable {0} is not part of the group.")]
    MissingVariable(String),
    #[error("Variable {name} has size {got}, expected {expected}.")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Combination of length {got} for a group of {expected} variables.")]
    CombinationLength { expected: usize, got: usize },
    #[error("Value {value} is out of the domain of variable {name} (size {size}).")]
    OutOfDomain {
        name: String,
        value: usize,
        size: usize,
    },
}

type Result<T> = std::result::Result<T, GroupError>;

/// A named categoric variable with domain `0..size`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Variable {
    name: String,
    size: usize,
}

impl Variable {
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(GroupError::EmptyDomain(name));
        }
        Ok(Self { name, size })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.size)
    }
}

/// One value per variable of a group, in the group's variable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Combination(Vec<usize>);

impl Combination {
    pub fn new(values: Vec<usize>) -> Self {
        Self(values)
    }
    pub fn data(&self) -> &[usize] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Sub-combination made of the values found at `positions`.
    pub fn restrict(&self, positions: &[usize]) -> Self {
        Self(positions.iter().map(|p| self.0[*p]).collect())
    }
}

impl From<Vec<usize>> for Combination {
    fn from(values: Vec<usize>) -> Self {
        Self(values)
    }
}

impl std::ops::Index<usize> for Combination {
    type Output = usize;
    fn index(&self, index: usize) -> &usize {
        &self.0[index]
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0.iter().join(" "))
    }
}

/// An ensemble of variables with unique names.
///
/// Variables keep their insertion order, which is the order used to index combinations.
/// Two groups are equal when they contain the same variables, whatever their order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Variable>", into = "Vec<Variable>")]
pub struct Group {
    variables: Vec<Variable>,
}

impl Group {
    pub fn new(variables: impl IntoIterator<Item = Variable>) -> Result<Self> {
        let mut group = Self::default();
        for var in variables {
            group.add(var)?;
        }
        Ok(group)
    }
    /// Build a group from variables already known to have distinct names.
    pub(crate) fn from_distinct(variables: Vec<Variable>) -> Self {
        Self { variables }
    }
    pub fn single(variable: Variable) -> Self {
        Self {
            variables: vec![variable],
        }
    }
    /// Append a variable. Fails if a variable with the same name is already part of the group.
    pub fn add(&mut self, variable: Variable) -> Result<()> {
        if self.find(variable.name()).is_some() {
            return Err(GroupError::DuplicateName(variable.name));
        }
        self.variables.push(variable);
        Ok(())
    }
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
    pub fn len(&self) -> usize {
        self.variables.len()
    }
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
        self.variables.iter()
    }
    pub fn names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name()).collect()
    }
    /// Size of the joint domain, the product of the variable sizes.
    pub fn size(&self) -> Result<usize> {
        self.variables
            .iter()
            .try_fold(1usize, |acc, v| acc.checked_mul(v.size))
            .ok_or(GroupError::DomainOverflow)
    }
    /// Position of the variable named `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name() == name)
    }
    pub fn contains(&self, variable: &Variable) -> bool {
        self.find(variable.name())
            .is_some_and(|p| self.variables[p].size == variable.size)
    }
    /// Position of `variable`, checking that sizes agree.
    pub fn position_of(&self, variable: &Variable) -> Result<usize> {
        let position = self
            .find(variable.name())
            .ok_or_else(|| GroupError::MissingVariable(variable.name.clone()))?;
        let found = &self.variables[position];
        if found.size != variable.size {
            return Err(GroupError::SizeMismatch {
                name: variable.name.clone(),
                expected: found.size,
                got: variable.size,
            });
        }
        Ok(position)
    }
    /// Positions of the variables of `self` inside `super_group`.
    pub fn positions_in(&self, super_group: &Group) -> Result<Vec<usize>> {
        self.variables
            .iter()
            .map(|v| super_group.position_of(v))
            .collect()
    }
    /// Variables of `self` followed by the variables of `other` that are not in `self`.
    pub fn union(&self, other: &Group) -> Result<Group> {
        let mut res = self.clone();
        for var in other.iter() {
            match self.find(var.name()) {
                Some(_) => {
                    self.position_of(var)?;
                }
                None => res.variables.push(var.clone()),
            }
        }
        Ok(res)
    }
    /// Variables of `self` whose name does not appear in `other`.
    pub fn difference(&self, other: &Group) -> Group {
        Group {
            variables: self
                .variables
                .iter()
                .filter(|v| other.find(v.name()).is_none())
                .cloned()
                .collect(),
        }
    }
    /// Replace the variables of the group. The new variables must have, position by position,
    /// the same sizes as the previous ones.
    pub fn replace_variables(&mut self, variables: Vec<Variable>) -> Result<()> {
        if variables.len() != self.variables.len() {
            return Err(GroupError::ReplacementLength {
                expected: self.variables.len(),
                got: variables.len(),
            });
        }
        for (position, (new, old)) in variables.iter().zip(self.variables.iter()).enumerate() {
            if new.size != old.size {
                return Err(GroupError::ReplacementDomain {
                    position,
                    expected: old.size,
                    got: new.size,
                });
            }
        }
        let replaced = Group::new(variables)?;
        *self = replaced;
        Ok(())
    }
    /// Check that `comb` is a valid combination of this group.
    pub fn check(&self, comb: &Combination) -> Result<()> {
        if comb.len() != self.len() {
            return Err(GroupError::CombinationLength {
                expected: self.len(),
                got: comb.len(),
            });
        }
        for (var, value) in self.variables.iter().zip(comb.data()) {
            if *value >= var.size {
                return Err(GroupError::OutOfDomain {
                    name: var.name.clone(),
                    value: *value,
                    size: var.size,
                });
            }
        }
        Ok(())
    }
    /// Rank of `comb` in the enumeration order of `range`.
    pub fn index_of(&self, comb: &Combination) -> usize {
        self.variables
            .iter()
            .zip(comb.data())
            .fold(0, |acc, (v, x)| acc * v.size + x)
    }
    /// Combination of rank `index` in the enumeration order of `range`.
    pub fn combination_at(&self, mut index: usize) -> Combination {
        let mut values = vec![0; self.len()];
        for (value, var) in values.iter_mut().zip(self.variables.iter()).rev() {
            *value = index % var.size;
            index /= var.size;
        }
        Combination(values)
    }
    /// Lazy enumeration of the joint domain.
    pub fn range(&self) -> GroupRange {
        GroupRange::new(self)
    }
    fn sorted(&self) -> Vec<&Variable> {
        self.variables.iter().sorted().collect()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl Eq for Group {}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.variables.iter().join(", "))
    }
}

impl TryFrom<Vec<Variable>> for Group {
    type Error = GroupError;
    fn try_from(variables: Vec<Variable>) -> Result<Self> {
        Self::new(variables)
    }
}

impl From<Group> for Vec<Variable> {
    fn from(group: Group) -> Self {
        group.variables
    }
}

impl<'a> IntoIterator for &'a Group {
    type Item = &'a Variable;
    type IntoIter = std::slice::Iter<'a, Variable>;
    fn into_iter(self) -> Self::IntoIter {
        self.variables.iter()
    }
}

/// Enumerates every combination of a group in lexicographic order, the last variable
/// varying fastest. Cloning or calling `reset` restarts the enumeration.
#[derive(Debug, Clone)]
pub struct GroupRange {
    sizes: Vec<usize>,
    current: Option<Vec<usize>>,
}

impl GroupRange {
    pub fn new(group: &Group) -> Self {
        let sizes: Vec<usize> = group.iter().map(|v| v.size()).collect();
        Self {
            current: Some(vec![0; sizes.len()]),
            sizes,
        }
    }
    pub fn reset(&mut self) {
        self.current = Some(vec![0; self.sizes.len()]);
    }
    /// Current combination, None once the enumeration is over.
    pub fn current(&self) -> Option<Combination> {
        self.current.clone().map(Combination)
    }
    fn advance(&mut self) {
        if let Some(values) = self.current.as_mut() {
            for (value, size) in values.iter_mut().zip(self.sizes.iter()).rev() {
                *value += 1;
                if *value < *size {
                    return;
                }
                *value = 0;
            }
            self.current = None;
        }
    }
}

impl Iterator for GroupRange {
    type Item = Combination;
    fn next(&mut self) -> Option<Combination> {
        let res = self.current()?;
        self.advance();
        Some(res)
    }
}
