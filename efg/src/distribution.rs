//! Factors: maps from the combinations of a group to non-negative reals.
//!
//! A factor stores a sparse table of raw images and an [`Evaluator`] that turns a raw image
//! into the value seen by inference. Explicit factors return the raw image. Exponential
//! factors return `exp(w * raw)`, with `w` either a constant or a [`SharedWeight`] that
//! training can modify.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::categoric::{Combination, Group, GroupError, Variable};

#[derive(Debug, Clone, Error)]
pub enum FactorError {
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error("Images can only be added to explicit factors.")]
    NotExplicit,
    #[error("Factor is not tunable.")]
    NotTunable,
    #[error("Invalid image {0}: images must be finite and non-negative.")]
    InvalidImage(f64),
    #[error("Correlation factors require variables of equal size.")]
    CorrelationSizes,
    #[error("Cannot merge an empty list of factors.")]
    EmptyMerge,
    #[error("Wrong table size: got {got}, expected {expected}.")]
    TableSize { expected: usize, got: usize },
}

type Result<T> = std::result::Result<T, FactorError>;

#[derive(Debug)]
struct WeightCell {
    bits: AtomicU64,
    version: AtomicU64,
}

/// Handle on a tunable weight, shared by every factor bound to it.
///
/// Each `set` bumps a version counter, which tables derived from the weight compare against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct SharedWeight(Arc<WeightCell>);

impl SharedWeight {
    pub fn new(value: f64) -> Self {
        Self::with_version(value, 0)
    }
    pub(crate) fn with_version(value: f64, version: u64) -> Self {
        Self(Arc::new(WeightCell {
            bits: AtomicU64::new(value.to_bits()),
            version: AtomicU64::new(version),
        }))
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.bits.load(Ordering::Acquire))
    }
    pub fn set(&self, value: f64) {
        self.0.bits.store(value.to_bits(), Ordering::Release);
        self.0.version.fetch_add(1, Ordering::AcqRel);
    }
    pub fn version(&self) -> u64 {
        self.0.version.load(Ordering::Acquire)
    }
    /// True if both handles refer to the same weight.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
    /// A new, independent weight with the same value and version.
    pub(crate) fn detached(&self) -> Self {
        Self::with_version(self.get(), self.version())
    }
}

impl From<f64> for SharedWeight {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<SharedWeight> for f64 {
    fn from(w: SharedWeight) -> Self {
        w.get()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Evaluator {
    /// Value is the raw image.
    Explicit,
    /// Value is `exp(weight * raw)`, with a constant weight.
    Exponential { weight: f64 },
    /// Value is `exp(weight * raw)`, with a tunable weight.
    Tunable(SharedWeight),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    group: Group,
    images: BTreeMap<Combination, f64>,
    evaluator: Evaluator,
}

impl Factor {
    /// Explicit factor over `group` with every image equal to zero.
    pub fn new(group: Group) -> Self {
        Self {
            group,
            images: BTreeMap::new(),
            evaluator: Evaluator::Explicit,
        }
    }

    /// Explicit factor equal to 1 on the combinations where all the variables take the same
    /// value, 0 elsewhere.
    pub fn correlation(group: Group) -> Result<Self> {
        Self::correlation_impl(group, false)
    }

    /// Complement of [`Factor::correlation`].
    pub fn anti_correlation(group: Group) -> Result<Self> {
        Self::correlation_impl(group, true)
    }

    fn correlation_impl(group: Group, anti: bool) -> Result<Self> {
        let size = group
            .iter()
            .next()
            .map(|v| v.size())
            .ok_or(FactorError::CorrelationSizes)?;
        if group.iter().any(|v| v.size() != size) {
            return Err(FactorError::CorrelationSizes);
        }
        let mut res = Self::new(group);
        let range = res.group.range();
        for comb in range {
            let equal = comb.data().iter().all(|x| *x == comb[0]);
            if equal != anti {
                res.images.insert(comb, 1.0);
            }
        }
        Ok(res)
    }

    /// Exponential factor with constant weight, whose raw images are taken from `shape`.
    pub fn exponential(shape: Factor, weight: f64) -> Self {
        Self {
            group: shape.group,
            images: shape.images,
            evaluator: Evaluator::Exponential { weight },
        }
    }

    /// Exponential factor with a tunable weight, whose raw images are taken from `shape`.
    pub fn tunable(shape: Factor, weight: f64) -> Self {
        Self {
            group: shape.group,
            images: shape.images,
            evaluator: Evaluator::Tunable(SharedWeight::new(weight)),
        }
    }

    /// Explicit factor from a dense table enumerated in `group.range()` order.
    pub fn from_dense(group: Group, values: &[f64]) -> Result<Self> {
        let expected = group.size()?;
        if values.len() != expected {
            return Err(FactorError::TableSize {
                expected,
                got: values.len(),
            });
        }
        let mut res = Self::new(group);
        for (comb, value) in res.group.range().zip(values.iter()) {
            check_image(*value)?;
            if *value != 0.0 {
                res.images.insert(comb, *value);
            }
        }
        Ok(res)
    }

    pub fn group(&self) -> &Group {
        &self.group
    }
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
    pub fn is_tunable(&self) -> bool {
        matches!(self.evaluator, Evaluator::Tunable(_))
    }
    pub fn shared_weight(&self) -> Option<&SharedWeight> {
        match &self.evaluator {
            Evaluator::Tunable(w) => Some(w),
            _ => None,
        }
    }
    /// Weight of an exponential factor, None for explicit ones.
    pub fn weight(&self) -> Option<f64> {
        match &self.evaluator {
            Evaluator::Explicit => None,
            Evaluator::Exponential { weight } => Some(*weight),
            Evaluator::Tunable(w) => Some(w.get()),
        }
    }
    pub fn set_weight(&self, weight: f64) -> Result<()> {
        self.shared_weight()
            .ok_or(FactorError::NotTunable)?
            .set(weight);
        Ok(())
    }
    /// Bind a tunable factor to `weight`. No-op on other factors.
    pub(crate) fn bind_weight(&mut self, weight: SharedWeight) {
        if let Evaluator::Tunable(w) = &mut self.evaluator {
            *w = weight;
        }
    }
    /// Turn a tunable factor into a constant exponential one with the current weight.
    pub(crate) fn freeze(&mut self) {
        if let Evaluator::Tunable(w) = &self.evaluator {
            self.evaluator = Evaluator::Exponential { weight: w.get() };
        }
    }

    /// Set the raw image of `comb`.
    pub fn add(&mut self, comb: Combination, value: f64) -> Result<()> {
        if !matches!(self.evaluator, Evaluator::Explicit) {
            return Err(FactorError::NotExplicit);
        }
        self.group.check(&comb)?;
        check_image(value)?;
        self.images.insert(comb, value);
        Ok(())
    }

    /// Set the raw image of every combination of the group to `value`.
    pub fn emplace_entire_domain(&mut self, value: f64) -> Result<()> {
        if !matches!(self.evaluator, Evaluator::Explicit) {
            return Err(FactorError::NotExplicit);
        }
        check_image(value)?;
        self.group.size()?;
        self.images = self.group.range().map(|c| (c, value)).collect();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }

    /// Raw image of `comb` (0 if not set).
    pub fn find(&self, comb: &Combination) -> f64 {
        self.images.get(comb).copied().unwrap_or(0.0)
    }

    /// Value of `comb`, a combination of the factor's own group.
    pub fn evaluate(&self, comb: &Combination) -> f64 {
        let raw = self.find(comb);
        match &self.evaluator {
            Evaluator::Explicit => raw,
            Evaluator::Exponential { weight } => (weight * raw).exp(),
            Evaluator::Tunable(w) => (w.get() * raw).exp(),
        }
    }

    /// Value of `comb`, a combination of `group` which must contain the factor's group.
    pub fn evaluate_in(&self, comb: &Combination, group: &Group) -> Result<f64> {
        let positions = self.group.positions_in(group)?;
        Ok(self.evaluate(&comb.restrict(&positions)))
    }

    /// Raw images that were explicitly set.
    pub fn images(&self) -> impl Iterator<Item = (&Combination, f64)> + '_ {
        self.images.iter().map(|(c, v)| (c, *v))
    }

    /// Every combination of the group with its value.
    pub fn evaluations(&self) -> impl Iterator<Item = (Combination, f64)> + '_ {
        self.group.range().map(|c| {
            let v = self.evaluate(&c);
            (c, v)
        })
    }

    /// Product of `factors`, as an explicit factor over the union of their groups.
    pub fn merge<'a>(factors: impl IntoIterator<Item = &'a Factor>) -> Result<Self> {
        let factors: Vec<&Factor> = factors.into_iter().collect();
        let (first, rest) = factors.split_first().ok_or(FactorError::EmptyMerge)?;
        let group = rest
            .iter()
            .try_fold(first.group.clone(), |g, f| g.union(&f.group))?;
        group.size()?;
        let positions = factors
            .iter()
            .map(|f| f.group.positions_in(&group))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut res = Self::new(group);
        for comb in res.group.range() {
            let value: f64 = factors
                .iter()
                .zip(positions.iter())
                .map(|(f, p)| f.evaluate(&comb.restrict(p)))
                .product();
            if value != 0.0 {
                res.images.insert(comb, value);
            }
        }
        Ok(res)
    }

    /// Explicit factor over the variables not fixed by the evidence, whose value is the value of
    /// `self` with the evidence plugged in. Evidence on variables outside the factor is ignored.
    pub fn condition(&self, evidence_group: &Group, evidence: &Combination) -> Result<Self> {
        evidence_group.check(evidence)?;
        let mut fixed = Vec::with_capacity(self.group.len());
        for var in self.group.iter() {
            match evidence_group.find(var.name()) {
                Some(_) => fixed.push(Some(evidence[evidence_group.position_of(var)?])),
                None => fixed.push(None),
            }
        }
        let remaining = self.group.difference(evidence_group);
        let mut res = Self::new(remaining);
        for comb in res.group.range() {
            let mut free = comb.data().iter();
            let full: Vec<usize> = fixed
                .iter()
                .map(|f| f.or_else(|| free.next().copied()).unwrap_or(0))
                .collect();
            let value = self.evaluate(&Combination::new(full));
            if value != 0.0 {
                res.images.insert(comb, value);
            }
        }
        Ok(res)
    }

    pub fn replace_variables(&mut self, variables: Vec<Variable>) -> Result<()> {
        Ok(self.group.replace_variables(variables)?)
    }
}

fn check_image(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FactorError::InvalidImage(value))
    }
}
