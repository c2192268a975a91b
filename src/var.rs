//! Variables and label-ordered variable sets.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, Sub};

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};

/// A discrete random variable: a stable integer label plus the size of its
/// state space.
///
/// Identity is the label alone; two `Var`s with the same label are the same
/// variable regardless of the recorded state count. A graph never holds the
/// same label with two different state counts (see
/// [`FactorGraph::new`](crate::graph::FactorGraph::new)).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Var {
    label: usize,
    states: usize,
}

impl Var {
    pub fn new(label: usize, states: usize) -> Self {
        debug_assert!(states >= 1);
        Self { label, states }
    }

    pub fn label(&self) -> usize {
        self.label
    }

    /// Number of states of the variable.
    pub fn states(&self) -> usize {
        self.states
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl Eq for Var {}

impl PartialOrd for Var {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Var {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label.cmp(&other.label)
    }
}

impl std::hash::Hash for Var {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.label.hash(state);
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.label)
    }
}

/// A set of variables, kept sorted by label.
///
/// The joint state space of a `VarSet` is the product of the member state
/// spaces. A joint state is identified with a linear index by the mixed-radix
/// encoding where the lowest-labeled variable is the least significant digit:
///
/// `state = sum_v x(v) * prod_{w < v} states(w)`
///
/// Everything that addresses factor tables ([`calc_state`], slicing,
/// [`SubsetIndex`](crate::index::SubsetIndex)) relies on this ordering.
///
/// [`calc_state`]: VarSet::calc_state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarSet {
    elems: Vec<Var>,
}

impl VarSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Var> {
        self.elems.iter()
    }

    pub fn as_slice(&self) -> &[Var] {
        &self.elems
    }

    pub fn contains(&self, v: &Var) -> bool {
        self.elems.binary_search(v).is_ok()
    }

    /// Number of joint states; 1 for the empty set.
    pub fn nr_states(&self) -> usize {
        self.elems.iter().map(|v| v.states()).product()
    }

    pub fn union(&self, other: &VarSet) -> VarSet {
        let elems = self
            .elems
            .iter()
            .merge_join_by(other.elems.iter(), |a, b| a.cmp(b))
            .map(|e| match e {
                EitherOrBoth::Both(a, _) | EitherOrBoth::Left(a) | EitherOrBoth::Right(a) => *a,
            })
            .collect();
        VarSet { elems }
    }

    pub fn intersection(&self, other: &VarSet) -> VarSet {
        let elems = self
            .elems
            .iter()
            .merge_join_by(other.elems.iter(), |a, b| a.cmp(b))
            .filter_map(|e| match e {
                EitherOrBoth::Both(a, _) => Some(*a),
                _ => None,
            })
            .collect();
        VarSet { elems }
    }

    pub fn difference(&self, other: &VarSet) -> VarSet {
        let elems = self
            .elems
            .iter()
            .merge_join_by(other.elems.iter(), |a, b| a.cmp(b))
            .filter_map(|e| match e {
                EitherOrBoth::Left(a) => Some(*a),
                _ => None,
            })
            .collect();
        VarSet { elems }
    }

    pub fn is_subset_of(&self, other: &VarSet) -> bool {
        self.elems.iter().all(|v| other.contains(v))
    }

    pub fn is_superset_of(&self, other: &VarSet) -> bool {
        other.is_subset_of(self)
    }

    /// Linear index of the joint state given by `assignment`.
    ///
    /// Variables of the set that are missing from the assignment count as
    /// state 0; variables in the assignment that are not in the set are
    /// ignored.
    pub fn calc_state(&self, assignment: &BTreeMap<Var, usize>) -> usize {
        let mut state = 0;
        let mut stride = 1;
        for v in &self.elems {
            if let Some(x) = assignment.get(v) {
                debug_assert!(*x < v.states());
                state += x * stride;
            }
            stride *= v.states();
        }
        state
    }

    /// Inverse of [`calc_state`](VarSet::calc_state): decomposes a linear
    /// index into the per-variable states.
    pub fn calc_states(&self, mut state: usize) -> BTreeMap<Var, usize> {
        let mut assignment = BTreeMap::new();
        for v in &self.elems {
            assignment.insert(*v, state % v.states());
            state /= v.states();
        }
        debug_assert_eq!(state, 0);
        assignment
    }
}

impl From<Var> for VarSet {
    fn from(v: Var) -> Self {
        VarSet { elems: vec![v] }
    }
}

impl FromIterator<Var> for VarSet {
    fn from_iter<I: IntoIterator<Item = Var>>(iter: I) -> Self {
        let mut elems: Vec<Var> = iter.into_iter().collect();
        elems.sort();
        elems.dedup();
        VarSet { elems }
    }
}

impl<'a> IntoIterator for &'a VarSet {
    type Item = &'a Var;
    type IntoIter = std::slice::Iter<'a, Var>;

    fn into_iter(self) -> Self::IntoIter {
        self.elems.iter()
    }
}

impl BitOr for &VarSet {
    type Output = VarSet;
    fn bitor(self, rhs: &VarSet) -> VarSet {
        self.union(rhs)
    }
}

impl BitAnd for &VarSet {
    type Output = VarSet;
    fn bitand(self, rhs: &VarSet) -> VarSet {
        self.intersection(rhs)
    }
}

impl Sub for &VarSet {
    type Output = VarSet;
    fn sub(self, rhs: &VarSet) -> VarSet {
        self.difference(rhs)
    }
}

impl fmt::Display for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.elems.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}
