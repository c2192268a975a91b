//! Factors: value tables over the joint states of a variable set.

use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Sub, SubAssign};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::index::SubsetIndex;
use crate::prob::{dist as vec_dist, DistKind, NormKind, ProbVec};
use crate::var::{Var, VarSet};
use crate::{Error, Result};

/// Floor applied to quotient denominators in [`Factor::strength`].
const TINY: f64 = 1e-40;

/// A function from the joint states of a variable set to the reals.
///
/// The value table is addressed by the mixed-radix linear encoding of
/// [`VarSet`]: entry `k` is the value at the joint assignment
/// `vars.calc_states(k)`. A factor over the empty set is a scalar with a
/// single entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    vars: VarSet,
    p: ProbVec,
}

impl Factor {
    /// A factor with the given variable set and value table.
    ///
    /// The table length must equal `vars.nr_states()`.
    pub fn new(vars: VarSet, p: ProbVec) -> Self {
        assert_eq!(vars.nr_states(), p.len());
        Self { vars, p }
    }

    /// The scalar factor over no variables.
    pub fn scalar(x: f64) -> Self {
        Self {
            vars: VarSet::new(),
            p: ProbVec::filled(1, x),
        }
    }

    /// Constant factor with value `x` everywhere.
    pub fn filled(vars: &VarSet, x: f64) -> Self {
        Self {
            vars: vars.clone(),
            p: ProbVec::filled(vars.nr_states(), x),
        }
    }

    /// Uniform distribution over the joint states of `vars`.
    pub fn uniform(vars: &VarSet) -> Self {
        Self {
            vars: vars.clone(),
            p: ProbVec::uniform(vars.nr_states()),
        }
    }

    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    pub fn p(&self) -> &ProbVec {
        &self.p
    }

    pub fn p_mut(&mut self) -> &mut ProbVec {
        &mut self.p
    }

    /// Number of joint states, equal to the table length.
    pub fn nr_states(&self) -> usize {
        self.p.len()
    }

    pub fn fill(&mut self, x: f64) {
        self.p.fill(x);
    }

    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        self.p.randomize(rng);
    }

    pub fn total_sum(&self) -> f64 {
        self.p.total_sum()
    }

    pub fn max_val(&self) -> f64 {
        self.p.max_val()
    }

    pub fn min_val(&self) -> f64 {
        self.p.min_val()
    }

    pub fn max_abs(&self) -> f64 {
        self.p.max_abs()
    }

    pub fn has_nans(&self) -> bool {
        self.p.has_nans()
    }

    pub fn has_negatives(&self) -> bool {
        self.p.has_negatives()
    }

    pub fn entropy(&self) -> f64 {
        self.p.entropy()
    }

    pub fn exp(&self) -> Self {
        Self {
            vars: self.vars.clone(),
            p: self.p.exp(),
        }
    }

    pub fn log(&self, keep_zero: bool) -> Self {
        Self {
            vars: self.vars.clone(),
            p: self.p.log(keep_zero),
        }
    }

    pub fn abs(&self) -> Self {
        Self {
            vars: self.vars.clone(),
            p: self.p.abs(),
        }
    }

    pub fn inverse(&self, keep_zero: bool) -> Self {
        Self {
            vars: self.vars.clone(),
            p: self.p.inverse(keep_zero),
        }
    }

    pub fn pow(&self, e: f64) -> Self {
        Self {
            vars: self.vars.clone(),
            p: self.p.pow(e),
        }
    }

    pub fn make_zero(&mut self, epsilon: f64) {
        self.p.make_zero(epsilon);
    }

    pub fn make_positive(&mut self, epsilon: f64) {
        self.p.make_positive(epsilon);
    }

    /// Normalizes the table per `kind` and returns the divisor.
    pub fn normalize(&mut self, kind: NormKind) -> Result<f64> {
        self.p.normalize(kind)
    }

    pub fn normalized(&self, kind: NormKind) -> Result<Self> {
        Ok(Self {
            vars: self.vars.clone(),
            p: self.p.normalized(kind)?,
        })
    }

    /// Sums out all variables not in `ns`; the result is over
    /// `ns & self.vars()`. With `normed`, the result is normalized to total
    /// sum 1.
    pub fn marginal(&self, ns: &VarSet, normed: bool) -> Result<Self> {
        let res_vars = ns.intersection(&self.vars);
        let idx = SubsetIndex::new(&res_vars, &self.vars);
        let mut p = ProbVec::zeros(res_vars.nr_states());
        for k in 0..self.p.len() {
            p[idx[k]] += self.p[k];
        }
        let mut res = Self { vars: res_vars, p };
        if normed {
            res.normalize(NormKind::Prob)?;
        }
        Ok(res)
    }

    /// Fixes the variables of `ns` to the joint state `state` and returns
    /// the factor over the remaining variables.
    pub fn slice(&self, ns: &VarSet, state: usize) -> Result<Self> {
        if !ns.is_subset_of(&self.vars) {
            return Err(Error::NotSubset);
        }
        if state >= ns.nr_states() {
            return Err(Error::StateOutOfRange(state, ns.nr_states()));
        }
        let rem = self.vars.difference(ns);
        let i_ns = SubsetIndex::new(ns, &self.vars);
        let i_rem = SubsetIndex::new(&rem, &self.vars);
        let mut p = ProbVec::zeros(rem.nr_states());
        for k in 0..self.p.len() {
            if i_ns[k] == state {
                p[i_rem[k]] = self.p[k];
            }
        }
        Ok(Self { vars: rem, p })
    }

    /// Extends the factor to the superset `ns`, constant over the added
    /// variables.
    pub fn embed(&self, ns: &VarSet) -> Result<Self> {
        if !self.vars.is_subset_of(ns) {
            return Err(Error::NotSubset);
        }
        if self.vars == *ns {
            Ok(self.clone())
        } else {
            Ok(self * &Factor::filled(&ns.difference(&self.vars), 1.0))
        }
    }

    /// Interaction strength between two of the factor's variables, after
    /// Mooij & Kappen (2007), eq. 52.
    ///
    /// Quotients of slices are computed with denominators floored at a tiny
    /// positive constant, so the result is finite even when the table
    /// contains zeros.
    pub fn strength(&self, i: &Var, j: &Var) -> Result<f64> {
        if i == j || !self.vars.contains(i) || !self.vars.contains(j) {
            return Err(Error::NotSubset);
        }
        let ij: VarSet = [*i, *j].into_iter().collect();
        // Strides of i and j inside the joint encoding of {i, j}.
        let (si, sj) = if i < j {
            (1, i.states())
        } else {
            (j.states(), 1)
        };

        let quotient_max = |num: usize, den: usize| -> Result<f64> {
            let mut d = self.slice(&ij, den)?.p;
            d.make_positive(TINY);
            let mut q = self.slice(&ij, num)?.p;
            q /= &d;
            Ok(q.max_val())
        };

        let mut max = 0.0f64;
        for a1 in 0..i.states() {
            for a2 in 0..i.states() {
                if a2 == a1 {
                    continue;
                }
                for b1 in 0..j.states() {
                    for b2 in 0..j.states() {
                        if b2 == b1 {
                            continue;
                        }
                        let f1 = quotient_max(a1 * si + b1 * sj, a2 * si + b1 * sj)?;
                        let f2 = quotient_max(a2 * si + b2 * sj, a1 * si + b2 * sj)?;
                        max = max.max(f1 * f2);
                    }
                }
            }
        }
        Ok((0.25 * max.ln()).tanh())
    }
}

impl From<Var> for Factor {
    /// Uniform factor over a single variable.
    fn from(v: Var) -> Self {
        Factor::uniform(&VarSet::from(v))
    }
}

impl Index<usize> for Factor {
    type Output = f64;
    fn index(&self, k: usize) -> &f64 {
        &self.p[k]
    }
}

impl IndexMut<usize> for Factor {
    fn index_mut(&mut self, k: usize) -> &mut f64 {
        &mut self.p[k]
    }
}

// Scalar arithmetic.

impl MulAssign<f64> for Factor {
    fn mul_assign(&mut self, s: f64) {
        self.p *= s;
    }
}

impl DivAssign<f64> for Factor {
    fn div_assign(&mut self, s: f64) {
        self.p /= s;
    }
}

impl AddAssign<f64> for Factor {
    fn add_assign(&mut self, s: f64) {
        self.p += s;
    }
}

impl SubAssign<f64> for Factor {
    fn sub_assign(&mut self, s: f64) {
        self.p -= s;
    }
}

macro_rules! factor_scalar_op {
    ($trait:ident, $method:ident, $assign:tt) => {
        impl $trait<f64> for &Factor {
            type Output = Factor;
            fn $method(self, s: f64) -> Factor {
                let mut r = self.clone();
                r $assign s;
                r
            }
        }
    };
}

factor_scalar_op!(Mul, mul, *=);
factor_scalar_op!(Div, div, /=);
factor_scalar_op!(Add, add, +=);
factor_scalar_op!(Sub, sub, -=);

// Factor-factor arithmetic. Product and quotient are defined for arbitrary
// variable sets; the result lives on the union. Sum and difference require
// identical variable sets.

fn join(a: &Factor, b: &Factor, div: bool) -> Factor {
    if a.vars == b.vars {
        let mut p = a.p.clone();
        if div {
            p /= &b.p;
        } else {
            p *= &b.p;
        }
        return Factor {
            vars: a.vars.clone(),
            p,
        };
    }
    let vars = a.vars.union(&b.vars);
    let ia = SubsetIndex::new(&a.vars, &vars);
    let ib = SubsetIndex::new(&b.vars, &vars);
    let mut p = ProbVec::zeros(vars.nr_states());
    for k in 0..p.len() {
        p[k] = if div {
            a.p[ia[k]] / b.p[ib[k]]
        } else {
            a.p[ia[k]] * b.p[ib[k]]
        };
    }
    Factor { vars, p }
}

impl Mul<&Factor> for &Factor {
    type Output = Factor;
    fn mul(self, rhs: &Factor) -> Factor {
        join(self, rhs, false)
    }
}

impl Div<&Factor> for &Factor {
    type Output = Factor;
    fn div(self, rhs: &Factor) -> Factor {
        join(self, rhs, true)
    }
}

impl MulAssign<&Factor> for Factor {
    fn mul_assign(&mut self, rhs: &Factor) {
        if self.vars == rhs.vars {
            self.p *= &rhs.p;
        } else {
            *self = join(self, rhs, false);
        }
    }
}

impl DivAssign<&Factor> for Factor {
    fn div_assign(&mut self, rhs: &Factor) {
        if self.vars == rhs.vars {
            self.p /= &rhs.p;
        } else {
            *self = join(self, rhs, true);
        }
    }
}

impl Add<&Factor> for &Factor {
    type Output = Factor;
    fn add(self, rhs: &Factor) -> Factor {
        assert_eq!(self.vars, rhs.vars);
        let mut p = self.p.clone();
        p += &rhs.p;
        Factor {
            vars: self.vars.clone(),
            p,
        }
    }
}

impl Sub<&Factor> for &Factor {
    type Output = Factor;
    fn sub(self, rhs: &Factor) -> Factor {
        assert_eq!(self.vars, rhs.vars);
        let mut p = self.p.clone();
        p -= &rhs.p;
        Factor {
            vars: self.vars.clone(),
            p,
        }
    }
}

impl AddAssign<&Factor> for Factor {
    fn add_assign(&mut self, rhs: &Factor) {
        assert_eq!(self.vars, rhs.vars);
        self.p += &rhs.p;
    }
}

impl SubAssign<&Factor> for Factor {
    fn sub_assign(&mut self, rhs: &Factor) {
        assert_eq!(self.vars, rhs.vars);
        self.p -= &rhs.p;
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} <", self.vars)?;
        for k in 0..self.p.len() {
            write!(f, "{} ", self.p[k])?;
        }
        write!(f, ">)")
    }
}

/// Pointwise maximum of two factors over the same variable set.
pub fn max(f: &Factor, g: &Factor) -> Factor {
    assert_eq!(f.vars, g.vars);
    let p = ndarray::Zip::from(f.p.as_array())
        .and(g.p.as_array())
        .map_collect(|a, b| a.max(*b));
    Factor {
        vars: f.vars.clone(),
        p: p.into(),
    }
}

/// Pointwise minimum of two factors over the same variable set.
pub fn min(f: &Factor, g: &Factor) -> Factor {
    assert_eq!(f.vars, g.vars);
    let p = ndarray::Zip::from(f.p.as_array())
        .and(g.p.as_array())
        .map_collect(|a, b| a.min(*b));
    Factor {
        vars: f.vars.clone(),
        p: p.into(),
    }
}

/// Distance between two factors over the same variable set.
pub fn dist(f: &Factor, g: &Factor, kind: DistKind) -> Result<f64> {
    if f.vars != g.vars {
        return Err(Error::VarSetMismatch);
    }
    Ok(vec_dist(&f.p, &g.p, kind))
}

/// Mutual information between the two variables of a pairwise factor,
/// under the distribution obtained by normalizing it.
pub fn mutual_info(f: &Factor) -> Result<f64> {
    if f.vars.len() != 2 {
        return Err(Error::VarSetMismatch);
    }
    let mut it = f.vars.iter();
    let i = *it.next().unwrap();
    let j = *it.next().unwrap();
    let pi = f.marginal(&VarSet::from(i), true)?;
    let pj = f.marginal(&VarSet::from(j), true)?;
    let projection = &pi * &pj;
    dist(&f.normalized(NormKind::Prob)?, &projection, DistKind::Kl)
}
