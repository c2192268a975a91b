//! Dense real-valued vectors over joint state spaces.

use std::ops::{AddAssign, DivAssign, Index, IndexMut, MulAssign, SubAssign};

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which norm [`ProbVec::normalize`] divides by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormKind {
    /// Divide by the total sum; requires a strictly positive sum.
    Prob,
    /// Divide by the maximum absolute value; requires a nonzero vector.
    LInf,
}

/// Distance measures between two vectors of equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistKind {
    /// Sum of absolute differences.
    L1,
    /// Maximum absolute difference.
    LInf,
    /// Total variation, half the L1 distance.
    TotalVariation,
    /// Kullback-Leibler divergence `sum a ln(a/b)`, with `0 ln 0 = 0`.
    /// Diverges to `inf` where `b = 0` and `a > 0`.
    Kl,
    /// Squared Hellinger distance `1/2 sum (sqrt(a) - sqrt(b))^2`.
    Hellinger,
}

/// A dense vector of reals, the value table of a factor or a message.
///
/// Values are not constrained to be nonnegative at rest; intermediate
/// arithmetic (log-domain messages, differences) may go negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbVec(Array1<f64>);

impl ProbVec {
    /// Uniform distribution on `n` states.
    pub fn uniform(n: usize) -> Self {
        ProbVec(Array1::from_elem(n, 1.0 / n as f64))
    }

    /// Vector of length `n` with every entry equal to `x`.
    pub fn filled(n: usize, x: f64) -> Self {
        ProbVec(Array1::from_elem(n, x))
    }

    pub fn zeros(n: usize) -> Self {
        ProbVec(Array1::zeros(n))
    }

    pub fn from_vec(v: Vec<f64>) -> Self {
        ProbVec(Array1::from_vec(v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    pub fn fill(&mut self, x: f64) {
        self.0.fill(x);
    }

    /// Draws every entry i.i.d. uniformly from `[0, 1)`.
    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        self.0.mapv_inplace(|_| rng.gen::<f64>());
    }

    pub fn total_sum(&self) -> f64 {
        self.0.sum()
    }

    pub fn max_val(&self) -> f64 {
        self.0.fold(f64::NEG_INFINITY, |m, &x| m.max(x))
    }

    pub fn min_val(&self) -> f64 {
        self.0.fold(f64::INFINITY, |m, &x| m.min(x))
    }

    pub fn max_abs(&self) -> f64 {
        self.0.fold(0.0, |m: f64, &x| m.max(x.abs()))
    }

    pub fn has_nans(&self) -> bool {
        self.0.iter().any(|x| x.is_nan())
    }

    pub fn has_negatives(&self) -> bool {
        self.0.iter().any(|&x| x < 0.0)
    }

    /// Shannon entropy `-sum p ln p`, skipping zero entries.
    pub fn entropy(&self) -> f64 {
        self.0
            .fold(0.0, |h, &p| if p > 0.0 { h - p * p.ln() } else { h })
    }

    /// Sets entries with `|x| < epsilon` to zero.
    pub fn make_zero(&mut self, epsilon: f64) {
        self.0
            .mapv_inplace(|x| if x.abs() < epsilon { 0.0 } else { x });
    }

    /// Raises entries below `epsilon` up to `epsilon`.
    pub fn make_positive(&mut self, epsilon: f64) {
        self.0.mapv_inplace(|x| x.max(epsilon));
    }

    /// Elementwise natural logarithm, in place. With `keep_zero`, maps 0 to
    /// 0 instead of `-inf`.
    pub fn log_inplace(&mut self, keep_zero: bool) {
        self.0.mapv_inplace(|x| {
            if x == 0.0 && keep_zero {
                0.0
            } else {
                x.ln()
            }
        });
    }

    /// Elementwise exponential, in place.
    pub fn exp_inplace(&mut self) {
        self.0.mapv_inplace(f64::exp);
    }

    pub fn log(&self, keep_zero: bool) -> Self {
        let mut r = self.clone();
        r.log_inplace(keep_zero);
        r
    }

    pub fn exp(&self) -> Self {
        let mut r = self.clone();
        r.exp_inplace();
        r
    }

    pub fn abs(&self) -> Self {
        ProbVec(self.0.mapv(f64::abs))
    }

    /// Elementwise reciprocal. With `keep_zero`, maps 0 to 0 instead of
    /// `inf`.
    pub fn inverse(&self, keep_zero: bool) -> Self {
        ProbVec(self.0.mapv(|x| {
            if x == 0.0 && keep_zero {
                0.0
            } else {
                1.0 / x
            }
        }))
    }

    /// Elementwise power with a real exponent.
    pub fn pow(&self, e: f64) -> Self {
        ProbVec(self.0.mapv(|x| x.powf(e)))
    }

    /// Divides by the norm given by `kind` and returns the divisor.
    ///
    /// Fails with [`Error::NonNormalizable`] when the divisor is not
    /// strictly positive (`Prob`) or the vector is all zero (`LInf`).
    pub fn normalize(&mut self, kind: NormKind) -> Result<f64> {
        let z = match kind {
            NormKind::Prob => self.total_sum(),
            NormKind::LInf => self.max_abs(),
        };
        if !(z > 0.0) {
            return Err(Error::NonNormalizable);
        }
        self.0 /= z;
        Ok(z)
    }

    pub fn normalized(&self, kind: NormKind) -> Result<Self> {
        let mut r = self.clone();
        r.normalize(kind)?;
        Ok(r)
    }
}

impl From<Vec<f64>> for ProbVec {
    fn from(v: Vec<f64>) -> Self {
        ProbVec::from_vec(v)
    }
}

impl From<Array1<f64>> for ProbVec {
    fn from(a: Array1<f64>) -> Self {
        ProbVec(a)
    }
}

impl Index<usize> for ProbVec {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl IndexMut<usize> for ProbVec {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.0[i]
    }
}

impl AddAssign<f64> for ProbVec {
    fn add_assign(&mut self, s: f64) {
        self.0 += s;
    }
}

impl SubAssign<f64> for ProbVec {
    fn sub_assign(&mut self, s: f64) {
        self.0 -= s;
    }
}

impl MulAssign<f64> for ProbVec {
    fn mul_assign(&mut self, s: f64) {
        self.0 *= s;
    }
}

impl DivAssign<f64> for ProbVec {
    fn div_assign(&mut self, s: f64) {
        self.0 /= s;
    }
}

impl AddAssign<&ProbVec> for ProbVec {
    fn add_assign(&mut self, rhs: &ProbVec) {
        self.0 += &rhs.0;
    }
}

impl SubAssign<&ProbVec> for ProbVec {
    fn sub_assign(&mut self, rhs: &ProbVec) {
        self.0 -= &rhs.0;
    }
}

impl MulAssign<&ProbVec> for ProbVec {
    fn mul_assign(&mut self, rhs: &ProbVec) {
        self.0 *= &rhs.0;
    }
}

impl DivAssign<&ProbVec> for ProbVec {
    fn div_assign(&mut self, rhs: &ProbVec) {
        self.0 /= &rhs.0;
    }
}

/// Distance between two vectors of equal length.
pub fn dist(a: &ProbVec, b: &ProbVec, kind: DistKind) -> f64 {
    assert_eq!(a.len(), b.len());
    let pairs = || a.0.iter().zip(b.0.iter());
    match kind {
        DistKind::L1 => pairs().fold(0.0, |acc, (x, y)| acc + (x - y).abs()),
        DistKind::LInf => pairs().fold(0.0, |acc: f64, (x, y)| acc.max((x - y).abs())),
        DistKind::TotalVariation => 0.5 * dist(a, b, DistKind::L1),
        DistKind::Kl => pairs().fold(0.0, |acc, (&x, &y)| {
            if x > 0.0 {
                acc + x * (x / y).ln()
            } else {
                acc
            }
        }),
        DistKind::Hellinger => pairs().fold(0.0, |acc, (x, y)| {
            let d = x.sqrt() - y.sqrt();
            acc + 0.5 * d * d
        }),
    }
}
