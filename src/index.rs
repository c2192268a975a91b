//! Index translation between nested joint state spaces.

use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::var::VarSet;

/// Maps linear joint states of an outer variable set onto linear joint
/// states of a subset.
///
/// Entry `k` is the linear state of `inner` obtained by restricting the
/// joint assignment encoded by `k` (over `outer`) to the variables of
/// `inner`. The table is built once per edge and then consulted in tight
/// message-update loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsetIndex {
    map: Vec<usize>,
}

impl SubsetIndex {
    /// Builds the translation table for `inner` inside `outer`.
    ///
    /// `inner` must be a subset of `outer`. Build cost is
    /// `O(nr_states(outer) * len(outer))`; lookups are O(1).
    pub fn new(inner: &VarSet, outer: &VarSet) -> Self {
        debug_assert!(inner.is_subset_of(outer));

        // Stride of each outer variable within the inner encoding (0 when
        // the variable is not part of the subset).
        let mut strides = Vec::with_capacity(outer.len());
        for v in outer.iter() {
            if inner.contains(v) {
                let stride: usize = inner
                    .iter()
                    .take_while(|w| *w < v)
                    .map(|w| w.states())
                    .product();
                strides.push(stride);
            } else {
                strides.push(0);
            }
        }
        let sizes: Vec<usize> = outer.iter().map(|v| v.states()).collect();

        // Walk the outer states as an odometer, keeping the inner index as a
        // running sum.
        let total = outer.nr_states();
        let mut map = Vec::with_capacity(total);
        let mut digits = vec![0usize; outer.len()];
        let mut cur = 0usize;
        for _ in 0..total {
            map.push(cur);
            for d in 0..digits.len() {
                digits[d] += 1;
                cur += strides[d];
                if digits[d] < sizes[d] {
                    break;
                }
                digits[d] = 0;
                cur -= sizes[d] * strides[d];
            }
        }
        SubsetIndex { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.map
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.map.iter()
    }
}

impl Index<usize> for SubsetIndex {
    type Output = usize;
    fn index(&self, k: usize) -> &usize {
        &self.map[k]
    }
}
