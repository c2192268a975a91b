//! The bipartite container tying variables and factors together.

use serde::{Deserialize, Serialize};

use crate::factor::Factor;
use crate::var::Var;
use crate::{Error, Result};

/// One entry of a neighbor list.
///
/// From a variable's list, `node` is a factor id; from a factor's list it is
/// a variable id. `iter` is the position of this entry in its own list, so
/// `(i, iter)` identifies an edge. `dual` is the position of the reciprocal
/// entry in the neighbor's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node: usize,
    pub iter: usize,
    pub dual: usize,
}

/// A factor graph: variables, factors, and the edges between them.
///
/// Variables are collected from the factor scopes and numbered in label
/// order. The graph is immutable after construction; inference algorithms
/// borrow it read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorGraph {
    vars: Vec<Var>,
    factors: Vec<Factor>,
    nb_v: Vec<Vec<Neighbor>>,
    nb_f: Vec<Vec<Neighbor>>,
    n_edges: usize,
}

impl FactorGraph {
    /// Builds the graph owning `factors`.
    ///
    /// Fails when the same variable label occurs with two different state
    /// counts.
    pub fn new(factors: Vec<Factor>) -> Result<Self> {
        let mut vars: Vec<Var> = Vec::new();
        for f in &factors {
            for v in f.vars() {
                match vars.binary_search(v) {
                    Ok(pos) => {
                        if vars[pos].states() != v.states() {
                            return Err(Error::InconsistentStates(v.label()));
                        }
                    }
                    Err(pos) => vars.insert(pos, *v),
                }
            }
        }

        let mut nb_v: Vec<Vec<Neighbor>> = vec![Vec::new(); vars.len()];
        let mut nb_f: Vec<Vec<Neighbor>> = Vec::with_capacity(factors.len());
        let mut n_edges = 0;
        for (big_i, f) in factors.iter().enumerate() {
            let mut row = Vec::with_capacity(f.vars().len());
            for (pos, v) in f.vars().iter().enumerate() {
                let i = vars.binary_search(v).expect("scope var must be known");
                let slot = nb_v[i].len();
                nb_v[i].push(Neighbor {
                    node: big_i,
                    iter: slot,
                    dual: pos,
                });
                row.push(Neighbor {
                    node: i,
                    iter: pos,
                    dual: slot,
                });
                n_edges += 1;
            }
            nb_f.push(row);
        }

        Ok(Self {
            vars,
            factors,
            nb_v,
            nb_f,
            n_edges,
        })
    }

    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }

    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    pub fn var(&self, i: usize) -> &Var {
        &self.vars[i]
    }

    pub fn factor(&self, big_i: usize) -> &Factor {
        &self.factors[big_i]
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Factors adjacent to variable `i`.
    pub fn nb_v(&self, i: usize) -> &[Neighbor] {
        &self.nb_v[i]
    }

    /// Variables adjacent to factor `I`.
    pub fn nb_f(&self, big_i: usize) -> &[Neighbor] {
        &self.nb_f[big_i]
    }

    /// Index of a variable in the graph's ordering.
    pub fn find_var(&self, v: &Var) -> Result<usize> {
        self.vars
            .binary_search(v)
            .map_err(|_| Error::UnknownVar(v.label()))
    }
}
