//! Loopy belief propagation.
//!
//! Messages flow along the edges of a [`FactorGraph`]; each sweep updates
//! all of them according to the configured schedule, and the run stops when
//! the variable beliefs move less than the tolerance between sweeps or the
//! sweep budget is exhausted. Beliefs and the Bethe log partition function
//! can be read off at any point between sweeps.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};

use crate::factor::{self, Factor};
use crate::graph::FactorGraph;
use crate::index::SubsetIndex;
use crate::prob::{dist as vec_dist, DistKind, NormKind, ProbVec};
use crate::var::{Var, VarSet};
use crate::{Config, Error, Result};

/// String-keyed configuration, as found in model files and experiment
/// descriptions. Insertion order is preserved so that [`Bp::identify`]
/// round-trips.
pub type Properties = IndexMap<String, String>;

/// Message update schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRule {
    /// Compute every message from the previous sweep's messages, then
    /// commit them all at once.
    Parall,
    /// Walk the edges in a fixed order, committing immediately.
    SeqFix,
    /// Like `SeqFix`, with the edge order reshuffled every sweep.
    SeqRnd,
    /// Residual belief propagation: always commit the staged message that
    /// changed the most, then refresh the messages it influences.
    SeqMax,
}

impl FromStr for UpdateRule {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "PARALL" => Ok(UpdateRule::Parall),
            "SEQFIX" => Ok(UpdateRule::SeqFix),
            "SEQRND" => Ok(UpdateRule::SeqRnd),
            "SEQMAX" => Ok(UpdateRule::SeqMax),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for UpdateRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UpdateRule::Parall => "PARALL",
            UpdateRule::SeqFix => "SEQFIX",
            UpdateRule::SeqRnd => "SEQRND",
            UpdateRule::SeqMax => "SEQMAX",
        })
    }
}

/// Algorithm options; see the field docs for the matching property keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpOptions {
    /// `updates`: the message schedule.
    pub updates: UpdateRule,
    /// `tol`: convergence threshold on the max belief change, > 0.
    pub tol: f64,
    /// `maxiter`: upper bound on the number of sweeps.
    pub max_iter: usize,
    /// `verbose`: diagnostic verbosity (0 = silent).
    pub verbose: usize,
    /// `logdomain`: store messages as their elementwise natural log.
    pub log_domain: bool,
}

impl Default for BpOptions {
    fn default() -> Self {
        Self {
            updates: UpdateRule::SeqFix,
            tol: 1e-9,
            max_iter: 10_000,
            verbose: 0,
            log_domain: false,
        }
    }
}

impl BpOptions {
    /// Reads the five mandatory keys `updates`, `tol`, `maxiter`, `verbose`
    /// and `logdomain`. A missing or unparsable key is a configuration
    /// error.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        fn get<'a>(props: &'a Properties, key: &'static str) -> Result<&'a str> {
            props
                .get(key)
                .map(String::as_str)
                .ok_or(Error::MissingProperty(key))
        }
        fn invalid(key: &'static str, value: &str) -> Error {
            Error::InvalidProperty {
                key,
                value: value.to_owned(),
            }
        }

        let updates_s = get(props, "updates")?;
        let updates = updates_s
            .parse::<UpdateRule>()
            .map_err(|_| invalid("updates", updates_s))?;

        let tol_s = get(props, "tol")?;
        let tol: f64 = tol_s.parse().map_err(|_| invalid("tol", tol_s))?;
        if !(tol > 0.0) {
            return Err(invalid("tol", tol_s));
        }

        let maxiter_s = get(props, "maxiter")?;
        let max_iter: usize = maxiter_s.parse().map_err(|_| invalid("maxiter", maxiter_s))?;

        let verbose_s = get(props, "verbose")?;
        let verbose: usize = verbose_s.parse().map_err(|_| invalid("verbose", verbose_s))?;

        let logdomain_s = get(props, "logdomain")?;
        let log_domain = match logdomain_s {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => return Err(invalid("logdomain", logdomain_s)),
        };

        Ok(Self {
            updates,
            tol,
            max_iter,
            verbose,
            log_domain,
        })
    }

    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("updates".into(), self.updates.to_string());
        props.insert("tol".into(), self.tol.to_string());
        props.insert("maxiter".into(), self.max_iter.to_string());
        props.insert("verbose".into(), self.verbose.to_string());
        props.insert("logdomain".into(), self.log_domain.to_string());
        props
    }
}

/// Per-edge state: the committed message, the staged next message, the
/// index table into the attached factor, and the residual used by the
/// `SeqMax` schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeProp {
    message: ProbVec,
    new_message: ProbVec,
    index: SubsetIndex,
    residual: f64,
}

/// Bounded history of belief changes; `max` falls back to the default
/// value while the history is still empty.
#[derive(Debug, Clone)]
struct Diffs {
    hist: VecDeque<f64>,
    maxsize: usize,
    def: f64,
}

impl Diffs {
    fn new(maxsize: usize, def: f64) -> Self {
        Self {
            hist: VecDeque::with_capacity(maxsize),
            maxsize,
            def,
        }
    }

    fn push(&mut self, x: f64) {
        if self.hist.len() == self.maxsize {
            self.hist.pop_front();
        }
        self.hist.push_back(x);
    }

    fn max(&self) -> f64 {
        if self.hist.is_empty() {
            self.def
        } else {
            self.hist.iter().fold(f64::NEG_INFINITY, |m, &x| m.max(x))
        }
    }
}

/// The belief propagation engine.
///
/// Construction allocates one [`EdgeProp`] per (variable, adjacent factor)
/// pair, including the precomputed index tables, and resets all messages to
/// the neutral element. [`run`](Bp::run) then mutates the messages in place;
/// belief accessors never do.
#[derive(Debug, Clone)]
pub struct Bp {
    graph: Arc<FactorGraph>,
    opts: BpOptions,
    norm: NormKind,
    edges: Vec<Vec<EdgeProp>>,
    max_diff: f64,
    sweeps: usize,
    rng: Xoshiro256StarStar,
}

impl Bp {
    /// Builds the engine from a string-keyed property map. All five keys of
    /// [`BpOptions::from_properties`] must be present.
    pub fn new(graph: Arc<FactorGraph>, props: &Properties) -> Result<Self> {
        Ok(Self::with_options(graph, BpOptions::from_properties(props)?))
    }

    /// Builds the engine from already-parsed options.
    pub fn with_options(graph: Arc<FactorGraph>, opts: BpOptions) -> Self {
        let mut edges = Vec::with_capacity(graph.n_vars());
        for i in 0..graph.n_vars() {
            let vi = VarSet::from(*graph.var(i));
            let states = graph.var(i).states();
            let row = graph
                .nb_v(i)
                .iter()
                .map(|nb| EdgeProp {
                    message: ProbVec::filled(states, 1.0),
                    new_message: ProbVec::filled(states, 1.0),
                    index: SubsetIndex::new(&vi, graph.factor(nb.node).vars()),
                    residual: 0.0,
                })
                .collect();
            edges.push(row);
        }
        let mut bp = Self {
            graph,
            opts,
            norm: NormKind::Prob,
            edges,
            max_diff: 0.0,
            sweeps: 0,
            rng: Xoshiro256StarStar::from_entropy(),
        };
        bp.init();
        bp
    }

    pub fn graph(&self) -> &Arc<FactorGraph> {
        &self.graph
    }

    pub fn options(&self) -> &BpOptions {
        &self.opts
    }

    /// Max belief change in the last sweep of the most recent run.
    pub fn max_diff(&self) -> f64 {
        self.max_diff
    }

    /// Number of sweeps performed by the most recent run.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// Algorithm name plus its serialized properties.
    pub fn identify(&self) -> String {
        format!(
            "BP[updates={},tol={},maxiter={},verbose={},logdomain={}]",
            self.opts.updates,
            self.opts.tol,
            self.opts.max_iter,
            self.opts.verbose,
            self.opts.log_domain
        )
    }

    /// Reseeds the RNG behind the `SeqRnd` schedule, for reproducible runs.
    pub fn seed(&mut self, seed: u64) {
        self.rng = Xoshiro256StarStar::seed_from_u64(seed);
    }

    fn neutral(&self) -> f64 {
        if self.opts.log_domain {
            0.0
        } else {
            1.0
        }
    }

    /// Resets every message to the neutral element.
    pub fn init(&mut self) {
        let x = self.neutral();
        for row in &mut self.edges {
            for e in row {
                e.message.fill(x);
                e.new_message.fill(x);
                e.residual = 0.0;
            }
        }
    }

    /// Resets the committed messages of the given variables only.
    pub fn init_vars(&mut self, ns: &VarSet) -> Result<()> {
        let x = self.neutral();
        for v in ns {
            let i = self.graph.find_var(v)?;
            for e in &mut self.edges[i] {
                e.message.fill(x);
            }
        }
        Ok(())
    }

    /// Computes the message from factor `nb_v(i)[_i]` to variable `i` into
    /// the staging slot.
    fn calc_new_message(&mut self, i: usize, _i: usize) -> Result<()> {
        let graph = Arc::clone(&self.graph);
        let big_i = graph.nb_v(i)[_i].node;
        let log_domain = self.opts.log_domain;

        let mut prod = graph.factor(big_i).p().clone();
        if log_domain {
            prod.log_inplace(false);
        }

        // Fold in the messages from the factor's other variables; the index
        // table translates positions of the factor table into states of the
        // neighbor variable.
        for j in graph.nb_f(big_i) {
            if j.node == i {
                continue;
            }
            let mut prod_j = ProbVec::filled(graph.var(j.node).states(), self.neutral());
            for jj in graph.nb_v(j.node) {
                if jj.node == big_i {
                    continue;
                }
                let m = &self.edges[j.node][jj.iter].message;
                if log_domain {
                    prod_j += m;
                } else {
                    prod_j *= m;
                }
            }
            let ind = &self.edges[j.node][j.dual].index;
            for r in 0..prod.len() {
                if log_domain {
                    prod[r] += prod_j[ind[r]];
                } else {
                    prod[r] *= prod_j[ind[r]];
                }
            }
        }
        if log_domain {
            let m = prod.max_val();
            prod -= m;
            prod.exp_inplace();
        }

        // Marginalize the product onto variable i.
        let mut marg = ProbVec::zeros(graph.var(i).states());
        let ind = &self.edges[i][_i].index;
        for r in 0..prod.len() {
            marg[ind[r]] += prod[r];
        }
        marg.normalize(self.norm)?;
        if log_domain {
            marg.log_inplace(false);
        }

        self.edges[i][_i].new_message = marg;
        Ok(())
    }

    fn refresh_residual(&mut self, i: usize, _i: usize) {
        let e = &self.edges[i][_i];
        let r = vec_dist(&e.new_message, &e.message, DistKind::LInf);
        self.edges[i][_i].residual = r;
    }

    /// Edge with the largest residual; ties go to the lowest `(i, _i)`.
    fn find_max_residual(&self) -> (usize, usize) {
        let mut best = None;
        let mut maxres = f64::NEG_INFINITY;
        for (i, row) in self.edges.iter().enumerate() {
            for (_i, e) in row.iter().enumerate() {
                if best.is_none() || e.residual > maxres {
                    maxres = e.residual;
                    best = Some((i, _i));
                }
            }
        }
        best.expect("graph has no edges")
    }

    /// Committed message on edge `(i, _i)`.
    pub fn message(&self, i: usize, _i: usize) -> &ProbVec {
        &self.edges[i][_i].message
    }

    /// Staged message on edge `(i, _i)`.
    pub fn new_message(&self, i: usize, _i: usize) -> &ProbVec {
        &self.edges[i][_i].new_message
    }

    /// Residual of edge `(i, _i)`: the LINF distance between its staged and
    /// committed messages at the last refresh.
    pub fn residual(&self, i: usize, _i: usize) -> f64 {
        self.edges[i][_i].residual
    }

    /// Computes every staged message from the committed ones and refreshes
    /// all residuals. The residual schedule runs this once before its first
    /// sweep.
    pub fn stage_messages(&mut self) -> Result<()> {
        for i in 0..self.graph.n_vars() {
            for _i in 0..self.edges[i].len() {
                self.calc_new_message(i, _i)?;
                self.refresh_residual(i, _i);
            }
        }
        Ok(())
    }

    /// One step of the residual schedule: commits the staged message with
    /// the largest residual and restages the messages it feeds. Returns the
    /// committed edge.
    pub fn commit_max_residual(&mut self) -> Result<(usize, usize)> {
        let (i, _i) = self.find_max_residual();
        let e = &mut self.edges[i][_i];
        e.message = e.new_message.clone();
        e.residual = 0.0;

        // The committed message feeds every other factor around i; restage
        // what it touches.
        let graph = Arc::clone(&self.graph);
        for big_j in graph.nb_v(i) {
            if big_j.iter == _i {
                continue;
            }
            for j in graph.nb_f(big_j.node) {
                if j.node == i {
                    continue;
                }
                self.calc_new_message(j.node, j.dual)?;
                self.refresh_residual(j.node, j.dual);
            }
        }
        Ok((i, _i))
    }

    /// Runs sweeps until convergence or the sweep budget runs out.
    ///
    /// Returns the final max belief change; a value above `tol` means the
    /// run did not converge, which is reported but not an error.
    pub fn run(&mut self, config: &Config) -> Result<f64> {
        let verbose = self.opts.verbose;
        if verbose >= 1 {
            log::info!("starting {}", self.identify());
        }

        let n_vars = self.graph.n_vars();
        let n_edges = self.graph.n_edges();
        let updates = self.opts.updates;
        let tol = self.opts.tol;
        let max_iter = self.opts.max_iter;

        let mut old_beliefs = Vec::with_capacity(n_vars);
        for i in 0..n_vars {
            old_beliefs.push(self.belief_v(i)?);
        }

        let mut update_seq: Vec<(usize, usize)> = Vec::new();
        if updates == UpdateRule::SeqMax {
            // Stage every message once so that the residuals are meaningful.
            self.stage_messages()?;
        } else {
            update_seq.reserve(n_edges);
            for i in 0..n_vars {
                for _i in 0..self.edges[i].len() {
                    update_seq.push((i, _i));
                }
            }
        }

        let mut diffs = Diffs::new(n_vars.max(1), 1.0);
        let mut iters = 0usize;

        // The bar only appears once the run has outlived the grace period,
        // so short runs stay silent.
        let started = Instant::now();
        let mut progress: Option<ProgressBar> = None;

        while iters < max_iter && diffs.max() > tol {
            match updates {
                UpdateRule::SeqMax => {
                    // One commit per edge per sweep, for parity with the
                    // other schedules.
                    for _ in 0..n_edges {
                        self.commit_max_residual()?;
                    }
                }
                UpdateRule::Parall => {
                    for i in 0..n_vars {
                        for _i in 0..self.edges[i].len() {
                            self.calc_new_message(i, _i)?;
                        }
                    }
                    for row in &mut self.edges {
                        for e in row {
                            e.message = e.new_message.clone();
                        }
                    }
                }
                UpdateRule::SeqFix | UpdateRule::SeqRnd => {
                    if updates == UpdateRule::SeqRnd {
                        update_seq.shuffle(&mut self.rng);
                    }
                    for &(i, _i) in &update_seq {
                        self.calc_new_message(i, _i)?;
                        let e = &mut self.edges[i][_i];
                        e.message = e.new_message.clone();
                    }
                }
            }

            // Compare the new beliefs against the previous sweep's.
            for i in 0..n_vars {
                let nb = self.belief_v(i)?;
                diffs.push(factor::dist(&nb, &old_beliefs[i], DistKind::LInf)?);
                old_beliefs[i] = nb;
            }

            iters += 1;
            if config.show_progress
                && progress.is_none()
                && started.elapsed() >= config.progress_min_time
            {
                let pb = ProgressBar::new(max_iter as u64).with_style(
                    ProgressStyle::default_bar()
                        .template("BP sweeps [{elapsed_precise}] {bar:40} {pos}/{len} (ETA {eta})")
                        .unwrap(),
                );
                progress = Some(pb);
            }
            if let Some(pb) = &progress {
                pb.set_position(iters as u64);
            }
            if verbose >= 3 {
                log::debug!("sweep {}: max belief change {}", iters, diffs.max());
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        self.sweeps = iters;
        self.max_diff = diffs.max();
        if verbose >= 1 {
            if self.max_diff > tol {
                log::warn!(
                    "not converged within {} sweeps, max belief change {}",
                    max_iter,
                    self.max_diff
                );
            } else {
                log::info!("converged in {} sweeps", iters);
            }
        }
        Ok(self.max_diff)
    }

    /// Optional numeric health check over all message slots. `run` skips
    /// this for speed; callers who suspect degenerate inputs can invoke it
    /// between runs.
    pub fn check_numerics(&self) -> Result<()> {
        for row in &self.edges {
            for e in row {
                if e.message.has_nans() || e.new_message.has_nans() {
                    return Err(Error::NumericFailure);
                }
                if !self.opts.log_domain
                    && (e.message.has_negatives() || e.new_message.has_negatives())
                {
                    return Err(Error::NumericFailure);
                }
            }
        }
        Ok(())
    }

    /// Belief of variable `i`: the normalized product of its staged
    /// incoming messages, as a factor over that single variable.
    pub fn belief_v(&self, i: usize) -> Result<Factor> {
        let log_domain = self.opts.log_domain;
        let mut prod = ProbVec::filled(self.graph.var(i).states(), self.neutral());
        for nb in self.graph.nb_v(i) {
            let m = &self.edges[i][nb.iter].new_message;
            if log_domain {
                prod += m;
            } else {
                prod *= m;
            }
        }
        if log_domain {
            let m = prod.max_val();
            prod -= m;
            prod.exp_inplace();
        }
        prod.normalize(NormKind::Prob)?;
        Ok(Factor::new(VarSet::from(*self.graph.var(i)), prod))
    }

    /// Belief of factor `I`: the factor times all staged messages flowing
    /// into its variables from elsewhere, normalized over its full scope.
    pub fn belief_f(&self, big_i: usize) -> Result<Factor> {
        let log_domain = self.opts.log_domain;
        let factor = self.graph.factor(big_i);
        let mut prod = factor.p().clone();
        if log_domain {
            prod.log_inplace(false);
        }

        for j in self.graph.nb_f(big_i) {
            let mut prod_j = ProbVec::filled(self.graph.var(j.node).states(), self.neutral());
            for jj in self.graph.nb_v(j.node) {
                if jj.node == big_i {
                    continue;
                }
                let m = &self.edges[j.node][jj.iter].new_message;
                if log_domain {
                    prod_j += m;
                } else {
                    prod_j *= m;
                }
            }
            let ind = &self.edges[j.node][j.dual].index;
            for r in 0..prod.len() {
                if log_domain {
                    prod[r] += prod_j[ind[r]];
                } else {
                    prod[r] *= prod_j[ind[r]];
                }
            }
        }
        if log_domain {
            let m = prod.max_val();
            prod -= m;
            prod.exp_inplace();
        }

        let mut res = Factor::new(factor.vars().clone(), prod);
        res.normalize(NormKind::Prob)?;
        Ok(res)
    }

    /// Belief of a single variable, looked up by identity.
    pub fn belief_var(&self, v: &Var) -> Result<Factor> {
        self.belief_v(self.graph.find_var(v)?)
    }

    /// Joint belief over `ns`, taken from any factor whose scope contains
    /// `ns`. Fails when no factor does.
    pub fn belief(&self, ns: &VarSet) -> Result<Factor> {
        if ns.len() == 1 {
            return self.belief_var(ns.iter().next().unwrap());
        }
        for big_i in 0..self.graph.n_factors() {
            if self.graph.factor(big_i).vars().is_superset_of(ns) {
                return self.belief_f(big_i)?.marginal(ns, true);
            }
        }
        Err(Error::NoContainingFactor)
    }

    /// All variable beliefs, followed by all factor beliefs.
    pub fn beliefs(&self) -> Result<Vec<Factor>> {
        let mut result = Vec::with_capacity(self.graph.n_vars() + self.graph.n_factors());
        for i in 0..self.graph.n_vars() {
            result.push(self.belief_v(i)?);
        }
        for big_i in 0..self.graph.n_factors() {
            result.push(self.belief_f(big_i)?);
        }
        Ok(result)
    }

    /// Bethe approximation of the log partition function:
    /// `sum_i (1 - deg(i)) H(b_i) - sum_I KL(b_I || f_I)`. Exact on trees.
    pub fn log_z(&self) -> Result<f64> {
        let mut sum = 0.0;
        for i in 0..self.graph.n_vars() {
            let deg = self.graph.nb_v(i).len() as f64;
            sum += (1.0 - deg) * self.belief_v(i)?.entropy();
        }
        for big_i in 0..self.graph.n_factors() {
            sum -= factor::dist(
                &self.belief_f(big_i)?,
                self.graph.factor(big_i),
                DistKind::Kl,
            )?;
        }
        Ok(sum)
    }
}
