use std::sync::Arc;

use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use beliefprop::{
    dist, Bp, BpOptions, Config, DistKind, Error, Factor, FactorGraph, ProbVec, Properties,
    UpdateRule, Var, VarSet,
};

const ALL_SCHEDULES: [UpdateRule; 4] = [
    UpdateRule::Parall,
    UpdateRule::SeqFix,
    UpdateRule::SeqRnd,
    UpdateRule::SeqMax,
];

fn varset(vars: &[Var]) -> VarSet {
    vars.iter().copied().collect()
}

fn pairwise(x: Var, y: Var, table: [f64; 4]) -> Factor {
    Factor::new(varset(&[x, y]), ProbVec::from_vec(table.to_vec()))
}

fn singleton(x: Var, table: &[f64]) -> Factor {
    Factor::new(varset(&[x]), ProbVec::from_vec(table.to_vec()))
}

fn make_bp(factors: Vec<Factor>, updates: UpdateRule, log_domain: bool) -> Bp {
    let graph = Arc::new(FactorGraph::new(factors).unwrap());
    let opts = BpOptions {
        updates,
        tol: 1e-9,
        max_iter: 10_000,
        verbose: 0,
        log_domain,
    };
    let mut bp = Bp::with_options(graph, opts);
    bp.seed(7);
    bp
}

/// Reference answers by brute-force enumeration of the joint table.
fn exact(factors: &[Factor]) -> (Vec<Factor>, f64) {
    let mut joint = Factor::scalar(1.0);
    for f in factors {
        joint = &joint * f;
    }
    let z = joint.total_sum();
    let vars = joint.vars().clone();
    let marginals = vars
        .iter()
        .map(|v| joint.marginal(&VarSet::from(*v), true).unwrap())
        .collect();
    (marginals, z.ln())
}

fn assert_close(f: &Factor, g: &Factor, tol: f64) {
    assert_eq!(f.vars(), g.vars());
    for k in 0..f.nr_states() {
        assert!(
            (f[k] - g[k]).abs() < tol,
            "entry {}: {} vs {}",
            k,
            f[k],
            g[k]
        );
    }
}

fn random_tree_factors() -> Vec<Factor> {
    // A star with mixed cardinalities: x0 in the middle, four leaves.
    let mut rng = Xoshiro256StarStar::seed_from_u64(0xbeef);
    let x0 = Var::new(0, 3);
    let leaves = [Var::new(1, 2), Var::new(2, 2), Var::new(3, 3), Var::new(4, 2)];
    leaves
        .iter()
        .map(|leaf| {
            let mut f = Factor::filled(&varset(&[x0, *leaf]), 0.0);
            f.randomize(&mut rng);
            f.make_positive(0.05);
            f
        })
        .collect()
}

fn four_cycle(coupling: [f64; 4]) -> Vec<Factor> {
    let xs: Vec<Var> = (0..4).map(|l| Var::new(l, 2)).collect();
    (0..4)
        .map(|k| pairwise(xs[k], xs[(k + 1) % 4], coupling))
        .collect()
}

#[test]
fn single_binary_variable() {
    let x = Var::new(0, 2);
    for updates in ALL_SCHEDULES {
        let mut bp = make_bp(vec![singleton(x, &[0.3, 0.7])], updates, false);
        let maxdiff = bp.run(&Config::no_progress()).unwrap();
        assert!(maxdiff <= 1e-9);

        let belief = bp.belief_var(&x).unwrap();
        assert!((belief[0] - 0.3).abs() < 1e-12);
        assert!((belief[1] - 0.7).abs() < 1e-12);
        assert!(bp.log_z().unwrap().abs() < 1e-12);
    }
}

#[test]
fn single_symmetric_pair() {
    let x = Var::new(0, 2);
    let y = Var::new(1, 2);
    let mut bp = make_bp(
        vec![pairwise(x, y, [2.0, 1.0, 1.0, 2.0])],
        UpdateRule::Parall,
        false,
    );
    let maxdiff = bp.run(&Config::no_progress()).unwrap();
    assert!(maxdiff <= 1e-9);

    for v in [x, y] {
        let b = bp.belief_var(&v).unwrap();
        assert!((b[0] - 0.5).abs() < 1e-9);
        assert!((b[1] - 0.5).abs() < 1e-9);
    }

    let joint = bp.belief(&varset(&[x, y])).unwrap();
    let expected = [2.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, 2.0 / 6.0];
    for k in 0..4 {
        assert!((joint[k] - expected[k]).abs() < 1e-9);
    }
}

#[test]
fn chain_of_three() {
    let xs: Vec<Var> = (0..3).map(|l| Var::new(l, 2)).collect();
    let factors = vec![
        pairwise(xs[0], xs[1], [0.9, 0.1, 0.1, 0.9]),
        pairwise(xs[1], xs[2], [0.9, 0.1, 0.1, 0.9]),
    ];

    for updates in ALL_SCHEDULES {
        let mut bp = make_bp(factors.clone(), updates, false);
        let maxdiff = bp.run(&Config::no_progress()).unwrap();
        assert!(maxdiff <= 1e-9);

        for v in &xs {
            let b = bp.belief_var(v).unwrap();
            assert!((b[0] - 0.5).abs() < 1e-9);
            assert!((b[1] - 0.5).abs() < 1e-9);
        }

        // The middle pair's joint belief is the exact chain marginal.
        let pair = varset(&[xs[1], xs[2]]);
        let mut joint = Factor::scalar(1.0);
        for f in &factors {
            joint = &joint * f;
        }
        let expected = joint.marginal(&pair, true).unwrap();
        assert_close(&bp.belief(&pair).unwrap(), &expected, 1e-9);
    }
}

#[test]
fn tree_beliefs_and_log_z_are_exact() {
    let factors = random_tree_factors();
    let (marginals, log_z) = exact(&factors);

    for updates in ALL_SCHEDULES {
        let mut bp = make_bp(factors.clone(), updates, false);
        let maxdiff = bp.run(&Config::no_progress()).unwrap();
        assert!(maxdiff <= 1e-9, "{:?} did not converge", updates);
        // The star has diameter 2; a handful of sweeps must do.
        assert!(bp.sweeps() <= 8, "{:?} took {} sweeps", updates, bp.sweeps());

        for (i, exact_marginal) in marginals.iter().enumerate() {
            assert_close(&bp.belief_v(i).unwrap(), exact_marginal, 1e-9);
        }
        assert!((bp.log_z().unwrap() - log_z).abs() < 1e-9);
    }
}

#[test]
fn log_domain_agrees_with_linear() {
    let mut factors = four_cycle([2.0, 1.0, 1.0, 2.0]);
    factors.push(singleton(Var::new(0, 2), &[0.3, 0.7]));
    factors.push(singleton(Var::new(2, 2), &[0.6, 0.4]));

    let mut linear = make_bp(factors.clone(), UpdateRule::Parall, false);
    let mut logdom = make_bp(factors, UpdateRule::Parall, true);
    assert!(linear.run(&Config::no_progress()).unwrap() <= 1e-9);
    assert!(logdom.run(&Config::no_progress()).unwrap() <= 1e-9);

    for i in 0..4 {
        assert_close(
            &linear.belief_v(i).unwrap(),
            &logdom.belief_v(i).unwrap(),
            1e-8,
        );
    }
    assert!((linear.log_z().unwrap() - logdom.log_z().unwrap()).abs() < 1e-8);
}

#[test]
fn schedules_share_a_fixed_point() {
    let mut factors = four_cycle([2.0, 1.0, 1.0, 2.0]);
    factors.push(singleton(Var::new(1, 2), &[0.8, 0.2]));

    let reference = {
        let mut bp = make_bp(factors.clone(), UpdateRule::SeqFix, false);
        bp.run(&Config::no_progress()).unwrap();
        (0..4).map(|i| bp.belief_v(i).unwrap()).collect::<Vec<_>>()
    };

    for updates in ALL_SCHEDULES {
        let mut bp = make_bp(factors.clone(), updates, false);
        let maxdiff = bp.run(&Config::no_progress()).unwrap();
        assert!(maxdiff <= 1e-9, "{:?} did not converge", updates);
        for (i, reference_belief) in reference.iter().enumerate() {
            assert_close(&bp.belief_v(i).unwrap(), reference_belief, 1e-8);
        }
    }
}

#[test]
fn residual_schedule_converges_no_slower_than_parallel() {
    let factors = four_cycle([2.0, 1.0, 1.0, 2.0]);

    let mut parall = make_bp(factors.clone(), UpdateRule::Parall, false);
    let mut seqmax = make_bp(factors, UpdateRule::SeqMax, false);
    assert!(parall.run(&Config::no_progress()).unwrap() <= 1e-9);
    assert!(seqmax.run(&Config::no_progress()).unwrap() <= 1e-9);

    for i in 0..4 {
        assert_close(
            &parall.belief_v(i).unwrap(),
            &seqmax.belief_v(i).unwrap(),
            1e-6,
        );
    }
    assert!(seqmax.sweeps() <= parall.sweeps());
}

#[test]
fn residual_schedule_commits_the_largest_residual() {
    // Evidence on two corners keeps the residuals distinct for a while.
    let mut factors = four_cycle([3.0, 1.0, 1.0, 3.0]);
    factors.push(singleton(Var::new(0, 2), &[0.7, 0.3]));
    factors.push(singleton(Var::new(2, 2), &[0.4, 0.6]));

    let mut bp = make_bp(factors, UpdateRule::SeqMax, false);
    bp.stage_messages().unwrap();

    let n_vars = bp.graph().n_vars();
    for _ in 0..2 * bp.graph().n_edges() {
        // Recompute every residual from the message slots and find the
        // argmax by brute scan, lowest edge winning ties.
        let mut expected = None;
        let mut best = f64::NEG_INFINITY;
        for i in 0..n_vars {
            for _i in 0..bp.graph().nb_v(i).len() {
                let r = dist(bp.new_message(i, _i), bp.message(i, _i), DistKind::LInf);
                assert_eq!(r, bp.residual(i, _i));
                if expected.is_none() || r > best {
                    best = r;
                    expected = Some((i, _i));
                }
            }
        }

        let committed = bp.commit_max_residual().unwrap();
        assert_eq!(Some(committed), expected);
        assert_eq!(bp.residual(committed.0, committed.1), 0.0);
        assert_eq!(
            dist(
                bp.new_message(committed.0, committed.1),
                bp.message(committed.0, committed.1),
                DistKind::LInf
            ),
            0.0
        );
    }
}

#[test]
fn strong_couplings_do_not_panic() {
    // Strongly attractive cycle with a nudge that breaks the symmetric
    // fixed point; non-convergence is allowed but must be reported through
    // the return value, not an error.
    let mut factors = four_cycle([10.0, 1.0, 1.0, 10.0]);
    factors.push(singleton(Var::new(0, 2), &[0.55, 0.45]));

    let graph = Arc::new(FactorGraph::new(factors).unwrap());
    let mut bp = Bp::with_options(
        Arc::clone(&graph),
        BpOptions {
            updates: UpdateRule::Parall,
            tol: 1e-9,
            max_iter: 1000,
            verbose: 0,
            log_domain: false,
        },
    );
    let maxdiff = bp.run(&Config::no_progress()).unwrap();
    assert!(maxdiff.is_finite());

    // With a tiny sweep budget the same run must stop early and report the
    // outstanding change.
    let mut bp = Bp::with_options(
        graph,
        BpOptions {
            updates: UpdateRule::Parall,
            tol: 1e-9,
            max_iter: 2,
            verbose: 0,
            log_domain: false,
        },
    );
    let maxdiff = bp.run(&Config::no_progress()).unwrap();
    assert!(maxdiff > 1e-9);
    assert_eq!(bp.sweeps(), 2);
    assert_eq!(bp.max_diff(), maxdiff);
    assert!(bp.check_numerics().is_ok());
}

#[test]
fn properties_are_checked_up_front() {
    let x = Var::new(0, 2);
    let graph = Arc::new(FactorGraph::new(vec![singleton(x, &[0.5, 0.5])]).unwrap());

    let mut props = Properties::new();
    props.insert("updates".into(), "SEQFIX".into());
    props.insert("tol".into(), "1e-9".into());
    props.insert("maxiter".into(), "100".into());
    props.insert("verbose".into(), "0".into());
    assert!(matches!(
        Bp::new(Arc::clone(&graph), &props),
        Err(Error::MissingProperty("logdomain"))
    ));

    props.insert("logdomain".into(), "maybe".into());
    assert!(matches!(
        Bp::new(Arc::clone(&graph), &props),
        Err(Error::InvalidProperty { key: "logdomain", .. })
    ));

    props.insert("logdomain".into(), "false".into());
    let bp = Bp::new(Arc::clone(&graph), &props).unwrap();
    assert_eq!(
        bp.identify(),
        "BP[updates=SEQFIX,tol=0.000000001,maxiter=100,verbose=0,logdomain=false]"
    );

    props.insert("updates".into(), "sometimes".into());
    assert!(matches!(
        Bp::new(Arc::clone(&graph), &props),
        Err(Error::InvalidProperty { key: "updates", .. })
    ));

    props.insert("updates".into(), "SEQMAX".into());
    props.insert("tol".into(), "-1".into());
    assert!(matches!(
        Bp::new(graph, &props),
        Err(Error::InvalidProperty { key: "tol", .. })
    ));
}

#[test]
fn options_round_trip_through_properties() {
    let opts = BpOptions {
        updates: UpdateRule::SeqRnd,
        tol: 1e-6,
        max_iter: 42,
        verbose: 2,
        log_domain: true,
    };
    let back = BpOptions::from_properties(&opts.to_properties()).unwrap();
    assert_eq!(back.updates, UpdateRule::SeqRnd);
    assert_eq!(back.tol, 1e-6);
    assert_eq!(back.max_iter, 42);
    assert_eq!(back.verbose, 2);
    assert!(back.log_domain);
}

#[test]
fn belief_queries() {
    let x = Var::new(0, 2);
    let y = Var::new(1, 2);
    let z = Var::new(2, 2);
    let factors = vec![
        pairwise(x, y, [2.0, 1.0, 1.0, 2.0]),
        pairwise(y, z, [2.0, 1.0, 1.0, 2.0]),
    ];
    let mut bp = make_bp(factors, UpdateRule::SeqFix, false);
    bp.run(&Config::no_progress()).unwrap();

    // Variable beliefs first, factor beliefs after.
    let all = bp.beliefs().unwrap();
    assert_eq!(all.len(), 3 + 2);
    assert_eq!(all[0].vars(), &varset(&[x]));
    assert_eq!(all[3].vars(), &varset(&[x, y]));

    // No factor covers {x, z} jointly.
    assert!(matches!(
        bp.belief(&varset(&[x, z])),
        Err(Error::NoContainingFactor)
    ));

    let stranger = Var::new(9, 2);
    assert!(matches!(
        bp.belief_var(&stranger),
        Err(Error::UnknownVar(9))
    ));
}

#[test]
fn init_resets_messages() {
    let factors = random_tree_factors();
    let mut bp = make_bp(factors, UpdateRule::SeqFix, false);
    bp.run(&Config::no_progress()).unwrap();

    bp.init();
    let b = bp.belief_v(0).unwrap();
    for k in 0..b.nr_states() {
        assert!((b[k] - 1.0 / 3.0).abs() < 1e-12);
    }

    // A fresh run from the neutral state converges again.
    assert!(bp.run(&Config::no_progress()).unwrap() <= 1e-9);
}

#[test]
fn partial_init_resets_only_the_given_variables() {
    let factors = random_tree_factors();
    let mut bp = make_bp(factors, UpdateRule::SeqFix, false);
    bp.run(&Config::no_progress()).unwrap();

    // Only the committed slots are reset; the staged messages driving the
    // beliefs are untouched, so beliefs survive a partial re-init.
    let x4 = Var::new(4, 2);
    let before = bp.belief_var(&x4).unwrap();
    bp.init_vars(&VarSet::from(x4)).unwrap();
    assert_close(&bp.belief_var(&x4).unwrap(), &before, 1e-15);

    assert!(bp
        .init_vars(&VarSet::from(Var::new(17, 2)))
        .is_err());
}

#[test]
fn graph_construction_checks_labels() {
    let x = Var::new(0, 2);
    let clash = Var::new(0, 3);
    let y = Var::new(1, 2);

    let err = FactorGraph::new(vec![
        singleton(x, &[0.5, 0.5]),
        Factor::new(varset(&[clash, y]), ProbVec::from_vec(vec![1.0; 6])),
    ]);
    assert!(matches!(err, Err(Error::InconsistentStates(0))));

    let graph = FactorGraph::new(vec![pairwise(x, y, [2.0, 1.0, 1.0, 2.0])]).unwrap();
    assert_eq!(graph.n_vars(), 2);
    assert_eq!(graph.n_factors(), 1);
    assert_eq!(graph.n_edges(), 2);
    assert_eq!(graph.find_var(&x).unwrap(), 0);
    assert_eq!(graph.find_var(&y).unwrap(), 1);

    // Neighbor cross-references are mutually consistent.
    for i in 0..graph.n_vars() {
        for nb in graph.nb_v(i) {
            let back = &graph.nb_f(nb.node)[nb.dual];
            assert_eq!(back.node, i);
            assert_eq!(back.dual, nb.iter);
        }
    }
}
