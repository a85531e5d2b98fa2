//!
//! end-to-end tests of composition, DP and EM
//!
#[macro_use]
extern crate approx;

use fstem::basecall::{basecalling_machine, basecalling_params, basecalling_prior};
use fstem::common::{symbol_seq, SeqPair};
use fstem::dp::viterbi::viterbi_log_like;
use fstem::expr::WeightExpr;
use fstem::fit::{FitStatus, GaussianDecoder, MachineFitter};
use fstem::gaussian::GaussianParams;
use fstem::machine::evaluated::EvaluatedMachine;
use fstem::machine::Machine;
use fstem::params::{Constraints, Params};
use fstem::trace::{Trace, TraceMoments, TraceParams};
use itertools::izip;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn generator_acceptor_match_and_mismatch() {
    init_logging();
    // generator("ab") | acceptor("ab") -> finite; | acceptor("ac") -> -inf
    let g = Machine::generator("g", &symbol_seq("ab"));
    let hit = Machine::compose(&g, &Machine::acceptor("a", &symbol_seq("ab")));
    let miss = Machine::compose(&g, &Machine::acceptor("a", &symbol_seq("ac")));
    let ll_hit = viterbi_log_like(&hit, &Params::new(), &[], 1 << 20, 1.0).unwrap();
    let ll_miss = viterbi_log_like(&miss, &Params::new(), &[], 1 << 20, 1.0).unwrap();
    assert_eq!(ll_hit, 0.0);
    assert_eq!(ll_miss, f64::NEG_INFINITY);
}

#[test]
fn concatenation_accepts_exactly_the_concatenation() {
    init_logging();
    let cat = Machine::concatenate(
        &Machine::acceptor("s1", &symbol_seq("ab")),
        &Machine::acceptor("s2", &symbol_seq("ba")),
    );
    for (input, expect_finite) in [("abba", true), ("abab", false), ("ab", false)] {
        let piped = Machine::compose(&Machine::generator("g", &symbol_seq(input)), &cat);
        let ll = viterbi_log_like(&piped, &Params::new(), &[], 1 << 20, 1.0).unwrap();
        assert_eq!(ll.is_finite(), expect_finite, "input {}", input);
    }
}

#[test]
fn kleene_closure_accepts_repetitions() {
    init_logging();
    let unit = Machine::acceptor("u", &symbol_seq("ab"));
    let star = unit.kleene_closure(None);
    for (input, expect_finite) in [("", true), ("ab", true), ("abab", true), ("aba", false)] {
        let piped = Machine::compose(&Machine::generator("g", &symbol_seq(input)), &star);
        let ll = viterbi_log_like(&piped, &Params::new(), &[], 1 << 20, 1.0).unwrap();
        assert_eq!(ll.is_finite(), expect_finite, "input {}", input);
    }
}

#[test]
fn union_weights_the_branches() {
    init_logging();
    let u = Machine::union_of(
        &Machine::generator("a", &symbol_seq("x")),
        &Machine::generator("b", &symbol_seq("y")),
        Some(WeightExpr::param("w")),
    );
    let mut params = Params::new();
    params.set("w", 0.25);
    let eval = EvaluatedMachine::new(&u, &params).unwrap();
    let mut vx = fstem::dp::viterbi::ViterbiMatrix::new(&eval, &symbol_seq("x"), 1 << 20, 1.0);
    let mut vy = fstem::dp::viterbi::ViterbiMatrix::new(&eval, &symbol_seq("y"), 1 << 20, 1.0);
    assert_abs_diff_eq!(vx.log_like(), 0.25f64.ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(vy.log_like(), 0.75f64.ln(), epsilon = 1e-12);
}

#[test]
fn band_one_equals_unrestricted() {
    init_logging();
    // a machine long enough for the band to bite when narrow
    let m = Machine::generator("g", &symbol_seq("abcabcabcabc"));
    let out = symbol_seq("abcabcabcabc");
    let full = viterbi_log_like(&m, &Params::new(), &out, 1 << 20, 1.0).unwrap();
    let banded = viterbi_log_like(&m, &Params::new(), &out, 1 << 20, 0.5).unwrap();
    assert_eq!(full, 0.0);
    // the diagonal path of a linear chain lies inside any centered band
    assert_eq!(banded, full);
}

#[test]
fn checkpoint_budget_does_not_change_results() {
    init_logging();
    let m = Machine::generator("g", &symbol_seq("abcabcabcabcabcabc"));
    let out = symbol_seq("abcabcabcabcabcabc");
    let reference = viterbi_log_like(&m, &Params::new(), &out, usize::MAX, 1.0).unwrap();
    // 19 states -> 152 bytes per column: budgets below that degenerate to
    // per-column checkpoints, larger ones exercise real blocks
    for block_bytes in [1, 64, 320, 800, 1 << 12] {
        let ll = viterbi_log_like(&m, &Params::new(), &out, block_bytes, 1.0).unwrap();
        assert_eq!(ll, reference, "block_bytes {}", block_bytes);
    }
}

#[test]
fn default_params_scenario() {
    let cons: Constraints =
        serde_json::from_str(r#"{"norm":[["a","b","c"]],"prob":["p"],"rate":["r"]}"#).unwrap();
    let params = cons.default_params();
    for (name, expect) in izip!(
        vec!["a", "b", "c", "p", "r"],
        vec![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0, 0.5, 1.0]
    ) {
        assert_abs_diff_eq!(params.get(name).unwrap(), expect, epsilon = 1e-12);
    }
}

#[test]
fn em_training_is_monotonic_and_converges() {
    init_logging();
    // substitution channel: input a or b, output matches with pMatch or
    // flips with pFlip
    use fstem::machine::MachineEdge;
    use petgraph::graph::DiGraph;
    let mut graph = DiGraph::new();
    let s = graph.add_node("s".to_string());
    let e = graph.add_node("e".to_string());
    for (inp, out, p) in [
        ("a", "a", "pMatch"),
        ("a", "b", "pFlip"),
        ("b", "b", "pMatch"),
        ("b", "a", "pFlip"),
    ] {
        graph.add_edge(
            s,
            s,
            MachineEdge::new(
                Some(inp.to_string()),
                Some(out.to_string()),
                WeightExpr::param(p),
            ),
        );
    }
    graph.add_edge(s, e, MachineEdge::silent(WeightExpr::one()));
    let channel = Machine::from_graph(graph);

    let cons = Constraints {
        norm: vec![vec!["pMatch".to_string(), "pFlip".to_string()]],
        prob: vec![],
        rate: vec![],
    };
    // 3 matches : 1 flip per pair below
    let data = vec![
        SeqPair::new("p1", "ab", "ab"),
        SeqPair::new("p2", "ba", "bb"),
        SeqPair::new("p3", "aa", "aa"),
        SeqPair::new("p4", "bb", "ab"),
    ];
    let fitter = MachineFitter::new(channel, cons, Params::new());
    let result = fitter.fit(&data).unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    // 6 matched positions, 2 flipped
    assert_abs_diff_eq!(result.params.get("pMatch").unwrap(), 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(result.params.get("pFlip").unwrap(), 0.25, epsilon = 1e-6);
}

#[test]
fn trace_decode_with_calibration_fitting() {
    init_logging();
    let alphabet = ['a', 'b'];
    let machine = basecalling_machine(&alphabet, 1);
    let mut model = basecalling_params(&alphabet, 1);
    model
        .gauss
        .insert("emit(a)".to_string(), GaussianParams { mu: -1.0, tau: 16.0 });
    model
        .gauss
        .insert("emit(b)".to_string(), GaussianParams { mu: 1.0, tau: 16.0 });
    let prior = basecalling_prior(&alphabet, 1).unwrap();
    // the trace lives in raw signal space: x = 10 + 2 * level
    let raw: Vec<f64> = [-1.0, -1.0, 1.0, -1.0, 1.0, 1.0]
        .iter()
        .map(|level| 10.0 + 2.0 * level)
        .collect();
    let trace = Trace::new("t", raw);
    let moments = TraceMoments::from_samples(&trace);
    let mut decoder = GaussianDecoder::new(machine, model, prior, vec![moments]);
    decoder.trainer.max_iter = 10;
    let calls = decoder.decode().unwrap();
    assert_eq!(calls.len(), 1);
    let called = calls[0].join("");
    // stay loops absorb the repeats: a(2), b, a, b(2) -> "abab"
    assert_eq!(called, "abab");
    // fitted calibration should land near shift 10, scale 2
    let tp: TraceParams = decoder.trainer.trace_params.params[0];
    assert_abs_diff_eq!(tp.shift, 10.0, epsilon = 0.5);
    assert_abs_diff_eq!(tp.scale, 2.0, epsilon = 0.5);
}
