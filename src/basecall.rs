//!
//! basecalling machine builder
//!
//! One state per k-mer context plus the shorter prefix contexts that
//! consume the first k-1 bases. Entering a k-mer consumes the new base and
//! emits the k-mer's label (one trace event); an emitting self-loop
//! weighted `pStay` absorbs additional events at the same context, and a
//! move to the next context is weighted `pMove` split uniformly over the
//! alphabet. Every k-mer state exits silently to the end state.
//!
use crate::error::Result;
use crate::expr::WeightExpr;
use crate::gaussian::{GaussianModelParams, GaussianParams};
use crate::machine::{Machine, MachineEdge};
use crate::params::{Constraints, Params};
use crate::prior::{GaussianModelPrior, NormalGammaPrior};
use itertools::Itertools;
use petgraph::graph::DiGraph;
use std::collections::BTreeMap;

/// All strings of length `k` over `alphabet`, in lexicographic order.
pub fn kmers(alphabet: &[char], k: usize) -> Vec<String> {
    if k == 0 {
        return vec![String::new()];
    }
    (0..k)
        .map(|_| alphabet.iter())
        .multi_cartesian_product()
        .map(|chars| chars.into_iter().collect())
        .collect()
}

/// The emission label of a k-mer context.
pub fn emit_label(kmer: &str) -> String {
    format!("emit({})", kmer)
}

pub fn basecalling_machine(alphabet: &[char], k: usize) -> Machine {
    assert!(k >= 1);
    let mut graph = DiGraph::new();
    let mut index: BTreeMap<String, petgraph::graph::NodeIndex> = BTreeMap::new();
    for len in 0..=k {
        for ctx in kmers(alphabet, len) {
            let node = graph.add_node(if ctx.is_empty() {
                "start".to_string()
            } else {
                ctx.clone()
            });
            index.insert(ctx, node);
        }
    }
    let end = graph.add_node("end".to_string());

    let p_stay = WeightExpr::param("pStay");
    let p_move = WeightExpr::mul(
        &WeightExpr::param("pMove"),
        &WeightExpr::constant(1.0 / alphabet.len() as f64),
    );
    let uniform = WeightExpr::constant(1.0 / alphabet.len() as f64);

    // the stay loop is inserted first so it is each state's canonical
    // emitting self-loop
    for kmer in kmers(alphabet, k) {
        let node = index[&kmer];
        graph.add_edge(
            node,
            node,
            MachineEdge::new(None, Some(emit_label(&kmer)), p_stay.clone()),
        );
    }
    // context build-up: prefixes consume one base each; the transition
    // completing the first full k-mer emits its label
    for len in 0..k {
        for ctx in kmers(alphabet, len) {
            let src = index[&ctx];
            for &b in alphabet {
                let next: String = format!("{}{}", ctx, b);
                let dest = index[&next];
                let output = if next.len() == k {
                    Some(emit_label(&next))
                } else {
                    None
                };
                graph.add_edge(
                    src,
                    dest,
                    MachineEdge::new(Some(b.to_string()), output, uniform.clone()),
                );
            }
        }
    }
    // k-mer to k-mer moves: shift in one base, emit the new context
    for kmer in kmers(alphabet, k) {
        let src = index[&kmer];
        for &b in alphabet {
            let next: String = format!("{}{}", &kmer[1..], b);
            let dest = index[&next];
            graph.add_edge(
                src,
                dest,
                MachineEdge::new(Some(b.to_string()), Some(emit_label(&next)), p_move.clone()),
            );
        }
    }
    // silent exits
    for kmer in kmers(alphabet, k) {
        graph.add_edge(index[&kmer], end, MachineEdge::silent(WeightExpr::one()));
    }
    Machine { graph }
}

/// The `{pStay, pMove}` normalized group of the basecalling machine.
pub fn basecalling_constraints() -> Constraints {
    Constraints {
        norm: vec![vec!["pStay".to_string(), "pMove".to_string()]],
        prob: vec![],
        rate: vec![],
    }
}

///
/// Seed parameters: k-mer levels evenly spread over [-2, 2] in normalized
/// signal space, moderate precision, uniform stay/move split.
///
pub fn basecalling_params(alphabet: &[char], k: usize) -> GaussianModelParams {
    let all = kmers(alphabet, k);
    let n = all.len() as f64;
    let gauss = all
        .iter()
        .enumerate()
        .map(|(i, kmer)| {
            let mu = -2.0 + 4.0 * (i as f64 + 0.5) / n;
            (emit_label(kmer), GaussianParams { mu, tau: 4.0 })
        })
        .collect();
    GaussianModelParams {
        gauss,
        prob: basecalling_constraints().default_params(),
        rate: Params::new(),
    }
}

///
/// Prior matching the seed parameters: one Normal-Gamma per k-mer label
/// centered on its seed level, flat Dirichlet pseudo-counts on the
/// stay/move group.
///
pub fn basecalling_prior(alphabet: &[char], k: usize) -> Result<GaussianModelPrior> {
    let seed = basecalling_params(alphabet, k);
    let gauss = seed
        .gauss
        .iter()
        .map(|(label, g)| {
            (
                label.clone(),
                NormalGammaPrior {
                    mu0: g.mu,
                    n_mu: 0.1,
                    tau0: g.tau,
                    n_tau: 3.0,
                },
            )
        })
        .collect();
    let mut count = Params::new();
    count.set("pStay", 1.0);
    count.set("pMove", 1.0);
    GaussianModelPrior::new(basecalling_constraints(), count, gauss, BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::evaluated::EvaluatedMachine;

    #[test]
    fn kmer_enumeration() {
        assert_eq!(kmers(&['a', 'b'], 1), vec!["a", "b"]);
        assert_eq!(kmers(&['a', 'b'], 2), vec!["aa", "ab", "ba", "bb"]);
        assert_eq!(kmers(&['a', 'b'], 0), vec![""]);
    }
    #[test]
    fn machine_shape_k1() {
        let m = basecalling_machine(&['a', 'b'], 1);
        // start, a, b, end
        assert_eq!(m.n_states(), 4);
        assert_eq!(m.end().index(), 3);
        // 2 stay loops + 2 entries + 4 moves + 2 exits
        assert_eq!(m.n_transitions(), 10);
    }
    #[test]
    fn machine_shape_k2() {
        let m = basecalling_machine(&['a', 'b'], 2);
        // 1 + 2 + 4 kmer states + end
        assert_eq!(m.n_states(), 8);
    }
    #[test]
    fn stay_loop_is_canonical_self_loop() {
        let m = basecalling_machine(&['a', 'b'], 1);
        let model = basecalling_params(&['a', 'b'], 1);
        let eval = EvaluatedMachine::new(&m, &model.machine_params()).unwrap();
        for (state, loop_ti) in eval.loop_of.iter().enumerate() {
            if let Some(ti) = loop_ti {
                let t = &eval.trans[*ti];
                assert_eq!(t.src, state);
                // the stay loop consumes no input
                assert_eq!(t.in_tok, 0);
                assert_abs_diff_eq!(t.log_weight, 0.5f64.ln(), epsilon = 1e-12);
            }
        }
    }
    #[test]
    fn prior_is_well_formed() {
        assert!(basecalling_prior(&['a', 'b'], 1).is_ok());
    }
}
