//!
//! forward/backward expectations over discrete output sequences
//!
//! The forward sweep is the checkpointed sum-combine matrix; the backward
//! sweep runs in the opposite direction holding only two live columns,
//! reading forward columns back through `ready_column` and accumulating
//! posterior transition counts on the fly:
//!
//! ```text
//! n_t += exp( f[outPos][src] + logWeight + emit + b[outPos+1][dest] - logZ )
//! ```
//!
//! No traceback is needed; the counts are the sufficient statistics the
//! EM trainer consumes.
//!
use super::{Combine, DpMatrix, SeqEmission, SumCombine};
use crate::common::{OutputSymbol, UNKNOWN_TOKEN};
use crate::error::Result;
use crate::machine::evaluated::EvaluatedMachine;
use crate::prob::logsumexp;

///
/// Expected traversal count per transition of an `EvaluatedMachine`.
///
#[derive(Debug, Clone)]
pub struct MachineCounts {
    pub trans: Vec<f64>,
}

impl MachineCounts {
    pub fn new(n_trans: usize) -> MachineCounts {
        MachineCounts {
            trans: vec![0.0; n_trans],
        }
    }
    /// elementwise sum (deterministic merge point for parallel E-steps)
    pub fn merge(&mut self, other: &MachineCounts) {
        for (a, b) in self.trans.iter_mut().zip(&other.trans) {
            *a += b;
        }
    }
    pub fn total(&self) -> f64 {
        self.trans.iter().sum()
    }
}

/// backward in-column silent application: reverse order, so a transition's
/// destination value is complete before its source reads it
pub(crate) fn apply_null_backward(eval: &EvaluatedMachine, col: &mut Vec<f64>) {
    let max_passes = if eval.silent_acyclic { 1 } else { eval.n_states };
    for _ in 0..max_passes {
        let mut changed = false;
        for &ti in eval.null_trans.iter().rev() {
            let t = &eval.trans[ti];
            if col[t.dest] == f64::NEG_INFINITY {
                continue;
            }
            let v = logsumexp(col[t.src], t.log_weight + col[t.dest]);
            if v != col[t.src] {
                col[t.src] = v;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

pub(crate) fn accumulate_null_counts(
    eval: &EvaluatedMachine,
    fwd_col: &[f64],
    bwd_col: &[f64],
    log_z: f64,
    counts: &mut MachineCounts,
) {
    for &ti in &eval.null_trans {
        let t = &eval.trans[ti];
        let score = fwd_col[t.src] + t.log_weight + bwd_col[t.dest] - log_z;
        if score != f64::NEG_INFINITY {
            counts.trans[ti] += score.exp();
        }
    }
}

///
/// Run forward and backward over an output sequence and return
/// `(log_likelihood, expected transition counts)`.
///
/// A non-finite likelihood returns zero counts; the caller decides whether
/// to skip the example or abort.
///
pub fn forward_backward(
    eval: &EvaluatedMachine,
    output: &[OutputSymbol],
    block_bytes: usize,
    band_width: f64,
) -> Result<(f64, MachineCounts)> {
    let tokens = eval.tokenize_outputs(output);
    let mut fwd = DpMatrix::<SumCombine, SeqEmission>::new(
        eval,
        SeqEmission {
            tokens: tokens.clone(),
        },
        block_bytes,
        band_width,
    );
    let log_z = fwd.final_value();
    let mut counts = MachineCounts::new(eval.n_trans());
    if log_z == f64::NEG_INFINITY {
        return Ok((log_z, counts));
    }

    let out_len = fwd.out_len;
    let mut b_next = vec![SumCombine::IDENTITY; eval.n_states];
    b_next[eval.end()] = 0.0;
    apply_null_backward(eval, &mut b_next);
    fwd.ready_column(out_len);
    accumulate_null_counts(eval, fwd.column(out_len), &b_next, log_z, &mut counts);

    for out_pos in (0..out_len).rev() {
        let tok = tokens[out_pos];
        fwd.ready_column(out_pos);
        let mut b_cur = vec![SumCombine::IDENTITY; eval.n_states];
        if tok != UNKNOWN_TOKEN {
            for &ti in &eval.emit_by_tok[tok] {
                let t = &eval.trans[ti];
                let contrib = t.log_weight + b_next[t.dest];
                if contrib == f64::NEG_INFINITY {
                    continue;
                }
                b_cur[t.src] = logsumexp(b_cur[t.src], contrib);
                let post = fwd.cell(out_pos, t.src) + contrib - log_z;
                if post != f64::NEG_INFINITY {
                    counts.trans[ti] += post.exp();
                }
            }
        }
        apply_null_backward(eval, &mut b_cur);
        accumulate_null_counts(eval, fwd.column(out_pos), &b_cur, log_z, &mut counts);
        b_next = b_cur;
    }

    Ok((log_z, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::symbol_seq;
    use crate::machine::Machine;
    use crate::params::Params;

    #[test]
    fn forward_backward_deterministic_chain() {
        let m = Machine::generator("g", &symbol_seq("abc"));
        let eval = EvaluatedMachine::new(&m, &Params::new()).unwrap();
        let (log_z, counts) = forward_backward(&eval, &symbol_seq("abc"), 1 << 20, 1.0).unwrap();
        assert_eq!(log_z, 0.0);
        // every transition of the chain is used exactly once
        for &c in &counts.trans {
            assert_abs_diff_eq!(c, 1.0, epsilon = 1e-9);
        }
    }
    #[test]
    fn forward_backward_infeasible_output() {
        let m = Machine::generator("g", &symbol_seq("abc"));
        let eval = EvaluatedMachine::new(&m, &Params::new()).unwrap();
        let (log_z, counts) = forward_backward(&eval, &symbol_seq("abd"), 1 << 20, 1.0).unwrap();
        assert_eq!(log_z, f64::NEG_INFINITY);
        assert_eq!(counts.total(), 0.0);
    }
    #[test]
    fn forward_backward_union_splits_posterior() {
        use crate::expr::WeightExpr;
        // union of two generators for the same sequence with weight w:
        // posterior mass on the branches must be w and 1-w
        let a = Machine::generator("a", &symbol_seq("x"));
        let b = Machine::generator("b", &symbol_seq("x"));
        let u = Machine::union_of(&a, &b, Some(WeightExpr::param("w")));
        let mut params = Params::new();
        params.set("w", 0.3);
        let eval = EvaluatedMachine::new(&u, &params).unwrap();
        let (log_z, counts) = forward_backward(&eval, &symbol_seq("x"), 1 << 20, 1.0).unwrap();
        assert_abs_diff_eq!(log_z, 0.0, epsilon = 1e-9);
        // the two branch transitions are the silent edges out of state 0
        let mut branch: Vec<f64> = eval
            .null_trans
            .iter()
            .filter(|&&ti| eval.trans[ti].src == 0)
            .map(|&ti| counts.trans[ti])
            .collect();
        branch.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_abs_diff_eq!(branch[0], 0.3, epsilon = 1e-9);
        assert_abs_diff_eq!(branch[1], 0.7, epsilon = 1e-9);
    }
    #[test]
    fn forward_backward_checkpoint_invariance() {
        let m = Machine::generator("g", &symbol_seq("ababab"));
        let eval = EvaluatedMachine::new(&m, &Params::new()).unwrap();
        let (z1, c1) = forward_backward(&eval, &symbol_seq("ababab"), 1 << 20, 1.0).unwrap();
        // 7 states -> 56 bytes per column: two-column blocks, refills hit
        let (z2, c2) = forward_backward(&eval, &symbol_seq("ababab"), 120, 1.0).unwrap();
        assert_eq!(z1, z2);
        for (a, b) in c1.trans.iter().zip(&c2.trans) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }
}
