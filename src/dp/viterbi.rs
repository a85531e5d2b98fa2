//!
//! Viterbi decoding over discrete output sequences
//!
use super::{DpMatrix, EmissionScorer, MaxCombine, SeqEmission};
use crate::common::OutputSymbol;
use crate::error::{Error, Result};
use crate::machine::evaluated::EvaluatedMachine;
use crate::machine::{Machine, MachinePath};
use crate::params::Params;

///
/// Max-combine DP over an output symbol sequence, with traceback.
///
pub struct ViterbiMatrix<'a> {
    dp: DpMatrix<'a, MaxCombine, SeqEmission>,
}

impl<'a> ViterbiMatrix<'a> {
    pub fn new(
        eval: &'a EvaluatedMachine,
        output: &[OutputSymbol],
        block_bytes: usize,
        band_width: f64,
    ) -> ViterbiMatrix<'a> {
        let tokens = eval.tokenize_outputs(output);
        let dp = DpMatrix::new(eval, SeqEmission { tokens }, block_bytes, band_width);
        ViterbiMatrix { dp }
    }

    pub fn log_like(&mut self) -> f64 {
        self.dp.final_value()
    }

    ///
    /// Reconstruct the best path by walking incoming transitions backward
    /// from (out_len, end) to (0, start).
    ///
    /// Exact ties go to the first transition encountered in iteration
    /// order; this is stable for a given machine build but is an
    /// implementation choice, not a contract.
    ///
    pub fn path(&mut self) -> Result<MachinePath> {
        if self.log_like() == f64::NEG_INFINITY {
            return Err(Error::NoFinitePath);
        }
        let eval = self.dp.eval;
        let mut out_pos = self.dp.out_len;
        let mut state = eval.end();
        let mut trans_rev = Vec::new();
        while out_pos > 0 || state != eval.start() {
            self.dp.ready_column(out_pos.saturating_sub(1));
            self.dp.ready_column(out_pos);
            let mut best: Option<(f64, usize)> = None;
            for &ti in &eval.incoming[state] {
                let t = &eval.trans[ti];
                let value = if t.out_tok != 0 {
                    if out_pos == 0 {
                        continue;
                    }
                    let score = self.dp.emission.log_score(out_pos, t, eval);
                    if score == f64::NEG_INFINITY {
                        continue;
                    }
                    self.dp.cell(out_pos - 1, t.src) + t.log_weight + score
                } else {
                    self.dp.cell(out_pos, t.src) + t.log_weight
                };
                if best.map_or(true, |(b, _)| value > b) {
                    best = Some((value, ti));
                }
            }
            let (value, ti) = best.ok_or(Error::NoFinitePath)?;
            if value == f64::NEG_INFINITY {
                return Err(Error::NoFinitePath);
            }
            let t = &eval.trans[ti];
            if t.out_tok != 0 {
                out_pos -= 1;
            }
            state = t.src;
            trans_rev.push(t.edge);
        }
        trans_rev.reverse();
        Ok(MachinePath { trans: trans_rev })
    }
}

///
/// Convenience: evaluate a machine and return the Viterbi log-likelihood
/// of an output sequence.
///
pub fn viterbi_log_like(
    machine: &Machine,
    params: &Params,
    output: &[OutputSymbol],
    block_bytes: usize,
    band_width: f64,
) -> Result<f64> {
    let eval = EvaluatedMachine::new(machine, params)?;
    let mut v = ViterbiMatrix::new(&eval, output, block_bytes, band_width);
    Ok(v.log_like())
}
