//!
//! DP specializations for continuous traces
//!
//! An observation column is an event summarizing `count` raw samples; a
//! transition into state `dest` is charged the event's Gaussian score plus
//! `(count - 1)` traversals of `dest`'s emitting self-loop for the samples
//! folded into the event. Viterbi traceback reinserts those loop copies
//! into the reconstructed path.
//!
use super::forward::{accumulate_null_counts, apply_null_backward, MachineCounts};
use super::{Combine, DpMatrix, EmissionScorer, MaxCombine, SumCombine};
use crate::error::{Error, Result};
use crate::gaussian::{log_event_density, GaussianCounts, GaussianModelParams, GaussianParams};
use crate::machine::evaluated::{EvaluatedMachine, EvaluatedTrans};
use crate::machine::MachinePath;
use crate::prob::logsumexp;
use crate::trace::{TraceMoments, TraceParams};

///
/// Scores trace events against the destination label's Gaussian under one
/// trace's calibration.
///
pub struct TraceEmission<'a> {
    pub moments: &'a TraceMoments,
    /// Gaussian per output token (index 0 = epsilon, unused)
    gauss: Vec<Option<GaussianParams>>,
    pub trace_params: TraceParams,
}

impl<'a> TraceEmission<'a> {
    pub fn new(
        eval: &EvaluatedMachine,
        model: &GaussianModelParams,
        moments: &'a TraceMoments,
        trace_params: &TraceParams,
    ) -> TraceEmission<'a> {
        let mut gauss = vec![None; eval.output_syms.len() + 1];
        for (i, sym) in eval.output_syms.iter().enumerate() {
            gauss[i + 1] = model.gauss.get(sym).copied();
        }
        TraceEmission {
            moments,
            gauss,
            trace_params: *trace_params,
        }
    }
}

impl<'a> EmissionScorer for TraceEmission<'a> {
    fn out_len(&self) -> usize {
        self.moments.n_events()
    }
    fn log_score(&self, out_pos: usize, t: &EvaluatedTrans, eval: &EvaluatedMachine) -> f64 {
        let g = match self.gauss[t.out_tok] {
            Some(g) => g,
            None => return f64::NEG_INFINITY,
        };
        let event = &self.moments.events[out_pos - 1];
        let mut ll = log_event_density(event, &g, &self.trace_params);
        if event.count > 1 {
            // extra samples are absorbed by the destination's self-loop
            match eval.loop_of[t.dest] {
                Some(li) => ll += (event.count - 1) as f64 * eval.trans[li].log_weight,
                None => return f64::NEG_INFINITY,
            }
        }
        ll
    }
}

///
/// Viterbi over trace events, with loop-reinserting traceback.
///
pub struct ViterbiTraceMatrix<'a> {
    dp: DpMatrix<'a, MaxCombine, TraceEmission<'a>>,
}

impl<'a> ViterbiTraceMatrix<'a> {
    pub fn new(
        eval: &'a EvaluatedMachine,
        model: &GaussianModelParams,
        moments: &'a TraceMoments,
        trace_params: &TraceParams,
        block_bytes: usize,
        band_width: f64,
    ) -> ViterbiTraceMatrix<'a> {
        let emission = TraceEmission::new(eval, model, moments, trace_params);
        let dp = DpMatrix::new(eval, emission, block_bytes, band_width);
        ViterbiTraceMatrix { dp }
    }

    pub fn log_like(&mut self) -> f64 {
        self.dp.final_value()
    }

    ///
    /// Traceback from (out_len, end) to (0, start). A chosen emitting
    /// transition whose event folded `n` samples contributes `n - 1`
    /// copies of the destination's self-loop after it in the path.
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
                let event = &self.dp.emission.moments.events[out_pos - 1];
                for _ in 1..event.count {
                    // loop existence was checked by log_score
                    let li = eval.loop_of[t.dest].unwrap();
                    trans_rev.push(eval.trans[li].edge);
                }
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
/// Sufficient statistics of one trace under the current parameters.
///
#[derive(Debug, Clone)]
pub struct TraceStats {
    pub log_like: f64,
    pub trans: MachineCounts,
    pub gauss: GaussianCounts,
}

///
/// Forward/backward over trace events: expected transition counts (self
/// loop traversals included) and posterior-weighted Gaussian moments.
///
pub fn trace_forward_backward(
    eval: &EvaluatedMachine,
    model: &GaussianModelParams,
    moments: &TraceMoments,
    trace_params: &TraceParams,
    block_bytes: usize,
    band_width: f64,
) -> Result<TraceStats> {
    let emission = TraceEmission::new(eval, model, moments, trace_params);
    let mut fwd =
        DpMatrix::<SumCombine, TraceEmission>::new(eval, emission, block_bytes, band_width);
    let log_z = fwd.final_value();
    let mut trans = MachineCounts::new(eval.n_trans());
    let mut gauss = GaussianCounts::new();
    if log_z == f64::NEG_INFINITY {
        return Ok(TraceStats {
            log_like: log_z,
            trans,
            gauss,
        });
    }

    let out_len = fwd.out_len;
    let tp = fwd.emission.trace_params;
    let mut b_next = vec![SumCombine::IDENTITY; eval.n_states];
    b_next[eval.end()] = 0.0;
    apply_null_backward(eval, &mut b_next);
    fwd.ready_column(out_len);
    accumulate_null_counts(eval, fwd.column(out_len), &b_next, log_z, &mut trans);

    for out_pos in (0..out_len).rev() {
        fwd.ready_column(out_pos);
        let event = moments.events[out_pos];
        let mut b_cur = vec![SumCombine::IDENTITY; eval.n_states];
        for src in 0..eval.n_states {
            for &ti in &eval.outgoing[src] {
                let t = &eval.trans[ti];
                if t.out_tok == 0 {
                    continue;
                }
                let score = fwd.emission.log_score(out_pos + 1, t, eval);
                if score == f64::NEG_INFINITY {
                    continue;
                }
                let contrib = t.log_weight + score + b_next[t.dest];
                if contrib == f64::NEG_INFINITY {
                    continue;
                }
                b_cur[t.src] = logsumexp(b_cur[t.src], contrib);
                let post = fwd.cell(out_pos, t.src) + contrib - log_z;
                if post == f64::NEG_INFINITY {
                    continue;
                }
                let gamma = post.exp();
                trans.trans[ti] += gamma;
                if event.count > 1 {
                    if let Some(li) = eval.loop_of[t.dest] {
                        trans.trans[li] += gamma * (event.count - 1) as f64;
                    }
                }
                let label = &eval.output_syms[t.out_tok - 1];
                gauss.observe(label, gamma, &event, &tp);
            }
        }
        apply_null_backward(eval, &mut b_cur);
        accumulate_null_counts(eval, fwd.column(out_pos), &b_cur, log_z, &mut trans);
        b_next = b_cur;
    }

    Ok(TraceStats {
        log_like: log_z,
        trans,
        gauss,
    })
}
