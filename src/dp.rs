//!
//! banded, checkpointed dynamic-programming engine
//!
//! One generic recurrence serves both Viterbi (max-combine) and
//! forward/backward (log-sum-exp combine): the traversal, diagonal banding
//! and checkpoint/recompute memory policy are shared, and only the
//! [`Combine`] strategy and the [`EmissionScorer`] differ.
//!
//! ## Column recurrence
//!
//! ```text
//! col[outPos][dest]
//!   = combine over banded emitting transitions t into dest of
//!       col[outPos-1][t.src] + t.logWeight + logScore(outPos, t)
//! ```
//!
//! followed by silent transitions applied within the column to fixpoint.
//!
//! ## Memory policy
//!
//! Columns are materialized as they are computed; every `block_size`-th
//! column is retained as a checkpoint and the rest are dropped once the
//! sweep crosses a block boundary. `ready_column` refills a discarded
//! block from its checkpoint on demand, so a full backward traceback
//! revisits each block at most once. Memory is O(block_size x n_states)
//! plus the checkpoints instead of O(out_len x n_states).
//!
pub mod forward;
pub mod trace;
pub mod viterbi;

use crate::machine::evaluated::{EvaluatedMachine, EvaluatedTrans};
use crate::prob::logsumexp;
use crate::common::StateIndex;
use log::debug;
use std::marker::PhantomData;

///
/// The one semantic axis of the recurrence: how two path scores for the
/// same cell are combined.
///
pub trait Combine {
    const IDENTITY: f64;
    fn combine(a: f64, b: f64) -> f64;
}

/// Viterbi: keep the best path score.
pub struct MaxCombine;
impl Combine for MaxCombine {
    const IDENTITY: f64 = f64::NEG_INFINITY;
    fn combine(a: f64, b: f64) -> f64 {
        a.max(b)
    }
}

/// Forward/backward: sum path scores in log space.
pub struct SumCombine;
impl Combine for SumCombine {
    const IDENTITY: f64 = f64::NEG_INFINITY;
    fn combine(a: f64, b: f64) -> f64 {
        logsumexp(a, b)
    }
}

///
/// Scores the observation consumed by an emitting transition at a column.
///
/// Discrete sequences score 0 on a token match and -inf otherwise; trace
/// events score the event moments under the destination state's emission
/// density (plus the self-loop charge for multi-sample events).
///
pub trait EmissionScorer {
    /// number of observation positions
    fn out_len(&self) -> usize;
    /// log score of taking `t` while consuming observation column
    /// `out_pos` (1-based); -inf excludes the transition
    fn log_score(&self, out_pos: usize, t: &EvaluatedTrans, eval: &EvaluatedMachine) -> f64;
}

/// Discrete output-symbol observations.
pub struct SeqEmission {
    pub tokens: Vec<usize>,
}

impl EmissionScorer for SeqEmission {
    fn out_len(&self) -> usize {
        self.tokens.len()
    }
    fn log_score(&self, out_pos: usize, t: &EvaluatedTrans, _eval: &EvaluatedMachine) -> f64 {
        if t.out_tok == self.tokens[out_pos - 1] {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
}

///
/// The banded, checkpointed DP table.
///
pub struct DpMatrix<'a, C: Combine, E: EmissionScorer> {
    pub eval: &'a EvaluatedMachine,
    pub emission: E,
    pub out_len: usize,
    band_width: f64,
    block_size: usize,
    /// columns 0, block_size, 2*block_size, ... retained for refills
    checkpoints: Vec<Vec<f64>>,
    /// columns after the current block's checkpoint
    block: Vec<Vec<f64>>,
    block_start: usize,
    _combine: PhantomData<C>,
}

impl<'a, C: Combine, E: EmissionScorer> DpMatrix<'a, C, E> {
    ///
    /// Build the matrix and run the full forward sweep.
    ///
    /// `block_bytes` is the approximate memory budget for live (non
    /// checkpoint) columns; `band_width` is the retained fraction of the
    /// full matrix around the main diagonal (>= 1 disables banding).
    ///
    pub fn new(
        eval: &'a EvaluatedMachine,
        emission: E,
        block_bytes: usize,
        band_width: f64,
    ) -> DpMatrix<'a, C, E> {
        let out_len = emission.out_len();
        let bytes_per_column = 8 * eval.n_states;
        let block_size = std::cmp::max(1, block_bytes / std::cmp::max(1, bytes_per_column));
        let mut m = DpMatrix {
            eval,
            emission,
            out_len,
            band_width,
            block_size,
            checkpoints: Vec::new(),
            block: Vec::new(),
            block_start: 0,
            _combine: PhantomData,
        };
        let mut col0 = vec![C::IDENTITY; eval.n_states];
        col0[eval.start()] = 0.0;
        m.apply_null(&mut col0);
        m.checkpoints.push(col0);
        for out_pos in 1..=out_len {
            m.fill_column(out_pos);
        }
        m
    }

    ///
    /// Band of active states for a column: those within
    /// `band_width * max(n_states, out_len) / 2` of the column's
    /// proportional position on the main diagonal.
    ///
    fn band(&self, out_pos: usize) -> (StateIndex, StateIndex) {
        let n = self.eval.n_states;
        if self.band_width >= 1.0 || self.out_len == 0 {
            return (0, n);
        }
        let center = out_pos as f64 * n as f64 / self.out_len as f64;
        let half = (self.band_width * std::cmp::max(n, self.out_len) as f64 / 2.0).ceil();
        let lo = (center - half).max(0.0) as StateIndex;
        let hi = std::cmp::min(n, (center + half) as StateIndex + 1);
        (lo, hi)
    }

    fn fill_column(&mut self, out_pos: usize) {
        let mut col = {
            let prev = self.column(out_pos - 1);
            let mut col = vec![C::IDENTITY; self.eval.n_states];
            let (lo, hi) = self.band(out_pos);
            for dest in lo..hi {
                for &ti in &self.eval.emit_by_dest[dest] {
                    let t = &self.eval.trans[ti];
                    if prev[t.src] == f64::NEG_INFINITY {
                        continue;
                    }
                    let score = self.emission.log_score(out_pos, t, self.eval);
                    if score == f64::NEG_INFINITY {
                        continue;
                    }
                    col[dest] = C::combine(col[dest], prev[t.src] + t.log_weight + score);
                }
            }
            col
        };
        self.apply_null(&mut col);
        self.push_column(out_pos, col);
    }

    ///
    /// Apply silent transitions within a column until fixpoint: a single
    /// pass when the silent subgraph is acyclic (transitions are in
    /// topological order), bounded iteration otherwise.
    ///
    fn apply_null(&self, col: &mut Vec<f64>) {
        let max_passes = if self.eval.silent_acyclic {
            1
        } else {
            self.eval.n_states
        };
        for _ in 0..max_passes {
            let mut changed = false;
            for &ti in &self.eval.null_trans {
                let t = &self.eval.trans[ti];
                if col[t.src] == f64::NEG_INFINITY {
                    continue;
                }
                let v = C::combine(col[t.dest], col[t.src] + t.log_weight);
                if v != col[t.dest] {
                    col[t.dest] = v;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn push_column(&mut self, out_pos: usize, col: Vec<f64>) {
        if out_pos % self.block_size == 0 {
            // block boundary: retain as checkpoint, drop the old block
            let index = out_pos / self.block_size;
            if self.checkpoints.len() == index {
                self.checkpoints.push(col);
            }
            self.block.clear();
            self.block_start = out_pos;
        } else {
            let index = out_pos - self.block_start - 1;
            if index == self.block.len() {
                self.block.push(col);
            } else {
                self.block[index] = col;
            }
        }
    }

    pub fn column(&self, out_pos: usize) -> &Vec<f64> {
        if out_pos % self.block_size == 0 {
            &self.checkpoints[out_pos / self.block_size]
        } else {
            &self.block[out_pos - self.block_start - 1]
        }
    }

    pub fn cell(&self, out_pos: usize, state: StateIndex) -> f64 {
        self.column(out_pos)[state]
    }

    ///
    /// Make a (possibly discarded) column readable again, refilling its
    /// whole block from the preceding checkpoint if necessary.
    ///
    pub fn ready_column(&mut self, out_pos: usize) {
        if out_pos % self.block_size == 0 {
            return; // checkpoints are always live
        }
        let block_start = out_pos - out_pos % self.block_size;
        let have = self.block_start == block_start
            && out_pos - block_start <= self.block.len();
        if !have {
            let block_end = std::cmp::min(self.out_len, block_start + self.block_size - 1);
            debug!(
                "refilling DP columns {}..{} from checkpoint {}",
                block_start + 1,
                block_end,
                block_start
            );
            self.block.clear();
            self.block_start = block_start;
            for pos in block_start + 1..=block_end {
                self.fill_column(pos);
            }
        }
    }

    /// Accumulated value of the end state after the full sweep.
    pub fn final_value(&mut self) -> f64 {
        self.ready_column(self.out_len);
        self.cell(self.out_len, self.eval.end())
    }
}
