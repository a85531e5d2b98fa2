//!
//! EM parameter estimation
//!
//! Two trainers share the same loop shape: the E-step runs the DP engine
//! over every example (rayon fan-out, merged deterministically in example
//! order), the M-step differentiates expected log-likelihood + log-prior
//! with `WeightExpr::deriv` and solves closed forms where the family is
//! conjugate (Dirichlet for normalized groups, Normal-Gamma for Gaussians,
//! Gamma for rates), falling back to bounded projected gradient steps for
//! free probabilities and rate-valued weight parameters.
//!
//! A single example with non-finite log-likelihood is logged and skipped
//! for the iteration; a batch where every example fails is
//! `Error::NoTrainableData`.
//!
use crate::common::{InputSymbol, SeqPair};
use crate::dp::forward::{forward_backward, MachineCounts};
use crate::dp::trace::{trace_forward_backward, TraceStats, ViterbiTraceMatrix};
use crate::error::{Error, Result};
use crate::gaussian::{GaussianCounts, GaussianModelParams};
use crate::machine::evaluated::EvaluatedMachine;
use crate::machine::Machine;
use crate::params::{Constraints, Params};
use crate::prior::{log_dirichlet_pdf, GaussianModelPrior};
use crate::prob::lp;
use crate::trace::{TraceListParams, TraceMoments};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;

pub const DEFAULT_MAX_ITER: usize = 100;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_BLOCK_BYTES: usize = 1 << 27;

///
/// Terminal state of an EM run.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged,
    /// reported, not fatal: the caller decides whether to accept
    IterationLimitReached,
}

///
/// Per-parameter statistics of one E-step:
///
/// ```text
/// usage[x] = sum_t n_t * x * d(log w_t)/dx    (Dirichlet closed form)
/// grad[x]  = sum_t n_t * d(log w_t)/dx        (gradient steps)
/// ```
///
/// Exact for the closed form whenever `w_t` is a monomial in the group
/// parameters, which covers machines whose weights are bare parameters or
/// products of parameters and constants.
///
fn param_stats(
    machine: &Machine,
    eval: &EvaluatedMachine,
    counts: &MachineCounts,
    params: &Params,
    usage: &mut BTreeMap<String, f64>,
    grad: &mut BTreeMap<String, f64>,
) -> Result<()> {
    for (ti, &n_t) in counts.trans.iter().enumerate() {
        if n_t <= 0.0 {
            continue;
        }
        let t = &eval.trans[ti];
        let weight = &machine.edge(t.edge).weight;
        let w_val = weight.eval(params)?;
        if w_val <= 0.0 {
            continue;
        }
        for name in weight.params() {
            let d_log = weight.deriv(&name).eval(params)? / w_val;
            *grad.entry(name.clone()).or_insert(0.0) += n_t * d_log;
            let x = params.get(&name)?;
            *usage.entry(name).or_insert(0.0) += n_t * d_log * x;
        }
    }
    Ok(())
}

fn merge_maps(into: &mut BTreeMap<String, f64>, from: BTreeMap<String, f64>) {
    for (name, value) in from {
        *into.entry(name).or_insert(0.0) += value;
    }
}

///
/// Baum-Welch fitting of a symbolically-weighted machine against
/// (input, output) sequence pairs.
///
pub struct MachineFitter {
    pub machine: Machine,
    pub constraints: Constraints,
    pub seed: Params,
    /// Dirichlet pseudo-count per normalized-group member (1 = flat)
    pub norm_pseudocount: f64,
    pub max_iter: usize,
    pub tolerance: f64,
    pub block_bytes: usize,
    pub band_width: f64,
    /// learning rate of the bounded gradient step for prob/rate params
    pub grad_step: f64,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: Params,
    pub log_like: f64,
    pub status: FitStatus,
    pub iterations: usize,
}

impl MachineFitter {
    pub fn new(machine: Machine, constraints: Constraints, seed: Params) -> MachineFitter {
        MachineFitter {
            machine,
            constraints,
            seed,
            norm_pseudocount: 1.0,
            max_iter: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            block_bytes: DEFAULT_BLOCK_BYTES,
            band_width: 1.0,
            grad_step: 0.1,
        }
    }

    fn log_prior(&self, params: &Params) -> f64 {
        let mut log_p = 0.0;
        for group in &self.constraints.norm {
            let xs: Vec<f64> = group
                .iter()
                .map(|name| params.defs.get(name).copied().unwrap_or(0.0))
                .collect();
            let alphas = vec![self.norm_pseudocount; group.len()];
            log_p += log_dirichlet_pdf(&xs, &alphas);
        }
        log_p
    }

    pub fn fit(&self, data: &[SeqPair]) -> Result<FitResult> {
        self.constraints.validate()?;
        let mut params = self.constraints.default_params().combine(&self.seed);

        // inputs never change across iterations: condition the machine on
        // each training input once
        let conditioned: Vec<Machine> = data
            .iter()
            .map(|sp| Machine::compose(&Machine::generator(&sp.name, &sp.input), &self.machine))
            .collect();

        let mut prev_log_like = f64::NEG_INFINITY;
        let mut log_like = f64::NEG_INFINITY;
        let mut status = FitStatus::IterationLimitReached;
        let mut iterations = 0;

        for iter in 0..self.max_iter {
            // E-step
            let results: Vec<Result<Option<(f64, BTreeMap<String, f64>, BTreeMap<String, f64>)>>> =
                conditioned
                    .par_iter()
                    .zip(data.par_iter())
                    .map(|(machine, sp)| {
                        let eval = EvaluatedMachine::new(machine, &params)?;
                        let (log_z, counts) = forward_backward(
                            &eval,
                            &sp.output,
                            self.block_bytes,
                            self.band_width,
                        )?;
                        if log_z == f64::NEG_INFINITY {
                            return Ok(None);
                        }
                        let mut usage = BTreeMap::new();
                        let mut grad = BTreeMap::new();
                        param_stats(machine, &eval, &counts, &params, &mut usage, &mut grad)?;
                        Ok(Some((log_z, usage, grad)))
                    })
                    .collect();

            let mut usage = BTreeMap::new();
            let mut grad = BTreeMap::new();
            let mut total = 0.0;
            let mut n_ok = 0;
            for (sp, result) in data.iter().zip(results) {
                match result? {
                    Some((log_z, u, g)) => {
                        total += log_z;
                        merge_maps(&mut usage, u);
                        merge_maps(&mut grad, g);
                        n_ok += 1;
                    }
                    None => warn!(
                        "skipping sequence pair {}: non-finite log-likelihood",
                        sp.name
                    ),
                }
            }
            if n_ok == 0 {
                return Err(Error::NoTrainableData);
            }

            log_like = total + self.log_prior(&params);
            iterations = iter + 1;
            info!(
                "EM iteration {}: log-likelihood {} ({} of {} examples)",
                iterations,
                lp(log_like),
                n_ok,
                data.len()
            );
            if iter > 0 && log_like - prev_log_like < self.tolerance {
                status = FitStatus::Converged;
                break;
            }
            prev_log_like = log_like;

            params = self.m_step(&params, &usage, &grad);
        }

        Ok(FitResult {
            params,
            log_like,
            status,
            iterations,
        })
    }

    fn m_step(
        &self,
        params: &Params,
        usage: &BTreeMap<String, f64>,
        grad: &BTreeMap<String, f64>,
    ) -> Params {
        let mut new_params = params.clone();
        // normalized groups: closed-form stationary point of
        // expected log-likelihood + log Dirichlet under sum = 1
        for group in &self.constraints.norm {
            let weights: Vec<f64> = group
                .iter()
                .map(|name| {
                    let u = usage.get(name).copied().unwrap_or(0.0);
                    (u + self.norm_pseudocount - 1.0).max(1e-9)
                })
                .collect();
            let total: f64 = weights.iter().sum();
            for (name, w) in group.iter().zip(weights) {
                new_params.set(name, w / total);
            }
        }
        // free probabilities and rates: bounded projected gradient step
        for name in &self.constraints.prob {
            let g = grad.get(name).copied().unwrap_or(0.0);
            let x = params.defs.get(name).copied().unwrap_or(0.5);
            let delta = (self.grad_step * g).max(-0.1).min(0.1);
            new_params.set(name, (x + delta).max(1e-6).min(1.0 - 1e-6));
        }
        for name in &self.constraints.rate {
            let g = grad.get(name).copied().unwrap_or(0.0);
            let x = params.defs.get(name).copied().unwrap_or(1.0);
            let delta = (self.grad_step * g).max(-0.5 * x).min(0.5 * x);
            new_params.set(name, (x + delta).max(1e-6));
        }
        new_params
    }
}

///
/// Shared state of the Gaussian-emission trainers: the machine, its prior,
/// the trace set and both parameter families, plus the running
/// log-likelihood bookkeeping of the EM loop.
///
pub struct GaussianTrainer {
    pub machine: Machine,
    pub prior: GaussianModelPrior,
    pub traces: Vec<TraceMoments>,
    pub trace_params: TraceListParams,
    pub model: GaussianModelParams,
    /// log_like includes log_prior
    pub log_prior: f64,
    pub log_like: f64,
    pub prev_log_like: f64,
    pub iter: usize,
    pub fit_trace: bool,
    pub max_iter: usize,
    pub tolerance: f64,
    pub block_bytes: usize,
    pub band_width: f64,
}

impl GaussianTrainer {
    pub fn new(
        machine: Machine,
        model: GaussianModelParams,
        prior: GaussianModelPrior,
        traces: Vec<TraceMoments>,
    ) -> GaussianTrainer {
        let trace_params = TraceListParams::init(&traces);
        GaussianTrainer {
            machine,
            prior,
            traces,
            trace_params,
            model,
            log_prior: 0.0,
            log_like: f64::NEG_INFINITY,
            prev_log_like: f64::NEG_INFINITY,
            iter: 0,
            fit_trace: true,
            max_iter: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            block_bytes: DEFAULT_BLOCK_BYTES,
            band_width: 1.0,
        }
    }

    pub fn reset(&mut self) {
        self.log_prior = 0.0;
        self.log_like = f64::NEG_INFINITY;
        self.prev_log_like = f64::NEG_INFINITY;
        self.iter = 0;
    }

    /// expected log-likelihood under the current parameters (prior included)
    pub fn expected_log_like(&self) -> f64 {
        self.log_like
    }

    pub fn test_finished(&self) -> bool {
        if self.iter >= self.max_iter {
            return true;
        }
        self.iter > 1 && self.log_like - self.prev_log_like < self.tolerance
    }

    ///
    /// One E-step over `machines[i]` vs `traces[i]`: per-trace sufficient
    /// statistics, in trace order. `None` marks a skipped (non-finite)
    /// trace.
    ///
    fn e_step(&self, machines: &[Machine]) -> Result<Vec<Option<TraceStats>>> {
        let params = self.model.machine_params();
        let results: Vec<Result<Option<TraceStats>>> = machines
            .par_iter()
            .enumerate()
            .map(|(i, machine)| {
                let eval = EvaluatedMachine::new(machine, &params)?;
                let stats = trace_forward_backward(
                    &eval,
                    &self.model,
                    &self.traces[i],
                    &self.trace_params.params[i],
                    self.block_bytes,
                    self.band_width,
                )?;
                if stats.log_like == f64::NEG_INFINITY {
                    return Ok(None);
                }
                Ok(Some(stats))
            })
            .collect();
        let mut out = Vec::with_capacity(results.len());
        for (i, r) in results.into_iter().enumerate() {
            match r? {
                Some(stats) => out.push(Some(stats)),
                None => {
                    warn!(
                        "skipping trace {}: non-finite log-likelihood",
                        self.traces[i].name
                    );
                    out.push(None);
                }
            }
        }
        if out.iter().all(|s| s.is_none()) {
            return Err(Error::NoTrainableData);
        }
        Ok(out)
    }

    ///
    /// Update per-trace calibration from that trace's posterior-weighted
    /// label moments: scale from the positive root of its stationary
    /// quadratic, shift in closed form given scale, rate by the Gamma
    /// closed form; the prior enters as pseudo-observations.
    ///
    fn update_trace_params(&mut self, per_trace: &[Option<GaussianCounts>]) {
        for (i, counts) in per_trace.iter().enumerate() {
            let counts = match counts {
                Some(c) => c,
                None => continue,
            };
            let tp = self.trace_params.params[i];
            // tau-weighted raw-coordinate aggregates over labels
            let mut w_tot = 0.0; // sum tau * gamma*n
            let mut x1 = 0.0; // sum tau * gamma*n*x
            let mut x2 = 0.0; // sum tau * gamma*n*(x^2 + var_x)
            let mut m1 = 0.0; // sum tau * gamma*n*mu
            let mut m2 = 0.0; // sum tau * gamma*n*mu^2
            let mut xm = 0.0; // sum tau * gamma*n*x*mu
            let mut n_samples = 0.0;
            for (label, stat) in &counts.stats {
                let g = match self.model.gauss.get(label) {
                    Some(g) => *g,
                    None => continue,
                };
                let sum_x = tp.shift * stat.w + tp.scale * stat.s;
                let sum_xx = tp.shift * tp.shift * stat.w
                    + 2.0 * tp.shift * tp.scale * stat.s
                    + tp.scale * tp.scale * stat.ss
                    + tp.scale * tp.scale * stat.v;
                w_tot += g.tau * stat.w;
                x1 += g.tau * sum_x;
                x2 += g.tau * sum_xx;
                m1 += g.tau * g.mu * stat.w;
                m2 += g.tau * g.mu * g.mu * stat.w;
                xm += g.tau * g.mu * sum_x;
                n_samples += stat.w;
            }
            if w_tot <= 0.0 {
                continue;
            }
            let prior = &self.prior.trace;
            // scale: N c^2 + B c - A = 0 with the prior folded in as
            // pseudo-observations of scale0
            let mut shift = tp.shift;
            let mut scale = tp.scale;
            for _ in 0..2 {
                let a0 = (x2 - 2.0 * shift * x1 + shift * shift * w_tot)
                    + prior.scale_count * prior.scale * prior.scale;
                let b0 = xm - shift * m1;
                let n0 = n_samples + prior.scale_count;
                let disc = (b0 * b0 + 4.0 * n0 * a0).max(0.0);
                scale = ((-b0 + disc.sqrt()) / (2.0 * n0)).max(1e-6);
                shift = (x1 - scale * m1 + prior.shift_count * prior.shift)
                    / (w_tot + prior.shift_count);
            }
            let rate = prior
                .rate_prior()
                .map_update(counts.samples, counts.events);
            self.trace_params.params[i] = crate::trace::TraceParams { shift, scale, rate };
        }
    }
}

///
/// Full model fitting: machine probability parameters, per-label
/// Gaussians, and per-trace calibration, against traces paired with their
/// known source sequences.
///
pub struct GaussianModelFitter {
    pub trainer: GaussianTrainer,
    pub seqs: Vec<Vec<InputSymbol>>,
    conditioned: Vec<Machine>,
}

impl GaussianModelFitter {
    pub fn new(
        machine: Machine,
        model: GaussianModelParams,
        prior: GaussianModelPrior,
        traces: Vec<TraceMoments>,
        seqs: Vec<Vec<InputSymbol>>,
    ) -> GaussianModelFitter {
        assert_eq!(traces.len(), seqs.len());
        let conditioned = seqs
            .iter()
            .enumerate()
            .map(|(i, seq)| {
                Machine::compose(&Machine::generator(&format!("seq{}", i), seq), &machine)
            })
            .collect();
        let trainer = GaussianTrainer::new(machine, model, prior, traces);
        GaussianModelFitter {
            trainer,
            seqs,
            conditioned,
        }
    }

    pub fn fit(&mut self) -> Result<FitStatus> {
        self.trainer.reset();
        loop {
            let per_trace = self.trainer.e_step(&self.conditioned)?;

            // merge
            let params = self.trainer.model.machine_params();
            let mut usage = BTreeMap::new();
            let mut grad = BTreeMap::new();
            let mut gauss_total = GaussianCounts::new();
            let mut total = 0.0;
            for (i, stats) in per_trace.iter().enumerate() {
                if let Some(stats) = stats {
                    total += stats.log_like;
                    gauss_total.merge(&stats.gauss);
                    let eval = EvaluatedMachine::new(&self.conditioned[i], &params)?;
                    param_stats(
                        &self.conditioned[i],
                        &eval,
                        &stats.trans,
                        &params,
                        &mut usage,
                        &mut grad,
                    )?;
                }
            }

            self.trainer.log_prior = self
                .trainer
                .prior
                .log_prob_with_traces(&self.trainer.model, &self.trainer.trace_params)?;
            self.trainer.prev_log_like = self.trainer.log_like;
            self.trainer.log_like = total + self.trainer.log_prior;
            self.trainer.iter += 1;
            info!(
                "EM iteration {}: log-likelihood {}",
                self.trainer.iter,
                lp(self.trainer.log_like)
            );
            if self.trainer.test_finished() {
                return Ok(if self.trainer.iter >= self.trainer.max_iter {
                    FitStatus::IterationLimitReached
                } else {
                    FitStatus::Converged
                });
            }

            // M-step: Gaussians by Normal-Gamma MAP
            for (label, prior) in self.trainer.prior.gauss.clone() {
                if let Some(stat) = gauss_total.stats.get(&label) {
                    let g = prior.map_update(stat.w, stat.s, stat.q());
                    self.trainer.model.gauss.insert(label, g);
                }
            }
            // machine probability groups by the Dirichlet closed form
            for group in self.trainer.prior.cons.norm.clone() {
                let weights: Vec<f64> = group
                    .iter()
                    .map(|name| {
                        let u = usage.get(name).copied().unwrap_or(0.0);
                        (u + self.trainer.prior.pseudocount(name) - 1.0).max(1e-9)
                    })
                    .collect();
                let total_w: f64 = weights.iter().sum();
                for (name, w) in group.iter().zip(weights) {
                    self.trainer.model.prob.set(name, w / total_w);
                }
            }
            // machine rate parameters by a bounded gradient step with the
            // Gamma prior's gradient folded in
            for (name, prior) in self.trainer.prior.gamma.clone() {
                if let Ok(r) = self.trainer.model.rate.get(&name) {
                    let g = grad.get(&name).copied().unwrap_or(0.0) + prior.count / r
                        - prior.time;
                    let delta = (0.1 * g).max(-0.5 * r).min(0.5 * r);
                    self.trainer.model.rate.set(&name, (r + delta).max(1e-6));
                }
            }
            // per-trace calibration
            if self.trainer.fit_trace {
                let per_trace_gauss: Vec<Option<GaussianCounts>> = per_trace
                    .iter()
                    .map(|s| s.as_ref().map(|s| s.gauss.clone()))
                    .collect();
                self.trainer.update_trace_params(&per_trace_gauss);
            }
        }
    }
}

///
/// Viterbi basecalling: optionally fit per-trace calibration by EM against
/// the unconditioned machine, then decode each trace to its input symbols.
///
pub struct GaussianDecoder {
    pub trainer: GaussianTrainer,
}

impl GaussianDecoder {
    pub fn new(
        machine: Machine,
        model: GaussianModelParams,
        prior: GaussianModelPrior,
        traces: Vec<TraceMoments>,
    ) -> GaussianDecoder {
        GaussianDecoder {
            trainer: GaussianTrainer::new(machine, model, prior, traces),
        }
    }

    pub fn decode(&mut self) -> Result<Vec<Vec<InputSymbol>>> {
        let machines: Vec<Machine> = self
            .trainer
            .traces
            .iter()
            .map(|_| self.trainer.machine.clone())
            .collect();
        if self.trainer.fit_trace {
            self.trainer.reset();
            loop {
                let per_trace = self.trainer.e_step(&machines)?;
                let total: f64 = per_trace
                    .iter()
                    .flatten()
                    .map(|s| s.log_like)
                    .sum();
                self.trainer.log_prior = self.trainer.prior.log_prob_with_traces(
                    &self.trainer.model,
                    &self.trainer.trace_params,
                )?;
                self.trainer.prev_log_like = self.trainer.log_like;
                self.trainer.log_like = total + self.trainer.log_prior;
                self.trainer.iter += 1;
                if self.trainer.test_finished() {
                    break;
                }
                let per_trace_gauss: Vec<Option<GaussianCounts>> = per_trace
                    .iter()
                    .map(|s| s.as_ref().map(|s| s.gauss.clone()))
                    .collect();
                self.trainer.update_trace_params(&per_trace_gauss);
            }
        }

        let params = self.trainer.model.machine_params();
        let eval = EvaluatedMachine::new(&self.trainer.machine, &params)?;
        let mut calls = Vec::with_capacity(self.trainer.traces.len());
        for (i, trace) in self.trainer.traces.iter().enumerate() {
            let mut v = ViterbiTraceMatrix::new(
                &eval,
                &self.trainer.model,
                trace,
                &self.trainer.trace_params.params[i],
                self.trainer.block_bytes,
                self.trainer.band_width,
            );
            match v.path() {
                Ok(path) => calls.push(path.to_inputs(&self.trainer.machine)),
                Err(Error::NoFinitePath) => {
                    warn!("trace {}: no finite-weight path, emitting empty call", trace.name);
                    calls.push(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basecall::{basecalling_machine, basecalling_params, basecalling_prior};
    use crate::common::symbol_seq;
    use crate::expr::WeightExpr;
    use crate::gaussian::GaussianParams;
    use crate::machine::MachineEdge;
    use crate::trace::{Trace, TraceMoments};

    ///
    /// Two-branch machine: emit "x" with prob pA or "y" with prob pB,
    /// pA + pB = 1. Training on k "x" : m "y" outputs must recover the
    /// empirical proportions (flat prior).
    ///
    fn branch_machine() -> Machine {
        use petgraph::graph::DiGraph;
        let mut graph = DiGraph::new();
        let s = graph.add_node("s".to_string());
        let e = graph.add_node("e".to_string());
        graph.add_edge(
            s,
            e,
            MachineEdge::new(None, Some("x".to_string()), WeightExpr::param("pA")),
        );
        graph.add_edge(
            s,
            e,
            MachineEdge::new(None, Some("y".to_string()), WeightExpr::param("pB")),
        );
        Machine::from_graph(graph)
    }

    fn branch_constraints() -> Constraints {
        Constraints {
            norm: vec![vec!["pA".to_string(), "pB".to_string()]],
            prob: vec![],
            rate: vec![],
        }
    }

    #[test]
    fn baum_welch_recovers_proportions() {
        let data: Vec<SeqPair> = (0..4)
            .map(|i| SeqPair::new(&format!("x{}", i), "", "x"))
            .chain((0..1).map(|i| SeqPair::new(&format!("y{}", i), "", "y")))
            .collect();
        let fitter = MachineFitter::new(branch_machine(), branch_constraints(), Params::new());
        let result = fitter.fit(&data).unwrap();
        assert_eq!(result.status, FitStatus::Converged);
        assert_abs_diff_eq!(result.params.get("pA").unwrap(), 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(result.params.get("pB").unwrap(), 0.2, epsilon = 1e-6);
    }
    #[test]
    fn baum_welch_skips_infeasible_examples() {
        let data = vec![
            SeqPair::new("good", "", "x"),
            SeqPair::new("bad", "", "z"), // not in the output alphabet
        ];
        let fitter = MachineFitter::new(branch_machine(), branch_constraints(), Params::new());
        let result = fitter.fit(&data).unwrap();
        // the bad example is skipped, the good one still trains
        assert!(result.params.get("pA").unwrap() > 0.9);
    }
    #[test]
    fn baum_welch_no_trainable_data() {
        let data = vec![SeqPair::new("bad", "", "z")];
        let fitter = MachineFitter::new(branch_machine(), branch_constraints(), Params::new());
        assert!(matches!(fitter.fit(&data), Err(Error::NoTrainableData)));
    }
    #[test]
    fn em_log_like_non_decreasing() {
        let data: Vec<SeqPair> = vec![
            SeqPair::new("a", "", "x"),
            SeqPair::new("b", "", "y"),
            SeqPair::new("c", "", "x"),
        ];
        let mut seed = Params::new();
        seed.set("pA", 0.1);
        seed.set("pB", 0.9);
        let mut fitter = MachineFitter::new(branch_machine(), branch_constraints(), seed);
        fitter.max_iter = 1;
        // run iteration by iteration, feeding each result back as the seed
        let mut prev = f64::NEG_INFINITY;
        let mut params = fitter.seed.clone();
        for _ in 0..10 {
            fitter.seed = params;
            let result = fitter.fit(&data).unwrap();
            assert!(result.log_like >= prev - 1e-9);
            prev = result.log_like;
            params = result.params;
        }
    }
    #[test]
    fn gaussian_fitter_learns_levels() {
        let alphabet = ['a', 'b'];
        let machine = basecalling_machine(&alphabet, 1);
        let mut model = basecalling_params(&alphabet, 1);
        // start the levels off-target; training pulls them to -1 / +1
        model
            .gauss
            .insert("emit(a)".to_string(), GaussianParams { mu: -0.4, tau: 1.0 });
        model
            .gauss
            .insert("emit(b)".to_string(), GaussianParams { mu: 0.4, tau: 1.0 });
        let prior = basecalling_prior(&alphabet, 1).unwrap();
        let trace = Trace::new("t", vec![-1.0, -1.02, 0.98, 1.0, -0.99, -1.01]);
        let moments = TraceMoments::from_samples(&trace);
        let seqs = vec![symbol_seq("abaa")];
        let mut fitter =
            GaussianModelFitter::new(machine, model, prior, vec![moments], seqs);
        fitter.trainer.fit_trace = false;
        fitter.trainer.trace_params.params[0] = crate::trace::TraceParams::default();
        fitter.trainer.max_iter = 20;
        fitter.fit().unwrap();
        let mu_a = fitter.trainer.model.gauss["emit(a)"].mu;
        let mu_b = fitter.trainer.model.gauss["emit(b)"].mu;
        assert!(mu_a < -0.7, "mu_a = {}", mu_a);
        assert!(mu_b > 0.7, "mu_b = {}", mu_b);
    }
    #[test]
    fn decoder_round_trip() {
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
        let trace = Trace::new("t", vec![-1.0, 1.0, 1.02, -0.98]);
        let moments = TraceMoments::from_samples(&trace);
        let mut decoder = GaussianDecoder::new(machine, model, prior, vec![moments]);
        decoder.trainer.fit_trace = false;
        // identity calibration: the trace is already in model space
        decoder.trainer.trace_params.params[0] = crate::trace::TraceParams::default();
        // events: a, b, b, a; the repeated b is absorbed by b's stay loop
        let calls = decoder.decode().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].join(""), "aba");
    }
}
