//!
//! Gaussian emission model for continuous traces
//!
//! Each emission label (k-mer context) carries a (mean, precision) pair in
//! normalized signal space; an observed sample x maps to model space as
//! `y = (x - shift) / scale` with per-trace calibration. Events are scored
//! exactly from their moments:
//!
//! ```text
//! sum_i (y_i - mu)^2 = ( n*var + n*(mean - shift - scale*mu)^2 ) / scale^2
//! ```
//!
//! and the samples-per-event count gets a Poisson term in the trace's
//! `rate`, keeping rate Gamma-conjugate in the M-step.
//!
use crate::params::Params;
use crate::trace::{TraceMoment, TraceParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LN_2PI: f64 = 1.8378770664093453;

/// `ln(n!)` via the log-Gamma function
pub fn ln_factorial(n: f64) -> f64 {
    libm::lgamma(n + 1.0)
}

///
/// (mean, precision) of one emission label
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub mu: f64,
    pub tau: f64,
}

///
/// Full parameter set of a Gaussian-emission machine: one Gaussian per
/// emission label plus the machine's probability and rate parameters.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaussianModelParams {
    pub gauss: BTreeMap<String, GaussianParams>,
    pub prob: Params,
    pub rate: Params,
}

impl GaussianModelParams {
    /// the flat assignment used to evaluate machine weight expressions
    pub fn machine_params(&self) -> Params {
        self.prob.combine(&self.rate)
    }
}

///
/// Exact log-density of an event under one Gaussian and one trace's
/// calibration.
///
pub fn log_event_density(event: &TraceMoment, g: &GaussianParams, tp: &TraceParams) -> f64 {
    let n = event.count as f64;
    let predicted = tp.shift + tp.scale * g.mu;
    let ssq = (n * event.var + n * (event.mean - predicted) * (event.mean - predicted))
        / (tp.scale * tp.scale);
    let gauss = 0.5 * n * (g.tau.ln() - LN_2PI) - 0.5 * g.tau * ssq - n * tp.scale.ln();
    let length = n * tp.rate.ln() - tp.rate - ln_factorial(n);
    gauss + length
}

///
/// Posterior-weighted moments of one emission label, in model (scaled)
/// coordinates `y = (x - shift) / scale`:
///
/// ```text
/// w  = sum gamma*n          s  = sum gamma*n*ybar
/// ss = sum gamma*n*ybar^2   v  = sum gamma*n*var_y
/// ```
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GaussStat {
    pub w: f64,
    pub s: f64,
    pub ss: f64,
    pub v: f64,
}

impl GaussStat {
    /// second moment `sum gamma*n*y^2` used by the Normal-Gamma update
    pub fn q(&self) -> f64 {
        self.ss + self.v
    }
}

///
/// Posterior-weighted sufficient statistics for the Gaussian M-step.
///
#[derive(Debug, Clone, Default)]
pub struct GaussianCounts {
    pub stats: BTreeMap<String, GaussStat>,
    /// posterior-weighted event and sample totals (rate update)
    pub events: f64,
    pub samples: f64,
}

impl GaussianCounts {
    pub fn new() -> GaussianCounts {
        GaussianCounts::default()
    }
    pub fn observe(&mut self, label: &str, gamma: f64, event: &TraceMoment, tp: &TraceParams) {
        let n = event.count as f64;
        let ybar = (event.mean - tp.shift) / tp.scale;
        let var_y = event.var / (tp.scale * tp.scale);
        let entry = self.stats.entry(label.to_string()).or_default();
        entry.w += gamma * n;
        entry.s += gamma * n * ybar;
        entry.ss += gamma * n * ybar * ybar;
        entry.v += gamma * n * var_y;
        self.events += gamma;
        self.samples += gamma * n;
    }
    /// deterministic elementwise merge
    pub fn merge(&mut self, other: &GaussianCounts) {
        for (label, stat) in &other.stats {
            let entry = self.stats.entry(label.clone()).or_default();
            entry.w += stat.w;
            entry.s += stat.s;
            entry.ss += stat.ss;
            entry.v += stat.v;
        }
        self.events += other.events;
        self.samples += other.samples;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_density_matches_per_sample_product() {
        // an event's moment score must equal the sum of its samples' scores
        let samples = vec![1.0, 1.2, 0.9];
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
        let event = TraceMoment {
            count: samples.len(),
            mean,
            var,
        };
        let g = GaussianParams { mu: 0.8, tau: 2.0 };
        let tp = TraceParams {
            shift: 0.1,
            scale: 1.3,
            rate: 2.0,
        };
        let from_moments = log_event_density(&event, &g, &tp);
        let per_sample: f64 = samples
            .iter()
            .map(|&x| {
                let y = (x - tp.shift) / tp.scale;
                0.5 * (g.tau.ln() - LN_2PI) - 0.5 * g.tau * (y - g.mu) * (y - g.mu)
                    - tp.scale.ln()
            })
            .sum();
        let length = n * tp.rate.ln() - tp.rate - ln_factorial(n);
        assert_abs_diff_eq!(from_moments, per_sample + length, epsilon = 1e-9);
    }
    #[test]
    fn counts_merge_is_sum() {
        let event = TraceMoment {
            count: 2,
            mean: 1.0,
            var: 0.5,
        };
        let tp = TraceParams::default();
        let mut a = GaussianCounts::new();
        a.observe("k", 0.5, &event, &tp);
        let mut b = GaussianCounts::new();
        b.observe("k", 0.25, &event, &tp);
        a.merge(&b);
        let stat = a.stats["k"];
        assert_abs_diff_eq!(stat.w, 0.75 * 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stat.s, 0.75 * 2.0 * 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stat.q(), 0.75 * 2.0 * (0.5 + 1.0), epsilon = 1e-12);
        assert_abs_diff_eq!(a.events, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(a.samples, 1.5, epsilon = 1e-12);
    }
}
