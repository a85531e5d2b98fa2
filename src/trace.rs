//!
//! continuous measurement traces and their event-level summaries
//!
//! A raw trace (millions of samples) is compressed to `TraceMoments`: one
//! (count, mean, variance) summary per event. The moments are sufficient
//! to score a Gaussian emission model exactly, so the DP runs over O(events)
//! columns instead of O(samples).
//!
use serde::{Deserialize, Serialize};

///
/// A raw sample trace.
///
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub name: String,
    pub samples: Vec<f64>,
}

impl Trace {
    pub fn new(name: &str, samples: Vec<f64>) -> Trace {
        Trace {
            name: name.to_string(),
            samples,
        }
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn mean(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.len() as f64
    }
    pub fn sd(&self) -> f64 {
        let mean = self.mean();
        let var = self
            .samples
            .iter()
            .map(|x| (x - mean) * (x - mean))
            .sum::<f64>()
            / self.len() as f64;
        var.sqrt()
    }
    /// Shift to zero mean and rescale to unit standard deviation.
    pub fn normalize(&mut self) {
        let mean = self.mean();
        let sd = self.sd();
        for x in &mut self.samples {
            *x = (*x - mean) / sd;
        }
    }
}

///
/// Sufficient statistics of one event: the number of raw samples folded
/// into it, their mean, and their (population) variance.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceMoment {
    pub count: usize,
    pub mean: f64,
    pub var: f64,
}

///
/// An ordered sequence of event summaries for one trace.
///
#[derive(Debug, Clone, Default)]
pub struct TraceMoments {
    pub name: String,
    pub events: Vec<TraceMoment>,
}

impl TraceMoments {
    /// One event per raw sample (no compression).
    pub fn from_samples(trace: &Trace) -> TraceMoments {
        TraceMoments {
            name: trace.name.clone(),
            events: trace
                .samples
                .iter()
                .map(|&x| TraceMoment {
                    count: 1,
                    mean: x,
                    var: 0.0,
                })
                .collect(),
        }
    }

    ///
    /// Fold consecutive samples into events. A new event starts when the
    /// fractional deviation of a sample from the running event mean
    /// exceeds `max_frac_diff`, or when the event reaches `max_event_len`
    /// samples.
    ///
    pub fn segment(trace: &Trace, max_frac_diff: f64, max_event_len: usize) -> TraceMoments {
        let mut events = Vec::new();
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for &x in &trace.samples {
            let new_event = count >= max_event_len
                || (count > 0 && (x - mean).abs() > max_frac_diff * mean.abs());
            if new_event {
                events.push(TraceMoment {
                    count,
                    mean,
                    var: m2 / count as f64,
                });
                count = 0;
                mean = 0.0;
                m2 = 0.0;
            }
            // Welford update
            count += 1;
            let delta = x - mean;
            mean += delta / count as f64;
            m2 += delta * (x - mean);
        }
        if count > 0 {
            events.push(TraceMoment {
                count,
                mean,
                var: m2 / count as f64,
            });
        }
        TraceMoments {
            name: trace.name.clone(),
            events,
        }
    }

    pub fn n_events(&self) -> usize {
        self.events.len()
    }
    pub fn n_samples(&self) -> usize {
        self.events.iter().map(|e| e.count).sum()
    }
    /// total-count and total-sum agreement with the raw trace
    pub fn is_summary_of(&self, trace: &Trace) -> bool {
        if self.n_samples() != trace.len() {
            return false;
        }
        let sum: f64 = self.events.iter().map(|e| e.count as f64 * e.mean).sum();
        let raw: f64 = trace.samples.iter().sum();
        (sum - raw).abs() <= 1e-6 * (1.0 + raw.abs())
    }
}

///
/// Per-trace calibration: observed sample = shift + scale * model level;
/// rate is the expected number of samples per event.
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceParams {
    pub shift: f64,
    pub scale: f64,
    pub rate: f64,
}

impl Default for TraceParams {
    fn default() -> Self {
        TraceParams {
            shift: 0.0,
            scale: 1.0,
            rate: 1.0,
        }
    }
}

///
/// One `TraceParams` per trace of a training set.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceListParams {
    pub params: Vec<TraceParams>,
}

impl TraceListParams {
    ///
    /// Seed calibration from each trace's own moments: shift = overall
    /// mean, scale = overall standard deviation, rate = mean samples per
    /// event.
    ///
    pub fn init(traces: &[TraceMoments]) -> TraceListParams {
        let params = traces
            .iter()
            .map(|t| {
                let n = t.n_samples() as f64;
                if n == 0.0 {
                    return TraceParams::default();
                }
                let sum: f64 = t.events.iter().map(|e| e.count as f64 * e.mean).sum();
                let sumsq: f64 = t
                    .events
                    .iter()
                    .map(|e| e.count as f64 * (e.var + e.mean * e.mean))
                    .sum();
                let mean = sum / n;
                let var = (sumsq / n - mean * mean).max(0.0);
                TraceParams {
                    shift: mean,
                    scale: var.sqrt().max(1e-6),
                    rate: n / t.n_events() as f64,
                }
            })
            .collect();
        TraceListParams { params }
    }
    pub fn len(&self) -> usize {
        self.params.len()
    }
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn normalize_zero_mean_unit_sd() {
        let mut t = Trace::new("t", vec![1.0, 2.0, 3.0, 4.0]);
        t.normalize();
        assert_abs_diff_eq!(t.mean(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.sd(), 1.0, epsilon = 1e-12);
    }
    #[test_case(10.0, 1, 4; "event length capped at one sample")]
    #[test_case(10.0, 8, 1; "one event for a flat trace")]
    fn segment_extremes(max_frac_diff: f64, max_event_len: usize, expect_events: usize) {
        let t = Trace::new("t", vec![5.0; 4]);
        let m = TraceMoments::segment(&t, max_frac_diff, max_event_len);
        assert_eq!(m.n_events(), expect_events);
        assert!(m.is_summary_of(&t));
    }
    #[test]
    fn segment_splits_on_jump() {
        let t = Trace::new("t", vec![1.0, 1.01, 1.0, 5.0, 5.02, 5.0]);
        let m = TraceMoments::segment(&t, 0.1, 100);
        assert_eq!(m.n_events(), 2);
        assert_eq!(m.events[0].count, 3);
        assert_eq!(m.events[1].count, 3);
        assert_abs_diff_eq!(m.events[1].mean, (5.0 + 5.02 + 5.0) / 3.0, epsilon = 1e-12);
        assert!(m.is_summary_of(&t));
    }
    #[test]
    fn from_samples_is_exact_summary() {
        let t = Trace::new("t", vec![0.5, -1.5, 2.0]);
        let m = TraceMoments::from_samples(&t);
        assert_eq!(m.n_events(), 3);
        assert!(m.is_summary_of(&t));
    }
    #[test]
    fn trace_list_params_init() {
        let t = Trace::new("t", vec![2.0, 2.0, 6.0, 6.0]);
        let m = TraceMoments::segment(&t, 0.5, 100);
        let tlp = TraceListParams::init(&[m]);
        assert_eq!(tlp.len(), 1);
        assert_abs_diff_eq!(tlp.params[0].shift, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tlp.params[0].scale, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tlp.params[0].rate, 2.0, epsilon = 1e-12);
    }
}
