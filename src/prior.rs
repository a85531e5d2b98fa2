//!
//! conjugate priors: Dirichlet, Gamma, Normal-Gamma
//!
//! Each closed form exposes both a numeric log-probability and a symbolic
//! log-probability expression over the same `WeightExpr` variables as the
//! machine, so the M-step can add prior-gradient terms directly to
//! likelihood-gradient terms before solving for a stationary point.
//!
use crate::error::{Error, Result};
use crate::expr::WeightExpr;
use crate::gaussian::{GaussianModelParams, GaussianParams, LN_2PI};
use crate::params::{Constraints, Params};
use crate::trace::{TraceListParams, TraceParams};
use libm::lgamma;
use std::collections::BTreeMap;

pub fn log_gaussian_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    -0.5 * LN_2PI - sigma.ln() - (x - mu) * (x - mu) / (2.0 * sigma * sigma)
}

///
/// Gamma density parameterized by pseudo-observations: `count` events in
/// `time` units, i.e. shape `count+1` and rate `time`.
///
pub fn log_gamma_pdf(x: f64, count: f64, time: f64) -> f64 {
    if x <= 0.0 || time <= 0.0 {
        return f64::NEG_INFINITY;
    }
    (count + 1.0) * time.ln() - lgamma(count + 1.0) + count * x.ln() - time * x
}

pub fn log_dirichlet_pdf(xs: &[f64], alphas: &[f64]) -> f64 {
    let alpha_sum: f64 = alphas.iter().sum();
    let mut lp = lgamma(alpha_sum);
    for (&x, &a) in xs.iter().zip(alphas) {
        if x <= 0.0 {
            return f64::NEG_INFINITY;
        }
        lp += (a - 1.0) * x.ln() - lgamma(a);
    }
    lp
}

///
/// Gamma prior over a positive rate.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaPrior {
    pub count: f64,
    pub time: f64,
}

impl GammaPrior {
    pub fn log_prob(&self, rate: f64) -> f64 {
        log_gamma_pdf(rate, self.count, self.time)
    }
    /// `count * log(r) - time * r` (the rate-dependent part)
    pub fn log_expr(&self, rate_param: &WeightExpr) -> WeightExpr {
        WeightExpr::sub(
            &WeightExpr::mul(
                &WeightExpr::constant(self.count),
                &WeightExpr::log_of(rate_param),
            ),
            &WeightExpr::mul(&WeightExpr::constant(self.time), rate_param),
        )
    }
    /// posterior-mode rate after observing `obs_count` events in `obs_time`
    pub fn map_update(&self, obs_count: f64, obs_time: f64) -> f64 {
        (self.count + obs_count) / (self.time + obs_time)
    }
}

///
/// Normal-Gamma prior over a (mean, precision) pair: the conjugate prior
/// of the Gaussian emission model.
///
/// ```text
/// logProb(mu, tau) = logGamma(tau; alpha = n_tau/2, beta = (n_tau-1)/(2*tau0))
///                  + logGaussian(mu; mu0, 1/sqrt(n_mu*tau))
/// ```
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalGammaPrior {
    pub mu0: f64,
    pub n_mu: f64,
    pub tau0: f64,
    pub n_tau: f64,
}

impl NormalGammaPrior {
    pub fn alpha(&self) -> f64 {
        self.n_tau / 2.0
    }
    pub fn beta(&self) -> f64 {
        (self.n_tau - 1.0) / (2.0 * self.tau0)
    }
    pub fn log_prob(&self, mu: f64, tau: f64) -> f64 {
        log_gamma_pdf(tau, self.alpha() - 1.0, self.beta())
            + log_gaussian_pdf(mu, self.mu0, 1.0 / (self.n_mu * tau).sqrt())
    }
    ///
    /// The (mu, tau)-dependent part as an expression:
    ///
    /// ```text
    /// (alpha - 1/2)*log(tau) - beta*tau - n_mu/2 * tau * (mu - mu0)^2
    /// ```
    ///
    pub fn log_expr(&self, mu_param: &WeightExpr, tau_param: &WeightExpr) -> WeightExpr {
        let mu_minus_mu0 = WeightExpr::sub(mu_param, &WeightExpr::constant(self.mu0));
        WeightExpr::sub(
            &WeightExpr::mul(
                &WeightExpr::constant(self.alpha() - 0.5),
                &WeightExpr::log_of(tau_param),
            ),
            &WeightExpr::add(
                &WeightExpr::mul(&WeightExpr::constant(self.beta()), tau_param),
                &WeightExpr::mul(
                    &WeightExpr::mul(&WeightExpr::constant(self.n_mu / 2.0), tau_param),
                    &WeightExpr::mul(&mu_minus_mu0, &mu_minus_mu0),
                ),
            ),
        )
    }
    ///
    /// Closed-form MAP update from weighted sufficient statistics
    /// `(w, s, q) = (sum gamma*n, sum gamma*n*y, sum gamma*n*y^2)`.
    ///
    pub fn map_update(&self, w: f64, s: f64, q: f64) -> GaussianParams {
        let lambda = self.n_mu;
        let alpha = self.alpha();
        let beta = self.beta();
        if w <= 0.0 {
            let tau = ((alpha - 1.0) / beta).max(1e-6);
            return GaussianParams { mu: self.mu0, tau };
        }
        let lambda_post = lambda + w;
        let mu_post = (lambda * self.mu0 + s) / lambda_post;
        let data_mean = s / w;
        let alpha_post = alpha + w / 2.0;
        let beta_post = beta
            + 0.5 * (q - s * s / w)
            + lambda * w * (data_mean - self.mu0) * (data_mean - self.mu0) / (2.0 * lambda_post);
        let tau = ((alpha_post - 1.0) / beta_post).max(1e-6);
        GaussianParams { mu: mu_post, tau }
    }
}

/// Normal-Gamma reparameterized over (mean, sigma): `NG(mu, 1/sigma^2)`.
pub fn log_normal_inv_square_gamma_prob(
    mu: f64,
    sigma: f64,
    mu0: f64,
    n_mu: f64,
    sigma0: f64,
    n_sigma: f64,
) -> f64 {
    let prior = NormalGammaPrior {
        mu0,
        n_mu,
        tau0: 1.0 / (sigma0 * sigma0),
        n_tau: n_sigma,
    };
    prior.log_prob(mu, 1.0 / (sigma * sigma))
}

///
/// Prior over per-trace calibration: Normal-inverse-square-Gamma on
/// (shift, scale), Gamma on rate.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceParamsPrior {
    pub scale: f64,
    pub scale_count: f64,
    pub shift: f64,
    pub shift_count: f64,
    pub rate_count: f64,
    pub rate_time: f64,
}

impl Default for TraceParamsPrior {
    fn default() -> Self {
        TraceParamsPrior {
            scale: 1.0,
            scale_count: 2.0,
            shift: 0.0,
            shift_count: 0.1,
            rate_count: 1.0,
            rate_time: 1.0,
        }
    }
}

impl TraceParamsPrior {
    pub fn log_prob(&self, tp: &TraceParams) -> f64 {
        log_normal_inv_square_gamma_prob(
            tp.shift,
            tp.scale,
            self.shift,
            self.shift_count,
            self.scale,
            self.scale_count,
        ) + log_gamma_pdf(tp.rate, self.rate_count, self.rate_time)
    }
    pub fn log_prob_list(&self, list: &TraceListParams) -> f64 {
        list.params.iter().map(|tp| self.log_prob(tp)).sum()
    }
    pub fn rate_prior(&self) -> GammaPrior {
        GammaPrior {
            count: self.rate_count,
            time: self.rate_time,
        }
    }
}

///
/// Full prior of a Gaussian-emission machine: a Normal-Gamma per emission
/// label, Dirichlet pseudo-counts over each normalized parameter group,
/// a Gamma per rate parameter, and the trace-calibration prior.
///
#[derive(Debug, Clone, Default)]
pub struct GaussianModelPrior {
    pub cons: Constraints,
    /// Dirichlet pseudo-counts by parameter name (absent = 1, flat)
    pub count: Params,
    pub gauss: BTreeMap<String, NormalGammaPrior>,
    pub gamma: BTreeMap<String, GammaPrior>,
    pub trace: TraceParamsPrior,
}

impl GaussianModelPrior {
    ///
    /// A Dirichlet prior is only well-formed when no free (non-grouped)
    /// probability parameters are declared; violating that is a
    /// configuration error, caught here at initialization.
    ///
    pub fn new(
        cons: Constraints,
        count: Params,
        gauss: BTreeMap<String, NormalGammaPrior>,
        gamma: BTreeMap<String, GammaPrior>,
    ) -> Result<GaussianModelPrior> {
        cons.validate()?;
        if !cons.prob.is_empty() {
            return Err(Error::InvalidPriorConfiguration(
                "no free probability parameters allowed".to_string(),
            ));
        }
        Ok(GaussianModelPrior {
            cons,
            count,
            gauss,
            gamma,
            trace: TraceParamsPrior::default(),
        })
    }

    pub fn pseudocount(&self, name: &str) -> f64 {
        self.count.defs.get(name).copied().unwrap_or(1.0)
    }

    pub fn log_prob(&self, model: &GaussianModelParams) -> Result<f64> {
        let mut lp = 0.0;
        for (label, prior) in &self.gauss {
            let g = model
                .gauss
                .get(label)
                .ok_or_else(|| Error::UndefinedParameter(label.clone()))?;
            lp += prior.log_prob(g.mu, g.tau);
        }
        for group in &self.cons.norm {
            let mut xs = Vec::with_capacity(group.len());
            let mut alphas = Vec::with_capacity(group.len());
            for name in group {
                xs.push(model.prob.get(name)?);
                alphas.push(self.pseudocount(name));
            }
            lp += log_dirichlet_pdf(&xs, &alphas);
        }
        for (name, prior) in &self.gamma {
            lp += prior.log_prob(model.rate.get(name)?);
        }
        Ok(lp)
    }

    pub fn log_prob_with_traces(
        &self,
        model: &GaussianModelParams,
        traces: &TraceListParams,
    ) -> Result<f64> {
        Ok(self.log_prob(model)? + self.trace.log_prob_list(traces))
    }
}
