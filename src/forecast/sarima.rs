//! Seasonal ARIMA with a fixed structure: SARIMA(2,0,0)(0,1,1)[s], no constant.
//!
//! With `w_t = y_t - y_{t-s}` the model is
//!
//! ```text
//! w_t = φ1·w_{t-1} + φ2·w_{t-2} + ε_t + Θ·ε_{t-s}
//! ```
//!
//! Parameters are estimated by conditional sum of squares: the first two
//! differenced values are conditioned on and pre-sample errors are zero.
//! The search runs over unconstrained values mapped through `tanh` (partial
//! autocorrelations for the AR part), so every candidate is stationary and
//! invertible.

use super::optimize::{NelderMeadOptions, nelder_mead};
use core::fmt;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const AR_ORDER: usize = 2;
/// Conditional residuals required beyond the AR lags.
pub const MIN_FIT_RESIDUALS: usize = 4;
const CONSTANT_EPSILON: f64 = 1e-9;
const MAX_PARTIAL_AUTOCORRELATION: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    InsufficientData { observations: usize, required: usize },
    Degenerate(String),
    NonConvergence { iterations: usize },
    NonFinite,
    Interval(String),
}

impl Display for FitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FitError::InsufficientData { observations, required } => write!(
                f,
                "insufficient data: {} weekly observation(s), at least {} required",
                observations, required
            ),
            FitError::Degenerate(why) => write!(f, "degenerate series: {}", why),
            FitError::NonConvergence { iterations } => {
                write!(f, "parameter search did not converge after {} iteration(s)", iterations)
            }
            FitError::NonFinite => write!(f, "model produced non-finite values"),
            FitError::Interval(e) => write!(f, "confidence interval: {}", e),
        }
    }
}

impl Error for FitError {}

/// Smallest series length that can be fitted at `period`.
pub fn required_observations(period: usize) -> usize {
    period + AR_ORDER + MIN_FIT_RESIDUALS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedSarima {
    pub period: usize,
    pub phi: [f64; 2],
    pub seasonal_theta: f64,
    /// Residual variance (SSE over conditional residual count).
    pub sigma2: f64,
    pub iterations: usize,
    /// Observed series the model was fitted on.
    pub history: Vec<f64>,
    /// One residual per seasonally differenced value; the first `AR_ORDER` are zero.
    pub residuals: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

fn seasonal_difference(y: &[f64], period: usize) -> Vec<f64> {
    (period..y.len()).map(|t| y[t] - y[t - period]).collect()
}

fn residuals(w: &[f64], phi: [f64; 2], theta: f64, period: usize) -> Vec<f64> {
    let mut e = vec![0.0; w.len()];
    for i in AR_ORDER..w.len() {
        let seasonal = if i >= period { theta * e[i - period] } else { 0.0 };
        e[i] = w[i] - phi[0] * w[i - 1] - phi[1] * w[i - 2] - seasonal;
    }
    e
}

fn sum_of_squares(e: &[f64]) -> f64 {
    e.iter().skip(AR_ORDER).map(|v| v * v).sum()
}

/// Map unconstrained search values to (φ1, φ2, Θ).
fn constrain(x: &[f64]) -> ([f64; 2], f64) {
    let r1 = x[0].tanh();
    let r2 = x[1].tanh();
    ([r1 * (1.0 - r2), r2], x[2].tanh())
}

fn unconstrain(phi: [f64; 2], theta: f64) -> Vec<f64> {
    let clamp = |v: f64| v.clamp(-MAX_PARTIAL_AUTOCORRELATION, MAX_PARTIAL_AUTOCORRELATION);
    let r2 = clamp(phi[1]);
    let r1 = clamp(if (1.0 - r2).abs() > CONSTANT_EPSILON { phi[0] / (1.0 - r2) } else { 0.0 });
    vec![r1.atanh(), r2.atanh(), clamp(theta).atanh()]
}

/// Yule–Walker AR(2) estimate, used as the search starting point.
fn yule_walker_ar2(w: &[f64]) -> [f64; 2] {
    let n = w.len() as f64;
    let mean = w.iter().sum::<f64>() / n;
    let acov = |lag: usize| -> f64 {
        w.iter()
            .skip(lag)
            .zip(w.iter())
            .map(|(a, b)| (a - mean) * (b - mean))
            .sum::<f64>()
            / n
    };
    let c0 = acov(0);
    if c0 <= CONSTANT_EPSILON {
        return [0.0, 0.0];
    }
    let r1 = acov(1) / c0;
    let r2 = acov(2) / c0;
    let denom = 1.0 - r1 * r1;
    if denom.abs() <= CONSTANT_EPSILON {
        return [0.0, 0.0];
    }
    let phi2 = (r2 - r1 * r1) / denom;
    [r1 * (1.0 - phi2), phi2]
}

impl FittedSarima {
    pub fn fit(series: &[f64], period: usize) -> Result<Self, FitError> {
        Self::fit_with(series, period, NelderMeadOptions::default())
    }

    pub fn fit_with(series: &[f64], period: usize, opts: NelderMeadOptions) -> Result<Self, FitError> {
        if period < 2 {
            return Err(FitError::Degenerate(format!("seasonal period {} is below 2", period)));
        }
        let required = required_observations(period);
        if series.len() < required {
            return Err(FitError::InsufficientData {
                observations: series.len(),
                required,
            });
        }
        if series.iter().any(|v| !v.is_finite()) {
            return Err(FitError::Degenerate("series contains non-finite values".into()));
        }
        let first = series[0];
        if series.iter().all(|v| (v - first).abs() <= CONSTANT_EPSILON) {
            return Err(FitError::Degenerate(format!("constant series ({})", first)));
        }

        let w = seasonal_difference(series, period);
        let start = unconstrain(yule_walker_ar2(&w), 0.0);
        let objective = |x: &[f64]| {
            let (phi, theta) = constrain(x);
            sum_of_squares(&residuals(&w, phi, theta, period))
        };
        let min = nelder_mead(objective, &start, opts);
        if !min.converged {
            return Err(FitError::NonConvergence {
                iterations: min.iterations,
            });
        }

        let (phi, seasonal_theta) = constrain(&min.x);
        let e = residuals(&w, phi, seasonal_theta, period);
        let sigma2 = sum_of_squares(&e) / (w.len() - AR_ORDER) as f64;
        if !sigma2.is_finite() || phi.iter().any(|p| !p.is_finite()) || !seasonal_theta.is_finite() {
            return Err(FitError::NonFinite);
        }

        Ok(FittedSarima {
            period,
            phi,
            seasonal_theta,
            sigma2,
            iterations: min.iterations,
            history: series.to_vec(),
            residuals: e,
        })
    }

    /// Point forecasts for the next `steps` periods.
    pub fn predict(&self, steps: usize) -> Vec<f64> {
        let s = self.period;
        let n = self.history.len();
        let m = self.residuals.len();
        let mut y = self.history.clone();
        let mut w = seasonal_difference(&self.history, s);
        for k in 0..steps {
            let i = m + k;
            let past_error = i
                .checked_sub(s)
                .filter(|j| *j < m)
                .map(|j| self.residuals[j])
                .unwrap_or(0.0);
            let next_w = self.phi[0] * w[i - 1] + self.phi[1] * w[i - 2] + self.seasonal_theta * past_error;
            w.push(next_w);
            y.push(next_w + y[n + k - s]);
        }
        y.split_off(n)
    }

    /// MA(∞) weights ψ_0..ψ_{count-1} of the undifferenced process.
    pub fn psi_weights(&self, count: usize) -> Vec<f64> {
        let s = self.period;
        // (1 - φ1B - φ2B²)(1 - B^s) written as 1 - Σ a_k B^k
        let mut a = vec![0.0; count.max(1)];
        let mut add = |lag: usize, v: f64| {
            if lag < a.len() {
                a[lag] += v;
            }
        };
        add(1, self.phi[0]);
        add(2, self.phi[1]);
        add(s, 1.0);
        add(s + 1, -self.phi[0]);
        add(s + 2, -self.phi[1]);

        let mut psi = Vec::with_capacity(count);
        for j in 0..count {
            if j == 0 {
                psi.push(1.0);
                continue;
            }
            let ma = if j == s { self.seasonal_theta } else { 0.0 };
            let ar: f64 = (1..=j).map(|k| a[k] * psi[j - k]).sum();
            psi.push(ma + ar);
        }
        psi
    }

    /// Point forecasts with symmetric normal intervals at `confidence_level`.
    pub fn forecast(&self, steps: usize, confidence_level: f64) -> Result<Vec<ForecastPoint>, FitError> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(FitError::Interval(format!(
                "confidence level {} is outside (0, 1)",
                confidence_level
            )));
        }
        let normal = Normal::new(0.0, 1.0).map_err(|e| FitError::Interval(e.to_string()))?;
        let z = normal.inverse_cdf(1.0 - (1.0 - confidence_level) / 2.0);

        let means = self.predict(steps);
        let psi = self.psi_weights(steps);
        let mut cumulative = 0.0;
        let mut out = Vec::with_capacity(steps);
        for (h, mean) in means.into_iter().enumerate() {
            cumulative += psi[h] * psi[h];
            let half_width = z * (self.sigma2 * cumulative).sqrt();
            let point = ForecastPoint {
                mean,
                lower: mean - half_width,
                upper: mean + half_width,
            };
            if !point.mean.is_finite() || !point.lower.is_finite() || !point.upper.is_finite() {
                return Err(FitError::NonFinite);
            }
            out.push(point);
        }
        Ok(out)
    }
}
