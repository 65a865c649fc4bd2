//! Augmented Dickey-Fuller regression without deterministic terms.
//!
//! Used on cointegration residuals, which are mean-zero by construction.
//! Lag order is selected by AIC over a common estimation sample, then the
//! chosen lag order is refit on every available observation.

use super::ols::ols;
use crate::error::{PairsError, PairsResult};
use nalgebra::{DMatrix, DVector};

/// Outcome of an ADF regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfResult {
    /// t-statistic of the lagged level coefficient
    pub statistic: f64,
    /// Number of lagged differences in the final regression
    pub used_lag: usize,
    /// Observations in the final regression
    pub nobs: usize,
}

/// Default maximum lag: `ceil(12 * (n / 100)^(1/4))`.
pub fn default_max_lag(n: usize) -> usize {
    (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize
}

/// Run the ADF regression `dx_t = g * x_{t-1} + sum(d_i * dx_{t-i}) + e_t`.
pub fn adf_no_constant(x: &[f64], max_lag: Option<usize>) -> PairsResult<AdfResult> {
    let n = x.len();
    // need at least one lag-0 row beyond the single regressor
    if n < 4 {
        return Err(PairsError::InsufficientData {
            expected: 4,
            actual: n,
        });
    }

    let cap = n / 2 - 1;
    let max_lag = max_lag.unwrap_or_else(|| default_max_lag(n)).min(cap);
    let diff: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

    let mut best: Option<(f64, usize)> = None;
    for lag in 0..=max_lag {
        let Some(fit) = fit_lagged(x, &diff, lag, max_lag) else {
            continue;
        };
        let aic = fit.aic();
        if best.map_or(true, |(best_aic, _)| aic < best_aic) {
            best = Some((aic, lag));
        }
    }

    let (_, lag) = best.ok_or(PairsError::InsufficientData {
        expected: max_lag + 3,
        actual: n,
    })?;

    let fit = fit_lagged(x, &diff, lag, lag).ok_or(PairsError::InsufficientData {
        expected: lag + 3,
        actual: n,
    })?;

    Ok(AdfResult {
        statistic: fit.t_value(0),
        used_lag: lag,
        nobs: fit.nobs,
    })
}

/// Fit with `lag` lagged differences on the sample that starts after `trim`
/// differences have been consumed.
fn fit_lagged(
    x: &[f64],
    diff: &[f64],
    lag: usize,
    trim: usize,
) -> Option<super::ols::OlsFit> {
    let rows = diff.len().checked_sub(trim)?;
    if rows == 0 {
        return None;
    }

    let y = DVector::from_fn(rows, |r, _| diff[trim + r]);
    let design = DMatrix::from_fn(rows, lag + 1, |r, c| {
        let t = trim + r;
        if c == 0 {
            x[t]
        } else {
            diff[t - c]
        }
    });

    ols(&y, &design)
}
