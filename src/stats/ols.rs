//! Ordinary least squares on small dense design matrices.

use nalgebra::{DMatrix, DVector};

/// Result of an OLS fit `y = X * beta + e`.
#[derive(Debug, Clone)]
pub(crate) struct OlsFit {
    pub params: DVector<f64>,
    pub std_errors: DVector<f64>,
    pub residuals: DVector<f64>,
    pub ssr: f64,
    pub nobs: usize,
}

impl OlsFit {
    /// t-statistic of coefficient `i`.
    pub fn t_value(&self, i: usize) -> f64 {
        self.params[i] / self.std_errors[i]
    }

    /// Akaike information criterion with Gaussian log-likelihood.
    pub fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        let llf = -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0);
        -2.0 * llf + 2.0 * self.params.len() as f64
    }

    /// Centered R-squared.
    pub fn r_squared(&self, y: &DVector<f64>) -> f64 {
        let mean = y.mean();
        let tss: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
        if tss == 0.0 {
            return 1.0;
        }
        1.0 - self.ssr / tss
    }
}

/// Fit OLS via the normal equations. Returns `None` when the system is
/// singular or there are no residual degrees of freedom.
pub(crate) fn ols(y: &DVector<f64>, x: &DMatrix<f64>) -> Option<OlsFit> {
    let (nobs, k) = x.shape();
    if nobs != y.len() || nobs <= k {
        return None;
    }

    let xt = x.transpose();
    let xtx_inv = (&xt * x).try_inverse()?;
    let params = &xtx_inv * (&xt * y);

    let residuals = y - x * &params;
    let ssr = residuals.norm_squared();
    let mse = ssr / (nobs - k) as f64;

    let std_errors = DVector::from_fn(k, |i, _| (mse * xtx_inv[(i, i)]).sqrt());

    if params.iter().any(|p| !p.is_finite()) {
        return None;
    }

    Some(OlsFit {
        params,
        std_errors,
        residuals,
        ssr,
        nobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ols_recovers_line() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let noise = [0.1, -0.1];
        let ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| 3.0 + 2.0 * x + noise[i % 2])
            .collect();

        let x = DMatrix::from_fn(xs.len(), 2, |i, j| if j == 0 { 1.0 } else { xs[i] });
        let y = DVector::from_vec(ys);

        let fit = ols(&y, &x).unwrap();
        assert!((fit.params[0] - 3.0).abs() < 0.1);
        assert!((fit.params[1] - 2.0).abs() < 0.01);
        assert!(fit.r_squared(&y) > 0.99);
        assert!(fit.t_value(1) > 100.0);
    }

    #[test]
    fn test_ols_singular_design() {
        let x = DMatrix::from_fn(5, 2, |_, _| 1.0);
        let y = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(ols(&y, &x).is_none());
    }

    #[test]
    fn test_ols_needs_degrees_of_freedom() {
        let x = DMatrix::from_fn(2, 2, |i, j| (i + j) as f64 + 1.0);
        let y = DVector::from_vec(vec![1.0, 2.0]);
        assert!(ols(&y, &x).is_none());
    }
}
