//! Two-step Engle-Granger cointegration test.

use super::adf::adf_no_constant;
use super::ols::ols;
use super::{mackinnon, CointegrationScore, CointegrationTest};
use crate::error::{PairsError, PairsResult};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Minimum observations accepted by the test.
const MIN_OBSERVATIONS: usize = 10;

/// Engle-Granger test: regress `a` on a constant and `b`, then run an ADF
/// regression on the residuals and map the statistic to a MacKinnon p-value.
#[derive(Debug, Clone, Default)]
pub struct EngleGranger {
    /// Upper bound for the ADF lag search (default: Schwert rule)
    pub max_lag: Option<usize>,
}

impl EngleGranger {
    pub fn new(max_lag: Option<usize>) -> Self {
        Self { max_lag }
    }
}

impl CointegrationTest for EngleGranger {
    fn test(&self, a: &[f64], b: &[f64]) -> PairsResult<CointegrationScore> {
        if a.len() != b.len() {
            return Err(PairsError::LengthMismatch {
                left: a.len(),
                right: b.len(),
            });
        }
        if a.len() < MIN_OBSERVATIONS {
            return Err(PairsError::InsufficientData {
                expected: MIN_OBSERVATIONS,
                actual: a.len(),
            });
        }

        let n = a.len();
        let y = DVector::from_column_slice(a);
        let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { b[i] });

        let fit = ols(&y, &x).ok_or(PairsError::InsufficientData {
            expected: MIN_OBSERVATIONS,
            actual: n,
        })?;

        // (almost) perfectly colinear series: residuals carry no information
        let colinear_bound = 1.0 - 100.0 * f64::EPSILON.sqrt();
        if fit.r_squared(&y) >= colinear_bound {
            debug!("Series are almost perfectly colinear, treating as cointegrated");
            return Ok(CointegrationScore {
                statistic: f64::NEG_INFINITY,
                p_value: 0.0,
            });
        }

        let residuals: Vec<f64> = fit.residuals.iter().copied().collect();
        let adf = adf_no_constant(&residuals, self.max_lag)?;

        Ok(CointegrationScore {
            statistic: adf.statistic,
            p_value: mackinnon::pvalue(adf.statistic, 2),
        })
    }
}
