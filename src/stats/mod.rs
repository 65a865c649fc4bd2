//! Statistical tests used for pair selection.
//!
//! The cointegration test is a collaborator behind the `CointegrationTest`
//! trait; `EngleGranger` is the default implementation. Any test whose
//! p-value keeps the "lower means stronger evidence" reading can be swapped in.

mod adf;
mod engle_granger;
pub mod mackinnon;
mod ols;

pub use adf::{adf_no_constant, default_max_lag, AdfResult};
pub use engle_granger::EngleGranger;

use crate::error::PairsResult;
use serde::{Deserialize, Serialize};

/// Test statistic and p-value of one pairwise cointegration test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CointegrationScore {
    pub statistic: f64,
    pub p_value: f64,
}

/// A pairwise cointegration test.
pub trait CointegrationTest: Send + Sync {
    /// Test `a` and `b` (aligned, equal length) for cointegration.
    fn test(&self, a: &[f64], b: &[f64]) -> PairsResult<CointegrationScore>;
}

/// Uniform noise in [-0.5, 0.5) from a seeded generator.
#[cfg(test)]
pub(crate) fn white_noise(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..n).map(|_| rng.f64() - 0.5).collect()
}
