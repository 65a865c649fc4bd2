//! Spread construction and rolling z-score.
//!
//! The z-score of the latest spread value is
//! `(spread - mean(window)) / std(window)` over a trailing window of exactly
//! `window` observations, using the sample standard deviation. Warm-up rows
//! and zero-variance windows have no defined z-score.

use crate::error::{PairsError, PairsResult};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Smallest usable rolling window.
pub const MIN_WINDOW: usize = 2;

/// Elementwise `s1 - s2` over aligned series.
pub fn spread(s1: &[f64], s2: &[f64]) -> PairsResult<Vec<f64>> {
    if s1.len() != s2.len() {
        return Err(PairsError::LengthMismatch {
            left: s1.len(),
            right: s2.len(),
        });
    }

    Ok(s1.iter().zip(s2).map(|(a, b)| a - b).collect())
}

/// z-score of the last value in `window` relative to the whole window.
///
/// Returns `None` when the window is too short or has zero variance.
pub fn window_zscore<'a, I>(window: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a f64>,
    I::IntoIter: Clone,
{
    let values = window.into_iter();
    let count = values.clone().count();
    if count < MIN_WINDOW {
        return None;
    }

    let last = *values.clone().last()?;
    let mean = values.clone().mean();
    let std = values.std_dev();

    if !std.is_finite() || std == 0.0 {
        return None;
    }

    let z = (last - mean) / std;
    z.is_finite().then_some(z)
}

/// Incremental z-score over a bounded trailing window.
///
/// Retains at most `window` spread observations; each `push` returns the
/// z-score of the pushed value once the window is full.
#[derive(Debug, Clone)]
pub struct RollingZScore {
    window: usize,
    buffer: VecDeque<f64>,
}

impl RollingZScore {
    pub fn new(window: usize) -> PairsResult<Self> {
        if window < MIN_WINDOW {
            return Err(PairsError::InvalidWindow { window });
        }

        Ok(Self {
            window,
            buffer: VecDeque::with_capacity(window),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// True once `window` observations have been pushed.
    pub fn is_ready(&self) -> bool {
        self.buffer.len() == self.window
    }

    /// Push the next spread value and return its z-score if defined.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.buffer.len() == self.window {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);

        if !self.is_ready() {
            return None;
        }
        window_zscore(&self.buffer)
    }
}

/// Batch rolling z-score, one entry per spread value.
///
/// The first `window - 1` entries are always `None`.
pub fn rolling_zscore(spread: &[f64], window: usize) -> PairsResult<Vec<Option<f64>>> {
    let mut rolling = RollingZScore::new(window)?;
    Ok(spread.iter().map(|s| rolling.push(*s)).collect())
}

/// Current z-score from the most recent `window` prices of each leg.
///
/// Both slices must hold exactly the trailing window, oldest first. Returns
/// `Ok(None)` when the window has zero variance.
pub fn current_zscore(s1: &[f64], s2: &[f64]) -> PairsResult<Option<f64>> {
    let spread = spread(s1, s2)?;
    if spread.len() < MIN_WINDOW {
        return Err(PairsError::InsufficientData {
            expected: MIN_WINDOW,
            actual: spread.len(),
        });
    }

    Ok(window_zscore(&spread))
}
