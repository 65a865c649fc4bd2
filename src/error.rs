//! Error types for pair selection, signal construction and evaluation.

use thiserror::Error;

/// Errors raised by the pure pairs-trading computations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PairsError {
    /// The price table has too few instruments to form a pair
    #[error("Cointegration matrix needs at least 2 instruments, got {instruments}")]
    EmptyMatrix { instruments: usize },

    /// Not enough observations for the requested computation
    #[error("Insufficient data: expected at least {expected} observations, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    /// Rolling window below the minimum of 2 observations
    #[error("Invalid rolling window {window}: must be at least 2")]
    InvalidWindow { window: usize },

    /// Entry threshold must be strictly positive
    #[error("Invalid z-score threshold {threshold}: must be positive and finite")]
    InvalidThreshold { threshold: f64 },

    /// Two series that must be aligned have different lengths
    #[error("Series length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    /// A backtest record with no usable rows
    #[error("Backtest record is empty: no rows with a defined z-score")]
    EmptyRecord,

    /// Instrument not present in the price table
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    /// Malformed input while importing tabular data
    #[error("Parse error: {0}")]
    Parse(String),
}

pub type PairsResult<T> = std::result::Result<T, PairsError>;
