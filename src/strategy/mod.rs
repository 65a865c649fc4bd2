//! Pairs trading strategy implementation.
//!
//! Contains the core logic for:
//! - Cointegration scoring and best-pair selection
//! - Spread and rolling z-score construction
//! - The position state machine shared by backtest and live trading

mod position;
mod selector;
mod spread;

pub use position::{
    IntentKind, Leg, LegState, PairState, PositionEngine, SpreadSide, Transition,
    TransitionIntent,
};
pub use selector::{
    CandidatePair, CointegrationMatrix, CointegrationSelector, PairSignal, SelectedPair,
    DEFAULT_SIGNIFICANCE,
};
pub use spread::{current_zscore, rolling_zscore, spread, window_zscore, RollingZScore, MIN_WINDOW};
