//! Mean-reversion position state machine.
//!
//! One engine serves both the backtest (a fold over a z-score series) and
//! the live loop (one step per cycle, producing per-leg intents). The exit
//! rule is evaluated before the entry rule on every step, so a single large
//! z-score swing can close one side and open the other in the same step.

use crate::error::{PairsError, PairsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One instrument of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    S1,
    S2,
}

impl Leg {
    pub const BOTH: [Leg; 2] = [Leg::S1, Leg::S2];

    fn index(self) -> usize {
        match self {
            Leg::S1 => 0,
            Leg::S2 => 1,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::S1 => write!(f, "S1"),
            Leg::S2 => write!(f, "S2"),
        }
    }
}

/// Position held in a single instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegState {
    #[default]
    Flat,
    Long,
    Short,
}

impl LegState {
    /// Signed exposure: +1 long, -1 short, 0 flat.
    pub fn sign(self) -> f64 {
        match self {
            LegState::Flat => 0.0,
            LegState::Long => 1.0,
            LegState::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LegState::Flat => "FLAT",
            LegState::Long => "LONG",
            LegState::Short => "SHORT",
        }
    }
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LegState {
    type Err = PairsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FLAT" => Ok(LegState::Flat),
            "LONG" => Ok(LegState::Long),
            "SHORT" => Ok(LegState::Short),
            other => Err(PairsError::Parse(format!("unknown leg state '{}'", other))),
        }
    }
}

/// Direction of a spread position.
///
/// `Short` sells S1 and buys S2 (entered when the spread is rich);
/// `Long` buys S1 and sells S2 (entered when the spread is cheap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpreadSide {
    Long,
    Short,
}

impl SpreadSide {
    /// Position each leg holds on this side.
    pub fn leg_state(self, leg: Leg) -> LegState {
        match (self, leg) {
            (SpreadSide::Long, Leg::S1) | (SpreadSide::Short, Leg::S2) => LegState::Long,
            (SpreadSide::Long, Leg::S2) | (SpreadSide::Short, Leg::S1) => LegState::Short,
        }
    }

    fn of_leg(leg: Leg, state: LegState) -> Option<Self> {
        match (leg, state) {
            (_, LegState::Flat) => None,
            (Leg::S1, LegState::Long) | (Leg::S2, LegState::Short) => Some(SpreadSide::Long),
            (Leg::S1, LegState::Short) | (Leg::S2, LegState::Long) => Some(SpreadSide::Short),
        }
    }
}

/// Joint position of a tracked pair.
///
/// Both legs always carry opposite signs or are flat; the same-sign
/// combinations have no representation. `Partial` exists only in live
/// operation, after one leg's dispatch succeeded and the other's failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PairState {
    #[default]
    Flat,
    Open(SpreadSide),
    Partial { side: SpreadSide, open_leg: Leg },
}

impl PairState {
    /// Rebuild a pair state from individual leg positions.
    ///
    /// Returns `None` for same-sign combinations.
    pub fn from_legs(s1: LegState, s2: LegState) -> Option<Self> {
        match (
            SpreadSide::of_leg(Leg::S1, s1),
            SpreadSide::of_leg(Leg::S2, s2),
        ) {
            (None, None) => Some(PairState::Flat),
            (Some(a), Some(b)) if a == b => Some(PairState::Open(a)),
            (Some(_), Some(_)) => None,
            (Some(side), None) => Some(PairState::Partial {
                side,
                open_leg: Leg::S1,
            }),
            (None, Some(side)) => Some(PairState::Partial {
                side,
                open_leg: Leg::S2,
            }),
        }
    }

    /// Position held in `leg`.
    pub fn leg(&self, leg: Leg) -> LegState {
        match *self {
            PairState::Flat => LegState::Flat,
            PairState::Open(side) => side.leg_state(leg),
            PairState::Partial { side, open_leg } if open_leg == leg => side.leg_state(leg),
            PairState::Partial { .. } => LegState::Flat,
        }
    }

    /// `(S1, S2)` positions.
    pub fn legs(&self) -> (LegState, LegState) {
        (self.leg(Leg::S1), self.leg(Leg::S2))
    }

    /// Side of any open exposure.
    pub fn side(&self) -> Option<SpreadSide> {
        match *self {
            PairState::Flat => None,
            PairState::Open(side) | PairState::Partial { side, .. } => Some(side),
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PairState::Flat)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, PairState::Partial { .. })
    }

    /// State after `intent` has been executed.
    ///
    /// Returns `None` when the intent's precondition does not hold (closing
    /// a position the leg does not have, opening over an existing one) or
    /// when the result would be a same-sign state.
    pub fn apply(&self, intent: &TransitionIntent) -> Option<PairState> {
        let current = self.leg(intent.leg);
        let next = match (intent.kind, current) {
            (IntentKind::OpenLong, LegState::Flat) => LegState::Long,
            (IntentKind::OpenShort, LegState::Flat) => LegState::Short,
            (IntentKind::CloseLong, LegState::Long) => LegState::Flat,
            (IntentKind::CloseShort, LegState::Short) => LegState::Flat,
            _ => return None,
        };

        let mut legs = [self.leg(Leg::S1), self.leg(Leg::S2)];
        legs[intent.leg.index()] = next;
        PairState::from_legs(legs[0], legs[1])
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairState::Flat => write!(f, "flat"),
            PairState::Open(SpreadSide::Long) => write!(f, "long spread"),
            PairState::Open(SpreadSide::Short) => write!(f, "short spread"),
            PairState::Partial { side, open_leg } => {
                let (s1, s2) = self.legs();
                write!(
                    f,
                    "partial {:?} spread (S1 {}, S2 {}, open {})",
                    side, s1, s2, open_leg
                )
            }
        }
    }
}

/// Order-level action on one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl IntentKind {
    pub fn is_open(self) -> bool {
        matches!(self, IntentKind::OpenLong | IntentKind::OpenShort)
    }

    /// Direction of the position this intent opens or closes.
    pub fn direction(self) -> LegState {
        match self {
            IntentKind::OpenLong | IntentKind::CloseLong => LegState::Long,
            IntentKind::OpenShort | IntentKind::CloseShort => LegState::Short,
        }
    }
}

/// A single per-leg order the live loop must dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionIntent {
    pub leg: Leg,
    pub kind: IntentKind,
}

impl TransitionIntent {
    fn open(leg: Leg, state: LegState) -> Option<Self> {
        let kind = match state {
            LegState::Long => IntentKind::OpenLong,
            LegState::Short => IntentKind::OpenShort,
            LegState::Flat => return None,
        };
        Some(Self { leg, kind })
    }

    fn close(leg: Leg, state: LegState) -> Option<Self> {
        let kind = match state {
            LegState::Long => IntentKind::CloseLong,
            LegState::Short => IntentKind::CloseShort,
            LegState::Flat => return None,
        };
        Some(Self { leg, kind })
    }
}

impl fmt::Display for TransitionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.leg)
    }
}

/// Result of one state-machine step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: PairState,
    /// Orders taking the current state to `next`: closes before opens,
    /// S1 before S2 within each group.
    pub intents: Vec<TransitionIntent>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.intents.is_empty()
    }
}

/// Threshold rules driving the pair position.
///
/// - exit: a short spread closes once `z <= 0`, a long spread once `z >= 0`
/// - entry: `z > threshold` targets a short spread, `z < -threshold` a long one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEngine {
    threshold: f64,
}

impl PositionEngine {
    pub fn new(threshold: f64) -> PairsResult<Self> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(PairsError::InvalidThreshold { threshold });
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Advance `state` by one observation with z-score `z`.
    ///
    /// A `Partial` state is evaluated like the spread it belongs to: the exit
    /// rule closes whichever legs are open and the entry rule opens only the
    /// legs still missing.
    pub fn step(&self, state: PairState, z: f64) -> Transition {
        let mut legs = [state.leg(Leg::S1), state.leg(Leg::S2)];
        let mut closes = Vec::new();
        let mut opens = Vec::new();

        let exit = match state.side() {
            Some(SpreadSide::Short) => z <= 0.0,
            Some(SpreadSide::Long) => z >= 0.0,
            None => false,
        };
        if exit {
            for leg in Leg::BOTH {
                if let Some(intent) = TransitionIntent::close(leg, legs[leg.index()]) {
                    closes.push(intent);
                    legs[leg.index()] = LegState::Flat;
                }
            }
        }

        let target = if z > self.threshold {
            Some(SpreadSide::Short)
        } else if z < -self.threshold {
            Some(SpreadSide::Long)
        } else {
            None
        };
        if let Some(side) = target {
            for leg in Leg::BOTH {
                let desired = side.leg_state(leg);
                let current = legs[leg.index()];
                if current == desired {
                    continue;
                }
                if let Some(intent) = TransitionIntent::close(leg, current) {
                    closes.push(intent);
                }
                if let Some(intent) = TransitionIntent::open(leg, desired) {
                    opens.push(intent);
                }
                legs[leg.index()] = desired;
            }
        }

        // Entry needs |z| > threshold > 0, which always trips the exit of an
        // opposite position first, so the legs never end up with the same sign.
        let next = PairState::from_legs(legs[0], legs[1]).unwrap_or(state);

        closes.extend(opens);
        Transition {
            next,
            intents: closes,
        }
    }

    /// Fold the engine over a z-score series starting flat.
    ///
    /// Element `t` is the state after observation `t`.
    pub fn run(&self, zscores: &[f64]) -> Vec<PairState> {
        let mut state = PairState::Flat;
        zscores
            .iter()
            .map(|z| {
                state = self.step(state, *z).next;
                state
            })
            .collect()
    }
}
