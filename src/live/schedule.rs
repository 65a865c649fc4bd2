//! Wall-clock scheduling for the live loop.

use crate::exchange::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

/// Source of evaluation ticks.
#[async_trait]
pub trait TickTrigger: Send {
    /// Wait for the next tick. `None` ends the loop.
    async fn next_tick(&mut self) -> Option<DateTime<Utc>>;
}

/// First bar boundary `b` with `b + offset > now`, plus `offset`.
///
/// Boundaries are aligned to the Unix epoch, so 15-minute bars fall on
/// :00, :15, :30 and :45.
pub fn next_boundary(now: DateTime<Utc>, timeframe: Timeframe, offset: Duration) -> DateTime<Utc> {
    let bar = timeframe.minutes() * 60;
    let shifted = (now - offset).timestamp();
    let next = (shifted.div_euclid(bar) + 1) * bar;

    DateTime::<Utc>::from_timestamp(next, 0)
        .map(|boundary| boundary + offset)
        .unwrap_or_else(|| now + timeframe.duration())
}

/// Fires shortly after every bar close until shutdown is signalled.
pub struct WallClockTrigger {
    timeframe: Timeframe,
    offset: Duration,
    shutdown: watch::Receiver<bool>,
}

impl WallClockTrigger {
    pub fn new(timeframe: Timeframe, offset_secs: u64, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            timeframe,
            offset: Duration::seconds(offset_secs as i64),
            shutdown,
        }
    }
}

#[async_trait]
impl TickTrigger for WallClockTrigger {
    async fn next_tick(&mut self) -> Option<DateTime<Utc>> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            let now = Utc::now();
            let target = next_boundary(now, self.timeframe, self.offset);
            let wait = (target - now).to_std().unwrap_or_default();
            debug!("Next evaluation at {} (in {:?})", target, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => return Some(target),
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, stopping scheduler");
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_next_quarter_hour() {
        let offset = Duration::seconds(1);
        assert_eq!(next_boundary(at(12, 7, 30), Timeframe::M15, offset), at(12, 15, 1));
        assert_eq!(next_boundary(at(12, 59, 59), Timeframe::M15, offset), at(13, 0, 1));
    }

    #[test]
    fn test_boundary_within_offset_is_not_skipped() {
        let offset = Duration::seconds(1);
        // The 12:15 bar closed but its evaluation time has not passed yet
        assert_eq!(
            next_boundary(at(12, 15, 0) + Duration::milliseconds(500), Timeframe::M15, offset),
            at(12, 15, 1)
        );
        // Exactly on the evaluation time moves to the next bar
        assert_eq!(next_boundary(at(12, 15, 1), Timeframe::M15, offset), at(12, 30, 1));
    }

    #[test]
    fn test_other_timeframes() {
        let zero = Duration::zero();
        assert_eq!(next_boundary(at(12, 7, 30), Timeframe::H1, zero), at(13, 0, 0));
        assert_eq!(next_boundary(at(12, 7, 30), Timeframe::M5, zero), at(12, 10, 0));
        assert_eq!(
            next_boundary(at(23, 0, 0), Timeframe::D1, zero),
            Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_trigger() {
        let (tx, rx) = watch::channel(false);
        let mut trigger = WallClockTrigger::new(Timeframe::D1, 1, rx);

        let handle = tokio::spawn(async move { trigger.next_tick().await });
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_trigger() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut trigger = WallClockTrigger::new(Timeframe::D1, 1, rx);
        assert_eq!(trigger.next_tick().await, None);
    }
}
