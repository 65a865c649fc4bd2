//! Live signal loop.
//!
//! On every tick each tracked pair is re-evaluated from the latest closes:
//! the current z-score drives the position engine, and every resulting
//! intent is sent to the execution bot one leg at a time. A leg's state only
//! changes after the bot acknowledged the order, so a failed webhook leaves
//! the pair in an explicit partial state that the next tick repairs.

mod schedule;

pub use schedule::{next_boundary, TickTrigger, WallClockTrigger};

use crate::config::{Config, TrackedPairConfig, WebhookConfig};
use crate::exchange::{fetch_price_table, MarketDataProvider, Timeframe};
use crate::execution::{DealAction, ExecutionDispatcher};
use crate::persistence::{DispatchRecord, PairStateStore, PersistedPair};
use crate::strategy::{
    current_zscore, IntentKind, Leg, LegState, PairState, PositionEngine, TransitionIntent,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runtime state of one pair traded live.
#[derive(Debug, Clone)]
pub struct TrackedPair {
    pub config: TrackedPairConfig,
    pub state: PairState,
    pub last_zscore: Option<f64>,
    engine: PositionEngine,
}

impl TrackedPair {
    pub fn new(config: TrackedPairConfig) -> Result<Self> {
        let engine = PositionEngine::new(config.threshold)
            .with_context(|| format!("Invalid threshold for pair {}", config.id()))?;

        Ok(Self {
            config,
            state: PairState::Flat,
            last_zscore: None,
            engine,
        })
    }

    pub fn id(&self) -> String {
        self.config.id()
    }

    /// Symbol the execution bot trades for `leg`.
    pub fn exec_symbol(&self, leg: Leg) -> &str {
        match leg {
            Leg::S1 => &self.config.s1_exec_symbol,
            Leg::S2 => &self.config.s2_exec_symbol,
        }
    }

    fn to_persisted(&self, now: DateTime<Utc>) -> PersistedPair {
        PersistedPair {
            pair_id: self.id(),
            state: self.state,
            window: self.config.window,
            threshold: self.config.threshold,
            last_zscore: self.last_zscore,
            updated_at: now,
        }
    }
}

/// Counters for one pass over all tracked pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub dispatched: usize,
    pub failed_dispatches: usize,
    pub skipped_intents: usize,
    pub errors: usize,
}

/// Bot ids for each position direction.
#[derive(Debug, Clone)]
struct PositionIds {
    long: String,
    short: String,
}

impl PositionIds {
    fn for_intent(&self, kind: IntentKind) -> &str {
        match kind.direction() {
            LegState::Long => &self.long,
            _ => &self.short,
        }
    }
}

impl From<&WebhookConfig> for PositionIds {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            long: config.long_position_id.clone(),
            short: config.short_position_id.clone(),
        }
    }
}

/// Collaborators shared by all pair evaluations.
struct LiveContext {
    provider: Arc<dyn MarketDataProvider>,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    store: PairStateStore,
    position_ids: PositionIds,
    timeframe: Timeframe,
    buffer_bars: usize,
}

/// Periodic evaluation of every tracked pair.
pub struct LiveSignalLoop {
    pairs: Vec<TrackedPair>,
    ctx: LiveContext,
}

impl LiveSignalLoop {
    /// Build the loop from configuration, restoring persisted pair states.
    pub fn new(
        config: &Config,
        provider: Arc<dyn MarketDataProvider>,
        dispatcher: Arc<dyn ExecutionDispatcher>,
        store: PairStateStore,
    ) -> Result<Self> {
        let mut persisted = store.load_pairs()?;
        let mut pairs = Vec::with_capacity(config.live.pairs.len());

        for pair_config in &config.live.pairs {
            let mut pair = TrackedPair::new(pair_config.clone())?;

            if let Some(saved) = persisted.remove(&pair.id()) {
                if saved.window != pair.config.window || saved.threshold != pair.config.threshold {
                    info!(
                        "Pair {} parameters changed: window {} -> {}, threshold {} -> {}",
                        pair.id(),
                        saved.window,
                        pair.config.window,
                        saved.threshold,
                        pair.config.threshold
                    );
                }
                pair.state = saved.state;
                pair.last_zscore = saved.last_zscore;
                info!(pair = %pair.id(), state = %pair.state, "Restored pair state");
            }

            pairs.push(pair);
        }

        for stale in persisted.keys() {
            warn!("Persisted pair {} is no longer configured", stale);
        }

        Ok(Self {
            pairs,
            ctx: LiveContext {
                provider,
                dispatcher,
                store,
                position_ids: PositionIds::from(&config.webhook),
                timeframe: config.live.timeframe,
                buffer_bars: config.live.buffer_bars,
            },
        })
    }

    pub fn pairs(&self) -> &[TrackedPair] {
        &self.pairs
    }

    pub fn store(&self) -> &PairStateStore {
        &self.ctx.store
    }

    /// Evaluate every pair once. Failures are contained per pair.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        for pair in self.pairs.iter_mut() {
            if let Err(e) = self.ctx.evaluate(pair, now, &mut report).await {
                error!("❌ [LIVE] Evaluation of {} failed: {:#}", pair.id(), e);
                report.errors += 1;
            }
        }

        info!(
            "📊 [LIVE] Cycle at {}: {} evaluated, {} dispatched, {} failed, {} errors",
            now.format("%Y-%m-%d %H:%M:%S"),
            report.evaluated,
            report.dispatched,
            report.failed_dispatches,
            report.errors
        );
        report
    }

    /// Run cycles until the trigger stops.
    pub async fn run<T: TickTrigger>(&mut self, trigger: &mut T) -> Result<()> {
        info!("🚀 [LIVE] Tracking {} pairs", self.pairs.len());
        for pair in &self.pairs {
            info!(
                "   {} | window={} threshold={:.4} | state: {}",
                pair.id(),
                pair.config.window,
                pair.config.threshold,
                pair.state
            );
        }

        while let Some(tick) = trigger.next_tick().await {
            self.run_cycle(tick).await;
        }

        info!("👋 [LIVE] Signal loop stopped");
        Ok(())
    }
}

impl LiveContext {
    async fn evaluate(
        &self,
        pair: &mut TrackedPair,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let window = pair.config.window;
        let bars = (window + self.buffer_bars) as i32;
        let start = now - self.timeframe.duration() * bars;
        let instruments = [pair.config.s1.clone(), pair.config.s2.clone()];

        let table = fetch_price_table(
            self.provider.as_ref(),
            &instruments,
            self.timeframe,
            start,
            now,
        )
        .await?;

        if table.len() < window {
            warn!(
                "⚠️  [LIVE] {} has {} aligned bars, needs {}; keeping state {}",
                pair.id(),
                table.len(),
                window,
                pair.state
            );
            return Ok(());
        }

        let recent = table.tail(window);
        let zscore = current_zscore(recent.column(0), recent.column(1))?;
        report.evaluated += 1;

        let Some(z) = zscore else {
            warn!("⚠️  [LIVE] {} spread has zero variance, skipping", pair.id());
            self.persist(pair, now);
            return Ok(());
        };
        pair.last_zscore = Some(z);

        let transition = pair.engine.step(pair.state, z);
        debug!(
            pair = %pair.id(),
            zscore = z,
            from = %pair.state,
            to = %transition.next,
            intents = transition.intents.len(),
            "Pair evaluated"
        );

        for intent in &transition.intents {
            self.execute(pair, intent, now, report).await;
        }

        if pair.state != transition.next {
            warn!(
                "⚠️  [LIVE] {} ended in {} instead of {}, retrying next tick",
                pair.id(),
                pair.state,
                transition.next
            );
        }

        self.persist(pair, now);
        Ok(())
    }

    /// Dispatch one intent and apply it to the pair on acknowledgement.
    async fn execute(
        &self,
        pair: &mut TrackedPair,
        intent: &TransitionIntent,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let Some(next) = pair.state.apply(intent) else {
            warn!(
                "Skipping {} for {}: not applicable to state {}",
                intent,
                pair.id(),
                pair.state
            );
            report.skipped_intents += 1;
            return;
        };

        let action = if intent.kind.is_open() {
            DealAction::StartDeal
        } else {
            DealAction::CloseDeal
        };
        let symbol = pair.exec_symbol(intent.leg).to_string();
        let position_id = self.position_ids.for_intent(intent.kind);

        let result = self.dispatcher.dispatch(action, position_id, &symbol).await;

        let record = DispatchRecord {
            timestamp: now,
            pair_id: pair.id(),
            leg: intent.leg,
            action,
            symbol: symbol.clone(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.store.record_dispatch(&record) {
            error!("Failed to record dispatch for {}: {}", pair.id(), e);
        }

        match result {
            Ok(()) => {
                info!(
                    "✅ [LIVE] {} {} {} ({})",
                    pair.id(),
                    intent,
                    symbol,
                    action
                );
                pair.state = next;
                report.dispatched += 1;
            }
            Err(e) => {
                error!("❌ [LIVE] {} {} {} failed: {}", pair.id(), intent, symbol, e);
                report.failed_dispatches += 1;
            }
        }
    }

    fn persist(&self, pair: &TrackedPair, now: DateTime<Utc>) {
        if let Err(e) = self.store.save_pair(&pair.to_persisted(now)) {
            error!("❌ [PERSISTENCE] Failed to save {}: {}", pair.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockMarketDataProvider, StaticMarketData};
    use crate::execution::{DispatchError, MockExecutionDispatcher};
    use crate::strategy::SpreadSide;
    use chrono::{Duration, TimeZone};
    use mockall::Sequence;
    use std::collections::VecDeque;
    use tokio_test::assert_ok;

    const S1: &str = "DOGE/USDT:USDT";
    const S2: &str = "ADA/USDT:USDT";

    fn tick() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap()
    }

    fn pair_config() -> TrackedPairConfig {
        TrackedPairConfig {
            s1: S1.to_string(),
            s2: S2.to_string(),
            s1_exec_symbol: "DOGE_USDT".to_string(),
            s2_exec_symbol: "ADA_USDT".to_string(),
            window: 10,
            threshold: 2.0,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.webhook.long_position_id = "long-bot".to_string();
        config.webhook.short_position_id = "short-bot".to_string();
        config.live.pairs = vec![pair_config()];
        config
    }

    /// Twelve 15-minute bars ending at the 12:00 close; S2 is flat at 100 so
    /// the spread follows `s1_last` against an alternating 1/2 history.
    fn market(s1_last: f64) -> StaticMarketData {
        let last_bar = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let times: Vec<DateTime<Utc>> = (0..12)
            .rev()
            .map(|k| last_bar - Duration::minutes(15 * k))
            .collect();

        let s1: Vec<(DateTime<Utc>, f64)> = times
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let close = if i == times.len() - 1 {
                    s1_last
                } else if i % 2 == 0 {
                    101.0
                } else {
                    102.0
                };
                (*t, close)
            })
            .collect();
        let s2: Vec<(DateTime<Utc>, f64)> = times.iter().map(|t| (*t, 100.0)).collect();

        StaticMarketData::new().with_closes(S1, &s1).with_closes(S2, &s2)
    }

    fn expect_call(
        mock: &mut MockExecutionDispatcher,
        seq: &mut Sequence,
        action: DealAction,
        position_id: &'static str,
        symbol: &'static str,
        ok: bool,
    ) {
        mock.expect_dispatch()
            .withf(move |a, id, s| *a == action && id == position_id && s == symbol)
            .times(1)
            .in_sequence(seq)
            .returning(move |_, _, _| {
                if ok {
                    Ok(())
                } else {
                    Err(DispatchError::Status {
                        status: 500,
                        body: "bot offline".to_string(),
                    })
                }
            });
    }

    fn live_loop(
        market: StaticMarketData,
        dispatcher: MockExecutionDispatcher,
        store: PairStateStore,
    ) -> LiveSignalLoop {
        LiveSignalLoop::new(&config(), Arc::new(market), Arc::new(dispatcher), store).unwrap()
    }

    #[tokio::test]
    async fn test_entry_opens_both_legs() {
        let mut mock = MockExecutionDispatcher::new();
        let mut seq = Sequence::new();
        expect_call(&mut mock, &mut seq, DealAction::StartDeal, "short-bot", "DOGE_USDT", true);
        expect_call(&mut mock, &mut seq, DealAction::StartDeal, "long-bot", "ADA_USDT", true);

        let store = PairStateStore::new(":memory:").unwrap();
        let mut live = live_loop(market(110.0), mock, store);

        let report = live.run_cycle(tick()).await;
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.errors, 0);

        let pair = &live.pairs()[0];
        assert_eq!(pair.state, PairState::Open(SpreadSide::Short));
        assert!(pair.last_zscore.unwrap() > 2.0);

        let saved = live.store().load_pair("DOGEUSDT-ADAUSDT").unwrap().unwrap();
        assert_eq!(saved.state, PairState::Open(SpreadSide::Short));
        assert_eq!(live.store().recent_dispatches(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_leg_leaves_partial_state_and_retries() {
        let mut mock = MockExecutionDispatcher::new();
        let mut seq = Sequence::new();
        expect_call(&mut mock, &mut seq, DealAction::StartDeal, "short-bot", "DOGE_USDT", false);
        expect_call(&mut mock, &mut seq, DealAction::StartDeal, "long-bot", "ADA_USDT", true);
        // Next tick only the missing leg is opened
        expect_call(&mut mock, &mut seq, DealAction::StartDeal, "short-bot", "DOGE_USDT", true);

        let store = PairStateStore::new(":memory:").unwrap();
        let mut live = live_loop(market(110.0), mock, store);

        let report = live.run_cycle(tick()).await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed_dispatches, 1);
        assert_eq!(
            live.pairs()[0].state,
            PairState::Partial {
                side: SpreadSide::Short,
                open_leg: Leg::S2
            }
        );

        let log = live.store().recent_dispatches(10).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].success);
        assert!(!log[1].success);
        assert!(log[1].error.as_deref().unwrap().contains("bot offline"));

        let report = live.run_cycle(tick() + Duration::minutes(15)).await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(live.pairs()[0].state, PairState::Open(SpreadSide::Short));
    }

    #[tokio::test]
    async fn test_restored_position_exits_on_mean_reversion() {
        let store = PairStateStore::new(":memory:").unwrap();
        store
            .save_pair(&PersistedPair {
                pair_id: "DOGEUSDT-ADAUSDT".to_string(),
                state: PairState::Open(SpreadSide::Short),
                window: 10,
                threshold: 2.0,
                last_zscore: Some(2.8),
                updated_at: tick(),
            })
            .unwrap();

        let mut mock = MockExecutionDispatcher::new();
        let mut seq = Sequence::new();
        expect_call(&mut mock, &mut seq, DealAction::CloseDeal, "short-bot", "DOGE_USDT", true);
        expect_call(&mut mock, &mut seq, DealAction::CloseDeal, "long-bot", "ADA_USDT", true);

        let mut live = live_loop(market(101.0), mock, store);
        assert_eq!(live.pairs()[0].state, PairState::Open(SpreadSide::Short));

        live.run_cycle(tick()).await;
        assert_eq!(live.pairs()[0].state, PairState::Flat);
        assert!(live.pairs()[0].last_zscore.unwrap() <= 0.0);
    }

    #[tokio::test]
    async fn test_failed_second_close_keeps_open_leg_until_next_tick() {
        let store = PairStateStore::new(":memory:").unwrap();
        store
            .save_pair(&PersistedPair {
                pair_id: "DOGEUSDT-ADAUSDT".to_string(),
                state: PairState::Open(SpreadSide::Short),
                window: 10,
                threshold: 2.0,
                last_zscore: Some(2.8),
                updated_at: tick(),
            })
            .unwrap();

        let mut mock = MockExecutionDispatcher::new();
        let mut seq = Sequence::new();
        expect_call(&mut mock, &mut seq, DealAction::CloseDeal, "short-bot", "DOGE_USDT", true);
        expect_call(&mut mock, &mut seq, DealAction::CloseDeal, "long-bot", "ADA_USDT", false);
        // Next tick only the leg still open is closed
        expect_call(&mut mock, &mut seq, DealAction::CloseDeal, "long-bot", "ADA_USDT", true);

        let mut live = live_loop(market(101.0), mock, store);

        let report = live.run_cycle(tick()).await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed_dispatches, 1);

        let partial = PairState::Partial {
            side: SpreadSide::Short,
            open_leg: Leg::S2,
        };
        let pair = &live.pairs()[0];
        assert_eq!(pair.state, partial);
        assert!(pair.state.is_partial());
        assert_eq!(pair.state.legs(), (LegState::Flat, LegState::Long));

        let saved = live.store().load_pair("DOGEUSDT-ADAUSDT").unwrap().unwrap();
        assert_eq!(saved.state, partial);

        let report = live.run_cycle(tick() + Duration::minutes(15)).await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed_dispatches, 0);
        assert!(live.pairs()[0].state.is_flat());

        let saved = live.store().load_pair("DOGEUSDT-ADAUSDT").unwrap().unwrap();
        assert_eq!(saved.state, PairState::Flat);
    }

    #[tokio::test]
    async fn test_fetch_covers_window_plus_buffer() {
        let now = tick();
        let expected_start = now - Duration::minutes(15 * 12);

        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_fetch_ohlcv_range()
            .withf(move |instrument, timeframe, start, end| {
                (instrument == S1 || instrument == S2)
                    && *timeframe == Timeframe::M15
                    && *start == expected_start
                    && *end == now
            })
            .times(2)
            .returning(|_, _, _, _| Ok(Vec::new()));

        let mut dispatcher = MockExecutionDispatcher::new();
        dispatcher.expect_dispatch().never();

        let store = PairStateStore::new(":memory:").unwrap();
        let mut live =
            LiveSignalLoop::new(&config(), Arc::new(provider), Arc::new(dispatcher), store)
                .unwrap();

        let report = live.run_cycle(now).await;
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn test_inside_band_dispatches_nothing() {
        let mut mock = MockExecutionDispatcher::new();
        mock.expect_dispatch().never();

        let store = PairStateStore::new(":memory:").unwrap();
        let mut live = live_loop(market(101.5), mock, store);

        let report = live.run_cycle(tick()).await;
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(live.pairs()[0].state, PairState::Flat);
        assert!(live.store().load_pair("DOGEUSDT-ADAUSDT").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_market_data_failure_keeps_loop_alive() {
        let mut mock = MockExecutionDispatcher::new();
        mock.expect_dispatch().never();

        let store = PairStateStore::new(":memory:").unwrap();
        let mut live = live_loop(StaticMarketData::new(), mock, store);

        let report = live.run_cycle(tick()).await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.evaluated, 0);
        assert_eq!(live.pairs()[0].state, PairState::Flat);
    }

    #[tokio::test]
    async fn test_short_history_is_skipped() {
        let mut mock = MockExecutionDispatcher::new();
        mock.expect_dispatch().never();

        let store = PairStateStore::new(":memory:").unwrap();
        let mut live = live_loop(market(110.0), mock, store);

        // Requested range ends before the first bar
        let report = live.run_cycle(tick() - Duration::hours(5)).await;
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.errors, 0);
    }

    struct ScriptedTicks(VecDeque<DateTime<Utc>>);

    #[async_trait::async_trait]
    impl TickTrigger for ScriptedTicks {
        async fn next_tick(&mut self) -> Option<DateTime<Utc>> {
            self.0.pop_front()
        }
    }

    #[tokio::test]
    async fn test_run_until_trigger_stops() {
        let mut mock = MockExecutionDispatcher::new();
        mock.expect_dispatch().never();

        let market = Arc::new(market(101.5));
        let store = PairStateStore::new(":memory:").unwrap();
        let mut live =
            LiveSignalLoop::new(&config(), market.clone(), Arc::new(mock), store).unwrap();

        let mut ticks = ScriptedTicks(VecDeque::from(vec![tick(), tick()]));
        assert_ok!(live.run(&mut ticks).await);

        // Two legs fetched per tick
        assert_eq!(market.request_count(), 4);
    }

    #[test]
    fn test_position_ids_follow_direction() {
        let ids = PositionIds {
            long: "L".to_string(),
            short: "S".to_string(),
        };
        assert_eq!(ids.for_intent(IntentKind::OpenLong), "L");
        assert_eq!(ids.for_intent(IntentKind::CloseLong), "L");
        assert_eq!(ids.for_intent(IntentKind::OpenShort), "S");
        assert_eq!(ids.for_intent(IntentKind::CloseShort), "S");
    }
}
