//! Live polling: the same desk as the replay, driven by a clock.
//!
//! Each poll feeds every open position the entry candles that closed after
//! the last one it saw, then scans for entries if the gate allows, then
//! persists. The last applied candle is stored on the position itself, so a
//! restarted poller never replays history. A failing store is logged and
//! reported in the poll summary; in-memory state is kept as is.

use crate::config::EngineConfig;
use crate::data::MarketData;
use crate::domain::{Candle, PositionId, Symbol, Trade};
use crate::engine::desk::{Desk, DeskMode};
use crate::evaluator::CandidateEvaluator;
use crate::lifecycle::EventSink;
use crate::risk::PeriodReport;
use crate::storage::{BotState, StateStore, StoreError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry candles fetched per symbol per poll.
const CATCH_UP_LIMIT: usize = 50;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSummary {
    pub closed: Vec<Trade>,
    pub opened: Vec<PositionId>,
    pub reports: Vec<PeriodReport>,
    pub persist_error: Option<String>,
}

pub struct LivePoller {
    desk: Desk,
    data: Arc<dyn MarketData>,
    store: Box<dyn StateStore>,
    sink: Box<dyn EventSink>,
    symbols: Vec<Symbol>,
    trades: Vec<Trade>,
}

impl LivePoller {
    /// Build a poller and resume from whatever the store holds.
    pub fn new(
        config: EngineConfig,
        evaluator: Arc<dyn CandidateEvaluator>,
        data: Arc<dyn MarketData>,
        store: Box<dyn StateStore>,
        sink: Box<dyn EventSink>,
        symbols: Vec<Symbol>,
    ) -> Result<Self, StoreError> {
        let state = store.load()?;
        let mut desk = Desk::new(config, evaluator, DeskMode::Live);
        desk.restore(&state);
        Ok(Self {
            desk,
            data,
            store,
            sink,
            symbols,
            trades: state.trades,
        })
    }

    pub fn desk(&self) -> &Desk {
        &self.desk
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn poll_once(&mut self, now: DateTime<Utc>) -> PollSummary {
        let mut summary = PollSummary {
            reports: self.desk.roll_periods(now, self.sink.as_mut()),
            ..PollSummary::default()
        };
        for report in &summary.reports {
            info!(
                kind = ?report.kind,
                period = %report.period_start,
                pnl = report.pnl,
                trades = report.trades,
                wins = report.wins,
                losses = report.losses,
                equity = report.equity,
                "period report"
            );
        }

        // ─── Update every open position, gated or not ───
        let entry_tf = self.desk.config().timeframes.entry;
        for symbol in self.desk.update_order(&self.symbols) {
            let candles = match self.data.window(&symbol, entry_tf, now, CATCH_UP_LIMIT) {
                Ok(c) => c,
                Err(e) => {
                    warn!(%symbol, error = %e, "no candles for open position");
                    continue;
                }
            };
            let fresh: Vec<Candle> = match self.desk.book().get(&symbol) {
                Some(position) => candles
                    .into_iter()
                    .filter(|c| position.is_unseen(c.timestamp))
                    .collect(),
                None => continue,
            };
            for candle in fresh {
                if let Some(trade) =
                    self.desk
                        .update_position(&*self.data, &symbol, candle, self.sink.as_mut())
                {
                    summary.closed.push(trade);
                    break;
                }
            }
        }
        self.trades.extend(summary.closed.iter().cloned());

        // ─── Scan ───
        summary.opened = self
            .desk
            .scan(&*self.data, &self.symbols, now, self.sink.as_mut());

        // ─── Persist ───
        if let Err(e) = self.persist() {
            warn!(error = %e, "state not persisted");
            summary.persist_error = Some(e.to_string());
        }
        info!(
            open = self.desk.book().len(),
            closed = summary.closed.len(),
            opened = summary.opened.len(),
            equity = self.desk.gate().equity(),
            "poll complete"
        );
        summary
    }

    /// Close `symbol` at `price` on request and persist the result.
    pub fn manual_close(&mut self, symbol: &str, price: f64, at: DateTime<Utc>) -> Option<Trade> {
        let trade = self
            .desk
            .manual_close(symbol, price, at, self.sink.as_mut())?;
        info!(id = %trade.id, price = trade.exit_price, pnl = trade.pnl, "manual close");
        self.trades.push(trade.clone());
        if let Err(e) = self.persist() {
            warn!(error = %e, "state not persisted after manual close");
        }
        Some(trade)
    }

    /// Poll every `interval` until `max_polls` is reached (forever when `None`).
    pub fn run(
        &mut self,
        clock: &dyn Clock,
        interval: std::time::Duration,
        max_polls: Option<usize>,
    ) -> Vec<PollSummary> {
        let mut summaries = Vec::new();
        loop {
            summaries.push(self.poll_once(clock.now()));
            if max_polls.is_some_and(|max| summaries.len() >= max) {
                return summaries;
            }
            std::thread::sleep(interval);
        }
    }

    pub fn state(&self) -> BotState {
        BotState {
            positions: self.desk.book().to_vec(),
            trades: self.trades.clone(),
            risk: Some(self.desk.risk_state()),
        }
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let state = self.state();
        self.store.save(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryMarketData, MarketSnapshot};
    use crate::domain::{Direction, ExitReason, Timeframe};
    use crate::evaluator::{Evaluation, FnEvaluator};
    use crate::lifecycle::NullSink;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    fn data(n: usize) -> Arc<dyn MarketData> {
        let mut d = InMemoryMarketData::new();
        for tf in [Timeframe::M5, Timeframe::M15, Timeframe::H4] {
            let candles = (0..n)
                .map(|i| {
                    let c = 100.0 + (i as f64 * 0.2).sin() * 2.0;
                    Candle::new(start() + tf.duration() * i as i32, c, c + 0.5, c - 0.5, c, 1000.0)
                })
                .collect();
            d.insert("ETHUSDT", tf, candles);
        }
        Arc::new(d)
    }

    fn config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.market_regime.enabled = false;
        cfg.regime.trend_adx = 0.0;
        cfg.regime.low_volatility_ratio = 0.0;
        cfg
    }

    fn always_long() -> Arc<dyn CandidateEvaluator> {
        Arc::new(FnEvaluator::new("long", 0, |_: &MarketSnapshot, d: Direction| {
            Ok(Evaluation {
                valid: d == Direction::Long,
                reason: "scripted".into(),
                score: 90,
            })
        }))
    }

    fn poller(store: Box<dyn StateStore>) -> LivePoller {
        LivePoller::new(
            config(),
            always_long(),
            data(400),
            store,
            Box::new(NullSink),
            vec!["ETHUSDT".into()],
        )
        .unwrap()
    }

    #[test]
    fn poll_opens_and_persists() {
        let mut p = poller(Box::new(MemoryStore::new()));
        let summary = p.poll_once(start() + Duration::minutes(5 * 300));
        assert_eq!(summary.opened.len(), 1);
        assert!(summary.persist_error.is_none());
        assert_eq!(p.state().positions.len(), 1);
    }

    #[test]
    fn later_polls_feed_new_candles_only() {
        let mut p = poller(Box::new(MemoryStore::new()));
        let t = start() + Duration::minutes(5 * 300);
        p.poll_once(t);
        let fills_before = p.desk().book().get("ETHUSDT").map(|pos| pos.fills.len());
        // same instant: no new candle, nothing changes
        let again = p.poll_once(t);
        assert!(again.closed.is_empty());
        assert_eq!(
            p.desk().book().get("ETHUSDT").map(|pos| pos.fills.len()),
            fills_before
        );
    }

    #[test]
    fn store_failure_is_reported_not_fatal() {
        let mut p = poller(Box::new(MemoryStore::failing()));
        let summary = p.poll_once(start() + Duration::minutes(5 * 300));
        assert!(summary.persist_error.is_some());
        assert_eq!(p.desk().book().len(), 1);
    }

    #[test]
    fn restart_resumes_open_positions() {
        let mut first = poller(Box::new(MemoryStore::new()));
        first.poll_once(start() + Duration::minutes(5 * 300));
        let saved = first.state();
        let second = poller(Box::new(MemoryStore::with_state(saved.clone())));
        assert_eq!(second.desk().book().len(), 1);
        assert_eq!(second.desk().gate().state(), saved.risk.as_ref().unwrap());
    }

    #[test]
    fn restarted_poller_does_not_replay_applied_candles() {
        let t = start() + Duration::minutes(5 * 300);
        let mut first = poller(Box::new(MemoryStore::new()));
        first.poll_once(t);
        let later = t + Duration::minutes(5 * 6);
        if !first.poll_once(later).closed.is_empty() {
            return;
        }
        let pos = first.desk().book().get("ETHUSDT").cloned().unwrap();
        assert_eq!(pos.last_update, Some(later - Duration::minutes(5)));

        let mut restarted = poller(Box::new(MemoryStore::with_state(first.state())));
        let again = restarted.poll_once(later);
        assert!(again.closed.is_empty());
        assert_eq!(restarted.desk().book().get("ETHUSDT"), Some(&pos));
    }

    #[test]
    fn positions_outside_the_symbol_list_are_still_updated() {
        let t = start() + Duration::minutes(5 * 300);
        let mut first = poller(Box::new(MemoryStore::new()));
        first.poll_once(t);

        let mut narrowed = LivePoller::new(
            config(),
            always_long(),
            data(400),
            Box::new(MemoryStore::with_state(first.state())),
            Box::new(NullSink),
            vec!["BTCUSDT".into()],
        )
        .unwrap();
        let later = t + Duration::minutes(5 * 4);
        let summary = narrowed.poll_once(later);
        match narrowed.desk().book().get("ETHUSDT") {
            Some(pos) => assert_eq!(pos.last_update, Some(later - Duration::minutes(5))),
            None => assert_eq!(summary.closed.len(), 1),
        }
    }

    #[test]
    fn manual_close_is_recorded_and_persisted() {
        let mut p = poller(Box::new(MemoryStore::new()));
        let t = start() + Duration::minutes(5 * 300);
        p.poll_once(t);
        let entry = p.desk().book().get("ETHUSDT").unwrap().entry_price;

        let trade = p.manual_close("ETHUSDT", entry - 1.0, t).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::Manual);
        let slipped = p.desk().lifecycle().costs().exit_price(Direction::Long, entry - 1.0);
        assert!((trade.exit_price - slipped).abs() < 1e-9);
        assert_eq!(p.trades(), &[trade.clone()]);
        assert_eq!(p.desk().gate().state().consecutive_losses, 1);
        let expected = config().account.initial_capital + trade.pnl;
        assert!((p.desk().gate().equity() - expected).abs() < 1e-9);

        let saved = p.store.load().unwrap();
        assert!(saved.positions.is_empty());
        assert_eq!(saved.trades, vec![trade]);
        assert!(p.manual_close("ETHUSDT", entry, t).is_none());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(start());
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start() + Duration::minutes(5));
        let mut p = poller(Box::new(MemoryStore::new()));
        clock.set(start() + Duration::minutes(5 * 300));
        let runs = p.run(&clock, std::time::Duration::ZERO, Some(2));
        assert_eq!(runs.len(), 2);
    }
}
