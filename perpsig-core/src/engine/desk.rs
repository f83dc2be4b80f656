//! The trading desk: one account, its open positions, and the two steps
//! both the replay loop and the live poller run: update, then scan.
//!
//! Within a step every open position is updated before any candidate is
//! scanned, and symbols are visited in the order they were declared.

use crate::config::EngineConfig;
use crate::data::{DataError, MarketData, MarketSnapshot};
use crate::domain::{
    Candle, Direction, ExitReason, OpenRequest, PositionError, PositionId, Symbol, Trade,
};
use crate::evaluator::{
    entry_threshold, replay_account_state, CandidateEvaluator, EvalError, Evaluation,
};
use crate::levels::{LevelError, StopTpCalculator};
use crate::lifecycle::{
    notify, BookError, EventSink, Lifecycle, LifecycleEvent, Observation, PositionBook,
};
use crate::market::{MarketAdjustment, MarketRegimeFilter, RegimeDetector, RegimeReading};
use crate::risk::{AccountState, GateBlock, PeriodReport, RiskGate, RiskState};
use crate::sizer::{PositionSizer, SizingRejection};
use crate::storage::BotState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a candidate did not become a position.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("stop placement: {0}")]
    Levels(#[from] LevelError),

    #[error("sizing: {0}")]
    Sizing(#[from] SizingRejection),

    #[error("position: {0}")]
    Position(#[from] PositionError),

    #[error(transparent)]
    Book(#[from] BookError),
}

/// How account state is judged when picking the score threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskMode {
    /// Daily P&L rule plus the equity-below-start drawdown rule.
    Replay,
    /// Daily P&L rule only.
    Live,
}

pub struct Desk {
    config: EngineConfig,
    mode: DeskMode,
    evaluator: Arc<dyn CandidateEvaluator>,
    lifecycle: Lifecycle,
    levels: StopTpCalculator,
    sizer: PositionSizer,
    regimes: RegimeDetector,
    market: MarketRegimeFilter,
    gate: RiskGate,
    book: PositionBook,
    last_block: Option<GateBlock>,
}

impl Desk {
    pub fn new(config: EngineConfig, evaluator: Arc<dyn CandidateEvaluator>, mode: DeskMode) -> Self {
        Self {
            lifecycle: Lifecycle::from_config(&config),
            levels: StopTpCalculator::new(config.stops.clone(), config.take_profit.clone()),
            sizer: PositionSizer::new(config.risk.clone()),
            regimes: RegimeDetector::new(config.regime.clone()),
            market: MarketRegimeFilter::new(config.market_regime.clone(), &config.risk),
            gate: RiskGate::new(config.risk.clone(), config.account.initial_capital),
            book: PositionBook::new(),
            last_block: None,
            evaluator,
            mode,
            config,
        }
    }

    /// Resume from persisted positions and gate state.
    pub fn restore(&mut self, state: &BotState) {
        self.book = PositionBook::from_positions(state.positions.iter().cloned());
        if let Some(risk) = &state.risk {
            self.gate = RiskGate::from_state(self.config.risk.clone(), risk.clone());
        }
        info!(
            positions = self.book.len(),
            equity = self.gate.equity(),
            "desk restored"
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn risk_state(&self) -> RiskState {
        self.gate.state().clone()
    }

    /// Close out finished days/weeks and publish their reports.
    pub fn roll_periods(&mut self, now: DateTime<Utc>, sink: &mut dyn EventSink) -> Vec<PeriodReport> {
        let reports = self.gate.roll_periods(now);
        for report in &reports {
            notify(sink, LifecycleEvent::PeriodReport(report.clone()));
        }
        reports
    }

    // ── Update ──

    /// Feed the entry-timeframe candle opened at `open_time` to every open
    /// position. Missing candles are skipped.
    pub fn update_positions(
        &mut self,
        data: &dyn MarketData,
        symbols: &[Symbol],
        open_time: DateTime<Utc>,
        sink: &mut dyn EventSink,
    ) -> Vec<Trade> {
        let entry_tf = self.config.timeframes.entry;
        let mut closed = Vec::new();
        for symbol in self.update_order(symbols) {
            let candle = match data.candle_at(&symbol, entry_tf, open_time) {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%symbol, error = %e, "no candle for open position");
                    continue;
                }
            };
            if let Some(trade) = self.update_position(data, &symbol, candle, sink) {
                closed.push(trade);
            }
        }
        closed
    }

    /// One lifecycle step for `symbol` on a closed candle. Candles at or
    /// before the position's last applied observation are ignored.
    pub fn update_position(
        &mut self,
        data: &dyn MarketData,
        symbol: &str,
        candle: Candle,
        sink: &mut dyn EventSink,
    ) -> Option<Trade> {
        if !self.book.get(symbol)?.is_unseen(candle.timestamp) {
            debug!(%symbol, at = %candle.timestamp, "candle already applied");
            return None;
        }
        let as_of = candle.timestamp + self.config.timeframes.entry.duration();
        let context = self.primary_regime(data, symbol, as_of);
        let obs = Observation::candle(candle).with_context(
            context.map(|r| r.atr).filter(|atr| *atr > 0.0),
            context.map(|r| r.regime),
        );
        let trade = self.book.update(symbol, &obs, &self.lifecycle, sink)?;
        self.gate.record_trade(trade.pnl, trade.exit_time);
        Some(trade)
    }

    /// Declared symbols first, then any restored position outside the list.
    pub fn update_order(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut order: Vec<Symbol> = symbols
            .iter()
            .filter(|s| self.book.contains(s))
            .cloned()
            .collect();
        order.extend(
            self.book
                .symbols()
                .into_iter()
                .filter(|s| !symbols.contains(s)),
        );
        order
    }

    fn primary_regime(
        &self,
        data: &dyn MarketData,
        symbol: &str,
        as_of: DateTime<Utc>,
    ) -> Option<RegimeReading> {
        let tfs = &self.config.timeframes;
        match data.window(symbol, tfs.primary, as_of, tfs.history_limit) {
            Ok(window) if !window.is_empty() => Some(self.regimes.detect(&window)),
            Ok(_) => None,
            Err(e) => {
                debug!(%symbol, error = %e, "no primary window");
                None
            }
        }
    }

    // ── Scan ──

    /// Look for new entries with data closed by `as_of`. Returns the ids of
    /// positions opened.
    pub fn scan(
        &mut self,
        data: &dyn MarketData,
        symbols: &[Symbol],
        as_of: DateTime<Utc>,
        sink: &mut dyn EventSink,
    ) -> Vec<PositionId> {
        if let Err(block) = self.gate.can_trade(as_of) {
            if self.last_block.as_ref() != Some(&block) {
                warn!(%block, "entries blocked");
                self.last_block = Some(block);
            }
            return Vec::new();
        }
        self.last_block = None;

        let adjustment = self.market_adjustment(data, as_of);
        let state = self.account_state();
        let threshold = entry_threshold(&self.config.scoring, state, adjustment.threshold_offset);
        debug!(%as_of, %state, threshold, bias = %adjustment.bias, "scanning");

        let mut opened = Vec::new();
        for symbol in symbols {
            if self.book.len() >= adjustment.max_positions {
                debug!(max = adjustment.max_positions, "position cap reached");
                break;
            }
            if self.book.contains(symbol) {
                continue;
            }
            match self.try_enter(data, symbol, as_of, threshold, &adjustment, sink) {
                Ok(Some(id)) => opened.push(id),
                Ok(None) => {}
                Err(e) => debug!(%symbol, error = %e, "candidate skipped"),
            }
        }
        opened
    }

    pub fn account_state(&self) -> AccountState {
        let daily = self.gate.account_state();
        match self.mode {
            DeskMode::Replay => replay_account_state(
                &self.config.scoring,
                self.gate.equity(),
                self.gate.initial_equity(),
                daily,
            ),
            DeskMode::Live => daily,
        }
    }

    /// Market-wide adjustment from the reference asset, neutral without data.
    pub fn market_adjustment(&self, data: &dyn MarketData, as_of: DateTime<Utc>) -> MarketAdjustment {
        let base = self.config.risk.max_active_positions;
        if !self.market.is_enabled() {
            return MarketAdjustment::neutral(base);
        }
        let tfs = &self.config.timeframes;
        match data.window(self.market.reference_symbol(), tfs.primary, as_of, tfs.history_limit) {
            Ok(window) if !window.is_empty() => self.market.assess(&window),
            _ => MarketAdjustment::neutral(base),
        }
    }

    fn try_enter(
        &mut self,
        data: &dyn MarketData,
        symbol: &str,
        as_of: DateTime<Utc>,
        threshold: u32,
        adjustment: &MarketAdjustment,
        sink: &mut dyn EventSink,
    ) -> Result<Option<PositionId>, EntryError> {
        let snapshot = MarketSnapshot::load(data, symbol, &self.config.timeframes, as_of)?;
        let Some(price) = snapshot.last_price() else {
            return Ok(None);
        };
        let reading = self.regimes.detect(&snapshot.primary);
        if !reading.regime.is_tradeable() {
            debug!(%symbol, regime = %reading.regime, "regime not tradeable");
            return Ok(None);
        }

        for direction in [Direction::Long, Direction::Short] {
            let evaluation = self.evaluator.evaluate(&snapshot, direction)?;
            if evaluation.is_accepted(threshold, self.config.scoring.override_score) {
                let id = self.open(&snapshot, direction, price, &reading, evaluation, adjustment, sink)?;
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn open(
        &mut self,
        snapshot: &MarketSnapshot,
        direction: Direction,
        price: f64,
        reading: &RegimeReading,
        evaluation: Evaluation,
        adjustment: &MarketAdjustment,
        sink: &mut dyn EventSink,
    ) -> Result<PositionId, EntryError> {
        let costs = *self.lifecycle.costs();
        let entry = costs.entry_price(direction, price);
        let stop = self
            .levels
            .stop_loss(direction, entry, reading.atr, &snapshot.primary)?;
        let take_profits = self.levels.take_profits(direction, entry, stop, reading.regime);

        let equity = self.gate.equity();
        let allocation = self.sizer.size_scaled(
            equity,
            entry,
            stop,
            self.book.available_margin(equity),
            adjustment.size_multiplier,
        )?;

        let request = OpenRequest {
            symbol: snapshot.symbol.clone(),
            direction,
            entry_price: entry,
            entry_time: snapshot.as_of,
            stop_loss: stop,
            take_profits,
            contracts: allocation.contracts,
            margin_used: allocation.margin_used,
            leverage: allocation.leverage,
            entry_fee: costs.taker_fee(entry, allocation.contracts),
            regime: reading.regime,
            entry_atr: reading.atr,
            score: evaluation.score,
            entry_reason: evaluation.reason,
        };
        let position = self.lifecycle.open(request, sink)?;
        let id = position.id.clone();
        self.book.insert(position)?;
        Ok(id)
    }

    // ── Forced closes ──

    /// Close every open position at its last entry-timeframe close.
    pub fn close_all(
        &mut self,
        data: &dyn MarketData,
        as_of: DateTime<Utc>,
        reason: ExitReason,
        sink: &mut dyn EventSink,
    ) -> Vec<Trade> {
        let entry_tf = self.config.timeframes.entry;
        let trades = self.book.close_all(
            as_of,
            |p| {
                data.window(&p.symbol, entry_tf, as_of, 1)
                    .ok()
                    .and_then(|w| w.last().map(|c| c.close))
            },
            reason,
            &self.lifecycle,
            sink,
        );
        for trade in &trades {
            self.gate.record_trade(trade.pnl, trade.exit_time);
        }
        trades
    }

    /// Close `symbol` at `price` on request, with market slippage.
    pub fn manual_close(
        &mut self,
        symbol: &str,
        price: f64,
        at: DateTime<Utc>,
        sink: &mut dyn EventSink,
    ) -> Option<Trade> {
        let trade = self
            .book
            .close(symbol, at, price, ExitReason::Manual, &self.lifecycle, sink)?;
        self.gate.record_trade(trade.pnl, trade.exit_time);
        Some(trade)
    }

    /// Realized equity plus the mark-to-market of open positions.
    pub fn equity_at(&self, data: &dyn MarketData, open_time: DateTime<Utc>) -> f64 {
        let entry_tf = self.config.timeframes.entry;
        let unrealized = self.book.unrealized_pnl(|p| {
            data.candle_at(&p.symbol, entry_tf, open_time)
                .ok()
                .flatten()
                .map(|c| c.close)
        });
        self.gate.equity() + unrealized
    }
}
