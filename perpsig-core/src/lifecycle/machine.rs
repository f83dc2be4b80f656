//! Position state machine: one transition per closed candle or live tick.
//!
//! Per observation, in order:
//! 1. adaptive stop (tightens the stop, or arms a protection slice)
//! 2. hit detection on the candle's confirmed high/low, and the armed
//!    protection slice exits if price came back to its level
//! 3. stop + take-profit on the same candle resolves as a stop
//! 4. take-profit fill of the next level, then stop trailing
//! 5. near take-profit reversal exit
//! 6. stop-loss fill
//!
//! Closed positions leave as immutable [`Trade`] records.

use crate::config::{AdaptiveStopConfig, EngineConfig, NearTpConfig};
use crate::domain::{
    Candle, Direction, ExitReason, Fill, FillKind, OpenRequest, Position, PositionError,
    ProtectionMark, Regime, TakeProfit, TpLevel, Trade, PERCENT_EPSILON,
};
use crate::lifecycle::costs::Costs;
use crate::lifecycle::events::{notify, AdaptiveTrigger, EventSink, LifecycleEvent};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// One price observation for a position, with optional market context for
/// the adaptive stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub candle: Candle,
    /// Current ATR on the position's primary timeframe.
    pub atr: Option<f64>,
    pub regime: Option<Regime>,
}

impl Observation {
    pub fn candle(candle: Candle) -> Self {
        Self {
            candle,
            atr: None,
            regime: None,
        }
    }

    /// A live price tick, treated as a flat candle.
    pub fn tick(at: DateTime<Utc>, price: f64) -> Self {
        Self::candle(Candle::flat(at, price))
    }

    pub fn with_context(mut self, atr: Option<f64>, regime: Option<Regime>) -> Self {
        self.atr = atr;
        self.regime = regime;
        self
    }
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Holding(Position),
    Closed(Trade),
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    costs: Costs,
    adaptive: AdaptiveStopConfig,
    near_tp: NearTpConfig,
    tp1_trail_fraction: f64,
}

impl Lifecycle {
    pub fn new(
        costs: Costs,
        adaptive: AdaptiveStopConfig,
        near_tp: NearTpConfig,
        tp1_trail_fraction: f64,
    ) -> Self {
        Self {
            costs,
            adaptive,
            near_tp,
            tp1_trail_fraction,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(
            Costs::from_config(&cfg.execution),
            cfg.adaptive_stop.clone(),
            cfg.near_tp.clone(),
            cfg.take_profit.tp1_trail_fraction,
        )
    }

    pub fn costs(&self) -> &Costs {
        &self.costs
    }

    pub fn open(
        &self,
        request: OpenRequest,
        sink: &mut dyn EventSink,
    ) -> Result<Position, PositionError> {
        let position = Position::open(request)?;
        info!(
            id = %position.id,
            entry = position.entry_price,
            stop = position.stop_loss,
            contracts = position.contracts,
            "opened"
        );
        notify(
            sink,
            LifecycleEvent::Opened {
                id: position.id.clone(),
                symbol: position.symbol.clone(),
                direction: position.direction,
                at: position.entry_time,
                entry_price: position.entry_price,
                stop_loss: position.stop_loss,
                take_profits: position.take_profits,
                contracts: position.contracts,
                leverage: position.leverage,
                margin_used: position.margin_used,
                score: position.score,
                regime: position.regime,
                reason: position.entry_reason.clone(),
            },
        );
        Ok(position)
    }

    pub fn update(
        &self,
        mut position: Position,
        obs: &Observation,
        sink: &mut dyn EventSink,
    ) -> Update {
        let candle = &obs.candle;
        if candle.is_void() {
            return Update::Holding(position);
        }
        match self.step(position, obs, sink) {
            Update::Holding(mut position) => {
                position.mark_observed(candle.timestamp, candle.close);
                Update::Holding(position)
            }
            closed => closed,
        }
    }

    fn step(&self, mut position: Position, obs: &Observation, sink: &mut dyn EventSink) -> Update {
        let candle = &obs.candle;
        let at = candle.timestamp;

        // ─── 1. Adaptive stop ───
        if let Some(trade) = self.adaptive_check(&mut position, obs, sink) {
            return Update::Closed(trade);
        }

        position.observe_extreme(candle.high, candle.low);

        // ─── 2. Hit detection ───
        let direction = position.direction;
        let stop_hit = match direction {
            Direction::Long => candle.low <= position.stop_loss,
            Direction::Short => candle.high >= position.stop_loss,
        };
        let target = position.next_target();
        let tp_hit = target.filter(|tp| match direction {
            Direction::Long => candle.high >= tp.price,
            Direction::Short => candle.low <= tp.price,
        });

        let protection_hit = position
            .protection
            .filter(|m| m.is_pending() && m.at < at && m.is_touched(direction, candle.high, candle.low));
        if let Some(mark) = protection_hit {
            let fill = self.protection_exit(&mut position, mark, at, sink);
            if position.is_closed() {
                return Update::Closed(self.finish(
                    position,
                    at,
                    fill.price,
                    ExitReason::PartialProtection,
                    sink,
                ));
            }
        }

        // ─── 3. Same-candle collision ───
        if stop_hit && tp_hit.is_some() {
            debug!(id = %position.id, %at, "stop and take-profit on one candle, resolving as stop");
            return Update::Closed(self.stop_out(position, at, sink));
        }

        // ─── 4. Take-profit ───
        if let Some(tp) = tp_hit {
            return self.take_profit(position, tp, at, sink);
        }

        // ─── 5. Near take-profit ───
        if !stop_hit {
            if let Some(tp) = target {
                if self.is_near_tp_reversal(&position, &tp, candle.close) {
                    return self.near_take_profit(position, tp, candle, sink);
                }
            }
        }

        // ─── 6. Stop-loss ───
        if stop_hit {
            return Update::Closed(self.stop_out(position, at, sink));
        }
        Update::Holding(position)
    }

    /// Close the whole remainder at `price` with market slippage.
    pub fn force_close(
        &self,
        mut position: Position,
        at: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
        sink: &mut dyn EventSink,
    ) -> Trade {
        let direction = position.direction;
        let exit = self.costs.exit_price(direction, price);
        let percent = position.remaining_percent;
        let fill = self.fill_slice(&mut position, FillKind::Forced, exit, percent, at, false);
        self.finish(position, at, fill.price, reason, sink)
    }

    // ── Transitions ──

    fn take_profit(
        &self,
        mut position: Position,
        tp: TakeProfit,
        at: DateTime<Utc>,
        sink: &mut dyn EventSink,
    ) -> Update {
        let price = self.costs.take_profit_price(position.direction, tp.price);
        let percent = slice_percent(&position, &tp);
        let fill = self.fill_slice(
            &mut position,
            FillKind::TakeProfit(tp.level),
            price,
            percent,
            at,
            true,
        );
        position.mark_hit(tp.level);
        self.trail(&mut position, tp.level);
        info!(id = %position.id, level = %tp.level, price, pnl = fill.pnl, "take-profit");
        let close_price = fill.price;
        notify(
            sink,
            LifecycleEvent::TakeProfit {
                id: position.id.clone(),
                symbol: position.symbol.clone(),
                level: tp.level,
                fill,
                remaining_percent: position.remaining_percent,
                stop_loss: position.stop_loss,
            },
        );
        if position.is_closed() {
            return Update::Closed(self.finish(position, at, close_price, ExitReason::Completed, sink));
        }
        Update::Holding(position)
    }

    fn is_near_tp_reversal(&self, position: &Position, tp: &TakeProfit, close: f64) -> bool {
        if !self.near_tp.enabled {
            return false;
        }
        let direction = position.direction;
        let entry = position.entry_price;
        let distance = direction.favorable_move(entry, tp.price);
        if distance <= 0.0 || position.best_price <= 0.0 {
            return false;
        }
        let progress = direction.favorable_move(entry, position.best_price) / distance;
        let pullback_percent =
            direction.favorable_move(close, position.best_price) / position.best_price * 100.0;
        progress >= self.near_tp.threshold
            && pullback_percent >= self.near_tp.min_pullback_percent
            && direction.favorable_move(entry, close) > 0.0
    }

    fn near_take_profit(
        &self,
        mut position: Position,
        tp: TakeProfit,
        candle: &Candle,
        sink: &mut dyn EventSink,
    ) -> Update {
        let at = candle.timestamp;
        let price = self.costs.exit_price(position.direction, candle.close);
        let percent = slice_percent(&position, &tp);
        let fill = self.fill_slice(
            &mut position,
            FillKind::NearTakeProfit(tp.level),
            price,
            percent,
            at,
            false,
        );
        position.mark_hit(tp.level);
        self.trail(&mut position, tp.level);
        info!(
            id = %position.id,
            level = %tp.level,
            best = position.best_price,
            price,
            "near take-profit reversal exit"
        );
        let close_price = fill.price;
        notify(
            sink,
            LifecycleEvent::NearTakeProfit {
                id: position.id.clone(),
                symbol: position.symbol.clone(),
                level: tp.level,
                fill,
                best_price: position.best_price,
                remaining_percent: position.remaining_percent,
                stop_loss: position.stop_loss,
            },
        );
        if position.is_closed() {
            return Update::Closed(self.finish(position, at, close_price, ExitReason::Completed, sink));
        }
        Update::Holding(position)
    }

    fn stop_out(&self, mut position: Position, at: DateTime<Utc>, sink: &mut dyn EventSink) -> Trade {
        let price = self.costs.stop_price(position.direction, position.stop_loss);
        let percent = position.remaining_percent;
        let fill = self.fill_slice(&mut position, FillKind::StopLoss, price, percent, at, false);
        let reason = if position.partial_protection_active {
            ExitReason::PartialProtection
        } else {
            ExitReason::Stopped
        };
        self.finish(position, at, fill.price, reason, sink)
    }

    /// Exit the armed protection slice at its level.
    fn protection_exit(
        &self,
        position: &mut Position,
        mark: ProtectionMark,
        at: DateTime<Utc>,
        sink: &mut dyn EventSink,
    ) -> Fill {
        let price = self.costs.stop_price(position.direction, mark.level);
        let fill = self.fill_slice(position, FillKind::Protection, price, mark.percent, at, false);
        if let Some(m) = position.protection.as_mut() {
            m.filled = true;
        }
        info!(id = %position.id, level = mark.level, price, "protection slice exit");
        notify(
            sink,
            LifecycleEvent::ProtectionExit {
                id: position.id.clone(),
                symbol: position.symbol.clone(),
                fill: fill.clone(),
                remaining_percent: position.remaining_percent,
            },
        );
        fill
    }

    /// Returns a trade when the re-armed protection closes the remainder.
    fn adaptive_check(
        &self,
        position: &mut Position,
        obs: &Observation,
        sink: &mut dyn EventSink,
    ) -> Option<Trade> {
        let cfg = &self.adaptive;
        if !cfg.enabled {
            return None;
        }
        let rearmed = position.adaptive_stop_triggered && position.partial_protection_active;
        if position.adaptive_stop_triggered && !rearmed {
            return None;
        }
        let close = obs.candle.close;
        if position.profit_r(close) < cfg.min_profit_r {
            return None;
        }

        let (reference_atr, reference_regime) = match (rearmed, position.protection) {
            (true, Some(mark)) => (mark.atr, mark.regime),
            (true, None) => return None,
            (false, _) => (position.entry_atr, position.regime),
        };
        let spiked = obs
            .atr
            .is_some_and(|atr| reference_atr > 0.0 && atr >= cfg.volatility_spike * reference_atr);
        let degraded = cfg.regime_change
            && reference_regime == Regime::Trending
            && obs.regime.is_some_and(|r| r.is_ranging());
        let trigger = if spiked {
            AdaptiveTrigger::VolatilitySpike
        } else if degraded {
            AdaptiveTrigger::RegimeChange
        } else {
            return None;
        };

        let at = obs.candle.timestamp;
        let direction = position.direction;
        let old_stop = position.stop_loss;

        if rearmed {
            let price = self.costs.exit_price(direction, close);
            let percent = position.remaining_percent;
            let fill = self.fill_slice(position, FillKind::Protection, price, percent, at, false);
            info!(id = %position.id, ?trigger, price, "protection closes remainder");
            notify(
                sink,
                LifecycleEvent::AdaptiveStop {
                    id: position.id.clone(),
                    symbol: position.symbol.clone(),
                    at,
                    trigger,
                    old_stop,
                    new_stop: position.stop_loss,
                    protected_level: None,
                    protection_fill: Some(fill.clone()),
                },
            );
            return Some(self.finish(
                position.clone(),
                at,
                fill.price,
                ExitReason::PartialProtection,
                sink,
            ));
        }

        let protected = position.entry_price * (1.0 + direction.sign() * cfg.breakeven_buffer);
        if direction.favorable_move(protected, close) <= 0.0 {
            return None;
        }
        position.adaptive_stop_triggered = true;

        // With partial protection the stop stays put: only the protected
        // slice exits at breakeven plus buffer.
        let protected_level = if cfg.partial_protection {
            position.partial_protection_active = true;
            position.protection = Some(ProtectionMark {
                at,
                atr: obs.atr.unwrap_or(position.entry_atr),
                regime: obs.regime.unwrap_or(position.regime),
                level: protected,
                percent: position.remaining_percent * cfg.protection_close_fraction,
                filled: false,
            });
            Some(protected)
        } else {
            position.tighten_stop(protected);
            None
        };

        info!(
            id = %position.id,
            ?trigger,
            old_stop,
            new_stop = position.stop_loss,
            "adaptive stop"
        );
        notify(
            sink,
            LifecycleEvent::AdaptiveStop {
                id: position.id.clone(),
                symbol: position.symbol.clone(),
                at,
                trigger,
                old_stop,
                new_stop: position.stop_loss,
                protected_level,
                protection_fill: None,
            },
        );
        None
    }

    // ── Bookkeeping ──

    /// Close `percent` of the original size at `price` and book the P&L.
    fn fill_slice(
        &self,
        position: &mut Position,
        kind: FillKind,
        price: f64,
        percent: f64,
        at: DateTime<Utc>,
        take_profit: bool,
    ) -> Fill {
        let percent = percent.clamp(0.0, position.remaining_percent);
        let contracts = position.contracts * percent / 100.0;
        let fee = if take_profit {
            self.costs.take_profit_fee(price, contracts)
        } else {
            self.costs.taker_fee(price, contracts)
        };
        let pnl = position.direction.favorable_move(position.entry_price, price) * contracts - fee;

        position.realized_pnl += pnl;
        position.fees_paid += fee;
        position.remaining_percent -= percent;
        if position.remaining_percent < PERCENT_EPSILON {
            position.remaining_percent = 0.0;
        }
        let fill = Fill {
            timestamp: at,
            kind,
            price,
            percent,
            contracts,
            pnl,
            fee,
        };
        position.fills.push(fill.clone());
        fill
    }

    /// tp1: stop moves `tp1_trail_fraction` of the way to entry. tp2: breakeven.
    fn trail(&self, position: &mut Position, level: TpLevel) {
        let candidate = match level {
            TpLevel::Tp1 => {
                position.stop_loss
                    + (position.entry_price - position.stop_loss) * self.tp1_trail_fraction
            }
            TpLevel::Tp2 => position.entry_price,
            TpLevel::Tp3 => return,
        };
        let from = position.stop_loss;
        if position.tighten_stop(candidate) {
            debug!(id = %position.id, from, to = position.stop_loss, "stop trailed");
        }
    }

    fn finish(
        &self,
        position: Position,
        at: DateTime<Utc>,
        exit_price: f64,
        reason: ExitReason,
        sink: &mut dyn EventSink,
    ) -> Trade {
        let trade = Trade::from_position(position, at, exit_price, reason);
        info!(
            id = %trade.id,
            %reason,
            exit = exit_price,
            pnl = trade.pnl,
            "closed"
        );
        notify(sink, LifecycleEvent::closed(&trade));
        trade
    }
}

/// Percent to close at a take-profit: the level's share, or everything left
/// when this is the last level or the share would overshoot the remainder.
fn slice_percent(position: &Position, tp: &TakeProfit) -> f64 {
    if tp.level == TpLevel::Tp3 || position.remaining_percent - tp.close_percent <= PERCENT_EPSILON {
        position.remaining_percent
    } else {
        tp.close_percent
    }
}
