//! Property tests for lifecycle invariants.
//!
//! Uses proptest to verify, over random candle paths:
//! 1. Stop ratchet: a stop may only tighten, never loosen
//! 2. Size accounting: remaining percent never grows and fills sum to 100 on close
//! 3. Sizing: risk at the stop never exceeds the budget

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use perpsig_core::config::{EngineConfig, RiskConfig};
use perpsig_core::domain::{Candle, Direction, ExitReason, OpenRequest, Regime};
use perpsig_core::levels::StopTpCalculator;
use perpsig_core::lifecycle::{Lifecycle, NullSink, Observation, Update};
use perpsig_core::sizer::PositionSizer;

// ── Strategies (proptest) ────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Long), Just(Direction::Short)]
}

/// Close-to-close returns, each with a wick range.
fn arb_path() -> impl Strategy<Value = Vec<(f64, f64, f64)>> {
    prop::collection::vec((-0.02..0.02_f64, 0.0..0.01_f64, 0.0..0.01_f64), 1..80)
}

fn arb_context() -> impl Strategy<Value = Vec<(f64, bool)>> {
    prop::collection::vec((0.5..3.0_f64, any::<bool>()), 80)
}

fn candles(path: &[(f64, f64, f64)]) -> Vec<Candle> {
    let mut close = 100.0;
    path.iter()
        .enumerate()
        .map(|(i, &(ret, up, down))| {
            let open = close;
            close *= 1.0 + ret;
            let high = open.max(close) * (1.0 + up);
            let low = open.min(close) * (1.0 - down);
            Candle::new(t0() + Duration::minutes(5 * (i as i64 + 1)), open, high, low, close, 1.0)
        })
        .collect()
}

fn request(direction: Direction, stop_distance: f64) -> OpenRequest {
    let stop = 100.0 - direction.sign() * stop_distance;
    OpenRequest {
        symbol: "SOLUSDT".into(),
        direction,
        entry_price: 100.0,
        entry_time: t0(),
        stop_loss: stop,
        take_profits: StopTpCalculator::default().take_profits(
            direction,
            100.0,
            stop,
            Regime::Trending,
        ),
        contracts: 3.0,
        margin_used: 60.0,
        leverage: 5.0,
        entry_fee: 0.165,
        regime: Regime::Trending,
        entry_atr: 1.0,
        score: 70,
        entry_reason: "prop".into(),
    }
}

// ── 1 + 2. Ratchet and size accounting ───────────────────────────────

proptest! {
    #[test]
    fn stop_only_tightens_and_size_only_shrinks(
        direction in arb_direction(),
        stop_distance in 0.5..4.0_f64,
        path in arb_path(),
        context in arb_context(),
    ) {
        let lifecycle = Lifecycle::from_config(&EngineConfig::default());
        let mut sink = NullSink;
        let mut position = lifecycle.open(request(direction, stop_distance), &mut sink).unwrap();
        let bars = candles(&path);

        for (candle, &(atr, ranging)) in bars.iter().zip(&context) {
            let regime = if ranging { Regime::Choppy } else { Regime::Trending };
            let obs = Observation::candle(*candle).with_context(Some(atr), Some(regime));
            let stop_before = position.stop_loss;
            let remaining_before = position.remaining_percent;
            match lifecycle.update(position.clone(), &obs, &mut sink) {
                Update::Holding(next) => {
                    prop_assert!(
                        direction.is_tighter_or_equal(next.stop_loss, stop_before),
                        "stop loosened from {} to {}", stop_before, next.stop_loss
                    );
                    prop_assert!(next.remaining_percent <= remaining_before + 1e-9);
                    prop_assert!(next.remaining_percent > 0.0);
                    position = next;
                }
                Update::Closed(trade) => {
                    prop_assert!((trade.closed_percent() - 100.0).abs() < 1e-6);
                    prop_assert!(trade.exit_time >= trade.entry_time);
                    return Ok(());
                }
            }
        }

        // Survivors close flat at the last price.
        let last = bars.last().unwrap();
        let trade = lifecycle.force_close(
            position,
            last.timestamp,
            last.close,
            ExitReason::BacktestEnd,
            &mut sink,
        );
        prop_assert!((trade.closed_percent() - 100.0).abs() < 1e-6);
        prop_assert_eq!(trade.exit_reason, ExitReason::BacktestEnd);
    }

    /// Replaying the same path twice yields the same trade.
    #[test]
    fn lifecycle_is_deterministic(direction in arb_direction(), path in arb_path()) {
        let lifecycle = Lifecycle::from_config(&EngineConfig::default());
        let run = || {
            let mut sink = NullSink;
            let mut position = lifecycle.open(request(direction, 2.0), &mut sink).unwrap();
            for candle in candles(&path) {
                match lifecycle.update(position, &Observation::candle(candle), &mut sink) {
                    Update::Holding(p) => position = p,
                    Update::Closed(trade) => return Some(trade),
                }
            }
            None
        };
        prop_assert_eq!(run(), run());
    }
}

// ── 3. Sizing ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn risk_never_exceeds_budget(
        equity in 100.0..100_000.0_f64,
        entry in 1.0..50_000.0_f64,
        stop_fraction in 0.001..0.05_f64,
        free_margin_fraction in 0.05..1.0_f64,
    ) {
        let cfg = RiskConfig::default();
        let sizer = PositionSizer::new(cfg.clone());
        let stop = entry * (1.0 - stop_fraction);
        if let Ok(alloc) = sizer.size(equity, entry, stop, equity * free_margin_fraction) {
            prop_assert!(alloc.risk_usd <= equity * cfg.risk_per_trade * (1.0 + 1e-9));
            prop_assert!(alloc.leverage <= cfg.max_leverage + 1e-9);
            prop_assert!(alloc.margin_used <= equity * free_margin_fraction * (1.0 + 1e-9));
            prop_assert!(alloc.margin_used <= equity * cfg.max_margin_fraction * (1.0 + 1e-9));
        }
    }
}
