//! EMA-pullback entry: trade with the HTF and primary trend when price pulls
//! back to the primary EMA21 and momentum turns back in the trend direction.

use super::score::{Alignment, ScoreBreakdown, ScoreInputs};
use super::{CandidateEvaluator, EvalError, Evaluation};
use crate::config::{StopConfig, TimeframeConfig};
use crate::data::{DataError, MarketSnapshot};
use crate::domain::{Candle, Direction, Timeframe};
use crate::indicators::{names, FrameSpec, IndicatorFrame};
use crate::market::structure::{is_near, swing_high, swing_low, trend, Trend};
use tracing::debug;

/// EMA200 needs this many candles on the HTF and primary windows.
const SLOW_EMA_PERIOD: usize = 200;
/// MACD(12,26,9) histogram plus a few rows of history.
const ENTRY_WARMUP: usize = 40;

const ENTRY_PROXIMITY: f64 = 0.002;
const SWING_CLEARANCE_ATR: f64 = 0.5;
const MIN_ATR_RATIO: f64 = 0.7;
const MAX_ATR_RATIO: f64 = 2.0;
/// Histogram must hold at least this share of its value three bars back.
const MOMENTUM_RETENTION: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct EmaPullbackEvaluator {
    timeframes: TimeframeConfig,
    spec: FrameSpec,
    swing_lookback: usize,
}

/// Last-row readings the checks and the score use.
#[derive(Debug, Clone, Copy)]
struct Readings {
    htf_close: f64,
    htf_ema: [f64; 3],
    close: f64,
    ema: [f64; 3],
    hist: [f64; 4],
    rsi: f64,
    atr: f64,
    atr_avg: f64,
    volume: f64,
    volume_avg: f64,
    entry_close: f64,
    entry_hist: [f64; 2],
}

impl EmaPullbackEvaluator {
    pub fn new(timeframes: TimeframeConfig, stops: &StopConfig) -> Self {
        Self {
            timeframes,
            spec: FrameSpec::default(),
            swing_lookback: stops.swing_lookback,
        }
    }

    fn read(
        &self,
        htf: &[Candle],
        primary: &[Candle],
        entry: &[Candle],
    ) -> Option<Readings> {
        let hf = IndicatorFrame::standard(htf, &self.spec);
        let pf = IndicatorFrame::standard(primary, &self.spec);
        let ef = IndicatorFrame::standard(entry, &self.spec);
        let emas = |f: &IndicatorFrame| -> Option<[f64; 3]> {
            Some([
                f.last(names::EMA_FAST)?,
                f.last(names::EMA_MID)?,
                f.last(names::EMA_SLOW)?,
            ])
        };
        Some(Readings {
            htf_close: htf.last()?.close,
            htf_ema: emas(&hf)?,
            close: primary.last()?.close,
            ema: emas(&pf)?,
            hist: [
                pf.back(names::MACD_HIST, 0)?,
                pf.back(names::MACD_HIST, 1)?,
                pf.back(names::MACD_HIST, 2)?,
                pf.back(names::MACD_HIST, 3)?,
            ],
            rsi: pf.last(names::RSI)?,
            atr: pf.last(names::ATR)?,
            atr_avg: pf.last(names::ATR_AVG)?,
            volume: primary.last()?.volume,
            volume_avg: pf.last(names::VOLUME_AVG)?,
            entry_close: entry.last()?.close,
            entry_hist: [
                ef.back(names::MACD_HIST, 0)?,
                ef.back(names::MACD_HIST, 1)?,
            ],
        })
    }

    /// First failed entry condition, if any.
    fn first_failure(
        &self,
        direction: Direction,
        r: &Readings,
        htf_trend: Trend,
        primary_trend: Trend,
        primary: &[Candle],
    ) -> Option<String> {
        if !htf_trend.agrees_with(direction) {
            return Some(format!("htf trend {htf_trend}"));
        }
        if !primary_trend.agrees_with(direction) {
            return Some(format!("primary trend {primary_trend}"));
        }
        let ratio = r.atr / r.atr_avg;
        if !(MIN_ATR_RATIO..=MAX_ATR_RATIO).contains(&ratio) {
            return Some(format!("atr ratio {ratio:.2} out of range"));
        }

        let sign = direction.sign();
        let [h0, h1, _, h3] = r.hist.map(|h| h * sign);
        if !(h0 > 0.0 && h0 > h1 && h0 >= MOMENTUM_RETENTION * h3) {
            return Some("macd momentum not confirmed".into());
        }
        if !is_near(r.entry_close, r.ema[0], ENTRY_PROXIMITY) {
            return Some("price not at ema21".into());
        }

        // Room to run before the opposing swing.
        let swing = match direction {
            Direction::Long => swing_high(primary, self.swing_lookback),
            Direction::Short => swing_low(primary, self.swing_lookback),
        };
        if let Some(swing) = swing {
            if direction.favorable_move(r.entry_close, swing) < SWING_CLEARANCE_ATR * r.atr {
                return Some("too close to swing".into());
            }
        }

        let [e0, e1] = r.entry_hist;
        if direction.favorable_move(e1, e0) <= 0.0 {
            return Some("entry momentum not turning".into());
        }
        None
    }
}

impl CandidateEvaluator for EmaPullbackEvaluator {
    fn name(&self) -> &str {
        "ema_pullback"
    }

    fn warmup(&self) -> usize {
        SLOW_EMA_PERIOD
    }

    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        direction: Direction,
    ) -> Result<Evaluation, EvalError> {
        let tfs = &self.timeframes;
        require(&snapshot.symbol, tfs.htf, snapshot.htf.len(), SLOW_EMA_PERIOD)?;
        require(&snapshot.symbol, tfs.primary, snapshot.primary.len(), SLOW_EMA_PERIOD)?;
        require(&snapshot.symbol, tfs.entry, snapshot.entry.len(), ENTRY_WARMUP)?;

        let Some(r) = self.read(&snapshot.htf, &snapshot.primary, &snapshot.entry) else {
            return Ok(Evaluation::rejected("indicators warming up"));
        };

        let htf_trend = trend(r.htf_close, r.htf_ema[0], r.htf_ema[1], r.htf_ema[2]);
        let primary_trend = trend(r.close, r.ema[0], r.ema[1], r.ema[2]);
        let failure =
            self.first_failure(direction, &r, htf_trend, primary_trend, &snapshot.primary);

        let inputs = ScoreInputs {
            direction,
            htf: alignment(direction, htf_trend, r.htf_close, r.htf_ema),
            histogram: r.hist[0],
            histogram_prev: r.hist[1],
            rsi: r.rsi,
            price: r.entry_close,
            ema_fast: r.ema[0],
            atr: r.atr,
            atr_ratio: r.atr / r.atr_avg,
            volume_ratio: if r.volume_avg > 0.0 {
                r.volume / r.volume_avg
            } else {
                0.0
            },
        };
        let breakdown = ScoreBreakdown::compute(&inputs);
        let score = breakdown.total();
        debug!(
            symbol = %snapshot.symbol,
            %direction,
            score,
            ?breakdown,
            failure = failure.as_deref().unwrap_or("none"),
            "evaluated"
        );

        Ok(match failure {
            Some(reason) => Evaluation {
                valid: false,
                reason,
                score,
            },
            None => Evaluation {
                valid: true,
                reason: format!("{direction} pullback to ema21, htf {htf_trend}"),
                score,
            },
        })
    }
}

fn require(symbol: &str, timeframe: Timeframe, have: usize, need: usize) -> Result<(), DataError> {
    if have < need {
        return Err(DataError::InsufficientHistory {
            symbol: symbol.to_string(),
            timeframe,
            have,
            need,
        });
    }
    Ok(())
}

fn alignment(direction: Direction, htf_trend: Trend, price: f64, ema: [f64; 3]) -> Alignment {
    match htf_trend.direction() {
        None => Alignment::Neutral,
        Some(d) if d != direction => Alignment::Against,
        Some(_) => {
            let s = direction.sign();
            let leading = (ema[0] - ema[1]) * s > 0.0;
            if (price - ema[0]) * s > 0.0 && leading && (ema[1] - ema[2]) * s > 0.0 {
                Alignment::Stacked
            } else if leading {
                Alignment::Leading
            } else {
                Alignment::Agrees
            }
        }
    }
}
