//! Candidate evaluation: is this symbol worth entering in this direction now?
//!
//! Evaluators are account-agnostic: they see a causal [`MarketSnapshot`] and
//! a direction, never equity or open positions. Thresholds that depend on
//! account state are applied afterwards by [`entry_threshold`].

pub mod pullback;
pub mod score;

pub use pullback::EmaPullbackEvaluator;
pub use score::{ScoreBreakdown, ScoreInputs};

use crate::config::ScoringConfig;
use crate::data::{DataError, MarketSnapshot};
use crate::domain::Direction;
use crate::risk::AccountState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("evaluator failed: {0}")]
    Failed(String),
}

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Every entry condition held.
    pub valid: bool,
    /// Confirmation text when valid, the first failed condition otherwise.
    pub reason: String,
    /// Setup quality, 0–100.
    pub score: u32,
}

impl Evaluation {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            score: 0,
        }
    }

    /// `(valid || score >= override) && score >= threshold`.
    pub fn is_accepted(&self, threshold: u32, override_score: u32) -> bool {
        (self.valid || self.score >= override_score) && self.score >= threshold
    }
}

/// Pluggable entry heuristic.
pub trait CandidateEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Candles needed per timeframe before `evaluate` can succeed.
    fn warmup(&self) -> usize;

    /// Must only read `snapshot`; it already excludes anything after `as_of`.
    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        direction: Direction,
    ) -> Result<Evaluation, EvalError>;
}

/// Wraps a closure as an evaluator. Handy for scripted replays.
pub struct FnEvaluator<F> {
    name: String,
    warmup: usize,
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&MarketSnapshot, Direction) -> Result<Evaluation, EvalError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, warmup: usize, f: F) -> Self {
        Self {
            name: name.into(),
            warmup,
            f,
        }
    }
}

impl<F> CandidateEvaluator for FnEvaluator<F>
where
    F: Fn(&MarketSnapshot, Direction) -> Result<Evaluation, EvalError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.warmup
    }

    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        direction: Direction,
    ) -> Result<Evaluation, EvalError> {
        (self.f)(snapshot, direction)
    }
}

/// Minimum score for a new entry given account state and the market-wide offset.
pub fn entry_threshold(cfg: &ScoringConfig, state: AccountState, offset: u32) -> u32 {
    let base = match state {
        AccountState::Normal => cfg.threshold_normal,
        AccountState::Drawdown => cfg.threshold_drawdown,
        AccountState::HotStreak => cfg.threshold_hot_streak,
    };
    base.saturating_add(offset).min(100)
}

/// Backtest account state: equity under `equity_drawdown_fraction` of the
/// starting balance counts as drawdown before the daily rule is consulted.
pub fn replay_account_state(
    cfg: &ScoringConfig,
    equity: f64,
    initial_equity: f64,
    daily: AccountState,
) -> AccountState {
    if equity < initial_equity * cfg.equity_drawdown_fraction {
        AccountState::Drawdown
    } else {
        daily
    }
}
