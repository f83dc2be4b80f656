//! Account-level risk gate: loss limits, loss streaks, cooldowns.
//!
//! The gate owns account equity and the daily/weekly P&L counters. It
//! answers one question for the scan step, "may a new position open now",
//! and never touches positions that are already open.

use crate::config::RiskConfig;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    ConsecutiveLosses,
    WeeklyLoss,
}

/// Why the gate refused a new entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateBlock {
    #[error("cooldown ({reason:?}) active until {until}")]
    Cooldown {
        until: DateTime<Utc>,
        reason: CooldownReason,
    },

    #[error("weekly loss {pnl:.2} reached limit {limit:.2}")]
    WeeklyLoss { pnl: f64, limit: f64 },

    #[error("daily loss {pnl:.2} reached limit {limit:.2}")]
    DailyLoss { pnl: f64, limit: f64 },

    #[error("{count} consecutive losses")]
    ConsecutiveLosses { count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Normal,
    Drawdown,
    HotStreak,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountState::Normal => "normal",
            AccountState::Drawdown => "drawdown",
            AccountState::HotStreak => "hot_streak",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Daily,
    Weekly,
}

/// Summary of a day or week, produced before its counters reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub kind: PeriodKind,
    pub period_start: NaiveDate,
    pub pnl: f64,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub equity: f64,
}

/// P&L tally for one period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodTally {
    pub pnl: f64,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
}

impl PeriodTally {
    fn record(&mut self, pnl: f64) {
        self.pnl += pnl;
        self.trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
        } else if pnl < 0.0 {
            self.losses += 1;
        }
    }

    fn report(&self, kind: PeriodKind, period_start: NaiveDate, equity: f64) -> PeriodReport {
        PeriodReport {
            kind,
            period_start,
            pnl: self.pnl,
            trades: self.trades,
            wins: self.wins,
            losses: self.losses,
            equity,
        }
    }
}

/// Persistable gate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub equity: f64,
    pub initial_equity: f64,
    pub daily: PeriodTally,
    pub weekly: PeriodTally,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_reason: Option<CooldownReason>,
    /// Set once a weekly-loss breach has started its cooldown; cleared by a
    /// new loss or the weekly reset.
    pub weekly_cooldown_spent: bool,
    pub day: Option<NaiveDate>,
    pub week_start: Option<NaiveDate>,
}

impl RiskState {
    pub fn new(equity: f64) -> Self {
        Self {
            equity,
            initial_equity: equity,
            daily: PeriodTally::default(),
            weekly: PeriodTally::default(),
            consecutive_losses: 0,
            cooldown_until: None,
            cooldown_reason: None,
            weekly_cooldown_spent: false,
            day: None,
            week_start: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskGate {
    config: RiskConfig,
    state: RiskState,
}

impl RiskGate {
    pub fn new(config: RiskConfig, initial_equity: f64) -> Self {
        Self::from_state(config, RiskState::new(initial_equity))
    }

    pub fn from_state(config: RiskConfig, state: RiskState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn equity(&self) -> f64 {
        self.state.equity
    }

    pub fn initial_equity(&self) -> f64 {
        self.state.initial_equity
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.state.consecutive_losses
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.state.cooldown_until
    }

    /// May a new position open at `now`?
    ///
    /// Takes `&mut self` because an expired cooldown is cleared here and a
    /// fresh weekly-loss breach starts one.
    pub fn can_trade(&mut self, now: DateTime<Utc>) -> Result<(), GateBlock> {
        if let Some(until) = self.state.cooldown_until {
            if now < until {
                return Err(GateBlock::Cooldown {
                    until,
                    reason: self
                        .state
                        .cooldown_reason
                        .unwrap_or(CooldownReason::ConsecutiveLosses),
                });
            }
            info!(%until, "cooldown expired, loss streak reset");
            self.state.cooldown_until = None;
            self.state.cooldown_reason = None;
            self.state.consecutive_losses = 0;
        }

        let equity = self.state.equity.max(0.0);

        let weekly_limit = self.config.max_weekly_loss * equity;
        if self.state.weekly.pnl < 0.0 && -self.state.weekly.pnl >= weekly_limit {
            if !self.state.weekly_cooldown_spent {
                self.state.weekly_cooldown_spent = true;
                let until = self.start_cooldown(
                    now,
                    self.config.weekly_cooldown_hours,
                    CooldownReason::WeeklyLoss,
                );
                return Err(GateBlock::Cooldown {
                    until,
                    reason: CooldownReason::WeeklyLoss,
                });
            }
        }

        let daily_limit = self.config.max_daily_loss * equity;
        if self.state.daily.pnl < 0.0 && -self.state.daily.pnl >= daily_limit {
            return Err(GateBlock::DailyLoss {
                pnl: self.state.daily.pnl,
                limit: daily_limit,
            });
        }

        if self.state.consecutive_losses >= self.config.max_consecutive_losses {
            // Reached only when state was restored without its cooldown.
            self.start_cooldown(
                now,
                self.config.cooldown_hours,
                CooldownReason::ConsecutiveLosses,
            );
            return Err(GateBlock::ConsecutiveLosses {
                count: self.state.consecutive_losses,
            });
        }
        Ok(())
    }

    /// Book a closed trade's net P&L.
    pub fn record_trade(&mut self, pnl: f64, at: DateTime<Utc>) {
        self.state.equity += pnl;
        self.state.daily.record(pnl);
        self.state.weekly.record(pnl);

        if pnl < 0.0 {
            self.state.consecutive_losses += 1;
            self.state.weekly_cooldown_spent = false;
            warn!(
                pnl,
                streak = self.state.consecutive_losses,
                equity = self.state.equity,
                "loss recorded"
            );
            if self.state.consecutive_losses >= self.config.max_consecutive_losses
                && self.state.cooldown_until.is_none()
            {
                self.start_cooldown(
                    at,
                    self.config.cooldown_hours,
                    CooldownReason::ConsecutiveLosses,
                );
            }
        } else {
            self.state.consecutive_losses = 0;
            info!(pnl, equity = self.state.equity, "profit recorded");
        }
    }

    /// Close out any day or week that ended before `now`.
    ///
    /// Reports come back oldest first: the daily report, then the weekly one
    /// when the day change also crossed into a new ISO week.
    pub fn roll_periods(&mut self, now: DateTime<Utc>) -> Vec<PeriodReport> {
        let today = now.date_naive();
        let this_week = week_start(today);
        let mut reports = Vec::new();

        match self.state.day {
            Some(day) if today > day => {
                reports.push(self.state.daily.report(PeriodKind::Daily, day, self.state.equity));
                info!(%day, pnl = self.state.daily.pnl, trades = self.state.daily.trades, "daily reset");
                self.state.daily = PeriodTally::default();
                self.state.day = Some(today);
            }
            Some(_) => {}
            None => self.state.day = Some(today),
        }

        match self.state.week_start {
            Some(start) if this_week > start => {
                reports.push(self.state.weekly.report(PeriodKind::Weekly, start, self.state.equity));
                info!(week = %start, pnl = self.state.weekly.pnl, "weekly reset");
                self.state.weekly = PeriodTally::default();
                self.state.week_start = Some(this_week);
                self.state.weekly_cooldown_spent = false;
            }
            Some(_) => {}
            None => self.state.week_start = Some(this_week),
        }
        reports
    }

    /// Drawdown when today's net loss exceeds `drawdown_state_fraction` of
    /// equity, hot streak when today's gain exceeds `hot_streak_fraction`.
    pub fn account_state(&self) -> AccountState {
        let equity = self.state.equity;
        if equity <= 0.0 {
            return AccountState::Drawdown;
        }
        let ratio = self.state.daily.pnl / equity;
        if ratio < -self.config.drawdown_state_fraction {
            AccountState::Drawdown
        } else if ratio > self.config.hot_streak_fraction {
            AccountState::HotStreak
        } else {
            AccountState::Normal
        }
    }

    fn start_cooldown(
        &mut self,
        now: DateTime<Utc>,
        hours: f64,
        reason: CooldownReason,
    ) -> DateTime<Utc> {
        let until = now + Duration::seconds((hours * 3600.0).round() as i64);
        self.state.cooldown_until = Some(until);
        self.state.cooldown_reason = Some(reason);
        warn!(?reason, %until, "cooldown started");
        until
    }
}

/// Monday of the ISO week containing `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}
