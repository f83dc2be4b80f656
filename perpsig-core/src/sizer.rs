//! Position sizer: fixed fraction of equity at risk per trade.
//!
//! notional = equity × risk_per_trade / stop_distance_fraction. Leverage
//! comes from stop tightness, is capped at `max_leverage`, and is raised
//! when the margin for a single position would exceed `max_margin_fraction`
//! of equity. When free margin is short the position shrinks to fit and
//! the allocation is flagged `margin_limited`.

use crate::config::RiskConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub contracts: f64,
    pub notional: f64,
    pub margin_used: f64,
    pub leverage: f64,
    /// Dollars lost if the stop fills at its level (before fees).
    pub risk_usd: f64,
    /// Set when free margin, not the risk budget, bounded the size.
    pub margin_limited: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingRejection {
    #[error("invalid sizing input: equity={equity}, entry={entry}")]
    InvalidInput { equity: f64, entry: f64 },

    #[error("stop distance is zero (entry {entry}, stop {stop})")]
    ZeroStopDistance { entry: f64, stop: f64 },

    #[error("no free margin (available {available})")]
    NoMargin { available: f64 },

    #[error("{contracts} contracts below exchange minimum {min}")]
    BelowMinContracts { contracts: f64, min: f64 },

    #[error("notional {notional:.2} below exchange minimum {min}")]
    BelowMinNotional { notional: f64, min: f64 },
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: RiskConfig,
}

impl PositionSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn size(
        &self,
        equity: f64,
        entry_price: f64,
        stop_price: f64,
        available_margin: f64,
    ) -> Result<Allocation, SizingRejection> {
        self.size_scaled(equity, entry_price, stop_price, available_margin, 1.0)
    }

    /// Like [`size`](Self::size) with the risk budget scaled by `multiplier`
    /// (market-wide risk-off adjustments).
    pub fn size_scaled(
        &self,
        equity: f64,
        entry_price: f64,
        stop_price: f64,
        available_margin: f64,
        multiplier: f64,
    ) -> Result<Allocation, SizingRejection> {
        let cfg = &self.config;
        if !(equity.is_finite() && entry_price.is_finite()) || equity <= 0.0 || entry_price <= 0.0 {
            return Err(SizingRejection::InvalidInput {
                equity,
                entry: entry_price,
            });
        }
        let stop_distance = (entry_price - stop_price).abs();
        let stop_fraction = stop_distance / entry_price;
        if !stop_fraction.is_finite() || stop_fraction <= 0.0 {
            return Err(SizingRejection::ZeroStopDistance {
                entry: entry_price,
                stop: stop_price,
            });
        }
        if available_margin.is_nan() || available_margin <= 0.0 {
            return Err(SizingRejection::NoMargin {
                available: available_margin,
            });
        }

        let risk_budget = equity * cfg.risk_per_trade * multiplier.clamp(0.0, 1.0);
        let mut notional = risk_budget / stop_fraction;
        let mut leverage = self.leverage_for(stop_fraction);
        let mut margin_limited = false;

        // ── Per-position margin cap: raise leverage first ──
        let margin_cap = equity * cfg.max_margin_fraction;
        if notional / leverage > margin_cap {
            leverage = (notional / margin_cap).min(cfg.max_leverage);
            if notional / leverage > margin_cap {
                notional = margin_cap * leverage;
                margin_limited = true;
            }
        }

        // ── Free margin across open positions ──
        if notional / leverage > available_margin {
            notional = available_margin * leverage;
            margin_limited = true;
        }

        let contracts = notional / entry_price;
        if contracts < cfg.min_contracts {
            return Err(SizingRejection::BelowMinContracts {
                contracts,
                min: cfg.min_contracts,
            });
        }
        if notional < cfg.min_notional {
            return Err(SizingRejection::BelowMinNotional {
                notional,
                min: cfg.min_notional,
            });
        }

        let allocation = Allocation {
            contracts,
            notional,
            margin_used: notional / leverage,
            leverage,
            risk_usd: contracts * stop_distance,
            margin_limited,
        };
        debug!(
            contracts,
            leverage,
            margin = allocation.margin_used,
            risk_usd = allocation.risk_usd,
            margin_limited,
            "sized position"
        );
        Ok(allocation)
    }

    /// Tier leverage for a stop distance fraction, capped at `max_leverage`.
    pub fn leverage_for(&self, stop_fraction: f64) -> f64 {
        let cfg = &self.config;
        cfg.leverage_tiers
            .iter()
            .find(|tier| stop_fraction <= tier.max_stop_fraction)
            .map(|tier| tier.leverage)
            .unwrap_or(cfg.fallback_leverage)
            .min(cfg.max_leverage)
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}
