//! Execution costs: percentage slippage and maker/taker fees.
//!
//! Slippage always works against the position. Entries pay more on longs
//! and receive less on shorts; exits the reverse. Stop fills use the wider
//! stop slippage.

use crate::config::ExecutionConfig;
use crate::domain::Direction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Costs {
    /// Market-order slippage as a fraction (0.0005 = 0.05%).
    pub slippage: f64,
    pub stop_slippage: f64,
    pub taker_fee: f64,
    pub maker_fee: f64,
    /// When false, take-profits fill as resting limit orders: no slippage, maker fee.
    pub use_market_orders: bool,
}

impl Costs {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            slippage: cfg.slippage_percent / 100.0,
            stop_slippage: cfg.stop_slippage_percent / 100.0,
            taker_fee: cfg.taker_fee_percent / 100.0,
            maker_fee: cfg.maker_fee_percent / 100.0,
            use_market_orders: cfg.use_market_orders,
        }
    }

    pub fn frictionless() -> Self {
        Self {
            slippage: 0.0,
            stop_slippage: 0.0,
            taker_fee: 0.0,
            maker_fee: 0.0,
            use_market_orders: true,
        }
    }

    /// Market entry fill price.
    pub fn entry_price(&self, direction: Direction, raw: f64) -> f64 {
        raw * (1.0 + direction.sign() * self.slippage)
    }

    /// Market exit fill price.
    pub fn exit_price(&self, direction: Direction, raw: f64) -> f64 {
        raw * (1.0 - direction.sign() * self.slippage)
    }

    /// Stop-loss fill price at `stop`.
    pub fn stop_price(&self, direction: Direction, stop: f64) -> f64 {
        stop * (1.0 - direction.sign() * self.stop_slippage)
    }

    /// Take-profit fill price at `target`.
    pub fn take_profit_price(&self, direction: Direction, target: f64) -> f64 {
        if self.use_market_orders {
            self.exit_price(direction, target)
        } else {
            target
        }
    }

    pub fn taker_fee(&self, price: f64, contracts: f64) -> f64 {
        price * contracts * self.taker_fee
    }

    /// Fee on a take-profit fill: maker when resting limits are in use.
    pub fn take_profit_fee(&self, price: f64, contracts: f64) -> f64 {
        let rate = if self.use_market_orders {
            self.taker_fee
        } else {
            self.maker_fee
        };
        price * contracts * rate
    }
}

impl Default for Costs {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::assert_approx;

    #[test]
    fn frictionless_is_identity() {
        let c = Costs::frictionless();
        assert_eq!(c.entry_price(Direction::Long, 100.0), 100.0);
        assert_eq!(c.stop_price(Direction::Short, 100.0), 100.0);
        assert_eq!(c.taker_fee(100.0, 10.0), 0.0);
    }

    #[test]
    fn slippage_is_adverse() {
        let c = Costs::default();
        assert_approx(c.entry_price(Direction::Long, 100.0), 100.05, 1e-9);
        assert_approx(c.entry_price(Direction::Short, 100.0), 99.95, 1e-9);
        assert_approx(c.exit_price(Direction::Long, 103.0), 103.0 * 0.9995, 1e-9);
        assert_approx(c.stop_price(Direction::Long, 99.0), 98.901, 1e-9);
        assert_approx(c.stop_price(Direction::Short, 102.0), 102.102, 1e-9);
    }

    #[test]
    fn fees_by_order_type() {
        let c = Costs::default();
        assert_approx(c.taker_fee(100.0, 10.0), 0.55, 1e-9);
        let limits = Costs {
            use_market_orders: false,
            ..c
        };
        assert_eq!(limits.take_profit_price(Direction::Long, 103.0), 103.0);
        assert_approx(limits.take_profit_fee(100.0, 10.0), 0.45, 1e-9);
    }
}
