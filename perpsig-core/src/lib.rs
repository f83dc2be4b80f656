//! perpsig core: signal evaluation and position lifecycle for perpetual futures.
//!
//! This crate contains the engine shared by the backtest and the live loop:
//! - Domain types (candles, positions, fills, trades)
//! - Indicator math and market structure/regime classification
//! - Candidate evaluation and score thresholds
//! - Stop/TP placement, risk-based sizing, the risk gate
//! - The position lifecycle: TP ladder, trailing, adaptive protection, near-TP exits
//! - Candle-by-candle replay and the polling loop

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod evaluator;
pub mod indicators;
pub mod levels;
pub mod lifecycle;
pub mod market;
pub mod risk;
pub mod sizer;
pub mod storage;
