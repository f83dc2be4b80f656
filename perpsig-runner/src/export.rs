//! Result export: JSON report, trade tape CSV, equity curve CSV.
//!
//! A backtest writes `results.json`, `trades.csv` and `equity.csv` into
//! `<results_dir>/<run_id>/`. Persisted JSON carries a `schema_version`;
//! newer versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use perpsig_core::domain::Trade;
use perpsig_core::engine::EquityPoint;

use crate::runner::{BacktestReport, SCHEMA_VERSION};
use crate::walk_forward::WalkForwardResult;

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(report: &BacktestReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize backtest report to JSON")
}

/// Deserialize a report, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestReport> {
    let report: BacktestReport =
        serde_json::from_str(json).context("failed to deserialize backtest report from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Columns: id, symbol, direction, entry_time, entry_price, exit_time,
/// exit_price, exit_reason, contracts, leverage, pnl, pnl_percent, fees,
/// closed_percent, regime, score, duration_hours, entry_reason
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "symbol",
        "direction",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "exit_reason",
        "contracts",
        "leverage",
        "pnl",
        "pnl_percent",
        "fees",
        "closed_percent",
        "regime",
        "score",
        "duration_hours",
        "entry_reason",
    ])?;

    for t in trades {
        wtr.write_record([
            t.id.as_str(),
            &t.symbol,
            t.direction.as_str(),
            &t.entry_time.to_rfc3339(),
            &format!("{:.6}", t.entry_price),
            &t.exit_time.to_rfc3339(),
            &format!("{:.6}", t.exit_price),
            t.exit_reason.as_str(),
            &format!("{:.6}", t.contracts),
            &format!("{:.1}", t.leverage),
            &format!("{:.2}", t.pnl),
            &format!("{:.2}", t.pnl_percent),
            &format!("{:.4}", t.fees),
            &format!("{:.1}", t.closed_percent()),
            &t.regime.to_string(),
            &t.score.to_string(),
            &format!("{:.2}", t.duration_hours),
            &t.entry_reason,
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_equity_csv(curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity", "open_positions"])?;
    for p in curve {
        wtr.write_record([
            &p.timestamp.to_rfc3339(),
            &format!("{:.2}", p.equity),
            &p.open_positions.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write the artifact set for one run and return its directory.
pub fn save_artifacts(report: &BacktestReport, results_dir: &Path) -> Result<PathBuf> {
    let run_dir = results_dir.join(&report.run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    write(&run_dir.join("results.json"), &export_json(report)?)?;
    write(&run_dir.join("trades.csv"), &export_trades_csv(&report.run.trades)?)?;
    write(&run_dir.join("equity.csv"), &export_equity_csv(&report.run.equity_curve)?)?;
    Ok(run_dir)
}

pub fn load_artifacts(dir: &Path) -> Result<BacktestReport> {
    let path = dir.join("results.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

/// Write `walk_forward.json` under `<results_dir>/<run_id>/`.
pub fn save_walk_forward(
    result: &WalkForwardResult,
    run_id: &str,
    results_dir: &Path,
) -> Result<PathBuf> {
    let run_dir = results_dir.join(run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;
    let path = run_dir.join("walk_forward.json");
    let json = serde_json::to_string_pretty(result)
        .context("failed to serialize walk-forward result")?;
    write(&path, &json)?;
    Ok(path)
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

// ─── Summary ────────────────────────────────────────────────────────

/// Plain-text summary for the terminal.
pub fn summary_text(report: &BacktestReport) -> String {
    let m = &report.metrics;
    let mut out = String::with_capacity(1024);
    out.push_str(&format!(
        "run {}{}\n",
        &report.run_id[..report.run_id.len().min(12)],
        if report.has_synthetic { " (SYNTHETIC DATA)" } else { "" }
    ));
    out.push_str(&format!(
        "period      {} .. {} ({} steps)\n",
        report.run.start.format("%Y-%m-%d %H:%M"),
        report.run.end.format("%Y-%m-%d %H:%M"),
        report.run.steps
    ));
    out.push_str(&format!(
        "equity      ${:.2} -> ${:.2} ({:+.2}%)\n",
        m.initial_equity, m.final_equity, m.total_return_pct
    ));
    out.push_str(&format!(
        "trades      {} ({} won, {} lost, win rate {:.1}%)\n",
        m.total_trades, m.wins, m.losses, m.win_rate
    ));
    out.push_str(&format!(
        "pnl         total ${:.2}, gross +${:.2} / -${:.2}, fees ${:.2}\n",
        m.total_pnl, m.gross_profit, m.gross_loss, m.total_fees
    ));
    out.push_str(&format!(
        "quality     PF {:.2}, expectancy ${:.2}, sharpe {:.2}\n",
        m.profit_factor, m.expectancy, m.sharpe
    ));
    out.push_str(&format!(
        "risk        max drawdown {:.2}%, longest losing streak {}\n",
        m.max_drawdown_pct, m.longest_losing_streak
    ));
    for (title, table) in [
        ("regime", &m.by_regime),
        ("symbol", &m.by_symbol),
        ("exit", &m.by_exit_reason),
    ] {
        for (key, b) in table {
            out.push_str(&format!(
                "{title:<11} {key:<20} {:>4} trades, {:>3} won, pnl ${:.2}\n",
                b.count, b.wins, b.pnl
            ));
        }
    }
    out
}
