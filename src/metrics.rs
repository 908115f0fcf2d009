//! Performance metrics for portfolio simulations.
//!
//! This module provides tools to calculate:
//! - Total return
//! - Max drawdown of the asset value curve
//! - Profit factor
//! - Sharpe ratio
//! - Win rate
//!
//! It needs to enable `metrics` feature to use it.

use std::fmt;

use crate::PercentCalculus;
use crate::engine::SimulationReport;
use crate::tradelog::TradeLog;

/// A collection of performance metrics computed from a simulation run.
///
/// Curve metrics read the per-bar asset value of the ledger; trade metrics read the
/// round trips of the trade log.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Metrics {
    initial_balance: f64,
    equity: Vec<f64>,
    trade_pnls: Vec<f64>,
    fees: f64,
}

impl From<(&SimulationReport, &TradeLog)> for Metrics {
    fn from((report, log): (&SimulationReport, &TradeLog)) -> Self {
        Self {
            initial_balance: report.initial_cash,
            equity: report.ledger.iter().map(|r| r.row.asset_value).collect(),
            trade_pnls: log.trades().iter().map(|t| t.pnl).collect(),
            fees: report.total_fees(),
        }
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance from an asset value curve, trade results and fees paid.
    pub fn new(equity: Vec<f64>, trade_pnls: Vec<f64>, initial_balance: f64, fees: f64) -> Self {
        Self {
            initial_balance,
            equity,
            trade_pnls,
            fees,
        }
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Returns the last asset value, or the initial balance for an empty curve.
    pub fn final_balance(&self) -> f64 {
        self.equity.last().copied().unwrap_or(self.initial_balance)
    }

    pub fn fees(&self) -> f64 {
        self.fees
    }

    pub fn trades(&self) -> usize {
        self.trade_pnls.len()
    }

    /// Change from the initial balance to the final asset value, in percent.
    pub fn total_return(&self) -> f64 {
        self.initial_balance.change(self.final_balance())
    }

    /// Deepest fall of the asset value below its running peak, in percent.
    pub fn max_drawdown(&self) -> f64 {
        let (_, deepest) = self
            .equity
            .iter()
            .fold((self.initial_balance, 0.0_f64), |(peak, deepest), &value| {
                let peak = peak.max(value);
                (peak, deepest.max((peak - value) / peak))
            });
        deepest * 100.0
    }

    /// Computes the profit factor: gross gains over gross losses.
    pub fn profit_factor(&self) -> f64 {
        let gains: f64 = self.trade_pnls.iter().filter(|p| **p > 0.0).sum();
        let losses: f64 = self.trade_pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();

        if losses == 0.0 {
            return f64::INFINITY;
        }

        gains / losses
    }

    /// Sharpe ratio of per-bar asset value returns.
    ///
    /// `risk_free_rate` is the per-bar risk-free return (e.g., 0.0 for simplicity).
    /// Returns NaN for a curve shorter than two bars or without variance.
    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> f64 {
        let returns: Vec<f64> = self.equity.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let n = returns.len() as f64;
        if returns.is_empty() {
            return f64::NAN;
        }

        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
        if variance == 0.0 {
            return f64::NAN;
        }
        (mean - risk_free_rate) / variance.sqrt()
    }

    /// Computes the win rate as a percentage of winning trades.
    pub fn win_rate(&self) -> f64 {
        if self.trade_pnls.is_empty() {
            return 0.0;
        }
        let wins = self.trade_pnls.iter().filter(|p| **p > 0.0).count();
        (self.trade_pnls.len() as f64).share(wins as f64)
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Simulation Metrics ===")?;
        writeln!(f, "{:<20}{:>12.2}", "Initial cash", self.initial_balance)?;
        writeln!(f, "{:<20}{:>12.2}", "Final asset value", self.final_balance())?;
        writeln!(f, "{:<20}{:>11.2}%", "Total return", self.total_return())?;
        writeln!(f, "{:<20}{:>12.2}", "Fees", self.fees)?;
        writeln!(f, "{:<20}{:>12}", "Trades", self.trades())?;
        writeln!(f, "{:<20}{:>11.2}%", "Max drawdown", self.max_drawdown())?;
        writeln!(f, "{:<20}{:>12.2}", "Profit factor", self.profit_factor())?;
        writeln!(f, "{:<20}{:>12.2}", "Sharpe ratio", self.sharpe_ratio(0.0))?;
        write!(f, "{:<20}{:>11.2}%", "Win rate", self.win_rate())
    }
}

#[cfg(test)]
#[test]
fn max_drawdown() {
    let metrics = Metrics::new(vec![10000.0, 12000.0, 9000.0, 11000.0], vec![], 10000.0, 0.0);
    // peak 12000, trough 9000
    assert_eq!(metrics.max_drawdown(), 25.0);
}

#[cfg(test)]
#[test]
fn max_drawdown_flat_curve() {
    let metrics = Metrics::new(vec![], vec![], 10000.0, 0.0);
    assert_eq!(metrics.max_drawdown(), 0.0);
    assert_eq!(metrics.final_balance(), 10000.0);
}

#[cfg(test)]
#[test]
fn total_return() {
    let metrics = Metrics::new(vec![10000.0, 11000.0], vec![], 10000.0, 0.0);
    assert!((metrics.total_return() - 10.0).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn profit_factor() {
    let metrics = Metrics::new(vec![], vec![20.0, -10.0], 10000.0, 0.0);
    assert_eq!(metrics.profit_factor(), 2.0);
}

#[cfg(test)]
#[test]
fn profit_factor_without_losses() {
    let metrics = Metrics::new(vec![], vec![20.0], 10000.0, 0.0);
    assert_eq!(metrics.profit_factor(), f64::INFINITY);
}

#[cfg(test)]
#[test]
fn sharpe_ratio() {
    let metrics = Metrics::new(vec![10000.0, 10500.0, 10300.0, 10700.0], vec![], 10000.0, 0.0);
    let ratio = metrics.sharpe_ratio(0.0);
    assert!(ratio > 0.0 && ratio < 1.0, "{ratio}");
}

#[cfg(test)]
#[test]
fn sharpe_ratio_short_curve() {
    let metrics = Metrics::new(vec![10000.0], vec![], 10000.0, 0.0);
    assert!(metrics.sharpe_ratio(0.0).is_nan());
}

#[cfg(test)]
#[test]
fn win_rate() {
    let metrics = Metrics::new(vec![], vec![20.0, -10.0], 10000.0, 0.0);
    assert_eq!(metrics.win_rate(), 50.0);
    assert_eq!(Metrics::new(vec![], vec![], 10000.0, 0.0).win_rate(), 0.0);
}
