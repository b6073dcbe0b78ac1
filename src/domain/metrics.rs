//! Backtest summary statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::position::ClosedTrade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub open_positions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    /// Gross profit over gross loss; 0 when there are no losing trades.
    pub profit_factor: f64,
    pub net_pnl: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Fraction of bars with at least one open position.
    pub exposure: f64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Metrics {
    pub fn compute(
        initial_equity: f64,
        equity_curve: &[EquityPoint],
        trades: &[ClosedTrade],
        periods_per_year: f64,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_equity);
        let net_pnl = final_equity - initial_equity;
        let total_return = if initial_equity > 0.0 {
            net_pnl / initial_equity
        } else {
            0.0
        };

        let periods = equity_curve.len().max(1) as f64;
        let years = periods / periods_per_year;
        let growth = 1.0 + total_return;
        let cagr = if years > 0.0 && growth > 0.0 && growth.is_finite() {
            growth.powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        for trade in trades {
            if trade.pnl > 0.0 {
                trades_won += 1;
                gross_profit += trade.pnl;
            } else if trade.pnl < 0.0 {
                trades_lost += 1;
                gross_loss += trade.pnl.abs();
            }
        }
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            trades_won as f64 / trades.len() as f64
        };
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        };

        let exposure = if equity_curve.is_empty() {
            0.0
        } else {
            equity_curve.iter().filter(|p| p.open_positions > 0).count() as f64
                / equity_curve.len() as f64
        };

        Metrics {
            trades: trades.len(),
            trades_won,
            trades_lost,
            win_rate,
            profit_factor,
            net_pnl,
            total_return,
            cagr,
            sharpe_ratio: compute_sharpe(initial_equity, equity_curve, periods_per_year),
            max_drawdown: compute_max_drawdown(initial_equity, equity_curve),
            exposure,
            start: equity_curve.first().map(|p| p.timestamp),
            end: equity_curve.last().map(|p| p.timestamp),
        }
    }
}

fn compute_max_drawdown(initial_equity: f64, equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = initial_equity;
    let mut max_dd = 0.0_f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
    }
    max_dd
}

/// Annualized Sharpe of per-bar log returns, risk-free rate zero.
fn compute_sharpe(initial_equity: f64, equity_curve: &[EquityPoint], periods_per_year: f64) -> f64 {
    let mut prev = initial_equity;
    let mut log_returns = Vec::with_capacity(equity_curve.len());
    for point in equity_curve {
        if prev > 0.0 && point.equity > 0.0 {
            log_returns.push((point.equity / prev).ln());
        }
        prev = point.equity;
    }
    if log_returns.len() < 2 {
        return 0.0;
    }

    let n = log_returns.len() as f64;
    let mean = log_returns.iter().sum::<f64>() / n;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();
    if stddev > 1e-12 {
        mean / stddev * periods_per_year.sqrt()
    } else {
        0.0
    }
}
