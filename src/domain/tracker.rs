//! Position tracking: sizing, stop levels, cash and realized PnL.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::error::BarwardenError;
use super::position::{ClosedTrade, Position};
use super::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for ExitLevels {
    fn default() -> Self {
        ExitLevels {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
        }
    }
}

impl ExitLevels {
    pub fn validate(&self) -> Result<(), BarwardenError> {
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err(BarwardenError::config_invalid(
                "strategy",
                "stop_loss_pct",
                "stop_loss_pct must be in (0, 1)",
            ));
        }
        if !(self.take_profit_pct > 0.0) {
            return Err(BarwardenError::config_invalid(
                "strategy",
                "take_profit_pct",
                "take_profit_pct must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionTracker {
    levels: ExitLevels,
    cash: f64,
    positions: BTreeMap<String, Position>,
}

impl PositionTracker {
    pub fn new(levels: ExitLevels, cash: f64, positions: BTreeMap<String, Position>) -> Self {
        Self {
            levels,
            cash,
            positions,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn into_parts(self) -> (f64, BTreeMap<String, Position>) {
        (self.cash, self.positions)
    }

    /// Opens a long at the signal price.
    ///
    /// Notional is `weight * equity`, capped by available cash.
    pub fn open_position(
        &mut self,
        signal: &Signal,
        weight: f64,
        equity: f64,
    ) -> Result<Position, BarwardenError> {
        if self.has_position(&signal.symbol) {
            return Err(BarwardenError::PositionExists {
                symbol: signal.symbol.clone(),
            });
        }
        let notional = (weight * equity).min(self.cash);
        if !(notional > 0.0 && signal.price > 0.0) {
            return Err(BarwardenError::InsufficientCapital {
                symbol: signal.symbol.clone(),
                notional,
            });
        }

        let entry_price = signal.price;
        let position = Position {
            symbol: signal.symbol.clone(),
            entry_price,
            size: notional / entry_price,
            stop_loss: entry_price * (1.0 - self.levels.stop_loss_pct),
            take_profit: entry_price * (1.0 + self.levels.take_profit_pct),
            opened_at: signal.timestamp,
        };
        self.cash -= notional;
        self.positions.insert(position.symbol.clone(), position.clone());
        Ok(position)
    }

    /// Closes the symbol's position; `None` when nothing is open.
    pub fn close_position(
        &mut self,
        symbol: &str,
        exit_price: f64,
        closed_at: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let position = self.positions.remove(symbol)?;
        let pnl = (exit_price - position.entry_price) * position.size;
        self.cash += position.market_value(exit_price);
        Some(ClosedTrade {
            symbol: position.symbol,
            size: position.size,
            entry_price: position.entry_price,
            exit_price,
            opened_at: position.opened_at,
            closed_at,
            pnl,
        })
    }

    /// Cash plus open positions marked at `prices`, or at entry when a price is missing.
    pub fn equity(&self, prices: &BTreeMap<String, f64>) -> f64 {
        let marked: f64 = self
            .positions
            .values()
            .map(|pos| {
                let price = prices.get(&pos.symbol).copied().unwrap_or(pos.entry_price);
                pos.market_value(price)
            })
            .sum();
        self.cash + marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::SignalKind;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, 0, 0).unwrap()
    }

    fn enter(symbol: &str, price: f64) -> Signal {
        Signal {
            symbol: symbol.into(),
            timestamp: at(1),
            kind: SignalKind::EnterLong,
            price,
            sma_fast: Some(price),
            sma_slow: Some(price),
        }
    }

    fn tracker(cash: f64) -> PositionTracker {
        PositionTracker::new(ExitLevels::default(), cash, BTreeMap::new())
    }

    #[test]
    fn open_sizes_by_weight_and_sets_levels() {
        let mut t = tracker(10_000.0);
        let pos = t.open_position(&enter("BTC/USD", 100.0), 0.5, 10_000.0).unwrap();
        assert_relative_eq!(pos.size, 50.0);
        assert_relative_eq!(pos.stop_loss, 98.0);
        assert_relative_eq!(pos.take_profit, 104.0);
        assert_eq!(pos.opened_at, at(1));
        assert_relative_eq!(t.cash(), 5_000.0);
    }

    #[test]
    fn open_is_capped_by_cash() {
        let mut t = tracker(1_000.0);
        let pos = t.open_position(&enter("BTC/USD", 100.0), 1.0, 10_000.0).unwrap();
        assert_relative_eq!(pos.size, 10.0);
        assert_relative_eq!(t.cash(), 0.0);
        let err = t.open_position(&enter("ETH/USD", 10.0), 0.5, 10_000.0);
        assert!(matches!(err, Err(BarwardenError::InsufficientCapital { .. })));
    }

    #[test]
    fn rejects_pyramiding() {
        let mut t = tracker(10_000.0);
        t.open_position(&enter("BTC/USD", 100.0), 0.2, 10_000.0).unwrap();
        let err = t.open_position(&enter("BTC/USD", 101.0), 0.2, 10_000.0);
        assert!(
            matches!(err, Err(BarwardenError::PositionExists { symbol }) if symbol == "BTC/USD")
        );
        assert_eq!(t.positions().len(), 1);
    }

    #[test]
    fn close_realizes_pnl_and_returns_cash() {
        let mut t = tracker(10_000.0);
        t.open_position(&enter("BTC/USD", 100.0), 0.5, 10_000.0).unwrap();
        let trade = t.close_position("BTC/USD", 110.0, at(5)).unwrap();
        assert_relative_eq!(trade.pnl, 500.0);
        assert_relative_eq!(t.cash(), 10_500.0);
        assert!(!t.has_position("BTC/USD"));
        assert!(t.close_position("BTC/USD", 110.0, at(6)).is_none());
    }

    #[test]
    fn equity_marks_open_positions() {
        let mut t = tracker(10_000.0);
        t.open_position(&enter("BTC/USD", 100.0), 0.5, 10_000.0).unwrap();
        let mut prices = BTreeMap::new();
        assert_relative_eq!(t.equity(&prices), 10_000.0);
        prices.insert("BTC/USD".to_string(), 90.0);
        assert_relative_eq!(t.equity(&prices), 9_500.0);
    }
}
