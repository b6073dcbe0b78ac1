//! Per-bar decision pipeline shared by the backtest and live runners.
//!
//! One call to [`Engine::step`] processes a single timestamp across every
//! symbol that has a candle there:
//!
//! 1. day rollover in the risk manager
//! 2. signals and recent returns per symbol, in parallel
//! 3. correlation weights over the eligible symbols (barrier)
//! 4. exits, with realized PnL fed back into risk
//! 5. equity mark and drawdown check
//! 6. entries, gated by the risk manager
//! 7. bookkeeping: last-processed timestamps and an equity point
//!
//! The step works on a copy of the [`RunState`] and only commits it when every
//! stage succeeded.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;

use super::candle::Candle;
use super::error::BarwardenError;
use super::metrics::EquityPoint;
use super::position::{ClosedTrade, TradeAction, TradeEvent};
use super::risk::{RiskConfig, RiskManager};
use super::signal::{Signal, SignalKind, SmaWindows, compute_signal};
use super::state::RunState;
use super::tracker::{ExitLevels, PositionTracker};
use super::weights::returns_from_closes;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub windows: SmaWindows,
    pub levels: ExitLevels,
    pub risk: RiskConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), BarwardenError> {
        self.levels.validate()?;
        self.risk.validate()
    }
}

/// Candle history for one symbol, oldest first, ending at the bar being processed.
#[derive(Debug, Clone, Copy)]
pub struct BarInput<'a> {
    pub symbol: &'a str,
    pub window: &'a [Candle],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarOutcome {
    pub timestamp: DateTime<Utc>,
    pub signals: BTreeMap<String, Signal>,
    pub weights: BTreeMap<String, f64>,
    pub events: Vec<TradeEvent>,
    pub closed: Vec<ClosedTrade>,
    pub suppressed_entries: Vec<String>,
    pub equity_point: EquityPoint,
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn step(
        &self,
        state: &mut RunState,
        at: DateTime<Utc>,
        bars: &[BarInput<'_>],
    ) -> Result<BarOutcome, BarwardenError> {
        let eligible: Vec<&BarInput<'_>> = bars
            .iter()
            .filter(|b| b.window.last().is_some_and(|c| c.timestamp == at))
            .collect();

        let mut risk = RiskManager::new(self.config.risk.clone(), state.risk.clone());
        let mut tracker =
            PositionTracker::new(self.config.levels, state.cash, state.positions.clone());
        let mut marks = state.last_close.clone();

        risk.begin_bar(at.date_naive());

        let windows = self.config.windows;
        let lookback = self.config.risk.correlation_lookback;
        let positions = &state.positions;
        let analysed: Vec<(String, Signal, Vec<f64>)> = eligible
            .par_iter()
            .map(|bar| {
                let signal = compute_signal(
                    bar.symbol,
                    bar.window,
                    windows,
                    positions.get(bar.symbol),
                );
                let closes: Vec<f64> = bar.window.iter().map(|c| c.close).collect();
                (
                    bar.symbol.to_string(),
                    signal,
                    returns_from_closes(&closes, lookback),
                )
            })
            .collect();

        let mut signals = BTreeMap::new();
        let mut returns = BTreeMap::new();
        for (symbol, signal, rets) in analysed {
            marks.insert(symbol.clone(), signal.price);
            returns.insert(symbol.clone(), rets);
            signals.insert(symbol, signal);
        }
        let weights = risk.compute_correlation_weights(&returns);

        let mut events = Vec::new();
        let mut closed = Vec::new();
        for signal in signals.values().filter(|s| s.kind == SignalKind::ExitLong) {
            if let Some(trade) = tracker.close_position(&signal.symbol, signal.price, at) {
                tracing::info!(
                    symbol = %trade.symbol,
                    exit = trade.exit_price,
                    size = trade.size,
                    pnl = trade.pnl,
                    "closed position"
                );
                risk.record_realized_pnl(trade.pnl);
                events.push(TradeEvent {
                    timestamp: at,
                    symbol: trade.symbol.clone(),
                    action: TradeAction::Close,
                    price: trade.exit_price,
                    size: trade.size,
                    realized_pnl: Some(trade.pnl),
                });
                closed.push(trade);
            }
        }

        let equity = tracker.equity(&marks);
        risk.mark_equity(equity);

        let mut suppressed_entries = Vec::new();
        for signal in signals.values().filter(|s| s.kind == SignalKind::EnterLong) {
            if !risk.allows_entry() {
                tracing::info!(
                    symbol = %signal.symbol,
                    reason = ?risk.state().halt_reason,
                    "entry suppressed by risk halt"
                );
                suppressed_entries.push(signal.symbol.clone());
                continue;
            }
            let weight = weights.get(&signal.symbol).copied().unwrap_or(0.0);
            match tracker.open_position(signal, weight, equity) {
                Ok(pos) => {
                    tracing::info!(
                        symbol = %pos.symbol,
                        entry = pos.entry_price,
                        size = pos.size,
                        weight,
                        stop_loss = pos.stop_loss,
                        take_profit = pos.take_profit,
                        "opened position"
                    );
                    events.push(TradeEvent {
                        timestamp: at,
                        symbol: pos.symbol.clone(),
                        action: TradeAction::Open,
                        price: pos.entry_price,
                        size: pos.size,
                        realized_pnl: None,
                    });
                }
                Err(BarwardenError::InsufficientCapital { symbol, notional }) => {
                    tracing::warn!(%symbol, notional, "entry skipped, no capital available");
                    suppressed_entries.push(symbol);
                }
                Err(e) => return Err(e),
            }
        }

        let equity_point = EquityPoint {
            timestamp: at,
            equity: tracker.equity(&marks),
            open_positions: tracker.positions().len(),
        };

        let mut next = state.clone();
        for symbol in signals.keys() {
            next.last_processed.insert(symbol.clone(), at);
        }
        next.risk = risk.into_state();
        (next.cash, next.positions) = tracker.into_parts();
        next.last_close = marks;

        *state = next;
        Ok(BarOutcome {
            timestamp: at,
            signals,
            weights,
            events,
            closed,
            suppressed_entries,
            equity_point,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Timeframe;
    use crate::domain::position::Position;
    use crate::domain::risk::HaltReason;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn series(symbol: &str, closes: &[f64]) -> Vec<Candle> {
        let tf: Timeframe = "1h".parse().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: symbol.into(),
                timeframe: tf,
                timestamp: start + Duration::hours(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            windows: SmaWindows::new(2, 3).unwrap(),
            ..EngineConfig::default()
        })
    }

    #[test]
    fn enters_on_crossover_with_full_weight() {
        let candles = series("BTC/USD", &[10.0, 10.0, 10.0, 12.0]);
        let mut state = RunState::fresh(10_000.0);
        let engine = engine();
        let at = candles[3].timestamp;
        let out = engine
            .step(
                &mut state,
                at,
                &[BarInput {
                    symbol: "BTC/USD",
                    window: &candles,
                }],
            )
            .unwrap();

        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].action, TradeAction::Open);
        assert_relative_eq!(out.weights["BTC/USD"], 1.0);
        let pos = &state.positions["BTC/USD"];
        assert_relative_eq!(pos.size, 10_000.0 / 12.0);
        assert_relative_eq!(state.cash, 0.0);
        assert_eq!(state.last_processed("BTC/USD"), Some(at));
        assert_relative_eq!(out.equity_point.equity, 10_000.0);
        assert_relative_eq!(state.last_close["BTC/USD"], 12.0);
    }

    #[test]
    fn symbols_without_a_bar_are_not_eligible() {
        let btc = series("BTC/USD", &[10.0, 10.0, 10.0, 12.0]);
        let eth = series("ETH/USD", &[5.0, 5.0, 5.0]);
        let mut state = RunState::fresh(10_000.0);
        let out = engine()
            .step(
                &mut state,
                btc[3].timestamp,
                &[
                    BarInput {
                        symbol: "BTC/USD",
                        window: &btc,
                    },
                    BarInput {
                        symbol: "ETH/USD",
                        window: &eth,
                    },
                ],
            )
            .unwrap();
        assert!(!out.signals.contains_key("ETH/USD"));
        assert!(state.last_processed("ETH/USD").is_none());
    }

    #[test]
    fn halted_risk_suppresses_entries() {
        let candles = series("BTC/USD", &[10.0, 10.0, 10.0, 12.0]);
        let mut state = RunState::fresh(10_000.0);
        state.risk.halted = true;
        state.risk.halt_reason = HaltReason::Drawdown;
        let out = engine()
            .step(
                &mut state,
                candles[3].timestamp,
                &[BarInput {
                    symbol: "BTC/USD",
                    window: &candles,
                }],
            )
            .unwrap();
        assert!(out.events.is_empty());
        assert_eq!(out.suppressed_entries, vec!["BTC/USD".to_string()]);
        assert!(state.positions.is_empty());
    }

    #[test]
    fn exit_feeds_realized_pnl_into_risk() {
        let candles = series("BTC/USD", &[10.0, 10.0, 10.0, 12.0, 11.0]);
        let mut state = RunState::fresh(10_000.0);
        let engine = engine();
        let bar = |n: usize| BarInput {
            symbol: "BTC/USD",
            window: &candles[..n],
        };
        engine
            .step(&mut state, candles[3].timestamp, &[bar(4)])
            .unwrap();
        let out = engine
            .step(&mut state, candles[4].timestamp, &[bar(5)])
            .unwrap();

        assert_eq!(out.closed.len(), 1);
        let expected = (11.0 - 12.0) * (10_000.0 / 12.0);
        assert_relative_eq!(out.closed[0].pnl, expected);
        assert_relative_eq!(state.risk.daily_pnl, expected);
        assert_relative_eq!(state.cash, 10_000.0 + expected);
        assert!(state.positions.is_empty());
    }

    #[test]
    fn empty_bar_still_records_equity() {
        let mut state = RunState::fresh(500.0);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let out = engine().step(&mut state, at, &[]).unwrap();
        assert!(out.signals.is_empty());
        assert_relative_eq!(out.equity_point.equity, 500.0);
        assert_eq!(state.risk.daily_anchor_date, Some(at.date_naive()));
    }

    #[test]
    fn position_without_a_bar_is_marked_at_its_last_close() {
        let eth = series("ETH/USD", &[5.0, 5.0, 5.0]);
        let mut state = RunState::fresh(10_000.0);
        state.positions.insert(
            "BTC/USD".into(),
            Position {
                symbol: "BTC/USD".into(),
                entry_price: 100.0,
                size: 10.0,
                stop_loss: 98.0,
                take_profit: 104.0,
                opened_at: eth[0].timestamp,
            },
        );
        state.cash = 9_000.0;
        state.last_close.insert("BTC/USD".into(), 80.0);

        let out = engine()
            .step(
                &mut state,
                eth[2].timestamp,
                &[BarInput {
                    symbol: "ETH/USD",
                    window: &eth,
                }],
            )
            .unwrap();

        assert_relative_eq!(out.equity_point.equity, 9_800.0);
        assert_relative_eq!(state.risk.equity, 9_800.0);
        assert_relative_eq!(state.last_close["BTC/USD"], 80.0);
        assert_relative_eq!(state.last_close["ETH/USD"], 5.0);
    }
}
