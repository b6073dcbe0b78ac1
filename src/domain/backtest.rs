//! Deterministic historical replay over the per-bar pipeline.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::candle::{SymbolSeries, Timeframe};
use super::error::BarwardenError;
use super::metrics::{EquityPoint, Metrics};
use super::pipeline::{BarInput, Engine, EngineConfig};
use super::position::{ClosedTrade, TradeEvent};
use super::state::RunState;
use crate::ports::state_port::StatePort;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_equity: f64,
    pub engine: EngineConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_equity: 10_000.0,
            engine: EngineConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), BarwardenError> {
        if !(self.initial_equity > 0.0 && self.initial_equity.is_finite()) {
            return Err(BarwardenError::config_invalid(
                "backtest",
                "initial_equity",
                "initial_equity must be a positive number",
            ));
        }
        self.engine.validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub trade_log: Vec<TradeEvent>,
    pub closed_trades: Vec<ClosedTrade>,
    pub final_state: RunState,
    pub pnl_by_symbol: BTreeMap<String, f64>,
    pub metrics: Metrics,
}

pub struct BacktestRunner<'a> {
    config: BacktestConfig,
    store: Option<&'a mut dyn StatePort>,
}

impl<'a> BacktestRunner<'a> {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Snapshot the run state through `store` after every bar.
    pub fn with_store(mut self, store: &'a mut dyn StatePort) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run(
        &mut self,
        series: &[&SymbolSeries],
        timeframe: Timeframe,
    ) -> Result<BacktestResult, BarwardenError> {
        let timeline: BTreeSet<DateTime<Utc>> = series
            .iter()
            .flat_map(|s| s.candles.iter().map(|c| c.timestamp))
            .collect();

        let mut state = RunState::fresh(self.config.initial_equity);
        state.meta.runs = 1;
        state.meta.symbols = series.iter().map(|s| s.symbol.clone()).collect();
        state.meta.timeframe = Some(timeframe.to_string());
        state.meta.last_run_at = timeline.last().copied();

        tracing::info!(
            symbols = series.len(),
            bars = timeline.len(),
            %timeframe,
            initial_equity = self.config.initial_equity,
            "starting backtest"
        );

        let engine = Engine::new(self.config.engine.clone());
        let mut equity_curve = Vec::with_capacity(timeline.len());
        let mut trade_log = Vec::new();
        let mut closed_trades = Vec::new();
        let mut pnl_by_symbol: BTreeMap<String, f64> =
            series.iter().map(|s| (s.symbol.clone(), 0.0)).collect();

        for &at in &timeline {
            let bars: Vec<BarInput<'_>> = series
                .iter()
                .map(|s| BarInput {
                    symbol: &s.symbol,
                    window: s.window_until(at),
                })
                .collect();
            let outcome = engine.step(&mut state, at, &bars)?;

            for trade in &outcome.closed {
                *pnl_by_symbol.entry(trade.symbol.clone()).or_insert(0.0) += trade.pnl;
            }
            equity_curve.push(outcome.equity_point);
            trade_log.extend(outcome.events);
            closed_trades.extend(outcome.closed);

            if let Some(store) = self.store.as_deref_mut() {
                store.snapshot(&state)?;
            }
        }

        let metrics = Metrics::compute(
            self.config.initial_equity,
            &equity_curve,
            &closed_trades,
            timeframe.periods_per_year(),
        );
        tracing::info!(
            trades = metrics.trades,
            net_pnl = metrics.net_pnl,
            max_drawdown = metrics.max_drawdown,
            halt = ?state.risk.halt_reason,
            "backtest finished"
        );

        Ok(BacktestResult {
            equity_curve,
            trade_log,
            closed_trades,
            final_state: state,
            pnl_by_symbol,
            metrics,
        })
    }
}
