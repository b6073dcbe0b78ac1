//! Real-time polling loop over the per-bar pipeline.
//!
//! Each iteration waits for the next timeframe boundary (plus a small offset so
//! the provider has closed the bar), fetches the latest candles, and processes
//! every bar newer than what the run state has already seen. The state is
//! snapshotted after each processed bar, so a crash loses at most the bar in
//! flight and a restart resumes from the last committed one.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::candle::{SymbolSeries, Timeframe};
use super::error::BarwardenError;
use super::gateway::MarketDataGateway;
use super::pipeline::{BarInput, Engine, EngineConfig};
use super::position::TradeEvent;
use super::risk::HaltReason;
use super::shutdown::Shutdown;
use super::state::RunState;
use crate::ports::state_port::StatePort;

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub timeframe: Timeframe,
    pub limit: usize,
    pub max_iterations: u64,
    pub poll_offset: chrono::Duration,
    pub initial_equity: f64,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxIterations,
    Cancelled,
    /// Drawdown halt with no positions left to manage.
    PermanentHalt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSummary {
    pub iterations: u64,
    pub bars_processed: u64,
    pub stop_reason: StopReason,
    pub trade_log: Vec<TradeEvent>,
    pub final_state: RunState,
}

pub struct LiveLoop<'a> {
    gateway: &'a mut MarketDataGateway,
    store: &'a mut dyn StatePort,
    symbols: Vec<String>,
    config: LiveConfig,
    shutdown: Shutdown,
}

impl<'a> LiveLoop<'a> {
    pub fn new(
        gateway: &'a mut MarketDataGateway,
        store: &'a mut dyn StatePort,
        symbols: Vec<String>,
        config: LiveConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            gateway,
            store,
            symbols,
            config,
            shutdown,
        }
    }

    pub fn run(&mut self) -> Result<LiveSummary, BarwardenError> {
        let mut state = self.store.load_or_init(self.config.initial_equity)?;
        let clock = Arc::clone(self.gateway.clock());
        state.meta.runs += 1;
        state.meta.last_run_at = Some(clock.now());
        state.meta.symbols = self.symbols.clone();
        state.meta.timeframe = Some(self.config.timeframe.to_string());

        tracing::info!(
            symbols = ?self.symbols,
            timeframe = %self.config.timeframe,
            max_iterations = self.config.max_iterations,
            run = state.meta.runs,
            equity = state.risk.equity,
            open_positions = state.positions.len(),
            "starting live loop (dry run, no orders are sent)"
        );

        let engine = Engine::new(self.config.engine.clone());
        let mut trade_log = Vec::new();
        let mut iterations = 0u64;
        let mut bars_processed = 0u64;

        let stop_reason = loop {
            if iterations >= self.config.max_iterations {
                break StopReason::MaxIterations;
            }
            if iterations > 0 {
                let deadline = self.config.timeframe.next_boundary_after(clock.now())
                    + self.config.poll_offset;
                tracing::debug!(%deadline, "waiting for next bar");
                if clock.wait_until(deadline, &self.shutdown) {
                    break StopReason::Cancelled;
                }
            }
            if self.shutdown.is_triggered() {
                break StopReason::Cancelled;
            }
            iterations += 1;

            let fetched = self.fetch_all()?;
            let timeline = pending_bars(&fetched, &state);
            tracing::debug!(iteration = iterations, pending = timeline.len(), "polled");

            let mut cancelled = false;
            for at in timeline {
                if self.shutdown.is_triggered() {
                    cancelled = true;
                    break;
                }
                let bars: Vec<BarInput<'_>> = fetched
                    .iter()
                    .filter(|(symbol, series)| match state.last_processed(symbol) {
                        Some(seen) => at > seen,
                        None => series.last().is_some_and(|c| c.timestamp <= at),
                    })
                    .map(|(symbol, series)| BarInput {
                        symbol: symbol.as_str(),
                        window: series.window_until(at),
                    })
                    .collect();
                let outcome = engine.step(&mut state, at, &bars)?;
                trade_log.extend(outcome.events);
                state.cache_fetched_at.extend(self.gateway.cache_metadata());
                self.store.snapshot(&state)?;
                bars_processed += 1;
            }
            if cancelled {
                break StopReason::Cancelled;
            }

            if state.risk.halt_reason == HaltReason::Drawdown && state.positions.is_empty() {
                tracing::warn!("drawdown halt with no open positions, stopping");
                break StopReason::PermanentHalt;
            }
        };

        state.cache_fetched_at.extend(self.gateway.cache_metadata());
        self.store.snapshot(&state)?;
        tracing::info!(
            ?stop_reason,
            iterations,
            bars_processed,
            equity = state.risk.equity,
            "live loop stopped"
        );

        Ok(LiveSummary {
            iterations,
            bars_processed,
            stop_reason,
            trade_log,
            final_state: state,
        })
    }

    /// Latest candles per symbol. Symbol-scoped failures skip that symbol for
    /// this iteration; anything else ends the run.
    fn fetch_all(&mut self) -> Result<BTreeMap<String, Arc<SymbolSeries>>, BarwardenError> {
        let mut fetched = BTreeMap::new();
        for symbol in &self.symbols {
            match self
                .gateway
                .get_candles(symbol, self.config.timeframe, self.config.limit)
            {
                Ok(series) => {
                    fetched.insert(symbol.clone(), series);
                }
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(%symbol, error = %e, "skipping symbol this iteration");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(fetched)
    }
}

/// Timestamps not yet processed for at least one symbol. With no history for a
/// symbol only its newest bar counts.
fn pending_bars(
    fetched: &BTreeMap<String, Arc<SymbolSeries>>,
    state: &RunState,
) -> BTreeSet<DateTime<Utc>> {
    let mut timeline = BTreeSet::new();
    for (symbol, series) in fetched {
        match state.last_processed(symbol) {
            Some(seen) => timeline.extend(
                series
                    .candles
                    .iter()
                    .map(|c| c.timestamp)
                    .filter(|&ts| ts > seen),
            ),
            None => timeline.extend(series.last().map(|c| c.timestamp)),
        }
    }
    timeline
}
