//! Daily-loss and drawdown risk state machine.
//!
//! States: active, halted on the daily loss cap (cleared by the next calendar
//! day), halted on drawdown (never cleared within a run). A halt only blocks
//! new entries; exits are always allowed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::BarwardenError;
use super::weights;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub daily_loss_cap_usd: f64,
    pub max_drawdown_pct: f64,
    pub correlation_lookback: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            daily_loss_cap_usd: 500.0,
            max_drawdown_pct: 0.03,
            correlation_lookback: 50,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), BarwardenError> {
        if !(self.daily_loss_cap_usd > 0.0) {
            return Err(BarwardenError::config_invalid(
                "risk",
                "daily_loss_cap_usd",
                "daily_loss_cap_usd must be positive",
            ));
        }
        if !(self.max_drawdown_pct > 0.0 && self.max_drawdown_pct < 1.0) {
            return Err(BarwardenError::config_invalid(
                "risk",
                "max_drawdown_pct",
                "max_drawdown_pct must be in (0, 1)",
            ));
        }
        if self.correlation_lookback < 2 {
            return Err(BarwardenError::config_invalid(
                "risk",
                "correlation_lookback",
                "correlation_lookback must be at least 2",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltReason {
    #[default]
    None,
    DailyLossCap,
    Drawdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: f64,
    pub daily_anchor_date: Option<NaiveDate>,
    pub equity: f64,
    pub equity_high_watermark: f64,
    pub halted: bool,
    pub halt_reason: HaltReason,
}

impl RiskState {
    pub fn new(initial_equity: f64) -> Self {
        RiskState {
            daily_pnl: 0.0,
            daily_anchor_date: None,
            equity: initial_equity,
            equity_high_watermark: initial_equity,
            halted: false,
            halt_reason: HaltReason::None,
        }
    }

    pub fn drawdown(&self) -> f64 {
        if self.equity_high_watermark > 0.0 {
            (self.equity_high_watermark - self.equity) / self.equity_high_watermark
        } else {
            0.0
        }
    }
}

/// Owns [`RiskState`] and applies the transitions.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig, state: RiskState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn into_state(self) -> RiskState {
        self.state
    }

    pub fn allows_entry(&self) -> bool {
        !self.state.halted
    }

    /// Halted on drawdown, which needs an operator to resume trading.
    pub fn is_permanently_halted(&self) -> bool {
        self.state.halt_reason == HaltReason::Drawdown
    }

    /// Day rollover. Clears a daily-loss halt, never a drawdown halt.
    pub fn begin_bar(&mut self, date: NaiveDate) {
        if self.state.daily_anchor_date == Some(date) {
            return;
        }
        if let Some(prev) = self.state.daily_anchor_date {
            tracing::debug!(%prev, %date, daily_pnl = self.state.daily_pnl, "daily pnl reset");
        }
        self.state.daily_anchor_date = Some(date);
        self.state.daily_pnl = 0.0;
        if self.state.halt_reason == HaltReason::DailyLossCap {
            tracing::info!(%date, "daily loss cap halt cleared on day rollover");
            self.state.halted = false;
            self.state.halt_reason = HaltReason::None;
        }
        self.check_daily_cap();
    }

    pub fn record_realized_pnl(&mut self, pnl: f64) {
        self.state.daily_pnl += pnl;
        self.check_daily_cap();
    }

    /// Updates equity and the high-water mark, then checks the drawdown cap.
    pub fn mark_equity(&mut self, equity: f64) {
        self.state.equity = equity;
        if equity > self.state.equity_high_watermark {
            self.state.equity_high_watermark = equity;
        }
        let dd = self.state.drawdown();
        if dd >= self.config.max_drawdown_pct && self.state.halt_reason != HaltReason::Drawdown {
            tracing::warn!(
                equity,
                watermark = self.state.equity_high_watermark,
                drawdown = dd,
                "drawdown cap breached, halting for the rest of the run"
            );
            self.state.halted = true;
            self.state.halt_reason = HaltReason::Drawdown;
        }
    }

    fn check_daily_cap(&mut self) {
        if self.state.halted {
            return;
        }
        if self.state.daily_pnl <= -self.config.daily_loss_cap_usd.abs() {
            tracing::warn!(
                daily_pnl = self.state.daily_pnl,
                cap = self.config.daily_loss_cap_usd,
                "daily loss cap breached, halting new entries for today"
            );
            self.state.halted = true;
            self.state.halt_reason = HaltReason::DailyLossCap;
        }
    }

    pub fn compute_correlation_weights(
        &self,
        returns_by_symbol: &BTreeMap<String, Vec<f64>>,
    ) -> BTreeMap<String, f64> {
        weights::compute_correlation_weights(returns_by_symbol)
    }
}
