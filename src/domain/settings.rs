//! Typed run settings built from a [`ConfigPort`], validated up front.

use std::time::Duration;

use super::error::BarwardenError;
use super::gateway::{GatewayConfig, RetryPolicy};
use super::pipeline::EngineConfig;
use super::risk::RiskConfig;
use super::signal::SmaWindows;
use super::tracker::ExitLevels;
use crate::ports::config_port::ConfigPort;

const MAX_CACHE_TTL_SECS: i64 = 7 * 86_400;
const MAX_POLL_OFFSET_SECS: i64 = 3_600;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub engine: EngineConfig,
    pub gateway: GatewayConfig,
    pub initial_equity: f64,
    pub poll_offset: chrono::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            engine: EngineConfig::default(),
            gateway: GatewayConfig::default(),
            initial_equity: 10_000.0,
            poll_offset: chrono::Duration::seconds(2),
        }
    }
}

pub fn build_settings(config: &dyn ConfigPort) -> Result<Settings, BarwardenError> {
    let engine = EngineConfig {
        windows: build_windows(config)?,
        levels: ExitLevels {
            stop_loss_pct: config.get_double("strategy", "stop_loss_pct", 0.02)?,
            take_profit_pct: config.get_double("strategy", "take_profit_pct", 0.04)?,
        },
        risk: RiskConfig {
            daily_loss_cap_usd: config.get_double("risk", "daily_loss_cap_usd", 500.0)?,
            max_drawdown_pct: config.get_double("risk", "max_drawdown_pct", 0.03)?,
            correlation_lookback: non_negative(config, "risk", "correlation_lookback", 50)?
                as usize,
        },
    };
    engine.validate()?;

    let settings = Settings {
        engine,
        gateway: build_gateway(config)?,
        initial_equity: validate_initial_equity(config)?,
        poll_offset: seconds_setting(config, "live", "poll_offset_secs", 2, MAX_POLL_OFFSET_SECS)?,
    };
    tracing::debug!(?settings, "configuration loaded");
    Ok(settings)
}

fn build_windows(config: &dyn ConfigPort) -> Result<SmaWindows, BarwardenError> {
    let fast = non_negative(config, "strategy", "fast_window", 20)?;
    let slow = non_negative(config, "strategy", "slow_window", 50)?;
    SmaWindows::new(fast as usize, slow as usize)
}

fn build_gateway(config: &dyn ConfigPort) -> Result<GatewayConfig, BarwardenError> {
    let cache_ttl = seconds_setting(config, "data", "cache_ttl_secs", 180, MAX_CACHE_TTL_SECS)?;
    let attempts = config.get_int("data", "retry_attempts", 3)?;
    if !(1..=10).contains(&attempts) {
        return Err(BarwardenError::config_invalid(
            "data",
            "retry_attempts",
            "retry_attempts must be between 1 and 10",
        ));
    }
    let base_ms = non_negative(config, "data", "retry_base_ms", 500)?;
    Ok(GatewayConfig {
        cache_ttl,
        retry: RetryPolicy {
            max_attempts: attempts as u32,
            base_delay: Duration::from_millis(base_ms as u64),
        },
    })
}

fn validate_initial_equity(config: &dyn ConfigPort) -> Result<f64, BarwardenError> {
    let value = config.get_double("backtest", "initial_equity", 10_000.0)?;
    if !(value > 0.0 && value.is_finite()) {
        return Err(BarwardenError::config_invalid(
            "backtest",
            "initial_equity",
            "initial_equity must be positive",
        ));
    }
    Ok(value)
}

/// Whole seconds in `0..=max`.
fn seconds_setting(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    max: i64,
) -> Result<chrono::Duration, BarwardenError> {
    let value = non_negative(config, section, key, default)?;
    if value > max {
        return Err(BarwardenError::config_invalid(
            section,
            key,
            format!("{key} must be at most {max}"),
        ));
    }
    chrono::Duration::try_seconds(value).ok_or_else(|| {
        BarwardenError::config_invalid(section, key, format!("{key} is out of range"))
    })
}

fn non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, BarwardenError> {
    let value = config.get_int(section, key, default)?;
    if value < 0 {
        return Err(BarwardenError::config_invalid(
            section,
            key,
            format!("{key} must not be negative"),
        ));
    }
    Ok(value)
}
