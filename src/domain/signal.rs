//! SMA crossover signal generation.
//!
//! Pure and deterministic: the same candle window and position always yield the
//! same [`Signal`], which is what lets backtests replay exactly.
//!
//! - enter long when `close > SMA(fast)` and `SMA(fast) > SMA(slow)`
//! - exit when `close < SMA(fast)` or the stop-loss / take-profit price is reached

use chrono::{DateTime, Utc};

use super::candle::Candle;
use super::error::BarwardenError;
use super::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    EnterLong,
    ExitLong,
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub price: f64,
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmaWindows {
    fast: usize,
    slow: usize,
}

impl SmaWindows {
    pub fn new(fast: usize, slow: usize) -> Result<Self, BarwardenError> {
        if fast == 0 {
            return Err(BarwardenError::config_invalid(
                "strategy",
                "fast_window",
                "fast_window must be at least 1",
            ));
        }
        if fast >= slow {
            return Err(BarwardenError::config_invalid(
                "strategy",
                "slow_window",
                format!("slow_window ({slow}) must be greater than fast_window ({fast})"),
            ));
        }
        Ok(Self { fast, slow })
    }

    pub fn fast(&self) -> usize {
        self.fast
    }

    pub fn slow(&self) -> usize {
        self.slow
    }
}

impl Default for SmaWindows {
    fn default() -> Self {
        SmaWindows { fast: 20, slow: 50 }
    }
}

/// Mean of the last `window` closes, or `None` when there are fewer.
pub fn sma(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window {
        return None;
    }
    let tail = &candles[candles.len() - window..];
    Some(tail.iter().map(|c| c.close).sum::<f64>() / window as f64)
}

/// Signal for the newest candle in `candles`.
///
/// `candles` must be ordered oldest first. With fewer than `slow` candles the
/// result is always [`SignalKind::Hold`].
pub fn compute_signal(
    symbol: &str,
    candles: &[Candle],
    windows: SmaWindows,
    open_position: Option<&Position>,
) -> Signal {
    let Some(last) = candles.last() else {
        return Signal {
            symbol: symbol.to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            kind: SignalKind::Hold,
            price: 0.0,
            sma_fast: None,
            sma_slow: None,
        };
    };

    let sma_fast = sma(candles, windows.fast);
    let sma_slow = sma(candles, windows.slow);
    let price = last.close;

    let kind = match (sma_fast, sma_slow) {
        (Some(fast), Some(slow)) => match open_position {
            None if price > fast && fast > slow => SignalKind::EnterLong,
            None => SignalKind::Hold,
            Some(pos) => {
                if price < fast || pos.should_stop_loss(price) || pos.should_take_profit(price) {
                    SignalKind::ExitLong
                } else {
                    SignalKind::Hold
                }
            }
        },
        _ => SignalKind::Hold,
    };

    Signal {
        symbol: symbol.to_string(),
        timestamp: last.timestamp,
        kind,
        price,
        sma_fast,
        sma_slow,
    }
}
