//! Candle, timeframe and per-symbol series representation.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::BarwardenError;

/// Bar duration, stored in whole seconds. At most [`Timeframe::MAX_SECONDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    seconds: i64,
}

impl Timeframe {
    /// One 366-day year.
    pub const MAX_SECONDS: i64 = 366 * 86_400;

    pub fn from_seconds(seconds: i64) -> Option<Self> {
        (seconds > 0 && seconds <= Self::MAX_SECONDS).then_some(Timeframe { seconds })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds)
    }

    /// First multiple of the timeframe since the Unix epoch strictly after `now`.
    pub fn next_boundary_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ts = now.timestamp();
        ts.div_euclid(self.seconds)
            .checked_add(1)
            .and_then(|n| n.checked_mul(self.seconds))
            .and_then(|next| Utc.timestamp_opt(next, 0).single())
            .or_else(|| now.checked_add_signed(self.duration()))
            .unwrap_or(now)
    }

    /// Approximate number of bars per 365-day year.
    pub fn periods_per_year(&self) -> f64 {
        365.0 * 24.0 * 3600.0 / self.seconds as f64
    }
}

impl FromStr for Timeframe {
    type Err = BarwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || {
            BarwardenError::config_invalid(
                "data",
                "timeframe",
                format!("invalid timeframe '{trimmed}' (expected e.g. 1m, 15m, 1h, 4h, 1d)"),
            )
        };
        if trimmed.len() < 2 {
            return Err(invalid());
        }
        let (count, unit) = trimmed.split_at(trimmed.len() - 1);
        let count: i64 = count.parse().map_err(|_| invalid())?;
        let unit_seconds = match unit {
            "m" => 60,
            "h" => 3600,
            "d" | "D" => 86_400,
            _ => return Err(invalid()),
        };
        count
            .checked_mul(unit_seconds)
            .and_then(Timeframe::from_seconds)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        if s % 86_400 == 0 {
            write!(f, "{}d", s / 86_400)
        } else if s % 3600 == 0 {
            write!(f, "{}h", s / 3600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{}s", s)
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = BarwardenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered candles for one (symbol, timeframe), newest last.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl SymbolSeries {
    /// Sorts by timestamp and drops duplicate timestamps (last one wins).
    pub fn new(symbol: String, timeframe: Timeframe, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => deduped.push(candle),
            }
        }
        Self {
            symbol,
            timeframe,
            candles: deduped,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Candles up to and including `at`.
    pub fn window_until(&self, at: DateTime<Utc>) -> &[Candle] {
        let end = self.candles.partition_point(|c| c.timestamp <= at);
        &self.candles[..end]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}
