//! Market-data gateway: TTL cache in front of the provider, with bounded retries.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::candle::{SymbolSeries, Timeframe};
use super::error::BarwardenError;
use crate::ports::clock_port::Clock;
use crate::ports::market_data_port::{MarketDataPort, ProviderError, SymbolListing};

/// Exponential backoff: attempt `k` (0-based) is followed by `base * 2^k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure {
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last: ProviderError },
    /// A non-retryable error stopped the loop early.
    Aborted(ProviderError),
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
    }

    /// Runs `op` until it succeeds, fails non-transiently, or attempts run out.
    /// There is no sleep after the final attempt.
    pub fn run<T>(
        &self,
        clock: &dyn Clock,
        what: &str,
        mut op: impl FnMut() -> Result<T, ProviderError>,
    ) -> Result<T, RetryFailure> {
        let attempts = self.max_attempts.max(1);
        let mut last = None;
        for attempt in 0..attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err @ ProviderError::Transient(_)) => {
                    if attempt + 1 < attempts {
                        let delay = self.delay_after(attempt);
                        tracing::warn!(
                            what,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying after provider error"
                        );
                        clock.sleep(delay);
                    }
                    last = Some(err);
                }
                Err(err) => return Err(RetryFailure::Aborted(err)),
            }
        }
        Err(RetryFailure::Exhausted {
            attempts,
            last: last.unwrap_or_else(|| ProviderError::Transient("no attempts made".into())),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub cache_ttl: chrono::Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            cache_ttl: chrono::Duration::seconds(180),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: DateTime<Utc>,
    series: Arc<SymbolSeries>,
}

type CacheKey = (String, Timeframe, usize);

pub struct MarketDataGateway {
    provider: Arc<dyn MarketDataPort>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    cache: HashMap<CacheKey, CacheEntry>,
}

impl MarketDataGateway {
    pub fn new(
        provider: Arc<dyn MarketDataPort>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            clock,
            config,
            cache: HashMap::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Provider listing, fetched with the retry policy.
    pub fn list_available(&self) -> Result<Vec<SymbolListing>, BarwardenError> {
        let provider = Arc::clone(&self.provider);
        self.config
            .retry
            .run(self.clock.as_ref(), "list_available_symbols", || {
                provider.list_available_symbols()
            })
            .map_err(|failure| match failure {
                RetryFailure::Exhausted { attempts, last } => BarwardenError::ExchangeFatal {
                    reason: format!("symbol listing failed after {attempts} attempts: {last}"),
                },
                RetryFailure::Aborted(err) => BarwardenError::ExchangeFatal {
                    reason: err.to_string(),
                },
            })
    }

    /// Cached series if younger than the TTL, otherwise a fresh fetch.
    pub fn get_candles(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Arc<SymbolSeries>, BarwardenError> {
        let key = (symbol.to_string(), timeframe, limit);
        let now = self.clock.now();
        if let Some(entry) = self.cache.get(&key) {
            if now - entry.fetched_at < self.config.cache_ttl {
                tracing::debug!(symbol, %timeframe, limit, "cache hit");
                return Ok(Arc::clone(&entry.series));
            }
        }

        let provider = Arc::clone(&self.provider);
        let candles = self
            .config
            .retry
            .run(self.clock.as_ref(), symbol, || {
                provider.fetch_candles(symbol, timeframe, limit)
            })
            .map_err(|failure| match failure {
                RetryFailure::Exhausted { attempts, last } => BarwardenError::Exchange {
                    symbol: symbol.to_string(),
                    attempts,
                    reason: last.to_string(),
                },
                RetryFailure::Aborted(ProviderError::NotListed { symbol, timeframe }) => {
                    BarwardenError::DataUnavailable { symbol, timeframe }
                }
                RetryFailure::Aborted(err) => BarwardenError::ExchangeFatal {
                    reason: err.to_string(),
                },
            })?;

        if candles.is_empty() {
            return Err(BarwardenError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        let series = Arc::new(SymbolSeries::new(symbol.to_string(), timeframe, candles));
        let fetched_at = self.clock.now();
        tracing::debug!(symbol, %timeframe, bars = series.len(), "fetched candles");
        self.cache.insert(
            key,
            CacheEntry {
                fetched_at,
                series: Arc::clone(&series),
            },
        );
        Ok(series)
    }

    /// `SYMBOL@timeframe` to the latest fetch time across limits.
    pub fn cache_metadata(&self) -> BTreeMap<String, DateTime<Utc>> {
        let mut out: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for ((symbol, timeframe, _), entry) in &self.cache {
            let key = format!("{symbol}@{timeframe}");
            let slot = out.entry(key).or_insert(entry.fetched_at);
            if entry.fetched_at > *slot {
                *slot = entry.fetched_at;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(0), Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_after(200) >= policy.delay_after(30));
    }
}
