#![allow(dead_code)]

use barwarden::domain::candle::{Candle, SymbolSeries, Timeframe};
use barwarden::domain::error::BarwardenError;
use barwarden::domain::gateway::{GatewayConfig, MarketDataGateway};
use barwarden::domain::shutdown::Shutdown;
use barwarden::domain::state::RunState;
use barwarden::ports::clock_port::Clock;
use barwarden::ports::market_data_port::{MarketDataPort, ProviderError, SymbolListing};
use barwarden::ports::state_port::StatePort;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn hour() -> Timeframe {
    "1h".parse().unwrap()
}

pub fn make_candle(symbol: &str, timestamp: DateTime<Utc>, close: f64) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe: hour(),
        timestamp,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
    }
}

/// Hourly candles from `t0()`, one per close.
pub fn hourly(symbol: &str, closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| make_candle(symbol, t0() + Duration::hours(i as i64), close))
        .collect()
}

pub fn series(symbol: &str, closes: &[f64]) -> SymbolSeries {
    SymbolSeries::new(symbol.to_string(), hour(), hourly(symbol, closes))
}

/// Deterministic wavy price path with a per-symbol phase.
pub fn generate_closes(n: usize, base: f64, phase: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let x = i as f64 / 6.0 + phase;
            base * (1.0 + 0.05 * x.sin() + 0.0005 * i as f64)
        })
        .collect()
}

/// Manually driven clock. Sleeps and waits advance time instantly.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<std::time::Duration>>,
    waits: AtomicUsize,
    cancel_on_wait: Mutex<Option<(usize, Shutdown)>>,
}

impl FakeClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
            waits: AtomicUsize::new(0),
            cancel_on_wait: Mutex::new(None),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn sleeps(&self) -> Vec<std::time::Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    /// Fires `shutdown` during the `nth` wait (1-based).
    pub fn cancel_on_wait(&self, nth: usize, shutdown: Shutdown) {
        *self.cancel_on_wait.lock().unwrap() = Some((nth, shutdown));
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: std::time::Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(Duration::from_std(duration).unwrap());
    }

    fn wait_until(&self, deadline: DateTime<Utc>, shutdown: &Shutdown) -> bool {
        let n = self.waits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((nth, token)) = self.cancel_on_wait.lock().unwrap().as_ref() {
            if *nth == n {
                token.trigger();
            }
        }
        if shutdown.is_triggered() {
            return true;
        }
        let mut now = self.now.lock().unwrap();
        if deadline > *now {
            *now = deadline;
        }
        false
    }
}

/// In-memory provider. With a clock attached only closed bars are visible.
pub struct MockProvider {
    data: HashMap<String, Vec<Candle>>,
    failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    listing_failures: Mutex<VecDeque<ProviderError>>,
    fetches: AtomicUsize,
    clock: Option<Arc<FakeClock>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            listing_failures: Mutex::new(VecDeque::new()),
            fetches: AtomicUsize::new(0),
            clock: None,
        }
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.data.insert(symbol.to_string(), candles);
        self
    }

    /// Queues errors returned by the next fetches of `symbol`, in order.
    pub fn with_failures(self, symbol: &str, errors: Vec<ProviderError>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .extend(errors);
        self
    }

    pub fn with_listing_failures(self, errors: Vec<ProviderError>) -> Self {
        self.listing_failures.lock().unwrap().extend(errors);
        self
    }

    pub fn with_clock(mut self, clock: Arc<FakeClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl MarketDataPort for MockProvider {
    fn list_available_symbols(&self) -> Result<Vec<SymbolListing>, ProviderError> {
        if let Some(err) = self.listing_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut symbols: Vec<&String> = self.data.keys().collect();
        symbols.sort();
        Ok(symbols
            .into_iter()
            .map(|s| SymbolListing {
                symbol: s.clone(),
                timeframes: vec![hour()],
            })
            .collect())
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(symbol)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let Some(candles) = self.data.get(symbol) else {
            return Err(ProviderError::NotListed {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        };
        let visible: Vec<Candle> = match &self.clock {
            Some(clock) => {
                let cutoff = clock.now() - timeframe.duration();
                candles
                    .iter()
                    .filter(|c| c.timestamp <= cutoff)
                    .cloned()
                    .collect()
            }
            None => candles.clone(),
        };
        let skip = visible.len().saturating_sub(limit);
        Ok(visible[skip..].to_vec())
    }
}

pub fn gateway(provider: Arc<MockProvider>, clock: Arc<FakeClock>) -> MarketDataGateway {
    MarketDataGateway::new(provider, clock, GatewayConfig::default())
}

#[derive(Default)]
pub struct MemoryStateStore {
    pub snapshots: Vec<RunState>,
    pub initial: Option<RunState>,
    /// Snapshots fail once this many have been taken.
    pub fail_after: Option<usize>,
}

impl MemoryStateStore {
    pub fn with_state(state: RunState) -> Self {
        Self {
            initial: Some(state),
            ..Self::default()
        }
    }

    pub fn failing_after(successes: usize) -> Self {
        Self {
            fail_after: Some(successes),
            ..Self::default()
        }
    }
}

impl StatePort for MemoryStateStore {
    fn snapshot(&mut self, state: &RunState) -> Result<(), BarwardenError> {
        if self.fail_after.is_some_and(|n| self.snapshots.len() >= n) {
            return Err(BarwardenError::StatePersistence {
                path: "memory".to_string(),
                reason: "disk full".to_string(),
            });
        }
        self.snapshots.push(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<RunState>, BarwardenError> {
        Ok(self.snapshots.last().cloned().or_else(|| self.initial.clone()))
    }
}
