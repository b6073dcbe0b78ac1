//! Market-data provider port. Read-only: listing and candle retrieval.

use crate::domain::candle::{Candle, Timeframe};

/// Failure classes a provider reports. Only `Transient` is retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("fatal provider error: {0}")]
    Fatal(String),

    #[error("{symbol} ({timeframe}) is not listed")]
    NotListed { symbol: String, timeframe: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolListing {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
}

impl SymbolListing {
    pub fn supports(&self, timeframe: Timeframe) -> bool {
        self.timeframes.contains(&timeframe)
    }
}

pub trait MarketDataPort: Send + Sync {
    fn list_available_symbols(&self) -> Result<Vec<SymbolListing>, ProviderError>;

    /// The most recent `limit` candles, oldest first.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError>;
}
