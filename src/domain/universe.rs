//! Symbol universe: normalization and startup validation against the provider.

use std::collections::HashSet;

use super::candle::Timeframe;
use super::error::BarwardenError;
use super::gateway::MarketDataGateway;

pub const DEFAULT_QUOTE: &str = "USD";

/// `btc-usd` -> `BTC/USD`, bare `eth` -> `ETH/USD`. Empty input stays empty.
pub fn normalize_symbol(raw: &str) -> String {
    let s = raw.trim().to_uppercase().replace('-', "/");
    if s.is_empty() || s.contains('/') {
        s
    } else {
        format!("{s}/{DEFAULT_QUOTE}")
    }
}

/// Normalizes and deduplicates, keeping first-seen order. Blank tokens are dropped.
pub fn normalize_symbols<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|s| normalize_symbol(s.as_ref()))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NotListed,
    TimeframeUnsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseValidation {
    pub symbols: Vec<String>,
    pub skipped: Vec<SkippedSymbol>,
}

pub fn validate_symbols<S: AsRef<str>>(
    gateway: &MarketDataGateway,
    symbols: &[S],
    timeframe: Timeframe,
) -> Result<UniverseValidation, BarwardenError> {
    let requested = normalize_symbols(symbols);
    let listing = gateway.list_available()?;

    let mut valid = Vec::new();
    let mut skipped = Vec::new();
    for symbol in requested {
        let reason = match listing.iter().find(|l| l.symbol == symbol) {
            None => Some(SkipReason::NotListed),
            Some(l) if !l.supports(timeframe) => Some(SkipReason::TimeframeUnsupported),
            Some(_) => None,
        };
        match reason {
            Some(reason) => {
                tracing::warn!(%symbol, %timeframe, ?reason, "skipping unavailable symbol");
                skipped.push(SkippedSymbol { symbol, reason });
            }
            None => valid.push(symbol),
        }
    }

    if valid.is_empty() {
        return Err(BarwardenError::NoValidSymbols);
    }
    if !skipped.is_empty() {
        tracing::info!(
            valid = valid.len(),
            requested = valid.len() + skipped.len(),
            "continuing with a reduced universe"
        );
    }
    Ok(UniverseValidation {
        symbols: valid,
        skipped,
    })
}
