//! CSV directory market-data provider.
//!
//! One file per (symbol, timeframe), named `<BASE>-<QUOTE>_<timeframe>.csv`,
//! with header `timestamp,open,high,low,close,volume`. Timestamps are either
//! epoch milliseconds or RFC 3339.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::domain::candle::{Candle, Timeframe};
use crate::ports::market_data_port::{MarketDataPort, ProviderError, SymbolListing};

pub struct CsvMarketData {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl CsvMarketData {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", symbol.replace('/', "-"), timeframe))
    }

    /// `BTC-USD_1h.csv` -> (`BTC/USD`, 1h).
    fn parse_file_name(name: &str) -> Option<(String, Timeframe)> {
        let stem = name.strip_suffix(".csv")?;
        let (pair, tf) = stem.rsplit_once('_')?;
        let timeframe = tf.parse().ok()?;
        let (base, quote) = pair.split_once('-')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some((format!("{}/{}", base.to_uppercase(), quote.to_uppercase()), timeframe))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = raw
            .parse()
            .map_err(|e| format!("invalid epoch millis '{raw}': {e}"))?;
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| format!("epoch millis out of range: {raw}"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

impl MarketDataPort for CsvMarketData {
    fn list_available_symbols(&self) -> Result<Vec<SymbolListing>, ProviderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            ProviderError::Fatal(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut by_symbol: BTreeMap<String, Vec<Timeframe>> = BTreeMap::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| ProviderError::Transient(format!("directory entry error: {e}")))?;
            let name = entry.file_name();
            if let Some((symbol, timeframe)) = Self::parse_file_name(&name.to_string_lossy()) {
                by_symbol.entry(symbol).or_default().push(timeframe);
            }
        }

        Ok(by_symbol
            .into_iter()
            .map(|(symbol, mut timeframes)| {
                timeframes.sort();
                SymbolListing { symbol, timeframes }
            })
            .collect())
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let path = self.csv_path(symbol, timeframe);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::NotListed {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                });
            }
            Err(e) => {
                return Err(ProviderError::Transient(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut candles = Vec::new();
        for result in rdr.deserialize::<CsvRow>() {
            let row = result.map_err(|e| {
                ProviderError::Fatal(format!("CSV parse error in {}: {}", path.display(), e))
            })?;
            let timestamp = parse_timestamp(&row.timestamp).map_err(ProviderError::Fatal)?;
            candles.push(Candle {
                symbol: symbol.to_string(),
                timeframe,
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        candles.sort_by_key(|c| c.timestamp);
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.split_off(skip))
    }
}
