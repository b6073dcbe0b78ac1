//! Domain error types.

/// Top-level error type for barwarden.
#[derive(Debug, thiserror::Error)]
pub enum BarwardenError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("{symbol} ({timeframe}) is not listed by the provider")]
    DataUnavailable { symbol: String, timeframe: String },

    #[error("no valid symbols remain after validation")]
    NoValidSymbols,

    #[error("exchange error for {symbol} after {attempts} attempts: {reason}")]
    Exchange {
        symbol: String,
        attempts: u32,
        reason: String,
    },

    #[error("fatal exchange error: {reason}")]
    ExchangeFatal { reason: String },

    #[error("state persistence error at {path}: {reason}")]
    StatePersistence { path: String, reason: String },

    #[error("state location {path} is locked by another runner ({owner})")]
    StateLocked { path: String, owner: String },

    #[error("position already open for {symbol}")]
    PositionExists { symbol: String },

    #[error("insufficient capital to open {symbol}: notional {notional:.2}")]
    InsufficientCapital { symbol: String, notional: f64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BarwardenError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        BarwardenError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that end the whole run rather than one symbol's processing.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BarwardenError::Exchange { .. } | BarwardenError::DataUnavailable { .. }
        )
    }
}

impl From<&BarwardenError> for std::process::ExitCode {
    fn from(err: &BarwardenError) -> Self {
        let code: u8 = match err {
            BarwardenError::Io(_) => 1,
            BarwardenError::ConfigParse { .. } | BarwardenError::ConfigInvalid { .. } => 2,
            BarwardenError::Exchange { .. } | BarwardenError::ExchangeFatal { .. } => 3,
            BarwardenError::StatePersistence { .. } | BarwardenError::StateLocked { .. } => 4,
            BarwardenError::NoValidSymbols | BarwardenError::DataUnavailable { .. } => 5,
            BarwardenError::PositionExists { .. }
            | BarwardenError::InsufficientCapital { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
