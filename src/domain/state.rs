//! Aggregate run state, the unit of durability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::position::Position;
use super::risk::RiskState;

pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunMeta {
    pub runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub symbols: Vec<String>,
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub risk: RiskState,
    pub cash: f64,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub last_processed: BTreeMap<String, DateTime<Utc>>,
    /// Latest close seen per symbol. Marks positions whose symbol has no bar.
    #[serde(default)]
    pub last_close: BTreeMap<String, f64>,
    /// `SYMBOL@timeframe` to the time that cache entry was last fetched.
    #[serde(default)]
    pub cache_fetched_at: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub meta: RunMeta,
}

impl RunState {
    pub fn fresh(initial_equity: f64) -> Self {
        RunState {
            schema_version: STATE_SCHEMA_VERSION,
            risk: RiskState::new(initial_equity),
            cash: initial_equity,
            positions: BTreeMap::new(),
            last_processed: BTreeMap::new(),
            last_close: BTreeMap::new(),
            cache_fetched_at: BTreeMap::new(),
            meta: RunMeta::default(),
        }
    }

    pub fn last_processed(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_processed.get(symbol).copied()
    }
}
