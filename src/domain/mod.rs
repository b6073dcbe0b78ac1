//! Core domain types and logic.

pub mod candle;
pub mod position;
pub mod signal;
pub mod weights;
pub mod risk;
pub mod tracker;
pub mod state;
pub mod shutdown;
pub mod gateway;
pub mod universe;
pub mod pipeline;
pub mod metrics;
pub mod backtest;
pub mod live;
pub mod settings;
pub mod error;
