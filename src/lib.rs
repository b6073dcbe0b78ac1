//! barwarden: risk-gated SMA crossover decision engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`]. Trades are planned, never placed.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
