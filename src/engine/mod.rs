//! Core simulation components.
//!
//! This module provides the fundamental types for portfolio backtesting:
//! - `MarketData` / `Candle`: OHLCV and indicator series over a shared bar index.
//! - `SignalSet`: entry/exit flags and the daily candidate ranking.
//! - `PositionBook`: open lots per instrument.
//! - `CapitalLedger`: remaining cash, available cash and asset value per bar.
//! - `Simulator`: the bar-by-bar state machine tying them together.

mod book;
mod candle;
mod config;
mod ledger;
mod market;
mod order;
mod policy;
mod signals;
mod simulator;

pub use book::*;
pub use candle::*;
pub use config::*;
pub use ledger::*;
pub use market::*;
pub use order::*;
pub use policy::*;
pub use signals::*;
pub use simulator::*;

#[cfg(test)]
mod scenarios;
