//! # PBTS: Portfolio BackTest Simulator
//!
//! **PBTS** replays precomputed entry and exit signals over many instruments at once, bar by bar,
//! under one shared cash pool. It decides which candidates are admitted when slots are scarce,
//! adds to winners (scale-ins), closes positions on rule-based exits and keeps the cash and the
//! asset value reconciled on every bar.
//!
//! ## Core Components
//! | Component   | Description                                                                                     |
//! |-------------|-------------------------------------------------------------------------------------------------|
//! | **`MarketData`** | Shared bar index with the candles and indicators (ATR, moving average, rolling low) of every instrument. |
//! | **`SignalSet`** | Entry/exit flags per instrument and the daily ranked candidate table.                       |
//! | **`PositionBook`** | Open lots per instrument, in admission order.                                           |
//! | **`CapitalLedger`** | Remaining cash, available cash and asset value per bar.                                |
//! | **`Simulator`** | The bar-by-bar engine, generic over an `ExitPolicy` and an `EntrySizer`.                  |
//! | **`TradeLog`** | Round trips rebuilt from the order events.                                                 |
//! | **`Metrics`** | Return, drawdown, profit factor, Sharpe ratio and win rate.                                 |
//! | **`Optimizer`** | Parallel parameter sweep over independent simulations.                                    |
//!
//! ## Bar order
//! On every bar the ledger row is carried forward, then open positions are checked for exits,
//! then surviving positions may scale in, then new candidates are admitted by rank until the
//! concurrent position ceiling is reached. The last bar closes everything.
//!
//! ## Getting Started
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{DateTime, Duration};
//! use pbts_rs::prelude::*;
//!
//! let start = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
//! let index: Vec<_> = (0..3).map(|i| start + Duration::days(i)).collect();
//!
//! let candles = [100.0, 110.0, 120.0]
//!     .iter()
//!     .map(|c| Some(Candle::from((*c, *c, *c, *c, 1.0))))
//!     .collect();
//! let mut market = MarketData::new(index.clone()).unwrap();
//! market.insert("ETH_USDT", Series::new(candles)).unwrap();
//!
//! let signals = SignalSet::new()
//!     .with_entries("ETH_USDT", vec![true, false, false])
//!     .with_ranks(index.iter().map(|d| RankRow::from((d.date_naive(), "ETH_USDT", 1))));
//!
//! // equal-weight stakes, no ATR needed
//! let mut sim = Simulator::new(SimulationConfig::breakout(), Arc::new(market), Arc::new(signals)).unwrap();
//! sim.run().unwrap();
//!
//! let report = sim.into_report();
//! let log = TradeLog::from_orders(&report.orders, report.initial_cash).unwrap();
//! assert_eq!(report.orders.len(), 2);
//! assert_eq!(log.len(), 1);
//! assert!(report.final_asset_value() > report.initial_cash);
//! ```
//!
//! ## Features
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` *(default)* | JSON loaders for the configuration, market data and signals. |
//! | `metrics` *(default)* | Performance metrics. |
//! | `optimizer` | Parallel parameter sweep with [`rayon`](https://crates.io/crates/rayon). |
//! | `draws` | Capital charts with [`plotters`](https://crates.io/crates/plotters). |
//! | `prepare` | Synthetic candles, [`ta`](https://crates.io/crates/ta) indicators, signals and rankings. |
//! | `cli` | The `pbts` binary. |
//!
//! ## License
//! MIT

/// Simulation engine: market data, signals, position book, ledger and the simulator.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Round trips rebuilt from the order events.
pub mod tradelog;

/// CSV export of orders, trades and the capital ledger.
pub mod export;

/// Performance metrics: drawdown, Sharpe ratio, win rate, etc.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Strategy parameter optimization.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Capital charts to png or svg.
#[cfg(feature = "draws")]
pub mod draws;

/// Synthetic data, indicators and signals.
#[cfg(feature = "prepare")]
pub mod prepare;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::tradelog::*;

    #[cfg(feature = "metrics")]
    pub use crate::metrics::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;

    #[cfg(feature = "draws")]
    pub use crate::draws::*;

    #[cfg(feature = "prepare")]
    pub use crate::prepare::*;
}

use std::ops::{Div, Mul, Sub};

/// Trait for percentage calculations between two values.
pub trait PercentCalculus<Rhs = Self> {
    /// Calculates the percentage change between two values.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn change(self, new: Rhs) -> Self;

    /// Expresses `part` as a percentage of the value.
    ///
    /// ### Arguments
    /// * `part` - The amount to compare against the value.
    ///
    /// ### Returns
    /// `part` in percent of the value (e.g., 10.0 for 10 out of 100).
    fn share(self, part: Rhs) -> Self;
}

impl PercentCalculus for f64 {
    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }

    fn share(self, part: Self) -> Self {
        part.div(self).mul(100.0)
    }
}
