use crate::engine::Instrument;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bar index is empty. A simulation requires at least one bar.
    #[error("Bar index is empty: simulation requires at least one bar")]
    EmptyIndex,

    /// The bar index is not strictly increasing.
    #[error("Bar index must be strictly increasing (bar {0})")]
    UnorderedIndex(usize),

    /// A series does not have one value per bar.
    #[error("Series `{name}` for {instrument} has {got} values, expected {expected}")]
    Misaligned {
        /// Instrument owning the series.
        instrument: Instrument,
        /// Series name (candles, atr, ma, ...).
        name: &'static str,
        /// Number of bars in the index.
        expected: usize,
        /// Number of values found.
        got: usize,
    },

    /// The initial or current balance is not positive.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A candle does not satisfy `low <= open, close <= high`.
    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    /// Price must be positive and finite.
    #[error("Price must be positive and finite (got: {0})")]
    InvalidPrice(f64),

    /// The ledger does not have enough available cash for the stake.
    /// Required: {0}, Available: {1}
    #[error("Insufficient funds: required {0}, available {1}")]
    InsufficientFunds(f64, f64),

    /// Price or indicator data is missing for an instrument on a bar.
    #[error("Missing {what} for {instrument} at bar {bar}")]
    MissingData {
        /// Instrument lacking data.
        instrument: Instrument,
        /// Bar index.
        bar: usize,
        /// What is missing (close, atr, ...).
        what: &'static str,
    },

    /// The instrument has no open position.
    #[error("Position not found: {0}")]
    PositionNotFound(Instrument),

    /// The bar is outside the simulation horizon.
    #[error("Bar {0} is out of range")]
    BarOutOfRange(usize),

    /// The order stream cannot be reduced into round trips.
    #[error("Malformed order stream for {instrument}: {reason}")]
    MalformedOrders {
        /// Instrument whose orders are inconsistent.
        instrument: Instrument,
        /// What went wrong.
        reason: String,
    },

    /// A bookkeeping invariant was broken. This is a bug in admission control.
    #[error("Invariant violated at bar {bar}{}: {reason}", .instrument.as_ref().map(|i| format!(" ({i})")).unwrap_or_default())]
    Invariant {
        /// Bar being processed.
        bar: usize,
        /// Instrument involved, if any.
        instrument: Option<Instrument>,
        /// Description of the violation.
        reason: String,
    },

    /// Indicator computation failed.
    #[cfg(feature = "prepare")]
    #[error("Indicator error: {0}")]
    Indicator(String),

    /// Chart rendering failed.
    #[cfg(feature = "draws")]
    #[error("Plotters error: {0}")]
    Plotters(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Builds an invariant violation without instrument context.
    pub(crate) fn invariant(bar: usize, reason: impl Into<String>) -> Self {
        Self::Invariant {
            bar,
            instrument: None,
            reason: reason.into(),
        }
    }

    /// Builds an invariant violation for one instrument.
    pub(crate) fn invariant_for(bar: usize, instrument: &Instrument, reason: impl Into<String>) -> Self {
        Self::Invariant {
            bar,
            instrument: Some(instrument.clone()),
            reason: reason.into(),
        }
    }

    /// Stamps an invariant violation with the bar being processed.
    pub(crate) fn at_bar(self, at: usize) -> Self {
        match self {
            Self::Invariant { instrument, reason, .. } => Self::Invariant {
                bar: at,
                instrument,
                reason,
            },
            other => other,
        }
    }

    /// Returns true for failures the simulator recovers from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientFunds(..) | Self::MissingData { .. })
    }
}

#[cfg(test)]
#[test]
fn invariant_message_carries_context() {
    let err = Error::invariant_for(7, &Instrument::from("ETH_USDT"), "empty lot list");
    assert_eq!(
        err.to_string(),
        "Invariant violated at bar 7 (ETH_USDT): empty lot list"
    );

    let err = Error::invariant(3, "negative cash");
    assert_eq!(err.to_string(), "Invariant violated at bar 3: negative cash");
}

#[cfg(test)]
#[test]
fn recoverable_errors() {
    assert!(Error::InsufficientFunds(600.0, 500.0).is_recoverable());
    assert!(
        Error::MissingData {
            instrument: Instrument::from("BTC_USDT"),
            bar: 1,
            what: "close",
        }
        .is_recoverable()
    );
    assert!(!Error::invariant(0, "bug").is_recoverable());
}
