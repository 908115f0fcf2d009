use std::fmt;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Instrument;

/// Represents the side of an order (buy or sell).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Exit rule that closed a position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Close fell to the stop fraction of the weighted entry price.
    StopLoss,
    /// Low touched the rolling low.
    Breakdown,
    /// Trend filter exit signal.
    TrendFilter,
    /// Held longer than the maximum holding time.
    TimeLimit,
    /// Forced close on the last bar.
    Liquidation,
}

/// Why an order was emitted.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderReason {
    Entry,
    ScaleIn,
    Exit(ExitReason),
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::Breakdown => "breakdown",
            Self::TrendFilter => "trend_filter",
            Self::TimeLimit => "time_limit",
            Self::Liquidation => "liquidation",
        };
        f.write_str(s)
    }
}

impl fmt::Display for OrderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => f.write_str("entry"),
            Self::ScaleIn => f.write_str("scale_in"),
            Self::Exit(reason) => write!(f, "exit:{reason}"),
        }
    }
}

/// A settled fill. The simulator appends one per entry, scale-in and exit.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    /// `price × size × fee_rate`.
    pub fee: f64,
    pub reason: OrderReason,
}

impl OrderEvent {
    pub(crate) fn new(
        id: u64,
        date: DateTime<Utc>,
        instrument: &Instrument,
        (side, reason): (OrderSide, OrderReason),
        price: f64,
        size: f64,
        fee_rate: f64,
    ) -> Self {
        Self {
            id,
            date,
            instrument: instrument.clone(),
            side,
            price,
            size,
            fee: price * size * fee_rate,
            reason,
        }
    }

    /// Price times size, without fees.
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }

    pub fn is_buy(&self) -> bool {
        self.side == OrderSide::Buy
    }
}

#[cfg(test)]
#[test]
fn fee_follows_notional() {
    let order = OrderEvent::new(
        0,
        DateTime::default(),
        &Instrument::from("ETH_USDT"),
        (OrderSide::Buy, OrderReason::Entry),
        100.0,
        10.0,
        0.001,
    );
    assert_eq!(order.notional(), 1_000.0);
    assert!((order.fee - 1.0).abs() < 1e-12);
    assert!(order.is_buy());
}

#[cfg(test)]
#[test]
fn reasons_display() {
    assert_eq!(OrderReason::Exit(ExitReason::StopLoss).to_string(), "exit:stop_loss");
    assert_eq!(OrderReason::ScaleIn.to_string(), "scale_in");
    assert_eq!(OrderSide::Sell.to_string(), "sell");
}
