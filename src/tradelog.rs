use std::collections::HashMap;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Instrument, OrderEvent, OrderSide};
use crate::errors::{Error, Result};

// relative tolerance when matching sold against bought size
const SIZE_EPSILON: f64 = 1e-9;

/// A dated price and size.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub date: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

impl From<&OrderEvent> for Fill {
    fn from(order: &OrderEvent) -> Self {
        Self {
            date: order.date,
            price: order.price,
            size: order.size,
        }
    }
}

/// One round trip: every buy of a position and the sells that closed it.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub instrument: Instrument,
    /// First entry followed by the scale-ins.
    pub entries: Vec<Fill>,
    /// Closing date, size-weighted exit price and total size sold.
    pub exit: Fill,
    pub invested: f64,
    pub fees: f64,
    pub pnl: f64,
    /// `pnl / total_capital`.
    pub pnl_ratio: f64,
    /// Running capital after this trade.
    pub total_capital: f64,
    /// `pnl / invested`.
    pub trade_return: f64,
}

impl TradeRecord {
    pub fn first_entry(&self) -> Option<&Fill> {
        self.entries.first()
    }

    pub fn scale_ins(&self) -> &[Fill] {
        self.entries.get(1..).unwrap_or_default()
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[derive(Debug, Default)]
struct Run {
    buys: Vec<Fill>,
    sells: Vec<Fill>,
    bought: f64,
    sold: f64,
    fees: f64,
}

impl Run {
    fn is_closed(&self) -> bool {
        (self.sold - self.bought).abs() <= SIZE_EPSILON * self.bought
    }

    fn close(self, instrument: Instrument, capital: &mut f64) -> TradeRecord {
        let invested: f64 = self.buys.iter().map(|f| f.price * f.size).sum();
        let proceeds: f64 = self.sells.iter().map(|f| f.price * f.size).sum();
        let pnl = proceeds - invested - self.fees;
        *capital += pnl;

        let date = self.sells.last().map(|f| f.date).unwrap_or_default();
        TradeRecord {
            instrument,
            entries: self.buys,
            exit: Fill {
                date,
                price: proceeds / self.sold,
                size: self.sold,
            },
            invested,
            fees: self.fees,
            pnl,
            pnl_ratio: pnl / *capital,
            total_capital: *capital,
            trade_return: pnl / invested,
        }
    }
}

/// Round trips rebuilt from an order stream, in closing order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct TradeLog {
    initial_capital: f64,
    trades: Vec<TradeRecord>,
    open: Vec<Instrument>,
}

impl TradeLog {
    /// Groups `orders` per instrument into runs that close when the sold size matches the
    /// bought size, and advances a running capital seeded with `initial_capital`.
    ///
    /// ### Returns
    /// `MalformedOrders` for a sell without an open run or a sell larger than the run.
    pub fn from_orders(orders: &[OrderEvent], initial_capital: f64) -> Result<Self> {
        let mut runs: HashMap<&Instrument, Run> = HashMap::new();
        let mut capital = initial_capital;
        let mut trades = Vec::new();

        for order in orders {
            match order.side {
                OrderSide::Buy => {
                    let run = runs.entry(&order.instrument).or_default();
                    run.buys.push(Fill::from(order));
                    run.bought += order.size;
                    run.fees += order.fee;
                }
                OrderSide::Sell => {
                    let run = runs.get_mut(&order.instrument).ok_or_else(|| Error::MalformedOrders {
                        instrument: order.instrument.clone(),
                        reason: format!("sell #{} without an open position", order.id),
                    })?;
                    run.sells.push(Fill::from(order));
                    run.sold += order.size;
                    run.fees += order.fee;
                    if run.sold > run.bought * (1.0 + SIZE_EPSILON) {
                        return Err(Error::MalformedOrders {
                            instrument: order.instrument.clone(),
                            reason: format!("sold {} of {} bought", run.sold, run.bought),
                        });
                    }
                    if run.is_closed()
                        && let Some(run) = runs.remove(&order.instrument)
                    {
                        trades.push(run.close(order.instrument.clone(), &mut capital));
                    }
                }
            }
        }

        let mut open: Vec<Instrument> = runs.into_keys().cloned().collect();
        open.sort();
        Ok(Self {
            initial_capital,
            trades,
            open,
        })
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Running capital after the last trade.
    pub fn final_capital(&self) -> f64 {
        self.trades.last().map_or(self.initial_capital, |t| t.total_capital)
    }

    pub fn total_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    /// Instruments whose last run never closed.
    pub fn open_instruments(&self) -> &[Instrument] {
        &self.open
    }

    /// Largest number of scale-ins in a single trade.
    pub fn max_scale_ins(&self) -> usize {
        self.trades.iter().map(|t| t.scale_ins().len()).max().unwrap_or(0)
    }
}
