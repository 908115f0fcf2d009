use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Instrument;
use crate::errors::{Error, Result};

/// One fill of an open position. A first entry and each scale-in are separate lots.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lot {
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub size: f64,
}

type L = (DateTime<Utc>, f64, f64);
impl From<L> for Lot {
    fn from((entry_date, entry_price, size): L) -> Self {
        Self {
            entry_date,
            entry_price,
            size,
        }
    }
}

impl Lot {
    /// Entry price times size, without fees.
    pub fn cost(&self) -> f64 {
        self.entry_price * self.size
    }

    fn is_valid(&self) -> bool {
        self.size.is_finite() && self.size > 0.0 && self.entry_price.is_finite() && self.entry_price > 0.0
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
struct Holding {
    instrument: Instrument,
    lots: Vec<Lot>,
}

/// Open lots per instrument, iterated in the order positions were opened.
///
/// Invariant: an instrument present in the book holds at least one lot.
/// Invariant errors raised here carry bar 0; the ledger re-stamps them with the bar being settled.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    holdings: Vec<Holding>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn holding(&self, instrument: &Instrument) -> Option<&Holding> {
        self.holdings.iter().find(|h| &h.instrument == instrument)
    }

    pub fn has_position(&self, instrument: &Instrument) -> bool {
        self.holding(instrument).is_some()
    }

    pub fn open_count(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Appends a lot, opening the instrument if it was flat.
    ///
    /// No cash or ceiling checks happen here; that is the caller's admission control.
    ///
    /// ### Returns
    /// An invariant error for a non-positive or non-finite size or price.
    pub fn add_lot(&mut self, instrument: &Instrument, lot: Lot) -> Result<()> {
        if !lot.is_valid() {
            let reason = format!("invalid lot (price={}, size={})", lot.entry_price, lot.size);
            return Err(Error::invariant_for(0, instrument, reason));
        }
        match self.holdings.iter_mut().find(|h| &h.instrument == instrument) {
            Some(holding) => holding.lots.push(lot),
            None => self.holdings.push(Holding {
                instrument: instrument.clone(),
                lots: vec![lot],
            }),
        }
        Ok(())
    }

    /// Removes every lot of the instrument and returns the total size.
    pub fn remove_all(&mut self, instrument: &Instrument) -> Result<f64> {
        let idx = self
            .holdings
            .iter()
            .position(|h| &h.instrument == instrument)
            .ok_or_else(|| Error::PositionNotFound(instrument.clone()))?;
        let holding = self.holdings.remove(idx);
        if holding.lots.is_empty() {
            return Err(Error::invariant_for(0, instrument, "empty lot list"));
        }
        Ok(holding.lots.iter().map(|l| l.size).sum())
    }

    /// Size-weighted average entry price.
    pub fn weighted_entry_price(&self, instrument: &Instrument) -> Result<f64> {
        let lots = self.lots(instrument)?;
        let size: f64 = lots.iter().map(|l| l.size).sum();
        if size <= 0.0 {
            return Err(Error::invariant_for(0, instrument, "empty lot list"));
        }
        Ok(lots.iter().map(Lot::cost).sum::<f64>() / size)
    }

    /// Number of open lots (1 after the first entry, +1 per scale-in). Zero when flat.
    pub fn scale_in_count(&self, instrument: &Instrument) -> usize {
        self.holding(instrument).map_or(0, |h| h.lots.len())
    }

    pub fn lots(&self, instrument: &Instrument) -> Result<&[Lot]> {
        self.holding(instrument)
            .map(|h| h.lots.as_slice())
            .ok_or_else(|| Error::PositionNotFound(instrument.clone()))
    }

    /// Open instruments in insertion order.
    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.holdings.iter().map(|h| &h.instrument)
    }

    /// Σ entry price × size over every open lot.
    pub fn cost_basis(&self) -> f64 {
        self.holdings.iter().flat_map(|h| &h.lots).map(Lot::cost).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.holdings.clear();
    }
}
