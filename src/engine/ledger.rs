use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Instrument, Lot, PositionBook};
use crate::errors::{Error, Result};

/// Cash state of the portfolio at the end of one bar.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerRow {
    /// Cash not tied up in positions.
    pub remaining_cash: f64,
    /// Cash usable for new stakes (`remaining_cash × reserve_fraction`).
    pub available_cash: f64,
    /// `remaining_cash` plus the entry cost of every open lot.
    pub asset_value: f64,
}

/// Per-bar cash accounting shared by every instrument.
///
/// Rows are forward filled: a bar without settlements copies the previous bar.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct CapitalLedger {
    initial_cash: f64,
    reserve_fraction: f64,
    rows: Vec<Option<LedgerRow>>,
}

impl CapitalLedger {
    /// Creates a ledger over `bars` bars with the first row seeded from `initial_cash`.
    pub fn new(initial_cash: f64, reserve_fraction: f64, bars: usize) -> Result<Self> {
        if initial_cash <= 0.0 || !initial_cash.is_finite() {
            return Err(Error::NegZeroBalance(initial_cash));
        }
        if bars == 0 {
            return Err(Error::EmptyIndex);
        }
        let mut ledger = Self {
            initial_cash,
            reserve_fraction,
            rows: vec![None; bars],
        };
        ledger.reset();
        Ok(ledger)
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn row(&self, bar: usize) -> Option<&LedgerRow> {
        self.rows.get(bar).and_then(Option::as_ref)
    }

    /// Every row; `None` for bars the simulation has not reached.
    pub fn rows(&self) -> &[Option<LedgerRow>] {
        &self.rows
    }

    /// Copies the most recent prior row into `bar` when `bar` has none.
    pub fn carry_forward(&mut self, bar: usize) -> Result<()> {
        if bar >= self.rows.len() {
            return Err(Error::BarOutOfRange(bar));
        }
        if self.rows[bar].is_some() {
            return Ok(());
        }
        let prior = self.rows[..bar]
            .iter()
            .rev()
            .find_map(|r| *r)
            .ok_or_else(|| Error::invariant(bar, "no ledger row to carry forward"))?;
        self.rows[bar] = Some(prior);
        Ok(())
    }

    fn current(&self, bar: usize) -> Result<LedgerRow> {
        self.row(bar)
            .copied()
            .ok_or_else(|| Error::invariant(bar, "ledger row missing after carry forward"))
    }

    /// Closes every lot of `instrument` at `exit_price` and credits the proceeds net of fees.
    ///
    /// ### Returns
    /// The size sold.
    pub fn apply_exit(
        &mut self,
        bar: usize,
        book: &mut PositionBook,
        instrument: &Instrument,
        exit_price: f64,
        fee_rate: f64,
    ) -> Result<f64> {
        if exit_price <= 0.0 || !exit_price.is_finite() {
            return Err(Error::InvalidPrice(exit_price));
        }
        let mut row = self.current(bar)?;
        let size = book.remove_all(instrument).map_err(|e| e.at_bar(bar))?;
        row.remaining_cash += exit_price * size * (1.0 - fee_rate);
        self.revalue(bar, row, book)?;
        Ok(size)
    }

    /// Buys `stake_amount / entry_price` units and debits the cost plus fees.
    ///
    /// ### Returns
    /// The new lot, or `InsufficientFunds(stake, available)` with the ledger and book untouched
    /// when the stake exceeds the available cash.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_entry(
        &mut self,
        bar: usize,
        book: &mut PositionBook,
        instrument: &Instrument,
        date: DateTime<Utc>,
        entry_price: f64,
        stake_amount: f64,
        fee_rate: f64,
    ) -> Result<Lot> {
        if entry_price <= 0.0 || !entry_price.is_finite() {
            return Err(Error::InvalidPrice(entry_price));
        }
        let mut row = self.current(bar)?;
        if stake_amount > row.available_cash {
            return Err(Error::InsufficientFunds(stake_amount, row.available_cash));
        }

        let lot = Lot::from((date, entry_price, stake_amount / entry_price));
        let remaining = row.remaining_cash - lot.cost() * (1.0 + fee_rate);
        if remaining < 0.0 {
            return Err(Error::invariant_for(
                bar,
                instrument,
                format!("entry would leave negative remaining cash {remaining}"),
            ));
        }
        book.add_lot(instrument, lot).map_err(|e| e.at_bar(bar))?;
        row.remaining_cash = remaining;
        self.revalue(bar, row, book)?;
        Ok(lot)
    }

    // available cash and asset value always derive from remaining cash and the book
    fn revalue(&mut self, bar: usize, mut row: LedgerRow, book: &PositionBook) -> Result<()> {
        if row.remaining_cash < 0.0 {
            return Err(Error::invariant(
                bar,
                format!("negative remaining cash {}", row.remaining_cash),
            ));
        }
        row.available_cash = row.remaining_cash * self.reserve_fraction;
        row.asset_value = row.remaining_cash + book.cost_basis();
        self.rows[bar] = Some(row);
        Ok(())
    }

    /// Last filled row.
    pub fn last(&self) -> Option<&LedgerRow> {
        self.rows.iter().rev().find_map(Option::as_ref)
    }

    /// Clears every row and seeds bar 0 again.
    pub fn reset(&mut self) {
        self.rows.iter_mut().for_each(|r| *r = None);
        if let Some(first) = self.rows.first_mut() {
            *first = Some(LedgerRow {
                remaining_cash: self.initial_cash,
                available_cash: self.initial_cash * self.reserve_fraction,
                asset_value: self.initial_cash,
            });
        }
    }

    /// Dated rows, for reporting.
    pub fn dated_rows<'a>(&'a self, index: &'a [DateTime<Utc>]) -> impl Iterator<Item = (DateTime<Utc>, LedgerRow)> + 'a {
        index
            .iter()
            .zip(&self.rows)
            .filter_map(|(date, row)| row.map(|r| (*date, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEE: f64 = 0.001;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn new_ledger_seeds_first_row() {
        let ledger = CapitalLedger::new(10_000.0, 0.99, 3).unwrap();
        let row = ledger.row(0).unwrap();
        assert_eq!(row.remaining_cash, 10_000.0);
        assert_eq!(row.available_cash, 9_900.0);
        assert_eq!(row.asset_value, 10_000.0);
        assert!(ledger.row(1).is_none());
    }

    #[test]
    fn new_ledger_rejects_zero_cash() {
        assert!(matches!(CapitalLedger::new(0.0, 0.99, 3), Err(Error::NegZeroBalance(_))));
    }

    #[test]
    fn carry_forward_copies_prior_row() {
        let mut ledger = CapitalLedger::new(1_000.0, 0.99, 3).unwrap();
        ledger.carry_forward(1).unwrap();
        ledger.carry_forward(2).unwrap();
        assert_eq!(ledger.row(2), ledger.row(0));
        assert!(matches!(ledger.carry_forward(3), Err(Error::BarOutOfRange(3))));
    }

    #[test]
    fn entry_then_exit_settles_cash() {
        let mut ledger = CapitalLedger::new(10_000.0, 0.99, 2).unwrap();
        let mut book = PositionBook::new();
        let eth = Instrument::from("ETH_USDT");

        let lot = ledger
            .apply_entry(0, &mut book, &eth, DateTime::default(), 100.0, 1_000.0, FEE)
            .unwrap();
        assert_eq!(lot.size, 10.0);
        let row = *ledger.row(0).unwrap();
        assert!(approx(row.remaining_cash, 10_000.0 - 1_001.0));
        assert!(approx(row.asset_value, row.remaining_cash + 1_000.0));
        assert!(approx(row.available_cash, row.remaining_cash * 0.99));

        ledger.carry_forward(1).unwrap();
        let size = ledger.apply_exit(1, &mut book, &eth, 110.0, FEE).unwrap();
        assert_eq!(size, 10.0);
        let row = ledger.row(1).unwrap();
        assert!(approx(row.remaining_cash, 8_999.0 + 1_100.0 * 0.999));
        assert!(approx(row.asset_value, row.remaining_cash));
        assert!(book.is_empty());
    }

    #[test]
    fn rejected_entry_changes_nothing() {
        let mut ledger = CapitalLedger::new(505.0, 0.99, 1).unwrap();
        let mut book = PositionBook::new();
        let before = *ledger.row(0).unwrap();

        let result = ledger.apply_entry(0, &mut book, &Instrument::from("SOL_USDT"), DateTime::default(), 10.0, 600.0, FEE);
        assert!(matches!(result, Err(Error::InsufficientFunds(600.0, _))));
        assert_eq!(*ledger.row(0).unwrap(), before);
        assert!(book.is_empty());
    }

    #[test]
    fn entry_fee_overdraw_leaves_book_untouched() {
        // no reserve: a stake of all the cash cannot also pay its fee
        let mut ledger = CapitalLedger::new(1_000.0, 1.0, 1).unwrap();
        let mut book = PositionBook::new();
        let before = *ledger.row(0).unwrap();

        let result = ledger.apply_entry(0, &mut book, &Instrument::from("SOL_USDT"), DateTime::default(), 10.0, 1_000.0, 0.01);
        assert!(matches!(result, Err(Error::Invariant { bar: 0, instrument: Some(_), .. })));
        assert_eq!(*ledger.row(0).unwrap(), before);
        assert!(book.is_empty());
    }

    #[test]
    fn exit_without_position_fails() {
        let mut ledger = CapitalLedger::new(1_000.0, 0.99, 1).unwrap();
        let mut book = PositionBook::new();
        let result = ledger.apply_exit(0, &mut book, &Instrument::from("ETH_USDT"), 10.0, FEE);
        assert!(matches!(result, Err(Error::PositionNotFound(_))));
    }

    #[test]
    fn reset_restores_seed() {
        let mut ledger = CapitalLedger::new(1_000.0, 0.99, 2).unwrap();
        let mut book = PositionBook::new();
        ledger
            .apply_entry(0, &mut book, &Instrument::from("ETH_USDT"), DateTime::default(), 10.0, 100.0, FEE)
            .unwrap();
        ledger.carry_forward(1).unwrap();
        ledger.reset();
        assert_eq!(ledger.row(0).unwrap().remaining_cash, 1_000.0);
        assert!(ledger.row(1).is_none());
    }
}
