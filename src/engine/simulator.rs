use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::*;
use crate::errors::{Error, Result};

/// Portfolio backtesting engine.
///
/// Walks the bar index once, settling exits, scale-ins and new entries on every bar against
/// one shared cash ledger. The exit rules and the entry sizing are pluggable.
pub struct Simulator<X = RuleExit, Z = Sizing> {
    config: SimulationConfig,
    market: Arc<MarketData>,
    signals: Arc<SignalSet>,
    exit_policy: X,
    sizer: Z,
    book: PositionBook,
    ledger: CapitalLedger,
    orders: Vec<OrderEvent>,
    exited: HashSet<Instrument>,
    unliquidated: Vec<Instrument>,
    next_bar: usize,
}

impl<X, Z> std::ops::Deref for Simulator<X, Z> {
    type Target = CapitalLedger;

    fn deref(&self) -> &Self::Target {
        &self.ledger
    }
}

impl Simulator {
    /// Creates a simulator with the exit and sizing rules of the configured preset.
    ///
    /// ### Example
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use chrono::DateTime;
    /// use pbts_rs::prelude::*;
    ///
    /// let index = vec![DateTime::from_timestamp(0, 0).unwrap()];
    /// let market = MarketData::new(index).unwrap();
    /// let mut sim = Simulator::new(SimulationConfig::breakout(), Arc::new(market), Arc::new(SignalSet::new())).unwrap();
    /// sim.run().unwrap();
    /// assert_eq!(sim.last().unwrap().asset_value, 10_000.0);
    /// ```
    pub fn new(config: SimulationConfig, market: Arc<MarketData>, signals: Arc<SignalSet>) -> Result<Self> {
        config.validate()?;
        let exit_policy = config.exit_policy();
        let sizer = config.sizing();
        Self::with_policies(config, market, signals, exit_policy, sizer)
    }
}

impl<X: ExitPolicy, Z: EntrySizer> Simulator<X, Z> {
    /// Creates a simulator with custom exit and sizing rules.
    ///
    /// ### Arguments
    /// * `config` - Cash, fee, ceiling and scale-in parameters. Validated here.
    /// * `market` - Bar index, candles and indicators.
    /// * `signals` - Entry/exit flags aligned to the bar index and the daily ranking.
    /// * `exit_policy` - Decides when an open position closes.
    /// * `sizer` - Computes the stake of a new entry.
    pub fn with_policies(
        config: SimulationConfig,
        market: Arc<MarketData>,
        signals: Arc<SignalSet>,
        exit_policy: X,
        sizer: Z,
    ) -> Result<Self> {
        config.validate()?;
        market.validate()?;
        signals.validate(&market)?;
        let ledger = CapitalLedger::new(config.initial_cash, config.reserve_fraction, market.len())?;

        Ok(Self {
            config,
            market,
            signals,
            exit_policy,
            sizer,
            book: PositionBook::new(),
            ledger,
            orders: Vec::new(),
            exited: HashSet::new(),
            unliquidated: Vec::new(),
            next_bar: 0,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn market(&self) -> &MarketData {
        &self.market
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn ledger(&self) -> &CapitalLedger {
        &self.ledger
    }

    /// Order events emitted so far, in settlement order.
    pub fn orders(&self) -> &[OrderEvent] {
        &self.orders
    }

    /// Instruments still open after the last bar because their final close was missing.
    pub fn unliquidated(&self) -> &[Instrument] {
        &self.unliquidated
    }

    pub fn is_finished(&self) -> bool {
        self.next_bar >= self.market.len()
    }

    /// Runs the simulation to the last bar.
    pub fn run(&mut self) -> Result<()> {
        self.run_with(|_, _| Ok(()))
    }

    /// Runs the simulation, calling `func` once every bar is fully settled.
    ///
    /// ### Arguments
    /// * `func` - A closure that takes the simulator and the bar just settled.
    ///
    /// ### Returns
    /// Ok if successful, or the first fatal error (invariant violation or inspector error).
    pub fn run_with<F>(&mut self, mut func: F) -> Result<()>
    where
        F: FnMut(&Self, usize) -> Result<()>,
    {
        info!(
            bars = self.market.len(),
            instruments = self.market.instruments().count(),
            initial_cash = self.config.initial_cash,
            preset = ?self.config.preset,
            "simulation started"
        );

        while self.next_bar < self.market.len() {
            let bar = self.next_bar;
            self.step(bar)?;
            self.next_bar += 1;
            func(self, bar)?;
        }

        let last = self.ledger.last().copied();
        info!(
            orders = self.orders.len(),
            asset_value = last.map(|r| r.asset_value),
            unliquidated = self.unliquidated.len(),
            "simulation finished"
        );
        Ok(())
    }

    fn step(&mut self, bar: usize) -> Result<()> {
        let date = self.market.date(bar)?;
        self.ledger.carry_forward(bar)?;
        self.exited.clear();

        if bar + 1 == self.market.len() {
            return self.liquidate(bar, date);
        }

        self.process_exits(bar, date)?;
        self.process_scale_ins(bar, date)?;
        self.process_entries(bar, date)
    }

    fn tradable_candle(&self, instrument: &Instrument, bar: usize) -> Option<Candle> {
        self.market
            .candle(instrument, bar)
            .filter(|c| c.has_tradable_close())
            .copied()
    }

    fn open_instruments(&self) -> Vec<Instrument> {
        self.book.instruments().cloned().collect()
    }

    fn liquidate(&mut self, bar: usize, date: DateTime<Utc>) -> Result<()> {
        for instrument in self.open_instruments() {
            match self.market.close(&instrument, bar) {
                Ok(price) => self.exit(bar, date, &instrument, price, ExitReason::Liquidation)?,
                Err(e) if e.is_recoverable() => {
                    warn!(%instrument, bar, error = %e, "cannot liquidate on the last bar, position left open");
                    self.unliquidated.push(instrument);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn process_exits(&mut self, bar: usize, date: DateTime<Utc>) -> Result<()> {
        for instrument in self.open_instruments() {
            let Some(candle) = self.tradable_candle(&instrument, bar) else {
                warn!(%instrument, bar, "missing candle, exit check skipped");
                continue;
            };
            let lots = self.book.lots(&instrument)?;
            let (Some(first), Some(last)) = (lots.first(), lots.last()) else {
                return Err(Error::invariant_for(bar, &instrument, "empty lot list"));
            };
            let ctx = PositionContext {
                bar,
                date,
                candle,
                indicators: self.market.indicators(&instrument, bar),
                exit_signal: self.signals.exit(&instrument, bar),
                entry_price: self.book.weighted_entry_price(&instrument).map_err(|e| e.at_bar(bar))?,
                last_entry_price: last.entry_price,
                opened_at: first.entry_date,
                lots: lots.len(),
            };
            if let Some(reason) = self.exit_policy.check(&ctx) {
                self.exit(bar, date, &instrument, candle.close(), reason)?;
            }
        }
        Ok(())
    }

    fn process_scale_ins(&mut self, bar: usize, date: DateTime<Utc>) -> Result<()> {
        if self.config.max_scale_ins == 0 {
            return Ok(());
        }
        for instrument in self.open_instruments() {
            let lots = self.book.lots(&instrument)?;
            if lots.len() > self.config.max_scale_ins {
                continue;
            }
            let (Some(first), Some(last)) = (lots.first().copied(), lots.last().copied()) else {
                return Err(Error::invariant_for(bar, &instrument, "empty lot list"));
            };
            // missing candles were already reported by the exit pass
            let Some(candle) = self.tradable_candle(&instrument, bar) else {
                continue;
            };
            let Some(atr) = self.market.indicators(&instrument, bar).atr else {
                debug!(%instrument, bar, "no ATR, scale-in check skipped");
                continue;
            };
            if candle.close() >= last.entry_price + self.config.scale_in_atr_multiple * atr {
                self.admit(bar, date, &instrument, candle.close(), first.cost(), OrderReason::ScaleIn)?;
            }
        }
        Ok(())
    }

    fn process_entries(&mut self, bar: usize, date: DateTime<Utc>) -> Result<()> {
        let ceiling = self.config.max_concurrent_positions;
        if self.book.open_count() >= ceiling {
            return Ok(());
        }

        let day = date.date_naive();
        let mut candidates = Vec::new();
        for instrument in self.signals.entry_candidates(bar) {
            if self.book.has_position(instrument) || self.exited.contains(instrument) {
                continue;
            }
            match self.signals.rank(day, instrument) {
                Some(rank) => candidates.push((rank, instrument.clone())),
                None => debug!(%instrument, bar, "unranked entry candidate skipped"),
            }
        }
        candidates.sort();

        for (rank, instrument) in candidates {
            if self.book.open_count() >= ceiling {
                debug!(bar, open = self.book.open_count(), "position ceiling reached");
                break;
            }
            let Some(candle) = self.tradable_candle(&instrument, bar) else {
                warn!(%instrument, bar, "missing candle, entry skipped");
                continue;
            };
            let row = self
                .ledger
                .row(bar)
                .copied()
                .ok_or_else(|| Error::invariant(bar, "ledger row missing after carry forward"))?;
            let ctx = SizingContext {
                asset_value: row.asset_value,
                price: candle.close(),
                atr: self.market.indicators(&instrument, bar).atr,
            };
            match self.sizer.stake_amount(&ctx) {
                Some(stake) if stake.is_finite() && stake > 0.0 => {
                    debug!(%instrument, bar, rank, stake, "entry candidate");
                    self.admit(bar, date, &instrument, candle.close(), stake, OrderReason::Entry)?;
                }
                _ => warn!(%instrument, bar, "no usable stake, entry skipped"),
            }
        }
        Ok(())
    }

    fn exit(&mut self, bar: usize, date: DateTime<Utc>, instrument: &Instrument, price: f64, reason: ExitReason) -> Result<()> {
        let fee_rate = self.config.fee_rate;
        let size = self
            .ledger
            .apply_exit(bar, &mut self.book, instrument, price, fee_rate)?;
        self.record(date, instrument, (OrderSide::Sell, OrderReason::Exit(reason)), price, size);
        self.exited.insert(instrument.clone());
        debug!(%instrument, bar, price, size, %reason, "position closed");
        Ok(())
    }

    // insufficient cash is an ordinary outcome of admission, everything else is fatal
    fn admit(
        &mut self,
        bar: usize,
        date: DateTime<Utc>,
        instrument: &Instrument,
        price: f64,
        stake: f64,
        reason: OrderReason,
    ) -> Result<()> {
        let fee_rate = self.config.fee_rate;
        match self
            .ledger
            .apply_entry(bar, &mut self.book, instrument, date, price, stake, fee_rate)
        {
            Ok(lot) => {
                self.record(date, instrument, (OrderSide::Buy, reason), price, lot.size);
                debug!(%instrument, bar, price, size = lot.size, %reason, "lot opened");
                Ok(())
            }
            Err(Error::InsufficientFunds(required, available)) => {
                debug!(%instrument, bar, required, available, %reason, "insufficient funds, admission skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn record(&mut self, date: DateTime<Utc>, instrument: &Instrument, kind: (OrderSide, OrderReason), price: f64, size: f64) {
        let id = self.orders.len() as u64;
        self.orders
            .push(OrderEvent::new(id, date, instrument, kind, price, size, self.config.fee_rate));
    }

    /// Resets the simulator to its initial state.
    pub fn reset(&mut self) {
        self.book.clear();
        self.ledger.reset();
        self.orders.clear();
        self.exited.clear();
        self.unliquidated.clear();
        self.next_bar = 0;
    }

    /// Snapshot of the results so far.
    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            initial_cash: self.config.initial_cash,
            ledger: self.ledger.dated_rows(self.market.index()).map(DatedRow::from).collect(),
            orders: self.orders.clone(),
            unliquidated: self.unliquidated.clone(),
        }
    }

    pub fn into_report(self) -> SimulationReport {
        SimulationReport {
            initial_cash: self.config.initial_cash,
            ledger: self.ledger.dated_rows(self.market.index()).map(DatedRow::from).collect(),
            orders: self.orders,
            unliquidated: self.unliquidated,
        }
    }
}

/// Ledger row with its bar date.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatedRow {
    pub date: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub row: LedgerRow,
}

impl From<(DateTime<Utc>, LedgerRow)> for DatedRow {
    fn from((date, row): (DateTime<Utc>, LedgerRow)) -> Self {
        Self { date, row }
    }
}

/// Outputs of a simulation run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub initial_cash: f64,
    pub ledger: Vec<DatedRow>,
    pub orders: Vec<OrderEvent>,
    pub unliquidated: Vec<Instrument>,
}

impl SimulationReport {
    /// Asset value of the last ledger row, or the initial cash when nothing ran.
    pub fn final_asset_value(&self) -> f64 {
        self.ledger.last().map_or(self.initial_cash, |r| r.row.asset_value)
    }

    pub fn total_fees(&self) -> f64 {
        self.orders.iter().map(|o| o.fee).sum()
    }
}
