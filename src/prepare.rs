//! Input preparation: synthetic candles, indicators, signals and the daily ranking.
//!
//! Indicators come from the [`ta`](https://crates.io/crates/ta) crate. Every indicator value is
//! `None` until its window is full, and channel values (rolling low, rolling high) only look at
//! bars strictly before the current one.
//!
//! It needs to enable `prepare` feature to use it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};
use ta::indicators::{AverageTrueRange, Maximum, Minimum, SimpleMovingAverage};
use ta::Next;

use crate::engine::*;
use crate::errors::{Error, Result};

impl ta::Open for Candle {
    fn open(&self) -> f64 {
        Candle::open(self)
    }
}

impl ta::High for Candle {
    fn high(&self) -> f64 {
        Candle::high(self)
    }
}

impl ta::Low for Candle {
    fn low(&self) -> f64 {
        Candle::low(self)
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        Candle::close(self)
    }
}

impl ta::Volume for Candle {
    fn volume(&self) -> f64 {
        Candle::volume(self)
    }
}

fn ta_err(e: ta::errors::TaError) -> Error {
    Error::Indicator(format!("{e:?}"))
}

/// Window lengths and cut-offs used to derive the simulation inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareParams {
    pub atr_period: usize,
    pub ma_period: usize,
    /// Window of the rolling low (exits) and rolling high (breakout entries).
    pub channel_period: usize,
    pub benchmark_ma_period: usize,
    /// Bars of turnover summed for the ranking.
    pub turnover_lookback: usize,
    /// Candidates kept per day.
    pub top_n: usize,
    pub benchmark: Instrument,
}

impl Default for PrepareParams {
    fn default() -> Self {
        Self {
            atr_period: 14,
            ma_period: 20,
            channel_period: 21,
            benchmark_ma_period: 50,
            turnover_lookback: 30,
            top_n: 20,
            benchmark: Instrument::from("BTC_USDT"),
        }
    }
}

/// Raw candles of a set of instruments over a shared bar index.
#[derive(Debug, Clone)]
pub struct Universe {
    index: Vec<DateTime<Utc>>,
    candles: BTreeMap<Instrument, Vec<Option<Candle>>>,
}

impl Universe {
    pub fn new(index: Vec<DateTime<Utc>>) -> Self {
        Self {
            index,
            candles: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, instrument: impl Into<Instrument>, candles: Vec<Option<Candle>>) -> Result<()> {
        let instrument = instrument.into();
        if candles.len() != self.index.len() {
            return Err(Error::Misaligned {
                instrument,
                name: "candles",
                expected: self.index.len(),
                got: candles.len(),
            });
        }
        self.candles.insert(instrument, candles);
        Ok(())
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn candles(&self, instrument: &Instrument) -> Option<&[Option<Candle>]> {
        self.candles.get(instrument).map(Vec::as_slice)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.candles.keys()
    }

    /// Deterministic random-walk universe.
    ///
    /// The benchmark is listed from the first bar; the other instruments (`A01_USDT`, ...)
    /// are listed at a random bar within the first quarter and have no candle before it.
    pub fn synthetic(benchmark: &Instrument, instruments: usize, bars: usize, step: Duration, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        // 2023-01-01 00:00:00 UTC
        let start = DateTime::<Utc>::from_timestamp(1_672_531_200, 0).unwrap_or_default();
        let index = (0..bars).map(|i| start + step * i as i32).collect();
        let mut universe = Self::new(index);

        let candles = random_walk(&mut rng, bars, 0, 30_000.0, 0.0005)?;
        universe.insert(benchmark.clone(), candles)?;
        for k in 1..=instruments {
            let listed = rng.random_range(0..(bars / 4).max(1));
            let price = rng.random_range(0.5..200.0);
            let drift = rng.random_range(-0.001..0.003);
            let candles = random_walk(&mut rng, bars, listed, price, drift)?;
            universe.insert(format!("A{k:02}_USDT"), candles)?;
        }
        Ok(universe)
    }
}

fn random_walk(rng: &mut StdRng, bars: usize, listed: usize, mut price: f64, drift: f64) -> Result<Vec<Option<Candle>>> {
    let mut candles = vec![None; listed.min(bars)];
    for _ in listed..bars {
        let open = price;
        let shock: f64 = rng.random_range(-0.03..0.03);
        price = (open * (1.0 + drift + shock)).max(1e-6);
        let wick_up: f64 = rng.random_range(0.0..0.01);
        let wick_down: f64 = rng.random_range(0.0..0.01);
        let candle = CandleBuilder::builder()
            .open(open)
            .high(open.max(price) * (1.0 + wick_up))
            .low(open.min(price) * (1.0 - wick_down))
            .close(price)
            .volume(rng.random_range(1_000.0..50_000.0) / open.sqrt())
            .build()?;
        candles.push(Some(candle));
    }
    Ok(candles)
}

/// ATR, trend moving average and rolling low of one instrument.
pub fn indicator_series(candles: &[Option<Candle>], params: &PrepareParams) -> Result<Series> {
    let mut atr = AverageTrueRange::new(params.atr_period).map_err(ta_err)?;
    let mut ma = SimpleMovingAverage::new(params.ma_period).map_err(ta_err)?;

    let mut atr_values = Vec::with_capacity(candles.len());
    let mut ma_values = Vec::with_capacity(candles.len());
    let mut seen = 0;
    for candle in candles {
        match candle {
            Some(c) => {
                seen += 1;
                let a = atr.next(c);
                let m = ma.next(c.close());
                atr_values.push((seen >= params.atr_period).then_some(a));
                ma_values.push((seen >= params.ma_period).then_some(m));
            }
            None => {
                atr_values.push(None);
                ma_values.push(None);
            }
        }
    }

    Ok(Series::new(candles.to_vec())
        .with_atr(atr_values)
        .with_ma(ma_values)
        .with_rolling_low(rolling_low(candles, params.channel_period)?))
}

/// Lowest low of the `period` bars before each bar.
pub fn rolling_low(candles: &[Option<Candle>], period: usize) -> Result<Vec<Option<f64>>> {
    let mut min = Minimum::new(period).map_err(ta_err)?;
    Ok(prior_window(candles, period, |c| min.next(c.low())))
}

/// Highest high of the `period` bars before each bar.
pub fn rolling_high(candles: &[Option<Candle>], period: usize) -> Result<Vec<Option<f64>>> {
    let mut max = Maximum::new(period).map_err(ta_err)?;
    Ok(prior_window(candles, period, |c| max.next(c.high())))
}

// value at bar i is the window output after feeding bar i - 1
fn prior_window(candles: &[Option<Candle>], period: usize, mut feed: impl FnMut(&Candle) -> f64) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(candles.len());
    let mut last = None;
    let mut seen = 0;
    for candle in candles {
        out.push(last);
        if let Some(c) = candle {
            seen += 1;
            let value = feed(c);
            last = (seen >= period).then_some(value);
        }
    }
    out
}

/// True while the benchmark closes above its moving average. False during warm-up and gaps.
pub fn benchmark_filter(candles: &[Option<Candle>], period: usize) -> Result<Vec<bool>> {
    let mut sma = SimpleMovingAverage::new(period).map_err(ta_err)?;
    let mut seen = 0;
    Ok(candles
        .iter()
        .map(|candle| match candle {
            Some(c) => {
                seen += 1;
                let avg = sma.next(c.close());
                seen >= period && c.close() > avg
            }
            None => false,
        })
        .collect())
}

/// Trend entries (close above its moving average in a bull market) and exits (close below it,
/// or a bear market).
pub fn trend_signals(series: &Series, filter: &[bool]) -> (Vec<bool>, Vec<bool>) {
    (0..series.len())
        .map(|bar| {
            let bull = filter.get(bar).copied().unwrap_or(false);
            match (series.candle(bar), series.indicators(bar).ma) {
                (Some(c), Some(ma)) => (bull && c.close() > ma, !bull || c.close() < ma),
                _ => (false, !bull),
            }
        })
        .unzip()
}

/// Breakout entries (high touching the prior channel high in a bull market) and exits (bear market).
pub fn breakout_signals(series: &Series, channel_high: &[Option<f64>], filter: &[bool]) -> (Vec<bool>, Vec<bool>) {
    (0..series.len())
        .map(|bar| {
            let bull = filter.get(bar).copied().unwrap_or(false);
            let high = channel_high.get(bar).copied().flatten();
            let entry = match (series.candle(bar), high) {
                (Some(c), Some(h)) => bull && c.high() >= h,
                _ => false,
            };
            (entry, !bull)
        })
        .unzip()
}

/// Dense ranking per calendar day by trailing turnover, highest first, cut at `top_n`.
///
/// Turnover is summed over the `lookback` bars preceding the first bar of each day, so a
/// day's ranking only sees bars that closed before it opens. Days without prior bars get no rows.
/// Instruments in `excluded` never appear.
pub fn turnover_ranks(universe: &Universe, lookback: usize, top_n: usize, excluded: &BTreeSet<Instrument>) -> Vec<RankRow> {
    let mut first_bar_of_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for (bar, date) in universe.index().iter().enumerate() {
        first_bar_of_day.entry(date.date_naive()).or_insert(bar);
    }

    let mut rows = Vec::new();
    for (day, first) in first_bar_of_day {
        let from = first.saturating_sub(lookback.max(1));
        let mut turnovers: Vec<(f64, &Instrument)> = universe
            .candles
            .iter()
            .filter(|(instrument, _)| !excluded.contains(*instrument))
            .filter_map(|(instrument, candles)| {
                let total: f64 = candles[from..first].iter().flatten().map(Candle::turnover).sum();
                (total > 0.0).then_some((total, instrument))
            })
            .collect();
        turnovers.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        let mut rank = 0;
        let mut previous = None;
        for (total, instrument) in turnovers {
            if previous != Some(total) {
                rank += 1;
                previous = Some(total);
            }
            if (rank as usize) > top_n {
                break;
            }
            rows.push(RankRow {
                date: day,
                instrument: instrument.clone(),
                rank,
            });
        }
    }
    rows
}

/// Builds the market data and signals of a preset from raw candles.
pub fn prepare(universe: &Universe, preset: Preset, params: &PrepareParams) -> Result<(MarketData, SignalSet)> {
    let bench_candles = universe
        .candles(&params.benchmark)
        .ok_or_else(|| Error::MissingData {
            instrument: params.benchmark.clone(),
            bar: 0,
            what: "benchmark candles",
        })?;
    let filter = benchmark_filter(bench_candles, params.benchmark_ma_period)?;

    let mut market = MarketData::new(universe.index().to_vec())?;
    let mut signals = SignalSet::new();
    for (instrument, candles) in &universe.candles {
        let series = indicator_series(candles, params)?;
        if instrument != &params.benchmark {
            let (entries, exits) = match preset {
                Preset::Trend => trend_signals(&series, &filter),
                Preset::Breakout => {
                    let high = rolling_high(candles, params.channel_period)?;
                    breakout_signals(&series, &high, &filter)
                }
            };
            signals = signals.with_entries(instrument.clone(), entries).with_exits(instrument.clone(), exits);
        }
        market.insert(instrument.clone(), series)?;
    }

    let excluded = BTreeSet::from([params.benchmark.clone()]);
    let signals = signals.with_ranks(turnover_ranks(universe, params.turnover_lookback, params.top_n, &excluded));
    Ok((market, signals))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(n: usize, price: f64, volume: f64) -> Vec<Option<Candle>> {
        (0..n).map(|_| Some(Candle::from((price, price, price, price, volume)))).collect()
    }

    #[test]
    fn synthetic_universe_is_deterministic() {
        let btc = Instrument::from("BTC_USDT");
        let a = Universe::synthetic(&btc, 3, 50, Duration::days(1), 7).unwrap();
        let b = Universe::synthetic(&btc, 3, 50, Duration::days(1), 7).unwrap();
        assert_eq!(a.instruments().count(), 4);
        assert_eq!(a.candles(&btc), b.candles(&btc));
        assert!(a.candles(&btc).unwrap().iter().all(Option::is_some));
    }

    #[test]
    fn warm_up_values_are_none() {
        let params = PrepareParams {
            atr_period: 3,
            ma_period: 4,
            channel_period: 2,
            ..Default::default()
        };
        let mut candles = flat(6, 10.0, 1.0);
        candles[0] = None;
        let series = indicator_series(&candles, &params).unwrap();
        assert_eq!(series.indicators(2).atr, None);
        assert!(series.indicators(3).atr.is_some());
        assert_eq!(series.indicators(3).ma, None);
        assert_eq!(series.indicators(4).ma, Some(10.0));
        // two prior candles are needed: bars 1 and 2
        assert_eq!(series.indicators(2).rolling_low, None);
        assert_eq!(series.indicators(3).rolling_low, Some(10.0));
    }

    #[test]
    fn channels_exclude_current_bar() {
        let candles: Vec<_> = [5.0, 6.0, 7.0, 3.0]
            .iter()
            .map(|p| Some(Candle::from((*p, *p, *p, *p, 1.0))))
            .collect();
        let low = rolling_low(&candles, 2).unwrap();
        let high = rolling_high(&candles, 2).unwrap();
        assert_eq!(low, vec![None, None, Some(5.0), Some(6.0)]);
        assert_eq!(high, vec![None, None, Some(6.0), Some(7.0)]);
    }

    #[test]
    fn benchmark_filter_waits_for_warm_up() {
        let candles: Vec<_> = [1.0, 2.0, 3.0, 1.0]
            .iter()
            .map(|p| Some(Candle::from((*p, *p, *p, *p, 1.0))))
            .collect();
        assert_eq!(benchmark_filter(&candles, 2).unwrap(), vec![false, true, true, false]);
    }

    #[test]
    fn ranks_by_turnover_without_benchmark() {
        let index: Vec<_> = (0..3).map(|i| DateTime::<Utc>::default() + Duration::days(i)).collect();
        let mut universe = Universe::new(index);
        universe.insert("BTC_USDT", flat(3, 100.0, 100.0)).unwrap();
        universe.insert("AAA_USDT", flat(3, 1.0, 10.0)).unwrap();
        universe.insert("BBB_USDT", flat(3, 2.0, 10.0)).unwrap();
        universe.insert("CCC_USDT", flat(3, 1.0, 10.0)).unwrap();

        let excluded = BTreeSet::from([Instrument::from("BTC_USDT")]);
        let rows = turnover_ranks(&universe, 2, 2, &excluded);
        let day = |d: i64| -> Vec<_> {
            let date = (DateTime::<Utc>::default() + Duration::days(d)).date_naive();
            rows.iter()
                .filter(|r| r.date == date)
                .map(|r| (r.instrument.as_str(), r.rank))
                .collect()
        };
        // nothing traded before the first day
        assert!(day(0).is_empty());
        // AAA and CCC tie for dense rank 2
        assert_eq!(day(1), vec![("BBB_USDT", 1), ("AAA_USDT", 2), ("CCC_USDT", 2)]);
        assert!(rows.iter().all(|r| r.instrument.as_str() != "BTC_USDT"));
    }

    #[test]
    fn ranks_ignore_bars_of_the_same_day() {
        // four 6h bars per day, AAA only trades on the last bar of day 0
        let index: Vec<_> = (0..8).map(|i| DateTime::<Utc>::default() + Duration::hours(6 * i)).collect();
        let mut aaa = vec![None; 8];
        aaa[3] = Some(Candle::from((1.0, 1.0, 1.0, 1.0, 100.0)));
        let mut universe = Universe::new(index);
        universe.insert("AAA_USDT", aaa).unwrap();
        universe.insert("BBB_USDT", flat(8, 1.0, 10.0)).unwrap();

        let rows = turnover_ranks(&universe, 4, 1, &BTreeSet::new());
        let day0 = DateTime::<Utc>::default().date_naive();
        assert!(rows.iter().all(|r| r.date != day0));
        let day1: Vec<_> = rows.iter().map(|r| (r.instrument.as_str(), r.rank)).collect();
        assert_eq!(day1, vec![("AAA_USDT", 1)]);
    }

    #[test]
    fn breakout_entry_on_a_touched_high() {
        let candles = vec![
            Some(Candle::from((1.0, 2.0, 1.0, 1.5, 1.0))),
            Some(Candle::from((1.5, 2.0, 1.0, 1.8, 1.0))),
            Some(Candle::from((1.8, 1.9, 1.0, 1.8, 1.0))),
        ];
        let series = Series::new(candles);
        let high = vec![None, Some(2.0), Some(2.0)];
        let (entries, exits) = breakout_signals(&series, &high, &[true, true, false]);
        // the close stays below the channel but the high reaches it
        assert_eq!(entries, vec![false, true, false]);
        assert_eq!(exits, vec![false, false, true]);
    }

    #[test]
    fn prepare_builds_aligned_inputs() {
        let params = PrepareParams::default();
        let universe = Universe::synthetic(&params.benchmark, 5, 120, Duration::days(1), 42).unwrap();
        for preset in [Preset::Trend, Preset::Breakout] {
            let (market, signals) = prepare(&universe, preset, &params).unwrap();
            assert!(signals.validate(&market).is_ok());
            assert_eq!(market.instruments().count(), 6);
            assert!(!signals.entry(&params.benchmark, 100));
        }
    }
}
