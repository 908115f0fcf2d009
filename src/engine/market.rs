use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Candle;
use crate::errors::{Error, Result};

/// Trading pair identifier, e.g. `ETH_USDT`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instrument(String);

impl Instrument {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Instrument {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Instrument {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Indicator values of one instrument at one bar. `None` means not yet warmed up or absent.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Indicators {
    /// Average true range.
    pub atr: Option<f64>,
    /// Trend moving average.
    pub ma: Option<f64>,
    /// Rolling minimum of lows, used by breakdown exits.
    pub rolling_low: Option<f64>,
}

/// Candles and precomputed indicators of one instrument, one slot per bar.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct Series {
    candles: Vec<Option<Candle>>,
    #[cfg_attr(feature = "serde", serde(default))]
    atr: Vec<Option<f64>>,
    #[cfg_attr(feature = "serde", serde(default))]
    ma: Vec<Option<f64>>,
    #[cfg_attr(feature = "serde", serde(default))]
    rolling_low: Vec<Option<f64>>,
}

impl Series {
    /// Creates a series from candles aligned to the bar index (`None` for gaps).
    pub fn new(candles: Vec<Option<Candle>>) -> Self {
        Self {
            candles,
            ..Default::default()
        }
    }

    pub fn with_atr(mut self, atr: Vec<Option<f64>>) -> Self {
        self.atr = atr;
        self
    }

    pub fn with_ma(mut self, ma: Vec<Option<f64>>) -> Self {
        self.ma = ma;
        self
    }

    pub fn with_rolling_low(mut self, rolling_low: Vec<Option<f64>>) -> Self {
        self.rolling_low = rolling_low;
        self
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candle(&self, bar: usize) -> Option<&Candle> {
        self.candles.get(bar).and_then(Option::as_ref)
    }

    pub fn candles(&self) -> &[Option<Candle>] {
        &self.candles
    }

    pub fn indicators(&self, bar: usize) -> Indicators {
        let at = |values: &[Option<f64>]| values.get(bar).copied().flatten().filter(|v| v.is_finite());
        Indicators {
            atr: at(&self.atr),
            ma: at(&self.ma),
            rolling_low: at(&self.rolling_low),
        }
    }

    /// Index of the last bar carrying a candle.
    pub fn last_bar(&self) -> Option<usize> {
        self.candles.iter().rposition(Option::is_some)
    }

    // indicator vectors may be empty (not supplied) or exactly one value per bar
    fn check_alignment(&self, instrument: &Instrument, bars: usize) -> Result<()> {
        let vectors: [(&'static str, usize, bool); 4] = [
            ("candles", self.candles.len(), false),
            ("atr", self.atr.len(), true),
            ("ma", self.ma.len(), true),
            ("rolling_low", self.rolling_low.len(), true),
        ];
        for (name, got, optional) in vectors {
            if got != bars && !(optional && got == 0) {
                return Err(Error::Misaligned {
                    instrument: instrument.clone(),
                    name,
                    expected: bars,
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Read-only price data of the whole universe over a shared bar index.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct MarketData {
    index: Arc<[DateTime<Utc>]>,
    series: BTreeMap<Instrument, Series>,
}

impl MarketData {
    /// Creates an empty universe over `index`, which must be non-empty and strictly increasing.
    pub fn new(index: Vec<DateTime<Utc>>) -> Result<Self> {
        let market = Self {
            index: Arc::from(index),
            series: BTreeMap::new(),
        };
        market.check_index()?;
        Ok(market)
    }

    /// Adds (or replaces) the series of an instrument.
    pub fn insert(&mut self, instrument: impl Into<Instrument>, series: Series) -> Result<()> {
        let instrument = instrument.into();
        series.check_alignment(&instrument, self.index.len())?;
        self.series.insert(instrument, series);
        Ok(())
    }

    /// Checks the index and every series; used after deserialization.
    pub fn validate(&self) -> Result<()> {
        self.check_index()?;
        for (instrument, series) in &self.series {
            series.check_alignment(instrument, self.index.len())?;
        }
        Ok(())
    }

    fn check_index(&self) -> Result<()> {
        if self.index.is_empty() {
            return Err(Error::EmptyIndex);
        }
        if let Some(pos) = self.index.windows(2).position(|w| w[0] >= w[1]) {
            return Err(Error::UnorderedIndex(pos + 1));
        }
        Ok(())
    }

    /// Number of bars.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn date(&self, bar: usize) -> Result<DateTime<Utc>> {
        self.index.get(bar).copied().ok_or(Error::BarOutOfRange(bar))
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.series.keys()
    }

    pub fn series(&self, instrument: &Instrument) -> Option<&Series> {
        self.series.get(instrument)
    }

    pub fn candle(&self, instrument: &Instrument, bar: usize) -> Option<&Candle> {
        self.series.get(instrument).and_then(|s| s.candle(bar))
    }

    /// Close usable for settlement, or a `MissingData` error.
    pub fn close(&self, instrument: &Instrument, bar: usize) -> Result<f64> {
        self.candle(instrument, bar)
            .filter(|c| c.has_tradable_close())
            .map(Candle::close)
            .ok_or_else(|| Error::MissingData {
                instrument: instrument.clone(),
                bar,
                what: "close",
            })
    }

    pub fn indicators(&self, instrument: &Instrument, bar: usize) -> Indicators {
        self.series
            .get(instrument)
            .map(|s| s.indicators(bar))
            .unwrap_or_default()
    }

    #[cfg(feature = "serde")]
    /// Reads market data from a JSON file and validates it.
    pub fn from_file(filepath: impl AsRef<std::path::Path>) -> Result<Self> {
        use std::{fs::File, io::BufReader};

        let file = File::open(filepath)?;
        let market: Self = serde_json::from_reader(BufReader::new(file))?;
        market.validate()?;
        Ok(market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn index(n: usize) -> Vec<DateTime<Utc>> {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        (0..n).map(|i| start + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn empty_index_is_rejected() {
        assert!(matches!(MarketData::new(vec![]), Err(Error::EmptyIndex)));
    }

    #[test]
    fn unordered_index_is_rejected() {
        let mut idx = index(3);
        idx.swap(1, 2);
        assert!(matches!(MarketData::new(idx), Err(Error::UnorderedIndex(1))));
    }

    #[test]
    fn misaligned_series_is_rejected() {
        let mut market = MarketData::new(index(3)).unwrap();
        let series = Series::new(vec![Some(Candle::from((1.0, 1.0, 1.0, 1.0, 1.0)))]);
        let result = market.insert("BTC_USDT", series);
        assert!(matches!(result, Err(Error::Misaligned { name: "candles", got: 1, .. })));

        let candles = vec![Some(Candle::from((1.0, 1.0, 1.0, 1.0, 1.0))); 3];
        let series = Series::new(candles).with_atr(vec![Some(1.0)]);
        let result = market.insert("BTC_USDT", series);
        assert!(matches!(result, Err(Error::Misaligned { name: "atr", .. })));
    }

    #[test]
    fn gaps_surface_as_missing_data() {
        let mut market = MarketData::new(index(3)).unwrap();
        let candles = vec![Some(Candle::from((1.0, 1.0, 1.0, 1.0, 1.0))), None, None];
        market
            .insert("SOL_USDT", Series::new(candles).with_atr(vec![Some(0.1), Some(f64::NAN), None]))
            .unwrap();
        let sol = Instrument::from("SOL_USDT");

        assert_eq!(market.close(&sol, 0).unwrap(), 1.0);
        assert!(matches!(market.close(&sol, 1), Err(Error::MissingData { bar: 1, .. })));
        assert_eq!(market.indicators(&sol, 0).atr, Some(0.1));
        assert_eq!(market.indicators(&sol, 1).atr, None);
        assert_eq!(market.series(&sol).unwrap().last_bar(), Some(0));
        assert!(market.close(&Instrument::from("XRP_USDT"), 0).is_err());
    }
}
