#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// OHLCV data of one instrument for one bar.
///
/// The timestamp lives on the shared bar index, not on the candle.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    volume: f64,
}

impl From<(f64, f64, f64, f64, f64)> for Candle {
    fn from((open, high, low, close, volume): (f64, f64, f64, f64, f64)) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl Candle {
    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Typical price times volume, the quantity ranked by turnover filters.
    pub fn turnover(&self) -> f64 {
        (self.open + self.high + self.low) / 3.0 * self.volume
    }

    /// Returns true when the close can be used to settle an order.
    pub fn has_tradable_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

/// Validating builder for [`Candle`].
#[derive(Debug, Default)]
pub struct CandleBuilder {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl CandleBuilder {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Builds the candle, rejecting missing fields and inconsistent prices.
    pub fn build(self) -> Result<Candle> {
        let open = self.open.ok_or_else(|| Error::InvalidCandle("missing open".to_owned()))?;
        let high = self.high.ok_or_else(|| Error::InvalidCandle("missing high".to_owned()))?;
        let low = self.low.ok_or_else(|| Error::InvalidCandle("missing low".to_owned()))?;
        let close = self.close.ok_or_else(|| Error::InvalidCandle("missing close".to_owned()))?;
        let volume = self.volume.unwrap_or_default();

        if [open, high, low, close, volume].iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidCandle("non-finite value".to_owned()));
        }
        if low <= 0.0 {
            return Err(Error::InvalidCandle(format!("low must be positive (got {low})")));
        }
        if low > open.min(close) || high < open.max(close) {
            return Err(Error::InvalidCandle(format!(
                "expected low <= open, close <= high (o={open} h={high} l={low} c={close})"
            )));
        }
        if volume < 0.0 {
            return Err(Error::InvalidCandle(format!("negative volume {volume}")));
        }

        Ok(Candle {
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

#[cfg(test)]
#[test]
fn build_valid_candle() {
    let candle = CandleBuilder::builder()
        .open(100.0)
        .high(110.0)
        .low(95.0)
        .close(105.0)
        .volume(2.0)
        .build()
        .unwrap();
    assert_eq!(candle.close(), 105.0);
    assert_eq!(candle.turnover(), (100.0 + 110.0 + 95.0) / 3.0 * 2.0);
    assert!(candle.has_tradable_close());
}

#[cfg(test)]
#[test]
fn build_rejects_inverted_range() {
    let result = CandleBuilder::builder()
        .open(100.0)
        .high(99.0)
        .low(95.0)
        .close(98.0)
        .build();
    assert!(matches!(result, Err(Error::InvalidCandle(_))));
}

#[cfg(test)]
#[test]
fn build_rejects_missing_close() {
    let result = CandleBuilder::builder().open(1.0).high(1.0).low(1.0).build();
    assert!(matches!(result, Err(Error::InvalidCandle(_))));
}

#[cfg(test)]
#[test]
fn tuple_candle_is_unchecked() {
    let candle = Candle::from((1.0, 1.0, 1.0, f64::NAN, 0.0));
    assert!(!candle.has_tradable_close());
}
