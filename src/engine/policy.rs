//! Pluggable exit and sizing rules.
//!
//! The simulator is generic over an [`ExitPolicy`] and an [`EntrySizer`]. [`RuleExit`] and
//! [`Sizing`] cover the breakout and trend variants; closures work too.

use chrono::{DateTime, Duration, Timelike, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Candle, ExitReason, Indicators};

/// What an exit policy sees about one open position on one bar.
#[derive(Debug, Clone, Copy)]
pub struct PositionContext {
    pub bar: usize,
    pub date: DateTime<Utc>,
    pub candle: Candle,
    pub indicators: Indicators,
    /// Trend filter exit flag for this instrument and bar.
    pub exit_signal: bool,
    /// Size-weighted entry price over all lots.
    pub entry_price: f64,
    pub last_entry_price: f64,
    /// Entry date of the first lot.
    pub opened_at: DateTime<Utc>,
    pub lots: usize,
}

/// Decides whether an open position closes on the current bar.
pub trait ExitPolicy {
    fn check(&self, ctx: &PositionContext) -> Option<ExitReason>;
}

impl<F> ExitPolicy for F
where
    F: Fn(&PositionContext) -> Option<ExitReason>,
{
    fn check(&self, ctx: &PositionContext) -> Option<ExitReason> {
        self(ctx)
    }
}

/// Close a position held longer than `max_age` on the first bar at `hour`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeExit {
    pub max_age: Duration,
    pub hour: u32,
}

/// Rule-based exits, evaluated in precedence order: stop or breakdown, trend filter, time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RuleExit {
    /// Exit when close <= fraction × weighted entry price.
    pub stop_loss_fraction: Option<f64>,
    /// Exit when low <= rolling low.
    pub breakdown: bool,
    /// Exit on the exit signal.
    pub trend_filter: bool,
    pub time_exit: Option<TimeExit>,
}

impl RuleExit {
    /// Breakdown, benchmark filter and time exits.
    pub fn breakout(time_exit: TimeExit) -> Self {
        Self {
            stop_loss_fraction: None,
            breakdown: true,
            trend_filter: true,
            time_exit: Some(time_exit),
        }
    }

    /// Hard stop and trend filter exits.
    pub fn trend(stop_loss_fraction: f64) -> Self {
        Self {
            stop_loss_fraction: Some(stop_loss_fraction),
            breakdown: false,
            trend_filter: true,
            time_exit: None,
        }
    }
}

impl ExitPolicy for RuleExit {
    fn check(&self, ctx: &PositionContext) -> Option<ExitReason> {
        let close = ctx.candle.close();
        if let Some(fraction) = self.stop_loss_fraction
            && close <= fraction * ctx.entry_price
        {
            return Some(ExitReason::StopLoss);
        }
        if self.breakdown
            && let Some(rolling_low) = ctx.indicators.rolling_low
            && ctx.candle.low() <= rolling_low
        {
            return Some(ExitReason::Breakdown);
        }
        if self.trend_filter && ctx.exit_signal {
            return Some(ExitReason::TrendFilter);
        }
        if let Some(TimeExit { max_age, hour }) = self.time_exit
            && ctx.date - ctx.opened_at > max_age
            && ctx.date.hour() == hour
        {
            return Some(ExitReason::TimeLimit);
        }
        None
    }
}

/// Inputs to a stake computation.
#[derive(Debug, Clone, Copy)]
pub struct SizingContext {
    pub asset_value: f64,
    pub price: f64,
    pub atr: Option<f64>,
}

/// Computes the cash amount to stake on a new entry. `None` skips the entry.
pub trait EntrySizer {
    fn stake_amount(&self, ctx: &SizingContext) -> Option<f64>;
}

impl<F> EntrySizer for F
where
    F: Fn(&SizingContext) -> Option<f64>,
{
    fn stake_amount(&self, ctx: &SizingContext) -> Option<f64> {
        self(ctx)
    }
}

/// Built-in sizing rules.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// `asset_value / slots`.
    EqualWeight { slots: usize },
    /// `asset_value × risk_factor × price / (ATR × reserved_slots)`.
    RiskScaled { risk_factor: f64, reserved_slots: usize },
}

impl EntrySizer for Sizing {
    fn stake_amount(&self, ctx: &SizingContext) -> Option<f64> {
        match *self {
            Self::EqualWeight { slots } => (slots > 0).then(|| ctx.asset_value / slots as f64),
            Self::RiskScaled {
                risk_factor,
                reserved_slots,
            } => {
                let atr = ctx.atr.filter(|atr| *atr > 0.0)?;
                (reserved_slots > 0)
                    .then(|| ctx.asset_value * risk_factor * ctx.price / (atr * reserved_slots as f64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(close: f64, low: f64) -> PositionContext {
        PositionContext {
            bar: 5,
            date: DateTime::from_timestamp(1_700_006_400, 0).unwrap(),
            candle: Candle::from((close, close, low, close, 1.0)),
            indicators: Indicators {
                atr: Some(1.0),
                ma: None,
                rolling_low: Some(90.0),
            },
            exit_signal: false,
            entry_price: 100.0,
            last_entry_price: 100.0,
            opened_at: DateTime::from_timestamp(1_700_006_400, 0).unwrap(),
            lots: 1,
        }
    }

    #[test]
    fn stop_loss_at_half_entry() {
        let policy = RuleExit::trend(0.5);
        assert_eq!(policy.check(&ctx(50.0, 50.0)), Some(ExitReason::StopLoss));
        assert_eq!(policy.check(&ctx(51.0, 51.0)), None);
    }

    #[test]
    fn stop_wins_over_trend_filter() {
        let policy = RuleExit::trend(0.5);
        let mut c = ctx(40.0, 40.0);
        c.exit_signal = true;
        assert_eq!(policy.check(&c), Some(ExitReason::StopLoss));
        c.candle = Candle::from((95.0, 95.0, 95.0, 95.0, 1.0));
        assert_eq!(policy.check(&c), Some(ExitReason::TrendFilter));
    }

    #[test]
    fn breakdown_then_time_exit() {
        let policy = RuleExit::breakout(TimeExit {
            max_age: Duration::days(2),
            hour: 0,
        });
        assert_eq!(policy.check(&ctx(95.0, 89.0)), Some(ExitReason::Breakdown));
        assert_eq!(policy.check(&ctx(95.0, 91.0)), None);

        // 1_700_006_400 is midnight UTC
        let mut c = ctx(95.0, 91.0);
        c.date = c.opened_at + Duration::days(3);
        assert_eq!(policy.check(&c), Some(ExitReason::TimeLimit));
        c.date = c.opened_at + Duration::days(2);
        assert_eq!(policy.check(&c), None);
        c.date = c.opened_at + Duration::days(3) + Duration::hours(1);
        assert_eq!(policy.check(&c), None);
    }

    #[test]
    fn closure_policy() {
        let policy = |c: &PositionContext| (c.lots > 2).then_some(ExitReason::TrendFilter);
        assert_eq!(policy.check(&ctx(100.0, 100.0)), None);
    }

    #[test]
    fn equal_weight_stake() {
        let sizing = Sizing::EqualWeight { slots: 10 };
        let stake = sizing.stake_amount(&SizingContext {
            asset_value: 10_000.0,
            price: 5.0,
            atr: None,
        });
        assert_eq!(stake, Some(1_000.0));
    }

    #[test]
    fn risk_scaled_stake_needs_atr() {
        let sizing = Sizing::RiskScaled {
            risk_factor: 0.01,
            reserved_slots: 3,
        };
        let mut sc = SizingContext {
            asset_value: 9_000.0,
            price: 100.0,
            atr: Some(2.0),
        };
        let stake = sizing.stake_amount(&sc).unwrap();
        assert!((stake - 1_500.0).abs() < 1e-9);
        sc.atr = Some(0.0);
        assert_eq!(sizing.stake_amount(&sc), None);
        sc.atr = None;
        assert_eq!(sizing.stake_amount(&sc), None);
    }
}
