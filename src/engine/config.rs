use chrono::Duration;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{RuleExit, Sizing, TimeExit};
use crate::errors::{Error, Result};

/// Strategy variant a configuration preset reproduces.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    /// Equal-weight breakout entries with breakdown, filter and time exits, no scale-in.
    Breakout,
    /// Risk-scaled trend entries with a hard stop, filter exit and ATR scale-ins.
    #[default]
    Trend,
}

/// Simulation parameters.
///
/// Missing fields fall back to [`SimulationConfig::default`] when loading from JSON.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub initial_cash: f64,
    /// Fee per fill as a fraction of notional (0.001 = 0.1%).
    pub fee_rate: f64,
    pub max_concurrent_positions: usize,
    /// Lots allowed on top of the first entry.
    pub max_scale_ins: usize,
    /// Scale in when close >= last entry + multiple × ATR.
    pub scale_in_atr_multiple: f64,
    pub stop_loss_fraction: f64,
    /// Share of remaining cash usable for new stakes.
    pub reserve_fraction: f64,
    pub risk_factor: f64,
    pub reserved_slots: usize,
    pub equal_weight_slots: usize,
    pub max_holding_days: i64,
    pub time_exit_hour: u32,
    pub preset: Preset,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_cash: 10_000.0,
            fee_rate: 0.001,
            max_concurrent_positions: 10,
            max_scale_ins: 2,
            scale_in_atr_multiple: 0.25,
            stop_loss_fraction: 0.5,
            reserve_fraction: 0.99,
            risk_factor: 0.01,
            reserved_slots: 3,
            equal_weight_slots: 10,
            max_holding_days: 2,
            time_exit_hour: 0,
            preset: Preset::Trend,
        }
    }
}

impl SimulationConfig {
    pub fn breakout() -> Self {
        Self {
            max_scale_ins: 0,
            preset: Preset::Breakout,
            ..Default::default()
        }
    }

    pub fn trend() -> Self {
        Self::default()
    }

    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Breakout => Self::breakout(),
            Preset::Trend => Self::trend(),
        }
    }

    /// Rejects values the simulator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, v: f64, max: f64| {
            if v.is_finite() && (0.0..=max).contains(&v) {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{name} must be within [0, {max}] (got {v})")))
            }
        };

        if self.initial_cash <= 0.0 || !self.initial_cash.is_finite() {
            return Err(Error::NegZeroBalance(self.initial_cash));
        }
        fraction("fee_rate", self.fee_rate, 0.5)?;
        fraction("reserve_fraction", self.reserve_fraction, 1.0)?;
        fraction("stop_loss_fraction", self.stop_loss_fraction, 1.0)?;
        fraction("risk_factor", self.risk_factor, 1.0)?;
        if !self.scale_in_atr_multiple.is_finite() || self.scale_in_atr_multiple < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "scale_in_atr_multiple must be non-negative (got {})",
                self.scale_in_atr_multiple
            )));
        }
        // stakes are capped by available cash, so the fee must fit into the reserve
        if self.reserve_fraction * (1.0 + self.fee_rate) > 1.0 {
            return Err(Error::InvalidConfig(
                "reserve_fraction × (1 + fee_rate) must not exceed 1".to_owned(),
            ));
        }
        if self.max_concurrent_positions == 0 {
            return Err(Error::InvalidConfig("max_concurrent_positions must be at least 1".to_owned()));
        }
        if self.reserved_slots == 0 || self.equal_weight_slots == 0 {
            return Err(Error::InvalidConfig("sizing slots must be at least 1".to_owned()));
        }
        let holding = Duration::try_days(self.max_holding_days);
        if self.max_holding_days < 0 || holding.is_none() || self.time_exit_hour > 23 {
            return Err(Error::InvalidConfig(format!(
                "invalid time exit ({} days at hour {})",
                self.max_holding_days, self.time_exit_hour
            )));
        }
        Ok(())
    }

    /// Exit rules of the configured preset.
    pub fn exit_policy(&self) -> RuleExit {
        match self.preset {
            Preset::Breakout => RuleExit::breakout(TimeExit {
                max_age: Duration::try_days(self.max_holding_days).unwrap_or(Duration::MAX),
                hour: self.time_exit_hour,
            }),
            Preset::Trend => RuleExit::trend(self.stop_loss_fraction),
        }
    }

    /// Sizing rule of the configured preset.
    pub fn sizing(&self) -> Sizing {
        match self.preset {
            Preset::Breakout => Sizing::EqualWeight {
                slots: self.equal_weight_slots,
            },
            Preset::Trend => Sizing::RiskScaled {
                risk_factor: self.risk_factor,
                reserved_slots: self.reserved_slots,
            },
        }
    }

    #[cfg(feature = "serde")]
    /// Reads a configuration from a JSON file and validates it.
    pub fn from_file(filepath: impl AsRef<std::path::Path>) -> Result<Self> {
        use std::{fs::File, io::BufReader};

        let file = File::open(filepath)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_positions, 10);
        assert_eq!(config.reserve_fraction, 0.99);
        assert!(SimulationConfig::breakout().validate().is_ok());
    }

    #[test]
    fn presets_pick_policies() {
        let breakout = SimulationConfig::breakout();
        assert_eq!(breakout.max_scale_ins, 0);
        assert_eq!(breakout.sizing(), Sizing::EqualWeight { slots: 10 });
        assert!(breakout.exit_policy().breakdown);

        let trend = SimulationConfig::trend();
        assert_eq!(trend.exit_policy().stop_loss_fraction, Some(0.5));
        assert!(matches!(trend.sizing(), Sizing::RiskScaled { reserved_slots: 3, .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = SimulationConfig {
            fee_rate: -0.1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SimulationConfig {
            initial_cash: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::NegZeroBalance(_))));

        let config = SimulationConfig {
            reserve_fraction: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SimulationConfig {
            max_concurrent_positions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn holding_period_must_fit_a_duration() {
        let config = SimulationConfig {
            max_holding_days: 200_000_000_000_000,
            ..SimulationConfig::breakout()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        // building the policy alone never panics
        assert_eq!(config.exit_policy().time_exit.map(|t| t.max_age), Some(Duration::MAX));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_uses_defaults() {
        let config: SimulationConfig = serde_json::from_str(r#"{"fee_rate": 0.002, "preset": "breakout"}"#).unwrap();
        assert_eq!(config.fee_rate, 0.002);
        assert_eq!(config.initial_cash, 10_000.0);
        assert_eq!(config.preset, Preset::Breakout);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn oversized_holding_period_from_json_is_rejected() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"preset": "breakout", "max_holding_days": 200000000000000}"#).unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
