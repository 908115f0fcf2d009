//! Strategy parameter optimization.
//!
//! This module runs one independent simulation per parameter combination. The `Optimizer`
//! struct shares the read-only market data and signals between worker threads, while the
//! `ParameterCombination` trait defines how to generate parameter sets.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{EntrySizer, ExitPolicy, MarketData, SignalSet, SimulationConfig, Simulator};
use crate::errors::Result;

use rayon::prelude::*;

/// Trait defining how to generate parameter combinations for optimization.
///
/// Implement this trait for your parameter types to define how combinations should be generated.
pub trait ParameterCombination: Sync {
    /// Type representing a single parameter combination (e.g., `(usize, f64)`).
    type Output: Clone + Send + Sync;

    /// Generates all possible parameter combinations to test.
    fn generate() -> Vec<Self::Output>;
}

/// Optimizer for testing simulation parameters in parallel.
pub struct Optimizer<PC: ParameterCombination> {
    market: Arc<MarketData>,
    signals: Arc<SignalSet>,
    base: SimulationConfig,
    _marker: PhantomData<PC>,
}

impl<PC: ParameterCombination> Optimizer<PC> {
    /// Creates a new `Optimizer`.
    ///
    /// # Arguments
    /// * `market` - Market data shared by every run.
    /// * `signals` - Signals shared by every run.
    /// * `base` - Configuration each combination starts from.
    pub fn new(market: Arc<MarketData>, signals: Arc<SignalSet>, base: SimulationConfig) -> Self {
        Self {
            market,
            signals,
            base,
            _marker: PhantomData,
        }
    }

    /// Runs a simulation per combination with custom exit and sizing rules.
    ///
    /// # Arguments
    /// * `combinator` - Turns a combination and the base configuration into the configuration
    ///   and policies of one run.
    ///
    /// # Returns
    /// Each parameter combination with the final asset value of its run, in generation order.
    ///
    /// # Errors
    /// Returns the first error raised by a combinator or a simulation.
    pub fn with<X, Z, C>(&self, combinator: C) -> Result<Vec<(PC::Output, f64)>>
    where
        X: ExitPolicy,
        Z: EntrySizer,
        C: Fn(&PC::Output, &SimulationConfig) -> Result<(SimulationConfig, X, Z)> + Sync,
    {
        let num_cpus = num_cpus::get();
        let combinations = PC::generate();
        let chunk_size = combinations.len().div_ceil(num_cpus).max(1);

        combinations
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_combinations| {
                let mut local_results = Vec::with_capacity(par_combinations.len());

                for param_set in par_combinations {
                    let (config, exit_policy, sizer) = combinator(param_set, &self.base)?;
                    let mut sim = Simulator::with_policies(
                        config,
                        Arc::clone(&self.market),
                        Arc::clone(&self.signals),
                        exit_policy,
                        sizer,
                    )?;
                    sim.run()?;
                    local_results.push((param_set.clone(), sim.into_report().final_asset_value()));
                }

                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }

    /// Runs a simulation per combination with the preset rules of each derived configuration.
    pub fn with_config<C>(&self, combinator: C) -> Result<Vec<(PC::Output, f64)>>
    where
        C: Fn(&PC::Output, &SimulationConfig) -> Result<SimulationConfig> + Sync,
    {
        self.with(|params, base| {
            let config = combinator(params, base)?;
            let exit_policy = config.exit_policy();
            let sizing = config.sizing();
            Ok((config, exit_policy, sizing))
        })
    }

    /// Returns the combination with the highest final asset value.
    pub fn best(results: &[(PC::Output, f64)]) -> Option<&(PC::Output, f64)> {
        results.iter().max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
struct ScaleInSteps;

#[cfg(test)]
impl ParameterCombination for ScaleInSteps {
    type Output = (f64, usize);

    fn generate() -> Vec<Self::Output> {
        [0.25, 0.5, 1.0]
            .into_iter()
            .flat_map(|step| (0..=2).map(move |scale_ins| (step, scale_ins)))
            .collect()
    }
}

#[cfg(test)]
fn get_data() -> (Arc<MarketData>, Arc<SignalSet>) {
    use crate::engine::{Candle, RankRow, Series};
    use chrono::{DateTime, Duration};

    let start = DateTime::from_timestamp(1_700_006_400, 0).unwrap();
    let index: Vec<_> = (0..8).map(|i| start + Duration::days(i)).collect();
    let closes = [100.0, 101.0, 102.0, 103.5, 105.0, 104.0, 106.0, 107.0];
    let candles = closes.iter().map(|c| Some(Candle::from((*c, *c, *c, *c, 1.0)))).collect();

    let mut market = MarketData::new(index.clone()).unwrap();
    market
        .insert("ETH_USDT", Series::new(candles).with_atr(vec![Some(2.0); 8]))
        .unwrap();
    let mut entries = vec![false; 8];
    entries[0] = true;
    let signals = SignalSet::new()
        .with_entries("ETH_USDT", entries)
        .with_ranks(index.iter().map(|d| RankRow::from((d.date_naive(), "ETH_USDT", 1))));

    (Arc::new(market), Arc::new(signals))
}

#[cfg(test)]
#[test]
fn optimizer_with_scale_in_steps() {
    let (market, signals) = get_data();
    let opt = Optimizer::<ScaleInSteps>::new(market, signals, SimulationConfig::trend());

    let result = opt
        .with_config(|&(step, scale_ins), base| {
            Ok(SimulationConfig {
                scale_in_atr_multiple: step,
                max_scale_ins: scale_ins,
                ..base.clone()
            })
        })
        .unwrap();

    assert_eq!(result.len(), 9, "one result per combination");
    // a rising market rewards more scale-ins at the same step
    let value = |step: f64, n: usize| result.iter().find(|r| r.0 == (step, n)).map(|r| r.1).unwrap();
    assert!(value(0.25, 2) > value(0.25, 0));
    assert!(Optimizer::<ScaleInSteps>::best(&result).is_some());
}

#[cfg(test)]
#[test]
fn optimizer_propagates_errors() {
    let (market, signals) = get_data();
    let opt = Optimizer::<ScaleInSteps>::new(market, signals, SimulationConfig::trend());
    let result = opt.with_config(|_, base| {
        Ok(SimulationConfig {
            fee_rate: -1.0,
            ..base.clone()
        })
    });
    assert!(result.is_err());
}
