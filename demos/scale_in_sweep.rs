//! # Parallel Scale-In Sweep
//!
//! Compares ATR steps and scale-in counts of the trend preset over the same synthetic data,
//! one simulation per combination on all cores.
use std::sync::Arc;

use chrono::Duration;
use pbts_rs::prelude::*;

#[derive(Clone)]
struct ScaleIns;

impl ParameterCombination for ScaleIns {
    type Output = (f64, usize);

    fn generate() -> Vec<Self::Output> {
        [0.25, 0.5, 0.75, 1.0, 1.5]
            .into_iter()
            .flat_map(|multiple| (0..=4).map(move |count| (multiple, count)))
            .collect()
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let params = PrepareParams::default();
    let universe = Universe::synthetic(&params.benchmark, 25, 500, Duration::days(1), 3)?;
    let (market, signals) = prepare(&universe, Preset::Trend, &params)?;

    let opt = Optimizer::<ScaleIns>::new(Arc::new(market), Arc::new(signals), SimulationConfig::trend());
    let result = opt.with_config(|&(multiple, count), base| {
        Ok(SimulationConfig {
            scale_in_atr_multiple: multiple,
            max_scale_ins: count,
            ..base.clone()
        })
    })?;

    for ((multiple, count), value) in &result {
        println!("step {multiple:.2} ATR, {count} scale-ins: {value:.2}");
    }
    if let Some(((multiple, count), value)) = Optimizer::<ScaleIns>::best(&result) {
        println!("best: step {multiple:.2} ATR, {count} scale-ins ({value:.2})");
    }

    Ok(())
}
