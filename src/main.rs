//! Portfolio backtest simulator CLI.
//!
//! Runs a simulation from JSON inputs or from synthetic data, writes the order, trade and
//! capital tables as CSV and prints the metrics.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pbts_rs::export;
use pbts_rs::prelude::*;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Portfolio backtest simulator CLI.
#[derive(Parser)]
#[command(name = "pbts")]
#[command(about = "Replay ranked entry and exit signals over many instruments with one shared cash pool", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate JSON market data and signals
    Run {
        /// Market data JSON file
        #[arg(short, long)]
        market: PathBuf,

        /// Signals JSON file
        #[arg(short, long)]
        signals: PathBuf,

        /// Simulation config JSON file (preset defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overrides the preset of the config
        #[arg(short, long)]
        preset: Option<PresetArg>,

        /// Directory receiving the CSV files
        #[arg(short, long, default_value = "out")]
        out_dir: PathBuf,
    },

    /// Simulate a synthetic universe
    Demo {
        #[command(flatten)]
        synthetic: SyntheticArgs,

        /// Directory receiving the CSV files
        #[arg(short, long, default_value = "out")]
        out_dir: PathBuf,
    },

    /// Sweep scale-in ATR multiples and counts over a synthetic universe
    Sweep {
        #[command(flatten)]
        synthetic: SyntheticArgs,
    },
}

#[derive(Args)]
struct SyntheticArgs {
    /// Number of instruments besides the benchmark
    #[arg(short, long, default_value = "20")]
    instruments: usize,

    /// Number of bars
    #[arg(short, long, default_value = "365")]
    bars: usize,

    /// Hours between two bars
    #[arg(long, default_value = "24")]
    step_hours: i64,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    #[arg(short, long, value_enum, default_value = "trend")]
    preset: PresetArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    Breakout,
    Trend,
}

impl From<PresetArg> for Preset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Breakout => Preset::Breakout,
            PresetArg::Trend => Preset::Trend,
        }
    }
}

struct ScaleInGrid;

impl ParameterCombination for ScaleInGrid {
    type Output = (f64, usize);

    fn generate() -> Vec<Self::Output> {
        [0.25, 0.5, 0.75, 1.0]
            .into_iter()
            .flat_map(|multiple| (0..=3).map(move |count| (multiple, count)))
            .collect()
    }
}

fn synthetic_inputs(args: &SyntheticArgs) -> Result<(SimulationConfig, MarketData, SignalSet)> {
    let preset = Preset::from(args.preset);
    let params = PrepareParams::default();
    let universe = Universe::synthetic(
        &params.benchmark,
        args.instruments,
        args.bars,
        Duration::hours(args.step_hours),
        args.seed,
    )?;
    let (market, signals) = prepare(&universe, preset, &params)?;
    Ok((SimulationConfig::for_preset(preset), market, signals))
}

fn simulate(config: SimulationConfig, market: MarketData, signals: SignalSet, out_dir: &Path) -> Result<()> {
    let max_scale_ins = config.max_scale_ins;
    let mut sim = Simulator::new(config, Arc::new(market), Arc::new(signals))?;
    sim.run()?;
    let report = sim.into_report();
    let log = TradeLog::from_orders(&report.orders, report.initial_cash)?;

    fs::create_dir_all(out_dir).with_context(|| format!("cannot create {}", out_dir.display()))?;
    export::write_orders_to_path(out_dir.join("orders.csv"), &report.orders)?;
    export::write_trade_log_to_path(out_dir.join("tradelog.csv"), &log, max_scale_ins)?;
    export::write_ledger_to_path(out_dir.join("capital.csv"), &report.ledger)?;
    info!(out_dir = %out_dir.display(), trades = log.len(), "tables written");

    if !report.unliquidated.is_empty() {
        println!("Unliquidated: {:?}", report.unliquidated);
    }
    println!("{}", Metrics::from((&report, &log)));
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            market,
            signals,
            config,
            preset,
            out_dir,
        } => {
            let mut config = match config {
                Some(path) => SimulationConfig::from_file(&path).with_context(|| format!("cannot load {}", path.display()))?,
                None => SimulationConfig::for_preset(preset.map(Preset::from).unwrap_or_default()),
            };
            if let Some(preset) = preset {
                config.preset = preset.into();
            }
            let market = MarketData::from_file(&market).with_context(|| format!("cannot load {}", market.display()))?;
            let signals = SignalSet::from_file(&signals).with_context(|| format!("cannot load {}", signals.display()))?;
            simulate(config, market, signals, &out_dir)?;
        }

        Commands::Demo { synthetic, out_dir } => {
            let (config, market, signals) = synthetic_inputs(&synthetic)?;
            simulate(config, market, signals, &out_dir)?;
        }

        Commands::Sweep { synthetic } => {
            let (config, market, signals) = synthetic_inputs(&synthetic)?;
            let optimizer = Optimizer::<ScaleInGrid>::new(Arc::new(market), Arc::new(signals), config);
            let mut results = optimizer.with_config(|&(multiple, count), base| {
                Ok(SimulationConfig {
                    scale_in_atr_multiple: multiple,
                    max_scale_ins: count,
                    ..base.clone()
                })
            })?;
            results.sort_by(|a, b| b.1.total_cmp(&a.1));

            println!("\n{:>10} {:>10} {:>16}", "ATR STEP", "SCALE-INS", "ASSET VALUE");
            println!("{}", "-".repeat(38));
            for ((multiple, count), value) in &results {
                println!("{multiple:>10.2} {count:>10} {value:>16.2}");
            }
        }
    }

    Ok(())
}
