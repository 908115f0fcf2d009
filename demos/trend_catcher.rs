//! # Trend Catcher
//!
//! Risk-scaled trend entries over a synthetic universe of daily candles, with a hard stop,
//! the moving-average exit and up to two ATR scale-ins per position.
use std::sync::Arc;

use chrono::Duration;
use pbts_rs::export;
use pbts_rs::prelude::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();

    let params = PrepareParams::default();
    let universe = Universe::synthetic(&params.benchmark, 30, 730, Duration::days(1), 7)?;
    let (market, signals) = prepare(&universe, Preset::Trend, &params)?;

    let config = SimulationConfig::trend();
    let initial_balance = config.initial_cash;
    let max_scale_ins = config.max_scale_ins;
    let mut sim = Simulator::new(config, Arc::new(market), Arc::new(signals))?;
    sim.run()?;

    let report = sim.into_report();
    let log = TradeLog::from_orders(&report.orders, initial_balance)?;

    let out_dir = std::env::temp_dir().join("pbts_trend");
    std::fs::create_dir_all(&out_dir)?;
    export::write_trade_log_to_path(out_dir.join("tradelog.csv"), &log, max_scale_ins)?;
    export::write_ledger_to_path(out_dir.join("capital.csv"), &report.ledger)?;
    println!("tables written to {}", out_dir.display());

    let scaled = log.trades().iter().filter(|t| !t.scale_ins().is_empty()).count();
    println!("trades {} (scaled in {scaled})", log.len());

    let new_balance = report.final_asset_value();
    let new_balance_perf = initial_balance.change(new_balance);
    println!("performance {new_balance:.2} ({new_balance_perf:.2}%)");

    let benchmark = universe.candles(&params.benchmark).unwrap_or_default();
    let closes: Vec<f64> = benchmark.iter().flatten().map(|c| c.close()).collect();
    if let (Some(first_price), Some(last_price)) = (closes.first(), closes.last()) {
        let buy_and_hold = (initial_balance / first_price) * last_price;
        let buy_and_hold_perf = first_price.change(*last_price);
        println!("buy and hold {} {buy_and_hold:.2} ({buy_and_hold_perf:.2}%)", params.benchmark);
    }

    #[cfg(feature = "metrics")]
    println!("{}", Metrics::from((&report, &log)));

    Ok(())
}
