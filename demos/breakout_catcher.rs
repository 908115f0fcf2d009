//! # Breakout Catcher
//!
//! Channel breakouts on 4-hour candles with the breakout exit rules and a custom sizer that
//! splits the asset value into 20 slots. The inspector tracks the most positions held at once.
use std::sync::Arc;

use chrono::Duration;
use pbts_rs::prelude::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let params = PrepareParams {
        channel_period: 42,
        ..Default::default()
    };
    let universe = Universe::synthetic(&params.benchmark, 40, 6 * 365, Duration::hours(4), 11)?;
    let (market, signals) = prepare(&universe, Preset::Breakout, &params)?;

    let config = SimulationConfig {
        max_concurrent_positions: 15,
        ..SimulationConfig::breakout()
    };
    let exit_policy = config.exit_policy();
    let sizer = |ctx: &SizingContext| Some(ctx.asset_value / 20.0);
    let mut sim = Simulator::with_policies(config, Arc::new(market), Arc::new(signals), exit_policy, sizer)?;

    let mut most_open = 0;
    sim.run_with(|sim, _bar| {
        most_open = most_open.max(sim.book().open_count());
        Ok(())
    })?;
    println!("most positions held at once {most_open}");

    let report = sim.into_report();
    let log = TradeLog::from_orders(&report.orders, report.initial_cash)?;

    let mut by_reason = std::collections::BTreeMap::new();
    for order in report.orders.iter().filter(|o| !o.is_buy()) {
        *by_reason.entry(order.reason.to_string()).or_insert(0) += 1;
    }
    for (reason, count) in by_reason {
        println!("{reason:<20} {count}");
    }

    let wins = log.trades().iter().filter(|t| t.is_win()).count();
    println!("trades {} wins {wins}", log.len());
    println!("fees paid {:.2}", report.total_fees());
    println!(
        "performance {:.2} ({:.2}%)",
        report.final_asset_value(),
        report.initial_cash.change(report.final_asset_value())
    );

    #[cfg(feature = "draws")]
    {
        let options = DrawOptions::default()
            .title("Breakout Catcher")
            .show_cash(true)
            .draw_output(DrawOutput::Svg("breakout_capital.svg".to_owned()));
        Draw::with_report(&report).with_options(options).plot()?;
    }

    Ok(())
}
