use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::*;
use crate::errors::{Error, Result};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn index(n: usize, step: Duration) -> Vec<DateTime<Utc>> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc();
    (0..n).map(|i| start + step * i as i32).collect()
}

fn series(closes: &[f64]) -> Series {
    Series::new(closes.iter().map(|c| Some(Candle::from((*c, *c, *c, *c, 1.0)))).collect())
}

fn market(bars: usize, step: Duration, series: Vec<(&str, Series)>) -> Arc<MarketData> {
    let mut market = MarketData::new(index(bars, step)).unwrap();
    for (name, s) in series {
        market.insert(name, s).unwrap();
    }
    Arc::new(market)
}

fn rank_all(signals: SignalSet, market: &MarketData, names: &[&str]) -> SignalSet {
    let rows = market.index().iter().flat_map(|date| {
        names
            .iter()
            .enumerate()
            .map(move |(i, name)| RankRow::from((date.date_naive(), *name, i as u32 + 1)))
    });
    signals.with_ranks(rows.collect::<Vec<_>>())
}

fn config(max_scale_ins: usize) -> SimulationConfig {
    SimulationConfig {
        max_scale_ins,
        ..SimulationConfig::trend()
    }
}

fn fixed_stake(stake: f64) -> impl Fn(&SizingContext) -> Option<f64> {
    move |_| Some(stake)
}

#[test]
fn single_round_trip() {
    let market = market(3, Duration::days(1), vec![("ETH_USDT", series(&[100.0, 110.0, 120.0]))]);
    let signals = SignalSet::new()
        .with_entries("ETH_USDT", vec![true, false, false])
        .with_exits("ETH_USDT", vec![false, true, false]);
    let signals = rank_all(signals, &market, &["ETH_USDT"]);

    let mut sim = Simulator::with_policies(config(0), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(1_000.0)).unwrap();
    sim.run().unwrap();

    let orders = sim.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].size, 10.0);
    assert_eq!(orders[0].reason, OrderReason::Entry);
    assert_eq!(orders[1].reason, OrderReason::Exit(ExitReason::TrendFilter));
    assert_eq!(orders[1].price, 110.0);

    let after_entry = sim.row(0).unwrap();
    assert!(approx(after_entry.remaining_cash, 10_000.0 - 1_001.0));
    assert!(approx(after_entry.asset_value, 9_999.0));
    let after_exit = sim.row(1).unwrap();
    assert!(approx(after_exit.remaining_cash, 8_999.0 + 110.0 * 10.0 * 0.999));
    // nothing left to liquidate, the last bar carries the exit row forward
    assert_eq!(sim.row(2), sim.row(1));
    assert!(sim.book().is_empty());
}

#[test]
fn ceiling_admits_best_ranks() {
    let names: Vec<String> = (1..=11).map(|i| format!("C{i:02}_USDT")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let market = market(2, Duration::days(1), refs.iter().map(|n| (*n, series(&[10.0, 10.0]))).collect());
    let mut signals = SignalSet::new();
    for name in &refs {
        signals = signals.with_entries(*name, vec![true, false]);
    }
    // reverse name order so rank and name order disagree
    let reversed: Vec<&str> = refs.iter().rev().copied().collect();
    let signals = rank_all(signals, &market, &reversed);

    let mut sim = Simulator::with_policies(config(0), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(500.0)).unwrap();
    sim.run_with(|sim, bar| {
        if bar == 0 {
            assert_eq!(sim.book().open_count(), 10);
        }
        Ok(())
    })
    .unwrap();

    let admitted: Vec<&str> = sim
        .orders()
        .iter()
        .filter(|o| o.reason == OrderReason::Entry)
        .map(|o| o.instrument.as_str())
        .collect();
    assert_eq!(admitted, reversed[..10].to_vec());
    assert!(!admitted.contains(&"C01_USDT"));
}

#[test]
fn rejected_admission_changes_nothing() {
    let market = market(2, Duration::days(1), vec![("SOL_USDT", series(&[10.0, 10.0]))]);
    let signals = SignalSet::new().with_entries("SOL_USDT", vec![true, false]);
    let signals = rank_all(signals, &market, &["SOL_USDT"]);
    let config = SimulationConfig {
        initial_cash: 50_000.0 / 99.0,
        ..config(0)
    };

    let mut sim = Simulator::with_policies(config, market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(600.0)).unwrap();
    sim.run().unwrap();

    assert!(sim.orders().is_empty());
    let row = sim.row(0).unwrap();
    assert!(approx(row.available_cash, 500.0));
    assert_eq!(row.remaining_cash, 50_000.0 / 99.0);
    assert_eq!(row.asset_value, 50_000.0 / 99.0);
}

#[test]
fn no_reentry_on_exit_bar() {
    let market = market(4, Duration::days(1), vec![("ADA_USDT", series(&[1.0, 1.0, 1.0, 1.0]))]);
    let signals = SignalSet::new()
        .with_entries("ADA_USDT", vec![true, true, true, false])
        .with_exits("ADA_USDT", vec![false, true, false, false]);
    let signals = rank_all(signals, &market, &["ADA_USDT"]);

    let mut sim = Simulator::with_policies(config(0), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(100.0)).unwrap();
    sim.run().unwrap();

    let trail: Vec<(usize, OrderSide)> = sim
        .orders()
        .iter()
        .map(|o| ((o.date - sim.market().index()[0]).num_days() as usize, o.side))
        .collect();
    assert_eq!(
        trail,
        vec![(0, OrderSide::Buy), (1, OrderSide::Sell), (2, OrderSide::Buy), (3, OrderSide::Sell)]
    );
    assert_eq!(sim.orders()[3].reason, OrderReason::Exit(ExitReason::Liquidation));
}

#[test]
fn scale_ins_stop_at_lot_limit() {
    let closes = [100.0, 102.0, 104.0, 106.0, 108.0, 108.0];
    let s = series(&closes).with_atr(vec![Some(4.0); closes.len()]);
    let market = market(closes.len(), Duration::days(1), vec![("BTC_USDT", s)]);
    let signals = SignalSet::new().with_entries("BTC_USDT", vec![true, false, false, false, false, false]);
    let signals = rank_all(signals, &market, &["BTC_USDT"]);

    let mut sim = Simulator::with_policies(config(2), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(1_000.0)).unwrap();
    let mut lot_counts = Vec::new();
    sim.run_with(|sim, _| {
        lot_counts.push(sim.book().scale_in_count(&Instrument::from("BTC_USDT")));
        Ok(())
    })
    .unwrap();

    assert_eq!(lot_counts, vec![1, 2, 3, 3, 3, 0]);
    let scale_ins: Vec<&OrderEvent> = sim.orders().iter().filter(|o| o.reason == OrderReason::ScaleIn).collect();
    assert_eq!(scale_ins.len(), 2);
    // every scale-in stakes the first lot's cost
    for order in scale_ins {
        assert!(approx(order.notional(), 1_000.0));
    }
}

#[test]
fn scale_in_needs_atr_step() {
    let closes = [100.0, 100.5, 100.9, 100.9];
    let s = series(&closes).with_atr(vec![Some(4.0); closes.len()]);
    let market = market(closes.len(), Duration::days(1), vec![("BTC_USDT", s)]);
    let signals = SignalSet::new().with_entries("BTC_USDT", vec![true, false, false, false]);
    let signals = rank_all(signals, &market, &["BTC_USDT"]);

    let mut sim = Simulator::with_policies(config(2), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(1_000.0)).unwrap();
    sim.run().unwrap();
    assert!(sim.orders().iter().all(|o| o.reason != OrderReason::ScaleIn));
}

#[test]
fn stop_loss_uses_weighted_entry() {
    let market = market(3, Duration::days(1), vec![("XRP_USDT", series(&[2.0, 0.9, 0.9]))]);
    let signals = SignalSet::new().with_entries("XRP_USDT", vec![true, false, false]);
    let signals = rank_all(signals, &market, &["XRP_USDT"]);

    let mut sim = Simulator::with_policies(config(0), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(100.0)).unwrap();
    sim.run().unwrap();
    assert_eq!(sim.orders()[1].reason, OrderReason::Exit(ExitReason::StopLoss));
    assert_eq!(sim.orders().len(), 2);
}

#[test]
fn breakout_time_exit_at_midnight() {
    // 4 days of 6-hour bars
    let bars = 17;
    let market = market(bars, Duration::hours(6), vec![("DOT_USDT", series(&vec![5.0; bars]))]);
    let mut entries = vec![false; bars];
    entries[1] = true;
    let signals = SignalSet::new().with_entries("DOT_USDT", entries);
    let signals = rank_all(signals, &market, &["DOT_USDT"]);

    let mut sim = Simulator::new(SimulationConfig::breakout(), market, Arc::new(signals)).unwrap();
    sim.run().unwrap();

    let orders = sim.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].date, sim.market().index()[1]);
    // opened at 06:00 on day 0, first midnight after 2 days is day 3 (bar 12)
    assert_eq!(orders[1].date, sim.market().index()[12]);
    assert_eq!(orders[1].reason, OrderReason::Exit(ExitReason::TimeLimit));
    // equal weight: asset value / 10
    assert!(approx(orders[0].notional(), 1_000.0));
}

#[test]
fn missing_data_is_skipped() {
    let mut s = vec![Some(Candle::from((1.0, 1.0, 1.0, 1.0, 1.0))); 4];
    s[1] = None;
    let market = market(4, Duration::days(1), vec![("LTC_USDT", Series::new(s))]);
    let signals = SignalSet::new()
        .with_entries("LTC_USDT", vec![false, true, true, false])
        .with_entries("GHOST_USDT", vec![true, false, false, false]);
    let signals = rank_all(signals, &market, &["LTC_USDT", "GHOST_USDT"]);

    let mut sim = Simulator::with_policies(config(0), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(10.0)).unwrap();
    sim.run().unwrap();

    let buys: Vec<_> = sim.orders().iter().filter(|o| o.is_buy()).collect();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].date, sim.market().index()[2]);
}

#[test]
fn last_bar_without_close_is_unliquidated() {
    let s = Series::new(vec![Some(Candle::from((1.0, 1.0, 1.0, 1.0, 1.0))), None]);
    let market = market(2, Duration::days(1), vec![("LTC_USDT", s)]);
    let signals = SignalSet::new().with_entries("LTC_USDT", vec![true, false]);
    let signals = rank_all(signals, &market, &["LTC_USDT"]);

    let mut sim = Simulator::with_policies(config(0), market, Arc::new(signals), RuleExit::trend(0.5), fixed_stake(10.0)).unwrap();
    sim.run().unwrap();

    assert_eq!(sim.unliquidated(), &[Instrument::from("LTC_USDT")]);
    assert_eq!(sim.book().open_count(), 1);
    assert_eq!(sim.into_report().unliquidated.len(), 1);
}

#[test]
fn cash_is_conserved_every_bar() {
    let closes: Vec<f64> = (0..30).map(|i| 50.0 + (i as f64 * 0.7).sin() * 10.0).collect();
    let names = ["A_USDT", "B_USDT", "C_USDT"];
    let series_list = names
        .iter()
        .map(|n| (*n, series(&closes).with_atr(vec![Some(1.0); closes.len()])))
        .collect();
    let market = market(closes.len(), Duration::days(1), series_list);
    let mut signals = SignalSet::new();
    for (k, name) in names.iter().enumerate() {
        signals = signals
            .with_entries(*name, (0..30).map(|i| (i + k) % 4 == 0).collect())
            .with_exits(*name, (0..30).map(|i| (i + k) % 5 == 0).collect());
    }
    let signals = rank_all(signals, &market, &names);
    let config = SimulationConfig {
        max_concurrent_positions: 2,
        ..config(2)
    };

    let mut sim = Simulator::new(config, market, Arc::new(signals)).unwrap();
    sim.run_with(|sim, bar| {
        let row = sim.row(bar).ok_or(Error::BarOutOfRange(bar))?;
        assert!(approx(row.remaining_cash + sim.book().cost_basis(), row.asset_value));
        assert!(sim.book().open_count() <= 2);
        assert!(row.remaining_cash >= 0.0);
        Ok(())
    })
    .unwrap();

    assert!(sim.book().is_empty());
    assert!(sim.is_finished());
}

#[test]
fn inspector_errors_abort_the_run() {
    let market = market(3, Duration::days(1), vec![("ETH_USDT", series(&[1.0, 1.0, 1.0]))]);
    let mut sim = Simulator::new(config(0), market, Arc::new(SignalSet::new())).unwrap();
    let result: Result<()> = sim.run_with(|_, bar| if bar == 1 { Err(Error::BarOutOfRange(bar)) } else { Ok(()) });
    assert!(matches!(result, Err(Error::BarOutOfRange(1))));
    assert!(!sim.is_finished());

    sim.reset();
    sim.run().unwrap();
    assert!(sim.is_finished());
}

#[test]
fn misaligned_signals_are_rejected() {
    let market = market(3, Duration::days(1), vec![("ETH_USDT", series(&[1.0, 1.0, 1.0]))]);
    let signals = SignalSet::new().with_exits("ETH_USDT", vec![false]);
    let result = Simulator::new(config(0), market, Arc::new(signals));
    assert!(matches!(result, Err(Error::Misaligned { name: "exits", .. })));
}

#[test]
fn invalid_config_is_rejected_before_building_policies() {
    let market = market(3, Duration::days(1), vec![("ETH_USDT", series(&[1.0, 1.0, 1.0]))]);
    let config = SimulationConfig {
        max_holding_days: i64::MAX,
        ..config(0)
    };
    let result = Simulator::new(config, market, Arc::new(SignalSet::new()));
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
