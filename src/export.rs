//! Flat CSV export of orders, trades and the capital ledger.
//!
//! Writers are generic over [`std::io::Write`]; the `*_to_path` helpers create the file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::engine::{DatedRow, OrderEvent};
use crate::errors::Result;
use crate::tradelog::{Fill, TradeLog};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn date(d: &DateTime<Utc>) -> String {
    d.format(DATE_FORMAT).to_string()
}

// ratio 0.0123 -> "1.23%"
fn percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

/// Writes one row per order event.
pub fn write_orders<W: Write>(writer: &mut W, orders: &[OrderEvent]) -> Result<()> {
    writeln!(writer, "id,date,instrument,side,price,size,fee,reason")?;
    for o in orders {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{}",
            o.id,
            date(&o.date),
            o.instrument,
            o.side,
            o.price,
            o.size,
            o.fee,
            o.reason
        )?;
    }
    Ok(())
}

/// Writes one row per round trip with `max_scale_ins` scale-in column pairs.
///
/// Money columns use two decimals, ratios are formatted as percentages.
pub fn write_trade_log<W: Write>(writer: &mut W, log: &TradeLog, max_scale_ins: usize) -> Result<()> {
    let mut header = String::from("instrument,entry_date,entry_price,entry_size");
    for i in 1..=max_scale_ins {
        header.push_str(&format!(",scale_in_{i}_price,scale_in_{i}_size"));
    }
    header.push_str(",exit_date,exit_price,exit_size,invested,fees,pnl,pnl_ratio,total_capital,trade_return");
    writeln!(writer, "{header}")?;

    for t in log.trades() {
        let mut line = t.instrument.to_string();
        match t.first_entry() {
            Some(Fill { date: d, price, size }) => line.push_str(&format!(",{},{price},{size}", date(d))),
            None => line.push_str(",,,"),
        }
        for i in 0..max_scale_ins {
            match t.scale_ins().get(i) {
                Some(fill) => line.push_str(&format!(",{},{}", fill.price, fill.size)),
                None => line.push_str(",,"),
            }
        }
        line.push_str(&format!(
            ",{},{},{},{:.2},{:.2},{:.2},{},{:.2},{}",
            date(&t.exit.date),
            t.exit.price,
            t.exit.size,
            t.invested,
            t.fees,
            t.pnl,
            percent(t.pnl_ratio),
            t.total_capital,
            percent(t.trade_return)
        ));
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

/// Writes the dated capital ledger.
pub fn write_ledger<W: Write>(writer: &mut W, rows: &[DatedRow]) -> Result<()> {
    writeln!(writer, "date,remaining_cash,available_cash,asset_value")?;
    for r in rows {
        writeln!(
            writer,
            "{},{:.2},{:.2},{:.2}",
            date(&r.date),
            r.row.remaining_cash,
            r.row.available_cash,
            r.row.asset_value
        )?;
    }
    Ok(())
}

fn to_path(path: impl AsRef<Path>, f: impl FnOnce(&mut BufWriter<File>) -> Result<()>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    f(&mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_orders_to_path(path: impl AsRef<Path>, orders: &[OrderEvent]) -> Result<()> {
    to_path(path, |w| write_orders(w, orders))
}

pub fn write_trade_log_to_path(path: impl AsRef<Path>, log: &TradeLog, max_scale_ins: usize) -> Result<()> {
    to_path(path, |w| write_trade_log(w, log, max_scale_ins))
}

pub fn write_ledger_to_path(path: impl AsRef<Path>, rows: &[DatedRow]) -> Result<()> {
    to_path(path, |w| write_ledger(w, rows))
}
