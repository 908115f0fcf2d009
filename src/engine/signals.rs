use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Instrument, MarketData};
use crate::errors::{Error, Result};

/// One row of the daily ranked candidate table. Rank 1 is the most preferred.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RankRow {
    pub date: NaiveDate,
    pub instrument: Instrument,
    pub rank: u32,
}

impl From<(NaiveDate, &str, u32)> for RankRow {
    fn from((date, instrument, rank): (NaiveDate, &str, u32)) -> Self {
        Self {
            date,
            instrument: instrument.into(),
            rank,
        }
    }
}

/// Entry and exit flags per instrument and bar, plus the daily ranking.
///
/// Instruments without a vector never signal. Ranks are keyed by calendar day,
/// so every intraday bar of a day shares the same ranking.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    #[cfg_attr(feature = "serde", serde(default))]
    entries: BTreeMap<Instrument, Vec<bool>>,
    #[cfg_attr(feature = "serde", serde(default))]
    exits: BTreeMap<Instrument, Vec<bool>>,
    #[cfg_attr(feature = "serde", serde(default, with = "rank_table"))]
    ranks: BTreeMap<NaiveDate, HashMap<Instrument, u32>>,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry flags of an instrument, one per bar.
    pub fn with_entries(mut self, instrument: impl Into<Instrument>, flags: Vec<bool>) -> Self {
        self.entries.insert(instrument.into(), flags);
        self
    }

    /// Sets the exit (trend filter) flags of an instrument, one per bar.
    pub fn with_exits(mut self, instrument: impl Into<Instrument>, flags: Vec<bool>) -> Self {
        self.exits.insert(instrument.into(), flags);
        self
    }

    pub fn add_rank(&mut self, row: RankRow) {
        self.ranks
            .entry(row.date)
            .or_default()
            .insert(row.instrument, row.rank);
    }

    pub fn with_ranks(mut self, rows: impl IntoIterator<Item = RankRow>) -> Self {
        for row in rows {
            self.add_rank(row);
        }
        self
    }

    /// Rank of an instrument on a day, `None` when it is not a candidate that day.
    pub fn rank(&self, day: NaiveDate, instrument: &Instrument) -> Option<u32> {
        self.ranks.get(&day).and_then(|r| r.get(instrument)).copied()
    }

    pub fn entry(&self, instrument: &Instrument, bar: usize) -> bool {
        flag(&self.entries, instrument, bar)
    }

    pub fn exit(&self, instrument: &Instrument, bar: usize) -> bool {
        flag(&self.exits, instrument, bar)
    }

    /// Instruments whose entry flag is set at `bar`, in name order.
    pub fn entry_candidates(&self, bar: usize) -> impl Iterator<Item = &Instrument> {
        self.entries
            .iter()
            .filter(move |(_, flags)| flags.get(bar).copied().unwrap_or(false))
            .map(|(instrument, _)| instrument)
    }

    /// Flattens the ranking back into rows, ordered by day then rank.
    pub fn rank_rows(&self) -> Vec<RankRow> {
        let mut rows = Vec::new();
        for (date, ranks) in &self.ranks {
            let mut day: Vec<_> = ranks
                .iter()
                .map(|(instrument, rank)| RankRow {
                    date: *date,
                    instrument: instrument.clone(),
                    rank: *rank,
                })
                .collect();
            day.sort_by(|a, b| (a.rank, &a.instrument).cmp(&(b.rank, &b.instrument)));
            rows.extend(day);
        }
        rows
    }

    /// Checks every flag vector against the bar index of `market`.
    pub fn validate(&self, market: &MarketData) -> Result<()> {
        let bars = market.len();
        for (name, table) in [("entries", &self.entries), ("exits", &self.exits)] {
            for (instrument, flags) in table {
                if flags.len() != bars {
                    return Err(Error::Misaligned {
                        instrument: instrument.clone(),
                        name,
                        expected: bars,
                        got: flags.len(),
                    });
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    /// Reads a signal set from a JSON file.
    pub fn from_file(filepath: impl AsRef<std::path::Path>) -> Result<Self> {
        use std::{fs::File, io::BufReader};

        let file = File::open(filepath)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

fn flag(table: &BTreeMap<Instrument, Vec<bool>>, instrument: &Instrument, bar: usize) -> bool {
    table
        .get(instrument)
        .and_then(|flags| flags.get(bar))
        .copied()
        .unwrap_or(false)
}

// ranks travel as a flat `[{date, instrument, rank}]` table
#[cfg(feature = "serde")]
mod rank_table {
    use super::*;
    use serde::{Deserializer, Serializer};

    type Table = BTreeMap<NaiveDate, HashMap<Instrument, u32>>;

    pub fn serialize<S: Serializer>(table: &Table, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let set = SignalSet {
            ranks: table.clone(),
            ..Default::default()
        };
        set.rank_rows().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Table, D::Error> {
        let rows = Vec::<RankRow>::deserialize(deserializer)?;
        let mut table = Table::new();
        for row in rows {
            table.entry(row.date).or_default().insert(row.instrument, row.rank);
        }
        Ok(table)
    }
}
