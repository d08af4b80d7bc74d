//! Entry/exit signal series and the signal generator trait.

use crate::error::{Result, WfoError};
use crate::types::{bars_between, Bar, ParamSet};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Boolean entry and exit sequences aligned to a timestamp index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub timestamps: Vec<DateTime<Utc>>,
    pub entries: Vec<bool>,
    pub exits: Vec<bool>,
}

impl Signals {
    /// Build a signal set, checking that all three sequences line up.
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        entries: Vec<bool>,
        exits: Vec<bool>,
    ) -> Result<Self> {
        let signals = Self {
            timestamps,
            entries,
            exits,
        };
        signals.check_aligned()?;
        Ok(signals)
    }

    /// Fail unless entries and exits have one value per timestamp.
    pub fn check_aligned(&self) -> Result<()> {
        if self.entries.len() != self.timestamps.len() || self.exits.len() != self.timestamps.len() {
            return Err(WfoError::StrategyError(format!(
                "Signal length mismatch: {} timestamps, {} entries, {} exits",
                self.timestamps.len(),
                self.entries.len(),
                self.exits.len()
            )));
        }
        Ok(())
    }

    fn entry_at(&self, i: usize) -> bool {
        self.entries.get(i).copied().unwrap_or(false)
    }

    fn exit_at(&self, i: usize) -> bool {
        self.exits.get(i).copied().unwrap_or(false)
    }

    /// No signal anywhere on `timestamps`.
    pub fn flat(timestamps: Vec<DateTime<Utc>>) -> Self {
        let n = timestamps.len();
        Self {
            timestamps,
            entries: vec![false; n],
            exits: vec![false; n],
        }
    }

    /// Flat signals aligned to `bars`.
    pub fn flat_for(bars: &[Bar]) -> Self {
        Self::flat(bars.iter().map(|b| b.timestamp).collect())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.iter().filter(|e| **e).count()
    }

    pub fn exit_count(&self) -> usize {
        self.exits.iter().filter(|e| **e).count()
    }

    /// Keep only the points whose date lies in `[from, to]`.
    pub fn restrict(&self, from: NaiveDate, to: NaiveDate) -> Signals {
        let mut out = Signals::default();
        for (i, ts) in self.timestamps.iter().enumerate() {
            let date = ts.date_naive();
            if date >= from && date <= to {
                out.timestamps.push(*ts);
                out.entries.push(self.entry_at(i));
                out.exits.push(self.exit_at(i));
            }
        }
        out
    }

    /// Re-express these signals on `index`.
    ///
    /// Timestamps in `index` with no matching point become "no signal";
    /// points not in `index` are dropped.
    pub fn reindex(&self, index: &[DateTime<Utc>]) -> Signals {
        let lookup: HashMap<DateTime<Utc>, usize> = self
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| (*ts, i))
            .collect();

        let mut entries = Vec::with_capacity(index.len());
        let mut exits = Vec::with_capacity(index.len());
        for ts in index {
            match lookup.get(ts) {
                Some(&i) => {
                    entries.push(self.entry_at(i));
                    exits.push(self.exit_at(i));
                }
                None => {
                    entries.push(false);
                    exits.push(false);
                }
            }
        }

        Signals {
            timestamps: index.to_vec(),
            entries,
            exits,
        }
    }
}

/// Turns a parameter set and a price slice into entry/exit signals.
pub trait SignalGenerator: Send + Sync {
    /// Returns the name of the generator.
    fn name(&self) -> &str;

    /// Generate signals aligned to `bars`.
    fn signals(&self, bars: &[Bar], params: &ParamSet) -> Result<Signals>;

    /// Parameters this generator understands, with their defaults.
    fn default_params(&self) -> ParamSet {
        ParamSet::new()
    }
}

/// Signals for a test block `[test_start, test_end]` of `bars`.
///
/// With `warmup_start` set, the generator sees the bars from `warmup_start`
/// onwards so indicator lookbacks are primed before the test block begins;
/// the output is then cut back to the test block. Either way the result is
/// re-indexed onto the test block's own timestamps.
pub fn signals_for_period(
    generator: &dyn SignalGenerator,
    bars: &[Bar],
    params: &ParamSet,
    test_start: NaiveDate,
    test_end: NaiveDate,
    warmup_start: Option<NaiveDate>,
) -> Result<Signals> {
    let test_slice = bars_between(bars, test_start, test_end);
    let index: Vec<DateTime<Utc>> = test_slice.iter().map(|b| b.timestamp).collect();

    let raw = match warmup_start {
        Some(from) if from < test_start => {
            let extended = bars_between(bars, from, test_end);
            let signals = generator.signals(extended, params)?;
            signals.check_aligned()?;
            signals.restrict(test_start, test_end)
        }
        _ => {
            let signals = generator.signals(test_slice, params)?;
            signals.check_aligned()?;
            signals
        }
    };

    Ok(raw.reindex(&index))
}
