//! Per-interruption duration ledger.
//!
//! Rows written over the years carry these values in several encodings: typed
//! number wrappers (`{"N": "42"}`), bare integers or decimals, a lone scalar
//! instead of a list, or the whole list JSON-encoded into a string. Every form
//! decodes through [`TimeSavedEntry::seconds`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single recorded duration, in whatever shape it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSavedEntry {
    RawInteger(serde_json::Number),
    WrappedNumericString {
        #[serde(rename = "N")]
        n: String,
    },
    /// A numeric string, or a JSON-encoded ledger.
    Text(String),
    Malformed(Value),
}

/// Outcome of decoding a ledger. `malformed` counts entries that contributed 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSavedTotal {
    pub seconds: i64,
    pub malformed: usize,
}

impl TimeSavedTotal {
    fn add(&mut self, other: TimeSavedTotal) {
        self.seconds = self.seconds.saturating_add(other.seconds);
        self.malformed += other.malformed;
    }
}

fn parse_numeric(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

impl TimeSavedEntry {
    pub fn from_seconds(seconds: u64) -> Self {
        TimeSavedEntry::RawInteger(seconds.into())
    }

    /// Decode this entry to whole seconds. Decimals are truncated.
    pub fn seconds(&self) -> TimeSavedTotal {
        let malformed = TimeSavedTotal {
            seconds: 0,
            malformed: 1,
        };
        let ok = |seconds| TimeSavedTotal {
            seconds,
            malformed: 0,
        };

        match self {
            TimeSavedEntry::RawInteger(n) => {
                if let Some(v) = n.as_i64() {
                    ok(v)
                } else if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                    ok(v.trunc() as i64)
                } else {
                    malformed
                }
            }
            TimeSavedEntry::WrappedNumericString { n } => parse_numeric(n).map_or(malformed, ok),
            TimeSavedEntry::Text(text) => {
                if let Some(v) = parse_numeric(text) {
                    return ok(v);
                }
                match serde_json::from_str::<TimeSavedLedger>(text) {
                    Ok(inner) => inner.decode(),
                    Err(_) => malformed,
                }
            }
            TimeSavedEntry::Malformed(Value::Null) => ok(0),
            TimeSavedEntry::Malformed(_) => malformed,
        }
    }
}

/// The `TotalTimeSaved` column: normally a list, occasionally a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSavedLedger {
    Entries(Vec<TimeSavedEntry>),
    Single(TimeSavedEntry),
}

impl Default for TimeSavedLedger {
    fn default() -> Self {
        TimeSavedLedger::Entries(Vec::new())
    }
}

impl TimeSavedLedger {
    /// Append one interruption's duration, normalising a scalar ledger into a list.
    pub fn push(&mut self, seconds: u64) {
        let entry = TimeSavedEntry::from_seconds(seconds);
        match self {
            TimeSavedLedger::Entries(entries) => entries.push(entry),
            TimeSavedLedger::Single(existing) => {
                let existing = existing.clone();
                let entries = match existing {
                    TimeSavedEntry::Malformed(Value::Null) => vec![entry],
                    other => vec![other, entry],
                };
                *self = TimeSavedLedger::Entries(entries);
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TimeSavedLedger::Entries(entries) => entries.len(),
            TimeSavedLedger::Single(TimeSavedEntry::Malformed(Value::Null)) => 0,
            TimeSavedLedger::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn decode(&self) -> TimeSavedTotal {
        match self {
            TimeSavedLedger::Entries(entries) => {
                let mut total = TimeSavedTotal::default();
                for entry in entries {
                    total.add(entry.seconds());
                }
                total
            }
            TimeSavedLedger::Single(entry) => entry.seconds(),
        }
    }
}
