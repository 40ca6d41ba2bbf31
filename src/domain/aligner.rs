//! Earnings-to-window alignment.
//!
//! Turns sparse earnings events into a dense channel with one value per
//! window row: the event's surprise (actual - estimated) on the row it
//! lands on, 0 elsewhere. Events outside the window are dropped. An event
//! dated on a non-row day (weekend, holiday) lands on the next row.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::ohlcv::EarningsEvent;

/// How events landing on the same row combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameDayPolicy {
    /// Surprises add up. Independent of event order.
    #[default]
    Sum,
    /// The event listed last wins.
    OverwriteLast,
}

impl fmt::Display for SameDayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameDayPolicy::Sum => "sum",
            SameDayPolicy::OverwriteLast => "overwrite",
        })
    }
}

impl FromStr for SameDayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(SameDayPolicy::Sum),
            "overwrite" | "overwrite_last" => Ok(SameDayPolicy::OverwriteLast),
            other => Err(format!(
                "unknown same-day policy '{other}', expected sum or overwrite"
            )),
        }
    }
}

/// Ordered, strictly ascending dates that make up one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    dates: Vec<NaiveDate>,
}

impl DateWindow {
    /// `len` consecutive calendar days ending at `end`.
    pub fn calendar(end: NaiveDate, len: usize) -> Self {
        let dates = (0..len)
            .rev()
            .map(|back| end - Duration::days(back as i64))
            .collect();
        Self { dates }
    }

    /// Window over existing row dates; unsorted or repeated dates are
    /// normalised.
    pub fn from_dates(dates: &[NaiveDate]) -> Self {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();
        Self { dates }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Index of the first row on or after `date`, if inside the window.
    fn slot(&self, date: NaiveDate) -> Option<usize> {
        let (first, last) = (self.first()?, self.last()?);
        if date < first || date > last {
            return None;
        }
        Some(self.dates.partition_point(|d| *d < date))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Dense earnings-surprise channel over `window`.
pub fn align_events(
    window: &DateWindow,
    events: &[EarningsEvent],
    policy: SameDayPolicy,
) -> AlignedSeries {
    let mut by_slot: BTreeMap<usize, f64> = BTreeMap::new();
    for event in events {
        let Some(slot) = window.slot(event.date) else {
            continue;
        };
        let surprise = event.surprise();
        match policy {
            SameDayPolicy::Sum => *by_slot.entry(slot).or_insert(0.0) += surprise,
            SameDayPolicy::OverwriteLast => {
                by_slot.insert(slot, surprise);
            }
        }
    }

    let values = (0..window.len())
        .map(|i| by_slot.get(&i).copied().unwrap_or(0.0))
        .collect();

    AlignedSeries {
        dates: window.dates().to_vec(),
        values,
    }
}
