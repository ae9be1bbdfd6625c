//! Core data types flowing through the pipeline.
//!
//! - [`Record`]: a single named metric value with its rendering precision
//! - [`Report`]: all records produced by one poll of one source, sharing a timestamp
//!
//! Reports are shared between output stages as `Arc<Report>`; they are never
//! mutated once published.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A named metric value.
///
/// `precision` only affects rendering at the sink boundary, see
/// [`Record::formatted_value`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Dot-separated metric identifier (e.g. "cpu.percent").
    pub name: String,
    /// Sampled value.
    pub value: f64,
    /// Number of fractional digits used when rendering `value`.
    pub precision: usize,
}

impl Record {
    /// Create a new record.
    pub fn new(name: impl Into<String>, value: f64, precision: usize) -> Self {
        Self {
            name: name.into(),
            value,
            precision,
        }
    }

    /// Render the value with exactly `precision` fractional digits.
    ///
    /// ```
    /// use pstag::Record;
    ///
    /// assert_eq!(Record::new("load1", 0.4567, 2).formatted_value(), "0.46");
    /// assert_eq!(Record::new("mem.total", 1024.0, 0).formatted_value(), "1024");
    /// ```
    pub fn formatted_value(&self) -> String {
        format!("{:.*}", self.precision, self.value)
    }
}

/// One sampling cycle from one source.
///
/// Every record in a report shares the report's timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Wall-clock time of the tick that produced this report.
    pub timestamp: DateTime<Utc>,
    /// Records in the order the source produced them. May be empty.
    pub records: Vec<Record>,
}

impl Report {
    /// Create a report from a tick timestamp and the sampled records.
    pub fn new(timestamp: DateTime<Utc>, records: Vec<Record>) -> Self {
        Self { timestamp, records }
    }

    /// True if the report carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Resolution of the timestamp column in CSV rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Nanoseconds,
}

/// Append a batch as CSV rows of `name,unix_seconds,value`.
///
/// Values are rendered with each record's precision. Names containing a
/// comma, quote or newline are quoted.
pub fn write_csv(batch: &[Arc<Report>], out: &mut String) {
    write_csv_in(batch, TimeUnit::Seconds, out);
}

/// Like [`write_csv`], with the timestamp column in `unit`.
pub fn write_csv_in(batch: &[Arc<Report>], unit: TimeUnit, out: &mut String) {
    for report in batch {
        let ts = match unit {
            TimeUnit::Seconds => report.timestamp.timestamp(),
            TimeUnit::Nanoseconds => report.timestamp.timestamp_nanos_opt().unwrap_or_default(),
        };
        for record in &report.records {
            write_csv_field(&record.name, out);
            // Writing into a String cannot fail.
            let _ = writeln!(out, ",{},{}", ts, record.formatted_value());
        }
    }
}

fn write_csv_field(field: &str, out: &mut String) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}
