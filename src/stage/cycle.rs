//! Cycle calendar fields
//!
//! Derives the date strings used to build archive paths, object URLs and
//! manifest paths from a cycle timestamp.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Calendar fields derived from a cycle timestamp.
///
/// Every field is a slice of the 10-digit `YYYYMMDDHH` stamp, so recomputing
/// from the same timestamp always yields identical strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleContext {
    /// The cycle timestamp itself
    pub cycle: DateTime<Utc>,
    /// Full cycle stamp, `YYYYMMDDHH`
    pub stamp: String,
    /// `YYYY`
    pub year: String,
    /// `MM`
    pub month: String,
    /// `DD`
    pub day: String,
    /// `HH`
    pub hour: String,
    /// `YYYYMMDD`
    pub pdy: String,
}

impl CycleContext {
    /// Derive the calendar fields for `cycle`.
    #[must_use]
    pub fn new(cycle: DateTime<Utc>) -> Self {
        let stamp = cycle.format("%Y%m%d%H").to_string();
        Self {
            cycle,
            year: stamp[0..4].to_string(),
            month: stamp[4..6].to_string(),
            day: stamp[6..8].to_string(),
            hour: stamp[8..10].to_string(),
            pdy: stamp[0..8].to_string(),
            stamp,
        }
    }
}

/// Parse a cycle given either as `YYYYMMDDHH` or as an RFC 3339 timestamp.
pub fn parse_cycle(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();

    if text.len() == 10 && text.bytes().all(|b| b.is_ascii_digit()) {
        // chrono needs minutes to build a time, so pin them to zero
        let naive = NaiveDateTime::parse_from_str(&format!("{text}00"), "%Y%m%d%H%M")
            .with_context(|| format!("Invalid cycle '{text}': expected YYYYMMDDHH"))?;
        return Ok(naive.and_utc());
    }

    if text.is_empty() {
        bail!("Cycle cannot be empty");
    }

    let parsed = DateTime::parse_from_rfc3339(text).with_context(|| {
        format!("Invalid cycle '{text}': expected YYYYMMDDHH or an RFC 3339 timestamp")
    })?;
    Ok(parsed.with_timezone(&Utc))
}
