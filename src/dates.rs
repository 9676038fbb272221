//! Date label codec
//!
//! The CSSE time series name their count columns with compact US-style labels
//! (`"M/D/YY"`). Everything downstream works on a day ordinal so offsets and
//! interpolation are plain integer/float arithmetic.

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;

/// A date column label decoded into its arithmetic and display forms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ParsedDate {
    /// Days from the common era (Rata Die). Only used for arithmetic.
    pub ordinal: i64,
    /// Label exactly as it appeared in the source header.
    pub label: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFormatError {
    /// Label is not three `/`-separated integer fields
    Malformed { label: String },
    /// Fields parsed but do not name a real day (e.g. 2/30/21)
    OutOfRange { label: String },
}

impl std::fmt::Display for DateFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { label } => {
                write!(f, "date label {:?} is not in M/D/YY form", label)
            }
            Self::OutOfRange { label } => {
                write!(f, "date label {:?} is not a calendar date", label)
            }
        }
    }
}

impl std::error::Error for DateFormatError {}

/// Parse a `"M/D/YY"` label. The two-digit year is read as `2000 + YY`.
pub fn parse(label: &str) -> Result<ParsedDate, DateFormatError> {
    let malformed = || DateFormatError::Malformed {
        label: label.to_string(),
    };

    let mut fields = label.trim().split('/');
    let (Some(m), Some(d), Some(y), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed());
    };

    let month = parse_field(m).ok_or_else(malformed)?;
    let day = parse_field(d).ok_or_else(malformed)?;
    let year = parse_field(y).ok_or_else(malformed)?;

    let date = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(2000 + y, month, day))
        .ok_or_else(|| DateFormatError::OutOfRange {
            label: label.to_string(),
        })?;

    Ok(ParsedDate {
        ordinal: to_ordinal(date),
        label: label.to_string(),
        date,
    })
}

fn parse_field(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

pub fn to_ordinal(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce())
}

pub fn from_ordinal(ordinal: i64) -> Option<NaiveDate> {
    i32::try_from(ordinal)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
}

/// Ordinal of the current UTC day; the chart x-window ends here.
pub fn today_ordinal() -> i64 {
    to_ordinal(Utc::now().date_naive())
}
