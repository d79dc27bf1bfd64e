//! Selection of export-eligible records

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::record::{Record, Status};

/// Zone in which a timestamp's calendar date is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateBasis {
    #[default]
    Utc,
    /// Host time zone
    Local,
}

impl DateBasis {
    /// Parse basis from name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "utc" => Some(Self::Utc),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    /// Calendar date of `ts`, ignoring time of day
    pub fn calendar_date(self, ts: &DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Utc => ts.date_naive(),
            Self::Local => ts.with_timezone(&Local).date_naive(),
        }
    }

    pub fn today(self) -> NaiveDate {
        self.calendar_date(&Utc::now())
    }

    /// Default reference date: the day before today
    pub fn yesterday(self) -> NaiveDate {
        let today = self.today();
        today.pred_opt().unwrap_or(today)
    }
}

impl fmt::Display for DateBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utc => f.write_str("utc"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// What a run selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criteria {
    pub status: Status,
    pub reference_date: NaiveDate,
    pub basis: DateBasis,
}

impl Criteria {
    /// Whether a single record is eligible for this export.
    ///
    /// Records without a start date can't be encoded and never match.
    pub fn matches(&self, record: &Record) -> bool {
        record.status == Some(self.status)
            && !record.exported
            && record.start_date.is_some()
            && record
                .end_date
                .is_some_and(|end| self.basis.calendar_date(&end) == self.reference_date)
    }
}

/// Select eligible records, preserving input order.
pub fn select<'a>(records: &'a [Record], criteria: &Criteria) -> Vec<&'a Record> {
    records.iter().filter(|r| criteria.matches(r)).collect()
}
