// ⏰ Periods & Validity - business time for filings and aliases
//
// Two kinds of time matter here:
// 1. Period: which filing batch a record came from (LEGACY era or a quarter)
// 2. Validity: the business-date interval during which an alias was true
//
// System time (when we learned something) lives on master versions and audit
// events, never on period records, so adapters stay pure.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConsolidationError;

/// First business date covered by the pre-2003 consolidated store.
pub const LEGACY_ERA_START: (i32, u32, u32) = (1986, 1, 1);

/// Last business date covered by the pre-2003 consolidated store.
pub const LEGACY_ERA_END: (i32, u32, u32) = (2002, 12, 31);

// ============================================================================
// PERIOD IDENTIFIER
// ============================================================================

/// PeriodId - one self-contained filing batch
///
/// `Legacy` sorts before every quarter, so ordering by `PeriodId` is
/// chronological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeriodId {
    /// The pre-standardization era, held in one consolidated store
    Legacy,

    /// A post-2003 quarterly batch
    Quarter { year: i32, quarter: u8 },
}

impl PeriodId {
    pub fn quarter(year: i32, quarter: u8) -> Result<Self, ConsolidationError> {
        if !(1..=4).contains(&quarter) || !(1990..=2100).contains(&year) {
            return Err(ConsolidationError::InvalidPeriod(format!("{}Q{}", year, quarter)));
        }
        Ok(PeriodId::Quarter { year, quarter })
    }

    /// First business date of the period
    pub fn start_date(&self) -> NaiveDate {
        match self {
            PeriodId::Legacy => {
                let (y, m, d) = LEGACY_ERA_START;
                ymd(y, m, d)
            }
            PeriodId::Quarter { year, quarter } => ymd(*year, u32::from(*quarter) * 3 - 2, 1),
        }
    }

    /// Last business date of the period (inclusive)
    pub fn end_date(&self) -> NaiveDate {
        match self {
            PeriodId::Legacy => {
                let (y, m, d) = LEGACY_ERA_END;
                ymd(y, m, d)
            }
            PeriodId::Quarter { year, quarter } => {
                let next = if *quarter == 4 {
                    ymd(*year + 1, 1, 1)
                } else {
                    ymd(*year, u32::from(*quarter) * 3 + 1, 1)
                };
                next.pred_opt().unwrap_or(next)
            }
        }
    }

    /// The period containing a business date
    pub fn containing(date: NaiveDate) -> Self {
        if date <= PeriodId::Legacy.end_date() {
            return PeriodId::Legacy;
        }
        let quarter = ((date.month() - 1) / 3 + 1) as u8;
        PeriodId::Quarter { year: date.year(), quarter }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date() <= date && date <= self.end_date()
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, PeriodId::Legacy)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodId::Legacy => write!(f, "LEGACY"),
            PeriodId::Quarter { year, quarter } => write!(f, "{}Q{}", year, quarter),
        }
    }
}

impl FromStr for PeriodId {
    type Err = ConsolidationError;

    /// Accepts "LEGACY", "PRE2003", "2006Q1", "2006q1" and directory names
    /// such as "2006q1_form345".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        if upper == "LEGACY" || upper == "PRE2003" || upper == "PRE-2003" {
            return Ok(PeriodId::Legacy);
        }

        let head = upper.split(|c: char| c == '_' || c == '-').next().unwrap_or("");
        let (year, quarter) = head
            .split_once('Q')
            .ok_or_else(|| ConsolidationError::InvalidPeriod(s.to_string()))?;

        let year: i32 = year
            .parse()
            .map_err(|_| ConsolidationError::InvalidPeriod(s.to_string()))?;
        let quarter: u8 = quarter
            .parse()
            .map_err(|_| ConsolidationError::InvalidPeriod(s.to_string()))?;

        PeriodId::quarter(year, quarter)
    }
}

impl TryFrom<String> for PeriodId {
    type Error = ConsolidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodId> for String {
    fn from(period: PeriodId) -> Self {
        period.to_string()
    }
}

// ============================================================================
// VALIDITY INTERVAL
// ============================================================================

/// ValidityInterval - when a value was true in business time
///
/// `until == None` means the value is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub from: NaiveDate,
    pub until: Option<NaiveDate>,
}

impl ValidityInterval {
    /// Interval spanning the first through the last period, closed
    pub fn closed(first: PeriodId, last: PeriodId) -> Self {
        ValidityInterval {
            from: first.start_date(),
            until: Some(last.end_date()),
        }
    }

    /// Interval starting at a period and still current
    pub fn open(first: PeriodId) -> Self {
        ValidityInterval {
            from: first.start_date(),
            until: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.until.is_none()
    }

    /// Was this value true on `date`? Both ends inclusive.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && self.until.map_or(true, |until| date <= until)
    }

    pub fn overlaps(&self, other: &ValidityInterval) -> bool {
        let self_ends_before = self.until.map_or(false, |until| until < other.from);
        let other_ends_before = other.until.map_or(false, |until| until < self.from);
        !self_ends_before && !other_ends_before
    }
}

// ============================================================================
// TESTS
// ============================================================================
