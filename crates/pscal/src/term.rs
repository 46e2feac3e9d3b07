//! Academic year and term identifiers, PowerSchool style.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};

/// PowerSchool numbers years from this epoch: the 2024-2025 school year is 34.
const YEAR_ID_EPOCH: i32 = 1991;

/// Calendar year in which the academic year containing `today` ends.
///
/// A new academic year starts in July.
pub fn academic_year(today: NaiveDate) -> i32 {
    if today.month() < 7 {
        today.year()
    } else {
        today.year() + 1
    }
}

/// The `yearid` used to parameterise term and bell schedule lookups.
pub fn year_id(today: NaiveDate) -> i32 {
    academic_year(today) - YEAR_ID_EPOCH
}

/// The id of the full-year term, `yearid * 100`.
pub fn term_id(today: NaiveDate) -> i32 {
    year_id(today) * 100
}

/// The school-local date for an instant.
pub fn school_today<Tz: TimeZone>(now: DateTime<chrono::Utc>, tz: &Tz) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}
