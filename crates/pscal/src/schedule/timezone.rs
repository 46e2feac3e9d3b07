//! The VTIMEZONE block published with every feed.
//!
//! Event instants are computed with the tz database; this block only tells
//! calendar clients how to read the `TZID` on each event. It is checked
//! against the tz database at startup so rule changes show up in the logs.

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeZone, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One half of a zone definition: daylight or standard time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observance {
    pub tzname: String,
    pub offset_from_secs: i32,
    pub offset_to_secs: i32,
    pub dtstart: NaiveDateTime,
    /// `BYMONTH` of the yearly rule
    pub month: u32,
    /// `BYDAY` of the yearly rule, e.g. `2SU` or `-1SU`
    pub by_day: String,
}

impl Observance {
    fn write(&self, kind: &str, out: &mut String) {
        out.push_str(&format!("BEGIN:{kind}\r\n"));
        out.push_str(&format!("TZNAME:{}\r\n", self.tzname));
        out.push_str(&format!("TZOFFSETFROM:{}\r\n", utc_offset(self.offset_from_secs)));
        out.push_str(&format!("TZOFFSETTO:{}\r\n", utc_offset(self.offset_to_secs)));
        out.push_str(&format!("DTSTART:{}\r\n", self.dtstart.format("%Y%m%dT%H%M%S")));
        out.push_str(&format!(
            "RRULE:FREQ=YEARLY;BYMONTH={};BYDAY={}\r\n",
            self.month, self.by_day
        ));
        out.push_str(&format!("END:{kind}\r\n"));
    }

    /// The date this observance starts in `year`, per its yearly rule.
    pub fn transition_date(&self, year: i32) -> Option<NaiveDate> {
        let (ordinal, weekday) = parse_by_day(&self.by_day)?;
        if ordinal > 0 {
            NaiveDate::from_weekday_of_month_opt(year, self.month, weekday, ordinal as u8)
        } else {
            let (next_year, next_month) = if self.month == 12 {
                (year + 1, 1)
            } else {
                (year, self.month + 1)
            };
            let mut date = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
            while date.weekday() != weekday {
                date = date.pred_opt()?;
            }
            let back = i64::from(-ordinal - 1) * 7;
            let date = date - chrono::Duration::days(back);
            (date.month() == self.month).then_some(date)
        }
    }
}

/// A zone with one daylight and one standard observance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneBlock {
    pub tzid: String,
    pub daylight: Observance,
    pub standard: Observance,
}

impl TimezoneBlock {
    /// US Central time: second Sunday in March to first Sunday in November.
    pub fn america_chicago() -> Self {
        Self {
            tzid: "America/Chicago".to_string(),
            daylight: Observance {
                tzname: "CDT".to_string(),
                offset_from_secs: -6 * 3600,
                offset_to_secs: -5 * 3600,
                dtstart: ymd_hms(1970, 3, 8, 2),
                month: 3,
                by_day: "2SU".to_string(),
            },
            standard: Observance {
                tzname: "CST".to_string(),
                offset_from_secs: -5 * 3600,
                offset_to_secs: -6 * 3600,
                dtstart: ymd_hms(1970, 11, 1, 2),
                month: 11,
                by_day: "1SU".to_string(),
            },
        }
    }

    /// Renders the block as CRLF-terminated content lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("BEGIN:VTIMEZONE\r\n");
        out.push_str(&format!("TZID:{}\r\n", self.tzid));
        self.daylight.write("DAYLIGHT", &mut out);
        self.standard.write("STANDARD", &mut out);
        out.push_str("END:VTIMEZONE\r\n");
        out
    }

    /// Compares the block with the tz database for `year`.
    ///
    /// For each observance, the offset at noon the day before its
    /// transition must be `offset_from` and at noon the day after it
    /// `offset_to`. Returns a description of every disagreement.
    pub fn check_against(&self, tz: Tz, year: i32) -> Vec<String> {
        let mut problems = Vec::new();
        for (kind, observance) in [("daylight", &self.daylight), ("standard", &self.standard)] {
            let Some(date) = observance.transition_date(year) else {
                problems.push(format!(
                    "{kind}: cannot resolve BYDAY={} in month {}",
                    observance.by_day, observance.month
                ));
                continue;
            };

            let probes = [
                (date.pred_opt(), observance.offset_from_secs, "before"),
                (date.succ_opt(), observance.offset_to_secs, "after"),
            ];
            for (probe, expected, when) in probes {
                let Some(probe) = probe.and_then(|d| d.and_hms_opt(12, 0, 0)) else {
                    continue;
                };
                let actual = match tz.from_local_datetime(&probe).earliest() {
                    Some(t) => chrono::Offset::fix(t.offset()).local_minus_utc(),
                    None => continue,
                };
                if actual != expected {
                    problems.push(format!(
                        "{kind}: offset {when} {date} is {} in {}, block says {}",
                        utc_offset(actual),
                        tz.name(),
                        utc_offset(expected)
                    ));
                }
            }
        }
        problems
    }
}

fn ymd_hms(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .unwrap_or_default()
}

/// `-0500` style UTC offset.
fn utc_offset(secs: i32) -> String {
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    format!("{sign}{:02}{:02}", secs / 3600, (secs % 3600) / 60)
}

/// Splits `2SU` into (2, Sunday) and `-1SU` into (-1, Sunday).
fn parse_by_day(by_day: &str) -> Option<(i32, Weekday)> {
    let split = by_day.len().checked_sub(2)?;
    let (ordinal, day) = by_day.split_at(split);
    let ordinal: i32 = ordinal.parse().ok()?;
    if ordinal == 0 || !(-5..=5).contains(&ordinal) {
        return None;
    }
    let weekday = match day {
        "MO" => Weekday::Mon,
        "TU" => Weekday::Tue,
        "WE" => Weekday::Wed,
        "TH" => Weekday::Thu,
        "FR" => Weekday::Fri,
        "SA" => Weekday::Sat,
        "SU" => Weekday::Sun,
        _ => return None,
    };
    Some((ordinal, weekday))
}
