/// Typed schedule records mapped from store rows
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::StudentIdentity;
use crate::db::{DbCalendarDay, DbMeeting, DbStudent};
use crate::error::FeedError;

const DATE_LAYOUT: &str = "%Y-%m-%d";
const MEETING_START_LAYOUT: &str = "%Y%m%d%H%M";

/// One school calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub in_session: bool,
    pub note: String,
    pub bell_schedule: String,
    pub cycle_day: String,
}

impl TryFrom<DbCalendarDay> for CalendarDay {
    type Error = FeedError;

    fn try_from(raw: DbCalendarDay) -> Result<Self, Self::Error> {
        let date = NaiveDate::parse_from_str(&raw.date_value, DATE_LAYOUT)
            .map_err(|e| FeedError::date_parse(&raw.date_value, "YYYY-MM-DD", e))?;

        Ok(CalendarDay {
            date,
            in_session: raw.insession != 0,
            note: raw.note.unwrap_or_default(),
            bell_schedule: raw.bell_schedule.unwrap_or_default(),
            cycle_day: raw.cycle_day.unwrap_or_default(),
        })
    }
}

/// One course section meeting on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct Meeting {
    pub teacher_login: String,
    pub start: DateTime<Tz>,
    pub duration_minutes: u32,
    pub course_name: String,
    pub course_number: String,
    pub section_number: i64,
    pub room: String,
}

impl Meeting {
    /// Maps a meeting row, reading its `YYYYMMDD` + `HHMM` start in `tz`.
    ///
    /// A wall-clock time skipped by a DST change is an error; a repeated
    /// one resolves to its first occurrence.
    pub fn from_db(raw: DbMeeting, tz: Tz) -> Result<Self, FeedError> {
        let stamp = format!("{}{}", raw.date, raw.start);
        let local = NaiveDateTime::parse_from_str(&stamp, MEETING_START_LAYOUT)
            .map_err(|e| FeedError::date_parse(&stamp, "YYYYMMDDHHMM", e))?;

        let start = match tz.from_local_datetime(&local) {
            LocalResult::Single(start) => start,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                return Err(FeedError::Timezone {
                    local: local.to_string(),
                    zone: tz.name().to_string(),
                })
            }
        };

        let duration_minutes = u32::try_from(raw.duration).map_err(|_| FeedError::RowDecode {
            message: format!(
                "negative duration {} for {}-{} at {}",
                raw.duration, raw.course_number, raw.section_number, stamp
            ),
        })?;

        Ok(Meeting {
            teacher_login: raw.loginid,
            start,
            duration_minutes,
            course_name: raw.course_name.unwrap_or_default(),
            course_number: raw.course_number,
            section_number: raw.section_number,
            room: raw.room.unwrap_or_default(),
        })
    }

    /// Start plus the meeting duration, exact to the minute.
    pub fn end(&self) -> DateTime<Tz> {
        self.start + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// The identifying field published for a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StudentCredential {
    Username(String),
    Birthdate(Option<NaiveDate>),
}

/// Roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Student {
    pub number: String,
    pub first_name: String,
    pub last_name: String,
    pub room: String,
    #[serde(flatten)]
    pub credential: StudentCredential,
}

impl Student {
    pub fn from_db(raw: DbStudent, identity: StudentIdentity) -> Result<Self, FeedError> {
        let credential = match identity {
            StudentIdentity::Username => {
                StudentCredential::Username(raw.credential.unwrap_or_default())
            }
            StudentIdentity::Birthdate => {
                let dob = match raw.credential.as_deref() {
                    None | Some("") => None,
                    Some(value) => Some(
                        NaiveDate::parse_from_str(value, DATE_LAYOUT)
                            .map_err(|e| FeedError::date_parse(value, "YYYY-MM-DD", e))?,
                    ),
                };
                StudentCredential::Birthdate(dob)
            }
        };

        Ok(Student {
            number: raw.student_number,
            first_name: raw.first_name.unwrap_or_default(),
            last_name: raw.last_name.unwrap_or_default(),
            room: raw.room.unwrap_or_default(),
            credential,
        })
    }
}
