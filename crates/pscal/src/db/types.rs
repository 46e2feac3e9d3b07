/// Raw rows as selected from the PowerSchool tables, before mapping

use rusqlite::Row;

#[derive(Debug, Clone)]
pub struct DbCalendarDay {
    pub date_value: String, // YYYY-MM-DD
    pub insession: i64,
    pub note: Option<String>,
    pub bell_schedule: Option<String>,
    pub cycle_day: Option<String>,
}

impl DbCalendarDay {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbCalendarDay {
            date_value: row.get(0)?,
            insession: row.get(1)?,
            note: row.get(2)?,
            bell_schedule: row.get(3)?,
            cycle_day: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DbMeeting {
    pub loginid: String,
    pub date: String,  // YYYYMMDD
    pub start: String, // HHMM, 24-hour
    pub duration: i64, // minutes
    pub course_name: Option<String>,
    pub course_number: String,
    pub section_number: i64,
    pub room: Option<String>,
}

impl DbMeeting {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbMeeting {
            loginid: row.get(0)?,
            date: row.get(1)?,
            start: row.get(2)?,
            duration: row.get(3)?,
            course_name: row.get(4)?,
            course_number: row.get(5)?,
            section_number: row.get(6)?,
            room: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DbStudent {
    pub student_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub room: Option<String>,
    /// Either `student_web_id` or `dob`, depending on the configured identity
    pub credential: Option<String>,
}

impl DbStudent {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DbStudent {
            student_number: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            room: row.get(3)?,
            credential: row.get(4)?,
        })
    }
}
