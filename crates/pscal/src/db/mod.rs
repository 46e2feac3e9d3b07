/// Database module for reading calendar, schedule and roster data

mod stream;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use stream::RowStream;
pub use types::{DbCalendarDay, DbMeeting, DbStudent};

use chrono_tz::Tz;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{ServiceConfig, StudentIdentity};
use crate::error::FeedError;
use crate::schedule::{CalendarDay, Meeting, Student};

const CALENDAR_DAYS_SQL: &str = "
SELECT cd.date_value, cd.insession, cd.note, bs.name, cyd.abbreviation
FROM terms
JOIN calendar_day cd ON cd.date_value BETWEEN terms.firstday AND terms.lastday
                    AND cd.schoolid = terms.schoolid
LEFT OUTER JOIN bell_schedule bs ON cd.bell_schedule_id = bs.id
LEFT OUTER JOIN cycle_day cyd ON cd.cycle_day_id = cyd.id
WHERE terms.id = ?1 AND terms.schoolid = ?2
ORDER BY cd.date_value
";

/// Expands to the section meeting query with `$scope` as the extra filter.
///
/// Parameters: ?1 yearid, ?2 scope value, ?3 schoolid, ?4 JSON array of
/// excluded course numbers, ?5 first period number that is not a class.
macro_rules! meeting_query {
    ($scope:literal) => {
        concat!(
            "
WITH sm1 AS (SELECT sectionid, cycle_day_letter, MIN(period_number) AS period_min
             FROM section_meeting GROUP BY sectionid, cycle_day_letter),
     sm2 AS (SELECT sectionid, cycle_day_letter, MAX(period_number) AS period_max
             FROM section_meeting GROUP BY sectionid, cycle_day_letter)
SELECT teachers.loginid,
       strftime('%Y%m%d', cd.date_value),
       printf('%02d%02d', bsi1.start_time / 3600, (bsi1.start_time % 3600) / 60),
       (bsi2.end_time - bsi1.start_time) / 60,
       courses.course_name,
       s.course_number,
       s.section_number,
       s.room
FROM sections s
JOIN teachers ON s.teacher = teachers.id
JOIN courses ON s.course_number = courses.course_number
JOIN sm1 ON s.id = sm1.sectionid
JOIN sm2 ON s.id = sm2.sectionid AND sm1.cycle_day_letter = sm2.cycle_day_letter
JOIN terms ON s.termid = terms.id AND s.schoolid = terms.schoolid
JOIN period period1 ON sm1.period_min = period1.period_number
                   AND s.schoolid = period1.schoolid AND terms.yearid = period1.year_id
JOIN period period2 ON sm2.period_max = period2.period_number
                   AND s.schoolid = period2.schoolid AND terms.yearid = period2.year_id
JOIN cycle_day ON sm1.cycle_day_letter = cycle_day.letter
              AND terms.yearid = cycle_day.year_id AND cycle_day.schoolid = terms.schoolid
JOIN calendar_day cd ON cd.schoolid = s.schoolid
                    AND cd.date_value BETWEEN terms.firstday AND terms.lastday
                    AND cd.cycle_day_id = cycle_day.id
JOIN bell_schedule_items bsi1 ON period1.id = bsi1.period_id
                             AND cd.bell_schedule_id = bsi1.bell_schedule_id
JOIN bell_schedule_items bsi2 ON period2.id = bsi2.period_id
                             AND cd.bell_schedule_id = bsi2.bell_schedule_id
WHERE s.schoolid = ?3
  AND terms.yearid = ?1
  AND ",
            $scope,
            "
  AND period1.period_number < ?5
  AND s.course_number NOT IN (SELECT value FROM json_each(?4))
  AND teachers.loginid IS NOT NULL
ORDER BY teachers.loginid, cd.date_value, sm1.period_min
"
        )
    };
}

const TEACHER_MEETINGS_SQL: &str = meeting_query!("teachers.loginid = ?2");
const ROOM_MEETINGS_SQL: &str = meeting_query!("s.room = ?2");

/// Expands to the enrolled-student query selecting `$credential` last.
macro_rules! student_query {
    ($credential:literal) => {
        concat!(
            "
SELECT CAST(student_number AS TEXT), first_name, last_name, room, ",
            $credential,
            "
FROM students
WHERE schoolid = ?1 AND enroll_status = 0
ORDER BY last_name, first_name
"
        )
    };
}

const STUDENTS_BY_USERNAME_SQL: &str = student_query!("student_web_id");
const STUDENTS_BY_BIRTHDATE_SQL: &str = student_query!("dob");

/// Read-only access to a PowerSchool-shaped SQLite database.
///
/// Every query opens its own connection, owned by the worker that streams
/// the query's rows; nothing is shared between concurrent requests.
#[derive(Debug, Clone)]
pub struct PsDb {
    path: PathBuf,
    school_id: i64,
    excluded_courses: String,
    excluded_room_courses: String,
    max_period: i64,
    student_identity: StudentIdentity,
}

impl PsDb {
    /// Creates a handle for the configured database. No connection is opened here.
    pub fn new(config: &ServiceConfig) -> Result<Self, FeedError> {
        let excluded_courses =
            serde_json::to_string(&config.excluded_courses).map_err(|e| FeedError::Config {
                message: format!("excluded_courses: {e}"),
            })?;
        let excluded_room_courses = serde_json::to_string(&config.excluded_room_courses)
            .map_err(|e| FeedError::Config {
                message: format!("excluded_room_courses: {e}"),
            })?;

        Ok(Self {
            path: config.database.clone(),
            school_id: config.school_id,
            excluded_courses,
            excluded_room_courses,
            max_period: config.max_period,
            student_identity: config.student_identity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks that the database can be opened and holds the expected tables.
    pub fn ping(&self) -> Result<(), FeedError> {
        let conn = open_read_only(&self.path)?;
        conn.query_row("SELECT COUNT(*) FROM terms", [], |row| row.get::<_, i64>(0))
            .map_err(FeedError::query)?;
        Ok(())
    }

    /// Streams every calendar day of the given full-year term.
    pub async fn calendar_days(&self, term_id: i32) -> Result<RowStream<CalendarDay>, FeedError> {
        debug!(term_id, "querying calendar days");
        self.stream(
            CALENDAR_DAYS_SQL,
            vec![Value::Integer(term_id.into()), Value::Integer(self.school_id)],
            |row| {
                let raw = DbCalendarDay::from_row(row).map_err(FeedError::row_decode)?;
                debug!(?raw, "calendar day row");
                CalendarDay::try_from(raw)
            },
        )
        .await
    }

    /// Streams the course meetings taught by `loginid` during the given year.
    pub async fn teacher_meetings(
        &self,
        loginid: &str,
        year_id: i32,
        tz: Tz,
    ) -> Result<RowStream<Meeting>, FeedError> {
        debug!(loginid, year_id, "querying teacher meetings");
        let excluded = self.excluded_courses.clone();
        self.meetings(TEACHER_MEETINGS_SQL, loginid, excluded, year_id, tz)
            .await
    }

    /// Streams the course meetings held in `room` during the given year.
    pub async fn room_meetings(
        &self,
        room: &str,
        year_id: i32,
        tz: Tz,
    ) -> Result<RowStream<Meeting>, FeedError> {
        debug!(room, year_id, "querying room meetings");
        let excluded = self.excluded_room_courses.clone();
        self.meetings(ROOM_MEETINGS_SQL, room, excluded, year_id, tz)
            .await
    }

    async fn meetings(
        &self,
        sql: &'static str,
        scope_value: &str,
        excluded_courses: String,
        year_id: i32,
        tz: Tz,
    ) -> Result<RowStream<Meeting>, FeedError> {
        let params = vec![
            Value::Integer(year_id.into()),
            Value::Text(scope_value.to_string()),
            Value::Integer(self.school_id),
            Value::Text(excluded_courses),
            Value::Integer(self.max_period),
        ];

        self.stream(sql, params, move |row| {
            let raw = DbMeeting::from_row(row).map_err(FeedError::row_decode)?;
            debug!(?raw, "meeting row");
            Meeting::from_db(raw, tz)
        })
        .await
    }

    /// Streams the enrolled students, ordered by name.
    pub async fn students(&self) -> Result<RowStream<Student>, FeedError> {
        let identity = self.student_identity;
        let sql = match identity {
            StudentIdentity::Username => STUDENTS_BY_USERNAME_SQL,
            StudentIdentity::Birthdate => STUDENTS_BY_BIRTHDATE_SQL,
        };

        self.stream(sql, vec![Value::Integer(self.school_id)], move |row| {
            let raw = DbStudent::from_row(row).map_err(FeedError::row_decode)?;
            Student::from_db(raw, identity)
        })
        .await
    }

    /// Runs `sql` on a blocking worker and hands mapped rows over one at a time.
    ///
    /// Failures opening the database or issuing the statement are returned
    /// here, before any row is produced. A failure reading or mapping a row
    /// is delivered as the last item of the stream.
    pub async fn stream<T, F>(
        &self,
        sql: &'static str,
        params: Vec<Value>,
        mut map: F,
    ) -> Result<RowStream<T>, FeedError>
    where
        T: Send + 'static,
        F: FnMut(&Row<'_>) -> Result<T, FeedError> + Send + 'static,
    {
        let path = self.path.clone();
        let (tx, rows) = RowStream::channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<(), FeedError>>();

        tokio::task::spawn_blocking(move || {
            let conn = match open_read_only(&path) {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let mut stmt = match conn.prepare(sql) {
                Ok(stmt) => stmt,
                Err(e) => {
                    let _ = ready_tx.send(Err(FeedError::query(e)));
                    return;
                }
            };
            let mut cursor = match stmt.query(rusqlite::params_from_iter(params.iter())) {
                Ok(cursor) => cursor,
                Err(e) => {
                    let _ = ready_tx.send(Err(FeedError::query(e)));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                return;
            }

            let mut produced = 0usize;
            loop {
                let item = match cursor.next() {
                    Ok(Some(row)) => map(row),
                    Ok(None) => break,
                    Err(e) => Err(FeedError::row_decode(e)),
                };
                let failed = item.is_err();
                if let Err(e) = &item {
                    warn!(error = %e, produced, "row stream failed");
                }
                if tx.blocking_send(item).is_err() {
                    debug!(produced, "row stream abandoned by reader");
                    return;
                }
                if failed {
                    return;
                }
                produced += 1;
            }
            debug!(produced, "row stream exhausted");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(rows),
            Ok(Err(e)) => {
                warn!(error = %e, "query failed");
                Err(e)
            }
            Err(_) => Err(FeedError::Query {
                message: "store worker exited before issuing the query".to_string(),
            }),
        }
    }
}

fn open_read_only(path: &Path) -> Result<Connection, FeedError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(FeedError::connection)
}
