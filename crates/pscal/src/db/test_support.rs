//! Throwaway PowerSchool-shaped stores for tests.

use rusqlite::Connection;
use std::path::PathBuf;
use tempfile::TempDir;

use super::PsDb;
use crate::config::ServiceConfig;

pub(crate) const SCHEMA_SQL: &str = include_str!("../../../../sql/powerschool_schema.sql");

/// School year 2024-2025 (yearid 34, full-year term 3400).
///
/// Calendar: Labor Day holiday, then A / B (half day) / A days. Teacher
/// `fogel` teaches MAT321-1 in A113 on A days, periods 2-3, and an excluded
/// advisory section in period 1. A Nav section (SLD200) meets in B210 in
/// period 1 on A days; it belongs in room feeds only.
const FIXTURE_SQL: &str = "
INSERT INTO terms (id, schoolid, yearid, firstday, lastday)
VALUES (3400, 140177, 34, '2024-08-15', '2025-06-01');

INSERT INTO bell_schedule (id, schoolid, year_id, name) VALUES
    (1, 140177, 34, 'Full Day A'),
    (2, 140177, 34, 'Half Day');

INSERT INTO cycle_day (id, schoolid, year_id, letter, abbreviation) VALUES
    (1, 140177, 34, 'A', 'A'),
    (2, 140177, 34, 'B', 'B');

INSERT INTO calendar_day (schoolid, date_value, insession, note, bell_schedule_id, cycle_day_id) VALUES
    (140177, '2024-09-02', 0, 'Labor Day', NULL, NULL),
    (140177, '2024-09-03', 1, NULL, 1, 1),
    (140177, '2024-09-04', 1, 'Early dismissal', 2, 2),
    (140177, '2024-09-05', 1, NULL, 1, 1),
    (140177, '2025-07-15', 0, 'Summer', NULL, NULL);

INSERT INTO teachers (id, loginid, first_name, last_name) VALUES
    (1, 'fogel', 'Dan', 'Fogel'),
    (2, NULL, 'New', 'Staff');

INSERT INTO courses (course_number, course_name) VALUES
    ('MAT321', 'Calculus'),
    ('SLD100', 'Advisory'),
    ('SLD200', 'Nav');

INSERT INTO sections (id, schoolid, termid, teacher, course_number, section_number, room) VALUES
    (1, 140177, 3400, 1, 'MAT321', 1, 'A113'),
    (2, 140177, 3400, 1, 'SLD100', 4, 'A113'),
    (3, 140177, 3400, 2, 'MAT321', 2, 'A113'),
    (4, 140177, 3400, 1, 'SLD200', 1, 'B210');

INSERT INTO section_meeting (sectionid, cycle_day_letter, period_number) VALUES
    (1, 'A', 2),
    (1, 'A', 3),
    (2, 'A', 1),
    (3, 'A', 1),
    (4, 'A', 1);

INSERT INTO period (id, schoolid, year_id, period_number) VALUES
    (11, 140177, 34, 1),
    (12, 140177, 34, 2),
    (13, 140177, 34, 3);

INSERT INTO bell_schedule_items (bell_schedule_id, period_id, start_time, end_time) VALUES
    (1, 11, 27000, 28800),
    (1, 12, 29100, 31800),
    (1, 13, 32100, 35100),
    (2, 11, 27000, 28200),
    (2, 12, 28500, 29700);

INSERT INTO students (schoolid, student_number, first_name, last_name, room, dob, student_web_id, enroll_status) VALUES
    (140177, 20252, 'Alan', 'Turing', '1502', '2008-06-23', 'aturing', 0),
    (140177, 20251, 'Ada', 'Lovelace', NULL, '2008-12-10', 'alovelace', 0),
    (140177, 20199, 'Grace', 'Hopper', '1104', '2007-12-09', 'ghopper', 2);
";

pub(crate) struct TestStore {
    _dir: TempDir,
    pub path: PathBuf,
    pub config: ServiceConfig,
    pub db: PsDb,
}

impl TestStore {
    /// Runs statements against the store through a writable connection.
    pub fn execute(&self, sql: &str) {
        let conn = Connection::open(&self.path).unwrap();
        conn.execute_batch(sql).unwrap();
    }
}

/// A store with the schema and no rows.
pub(crate) fn empty_store() -> TestStore {
    build_store(false, |_| {})
}

/// A store holding the fixture school year.
pub(crate) fn seeded_store() -> TestStore {
    build_store(true, |_| {})
}

/// A seeded store whose config is adjusted before the handle is built.
pub(crate) fn seeded_store_with(adjust: impl FnOnce(&mut ServiceConfig)) -> TestStore {
    build_store(true, adjust)
}

fn build_store(seed: bool, adjust: impl FnOnce(&mut ServiceConfig)) -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("powerschool.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(SCHEMA_SQL).unwrap();
    if seed {
        conn.execute_batch(FIXTURE_SQL).unwrap();
    }
    drop(conn);

    let mut config = ServiceConfig {
        database: path.clone(),
        ..ServiceConfig::default()
    };
    adjust(&mut config);
    let db = PsDb::new(&config).unwrap();

    TestStore {
        _dir: dir,
        path,
        config,
        db,
    }
}
