//! Calendar feed assembly.
//!
//! Feeds are built with the `icalendar` object model. Two things it cannot
//! express, a custom `PRODID` and a nested `VTIMEZONE`, are spliced into its
//! output when the feed is rendered.

use chrono::{DateTime, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, EventLike, Property, ValueType};
use std::fmt;
use tracing::debug;

use super::format::{format_description, format_summary};
use super::timezone::TimezoneBlock;
use super::types::{CalendarDay, Meeting};
use crate::config::ServiceConfig;
use crate::db::RowStream;
use crate::error::{FeedError, IncompleteFeed};

/// Longest content line allowed before folding, in octets.
const MAX_LINE_OCTETS: usize = 75;

/// What a feed covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedScope {
    School,
    Teacher(String),
    Room(String),
}

/// Immutable feed settings, built once from the service configuration.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub org_name: String,
    pub org_domain: String,
    pub tz: Tz,
    pub timezone: TimezoneBlock,
    rendered_timezone: String,
}

impl FeedSettings {
    pub fn new(org_name: &str, org_domain: &str, tz: Tz, timezone: TimezoneBlock) -> Self {
        let rendered_timezone = timezone.render();
        Self {
            org_name: org_name.to_string(),
            org_domain: org_domain.to_string(),
            tz,
            timezone,
            rendered_timezone,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, FeedError> {
        Ok(Self::new(
            &config.org_name,
            &config.org_domain,
            config.tz()?,
            config.vtimezone.clone(),
        ))
    }

    fn prodid(&self, scope: &FeedScope) -> String {
        match scope {
            FeedScope::School => format!("-//{}//powerschool calendar//EN", self.org_domain),
            FeedScope::Teacher(name) | FeedScope::Room(name) => {
                format!("-//{}//powerschool calendar for {}//EN", self.org_domain, name)
            }
        }
    }

    fn calendar_name(&self, scope: &FeedScope) -> String {
        match scope {
            FeedScope::School => format!("{} PowerSchool", self.org_name),
            FeedScope::Teacher(login) => format!("{}@{} PowerSchool", login, self.org_domain),
            FeedScope::Room(room) => format!("Room {} for PowerSchool", room),
        }
    }

    fn calendar_description(&self, scope: &FeedScope) -> String {
        match scope {
            FeedScope::School => format!("{} PowerSchool common calendar", self.org_name),
            FeedScope::Teacher(login) => {
                format!("{} PowerSchool teacher calendar for {}", self.org_name, login)
            }
            FeedScope::Room(room) => {
                format!("{} PowerSchool room calendar for {}", self.org_name, room)
            }
        }
    }

    fn mailto(&self, login: &str) -> String {
        format!("mailto:{}@{}", login, self.org_domain)
    }
}

/// An assembled feed: container metadata, one timezone block and its events.
#[derive(Debug)]
pub struct CalendarFeed {
    calendar: Calendar,
    prodid: String,
    timezone: String,
    events: usize,
}

impl CalendarFeed {
    fn new(settings: &FeedSettings, scope: &FeedScope) -> Self {
        let mut calendar = Calendar::new();
        calendar.append_property(Property::new("METHOD", "PUBLISH"));
        calendar.append_property(Property::new("X-WR-CALNAME", &settings.calendar_name(scope)));
        calendar.append_property(Property::new(
            "X-WR-CALDESC",
            &settings.calendar_description(scope),
        ));
        calendar.append_property(Property::new("X-WR-TIMEZONE", &settings.timezone.tzid));

        Self {
            calendar,
            prodid: settings.prodid(scope),
            timezone: settings.rendered_timezone.clone(),
            events: 0,
        }
    }

    fn push(&mut self, event: icalendar::Event) {
        self.calendar.push(event);
        self.events += 1;
    }

    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Events plus the timezone block.
    pub fn component_count(&self) -> usize {
        self.events + 1
    }

    /// Renders the feed as iCalendar text.
    pub fn to_ics(&self) -> String {
        let raw = self.calendar.to_string();
        let mut out = String::with_capacity(raw.len() + self.timezone.len());
        let mut timezone_written = false;
        let mut in_dropped_line = false;

        for line in raw.lines() {
            if line.is_empty() {
                continue;
            }
            // Continuation lines of a dropped property go with it.
            if in_dropped_line && (line.starts_with(' ') || line.starts_with('\t')) {
                continue;
            }
            in_dropped_line = false;

            if line.starts_with("PRODID:") {
                in_dropped_line = true;
                continue;
            }

            if !timezone_written && (line == "BEGIN:VEVENT" || line == "END:VCALENDAR") {
                out.push_str(&self.timezone);
                timezone_written = true;
            }

            out.push_str(line);
            out.push_str("\r\n");
            if line == "BEGIN:VCALENDAR" {
                push_folded(&mut out, &format!("PRODID:{}", escape_text(&self.prodid)));
            }
        }

        out
    }
}

impl fmt::Display for CalendarFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ics())
    }
}

/// Builds feeds from record streams.
///
/// Every event of one assembler shares the same `DTSTAMP`.
pub struct CalendarAssembler<'a> {
    settings: &'a FeedSettings,
    stamp: DateTime<Utc>,
}

impl<'a> CalendarAssembler<'a> {
    pub fn new(settings: &'a FeedSettings, stamp: DateTime<Utc>) -> Self {
        Self { settings, stamp }
    }

    /// The whole-school feed: one all-day event per day with a summary.
    pub async fn school(
        &self,
        mut days: RowStream<CalendarDay>,
    ) -> Result<CalendarFeed, IncompleteFeed> {
        let mut feed = CalendarFeed::new(self.settings, &FeedScope::School);

        while let Some(day) = days.next().await {
            let day = match day {
                Ok(day) => day,
                Err(source) => {
                    return Err(IncompleteFeed {
                        partial: feed,
                        source,
                    })
                }
            };
            match self.day_event(&day) {
                Some(event) => feed.push(event),
                None => debug!(date = %day.date, cycle_day = %day.cycle_day, "no event for day"),
            }
        }

        Ok(feed)
    }

    /// A teacher or room feed: one timed event per meeting.
    pub async fn meetings(
        &self,
        scope: FeedScope,
        mut meetings: RowStream<Meeting>,
    ) -> Result<CalendarFeed, IncompleteFeed> {
        let mut feed = CalendarFeed::new(self.settings, &scope);

        while let Some(meeting) = meetings.next().await {
            match meeting {
                Ok(meeting) => feed.push(self.meeting_event(&meeting)),
                Err(source) => {
                    return Err(IncompleteFeed {
                        partial: feed,
                        source,
                    })
                }
            }
        }

        Ok(feed)
    }

    /// An all-day event spanning `[date, date + 1)`, or `None` for days
    /// with nothing to show.
    pub fn day_event(&self, day: &CalendarDay) -> Option<icalendar::Event> {
        let summary = format_summary(day);
        if summary.is_empty() {
            return None;
        }
        let end = day.date.succ_opt()?;

        let mut event = icalendar::Event::new();
        event.uid(&day_uid(day.date, &self.settings.org_domain));
        event.summary(&summary);
        event.description(&format_description(day));
        event.add_property("DTSTAMP", &self.dtstamp());
        event.append_property(date_property("DTSTART", day.date));
        event.append_property(date_property("DTEND", end));
        Some(event.done())
    }

    /// A timed event from `start` to `start + duration`, in the feed's zone.
    pub fn meeting_event(&self, meeting: &Meeting) -> icalendar::Event {
        let start = meeting.start.with_timezone(&self.settings.tz);
        let end = meeting.end().with_timezone(&self.settings.tz);
        let tzid = &self.settings.timezone.tzid;
        let start_stamp = start.format("%Y%m%dT%H%M%S").to_string();

        let mut event = icalendar::Event::new();
        event.uid(&format!(
            "PS-{}-{}-{}@{}",
            meeting.course_number, meeting.section_number, start_stamp, self.settings.org_domain
        ));
        event.summary(&meeting.course_name);
        event.description(&format!(
            "{} ({}-{}) -- {}",
            meeting.course_name, meeting.course_number, meeting.section_number, meeting.room
        ));
        if !meeting.room.is_empty() {
            event.location(&meeting.room);
        }
        event.add_property("DTSTAMP", &self.dtstamp());

        let mut dtstart = Property::new("DTSTART", &start_stamp);
        dtstart.add_parameter("TZID", tzid);
        event.append_property(dtstart);

        // Readers take a repeated wall-clock time as its first occurrence, so
        // an end in the second one is published in UTC.
        let dtend = match self.settings.tz.from_local_datetime(&end.naive_local()) {
            LocalResult::Ambiguous(first, _) if first != end => Property::new(
                "DTEND",
                &end.with_timezone(&Utc).format("%Y%m%dT%H%M%SZ").to_string(),
            ),
            _ => {
                let mut dtend = Property::new("DTEND", &end.format("%Y%m%dT%H%M%S").to_string());
                dtend.add_parameter("TZID", tzid);
                dtend
            }
        };
        event.append_property(dtend);

        let mailto = self.settings.mailto(&meeting.teacher_login);
        event.append_property(Property::new("ORGANIZER", &mailto));

        let mut attendee = Property::new("ATTENDEE", &mailto);
        attendee.add_parameter("PARTSTAT", "ACCEPTED");
        attendee.add_parameter("ROLE", "REQ-PARTICIPANT");
        event.append_multi_property(attendee);

        event.done()
    }

    fn dtstamp(&self) -> String {
        self.stamp.format("%Y%m%dT%H%M%SZ").to_string()
    }
}

/// Stable identifier for the school calendar event on `date`.
pub fn day_uid(date: NaiveDate, domain: &str) -> String {
    format!("PS-Calendar-{}@{}", date.format("%Y%m%d"), domain)
}

fn date_property(name: &str, date: NaiveDate) -> Property {
    let mut prop = Property::new(name, &date.format("%Y%m%d").to_string());
    prop.append_parameter(ValueType::Date);
    prop
}

/// Escapes a TEXT value: backslash, semicolon, comma and newline.
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Appends `line` with CRLF, folding at 75 octets on character boundaries.
fn push_folded(out: &mut String, line: &str) {
    let mut budget = MAX_LINE_OCTETS;
    let mut used = 0;
    for ch in line.chars() {
        if used + ch.len_utf8() > budget {
            out.push_str("\r\n ");
            // The leading space counts against the continuation line.
            budget = MAX_LINE_OCTETS - 1;
            used = 0;
        }
        out.push(ch);
        used += ch.len_utf8();
    }
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;

    fn settings() -> FeedSettings {
        FeedSettings::new("IMSA", "imsa.edu", Chicago, TimezoneBlock::america_chicago())
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 30, 12, 0, 0).unwrap()
    }

    fn day(date: (i32, u32, u32), cycle_day: &str, bell_schedule: &str, note: &str) -> CalendarDay {
        CalendarDay {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            in_session: true,
            note: note.to_string(),
            bell_schedule: bell_schedule.to_string(),
            cycle_day: cycle_day.to_string(),
        }
    }

    fn meeting(hour: u32, minute: u32, duration_minutes: u32, section_number: i64) -> Meeting {
        Meeting {
            teacher_login: "fogel".to_string(),
            start: Chicago.with_ymd_and_hms(2024, 9, 3, hour, minute, 0).unwrap(),
            duration_minutes,
            course_name: "Calculus".to_string(),
            course_number: "MAT321".to_string(),
            section_number,
            room: "A113".to_string(),
        }
    }

    /// Feeds `items` through a single-slot handoff, like the store worker does.
    fn stream_of<T: Send + 'static>(items: Vec<Result<T, FeedError>>) -> RowStream<T> {
        let (tx, rows) = RowStream::channel();
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        rows
    }

    fn count(text: &str, line: &str) -> usize {
        text.lines().filter(|l| *l == line).count()
    }

    /// Property values of `name` in an unfolded rendering.
    fn values<'t>(text: &'t str, name: &str) -> Vec<&'t str> {
        text.lines()
            .filter_map(|l| {
                let (key, value) = l.split_once(':')?;
                let key = key.split(';').next()?;
                (key == name).then_some(value)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_stream_gives_timezone_only() {
        let settings = settings();
        let feed = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(vec![]))
            .await
            .unwrap();

        assert_eq!(feed.event_count(), 0);
        assert_eq!(feed.component_count(), 1);
        let text = feed.to_ics();
        assert_eq!(count(&text, "BEGIN:VTIMEZONE"), 1);
        assert_eq!(count(&text, "BEGIN:VEVENT"), 0);
        assert!(text.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(text.ends_with("END:VCALENDAR\r\n"));
    }

    #[tokio::test]
    async fn test_container_metadata() {
        let settings = settings();
        let feed = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(vec![]))
            .await
            .unwrap();
        let text = feed.to_ics();

        assert_eq!(values(&text, "PRODID"), vec!["-//imsa.edu//powerschool calendar//EN"]);
        assert_eq!(values(&text, "METHOD"), vec!["PUBLISH"]);
        assert_eq!(values(&text, "CALSCALE"), vec!["GREGORIAN"]);
        assert_eq!(values(&text, "VERSION"), vec!["2.0"]);
        assert_eq!(values(&text, "X-WR-CALNAME"), vec!["IMSA PowerSchool"]);
        assert_eq!(values(&text, "X-WR-CALDESC"), vec!["IMSA PowerSchool common calendar"]);
        assert_eq!(values(&text, "X-WR-TIMEZONE"), vec!["America/Chicago"]);
    }

    #[tokio::test]
    async fn test_single_school_day() {
        let settings = settings();
        let feed = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(vec![Ok(day((2024, 9, 2), "B", "Full Day B", ""))]))
            .await
            .unwrap();
        let text = feed.to_ics();

        assert_eq!(feed.event_count(), 1);
        assert_eq!(values(&text, "SUMMARY"), vec!["B"]);
        assert!(text.lines().any(|l| l == "DTSTART;VALUE=DATE:20240902"));
        assert!(text.lines().any(|l| l == "DTEND;VALUE=DATE:20240903"));
        assert_eq!(values(&text, "UID"), vec!["PS-Calendar-20240902@imsa.edu"]);
        assert_eq!(values(&text, "DTSTAMP"), vec!["20240830T120000Z"]);
    }

    #[tokio::test]
    async fn test_days_without_summary_are_skipped() {
        let settings = settings();
        let days = vec![
            Ok(day((2024, 9, 2), "X", "Full Day A", "")),
            Ok(day((2024, 9, 3), "", "", "")),
            Ok(day((2024, 9, 4), "", "", "Holiday")),
            Ok(day((2024, 9, 5), "A", "Half Day", "")),
        ];
        let feed = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(days))
            .await
            .unwrap();

        assert_eq!(feed.event_count(), 2);
        assert_eq!(values(&feed.to_ics(), "SUMMARY"), vec!["Holiday", "A (Half Day)"]);
    }

    #[tokio::test]
    async fn test_school_uids_are_stable_across_regeneration() {
        let settings = settings();
        let input = || {
            vec![
                Ok(day((2024, 9, 3), "A", "Full Day A", "")),
                Ok(day((2024, 9, 4), "B", "Half Day", "Assembly")),
            ]
        };

        let first = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(input()))
            .await
            .unwrap()
            .to_ics();
        let later = stamp() + chrono::Duration::hours(5);
        let second = CalendarAssembler::new(&settings, later)
            .school(stream_of(input()))
            .await
            .unwrap()
            .to_ics();

        let uids = values(&first, "UID");
        assert_eq!(uids.len(), 2);
        assert_eq!(uids, values(&second, "UID"));
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_built_events() {
        let settings = settings();
        let days = vec![
            Ok(day((2024, 9, 3), "A", "Full Day A", "")),
            Ok(day((2024, 9, 4), "B", "Full Day B", "")),
            Ok(day((2024, 9, 5), "C", "Full Day C", "")),
            Err(FeedError::RowDecode {
                message: "column 0: invalid type".to_string(),
            }),
            Ok(day((2024, 9, 6), "D", "Full Day D", "")),
        ];

        let err = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(days))
            .await
            .unwrap_err();

        assert_eq!(err.partial.event_count(), 3);
        assert!(matches!(err.source, FeedError::RowDecode { .. }));
        assert_eq!(values(&err.partial.to_ics(), "SUMMARY"), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_teacher_feed_metadata() {
        let settings = settings();
        let feed = CalendarAssembler::new(&settings, stamp())
            .meetings(FeedScope::Teacher("fogel".to_string()), stream_of(vec![]))
            .await
            .unwrap();
        let text = feed.to_ics();

        assert_eq!(
            values(&text, "PRODID"),
            vec!["-//imsa.edu//powerschool calendar for fogel//EN"]
        );
        assert_eq!(values(&text, "X-WR-CALNAME"), vec!["fogel@imsa.edu PowerSchool"]);
        assert_eq!(
            values(&text, "X-WR-CALDESC"),
            vec!["IMSA PowerSchool teacher calendar for fogel"]
        );
    }

    #[tokio::test]
    async fn test_room_feed_metadata() {
        let settings = settings();
        let feed = CalendarAssembler::new(&settings, stamp())
            .meetings(FeedScope::Room("A113".to_string()), stream_of(vec![]))
            .await
            .unwrap();
        let text = feed.to_ics();

        assert_eq!(values(&text, "X-WR-CALNAME"), vec!["Room A113 for PowerSchool"]);
        assert_eq!(
            values(&text, "X-WR-CALDESC"),
            vec!["IMSA PowerSchool room calendar for A113"]
        );
    }

    #[tokio::test]
    async fn test_meeting_event_shape() {
        let settings = settings();
        let feed = CalendarAssembler::new(&settings, stamp())
            .meetings(
                FeedScope::Teacher("fogel".to_string()),
                stream_of(vec![Ok(meeting(8, 5, 100, 1))]),
            )
            .await
            .unwrap();
        let text = feed.to_ics();

        assert!(text
            .lines()
            .any(|l| l == "DTSTART;TZID=America/Chicago:20240903T080500"));
        assert!(text
            .lines()
            .any(|l| l == "DTEND;TZID=America/Chicago:20240903T094500"));
        assert_eq!(values(&text, "SUMMARY"), vec!["Calculus"]);
        assert_eq!(values(&text, "UID"), vec!["PS-MAT321-1-20240903T080500@imsa.edu"]);
        assert_eq!(values(&text, "ORGANIZER"), vec!["mailto:fogel@imsa.edu"]);
        assert_eq!(values(&text, "ATTENDEE"), vec!["mailto:fogel@imsa.edu"]);
        assert_eq!(values(&text, "LOCATION"), vec!["A113"]);
        let attendee = text.lines().find(|l| l.starts_with("ATTENDEE")).unwrap();
        assert!(attendee.contains("PARTSTAT=ACCEPTED"));
        assert!(attendee.contains("ROLE=REQ-PARTICIPANT"));
    }

    #[tokio::test]
    async fn test_meeting_end_is_start_plus_duration() {
        let settings = settings();
        for (duration, dtend) in [
            (0, "20240903T135500"),
            (45, "20240903T144000"),
            (100, "20240903T153500"),
            (24 * 60 + 7, "20240904T140200"),
        ] {
            let text = CalendarAssembler::new(&settings, stamp())
                .meetings(
                    FeedScope::Room("A113".to_string()),
                    stream_of(vec![Ok(meeting(13, 55, duration, 2))]),
                )
                .await
                .unwrap()
                .to_ics();
            assert_eq!(values(&text, "DTEND"), vec![dtend]);
        }
    }

    #[tokio::test]
    async fn test_end_in_repeated_hour_is_published_in_utc() {
        let settings = settings();
        let fall_back = |duration_minutes| Meeting {
            start: Chicago.with_ymd_and_hms(2024, 11, 3, 0, 30, 0).unwrap(),
            duration_minutes,
            ..meeting(0, 30, 0, 1)
        };
        let text = CalendarAssembler::new(&settings, stamp())
            .meetings(
                FeedScope::Room("A113".to_string()),
                stream_of(vec![Ok(fall_back(90)), Ok(fall_back(45))]),
            )
            .await
            .unwrap()
            .to_ics();

        // 90 minutes ends at the second 01:00 (CST); 45 ends in the first.
        assert!(text.lines().any(|l| l == "DTEND:20241103T070000Z"));
        assert!(text
            .lines()
            .any(|l| l == "DTEND;TZID=America/Chicago:20241103T011500"));
    }

    #[tokio::test]
    async fn test_prodid_is_text_escaped() {
        let settings = settings();
        let text = CalendarAssembler::new(&settings, stamp())
            .meetings(FeedScope::Room("Lab;2,East".to_string()), stream_of(vec![]))
            .await
            .unwrap()
            .to_ics();

        assert_eq!(
            values(&text, "PRODID"),
            vec!["-//imsa.edu//powerschool calendar for Lab\\;2\\,East//EN"]
        );
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a;b,c\\d\ne"), "a\\;b\\,c\\\\d\\ne");
        assert_eq!(escape_text("plain"), "plain");
    }

    #[tokio::test]
    async fn test_meeting_uids_differ_by_section_and_time() {
        let settings = settings();
        let meetings = vec![
            Ok(meeting(8, 5, 50, 1)),
            Ok(meeting(8, 5, 50, 2)),
            Ok(meeting(9, 0, 50, 1)),
        ];
        let text = CalendarAssembler::new(&settings, stamp())
            .meetings(FeedScope::Room("A113".to_string()), stream_of(meetings))
            .await
            .unwrap()
            .to_ics();

        let mut uids = values(&text, "UID");
        assert_eq!(uids.len(), 3);
        uids.dedup();
        assert_eq!(uids.len(), 3);
    }

    #[tokio::test]
    async fn test_timezone_precedes_events() {
        let settings = settings();
        let text = CalendarAssembler::new(&settings, stamp())
            .school(stream_of(vec![Ok(day((2024, 9, 2), "A", "", ""))]))
            .await
            .unwrap()
            .to_ics();

        let tz_at = text.find("BEGIN:VTIMEZONE").unwrap();
        let event_at = text.find("BEGIN:VEVENT").unwrap();
        assert!(tz_at < event_at);
    }

    #[test]
    fn test_long_prodid_is_folded() {
        let mut out = String::new();
        let line = format!("PRODID:-//imsa.edu//powerschool calendar for {}//EN", "x".repeat(80));
        push_folded(&mut out, &line);

        let physical: Vec<&str> = out.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert!(physical.len() > 1);
        assert!(physical.iter().all(|l| l.len() <= MAX_LINE_OCTETS));
        assert!(physical[1..].iter().all(|l| l.starts_with(' ')));
        let unfolded: String = physical
            .iter()
            .enumerate()
            .map(|(i, l)| if i == 0 { *l } else { &l[1..] })
            .collect();
        assert_eq!(unfolded, line);
    }
}
