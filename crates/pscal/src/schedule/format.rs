//! Human-readable summary and description text for calendar days.

use super::types::CalendarDay;

/// Cycle days that are worth a banner in the school calendar.
const DISPLAYED_CYCLE_DAYS: [&str; 5] = ["A", "B", "C", "D", "I"];

/// Bell schedules with this prefix are the normal day and go unmentioned.
const DEFAULT_BELL_PREFIX: &str = "Full Day";

pub fn is_displayed_cycle_day(cycle_day: &str) -> bool {
    DISPLAYED_CYCLE_DAYS.contains(&cycle_day)
}

/// Event summary for a day, e.g. `"B (Half Day): Early dismissal"`.
///
/// Empty when the day has neither a displayed cycle day nor a note; such
/// days get no event.
pub fn format_summary(day: &CalendarDay) -> String {
    let mut summary = String::new();

    if is_displayed_cycle_day(&day.cycle_day) {
        summary.push_str(&day.cycle_day);
        if !day.bell_schedule.is_empty() && !day.bell_schedule.starts_with(DEFAULT_BELL_PREFIX) {
            summary.push_str(&format!(" ({})", day.bell_schedule));
        }
    }

    if !day.note.is_empty() {
        if !summary.is_empty() {
            summary.push_str(": ");
        }
        summary.push_str(&day.note);
    }

    summary
}

/// Event description listing every non-empty field of the day, one per line.
pub fn format_description(day: &CalendarDay) -> String {
    let mut description = String::new();

    if !day.cycle_day.is_empty() {
        description.push_str(&format!("Cycle Day: {}\n", day.cycle_day));
    }
    if !day.bell_schedule.is_empty() {
        description.push_str(&format!("Bell Schedule: {}\n", day.bell_schedule));
    }
    if !day.note.is_empty() {
        description.push_str(&format!("Note: {}\n", day.note));
    }

    description
}
