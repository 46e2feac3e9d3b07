//! School calendar and class schedule feeds.

mod feed;
mod format;
mod timezone;
mod types;

pub use feed::{day_uid, CalendarAssembler, CalendarFeed, FeedScope, FeedSettings};
pub use format::{format_description, format_summary, is_displayed_cycle_day};
pub use timezone::{Observance, TimezoneBlock};
pub use types::{CalendarDay, Meeting, Student, StudentCredential};
