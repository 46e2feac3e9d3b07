pub mod calendar;
pub mod status;
pub mod students;
