//! Error types for the feed pipeline.

use thiserror::Error;

use crate::schedule::CalendarFeed;

/// Errors that can occur while querying the store and mapping its rows.
#[derive(Debug, Error, Clone)]
pub enum FeedError {
    /// The store could not be opened
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The statement could not be prepared, bound or executed
    #[error("Query failed: {message}")]
    Query { message: String },

    /// A row could not be read from the cursor or a column had the wrong type
    #[error("Row decode failed: {message}")]
    RowDecode { message: String },

    /// A date or time column did not match its expected layout
    #[error("Cannot parse {value:?} as {layout}: {message}")]
    DateParse {
        value: String,
        layout: &'static str,
        message: String,
    },

    /// A local time does not exist in the configured zone
    #[error("Local time {local} does not exist in {zone}")]
    Timezone { local: String, zone: String },

    /// Invalid service configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl FeedError {
    pub fn connection(err: rusqlite::Error) -> Self {
        FeedError::Connection {
            message: err.to_string(),
        }
    }

    pub fn query(err: rusqlite::Error) -> Self {
        FeedError::Query {
            message: err.to_string(),
        }
    }

    pub fn row_decode(err: rusqlite::Error) -> Self {
        FeedError::RowDecode {
            message: err.to_string(),
        }
    }

    pub fn date_parse(value: &str, layout: &'static str, err: chrono::ParseError) -> Self {
        FeedError::DateParse {
            value: value.to_string(),
            layout,
            message: err.to_string(),
        }
    }

    /// Returns true if the failure happened before any row was produced.
    pub fn is_query_issue(&self) -> bool {
        matches!(
            self,
            FeedError::Connection { .. } | FeedError::Query { .. } | FeedError::Config { .. }
        )
    }

    /// Returns true if the failure came from mapping a row that was already fetched.
    pub fn is_mapping_failure(&self) -> bool {
        matches!(
            self,
            FeedError::RowDecode { .. } | FeedError::DateParse { .. } | FeedError::Timezone { .. }
        )
    }
}

/// A record stream failed part way through assembly.
///
/// `partial` holds every event built before the failure. Callers decide
/// whether that is worth anything; the HTTP layer never serves it.
#[derive(Debug, Error)]
#[error("feed incomplete after {} events: {source}", .partial.event_count())]
pub struct IncompleteFeed {
    pub partial: CalendarFeed,
    #[source]
    pub source: FeedError,
}
