use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::db::PsDb;
use crate::error::FeedError;
use crate::schedule::FeedSettings;

/// Everything a request handler needs. Built once at startup, read-only after.
#[derive(Debug, Clone)]
pub struct FeedState {
    pub db: PsDb,
    pub settings: FeedSettings,
    /// `Cache-Control` max-age for feeds, in seconds
    pub max_age_secs: u64,
    /// Source of "now", for the school date and `DTSTAMP`
    pub clock: fn() -> DateTime<Utc>,
}

impl FeedState {
    pub fn new(config: &ServiceConfig) -> Result<Self, FeedError> {
        Ok(Self {
            db: PsDb::new(config)?,
            settings: FeedSettings::from_config(config)?,
            max_age_secs: config.max_age_secs,
            clock: Utc::now,
        })
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }
}

/// JSON error body returned by every endpoint.
#[derive(Serialize)]
pub struct ApiErrorType {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<(StatusCode, &str, Option<String>)> for ApiErrorType {
    fn from((status, message, details): (StatusCode, &str, Option<String>)) -> Self {
        Self {
            status,
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message: message.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiErrorType {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
