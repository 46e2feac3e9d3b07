use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::error::{FeedError, IncompleteFeed};
use crate::schedule::{CalendarAssembler, CalendarFeed, FeedScope};
use crate::server::types::{ApiErrorType, FeedState};
use crate::term;

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Why a feed could not be served.
enum FeedFailure {
    Query(FeedError),
    Incomplete(IncompleteFeed),
}

impl From<FeedError> for FeedFailure {
    fn from(e: FeedError) -> Self {
        FeedFailure::Query(e)
    }
}

impl From<IncompleteFeed> for FeedFailure {
    fn from(e: IncompleteFeed) -> Self {
        FeedFailure::Incomplete(e)
    }
}

/// Peer address and any `X-Forwarded-For` chain, for logging.
struct Client {
    peer: Option<SocketAddr>,
    forwarded_for: Option<String>,
}

impl Client {
    fn new(connect_info: Option<ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> Self {
        Self {
            peer: connect_info.map(|ConnectInfo(addr)| addr),
            forwarded_for: headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    fn describe(&self) -> String {
        let peer = self
            .peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match &self.forwarded_for {
            Some(fwd) => format!("{peer} (for {fwd})"),
            None => peer,
        }
    }
}

/// GET /pscal/school
/// Returns the whole-school calendar for the current academic year
pub async fn get_school_feed(
    State(s): State<Arc<FeedState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    info!("GET /pscal/school");
    let started = Instant::now();
    let client = Client::new(connect_info, &headers);

    let now = (s.clock)();
    let result = async {
        let today = term::school_today(now, &s.settings.tz);
        let days = s.db.calendar_days(term::term_id(today)).await?;
        Ok::<_, FeedFailure>(
            CalendarAssembler::new(&s.settings, now)
                .school(days)
                .await?,
        )
    }
    .await;

    respond(&s, result, now, &uri, &client, started)
}

/// GET /pscal/u/:login
/// Returns the class meetings taught by one teacher
pub async fn get_teacher_feed(
    Path(login): Path<String>,
    State(s): State<Arc<FeedState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    info!("GET /pscal/u/{}", login);
    let started = Instant::now();
    let client = Client::new(connect_info, &headers);

    let now = (s.clock)();
    let result = async {
        let year_id = term::year_id(term::school_today(now, &s.settings.tz));
        let meetings = s
            .db
            .teacher_meetings(&login, year_id, s.settings.tz)
            .await?;
        Ok::<_, FeedFailure>(
            CalendarAssembler::new(&s.settings, now)
                .meetings(FeedScope::Teacher(login.clone()), meetings)
                .await?,
        )
    }
    .await;

    respond(&s, result, now, &uri, &client, started)
}

/// GET /pscal/room/:room
/// Returns the class meetings held in one room
pub async fn get_room_feed(
    Path(room): Path<String>,
    State(s): State<Arc<FeedState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    info!("GET /pscal/room/{}", room);
    let started = Instant::now();
    let client = Client::new(connect_info, &headers);

    let now = (s.clock)();
    let result = async {
        let year_id = term::year_id(term::school_today(now, &s.settings.tz));
        let meetings = s.db.room_meetings(&room, year_id, s.settings.tz).await?;
        Ok::<_, FeedFailure>(
            CalendarAssembler::new(&s.settings, now)
                .meetings(FeedScope::Room(room.clone()), meetings)
                .await?,
        )
    }
    .await;

    respond(&s, result, now, &uri, &client, started)
}

fn respond(
    s: &FeedState,
    result: Result<CalendarFeed, FeedFailure>,
    now: chrono::DateTime<chrono::Utc>,
    uri: &Uri,
    client: &Client,
    started: Instant,
) -> Response {
    match result {
        Ok(feed) => {
            info!(
                path = uri.path(),
                components = feed.component_count(),
                client = %client.describe(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "served feed"
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, CALENDAR_CONTENT_TYPE.to_string()),
                    (
                        header::CACHE_CONTROL,
                        format!("public,max-age={}", s.max_age_secs),
                    ),
                    (
                        header::LAST_MODIFIED,
                        now.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                    ),
                ],
                feed.to_ics(),
            )
                .into_response()
        }
        Err(FeedFailure::Query(e)) => {
            error!(path = uri.path(), client = %client.describe(), error = %e, "feed query failed");
            ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to query calendar data",
                Some(e.to_string()),
            ))
            .into_response()
        }
        Err(FeedFailure::Incomplete(e)) => {
            error!(
                path = uri.path(),
                client = %client.describe(),
                events = e.partial.event_count(),
                error = %e.source,
                "feed incomplete"
            );
            ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to build calendar feed",
                Some(e.to_string()),
            ))
            .into_response()
        }
    }
}
