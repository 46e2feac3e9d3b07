use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{stream, Stream};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::RowStream;
use crate::error::FeedError;
use crate::schedule::Student;
use crate::server::types::{ApiErrorType, FeedState};

/// GET /students
/// Streams the roster as one JSON array, element by element
pub async fn get_students(State(s): State<Arc<FeedState>>) -> Response {
    info!("GET /students");

    match s.db.students().await {
        Ok(rows) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            Body::from_stream(json_array(rows)),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "student query failed");
            ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to query students",
                Some(e.to_string()),
            ))
            .into_response()
        }
    }
}

/// Encodes a record stream as the chunks of a JSON array.
///
/// A failed row ends the stream with that error, leaving the array unclosed.
pub fn json_array(rows: RowStream<Student>) -> impl Stream<Item = Result<String, FeedError>> + Send {
    stream::unfold(Some((rows, 0usize)), |state| async move {
        let (mut rows, index) = state?;
        let separator = if index == 0 { "[" } else { "," };
        match rows.next().await {
            Some(Ok(student)) => match serde_json::to_string(&student) {
                Ok(json) => Some((Ok(format!("{separator}{json}")), Some((rows, index + 1)))),
                Err(e) => Some((
                    Err(FeedError::RowDecode {
                        message: e.to_string(),
                    }),
                    None,
                )),
            },
            Some(Err(e)) => {
                error!(error = %e, written = index, "student stream failed");
                Some((Err(e), None))
            }
            None => {
                let closing = if index == 0 { "[]" } else { "]" };
                Some((Ok(closing.to_string()), None))
            }
        }
    })
}
