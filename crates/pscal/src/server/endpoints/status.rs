use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::server::types::{ApiErrorType, FeedState};

/// GET /health
/// Reports whether the database can be opened and read
pub async fn get_health(State(s): State<Arc<FeedState>>) -> Response {
    info!("GET /health");

    let db = s.db.clone();
    let ping = tokio::task::spawn_blocking(move || db.ping()).await;

    match ping {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": s.db.path().display().to_string(),
            })),
        )
            .into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "health check failed");
            ApiErrorType::from((
                StatusCode::SERVICE_UNAVAILABLE,
                "Database unavailable",
                Some(e.to_string()),
            ))
            .into_response()
        }
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Health check did not complete",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}
