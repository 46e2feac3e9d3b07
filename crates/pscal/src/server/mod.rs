use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::server::endpoints::{calendar, status, students};

pub use crate::server::types::{ApiErrorType, FeedState};

mod endpoints;
mod types;

pub use endpoints::students::json_array;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The feed server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<FeedState>) -> Router {
    // Browsers get the requesting origin echoed back.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS]);

    let feed_router = Router::new()
        .route("/school", get(calendar::get_school_feed))
        .route("/u/:login", get(calendar::get_teacher_feed))
        .route("/room/:room", get(calendar::get_room_feed));

    Router::new()
        .route("/health", get(status::get_health))
        .route("/students", get(students::get_students))
        .nest("/pscal", feed_router)
        .with_state(app_state)
        .layer(cors)
}
