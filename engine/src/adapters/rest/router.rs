//! REST API router configuration

use super::events::event_stream;
use super::handlers::{
    create_program, delete_program, get_program, list_programs, reload_programs, start_program,
    stop_program, update_program, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the REST API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Program CRUD
        .route("/api/programs", get(list_programs).post(create_program))
        .route(
            "/api/programs/:name",
            get(get_program).put(update_program).delete(delete_program),
        )
        // Lifecycle operations
        .route("/api/programs/:name/start", post(start_program))
        .route("/api/programs/:name/stop", post(stop_program))
        .route("/api/reload", post(reload_programs))
        // Event stream
        .route("/ws/events", get(event_stream))
        .with_state(state)
}
