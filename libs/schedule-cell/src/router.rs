use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, ScheduleState};

pub fn schedule_routes(state: ScheduleState) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/available", get(handlers::available_slots))
        .route("/{doctor_id}/{date}", get(handlers::get_schedule));

    // Protected routes; the caller's id is the holder identity
    let protected_routes = Router::new()
        .route("/", post(handlers::publish_schedule))
        .route("/{doctor_id}/{date}/{time}/hold", post(handlers::hold_slot))
        .route("/{doctor_id}/{date}/{time}/release", post(handlers::release_slot))
        .route("/{doctor_id}/{date}/{time}/book", post(handlers::book_slot))
        .route("/{doctor_id}/{date}/{time}/cancel", post(handlers::cancel_booking))
        .route("/{doctor_id}/{date}/{time}/block", put(handlers::block_slot))
        .route("/{doctor_id}/{date}/{time}/unblock", put(handlers::unblock_slot))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
