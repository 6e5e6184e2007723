use axum::{
    middleware,
    routing::{delete, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, WaitlistState};

pub fn waitlist_routes(state: WaitlistState) -> Router {
    Router::new()
        .route("/", post(handlers::join_waitlist).get(handlers::list_my_entries))
        .route("/{entry_id}", delete(handlers::withdraw_entry))
        .route("/{entry_id}/accept", post(handlers::accept_offer))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
