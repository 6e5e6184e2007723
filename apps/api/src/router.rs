use axum::{routing::get, Router};

use schedule_cell::{schedule_routes, ScheduleState};
use waitlist_cell::{waitlist_routes, WaitlistState};

pub fn create_router(schedules: ScheduleState, waitlist: WaitlistState) -> Router {
    Router::new()
        .route("/", get(|| async { "Amae Clinic scheduling API is running!" }))
        .nest("/schedules", schedule_routes(schedules))
        .nest("/waitlist", waitlist_routes(waitlist))
}
