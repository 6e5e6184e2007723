pub mod clock;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use clock::*;
pub use error::*;
pub use models::*;
pub use services::*;
pub use handlers::ScheduleState;
pub use router::schedule_routes;
