pub mod engine;
pub mod redis_store;
pub mod store;
pub mod sweeper;

pub use engine::*;
pub use redis_store::*;
pub use store::*;
pub use sweeper::*;
