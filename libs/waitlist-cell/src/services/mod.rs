pub mod coordinator;
pub mod notifier;
pub mod repository;

pub use coordinator::*;
pub use notifier::*;
pub use repository::*;
