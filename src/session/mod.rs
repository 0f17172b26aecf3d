pub mod attendance;
pub mod bridge;
pub mod coordinator;
pub mod messages;
pub mod reaper;
pub mod registry;

pub use coordinator::SessionCoordinator;
