// gateway: Library entry point.
// Exposes modules for integration testing.

pub mod classify;
pub mod config;
pub mod http;
pub mod hub;
pub mod pool;
pub mod reload;
pub mod supervisor;
pub mod worker;

pub use hub::EventHub;
pub use supervisor::Supervisor;
