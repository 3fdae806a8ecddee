pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod globals;
pub mod telemetry;

mod start;

pub use start::start;
