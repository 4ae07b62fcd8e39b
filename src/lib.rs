pub mod config;
pub mod dispatch;
pub mod execution;
pub mod scenario;
pub mod schedule;
pub mod source;
pub mod types;
