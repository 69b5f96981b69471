pub mod types;
pub mod config;
pub mod context;
pub mod error;
pub mod limiter;
pub mod fault;
