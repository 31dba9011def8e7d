pub mod config;
pub mod context;
pub mod daemon_fetch;
pub mod logging;
