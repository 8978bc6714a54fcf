//! Server core: listener, per-connection driver, configuration, hooks

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::{AuthResult, LoggingHandler, RtmpHandler};
pub use listener::RtmpServer;
