//! rtmp-relay: single-stream RTMP live relay
//!
//! Accepts RTMP connections on port 1935 and fans one publisher's live
//! audio/video out to any number of `play` subscribers. Payloads are
//! relayed opaquely; video delivery to each subscriber starts at a
//! keyframe so decoders can join mid-stream.
//!
//! # Example
//!
//! ```no_run
//! use rtmp_relay::{LoggingHandler, RtmpServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::new(ServerConfig::default(), LoggingHandler);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Publish with ffmpeg: `ffmpeg -re -i input.mp4 -c copy -f flv
//! rtmp://localhost/live/stream1`, play with `ffplay
//! rtmp://localhost/live/stream1`.

pub mod amf;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use server::config::ServerConfig;
pub use server::handler::{AuthResult, LoggingHandler, RtmpHandler};
pub use server::listener::RtmpServer;
