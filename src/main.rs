//! Relay server binary
//!
//! Runs with built-in defaults: bind 0.0.0.0:1935, application "live".
//! Log verbosity comes from RUST_LOG.

use rtmp_relay::{LoggingHandler, RtmpServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = RtmpServer::new(ServerConfig::default(), LoggingHandler);
    server.run().await?;
    Ok(())
}
