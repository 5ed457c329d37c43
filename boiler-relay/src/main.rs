//! Boiler relay server binary.
//!
//! Reads `HOST`/`PORT` (optionally from a `.env` file) and serves the relay
//! at `ws://HOST:PORT/socket`. Log level follows `RUST_LOG`, default `info`.

use boiler_relay::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    let server = RelayServer::bind(config).await?;
    server.run().await?;

    Ok(())
}
