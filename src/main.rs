//! Board server entry point
//!
//! Hosts the command sink the voice client connects to: one WebSocket per
//! session token plus the HTTP forward endpoint.

use chalktalk::config::BoardConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chalktalk=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("CHALKTALK_BOARD_ADDR") {
        Ok(addr) => BoardConfig::new().with_bind_addr(addr),
        Err(_) => BoardConfig::default(),
    };

    info!("Starting Chalktalk board server");
    chalktalk::board::run(config).await?;
    Ok(())
}
