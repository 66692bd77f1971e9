use std::sync::Arc;

use voipms_bridge::bridge::{BridgeAdapter, ConsoleSubstrate, console};
use voipms_bridge::config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::from_env()?;

    let adapter = BridgeAdapter::voipms(&config, Arc::new(ConsoleSubstrate::new()))?;
    let protocol = adapter.protocol();

    eprintln!("📟 {} v{}", adapter.bot_header(), env!("CARGO_PKG_VERSION"));
    eprintln!("   Protocol: {} ({})", protocol.displayname, protocol.external_url);
    eprintln!("   API: {}", config.provider.api_url);
    eprintln!(
        "   Polling: every {}s, lookback {}s, via {}",
        config.poller.interval.as_secs(),
        config.poller.lookback.as_secs(),
        config.provider.fetch_method.api_method()
    );

    tokio::select! {
        _ = console::run(&adapter) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    adapter.shutdown().await;
    Ok(())
}
