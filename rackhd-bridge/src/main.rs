use std::sync::Arc;

use clap::Parser;
use rackhd_bridge::bus::AmqpBus;
use rackhd_bridge::{Config, Server};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bridge RackHD commands from AMQP to the RackHD HTTP API.
#[derive(Debug, Parser)]
#[command(name = "rackhd-bridge", version)]
struct Args {
    /// AMQP URI (overrides AMQP_URI)
    #[arg(long)]
    uri: Option<String>,

    /// RackHD base address (overrides RACKHD_ADDRESS)
    #[arg(long = "rackhd-address")]
    rackhd_address: Option<String>,
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rackhd_bridge=info,shared_types=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    // Loads `.env` first, so LOG_FORMAT and RUST_LOG from it reach the subscriber.
    let config = Config::from_env()?.with_overrides(args.uri, args.rackhd_address)?;
    init_tracing();

    info!(
        rackhd_address = %config.rackhd_address,
        exchange = %config.exchange,
        binding_key = %config.binding_key,
        "rackhd-bridge starting"
    );

    let bus = Arc::new(
        AmqpBus::connect(&config.amqp_uri)
            .await
            .map_err(|e| anyhow::anyhow!("could not connect to RabbitMQ: {e}"))?,
    );

    let server = Server::new(bus.clone(), &config)?;
    let consumer = server.start().await?;

    tokio::select! {
        result = consumer => match result {
            Ok(()) => warn!("command subscription ended"),
            Err(e) => error!(error = %e, "consumption loop failed"),
        },
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    if let Err(e) = bus.close().await {
        warn!(error = %e, "failed to close AMQP connection");
    }
    Ok(())
}
