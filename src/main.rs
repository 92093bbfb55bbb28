use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamrelay::{
    cache::{CacheStore, RedisCacheStore},
    config::Config,
    extractor::ExtractorAdapter,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "streamrelay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-platform video streaming proxy")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("streamrelay={},tower_http=trace", cli.log_level)
    } else {
        format!("streamrelay={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting streamrelay v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let cache: Arc<dyn CacheStore> = Arc::new(
        RedisCacheStore::connect(
            &config.cache.redis_url,
            Duration::from_millis(config.cache.operation_timeout_ms),
        )
        .await?,
    );
    info!("Connected to cache at {}", config.cache.redis_url);

    let extractor = Arc::new(ExtractorAdapter::new(config.extractor.clone()));
    info!(
        "Extractor adapter ready (binary={}, max_concurrent={})",
        config.extractor.binary_path.display(),
        config.extractor.max_concurrent
    );

    let web_server = WebServer::new(config, cache, extractor).await?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}
