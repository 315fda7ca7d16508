//! tooldock entry point.
//!
//! Initializes logging, loads configuration, and starts the server with the
//! configured transport. Logging comes first so configuration warnings are
//! visible.

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use tooldock::Config;
use tooldock::core::LoggingConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let logging = LoggingConfig::from_env();
    init_logging(&logging.level, logging.with_timestamps);

    // Load configuration from environment
    let config = Config::from_env();

    info!("Starting {} v{}", config.server.name, config.server.version);

    tooldock::run(config).await?;

    info!("Server shutting down");

    Ok(())
}

/// Initialize the logging subsystem.
///
/// Logs go to stderr so stdout stays free for the stdio transport.
fn init_logging(level: &str, with_timestamps: bool) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if with_timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
