//! tooldock
//!
//! A tool server that discovers tool modules from a directory at runtime,
//! validates each module's declared spec against its handler, and serves them
//! over HTTP (REST plus a control panel) or MCP stdio. Tool modules are
//! hot-reloaded: the registry swaps in a new snapshot whenever the directory
//! changes, without a restart.
//!
//! # Architecture
//!
//! - **core**: configuration, error handling, the shared server handle and transports
//! - **domains**: business logic organized by bounded contexts
//!   - **tools**: discovery, registry, listing and execution
//!   - **settings**: managed secrets persisted to `.env`
//!
//! # Example
//!
//! ```rust,no_run
//! use tooldock::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     tooldock::run(config).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

use std::sync::Arc;

use tracing::info;

// Re-export commonly used types for convenience
pub use self::core::{Config, Error, Result, ToolServer};

use self::core::TransportService;
use self::domains::settings::{LLM_ENDPOINT, MANAGED_SECRETS, SecretStore, SettingsService};
use self::domains::tools::{BuiltinCatalog, ToolService};

/// Build the services for `config` with the standard builtins and run the
/// configured transport until it stops.
///
/// The initial scan must succeed; without it there is no registry to serve.
pub async fn run(config: Config) -> Result<()> {
    run_with_catalog(config, BuiltinCatalog::standard()).await
}

/// Like [`run`], with a caller-supplied builtin catalog.
pub async fn run_with_catalog(config: Config, catalog: BuiltinCatalog) -> Result<()> {
    let keys: Vec<&str> = MANAGED_SECRETS.into_iter().chain([LLM_ENDPOINT]).collect();
    let secrets = SecretStore::from_env(&keys);

    let cwd = std::env::current_dir()?;
    let env_file = config.settings.resolve_env_file(&cwd);
    let settings = Arc::new(SettingsService::new(secrets.clone(), env_file));

    let tools = Arc::new(ToolService::new(config.tools.clone(), catalog, secrets));
    tools.bootstrap().await?;

    let transport = TransportService::new(config.transport.clone());
    let server = ToolServer::new(config, tools, settings);
    info!("Server initialized");

    transport.run(server).await?;
    Ok(())
}
