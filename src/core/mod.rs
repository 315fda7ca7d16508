//! Core module containing shared infrastructure components.
//!
//! This module provides the foundational building blocks for the server,
//! including error handling, configuration, the protocol handler and the
//! transport layer.

pub mod config;
pub mod error;
pub mod security;
pub mod server;
pub mod transport;

pub use config::{AutoReload, Config, LoggingConfig, SettingsConfig, ToolsConfig};
pub use error::{Error, Result};
pub use security::{PathSecurityError, resolve_within_root};
pub use server::ToolServer;
pub use transport::{TransportConfig, TransportService};
