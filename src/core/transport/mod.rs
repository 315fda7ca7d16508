//! Transport layer for the server.
//!
//! This module provides two transport implementations:
//! - **HTTP**: REST API plus the control panel - feature: `http` (default)
//! - **STDIO**: MCP over standard input/output - feature: `stdio`
//!
//! Both hand requests to the same [`ToolServer`](crate::core::ToolServer),
//! so they observe the same registry.

mod config;
mod error;
mod service;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "stdio")]
pub mod stdio;

pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use service::TransportService;

#[cfg(feature = "http")]
pub use config::HttpConfig;
