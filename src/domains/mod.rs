//! Domains module containing business logic organized by bounded contexts.
//!
//! - `tools` - discovery, hot-reload and execution of tools
//! - `settings` - managed secrets handed to tool scripts

pub mod settings;
pub mod tools;
