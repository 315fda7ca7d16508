//! Builtin tool definitions.
//!
//! Handlers compiled into the server. A tool module binds to one of these
//! with `"run": {"builtin": "<name>"}`. The [`BuiltinCatalog`] is injected into
//! the scanner, so embedders and tests can register their own functions.

pub mod arithmetic;
pub mod echo;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::handlers::{Arguments, BuiltinHandler, HandlerFault, Signature, ToolHandler};

pub use arithmetic::{AddTool, MultiplyTool, SquareTool};
pub use echo::EchoTool;

/// Named builtin handlers available to tool modules.
#[derive(Clone, Default)]
pub struct BuiltinCatalog {
    entries: BTreeMap<String, BuiltinHandler>,
}

impl BuiltinCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The builtins shipped with the server.
    pub fn standard() -> Self {
        Self::new()
            .with(AddTool::NAME, AddTool::signature(), AddTool::execute)
            .with(MultiplyTool::NAME, MultiplyTool::signature(), MultiplyTool::execute)
            .with(SquareTool::NAME, SquareTool::signature(), SquareTool::execute)
            .with(EchoTool::NAME, EchoTool::signature(), EchoTool::execute)
    }

    /// Register a builtin, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, signature: Signature, func: F)
    where
        F: Fn(&Arguments) -> Result<Value, HandlerFault> + Send + Sync + 'static,
    {
        let name = name.into();
        let handler = BuiltinHandler::new(name.clone(), signature, func);
        self.entries.insert(name, handler);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, signature: Signature, func: F) -> Self
    where
        F: Fn(&Arguments) -> Result<Value, HandlerFault> + Send + Sync + 'static,
    {
        self.register(name, signature, func);
        self
    }

    /// A fresh handler bound to the named builtin.
    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries
            .get(name)
            .map(|handler| Arc::new(handler.clone()) as Arc<dyn ToolHandler>)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for BuiltinCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinCatalog")
            .field("builtins", &self.names())
            .finish()
    }
}
