//! Tools domain module.
//!
//! Tools are named, schema-described callables discovered at runtime from
//! module manifests in the tools directory and hot-reloaded without a restart.
//!
//! ## Architecture
//!
//! - `spec.rs` - Tool specification model parsed from module manifests
//! - `validator.rs` - Checks a spec against its handler's signature
//! - `handlers.rs` - Builtin and script handlers behind the `ToolHandler` trait
//! - `definitions/` - Builtin handler implementations (one file per family)
//! - `scanner.rs` - Discovery Scanner, full and incremental
//! - `registry.rs` - Snapshot-swapping registry with a generation counter
//! - `listing.rs` - Listing Cache with content fingerprint
//! - `dispatcher.rs` - Execution Dispatcher with argument coercion and timeout
//! - `service.rs` - `ToolService`, the handle transports share
//! - `error.rs` - Failure taxonomy
//!
//! ## Adding a New Tool
//!
//! Drop a manifest into the tools directory:
//!
//! ```json
//! { "spec": { "type": "function",
//!             "function": { "name": "word_count", "description": "Count words.",
//!                           "parameters": { "type": "object",
//!                                           "properties": { "text": { "type": "string" } },
//!                                           "required": ["text"] } } },
//!   "run": { "script": "word_count.py", "accepts": ["text"] } }
//! ```
//!
//! The next listing request picks it up. Builtins are added by registering
//! a function in a [`BuiltinCatalog`].

pub mod definitions;
mod dispatcher;
mod error;
mod handlers;
mod listing;
mod registry;
mod scanner;
mod service;
mod spec;
mod validator;

pub use definitions::BuiltinCatalog;
pub use dispatcher::{Dispatcher, ExecutionResult, coerce_arguments};
pub use error::{DiscoveryError, ErrorKind, FieldError, SpecError, ToolError};
pub use handlers::{
    AcceptedParam, Arguments, BuiltinFn, BuiltinHandler, HandlerFault, HandlerKind,
    ScriptHandler, Signature, ToolHandler,
};
pub use listing::{FIRST_TOOL_ID, Listing, ListingCache, ListingItem};
pub use registry::{Registry, RegistrySnapshot, Removal, ScanSummary, SourceIdentity, ToolEntry};
pub use scanner::{DiscoveryFailure, ScanMode, ScanReport, Scanner, Staged};
pub use service::ToolService;
pub use spec::{ParamType, ParameterSpec, ToolSpec};
pub use validator::{Mismatch, ValidationOutcome, validate};
