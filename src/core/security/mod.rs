// Security module for path validation
//
// Script handlers may only run files located inside the tools directory.
// This module resolves manifest-relative paths and rejects anything that
// escapes that root.

pub mod path_validator;

pub use path_validator::{PathSecurityError, resolve_within_root};
