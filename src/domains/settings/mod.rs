//! Settings domain module.
//!
//! Manages the secrets that tool scripts read from their environment
//! (`GITHUB_TOKEN`, `AI_PORTAL_TOKEN`, `LLM_ENDPOINT`). Values are held in a
//! shared [`SecretStore`] overlay instead of mutating the process environment,
//! and persisted to a `.env` file kept out of version control.

mod error;
mod service;
mod store;

pub use error::SettingsError;
pub use service::{
    LLM_ENDPOINT, MANAGED_SECRETS, SecretStatus, SettingsService, SettingsUpdate, SettingsView,
    UpdateOutcome, find_project_root, mask_secret,
};
pub use store::SecretStore;
