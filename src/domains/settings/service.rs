//! Settings service: view, mask and persist managed secrets.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::SettingsError;
use super::store::SecretStore;

/// Secrets shown masked by the settings endpoint.
pub const MANAGED_SECRETS: [&str; 2] = ["GITHUB_TOKEN", "AI_PORTAL_TOKEN"];

/// Shown in clear; it is an address, not a credential.
pub const LLM_ENDPOINT: &str = "LLM_ENDPOINT";

/// Mask a secret for display, keeping only its tail.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 8 => format!("***{}", chars[n.saturating_sub(2)..].iter().collect::<String>()),
        n => format!(
            "{}{}",
            "*".repeat(n - 4),
            chars[n - 4..].iter().collect::<String>()
        ),
    }
}

/// Walk up from `start` to the directory holding `Cargo.toml` or `.git`.
pub fn find_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join("Cargo.toml").exists() || dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// Presence and masked value of one secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretStatus {
    pub present: bool,
    pub masked: String,
}

/// What `GET /config` reports.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    #[serde(rename = "GITHUB_TOKEN")]
    pub github_token: SecretStatus,
    #[serde(rename = "AI_PORTAL_TOKEN")]
    pub ai_portal_token: SecretStatus,
    #[serde(rename = "LLM_ENDPOINT")]
    pub llm_endpoint: String,
    pub env_file: String,
}

/// Values submitted to `POST /config`. Empty values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(rename = "GITHUB_TOKEN", default)]
    pub github_token: Option<String>,
    #[serde(rename = "AI_PORTAL_TOKEN", default)]
    pub ai_portal_token: Option<String>,
    #[serde(rename = "LLM_ENDPOINT", default)]
    pub llm_endpoint: Option<String>,
}

impl SettingsUpdate {
    fn non_empty(self) -> Vec<(&'static str, String)> {
        [
            (MANAGED_SECRETS[0], self.github_token),
            (MANAGED_SECRETS[1], self.ai_portal_token),
            (LLM_ENDPOINT, self.llm_endpoint),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
        .collect()
    }
}

/// Result of applying a [`SettingsUpdate`].
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub updated: usize,
    pub masked: BTreeMap<String, String>,
    pub env_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reads and persists managed secrets.
#[derive(Debug)]
pub struct SettingsService {
    store: SecretStore,
    env_file: PathBuf,
    write_lock: Mutex<()>,
}

impl SettingsService {
    pub fn new(store: SecretStore, env_file: PathBuf) -> Self {
        Self {
            store,
            env_file,
            write_lock: Mutex::new(()),
        }
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// Current values, secrets masked.
    pub fn view(&self) -> SettingsView {
        let status = |key: &str| {
            let value = self.store.get(key).unwrap_or_default();
            SecretStatus {
                present: !value.is_empty(),
                masked: mask_secret(&value),
            }
        };
        SettingsView {
            github_token: status(MANAGED_SECRETS[0]),
            ai_portal_token: status(MANAGED_SECRETS[1]),
            llm_endpoint: self.store.get(LLM_ENDPOINT).unwrap_or_default(),
            env_file: self.env_file.display().to_string(),
        }
    }

    /// Merge non-empty values into the store and the env file.
    pub fn update(&self, update: SettingsUpdate) -> Result<UpdateOutcome, SettingsError> {
        let updates = update.non_empty();
        if updates.is_empty() {
            return Ok(UpdateOutcome {
                success: true,
                updated: 0,
                masked: BTreeMap::new(),
                env_file: self.env_file.display().to_string(),
                message: Some("No values provided".to_string()),
            });
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = read_env_entries(&self.env_file)?;
        for (key, value) in &updates {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.clone(),
                None => entries.push((key.to_string(), value.clone())),
            }
        }
        write_env_entries(&self.env_file, &entries)?;
        info!(path = %self.env_file.display(), keys = entries.len(), "Saved env file");

        if let Err(e) = ensure_env_ignored(&self.env_file) {
            warn!(error = %e, "Failed to ensure .env is git-ignored");
        }

        let mut masked = BTreeMap::new();
        for (key, value) in updates.iter() {
            self.store.set(*key, value.clone());
            masked.insert(key.to_string(), mask_secret(value));
        }

        Ok(UpdateOutcome {
            success: true,
            updated: updates.len(),
            masked,
            env_file: self.env_file.display().to_string(),
            message: None,
        })
    }
}

/// `KEY=value` pairs in file order; comments and malformed lines are dropped.
fn read_env_entries(path: &Path) -> Result<Vec<(String, String)>, SettingsError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect())
}

fn write_env_entries(path: &Path, entries: &[(String, String)]) -> Result<(), SettingsError> {
    let mut content = entries
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");
    content.push('\n');
    fs::write(path, content).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Make sure the `.gitignore` next to the env file lists `.env`.
fn ensure_env_ignored(env_file: &Path) -> Result<(), SettingsError> {
    let gitignore = env_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(".gitignore");
    let write_err = |source| SettingsError::Write {
        path: gitignore.clone(),
        source,
    };

    match fs::read_to_string(&gitignore) {
        Ok(existing) => {
            if existing.lines().any(|line| line.trim() == ".env") {
                return Ok(());
            }
            let mut content = existing;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str("\n# Local environment\n.env\n");
            fs::write(&gitignore, content).map_err(write_err)?;
            info!("Added .env to .gitignore");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::write(&gitignore, "# Git ignore\n.env\n").map_err(write_err)?;
            info!("Created .gitignore with .env entry");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: gitignore.clone(),
                source,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> SettingsService {
        SettingsService::new(SecretStore::new(), dir.path().join(".env"))
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abc"), "***bc");
        assert_eq!(mask_secret("12345678"), "***78");
        assert_eq!(mask_secret("ghp_abcdefgh"), "********efgh");
    }

    #[test]
    fn test_view_masks_secrets_but_not_endpoint() {
        let dir = TempDir::new().unwrap();
        let settings = service(&dir);
        settings.store().set("GITHUB_TOKEN", "ghp_abcdefgh");
        settings.store().set("LLM_ENDPOINT", "http://localhost:11434");

        let view = settings.view();
        assert!(view.github_token.present);
        assert_eq!(view.github_token.masked, "********efgh");
        assert!(!view.ai_portal_token.present);
        assert_eq!(view.llm_endpoint, "http://localhost:11434");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["GITHUB_TOKEN"]["present"], true);
    }

    #[test]
    fn test_update_merges_env_file_and_gitignore() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "# local\nOTHER=1\nGITHUB_TOKEN=old\n").unwrap();
        fs::write(dir.path().join(".gitignore"), "target/").unwrap();
        let settings = service(&dir);

        let outcome = settings
            .update(SettingsUpdate {
                github_token: Some("ghp_newtoken".to_string()),
                ai_portal_token: Some("   ".to_string()),
                llm_endpoint: Some("http://llm".to_string()),
            })
            .unwrap();

        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.masked["GITHUB_TOKEN"], "********oken");
        assert_eq!(
            fs::read_to_string(dir.path().join(".env")).unwrap(),
            "OTHER=1\nGITHUB_TOKEN=ghp_newtoken\nLLM_ENDPOINT=http://llm\n"
        );
        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.lines().any(|l| l == ".env"));
        assert_eq!(settings.store().get("GITHUB_TOKEN").as_deref(), Some("ghp_newtoken"));
        assert_eq!(settings.store().get("AI_PORTAL_TOKEN"), None);
    }

    #[test]
    fn test_update_without_values_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let settings = service(&dir);
        let outcome = settings.update(SettingsUpdate::default()).unwrap();
        assert_eq!(outcome.updated, 0);
        assert!(!dir.path().join(".env").exists());
        assert!(!dir.path().join(".gitignore").exists());
    }

    #[test]
    fn test_find_project_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), dir.path());
    }
}
