//! Listing Cache.
//!
//! Renders the registry as the `/tools` payload and fingerprints it. The
//! rendering is cached per generation, so every request observing the same
//! generation receives byte-identical bytes and the same fingerprint.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::registry::RegistrySnapshot;

/// Identifiers are assigned in name order starting here.
pub const FIRST_TOOL_ID: u64 = 10_000;

/// Hex characters of the payload hash kept in the fingerprint.
const HASH_PREFIX_LEN: usize = 16;

/// One tool as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingItem {
    pub id: u64,
    pub name: String,
    pub reg_name: String,
    pub display_name: String,
    pub description: String,
    /// Compact serialized spec.
    pub json: String,
}

/// A rendered listing for one registry generation.
#[derive(Debug, Clone)]
pub struct Listing {
    pub generation: u64,
    /// `"<generation>-<sha256 prefix of payload>"`.
    pub fingerprint: String,
    pub items: Vec<ListingItem>,
    /// Serialized `items`, compact JSON.
    pub payload: Arc<str>,
}

impl Listing {
    fn render(snapshot: &RegistrySnapshot) -> Self {
        let items: Vec<ListingItem> = snapshot
            .entries()
            .zip(FIRST_TOOL_ID..)
            .map(|(entry, id)| ListingItem {
                id,
                name: entry.spec.name.clone(),
                reg_name: entry.spec.name.clone(),
                display_name: entry.spec.name.clone(),
                description: entry.spec.description.clone(),
                json: entry.spec.to_compact_json(),
            })
            .collect();

        // Serializing plain strings and integers cannot fail.
        let payload = serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string());
        let digest = format!("{:x}", Sha256::digest(payload.as_bytes()));
        let fingerprint = format!("{}-{}", snapshot.generation(), &digest[..HASH_PREFIX_LEN]);

        Self {
            generation: snapshot.generation(),
            fingerprint,
            items,
            payload: Arc::from(payload),
        }
    }
}

/// Caches the rendered listing of the latest generation seen.
#[derive(Debug, Default)]
pub struct ListingCache {
    cached: Mutex<Option<Arc<Listing>>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The listing for `snapshot`, rendered at most once per generation.
    pub fn listing(&self, snapshot: &RegistrySnapshot) -> Arc<Listing> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listing) = cached.as_ref() {
            if listing.generation == snapshot.generation() {
                return Arc::clone(listing);
            }
        }

        let listing = Arc::new(Listing::render(snapshot));
        debug!(
            generation = listing.generation,
            fingerprint = %listing.fingerprint,
            tools = listing.items.len(),
            "Rendered tool listing"
        );
        *cached = Some(Arc::clone(&listing));
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::settings::SecretStore;
    use crate::domains::tools::definitions::BuiltinCatalog;
    use crate::domains::tools::registry::Registry;
    use crate::domains::tools::scanner::{ScanMode, Scanner};
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::TempDir;

    fn write_module(dir: &TempDir, file: &str, name: &str, builtin: &str, params: &[&str]) {
        let properties: serde_json::Map<String, Value> = params
            .iter()
            .map(|p| (p.to_string(), json!({"type": "number"})))
            .collect();
        let module = json!({
            "spec": {"type": "function", "function": {
                "name": name, "description": format!("The {name} tool."),
                "parameters": {"type": "object", "properties": properties, "required": params}}},
            "run": {"builtin": builtin}
        });
        fs::write(dir.path().join(file), module.to_string()).unwrap();
    }

    fn scanned(dir: &TempDir) -> (Scanner, Registry) {
        let scanner = Scanner::new(dir.path(), BuiltinCatalog::standard(), SecretStore::new());
        let registry = Registry::new();
        registry.apply(scanner.scan(ScanMode::Full, &registry.snapshot()).unwrap());
        (scanner, registry)
    }

    #[test]
    fn test_items_sorted_with_sequential_ids() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "1.json", "square", "square", &["x"]);
        write_module(&dir, "2.json", "add", "add", &["a", "b"]);
        let (_scanner, registry) = scanned(&dir);

        let listing = ListingCache::new().listing(&registry.snapshot());
        let names: Vec<_> = listing.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["add", "square"]);
        assert_eq!(listing.items[0].id, 10_000);
        assert_eq!(listing.items[1].id, 10_001);

        let payload: Value = serde_json::from_str(&listing.payload).unwrap();
        assert_eq!(payload[0]["regName"], "add");
        assert_eq!(payload[0]["displayName"], "add");
        let spec: Value = serde_json::from_str(payload[0]["json"].as_str().unwrap()).unwrap();
        assert_eq!(spec["function"]["name"], "add");
    }

    #[test]
    fn test_same_generation_same_bytes() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "add.json", "add", "add", &["a", "b"]);
        let (scanner, registry) = scanned(&dir);
        let cache = ListingCache::new();

        let first = cache.listing(&registry.snapshot());
        registry.apply(scanner.scan(ScanMode::Full, &registry.snapshot()).unwrap());
        let second = cache.listing(&registry.snapshot());

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.payload, second.payload);
        assert!(first.fingerprint.starts_with("1-"));
        assert_eq!(first.fingerprint.len(), 2 + 16);

        // A fresh cache renders the same generation identically.
        assert_eq!(
            ListingCache::new().listing(&registry.snapshot()).fingerprint,
            first.fingerprint
        );
    }

    #[test]
    fn test_new_generation_new_fingerprint() {
        let dir = TempDir::new().unwrap();
        write_module(&dir, "add.json", "add", "add", &["a", "b"]);
        let (scanner, registry) = scanned(&dir);
        let cache = ListingCache::new();
        let before = cache.listing(&registry.snapshot());

        write_module(&dir, "square.json", "square", "square", &["x"]);
        registry.apply(scanner.scan(ScanMode::Incremental, &registry.snapshot()).unwrap());
        let after = cache.listing(&registry.snapshot());

        assert_ne!(before.fingerprint, after.fingerprint);
        assert!(after.fingerprint.starts_with("2-"));
        assert_eq!(after.items.len(), 2);
    }
}
