//! Discovery Scanner.
//!
//! Walks the tools directory, loads each tool module manifest, validates its
//! spec against its handler and stages the result for [`Registry::apply`].
//! A malformed module is excluded and reported; it never aborts the scan.
//!
//! A module manifest is a JSON file with two entry points:
//!
//! ```json
//! { "spec": { "type": "function", "function": { ... } },
//!   "run":  { "builtin": "add" } }
//! ```
//!
//! or, for an external script inside the tools directory,
//! `"run": { "script": "scripts/count.py", "accepts": ["text", {"name": "limit", "default": 10}] }`.
//!
//! [`Registry::apply`]: super::registry::Registry::apply

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::definitions::BuiltinCatalog;
use super::error::{DiscoveryError, ToolError};
use super::handlers::{ScriptHandler, Signature, ToolHandler};
use super::registry::{RegistrySnapshot, SourceIdentity, ToolEntry, file_name};
use super::spec::ToolSpec;
use super::validator::{ValidationOutcome, validate};
use crate::domains::settings::SecretStore;

/// Scan depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Re-evaluate every candidate module.
    Full,
    /// Re-evaluate only modules whose source identity changed.
    Incremental,
}

/// A module excluded from the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryFailure {
    /// File name of the module.
    pub file: String,
    #[serde(skip)]
    pub path: PathBuf,
    /// Tool name, when the spec got far enough to declare one.
    pub tool: Option<String>,
    pub message: String,
    pub error: DiscoveryError,
}

impl DiscoveryFailure {
    fn new(path: &Path, tool: Option<&str>, error: DiscoveryError) -> Self {
        Self {
            file: file_name(path),
            path: path.to_path_buf(),
            tool: tool.map(str::to_string),
            message: error.to_string(),
            error,
        }
    }
}

/// Registry changes staged by one scan.
#[derive(Debug)]
pub enum Staged {
    /// Full scan: the complete next entry set.
    Replace(Vec<Arc<ToolEntry>>),
    /// Incremental scan: entries from `reimported` modules replace whatever
    /// those modules provided before.
    Merge {
        upserts: Vec<Arc<ToolEntry>>,
        reimported: Vec<PathBuf>,
    },
}

/// Everything one scan found.
#[derive(Debug)]
pub struct ScanReport {
    pub mode: ScanMode,
    pub staged: Staged,
    /// Modules that provided entries and no longer exist.
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<DiscoveryFailure>,
    /// Modules left untouched (incremental) or reused as-is (full).
    pub unchanged: usize,
    /// Candidate files seen.
    pub scanned: usize,
}

/// Walks the tools directory and loads tool modules.
#[derive(Debug)]
pub struct Scanner {
    root: PathBuf,
    catalog: BuiltinCatalog,
    secrets: SecretStore,
    /// Failed modules by path; an incremental scan skips them until they change.
    quarantine: Mutex<HashMap<PathBuf, DiscoveryFailureRecord>>,
}

#[derive(Debug, Clone)]
struct DiscoveryFailureRecord {
    identity: SourceIdentity,
    failure: DiscoveryFailure,
}

struct Loaded {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, catalog: BuiltinCatalog, secrets: SecretStore) -> Self {
        Self {
            root: root.into(),
            catalog,
            secrets,
            quarantine: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tools directory against the registry state in `base`.
    ///
    /// Fails only when the directory itself cannot be listed; the caller
    /// keeps the prior registry state in that case.
    #[instrument(skip(self, base), fields(root = %self.root.display()))]
    pub fn scan(&self, mode: ScanMode, base: &RegistrySnapshot) -> Result<ScanReport, ToolError> {
        let candidates = self.candidates()?;
        debug!(candidates = candidates.len(), "Listed tools directory");

        let present: BTreeSet<&PathBuf> = candidates.iter().collect();
        let deleted: Vec<PathBuf> = base
            .entries()
            .map(|e| &e.source.path)
            .filter(|path| !present.contains(path))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();

        let mut quarantine = self.quarantine.lock().unwrap_or_else(PoisonError::into_inner);
        quarantine.retain(|path, _| present.contains(path));

        let report = match mode {
            ScanMode::Full => {
                quarantine.clear();
                self.scan_full(&candidates, base, deleted, &mut quarantine)
            }
            ScanMode::Incremental => {
                self.scan_incremental(&candidates, base, deleted, &mut quarantine)
            }
        };

        for failure in &report.errors {
            warn!(file = %failure.file, tool = ?failure.tool, "Tool module excluded: {}", failure.message);
        }
        Ok(report)
    }

    fn scan_full(
        &self,
        candidates: &[PathBuf],
        base: &RegistrySnapshot,
        deleted: Vec<PathBuf>,
        quarantine: &mut HashMap<PathBuf, DiscoveryFailureRecord>,
    ) -> ScanReport {
        let mut staged: BTreeMap<String, Arc<ToolEntry>> = BTreeMap::new();
        let mut errors = Vec::new();
        let mut unchanged = 0;

        for path in candidates {
            let identity = match SourceIdentity::of(path) {
                Ok(identity) => identity,
                Err(e) => {
                    errors.push(DiscoveryFailure::new(
                        path,
                        None,
                        DiscoveryError::Unreadable {
                            reason: e.to_string(),
                        },
                    ));
                    continue;
                }
            };

            let loaded = match self.load(path) {
                Ok(loaded) => loaded,
                Err(failure) => {
                    quarantine.insert(
                        path.clone(),
                        DiscoveryFailureRecord {
                            identity,
                            failure: failure.clone(),
                        },
                    );
                    errors.push(failure);
                    continue;
                }
            };

            let name = loaded.spec.name.clone();
            if let Some(owner) = staged.get(&name) {
                errors.push(DiscoveryFailure::new(
                    path,
                    Some(&name),
                    DiscoveryError::DuplicateName {
                        tool: name.clone(),
                        owner: owner.source.file_name(),
                    },
                ));
                continue;
            }

            let entry = match base.get(&name) {
                Some(existing) if existing.source == identity && existing.spec == loaded.spec => {
                    unchanged += 1;
                    existing
                }
                _ => Arc::new(ToolEntry::new(loaded.spec, loaded.handler, identity)),
            };
            staged.insert(name, entry);
        }

        ScanReport {
            mode: ScanMode::Full,
            staged: Staged::Replace(staged.into_values().collect()),
            deleted,
            errors,
            unchanged,
            scanned: candidates.len(),
        }
    }

    fn scan_incremental(
        &self,
        candidates: &[PathBuf],
        base: &RegistrySnapshot,
        deleted: Vec<PathBuf>,
        quarantine: &mut HashMap<PathBuf, DiscoveryFailureRecord>,
    ) -> ScanReport {
        let mut errors = Vec::new();
        let mut unchanged = 0;
        let mut changed = Vec::new();

        for path in candidates {
            let identity = match SourceIdentity::of(path) {
                Ok(identity) => identity,
                Err(e) => {
                    changed.push((path, None));
                    errors.push(DiscoveryFailure::new(
                        path,
                        None,
                        DiscoveryError::Unreadable {
                            reason: e.to_string(),
                        },
                    ));
                    continue;
                }
            };

            let mut provided = base.from_source(path).peekable();
            if provided.peek().is_some() && provided.all(|e| e.source == identity) {
                unchanged += 1;
                continue;
            }
            if let Some(record) = quarantine.get(path) {
                if record.identity == identity {
                    unchanged += 1;
                    errors.push(record.failure.clone());
                    continue;
                }
            }
            changed.push((path, Some(identity)));
        }

        let stale: BTreeSet<&PathBuf> = changed
            .iter()
            .map(|(path, _)| *path)
            .chain(deleted.iter())
            .collect();

        let mut upserts: BTreeMap<String, Arc<ToolEntry>> = BTreeMap::new();
        let mut reimported = Vec::new();
        for (path, identity) in changed {
            reimported.push(path.clone());
            let Some(identity) = identity else {
                continue;
            };

            let loaded = match self.load(path) {
                Ok(loaded) => loaded,
                Err(failure) => {
                    quarantine.insert(
                        path.clone(),
                        DiscoveryFailureRecord {
                            identity,
                            failure: failure.clone(),
                        },
                    );
                    errors.push(failure);
                    continue;
                }
            };
            quarantine.remove(path);

            let name = loaded.spec.name.clone();
            // An owner whose module did not change keeps its name.
            let owner = upserts
                .get(&name)
                .or(base
                    .get(&name)
                    .as_ref()
                    .filter(|e| !stale.contains(&e.source.path)))
                .map(|e| e.source.file_name());
            if let Some(owner) = owner {
                errors.push(DiscoveryFailure::new(
                    path,
                    Some(&name),
                    DiscoveryError::DuplicateName {
                        tool: name.clone(),
                        owner,
                    },
                ));
                continue;
            }

            upserts.insert(
                name,
                Arc::new(ToolEntry::new(loaded.spec, loaded.handler, identity)),
            );
        }

        ScanReport {
            mode: ScanMode::Incremental,
            staged: Staged::Merge {
                upserts: upserts.into_values().collect(),
                reimported,
            },
            deleted,
            errors,
            unchanged,
            scanned: candidates.len(),
        }
    }

    /// Candidate module files in lexicographic order.
    fn candidates(&self) -> Result<Vec<PathBuf>, ToolError> {
        let dir = fs::read_dir(&self.root)
            .map_err(|e| ToolError::registry_unavailable(&self.root, e.to_string()))?;

        let mut candidates: Vec<PathBuf> = dir
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|path| is_candidate(path))
            .collect();
        candidates.sort();
        Ok(candidates)
    }

    /// Load and validate one module.
    fn load(&self, path: &Path) -> Result<Loaded, DiscoveryFailure> {
        let fail = |tool: Option<&str>, error| DiscoveryFailure::new(path, tool, error);

        let text = fs::read_to_string(path).map_err(|e| {
            fail(
                None,
                DiscoveryError::Unreadable {
                    reason: e.to_string(),
                },
            )
        })?;
        let manifest: Value = serde_json::from_str(&text).map_err(|e| {
            fail(
                None,
                DiscoveryError::InvalidManifest {
                    reason: e.to_string(),
                },
            )
        })?;
        let manifest = manifest.as_object().ok_or_else(|| {
            fail(
                None,
                DiscoveryError::InvalidManifest {
                    reason: "manifest must be a JSON object".to_string(),
                },
            )
        })?;

        let spec_value = manifest.get("spec").ok_or_else(|| {
            fail(
                None,
                DiscoveryError::MissingEntryPoint {
                    entry_point: "spec".to_string(),
                },
            )
        })?;
        let spec = ToolSpec::from_value(spec_value).map_err(|e| {
            fail(
                None,
                DiscoveryError::MalformedSpec {
                    reason: e.to_string(),
                },
            )
        })?;
        let tool = Some(spec.name.as_str());

        let run = manifest.get("run").ok_or_else(|| {
            fail(
                tool,
                DiscoveryError::MissingEntryPoint {
                    entry_point: "run".to_string(),
                },
            )
        })?;
        let handler = self.bind(run).map_err(|e| fail(tool, e))?;

        if let ValidationOutcome::Invalid(mismatches) = validate(&spec, handler.signature()) {
            return Err(fail(tool, DiscoveryError::Validation { mismatches }));
        }

        Ok(Loaded { spec, handler })
    }

    /// Resolve the `run` entry point to a handler.
    fn bind(&self, run: &Value) -> Result<Arc<dyn ToolHandler>, DiscoveryError> {
        let malformed = |reason: &str| DiscoveryError::MalformedRun {
            reason: reason.to_string(),
        };
        let run = run
            .as_object()
            .ok_or_else(|| malformed("must be an object"))?;

        match (run.get("builtin"), run.get("script")) {
            (Some(_), Some(_)) => Err(malformed("declare either 'builtin' or 'script', not both")),
            (Some(builtin), None) => {
                let builtin = builtin
                    .as_str()
                    .ok_or_else(|| malformed("'builtin' must be a string"))?;
                self.catalog
                    .instantiate(builtin)
                    .ok_or_else(|| DiscoveryError::UnknownBuiltin {
                        builtin: builtin.to_string(),
                    })
            }
            (None, Some(script)) => {
                let script = script
                    .as_str()
                    .ok_or_else(|| malformed("'script' must be a string"))?;
                let signature = match run.get("accepts") {
                    None | Some(Value::Null) => Signature::variadic(),
                    Some(accepts) => parse_accepts(accepts)?,
                };
                let handler =
                    ScriptHandler::locate(&self.root, script, signature, self.secrets.clone())?;
                Ok(Arc::new(handler))
            }
            (None, None) => Err(malformed("declare 'builtin' or 'script'")),
        }
    }
}

/// `accepts` lists parameter names; an object with a `default` marks it optional.
fn parse_accepts(accepts: &Value) -> Result<Signature, DiscoveryError> {
    let malformed = |reason: String| DiscoveryError::MalformedRun { reason };
    let items = accepts
        .as_array()
        .ok_or_else(|| malformed("'accepts' must be an array".to_string()))?;

    items
        .iter()
        .try_fold(Signature::new(), |signature, item| match item {
            Value::String(name) => Ok(signature.required(name.as_str())),
            Value::Object(param) => {
                let name = param
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed(format!("'accepts' entry lacks a name: {item}")))?;
                Ok(if param.contains_key("default") {
                    signature.optional(name)
                } else {
                    signature.required(name)
                })
            }
            other => Err(malformed(format!("invalid 'accepts' entry: {other}"))),
        })
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && !name.starts_with('_')
        && path.extension().is_some_and(|ext| ext == "json")
        && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::registry::Registry;
    use serde_json::json;
    use tempfile::TempDir;

    fn module(name: &str, builtin: &str, params: &[&str]) -> String {
        let properties: serde_json::Map<String, Value> = params
            .iter()
            .map(|p| (p.to_string(), json!({"type": "number"})))
            .collect();
        json!({
            "spec": {
                "type": "function",
                "function": {
                    "name": name,
                    "description": format!("{name} tool"),
                    "parameters": {"type": "object", "properties": properties, "required": params}
                }
            },
            "run": {"builtin": builtin}
        })
        .to_string()
    }

    fn setup() -> (TempDir, Scanner, Registry) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("add.json"), module("add", "add", &["a", "b"])).unwrap();
        fs::write(dir.path().join("square.json"), module("square", "square", &["x"])).unwrap();
        let scanner = Scanner::new(dir.path(), BuiltinCatalog::standard(), SecretStore::new());
        (dir, scanner, Registry::new())
    }

    fn run(scanner: &Scanner, registry: &Registry, mode: ScanMode) -> crate::domains::tools::registry::ScanSummary {
        let report = scanner.scan(mode, &registry.snapshot()).unwrap();
        registry.apply(report)
    }

    #[test]
    fn test_candidate_filter() {
        let dir = TempDir::new().unwrap();
        for name in ["b.json", "a.json", "_private.json", ".hidden.json", "notes.txt"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        fs::create_dir(dir.path().join("dir.json")).unwrap();
        let scanner = Scanner::new(dir.path(), BuiltinCatalog::new(), SecretStore::new());
        let names: Vec<_> = scanner
            .candidates()
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_full_scan_twice_is_stable() {
        let (_dir, scanner, registry) = setup();
        let first = run(&scanner, &registry, ScanMode::Full);
        assert_eq!(first.generation, 1);
        assert_eq!(first.loaded, vec!["add".to_string(), "square".to_string()]);
        let add = registry.get("add").unwrap();

        let second = run(&scanner, &registry, ScanMode::Full);
        assert!(!second.changed);
        assert_eq!(second.generation, 1);
        assert_eq!(second.unchanged, 2);
        assert!(Arc::ptr_eq(&add, &registry.get("add").unwrap()));
    }

    #[test]
    fn test_malformed_module_is_isolated() {
        let (dir, scanner, registry) = setup();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let summary = run(&scanner, &registry, ScanMode::Full);
        assert_eq!(summary.tools, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].file, "broken.json");
        assert!(matches!(
            summary.errors[0].error,
            DiscoveryError::InvalidManifest { .. }
        ));
    }

    #[test]
    fn test_incremental_touches_only_changed_module() {
        let (dir, scanner, registry) = setup();
        run(&scanner, &registry, ScanMode::Full);
        let add = registry.get("add").unwrap();
        let square = registry.get("square").unwrap();

        let mut changed: Value =
            serde_json::from_str(&module("square", "square", &["x"])).unwrap();
        changed["spec"]["function"]["description"] = json!("Square a number, now with a longer description");
        fs::write(dir.path().join("square.json"), changed.to_string()).unwrap();

        let summary = run(&scanner, &registry, ScanMode::Incremental);
        assert_eq!(summary.generation, 2);
        assert_eq!(summary.loaded, vec!["square".to_string()]);
        assert_eq!(summary.unchanged, 1);
        assert!(Arc::ptr_eq(&add, &registry.get("add").unwrap()));
        assert!(!Arc::ptr_eq(&square, &registry.get("square").unwrap()));
        assert_eq!(
            registry.get("square").unwrap().spec.description,
            "Square a number, now with a longer description"
        );
    }

    #[test]
    fn test_incremental_without_changes_is_noop() {
        let (_dir, scanner, registry) = setup();
        run(&scanner, &registry, ScanMode::Full);
        let summary = run(&scanner, &registry, ScanMode::Incremental);
        assert!(!summary.changed);
        assert_eq!(summary.generation, 1);
        assert!(summary.loaded.is_empty());
    }

    #[test]
    fn test_deleted_and_failing_sources_are_removed() {
        let (dir, scanner, registry) = setup();
        run(&scanner, &registry, ScanMode::Full);

        fs::remove_file(dir.path().join("add.json")).unwrap();
        fs::write(dir.path().join("square.json"), "{\"spec\": 1}").unwrap();

        let summary = run(&scanner, &registry, ScanMode::Incremental);
        assert_eq!(summary.generation, 2);
        assert_eq!(summary.tools, 0);
        let reasons: Vec<_> = summary.removed.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(reasons[0], "source file removed");
        assert!(reasons[1].starts_with("source failed:"));

        // The failing module is quarantined but keeps being reported.
        let again = run(&scanner, &registry, ScanMode::Incremental);
        assert!(!again.changed);
        assert_eq!(again.errors.len(), 1);
        assert_eq!(again.errors[0].file, "square.json");
    }

    #[test]
    fn test_failure_elsewhere_keeps_existing_owner() {
        let (dir, scanner, registry) = setup();
        run(&scanner, &registry, ScanMode::Full);
        let add = registry.get("add").unwrap();

        fs::write(dir.path().join("zz_add_copy.json"), module("add", "add", &["a", "b"])).unwrap();
        let summary = run(&scanner, &registry, ScanMode::Incremental);

        assert!(!summary.changed);
        assert!(Arc::ptr_eq(&add, &registry.get("add").unwrap()));
        assert!(matches!(
            &summary.errors[0].error,
            DiscoveryError::DuplicateName { owner, .. } if owner == "add.json"
        ));
    }

    #[test]
    fn test_full_scan_duplicate_first_file_wins() {
        let (dir, scanner, registry) = setup();
        fs::write(dir.path().join("0_add.json"), module("add", "add", &["a", "b"])).unwrap();
        let summary = run(&scanner, &registry, ScanMode::Full);
        assert_eq!(summary.tools, 2);
        assert_eq!(registry.get("add").unwrap().source.file_name(), "0_add.json");
        assert_eq!(summary.errors[0].file, "add.json");
    }

    #[test]
    fn test_validation_and_binding_failures() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), module("add", "add", &["a"])).unwrap();
        fs::write(dir.path().join("b.json"), module("cube", "cube", &["x"])).unwrap();
        fs::write(
            dir.path().join("c.json"),
            json!({"spec": {"type": "function", "function": {"name": "c", "description": ""}}})
                .to_string(),
        )
        .unwrap();
        let scanner = Scanner::new(dir.path(), BuiltinCatalog::standard(), SecretStore::new());
        let report = scanner.scan(ScanMode::Full, &RegistrySnapshot::default()).unwrap();

        let kinds: Vec<_> = report
            .errors
            .iter()
            .map(|f| serde_json::to_value(&f.error).unwrap()["kind"].clone())
            .collect();
        assert_eq!(
            kinds,
            vec![json!("validation"), json!("unknown_builtin"), json!("missing_entry_point")]
        );
        assert_eq!(report.errors[0].tool.as_deref(), Some("add"));
    }

    #[test]
    fn test_script_module_with_accepts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("count.py"), "print(1)\n").unwrap();
        fs::write(
            dir.path().join("count.json"),
            json!({
                "spec": {"type": "function", "function": {
                    "name": "count", "description": "Count words.",
                    "parameters": {"type": "object",
                        "properties": {"text": {"type": "string"}, "limit": {"type": "integer"}},
                        "required": ["text"]}}},
                "run": {"script": "count.py", "accepts": ["text", {"name": "limit", "default": 10}]}
            })
            .to_string(),
        )
        .unwrap();
        let scanner = Scanner::new(dir.path(), BuiltinCatalog::new(), SecretStore::new());
        let registry = Registry::new();
        let summary = run(&scanner, &registry, ScanMode::Full);
        assert!(summary.errors.is_empty(), "{:?}", summary.errors);
        assert_eq!(
            registry.get("count").unwrap().handler.kind(),
            crate::domains::tools::handlers::HandlerKind::Script
        );
    }

    #[test]
    fn test_unreadable_directory() {
        let dir = TempDir::new().unwrap();
        let scanner = Scanner::new(
            dir.path().join("missing"),
            BuiltinCatalog::standard(),
            SecretStore::new(),
        );
        let err = scanner
            .scan(ScanMode::Full, &RegistrySnapshot::default())
            .unwrap_err();
        assert!(matches!(err, ToolError::RegistryUnavailable { .. }));
    }
}
