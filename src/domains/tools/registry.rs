//! Tool Registry - the authoritative mapping of tool name to live implementation.
//!
//! The registry holds an immutable [`RegistrySnapshot`] behind a single
//! reference. [`Registry::apply`] builds the next snapshot off to the side and
//! swaps it in under a brief write lock, so readers observe either the old or
//! the new state, never a mixture. Entries are shared via `Arc`: a handler an
//! in-flight execution holds stays alive after it is replaced.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::handlers::ToolHandler;
use super::scanner::{DiscoveryFailure, ScanMode, ScanReport, Staged};
use super::spec::ToolSpec;

/// On-disk state of a tool module, used to detect staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl SourceIdentity {
    /// Stat `path` and capture its identity.
    pub fn of(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    /// File name of the module, for reports.
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A registered tool: its spec, its handler and where it came from.
pub struct ToolEntry {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
    pub source: SourceIdentity,
}

impl ToolEntry {
    pub fn new(spec: ToolSpec, handler: Arc<dyn ToolHandler>, source: SourceIdentity) -> Self {
        Self {
            spec,
            handler,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.spec.name)
            .field("kind", &self.handler.kind())
            .field("source", &self.source)
            .finish()
    }
}

/// An internally consistent registry state.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    entries: BTreeMap<String, Arc<ToolEntry>>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.entries.get(name).cloned()
    }

    /// Entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<ToolEntry>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose module lives at `path`.
    pub fn from_source<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Arc<ToolEntry>> {
        self.entries.values().filter(move |e| e.source.path == path)
    }

    /// Whether `other` holds exactly the same entries.
    fn same_entries(&self, other: &BTreeMap<String, Arc<ToolEntry>>) -> bool {
        self.entries.len() == other.len()
            && self
                .entries
                .iter()
                .zip(other.iter())
                .all(|((ka, a), (kb, b))| ka == kb && Arc::ptr_eq(a, b))
    }
}

/// A tool dropped from the registry, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub name: String,
    pub reason: String,
}

/// Outcome of applying one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub mode: ScanMode,
    pub generation: u64,
    pub changed: bool,
    pub loaded: Vec<String>,
    pub removed: Vec<Removal>,
    pub unchanged: usize,
    pub tools: usize,
    pub errors: Vec<DiscoveryFailure>,
    /// Set when this summary was reused for a request that arrived mid-scan.
    pub coalesced: bool,
    pub finished_at: DateTime<Utc>,
}

/// Process-wide tool registry.
#[derive(Debug, Default)]
pub struct Registry {
    current: RwLock<Arc<RegistrySnapshot>>,
    apply_lock: Mutex<()>,
}

impl Registry {
    /// An empty registry at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Holding it pins one consistent generation.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.snapshot().get(name)
    }

    /// Specs in name order.
    pub fn list(&self) -> Vec<ToolSpec> {
        self.snapshot().entries().map(|e| e.spec.clone()).collect()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    /// Apply a scan report. The only mutator.
    ///
    /// The generation advances by exactly one when the resulting entry set
    /// differs from the current one, and not at all otherwise.
    pub fn apply(&self, report: ScanReport) -> ScanSummary {
        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.snapshot();

        let ScanReport {
            mode,
            staged,
            deleted,
            errors,
            unchanged,
            ..
        } = report;

        let mut loaded = Vec::new();
        let next: BTreeMap<String, Arc<ToolEntry>> = match staged {
            Staged::Replace(entries) => entries
                .into_iter()
                .map(|entry| {
                    let reused = base
                        .entries
                        .get(entry.name())
                        .is_some_and(|old| Arc::ptr_eq(old, &entry));
                    if !reused {
                        loaded.push(entry.name().to_string());
                    }
                    (entry.name().to_string(), entry)
                })
                .collect(),
            Staged::Merge {
                upserts,
                reimported,
            } => {
                let stale: BTreeSet<&PathBuf> = reimported.iter().chain(deleted.iter()).collect();
                let mut next: BTreeMap<_, _> = base
                    .entries
                    .iter()
                    .filter(|(_, e)| !stale.contains(&e.source.path))
                    .map(|(k, e)| (k.clone(), Arc::clone(e)))
                    .collect();
                for entry in upserts {
                    loaded.push(entry.name().to_string());
                    next.insert(entry.name().to_string(), entry);
                }
                next
            }
        };

        let removed: Vec<Removal> = base
            .entries
            .iter()
            .filter(|(name, _)| !next.contains_key(*name))
            .map(|(name, entry)| Removal {
                name: name.clone(),
                reason: removal_reason(entry, &deleted, &errors),
            })
            .collect();

        let changed = !base.same_entries(&next);
        let generation = if changed {
            let snapshot = Arc::new(RegistrySnapshot {
                generation: base.generation + 1,
                entries: next,
            });
            let generation = snapshot.generation;
            let tools = snapshot.len();
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
            info!(
                generation,
                tools,
                loaded = loaded.len(),
                removed = removed.len(),
                "Registry updated"
            );
            generation
        } else {
            debug!(generation = base.generation, "Registry unchanged");
            base.generation
        };

        ScanSummary {
            mode,
            generation,
            changed,
            loaded,
            removed,
            unchanged,
            tools: self.snapshot().len(),
            errors,
            coalesced: false,
            finished_at: Utc::now(),
        }
    }
}

fn removal_reason(entry: &ToolEntry, deleted: &[PathBuf], errors: &[DiscoveryFailure]) -> String {
    if deleted.contains(&entry.source.path) {
        return "source file removed".to_string();
    }
    match errors.iter().find(|f| f.path == entry.source.path) {
        Some(failure) => format!("source failed: {}", failure.message),
        None => format!("no longer declared by {}", entry.source.file_name()),
    }
}
