//! Tool service implementation.
//!
//! The ToolService owns the registry, the scanner, the listing cache and the
//! dispatcher, and is the single handle transports use. It is constructed
//! once at startup and shared behind an `Arc`.
//!
//! Scans are serialized: at most one runs at a time. A scan request that
//! arrives while another is running waits for it and reuses its summary
//! instead of scanning again, unless it asks for a full scan and the running
//! one was incremental.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};

use super::definitions::BuiltinCatalog;
use super::dispatcher::{Dispatcher, ExecutionResult};
use super::error::ToolError;
use super::listing::{Listing, ListingCache};
use super::registry::{Registry, ScanSummary};
use super::scanner::{ScanMode, Scanner};
use super::spec::ToolSpec;
use crate::core::config::{AutoReload, ToolsConfig};
use crate::domains::settings::SecretStore;

/// Service for discovering, listing and executing tools.
#[derive(Debug)]
pub struct ToolService {
    /// Configuration for the tools domain.
    config: ToolsConfig,

    registry: Arc<Registry>,
    scanner: Arc<Scanner>,
    listing: ListingCache,
    dispatcher: Dispatcher,

    /// Held by the running scan; remembers the last finished one.
    scan_gate: Arc<tokio::sync::Mutex<Option<Arc<ScanSummary>>>>,

    /// Summary of the most recent successful scan, for `/discovery`.
    last_summary: Arc<Mutex<Option<Arc<ScanSummary>>>>,

    /// When the auto-reload policy last ran a check.
    last_check: Arc<Mutex<Option<Instant>>>,
}

impl ToolService {
    /// Create a service over `config.directory`. The registry starts empty.
    pub fn new(config: ToolsConfig, catalog: BuiltinCatalog, secrets: SecretStore) -> Self {
        info!(
            directory = %config.directory.display(),
            builtins = ?catalog.names(),
            "Initializing ToolService"
        );

        let registry = Arc::new(Registry::new());
        let scanner = Arc::new(Scanner::new(config.directory.clone(), catalog, secrets));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), config.execute_timeout);

        Self {
            config,
            registry,
            scanner,
            listing: ListingCache::new(),
            dispatcher,
            scan_gate: Arc::new(tokio::sync::Mutex::new(None)),
            last_summary: Arc::new(Mutex::new(None)),
            last_check: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Initial full scan. A failure here is fatal to startup since there is
    /// no prior state to fall back to.
    pub async fn bootstrap(&self) -> Result<Arc<ScanSummary>, ToolError> {
        let summary = self.reload(ScanMode::Full).await?;
        info!(
            tools = summary.tools,
            errors = summary.errors.len(),
            "Tool registry ready"
        );
        Ok(summary)
    }

    /// Run a scan and apply it to the registry.
    ///
    /// The scan runs on a blocking task that owns the gate, so dropping the
    /// caller never releases the gate while the scan is still running.
    #[instrument(skip(self))]
    pub async fn reload(&self, mode: ScanMode) -> Result<Arc<ScanSummary>, ToolError> {
        let mut gate = match Arc::clone(&self.scan_gate).try_lock_owned() {
            Ok(gate) => gate,
            Err(_) => {
                let gate = Arc::clone(&self.scan_gate).lock_owned().await;
                if let Some(finished) = gate.as_ref() {
                    if !(mode == ScanMode::Full && finished.mode == ScanMode::Incremental) {
                        info!("Scan coalesced with the one in progress");
                        let mut summary = ScanSummary::clone(finished);
                        summary.coalesced = true;
                        return Ok(Arc::new(summary));
                    }
                }
                gate
            }
        };

        let registry = Arc::clone(&self.registry);
        let scanner = Arc::clone(&self.scanner);
        let last_summary = Arc::clone(&self.last_summary);
        let last_check = Arc::clone(&self.last_check);
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let outcome = scanner
                .scan(mode, &registry.snapshot())
                .map(|report| registry.apply(report));

            *last_check.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

            match outcome {
                Ok(summary) => {
                    let summary = Arc::new(summary);
                    info!(
                        mode = ?summary.mode,
                        generation = summary.generation,
                        changed = summary.changed,
                        loaded = summary.loaded.len(),
                        removed = summary.removed.len(),
                        errors = summary.errors.len(),
                        "Scan finished"
                    );
                    *gate = Some(Arc::clone(&summary));
                    *last_summary.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(Arc::clone(&summary));
                    Ok(summary)
                }
                Err(e) => {
                    warn!(error = %e, "Scan failed, registry left unchanged");
                    *gate = None;
                    Err(e)
                }
            }
        })
        .await
        .unwrap_or_else(|e| Err(ToolError::internal(format!("scan task failed: {e}"))))
    }

    /// The current listing, reloading first when asked or configured to.
    ///
    /// An empty registry triggers a full scan; a failure there is logged and
    /// the (empty) listing is still served.
    pub async fn get_listing(&self, force_reload: bool) -> Result<Arc<Listing>, ToolError> {
        if force_reload || self.config.force_reload {
            self.reload(ScanMode::Full).await?;
        } else if self.registry.snapshot().is_empty() {
            if let Err(e) = self.reload(ScanMode::Full).await {
                warn!(error = %e, "Scan of empty registry failed");
            }
        } else {
            self.auto_refresh().await;
        }
        Ok(self.listing.listing(&self.registry.snapshot()))
    }

    /// Run an incremental scan if the auto-reload policy says one is due.
    pub async fn auto_refresh(&self) {
        if !self.refresh_due() {
            return;
        }
        if let Err(e) = self.reload(ScanMode::Incremental).await {
            warn!(error = %e, "Auto-reload failed");
        }
    }

    fn refresh_due(&self) -> bool {
        match self.config.auto_reload {
            AutoReload::Disabled => false,
            AutoReload::Continuous => true,
            AutoReload::Interval(interval) => {
                let last = *self.last_check.lock().unwrap_or_else(PoisonError::into_inner);
                last.is_none_or(|at| at.elapsed() >= interval)
            }
        }
    }

    /// Execute a tool with the configured timeout.
    pub async fn execute(&self, name: &str, arguments: Value) -> ExecutionResult {
        self.dispatcher.execute(name, arguments, None).await
    }

    /// Execute a tool with an explicit timeout.
    pub async fn execute_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ExecutionResult {
        self.dispatcher.execute(name, arguments, Some(timeout)).await
    }

    /// Specs of every registered tool, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.list()
    }

    /// Summary of the most recent successful scan.
    pub fn last_scan(&self) -> Option<Arc<ScanSummary>> {
        self.last_summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::error::ErrorKind;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_module(dir: &Path, file: &str, name: &str, builtin: &str, params: &[&str]) {
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
        fs::write(dir.join(file), module.to_string()).unwrap();
    }

    fn service(dir: &Path, auto_reload: AutoReload) -> ToolService {
        let config = ToolsConfig {
            directory: dir.to_path_buf(),
            execute_timeout: Duration::from_secs(5),
            auto_reload,
            force_reload: false,
        };
        ToolService::new(config, BuiltinCatalog::standard(), SecretStore::new())
    }

    #[tokio::test]
    async fn test_shipped_tools_mirror_declared_types() {
        let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("tools");
        let service = service(&shipped, AutoReload::Disabled);
        let summary = service.bootstrap().await.unwrap();
        assert!(summary.errors.is_empty(), "{:?}", summary.errors);

        let numeric = service.execute("add", json!({"a": "2", "b": "3"})).await;
        assert_eq!(numeric.unwrap(), json!(5));
        let textual = service.execute("add_text", json!({"a": "2", "b": "3"})).await;
        assert_eq!(textual.unwrap(), json!("5"));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_on_missing_directory() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir.path().join("missing"), AutoReload::Disabled);
        let err = service.bootstrap().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegistryUnavailable);
        assert!(service.last_scan().is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_scans_on_listing() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "add.json", "add", "add", &["a", "b"]);
        let service = service(dir.path(), AutoReload::Disabled);

        let listing = service.get_listing(false).await.unwrap();
        assert_eq!(listing.items.len(), 1);
        assert_eq!(service.last_scan().unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_interval_policy_defers_refresh() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "add.json", "add", "add", &["a", "b"]);
        let service = service(dir.path(), AutoReload::Interval(Duration::from_secs(3600)));
        service.bootstrap().await.unwrap();

        write_module(dir.path(), "square.json", "square", "square", &["x"]);
        assert_eq!(service.get_listing(false).await.unwrap().items.len(), 1);
        assert_eq!(service.get_listing(true).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn test_continuous_policy_picks_up_new_modules() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "add.json", "add", "add", &["a", "b"]);
        let service = service(dir.path(), AutoReload::Continuous);
        service.bootstrap().await.unwrap();

        write_module(dir.path(), "square.json", "square", "square", &["x"]);
        let listing = service.get_listing(false).await.unwrap();
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.generation, 2);
        assert_eq!(service.last_scan().unwrap().mode, ScanMode::Incremental);
    }

    #[tokio::test]
    async fn test_concurrent_full_scans_coalesce() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "add.json", "add", "add", &["a", "b"]);
        let service = service(dir.path(), AutoReload::Disabled);

        let (first, second) =
            tokio::join!(service.reload(ScanMode::Full), service.reload(ScanMode::Full));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(!first.coalesced);
        assert!(second.coalesced);
        assert_eq!(first.generation, second.generation);
        assert_eq!(service.registry().generation(), 1);
    }

    #[tokio::test]
    async fn test_full_scan_not_coalesced_into_incremental() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "add.json", "add", "add", &["a", "b"]);
        let service = service(dir.path(), AutoReload::Disabled);
        service.bootstrap().await.unwrap();

        let (incremental, full) = tokio::join!(
            service.reload(ScanMode::Incremental),
            service.reload(ScanMode::Full)
        );
        assert!(!incremental.unwrap().coalesced);
        let full = full.unwrap();
        assert!(!full.coalesced);
        assert_eq!(full.mode, ScanMode::Full);
    }

    #[tokio::test]
    async fn test_cancelled_reload_keeps_scans_serialized() {
        let dir = TempDir::new().unwrap();
        for i in 0..2000 {
            let name = format!("add_{i}");
            write_module(dir.path(), &format!("{name}.json"), &name, "add", &["a", "b"]);
        }
        let service = service(dir.path(), AutoReload::Disabled);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(1), service.reload(ScanMode::Full)).await;
        drop(cancelled);

        // Either waits for the abandoned scan or rescans an unchanged directory.
        let second = service.reload(ScanMode::Full).await.unwrap();
        assert_eq!(second.generation, 1);
        assert!(second.coalesced || !second.changed);
        assert_eq!(service.registry().generation(), 1);
        assert_eq!(service.specs().len(), 2000);
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_registry() {
        let dir = TempDir::new().unwrap();
        let tools = dir.path().join("tools");
        fs::create_dir(&tools).unwrap();
        write_module(&tools, "add.json", "add", "add", &["a", "b"]);
        let service = service(&tools, AutoReload::Disabled);
        service.bootstrap().await.unwrap();

        fs::rename(&tools, dir.path().join("moved")).unwrap();
        let err = service.get_listing(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegistryUnavailable);
        assert_eq!(service.specs().len(), 1);
        assert_eq!(service.registry().generation(), 1);
    }

    #[tokio::test]
    async fn test_executions_during_full_scan() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "add.json", "add", "add", &["a", "b"]);
        write_module(dir.path(), "square.json", "square", "square", &["x"]);
        let service = service(dir.path(), AutoReload::Disabled);
        service.bootstrap().await.unwrap();

        let (scan, add, square) = tokio::join!(
            service.reload(ScanMode::Full),
            service.execute("add", json!({"a": 2, "b": 3})),
            service.execute("square", json!({"x": "4"})),
        );
        scan.unwrap();
        assert_eq!(add.unwrap(), json!(5));
        assert_eq!(square.unwrap(), json!(16));
    }
}
