//! Tool handlers.
//!
//! A handler is the execution entry point of a tool module. The dispatcher
//! only depends on the [`ToolHandler`] trait; the scanner constructs the
//! concrete variants:
//!
//! - [`BuiltinHandler`] wraps a function compiled into the server.
//! - [`ScriptHandler`] runs an external script found inside the tools directory.
//!
//! Every handler exposes a [`Signature`] so its spec can be validated.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinError;
use tracing::debug;

use super::error::DiscoveryError;
use crate::core::security::resolve_within_root;
use crate::domains::settings::SecretStore;

/// Validated arguments, keyed by parameter name.
pub type Arguments = Map<String, Value>;

/// A fault raised by a handler while running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerFault {
    pub message: String,
}

impl HandlerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Which kind of entry point backs a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Builtin,
    Script,
}

/// One parameter a handler accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedParam {
    pub name: String,
    pub has_default: bool,
}

/// The calling signature of a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<AcceptedParam>,
    variadic: bool,
}

impl Signature {
    /// An empty signature accepting no parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signature accepting any parameter by name.
    pub fn variadic() -> Self {
        Self {
            params: Vec::new(),
            variadic: true,
        }
    }

    /// Add a parameter without a default.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(AcceptedParam {
            name: name.into(),
            has_default: false,
        });
        self
    }

    /// Add a parameter with a default.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(AcceptedParam {
            name: name.into(),
            has_default: true,
        });
        self
    }

    pub fn params(&self) -> &[AcceptedParam] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Whether the handler accepts a parameter with this name.
    pub fn accepts(&self, name: &str) -> bool {
        self.variadic || self.params.iter().any(|p| p.name == name)
    }
}

/// The execution entry point of a tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    fn signature(&self) -> &Signature;

    /// Run the handler with already validated arguments.
    async fn invoke(&self, arguments: Arguments) -> Result<Value, HandlerFault>;
}

/// A function compiled into the server.
pub type BuiltinFn = Arc<dyn Fn(&Arguments) -> Result<Value, HandlerFault> + Send + Sync>;

/// Handler bound to a builtin function.
#[derive(Clone)]
pub struct BuiltinHandler {
    builtin: String,
    signature: Signature,
    func: BuiltinFn,
}

impl BuiltinHandler {
    pub fn new<F>(builtin: impl Into<String>, signature: Signature, func: F) -> Self
    where
        F: Fn(&Arguments) -> Result<Value, HandlerFault> + Send + Sync + 'static,
    {
        Self {
            builtin: builtin.into(),
            signature,
            func: Arc::new(func),
        }
    }

    pub fn builtin(&self) -> &str {
        &self.builtin
    }
}

impl std::fmt::Debug for BuiltinHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinHandler")
            .field("builtin", &self.builtin)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ToolHandler for BuiltinHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Builtin
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, arguments: Arguments) -> Result<Value, HandlerFault> {
        let func = Arc::clone(&self.func);
        tokio::task::spawn_blocking(move || func(&arguments))
            .await
            .map_err(|e| HandlerFault::new(describe_join_error(e)))?
    }
}

/// Handler that runs a script with arguments on stdin.
#[derive(Debug, Clone)]
pub struct ScriptHandler {
    script: PathBuf,
    working_dir: PathBuf,
    program: String,
    signature: Signature,
    secrets: SecretStore,
}

impl ScriptHandler {
    /// Locate `relative` inside `root` and pick its runtime.
    pub fn locate(
        root: &Path,
        relative: &str,
        signature: Signature,
        secrets: SecretStore,
    ) -> Result<Self, DiscoveryError> {
        let script =
            resolve_within_root(root, relative).map_err(|e| DiscoveryError::ScriptRejected {
                reason: e.to_string(),
            })?;
        if !script.is_file() {
            return Err(DiscoveryError::ScriptRejected {
                reason: format!("'{relative}' is not a file"),
            });
        }
        let program = runtime_for_script(&script).ok_or_else(|| {
            DiscoveryError::UnsupportedRuntime {
                script: relative.to_string(),
            }
        })?;
        let working_dir = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());

        Ok(Self {
            script,
            working_dir,
            program: program.to_string(),
            signature,
            secrets,
        })
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait::async_trait]
impl ToolHandler for ScriptHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Script
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, arguments: Arguments) -> Result<Value, HandlerFault> {
        let payload = serde_json::to_vec(&arguments)
            .map_err(|e| HandlerFault::new(format!("cannot encode arguments: {e}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script)
            .current_dir(&self.working_dir)
            .envs(self.secrets.snapshot())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| HandlerFault::new(format!("cannot start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A script that ignores its input may exit before reading it.
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(HandlerFault::new(format!("cannot write arguments: {e}")));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| HandlerFault::new(format!("script did not complete: {e}")))?;

        debug!(
            script = %self.script.display(),
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            "Script finished"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(HandlerFault::new(if stderr.is_empty() {
                format!("script exited with {}", output.status)
            } else {
                stderr.to_string()
            }));
        }

        Ok(parse_script_output(&output.stdout))
    }
}

fn runtime_for_script(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "sh" => Some("bash"),
        "py" => Some("python3"),
        "js" => Some("node"),
        _ => None,
    }
}

/// Stdout as JSON when it parses, otherwise as trimmed text.
fn parse_script_output(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Human-readable reason a handler task ended abnormally.
pub(crate) fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_signature_builder() {
        let sig = Signature::new().required("a").optional("b");
        assert!(sig.accepts("a"));
        assert!(sig.accepts("b"));
        assert!(!sig.accepts("c"));
        assert!(!sig.params()[0].has_default);
        assert!(sig.params()[1].has_default);
        assert!(Signature::variadic().accepts("anything"));
    }

    #[test]
    fn test_parse_script_output() {
        assert_eq!(parse_script_output(b"{\"n\": 3}\n"), json!({"n": 3}));
        assert_eq!(parse_script_output(b"hello world\n"), json!("hello world"));
        assert_eq!(parse_script_output(b"  \n"), Value::Null);
    }

    #[tokio::test]
    async fn test_builtin_handler_runs_function() {
        let handler = BuiltinHandler::new(
            "len",
            Signature::new().required("s"),
            |args| {
                let s = args.get("s").and_then(Value::as_str).unwrap_or_default();
                Ok(json!(s.len()))
            },
        );
        let mut args = Arguments::new();
        args.insert("s".to_string(), json!("four"));
        assert_eq!(handler.invoke(args).await.unwrap(), json!(4));
        assert_eq!(handler.kind(), HandlerKind::Builtin);
    }

    #[tokio::test]
    async fn test_builtin_panic_becomes_fault() {
        let handler = BuiltinHandler::new("boom", Signature::new(), |_| panic!("kaboom"));
        let fault = handler.invoke(Arguments::new()).await.unwrap_err();
        assert!(fault.message.contains("kaboom"));
    }

    #[test]
    fn test_locate_rejects_escape_and_unknown_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("tools");
        fs::create_dir(&root).unwrap();
        fs::write(temp_dir.path().join("outside.sh"), "echo hi").unwrap();
        fs::write(root.join("tool.rb"), "puts 1").unwrap();

        let err = ScriptHandler::locate(&root, "../outside.sh", Signature::variadic(), SecretStore::new())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::ScriptRejected { .. }));

        let err = ScriptHandler::locate(&root, "tool.rb", Signature::variadic(), SecretStore::new())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::UnsupportedRuntime { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_handler_reads_stdin_and_env() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("greet.sh"),
            "read -r line\necho \"{\\\"input\\\": $line, \\\"token\\\": \\\"$GREET_TOKEN\\\"}\"\n",
        )
        .unwrap();

        let secrets = SecretStore::new();
        secrets.set("GREET_TOKEN", "abc");
        let handler =
            ScriptHandler::locate(temp_dir.path(), "greet.sh", Signature::variadic(), secrets)
                .unwrap();
        assert_eq!(handler.program(), "bash");

        let mut args = Arguments::new();
        args.insert("name".to_string(), json!("ada"));
        let out = handler.invoke(args).await.unwrap();
        assert_eq!(out, json!({"input": {"name": "ada"}, "token": "abc"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_failure_carries_stderr() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("fail.sh"), "echo 'bad input' >&2\nexit 3\n").unwrap();

        let handler =
            ScriptHandler::locate(temp_dir.path(), "fail.sh", Signature::new(), SecretStore::new())
                .unwrap();
        let fault = handler.invoke(Arguments::new()).await.unwrap_err();
        assert_eq!(fault.message, "bad input");
    }
}
