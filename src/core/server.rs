//! Server handle shared by every transport.
//!
//! [`ToolServer`] bundles the configuration with the tool and settings
//! services. The HTTP transport uses it as router state; under the `stdio`
//! feature it also implements the rmcp `ServerHandler`, so `tools/list` and
//! `tools/call` go through the same registry and dispatcher as `/execute`.

use std::sync::Arc;

use serde_json::Value;

use super::config::Config;
use crate::domains::settings::SettingsService;
use crate::domains::tools::{ScanMode, ToolError, ToolService};
use tracing::warn;

#[cfg(feature = "stdio")]
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, model::*, service::RequestContext,
};
#[cfg(feature = "stdio")]
use tracing::{info, instrument};

/// Shared server state.
#[derive(Debug, Clone)]
pub struct ToolServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Discovery, listing and execution.
    tools: Arc<ToolService>,

    /// Managed secrets.
    settings: Arc<SettingsService>,
}

impl ToolServer {
    pub fn new(config: Config, tools: Arc<ToolService>, settings: Arc<SettingsService>) -> Self {
        Self {
            config: Arc::new(config),
            tools,
            settings,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolService> {
        &self.tools
    }

    pub fn settings(&self) -> &Arc<SettingsService> {
        &self.settings
    }

    /// Bring the registry up to date per the reload policy, then execute
    /// `name`. An empty registry is rescanned in full first.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        if self.tools.registry().snapshot().is_empty() {
            if let Err(e) = self.tools.reload(ScanMode::Full).await {
                warn!(error = %e, "Scan of empty registry failed");
            }
        } else {
            self.tools.auto_refresh().await;
        }
        self.tools.execute(name, arguments).await
    }
}

/// Text shown to MCP clients for a tool result.
#[cfg(feature = "stdio")]
fn result_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(feature = "stdio")]
impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Tools are discovered from manifests in the tools directory and reloaded \
                 when the directory changes."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    #[instrument(skip(self, _request, _context))]
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.tools.auto_refresh().await;
        let tools: Vec<Tool> = self
            .tools
            .specs()
            .into_iter()
            .map(|spec| Tool::new(spec.name.clone(), spec.description.clone(), spec.input_schema()))
            .collect();
        info!(count = tools.len(), "Listing tools");
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip(self, request, _context), fields(tool = %request.name))]
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request.arguments.map(Value::Object).unwrap_or(Value::Null);
        match self.execute(&request.name, arguments).await {
            Ok(value) => Ok(CallToolResult::success(vec![Content::text(result_text(
                &value,
            ))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "{}: {}",
                e.kind(),
                e
            ))])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AutoReload, ToolsConfig};
    use crate::domains::settings::SecretStore;
    use crate::domains::tools::{BuiltinCatalog, ErrorKind};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_server(dir: &TempDir) -> ToolServer {
        let config = Config {
            tools: ToolsConfig {
                directory: dir.path().join("tools"),
                execute_timeout: Duration::from_secs(5),
                auto_reload: AutoReload::Continuous,
                force_reload: false,
            },
            ..Config::default()
        };
        let secrets = SecretStore::new();
        let tools = Arc::new(ToolService::new(
            config.tools.clone(),
            BuiltinCatalog::standard(),
            secrets.clone(),
        ));
        let settings = Arc::new(SettingsService::new(secrets, dir.path().join(".env")));
        ToolServer::new(config, tools, settings)
    }

    #[tokio::test]
    async fn test_call_picks_up_new_module() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("tools")).unwrap();
        let server = test_server(&dir);
        server.tools().bootstrap().await.unwrap();

        let err = server.execute("echo", json!({"message": "hi"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTool);

        let module = json!({
            "spec": {"type": "function", "function": {
                "name": "echo", "description": "Echo a message.",
                "parameters": {"type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]}}},
            "run": {"builtin": "echo"}
        });
        std::fs::write(dir.path().join("tools/echo.json"), module.to_string()).unwrap();

        let value = server.execute("echo", json!({"message": "hi"})).await.unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[test]
    fn test_identity() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        assert_eq!(server.name(), "tooldock");
        assert_eq!(server.version(), env!("CARGO_PKG_VERSION"));
    }
}
