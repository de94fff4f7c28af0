//! Tool Dispatcher's registry — the seam between the Agent Loop and
//! concrete tool implementations (exec, process, file I/O, built-ins).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ag_domain::tool::ToolDefinition;
use ag_domain::{Error, Result};
use serde_json::{json, Value};

use crate::exec::{self, ExecRequest};
use crate::file_ops::{
    self, FileAppendRequest, FileDeleteRequest, FileListRequest, FileMoveRequest,
    FileReadRequest, FileWriteRequest,
};
use crate::manager::ProcessManager;
use crate::process::{self, ProcessRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single callable tool. Implementations wrap either a pure function
/// (file ops) or shared mutable state (the process manager).
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Whether this tool only reads state. The Policy Gate and the
    /// per-session parallelism limiter both use this: read-only calls may
    /// run concurrently with each other, side-effecting calls run serially.
    fn is_read_only(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry trait + in-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lookup surface the Tool Dispatcher uses to resolve a call's tool name
/// to a callable implementation. An external collaborator (e.g. an MCP
/// bridge) can provide its own implementation of this trait.
pub trait ToolRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>>;
    fn definitions(&self) -> Vec<ToolDefinition>;
}

/// A static, process-local tool registry backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name.clone(), tool);
    }

    /// Build the standard built-in tool set: `exec`, `process.*`, `file.*`.
    pub fn with_builtins(workspace_root: PathBuf, process_manager: Arc<ProcessManager>) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(ExecTool { manager: process_manager.clone() }));
        reg.register(Arc::new(ProcessTool { manager: process_manager }));
        reg.register(Arc::new(FileReadTool { workspace_root: workspace_root.clone() }));
        reg.register(Arc::new(FileWriteTool { workspace_root: workspace_root.clone() }));
        reg.register(Arc::new(FileAppendTool { workspace_root: workspace_root.clone() }));
        reg.register(Arc::new(FileMoveTool { workspace_root: workspace_root.clone() }));
        reg.register(Arc::new(FileDeleteTool { workspace_root: workspace_root.clone() }));
        reg.register(Arc::new(FileListTool { workspace_root }));
        reg
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in: echo (deterministic-test harness tool)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Return the given text unchanged. Used for scripted testing.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArguments("echo requires a \"text\" string".into()))?;
        Ok(json!({ "text": text }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in: exec / process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ExecTool {
    manager: Arc<ProcessManager>,
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command, foreground or backgrounded.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "background": { "type": "boolean" },
                    "yield_ms": { "type": "integer" },
                    "timeout_sec": { "type": "integer" },
                    "workdir": { "type": "string" },
                    "env": { "type": "object" },
                },
                "required": ["command"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: ExecRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        let resp = exec::exec(&self.manager, req).await;
        serde_json::to_value(resp).map_err(Error::Json)
    }
}

struct ProcessTool {
    manager: Arc<ProcessManager>,
}

#[async_trait::async_trait]
impl Tool for ProcessTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "process".into(),
            description: "Manage background process sessions (list/poll/log/write/kill/clear/remove).".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"] },
                    "session_id": { "type": "string" },
                    "offset": { "type": "integer" },
                    "limit": { "type": "integer" },
                    "tail_lines": { "type": "integer" },
                    "data": { "type": "string" },
                    "eof": { "type": "boolean" },
                },
                "required": ["action"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: ProcessRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        let resp = process::handle_process(&self.manager, req).await;
        serde_json::to_value(resp).map_err(Error::Json)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in: file ops, sandboxed to a workspace root
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FileReadTool {
    workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.read".into(),
            description: "Read a file within the workspace, optionally by line range.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "offset": { "type": "integer" },
                    "limit": { "type": "integer" },
                },
                "required": ["path"],
            }),
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: FileReadRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        file_ops::file_read(&self.workspace_root, req)
            .await
            .map_err(Error::ToolExecution)
    }
}

struct FileWriteTool {
    workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.write".into(),
            description: "Overwrite a file within the workspace with new content.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" }, "content": { "type": "string" } },
                "required": ["path", "content"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: FileWriteRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        file_ops::file_write(&self.workspace_root, req)
            .await
            .map_err(Error::ToolExecution)
    }
}

struct FileAppendTool {
    workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileAppendTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.append".into(),
            description: "Append content to a file within the workspace.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" }, "content": { "type": "string" } },
                "required": ["path", "content"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: FileAppendRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        file_ops::file_append(&self.workspace_root, req)
            .await
            .map_err(Error::ToolExecution)
    }
}

struct FileMoveTool {
    workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileMoveTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.move".into(),
            description: "Move or rename a file within the workspace.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "source": { "type": "string" }, "destination": { "type": "string" } },
                "required": ["source", "destination"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: FileMoveRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        file_ops::file_move(&self.workspace_root, req)
            .await
            .map_err(Error::ToolExecution)
    }
}

struct FileDeleteTool {
    workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileDeleteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.delete".into(),
            description: "Delete a file within the workspace.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: FileDeleteRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        file_ops::file_delete(&self.workspace_root, req)
            .await
            .map_err(Error::ToolExecution)
    }
}

struct FileListTool {
    workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for FileListTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.list".into(),
            description: "List directory entries within the workspace.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
            }),
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let req: FileListRequest = serde_json::from_value(arguments)
            .map_err(|e| Error::InvalidArguments(e.to_string()))?;
        file_ops::file_list(&self.workspace_root, req)
            .await
            .map_err(Error::ToolExecution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::ExecConfig;

    #[tokio::test]
    async fn echo_tool_round_trips_text() {
        let tool = EchoTool;
        let out = tool.call(json!({ "text": "hi" })).await.unwrap();
        assert_eq!(out["text"], "hi");
        assert!(tool.is_read_only());
    }

    #[tokio::test]
    async fn registry_resolves_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        let registry = InMemoryToolRegistry::with_builtins(dir.path().to_path_buf(), manager);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("exec").is_some());
        assert!(registry.get("file.read").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.definitions().iter().any(|d| d.name == "file.write"));
    }

    #[tokio::test]
    async fn file_read_tool_reads_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let tool = FileReadTool { workspace_root: dir.path().to_path_buf() };
        let out = tool.call(json!({ "path": "a.txt" })).await.unwrap();
        assert!(out.to_string().contains("hello"));
    }
}
