use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use agent_api::{is_cancelled, CancelSignal};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use turn_engine::{ApprovedCall, ExecutionBatch, ToolCatalog, ToolExecution};
use wait_timeout::ChildExt;

const DEFAULT_BASH_TIMEOUT_SEC: u64 = 120;
const MAX_BASH_TIMEOUT_SEC: u64 = 600;
const DEFAULT_BASH_MAX_OUTPUT_BYTES: usize = 100 * 1024;
const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;

pub const BASH: &str = "Bash";
pub const READ: &str = "Read";
pub const WRITE: &str = "Write";
pub const EDIT: &str = "Edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Bash {
        command: String,
        timeout_sec: Option<u64>,
        cwd: Option<String>,
    },
    Read {
        file_path: String,
    },
    Write {
        file_path: String,
        content: String,
    },
    Edit {
        file_path: String,
        old_string: String,
        new_string: String,
    },
}

#[derive(Deserialize)]
struct BashArgs {
    command: String,
    #[serde(default)]
    timeout_sec: Option<u64>,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Deserialize)]
struct ReadArgs {
    file_path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditArgs {
    file_path: String,
    old_string: String,
    new_string: String,
}

impl ToolCall {
    pub fn from_args(tool_name: &str, args: &Value) -> Result<Self, String> {
        let invalid = |error: serde_json::Error| format!("Invalid arguments for {tool_name}: {error}");
        match tool_name {
            BASH => {
                let args: BashArgs = serde_json::from_value(args.clone()).map_err(invalid)?;
                Ok(Self::Bash {
                    command: args.command,
                    timeout_sec: args.timeout_sec,
                    cwd: args.cwd,
                })
            }
            READ => {
                let args: ReadArgs = serde_json::from_value(args.clone()).map_err(invalid)?;
                Ok(Self::Read {
                    file_path: args.file_path,
                })
            }
            WRITE => {
                let args: WriteArgs = serde_json::from_value(args.clone()).map_err(invalid)?;
                Ok(Self::Write {
                    file_path: args.file_path,
                    content: args.content,
                })
            }
            EDIT => {
                let args: EditArgs = serde_json::from_value(args.clone()).map_err(invalid)?;
                Ok(Self::Edit {
                    file_path: args.file_path,
                    old_string: args.old_string,
                    new_string: args.new_string,
                })
            }
            unknown => Err(format!("Unknown tool: {unknown}")),
        }
    }
}

/// JSON input schema for each built-in tool.
pub fn tool_schema(tool_name: &str) -> Option<Value> {
    let schema = match tool_name {
        BASH => json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_sec": {"type": "integer", "minimum": 1},
                "cwd": {"type": "string"}
            },
            "required": ["command"]
        }),
        READ => json!({
            "type": "object",
            "properties": {"file_path": {"type": "string"}},
            "required": ["file_path"]
        }),
        WRITE => json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["file_path", "content"]
        }),
        EDIT => json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"}
            },
            "required": ["file_path", "old_string", "new_string"]
        }),
        _ => return None,
    };
    Some(schema)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub ok: bool,
    pub content: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn fail(content: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: content.into(),
            stdout: None,
            stderr: None,
        }
    }

    fn into_execution(self, tool_call_id: String) -> ToolExecution {
        let mut execution = if self.ok {
            ToolExecution::success(tool_call_id, self.content)
        } else {
            ToolExecution::error(tool_call_id, self.content)
        };
        execution.stdout = self.stdout.map(|stdout| vec![stdout]);
        execution.stderr = self.stderr.map(|stderr| vec![stderr]);
        execution
    }
}

/// Runs built-in tools confined to one workspace directory.
#[derive(Debug, Clone)]
pub struct LocalTools {
    workspace_root: PathBuf,
    default_bash_timeout_sec: u64,
    bash_max_output_bytes: usize,
    read_max_bytes: usize,
}

impl LocalTools {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Result<Self, String> {
        let workspace_root = workspace_root.into();
        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|err| format!("Failed to resolve workspace root: {err}"))?;

        if !canonical_root.is_dir() {
            return Err("Workspace root must be a directory".to_string());
        }

        Ok(Self {
            workspace_root: canonical_root,
            default_bash_timeout_sec: DEFAULT_BASH_TIMEOUT_SEC,
            bash_max_output_bytes: DEFAULT_BASH_MAX_OUTPUT_BYTES,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        })
    }

    #[must_use]
    pub fn with_bash_max_output_bytes(mut self, max_bytes: usize) -> Self {
        self.bash_max_output_bytes = max_bytes;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn run(&self, call: ToolCall) -> ToolOutput {
        match call {
            ToolCall::Bash {
                command,
                timeout_sec,
                cwd,
            } => self.execute_bash(command, timeout_sec, cwd),
            ToolCall::Read { file_path } => self.execute_read(&file_path),
            ToolCall::Write { file_path, content } => self.execute_write(&file_path, content),
            ToolCall::Edit {
                file_path,
                old_string,
                new_string,
            } => self.execute_edit(&file_path, &old_string, &new_string),
        }
    }

    fn execute_bash(&self, command: String, timeout_sec: Option<u64>, cwd: Option<String>) -> ToolOutput {
        let timeout = timeout_sec
            .unwrap_or(self.default_bash_timeout_sec)
            .clamp(1, MAX_BASH_TIMEOUT_SEC);
        let mut command_builder = Command::new("bash");
        command_builder
            .arg("-lc")
            .arg(command)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = cwd {
            let cwd_path = match self.resolve_existing_path(&cwd) {
                Ok(path) => path,
                Err(error) => return ToolOutput::fail(format!("Invalid bash cwd: {error}")),
            };
            if !cwd_path.is_dir() {
                return ToolOutput::fail("Invalid bash cwd: expected a directory");
            }
            command_builder.current_dir(cwd_path);
        }

        let mut child = match command_builder.spawn() {
            Ok(child) => child,
            Err(error) => return ToolOutput::fail(format!("Failed to launch bash command: {error}")),
        };

        let (timed_out, status) = match child.wait_timeout(Duration::from_secs(timeout)) {
            Ok(Some(status)) => (false, status),
            Ok(None) => {
                let _ = child.kill();
                match child.wait() {
                    Ok(status) => (true, status),
                    Err(error) => {
                        return ToolOutput::fail(format!(
                            "Command timed out after {timeout}s and wait failed: {error}"
                        ));
                    }
                }
            }
            Err(error) => {
                let _ = child.kill();
                return ToolOutput::fail(format!("Failed waiting for bash command: {error}"));
            }
        };

        let stdout = truncate_to_byte_limit(
            String::from_utf8_lossy(&read_pipe_bytes(child.stdout.take())).to_string(),
            self.bash_max_output_bytes,
        );
        let stderr = truncate_to_byte_limit(
            String::from_utf8_lossy(&read_pipe_bytes(child.stderr.take())).to_string(),
            self.bash_max_output_bytes,
        );

        let status_label = if timed_out {
            format!("timeout after {timeout}s")
        } else {
            format_exit_status(status)
        };
        let content = truncate_to_byte_limit(
            format!("status: {status_label}\nstdout:\n{stdout}\nstderr:\n{stderr}"),
            self.bash_max_output_bytes,
        );

        ToolOutput {
            ok: !timed_out && status.success(),
            content,
            stdout: Some(stdout),
            stderr: Some(stderr),
        }
    }

    fn execute_read(&self, file_path: &str) -> ToolOutput {
        let resolved = match self.resolve_existing_path(file_path) {
            Ok(path) => path,
            Err(error) => return ToolOutput::fail(error),
        };

        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(error) => {
                return ToolOutput::fail(format!("Failed to read file {}: {error}", resolved.display()));
            }
        };

        if bytes.len() > self.read_max_bytes {
            return ToolOutput::fail(format!(
                "File exceeds max read size ({} bytes > {} bytes)",
                bytes.len(),
                self.read_max_bytes
            ));
        }

        match String::from_utf8(bytes) {
            Ok(content) => ToolOutput::ok(content),
            Err(_) => ToolOutput::fail("File is not valid UTF-8 text"),
        }
    }

    fn execute_edit(&self, file_path: &str, old_string: &str, new_string: &str) -> ToolOutput {
        if old_string.is_empty() {
            return ToolOutput::fail("old_string must not be empty");
        }

        let resolved = match self.resolve_existing_path(file_path) {
            Ok(path) => path,
            Err(error) => return ToolOutput::fail(error),
        };

        let current = match fs::read_to_string(&resolved) {
            Ok(content) => content,
            Err(error) => {
                return ToolOutput::fail(format!("Failed to read file {}: {error}", resolved.display()));
            }
        };

        let occurrences = current.match_indices(old_string).count();
        if occurrences != 1 {
            return ToolOutput::fail(format!(
                "Edit requires exactly one match for old_string; found {occurrences}"
            ));
        }

        if let Err(error) = fs::write(&resolved, current.replacen(old_string, new_string, 1)) {
            return ToolOutput::fail(format!("Failed to write file {}: {error}", resolved.display()));
        }

        ToolOutput::ok(format!("Updated {}", self.workspace_relative_display(&resolved)))
    }

    fn execute_write(&self, file_path: &str, content: String) -> ToolOutput {
        let resolved = match self.resolve_write_path(file_path) {
            Ok(path) => path,
            Err(error) => return ToolOutput::fail(error),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                return ToolOutput::fail(format!(
                    "Failed to create parent directories {}: {error}",
                    parent.display()
                ));
            }

            let canonical_parent = match parent.canonicalize() {
                Ok(path) => path,
                Err(error) => {
                    return ToolOutput::fail(format!(
                        "Failed to resolve write parent {}: {error}",
                        parent.display()
                    ));
                }
            };
            if let Err(error) = self.ensure_inside_workspace(&canonical_parent) {
                return ToolOutput::fail(error);
            }
        }

        if let Err(error) = fs::write(&resolved, content) {
            return ToolOutput::fail(format!("Failed to write file {}: {error}", resolved.display()));
        }

        ToolOutput::ok(format!("Wrote {}", self.workspace_relative_display(&resolved)))
    }

    fn resolve_existing_path(&self, path: &str) -> Result<PathBuf, String> {
        if path.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let candidate = self.absolute_candidate(path);
        let canonical = candidate
            .canonicalize()
            .map_err(|error| format!("Failed to resolve path {}: {error}", candidate.display()))?;

        self.ensure_inside_workspace(&canonical)?;
        Ok(canonical)
    }

    fn resolve_write_path(&self, path: &str) -> Result<PathBuf, String> {
        if path.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let candidate = self.absolute_candidate(path);
        let parent = candidate.parent().ok_or_else(|| {
            format!(
                "Path {} has no parent directory and cannot be written safely",
                candidate.display()
            )
        })?;

        let anchor = canonicalize_existing_ancestor(parent)?;
        self.ensure_inside_workspace(&anchor)?;
        Ok(candidate)
    }

    fn absolute_candidate(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    fn ensure_inside_workspace(&self, canonical_path: &Path) -> Result<(), String> {
        if canonical_path.starts_with(&self.workspace_root) {
            Ok(())
        } else {
            Err(format!("Path escapes workspace root: {}", canonical_path.display()))
        }
    }

    fn workspace_relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .map(|relative| relative.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }

    fn run_call(&self, call: &ApprovedCall) -> ToolOutput {
        match ToolCall::from_args(&call.tool_name, &call.args) {
            Ok(parsed) => self.run(parsed),
            Err(error) => ToolOutput::fail(error),
        }
    }
}

#[async_trait]
impl ExecutionBatch for LocalTools {
    /// Runs calls one at a time on blocking threads, in order. Calls left
    /// when the turn is cancelled are reported as not run.
    async fn execute(&self, calls: Vec<ApprovedCall>, cancel: &CancelSignal) -> Vec<ToolExecution> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if is_cancelled(cancel) {
                results.push(ToolExecution::error(
                    call.tool_call_id,
                    "Tool call was not run: the turn was interrupted",
                ));
                continue;
            }

            tracing::info!(tool = %call.tool_name, tool_call_id = %call.tool_call_id, "running tool");
            let tools = self.clone();
            let tool_call_id = call.tool_call_id.clone();
            let output = match tokio::task::spawn_blocking(move || tools.run_call(&call)).await {
                Ok(output) => output,
                Err(error) => ToolOutput::fail(format!("Tool execution panicked: {error}")),
            };
            if !output.ok {
                tracing::debug!(%tool_call_id, output = %output.content, "tool failed");
            }
            results.push(output.into_execution(tool_call_id));
        }
        results
    }
}

impl ToolCatalog for LocalTools {
    fn input_schema(&self, tool_name: &str) -> Option<Value> {
        tool_schema(tool_name)
    }

    fn tool_names(&self) -> Vec<String> {
        [BASH, READ, WRITE, EDIT].iter().map(ToString::to_string).collect()
    }
}

fn read_pipe_bytes(pipe: Option<impl Read>) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };

    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    bytes
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes.min(content.len());
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, String> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor
                .canonicalize()
                .map_err(|error| format!("Failed to resolve path {}: {error}", ancestor.display()));
        }
    }

    Err(format!("No existing ancestor found for path {}", path.display()))
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
