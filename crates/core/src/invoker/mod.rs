//! # Agent Invoker
//!
//! The seam between the orchestration core and whatever actually runs an
//! agent conversation. A backend receives an [`InvocationRequest`] and
//! returns a stream of [`AgentEvent`]s; the core only looks at `Write`
//! tool invocations (to track artifacts) and at the number of events
//! (as a turn proxy).
//!
//! ## Backends
//!
//! - [`ClaudeCliInvoker`] - spawns the `claude` CLI in stream-json mode
//! - [`OfflineInvoker`] - deterministic local backend for dry runs

pub mod claude_cli;
pub mod offline;
#[cfg(test)]
pub(crate) mod scripted;
pub mod tracker;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::InvokerError;
use crate::models::ClaudeModel;

pub use claude_cli::ClaudeCliInvoker;
pub use offline::OfflineInvoker;
pub use tracker::{InvocationTracker, TrackerSignal, UsageTotals};

/// Name of the tool whose invocations mark written artifacts
pub const WRITE_TOOL: &str = "Write";

/// One event on an agent's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant text
    TextChunk { text: String },
    /// The agent called a tool
    ToolInvocation {
        name: String,
        input: serde_json::Value,
    },
    /// The agent or its backend reported an error
    Error { message: String },
    /// Token accounting, not a conversational turn
    Usage { input_tokens: u64, output_tokens: u64 },
}

impl AgentEvent {
    pub fn text(text: impl Into<String>) -> Self {
        AgentEvent::TextChunk { text: text.into() }
    }

    /// A `Write` tool invocation targeting `path`
    pub fn write(path: impl Into<String>) -> Self {
        AgentEvent::ToolInvocation {
            name: WRITE_TOOL.to_string(),
            input: serde_json::json!({ "file_path": path.into() }),
        }
    }

    /// Target path if this is a `Write` tool invocation
    pub fn written_path(&self) -> Option<&str> {
        match self {
            AgentEvent::ToolInvocation { name, input } if name == WRITE_TOOL => {
                input.get("file_path").and_then(|p| p.as_str())
            }
            _ => None,
        }
    }

    /// Whether this event counts toward the turn budget
    pub fn is_turn(&self) -> bool {
        !matches!(self, AgentEvent::Usage { .. })
    }
}

/// Stream returned by an invoker
pub type EventStream = BoxStream<'static, AgentEvent>;

/// What kind of unit an invocation serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Architecture,
    Component,
    Validation,
    MemoryBank,
}

/// Tool permission policy handed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Default,
    #[default]
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    /// Spelling used by the claude CLI
    pub fn cli_name(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

/// Read-only exploration tools plus `Write`
pub const ANALYSIS_TOOLS: &[&str] = &["Read", "Glob", "LS", "Grep", "Write"];

/// Analysis tools plus in-place editing
pub const VALIDATION_TOOLS: &[&str] = &["Read", "Glob", "LS", "Grep", "Write", "Edit"];

/// Tool set for the single-phase builder when minimal tools are not requested
pub const FULL_BUILDER_TOOLS: &[&str] = &["Read", "Glob", "LS", "Grep", "Write", "Edit", "MultiEdit"];

pub fn tool_list(tools: &[&str]) -> Vec<String> {
    tools.iter().map(|t| t.to_string()).collect()
}

/// A single agent invocation
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRequest {
    /// Human-readable unit label (component name, "architecture", ...)
    pub label: String,
    pub kind: InvocationKind,
    pub prompt: String,
    pub system_prompt: String,
    /// Directory the agent runs in
    pub working_directory: PathBuf,
    /// Directory the agent is expected to write into
    pub artifact_dir: PathBuf,
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    pub max_turns: u32,
    pub model: ClaudeModel,
}

impl InvocationRequest {
    pub fn new(label: impl Into<String>, kind: InvocationKind) -> Self {
        Self {
            label: label.into(),
            kind,
            prompt: String::new(),
            system_prompt: String::new(),
            working_directory: PathBuf::from("."),
            artifact_dir: PathBuf::from("."),
            allowed_tools: tool_list(ANALYSIS_TOOLS),
            permission_mode: PermissionMode::default(),
            max_turns: 100,
            model: ClaudeModel::default(),
        }
    }

    pub fn with_prompts(mut self, system_prompt: String, prompt: String) -> Self {
        self.system_prompt = system_prompt;
        self.prompt = prompt;
        self
    }

    pub fn with_dirs(mut self, working_directory: PathBuf, artifact_dir: PathBuf) -> Self {
        self.working_directory = working_directory;
        self.artifact_dir = artifact_dir;
        self
    }

    pub fn with_tools(mut self, tools: &[&str], permission_mode: PermissionMode) -> Self {
        self.allowed_tools = tool_list(tools);
        self.permission_mode = permission_mode;
        self
    }

    pub fn with_budget(mut self, max_turns: u32, model: ClaudeModel) -> Self {
        self.max_turns = max_turns;
        self.model = model;
        self
    }
}

/// Runs agent conversations.
///
/// Implementations must be shareable across concurrently running units.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, InvokerError>;
}
