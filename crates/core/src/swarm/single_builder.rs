//! # Single-Phase Builder
//!
//! One agent writes the whole memory bank (FULL), or updates it from a
//! `git.diff` in the repository root (INCREMENTAL).
//!
//! Agent sessions sometimes end well before their turn budget with few or no
//! files written. The [`RestartController`] decides after every attempt
//! whether to stop, retry with a continuation prompt, or give up because the
//! last attempt made no progress. Running out of attempts is not an error:
//! whatever was written is returned.

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component as PathPart, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use super::builder::attach_cost_report;
use super::events::{rand_u32, Progress};
use crate::agents::prompts::{self, render};
use crate::agents::AgentContext;
use crate::cost::{CostCalculator, OP_MEMORY_BANK};
use crate::error::{ensure_repository, BuildError, Result};
use crate::invoker::{
    AgentInvoker, InvocationKind, InvocationRequest, InvocationTracker, ANALYSIS_TOOLS,
    FULL_BUILDER_TOOLS,
};
use crate::state::config::{BuildConfig, BuildMode, BuildResult};
use crate::state::io::{list_markdown_files, partition_by_size, write_json};

/// Files whose presence marks a usable memory bank
pub const CORE_FILES: &[&str] = &[
    "projectbrief.md",
    "productContext.md",
    "systemPatterns.md",
    "techContext.md",
];
/// Core files needed before the build counts as finished
pub const CORE_FILE_THRESHOLD: usize = 2;

pub const MEMORY_BANK_DIR: &str = "memory-bank";
pub const TASKS_DIR: &str = "tasks";
/// Presence of this file in the repository root switches to an incremental update
pub const GIT_DIFF_FILE: &str = "git.diff";
pub const GENERATION_SUMMARY_FILE: &str = "generation_summary.json";
pub const GRAPH_FILE: &str = "graph.json";

/// Longest backoff doubling applied between restarts
const MAX_BACKOFF_DOUBLINGS: u32 = 5;

/// What the single-phase build is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    FullBuild,
    IncrementalUpdate,
}

impl BuildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::FullBuild => "full_build",
            BuildKind::IncrementalUpdate => "incremental_update",
        }
    }
}

/// Verdict after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Enough core files exist
    Done,
    /// Nothing new was written since the previous attempt
    Stalled,
    /// Try again with a continuation prompt
    Retry,
    /// Attempt budget spent
    Exhausted,
}

/// Restart bookkeeping across attempts
#[derive(Debug, Clone)]
pub struct RestartController {
    max_attempts: u32,
    stall_detection: bool,
    backoff_ms: u64,
    attempt: u32,
    previous_total: Option<usize>,
}

impl RestartController {
    pub fn new(max_attempts: u32, stall_detection: bool, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            stall_detection,
            backoff_ms,
            attempt: 0,
            previous_total: None,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        let max_attempts = if config.auto_restart_on_early_termination {
            config.max_restart_attempts.saturating_add(1)
        } else {
            1
        };
        Self::new(
            max_attempts,
            config.stall_detection_enabled(),
            config.restart_backoff_ms,
        )
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Start the next attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Judge the attempt that just finished.
    ///
    /// `written` counts this attempt's writes, `total` the distinct files
    /// written across all attempts so far.
    pub fn decide(&mut self, written: usize, total: usize, core_files_present: usize) -> RestartDecision {
        if core_files_present >= CORE_FILE_THRESHOLD {
            return RestartDecision::Done;
        }
        if self.stall_detection && written == 0 && self.previous_total == Some(total) {
            return RestartDecision::Stalled;
        }
        self.previous_total = Some(total);
        if self.attempt >= self.max_attempts {
            RestartDecision::Exhausted
        } else {
            RestartDecision::Retry
        }
    }

    /// Delay before the next attempt: doubling per attempt plus up to 50% jitter
    pub fn backoff(&self) -> Option<Duration> {
        if self.backoff_ms == 0 {
            return None;
        }
        let doublings = self.attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        let base = self.backoff_ms.saturating_mul(1 << doublings);
        let jitter = rand_u32() as u64 % (base / 2 + 1);
        Some(Duration::from_millis(base + jitter))
    }
}

/// Continuation prompt listing what earlier attempts produced
pub fn continuation_prompt(task: &str, memory_bank_dir: &Path, existing: &[PathBuf]) -> String {
    let listing = if existing.is_empty() {
        "(none yet)".to_string()
    } else {
        existing
            .iter()
            .map(|p| format!("- {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let dir = memory_bank_dir.to_string_lossy();
    let note = render(
        prompts::CONTINUATION,
        &[("memory_bank_dir", &*dir), ("existing_files", listing.as_str())],
    );
    format!("{}\n\n{}", task, note)
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// Memory bank files and the markdown links between them
#[derive(Debug, Clone, Serialize)]
pub struct MemoryBankGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `target` relative to the directory of `from`, both relative to the bank root
fn resolve_link(from: &Path, target: &str) -> Option<String> {
    let mut parts: Vec<String> = from
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    for part in Path::new(target).components() {
        match part {
            PathPart::CurDir => {}
            PathPart::ParentDir => {
                parts.pop()?;
            }
            PathPart::Normal(name) => parts.push(name.to_string_lossy().to_string()),
            PathPart::RootDir | PathPart::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\]\(([^)\s#]+\.md)(?:#[^)]*)?\)").expect("link pattern"));

/// Scan `memory_bank_dir` for markdown files and the links between them
pub fn build_graph(memory_bank_dir: &Path) -> MemoryBankGraph {
    let files = list_markdown_files(memory_bank_dir);
    let ids: BTreeSet<String> = files.iter().map(|f| slash_path(f)).collect();

    let mut nodes = Vec::with_capacity(files.len());
    let mut edges = Vec::new();
    for file in &files {
        let id = slash_path(file);
        let full = memory_bank_dir.join(file);
        let content = std::fs::read_to_string(&full).unwrap_or_default();

        let mut targets = BTreeSet::new();
        for caps in MARKDOWN_LINK.captures_iter(&content) {
            if let Some(target) = resolve_link(file, &caps[1]) {
                if target != id && ids.contains(&target) {
                    targets.insert(target);
                }
            }
        }
        edges.extend(targets.into_iter().map(|target| GraphEdge {
            source: id.clone(),
            target,
        }));

        nodes.push(GraphNode {
            label: file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| id.clone()),
            size_bytes: content.len() as u64,
            id,
        });
    }

    MemoryBankGraph {
        nodes,
        edges,
        metadata: BTreeMap::new(),
    }
}

/// Load the system prompt, falling back to the bundled default
async fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return prompts::MEMORY_BANK.to_string();
    };
    match tokio::fs::read_to_string(path).await {
        Ok(prompt) => prompt,
        Err(e) => {
            tracing::warn!("System prompt {:?} not readable ({}), using default", path, e);
            prompts::MEMORY_BANK.to_string()
        }
    }
}

/// Writes a memory bank with one restartable agent
pub struct SinglePhaseBuilder {
    invoker: Arc<dyn AgentInvoker>,
}

struct AttemptsOutcome {
    files: Vec<String>,
    attempts: u32,
    decision: RestartDecision,
    core_files_present: usize,
}

impl SinglePhaseBuilder {
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Build or update a memory bank. Never fails; errors land in `BuildResult::errors`.
    #[tracing::instrument(skip_all, fields(repo = ?config.repo_path, mode = %config.mode))]
    pub async fn build_memory_bank(&self, config: &BuildConfig, progress: &Progress) -> BuildResult {
        let cost = Arc::new(CostCalculator::new(config.model));
        let mut result = match self.run(config, progress, &cost).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Error during memory bank generation: {}", e);
                progress.error(format!("Error: {}", e)).await;
                BuildResult::failure(config.output_path.clone(), &e)
            }
        };
        attach_cost_report(&mut result, &cost).await;
        result
    }

    async fn run(
        &self,
        config: &BuildConfig,
        progress: &Progress,
        cost: &Arc<CostCalculator>,
    ) -> Result<BuildResult> {
        config.validate()?;
        ensure_repository(&config.repo_path)?;
        let repo_path = tokio::fs::canonicalize(&config.repo_path).await?;
        tokio::fs::create_dir_all(config.output_path.join(MEMORY_BANK_DIR).join(TASKS_DIR)).await?;
        let output_path = tokio::fs::canonicalize(&config.output_path).await?;
        let memory_bank_dir = output_path.join(MEMORY_BANK_DIR);

        progress
            .info("Directories created, loading system prompt...")
            .await;
        let system_prompt = load_system_prompt(config.system_prompt_path.as_deref()).await;

        let (kind, task) = self.task_prompt(config, &repo_path, &memory_bank_dir).await?;
        progress.info(format!("Starting {}", kind.as_str())).await;

        let ctx = AgentContext::new(Arc::clone(&self.invoker), config.model)
            .with_cost(Arc::clone(cost));
        let started_at = Utc::now();
        let outcome = self
            .run_attempts(&ctx, config, progress, &system_prompt, &task, &repo_path, &memory_bank_dir)
            .await?;

        match outcome.decision {
            RestartDecision::Done => {
                progress.info("Memory bank building completed successfully!").await
            }
            RestartDecision::Stalled => {
                progress
                    .warn(format!(
                        "No progress on attempt {}, keeping {} files",
                        outcome.attempts,
                        outcome.files.len()
                    ))
                    .await
            }
            RestartDecision::Exhausted | RestartDecision::Retry => {
                progress
                    .warn(format!(
                        "Stopped after {} attempts with {}/{} core files",
                        outcome.attempts, outcome.core_files_present, CORE_FILE_THRESHOLD
                    ))
                    .await
            }
        }

        let graph_path = output_path.join(GRAPH_FILE);
        let mut graph = build_graph(&memory_bank_dir);
        graph.metadata.insert("version".into(), "1.0.0".into());
        graph.metadata.insert("created_at".into(), Utc::now().to_rfc3339().into());
        graph
            .metadata
            .insert("source_path".into(), repo_path.display().to_string().into());
        graph
            .metadata
            .insert("files_written".into(), outcome.files.clone().into());
        write_json(&graph_path, &graph).await?;

        let summary_path = output_path.join(GENERATION_SUMMARY_FILE);
        let stalled = outcome.decision == RestartDecision::Stalled;
        let summary = serde_json::json!({
            "started_at": started_at.to_rfc3339(),
            "generated_at": Utc::now().to_rfc3339(),
            "repo_path": repo_path,
            "files_written": outcome.files,
            "method": format!("single_phase_{}", kind.as_str()),
            "attempts": outcome.attempts,
            "stalled": stalled,
            "core_files_present": outcome.core_files_present,
        });
        write_json(&summary_path, &summary).await?;

        let mut files_written: Vec<PathBuf> = outcome.files.iter().map(PathBuf::from).collect();
        files_written.push(graph_path);
        files_written.push(summary_path);

        let mut result = BuildResult {
            success: true,
            output_path,
            files_written,
            ..BuildResult::default()
        };
        result.set_meta("mode", kind.as_str());
        result.set_meta("repo_path", repo_path.display().to_string());
        result.set_meta("generated_at", Utc::now().to_rfc3339());
        result.set_meta("attempts", outcome.attempts);
        result.set_meta("stalled", stalled);
        result.set_meta("core_files_present", outcome.core_files_present);
        Ok(result)
    }

    async fn task_prompt(
        &self,
        config: &BuildConfig,
        repo_path: &Path,
        memory_bank_dir: &Path,
    ) -> Result<(BuildKind, String)> {
        let dir = memory_bank_dir.to_string_lossy();
        match tokio::fs::read_to_string(repo_path.join(GIT_DIFF_FILE)).await {
            Ok(diff) => {
                let timestamp = Utc::now().format("%Y-%m-%d %H:%M").to_string();
                let prompt = render(
                    prompts::INCREMENTAL_UPDATE,
                    &[
                        ("memory_bank_dir", &*dir),
                        ("git_diff", diff.as_str()),
                        ("timestamp", timestamp.as_str()),
                    ],
                );
                Ok((BuildKind::IncrementalUpdate, prompt))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if config.mode == BuildMode::Incremental {
                    tracing::warn!("Incremental mode without {}, running a full build", GIT_DIFF_FILE);
                }
                let prompt = render(prompts::FULL_BUILD, &[("memory_bank_dir", &*dir)]);
                Ok((BuildKind::FullBuild, prompt))
            }
            Err(e) => Err(BuildError::Io(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempts(
        &self,
        ctx: &AgentContext,
        config: &BuildConfig,
        progress: &Progress,
        system_prompt: &str,
        task: &str,
        repo_path: &Path,
        memory_bank_dir: &Path,
    ) -> Result<AttemptsOutcome> {
        let mut controller = RestartController::from_config(config);
        let tools = if config.use_minimal_tools {
            ANALYSIS_TOOLS
        } else {
            FULL_BUILDER_TOOLS
        };

        let mut files: Vec<String> = Vec::new();
        let mut prompt = task.to_string();
        let mut last_error: Option<BuildError> = None;

        loop {
            let attempt = controller.begin_attempt();
            if attempt > 1 {
                progress
                    .info(format!(
                        "Restarting (attempt {}/{})",
                        attempt,
                        controller.max_attempts()
                    ))
                    .await;
            }

            let request = InvocationRequest::new("memory-bank", InvocationKind::MemoryBank)
                .with_prompts(system_prompt.to_string(), prompt.clone())
                .with_dirs(repo_path.to_path_buf(), memory_bank_dir.to_path_buf())
                .with_tools(tools, config.permission_mode)
                .with_budget(config.max_turns, config.model);
            let mut tracker = InvocationTracker::new(config.max_turns, 0.9, 25);

            match ctx
                .drive(request, &mut tracker, progress, OP_MEMORY_BANK, None)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    progress
                        .warn(format!("Attempt {} ended with an error: {}", attempt, e))
                        .await;
                    last_error = Some(e);
                }
            }

            let written = tracker.written().len();
            for path in tracker.written() {
                if !files.contains(path) {
                    files.push(path.clone());
                }
            }
            let (core, _) = partition_by_size(memory_bank_dir, CORE_FILES, 0).await;

            progress
                .info(format!(
                    "Attempt {}: {} files written in {} turns, {}/{} core files present",
                    attempt,
                    written,
                    tracker.turn_count(),
                    core.len(),
                    CORE_FILES.len()
                ))
                .await;

            let decision = controller.decide(written, files.len(), core.len());
            match decision {
                RestartDecision::Retry => {
                    if let Some(delay) = controller.backoff() {
                        tracing::debug!("Waiting {:?} before restarting", delay);
                        tokio::time::sleep(delay).await;
                    }
                    prompt = continuation_prompt(task, memory_bank_dir, &list_markdown_files(memory_bank_dir));
                }
                done => {
                    if files.is_empty() {
                        if let Some(e) = last_error {
                            return Err(e);
                        }
                    }
                    return Ok(AttemptsOutcome {
                        files,
                        attempts: attempt,
                        decision: done,
                        core_files_present: core.len(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokerError;
    use crate::invoker::scripted::{write_file, write_text, ScriptedInvoker};
    use crate::invoker::AgentEvent;
    use pretty_assertions::assert_eq;

    fn config(repo: &Path, out: &Path) -> BuildConfig {
        BuildConfig::new(repo, out)
            .with_mode(BuildMode::Full)
            .with_max_turns(30)
    }

    #[test]
    fn test_controller_stops_on_core_files() {
        let mut controller = RestartController::new(4, true, 0);
        controller.begin_attempt();
        assert_eq!(controller.decide(3, 3, 2), RestartDecision::Done);
    }

    #[test]
    fn test_controller_stall_needs_previous_attempt() {
        let mut controller = RestartController::new(4, true, 0);
        controller.begin_attempt();
        assert_eq!(controller.decide(0, 0, 0), RestartDecision::Retry);
        controller.begin_attempt();
        assert_eq!(controller.decide(0, 0, 0), RestartDecision::Stalled);
    }

    #[test]
    fn test_controller_without_stall_detection_exhausts() {
        let mut controller = RestartController::new(3, false, 0);
        let decisions: Vec<_> = (0..3)
            .map(|_| {
                controller.begin_attempt();
                controller.decide(0, 0, 0)
            })
            .collect();
        assert_eq!(
            decisions,
            vec![
                RestartDecision::Retry,
                RestartDecision::Retry,
                RestartDecision::Exhausted
            ]
        );
    }

    #[test]
    fn test_controller_from_config() {
        let mut config = BuildConfig::default().with_mode(BuildMode::Full);
        assert_eq!(RestartController::from_config(&config).max_attempts(), 4);
        config.auto_restart_on_early_termination = false;
        assert_eq!(RestartController::from_config(&config).max_attempts(), 1);
    }

    #[test]
    fn test_backoff_grows_with_jitter_bound() {
        let mut controller = RestartController::new(4, true, 100);
        controller.begin_attempt();
        let first = controller.backoff().unwrap();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        controller.begin_attempt();
        let second = controller.backoff().unwrap();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(300));

        assert!(RestartController::new(4, true, 0).backoff().is_none());
    }

    #[test]
    fn test_continuation_lists_existing_files() {
        let prompt = continuation_prompt(
            "Write the bank",
            Path::new("/out/memory-bank"),
            &[PathBuf::from("projectbrief.md"), PathBuf::from("tasks/_index.md")],
        );
        assert!(prompt.starts_with("Write the bank"));
        assert!(prompt.contains("- projectbrief.md\n- tasks/_index.md"));
        assert!(prompt.contains("/out/memory-bank"));
    }

    #[test]
    fn test_graph_links() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tasks")).unwrap();
        std::fs::write(
            dir.path().join("projectbrief.md"),
            "See [patterns](systemPatterns.md) and [web](https://example.com/x.md).",
        )
        .unwrap();
        std::fs::write(dir.path().join("systemPatterns.md"), "# Patterns").unwrap();
        std::fs::write(
            dir.path().join("tasks/_index.md"),
            "[brief](../projectbrief.md#goals) [gone](missing.md)",
        )
        .unwrap();

        let graph = build_graph(dir.path());
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["projectbrief.md", "systemPatterns.md", "tasks/_index.md"]);
        assert_eq!(
            graph.edges,
            vec![
                GraphEdge {
                    source: "projectbrief.md".into(),
                    target: "systemPatterns.md".into(),
                },
                GraphEdge {
                    source: "tasks/_index.md".into(),
                    target: "projectbrief.md".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_full_build_finishes_on_first_attempt() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            Ok(CORE_FILES
                .iter()
                .map(|f| write_file(&req.artifact_dir.join(f), 50))
                .collect())
        });

        let result = SinglePhaseBuilder::new(invoker.clone())
            .build_memory_bank(&config(repo.path(), out.path()), &Progress::silent())
            .await;

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(invoker.calls(), 1);
        assert_eq!(result.metadata["mode"], "full_build");
        assert_eq!(result.metadata["attempts"], 1);
        assert!(out.path().join(MEMORY_BANK_DIR).join(TASKS_DIR).is_dir());
        assert!(out.path().join(GRAPH_FILE).exists());
        assert!(out.path().join(GENERATION_SUMMARY_FILE).exists());

        let request = &invoker.requests()[0];
        assert!(request.allowed_tools.contains(&"MultiEdit".to_string()));
        assert!(request.prompt.contains("tasks/_index.md"));
    }

    #[tokio::test]
    async fn test_restart_continues_from_existing_files() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            let file = if req.prompt.contains("CONTINUATION") {
                "productContext.md"
            } else {
                "projectbrief.md"
            };
            Ok(vec![write_file(&req.artifact_dir.join(file), 200)])
        });

        let result = SinglePhaseBuilder::new(invoker.clone())
            .build_memory_bank(&config(repo.path(), out.path()), &Progress::silent())
            .await;

        assert!(result.success);
        assert_eq!(invoker.calls(), 2);
        assert_eq!(result.metadata["core_files_present"], 2);
        assert!(invoker.requests()[1].prompt.contains("- projectbrief.md"));
    }

    #[tokio::test]
    async fn test_stall_stops_after_two_attempts() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| Ok(vec![AgentEvent::text("thinking")]));
        let mut config = config(repo.path(), out.path());
        config.max_restart_attempts = 10;

        let result = SinglePhaseBuilder::new(invoker.clone())
            .build_memory_bank(&config, &Progress::silent())
            .await;

        assert!(result.success);
        assert_eq!(invoker.calls(), 2);
        assert_eq!(result.metadata["stalled"], true);
    }

    #[tokio::test]
    async fn test_incremental_uses_diff() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join(GIT_DIFF_FILE), "+fn added() {}").unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            Ok(vec![write_text(
                &req.artifact_dir.join("changelog.md"),
                "## Update",
            )])
        });
        let mut config = config(repo.path(), out.path()).with_mode(BuildMode::Incremental);
        config.max_restart_attempts = 2;

        let result = SinglePhaseBuilder::new(invoker.clone())
            .build_memory_bank(&config, &Progress::silent())
            .await;

        // Core files never appear, so every attempt runs
        assert!(result.success);
        assert_eq!(result.metadata["mode"], "incremental_update");
        assert_eq!(invoker.calls(), 3);
        assert!(invoker.requests()[0].prompt.contains("+fn added() {}"));
    }

    #[tokio::test]
    async fn test_errors_without_output_fail_the_build() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| Err(InvokerError::Unavailable("no claude".into())));

        let result = SinglePhaseBuilder::new(invoker.clone())
            .build_memory_bank(&config(repo.path(), out.path()), &Progress::silent())
            .await;

        assert!(!result.success);
        assert_eq!(invoker.calls(), 1);
        assert!(result.errors[0].contains("no claude"));
    }
}
