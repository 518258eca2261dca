//! # Component Agent
//!
//! Phase 2 unit of work: one invocation documents one component into
//! `{output}/components/{slug}/memory-bank/`. Agent failures never
//! escape; they come back as a failed [`ComponentAnalysisResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::prompts::{self, render};
use super::{component_working_dir, AgentContext, UnitOutcome};
use crate::cost::OP_COMPONENT;
use crate::error::Result;
use crate::invoker::{InvocationKind, InvocationRequest, InvocationTracker, PermissionMode, ANALYSIS_TOOLS};
use crate::manifest::{Component, ComponentType};
use crate::state::config::DEFAULT_MIN_FILE_BYTES;
use crate::state::io::{partition_by_size, remove_stale};
use crate::swarm::events::Progress;

/// Files every component memory bank must contain
pub const EXPECTED_COMPONENT_FILES: [&str; 6] = [
    "projectbrief.md",
    "techContext.md",
    "systemPatterns.md",
    "activeContext.md",
    "progress.md",
    "api_contracts.md",
];

const TURN_WARNING_RATIO: f64 = 0.9;
const CHECKPOINT_EVERY: u32 = 25;

/// Where a component's memory bank lives under the build output
pub fn component_memory_bank_dir(output_base: &Path, component: &Component) -> PathBuf {
    output_base
        .join("components")
        .join(component.slug())
        .join("memory-bank")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRunMetadata {
    pub turn_count: u32,
    pub max_turns: u32,
    pub created_files: Vec<String>,
    pub missing_files: Vec<String>,
    pub component_type: ComponentType,
    pub component_path: String,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at_turn: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of documenting one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentAnalysisResult {
    pub component_name: String,
    /// True iff every expected file exists and is above the size gate
    pub success: bool,
    pub output_path: PathBuf,
    /// Paths the agent's `Write` calls targeted
    pub files_written: Vec<String>,
    pub analysis_metadata: ComponentRunMetadata,
    pub errors: Vec<String>,
}

impl ComponentAnalysisResult {
    /// A failed result for `component` that never produced output
    pub fn failed(
        component: &Component,
        output_path: PathBuf,
        max_turns: u32,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            component_name: component.name.clone(),
            success: false,
            output_path,
            files_written: Vec::new(),
            analysis_metadata: ComponentRunMetadata {
                turn_count: 0,
                max_turns,
                created_files: Vec::new(),
                missing_files: EXPECTED_COMPONENT_FILES.iter().map(|f| f.to_string()).collect(),
                component_type: component.component_type,
                component_path: component.path.clone(),
                completed_at: Utc::now(),
                error_at_turn: None,
                error: Some(error.clone()),
            },
            errors: vec![error],
        }
    }
}

pub struct ComponentAgent {
    ctx: AgentContext,
    min_file_bytes: u64,
}

impl ComponentAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            min_file_bytes: DEFAULT_MIN_FILE_BYTES,
        }
    }

    /// Files at or below `bytes` count as missing
    pub fn with_min_file_bytes(mut self, bytes: u64) -> Self {
        self.min_file_bytes = bytes;
        self
    }

    /// Document `component`. Never fails; errors land in the result.
    pub async fn analyze_component(
        &self,
        component: &Component,
        repo_path: &Path,
        output_base: &Path,
        architecture_summary: &str,
        progress: &Progress,
        max_turns: u32,
    ) -> ComponentAnalysisResult {
        self.analyze_checked(
            component,
            repo_path,
            output_base,
            architecture_summary,
            progress,
            max_turns,
        )
        .await
        .result
    }

    /// Like [`analyze_component`](Self::analyze_component), also reporting
    /// whether a failure came from an unusable backend.
    #[tracing::instrument(skip_all, fields(component = %component.name))]
    pub async fn analyze_checked(
        &self,
        component: &Component,
        repo_path: &Path,
        output_base: &Path,
        architecture_summary: &str,
        progress: &Progress,
        max_turns: u32,
    ) -> UnitOutcome<ComponentAnalysisResult> {
        let output_path = component_memory_bank_dir(output_base, component);
        let mut tracker = InvocationTracker::new(max_turns, TURN_WARNING_RATIO, CHECKPOINT_EVERY);

        let run = self.run(
            component,
            repo_path,
            &output_path,
            architecture_summary,
            progress,
            &mut tracker,
        );
        match run.await {
            Ok(result) => UnitOutcome::ok(result),
            Err(e) => {
                tracing::warn!("Component {} failed: {}", component.name, e);
                progress
                    .error(format!("Analysis of {} failed: {}", component.name, e))
                    .await;
                let mut result =
                    ComponentAnalysisResult::failed(component, output_path, max_turns, e.to_string());
                result.files_written = tracker.written().to_vec();
                result.analysis_metadata.turn_count = tracker.turn_count();
                result.analysis_metadata.error_at_turn = Some(tracker.turn_count());
                UnitOutcome {
                    result,
                    fatal: e.is_fatal(),
                }
            }
        }
    }

    async fn run(
        &self,
        component: &Component,
        repo_path: &Path,
        output_path: &Path,
        architecture_summary: &str,
        progress: &Progress,
        tracker: &mut InvocationTracker,
    ) -> Result<ComponentAnalysisResult> {
        fs::create_dir_all(output_path).await?;
        let output_path = fs::canonicalize(output_path).await?;
        for file in EXPECTED_COMPONENT_FILES {
            remove_stale(&output_path.join(file)).await?;
        }

        let working_dir = component_working_dir(component, repo_path);

        progress
            .info(format!("Analyzing {} ({})", component.name, component.path))
            .await;

        let dependencies = if component.dependencies.is_empty() {
            "none".to_string()
        } else {
            component.dependencies.join(", ")
        };
        let output_str = output_path.to_string_lossy();
        let system_prompt = render(
            prompts::COMPONENT,
            &[
                ("component_name", component.name.as_str()),
                ("component_path", component.path.as_str()),
                ("component_type", component.component_type.as_str()),
                ("technology", component.technology.as_str()),
                ("description", component.description.as_str()),
                ("dependencies", dependencies.as_str()),
                ("architecture_summary", architecture_summary),
                ("output_dir", &*output_str),
            ],
        );
        let prompt = format!(
            "Document the {} component and write its memory bank files to {}.",
            component.name, output_str
        );

        let max_turns = tracker.max_turns();
        let request = InvocationRequest::new(component.name.as_str(), InvocationKind::Component)
            .with_prompts(system_prompt, prompt)
            .with_dirs(working_dir, output_path.clone())
            .with_tools(ANALYSIS_TOOLS, PermissionMode::BypassPermissions)
            .with_budget(max_turns, self.ctx.model());

        self.ctx
            .drive(request, tracker, progress, OP_COMPONENT, Some(component.name.as_str()))
            .await?;

        let (created_files, missing_files) =
            partition_by_size(&output_path, &EXPECTED_COMPONENT_FILES, self.min_file_bytes).await;
        let success = missing_files.is_empty();

        if success {
            progress
                .info(format!(
                    "{} documented in {} turns",
                    component.name,
                    tracker.turn_count()
                ))
                .await;
        } else {
            progress
                .warn(format!(
                    "{} is missing {}",
                    component.name,
                    missing_files.join(", ")
                ))
                .await;
        }

        Ok(ComponentAnalysisResult {
            component_name: component.name.clone(),
            success,
            output_path,
            files_written: tracker.written().to_vec(),
            analysis_metadata: ComponentRunMetadata {
                turn_count: tracker.turn_count(),
                max_turns,
                created_files,
                missing_files,
                component_type: component.component_type,
                component_path: component.path.clone(),
                completed_at: Utc::now(),
                error_at_turn: None,
                error: None,
            },
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokerError;
    use crate::invoker::scripted::{write_file, ScriptedInvoker};
    use crate::invoker::AgentEvent;
    use crate::models::ClaudeModel;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn agent(invoker: Arc<ScriptedInvoker>) -> ComponentAgent {
        ComponentAgent::new(AgentContext::new(invoker, ClaudeModel::default()))
    }

    fn writes_all(req: &InvocationRequest) -> Vec<AgentEvent> {
        EXPECTED_COMPONENT_FILES
            .iter()
            .map(|f| write_file(&req.artifact_dir.join(f), 400))
            .collect()
    }

    #[tokio::test]
    async fn test_all_files_written() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("services/auth")).unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| Ok(writes_all(req)));
        let component = Component::new("auth service").with_path("services/auth");

        let result = agent(invoker.clone())
            .analyze_component(&component, repo.path(), out.path(), "", &Progress::silent(), 150)
            .await;

        assert!(result.success);
        assert_eq!(result.files_written.len(), 6);
        assert_eq!(result.analysis_metadata.created_files.len(), 6);
        assert!(result
            .output_path
            .ends_with("components/auth-service/memory-bank"));

        let request = &invoker.requests()[0];
        assert!(request.working_directory.ends_with("services/auth"));
        assert_eq!(request.kind, InvocationKind::Component);
    }

    #[tokio::test]
    async fn test_stub_files_count_as_missing() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            let mut events = writes_all(req);
            events.push(write_file(&req.artifact_dir.join("progress.md"), 12));
            Ok(events)
        });

        let result = agent(invoker)
            .analyze_component(&Component::new("api"), repo.path(), out.path(), "", &Progress::silent(), 150)
            .await;

        assert!(!result.success);
        assert_eq!(result.analysis_metadata.missing_files, vec!["progress.md"]);
    }

    #[tokio::test]
    async fn test_previous_run_files_do_not_count() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let component = Component::new("api");
        let dir = component_memory_bank_dir(out.path(), &component);
        std::fs::create_dir_all(&dir).unwrap();
        for file in EXPECTED_COMPONENT_FILES {
            std::fs::write(dir.join(file), "x".repeat(500)).unwrap();
        }
        let invoker = ScriptedInvoker::new(|_| Ok(vec![AgentEvent::text("done")]));

        let result = agent(invoker)
            .analyze_component(&component, repo.path(), out.path(), "", &Progress::silent(), 150)
            .await;

        assert!(!result.success);
        assert!(result.files_written.is_empty());
        assert_eq!(result.analysis_metadata.missing_files.len(), 6);
        assert!(!dir.join("progress.md").exists());
    }

    #[tokio::test]
    async fn test_invoker_failure_becomes_result() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| Err(InvokerError::Unavailable("no claude".into())));

        let outcome = agent(invoker)
            .analyze_checked(&Component::new("api"), repo.path(), out.path(), "", &Progress::silent(), 150)
            .await;

        assert!(outcome.fatal);
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.component_name, "api");
        assert!(outcome.result.errors[0].contains("no claude"));
        assert_eq!(outcome.result.analysis_metadata.error_at_turn, Some(0));
    }

    #[tokio::test]
    async fn test_error_mid_stream_records_turn() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| {
            Ok(vec![
                AgentEvent::text("a"),
                AgentEvent::text("b"),
                AgentEvent::Error {
                    message: "context overflow".into(),
                },
                AgentEvent::text("never seen"),
            ])
        });

        let outcome = agent(invoker)
            .analyze_checked(&Component::new("api"), repo.path(), out.path(), "", &Progress::silent(), 150)
            .await;

        assert!(!outcome.fatal);
        assert_eq!(outcome.result.analysis_metadata.error_at_turn, Some(3));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_success_iff_nothing_missing(sizes in proptest::collection::vec(proptest::option::of(0usize..300), 6)) {
            let repo = tempfile::tempdir().unwrap();
            let out = tempfile::tempdir().unwrap();
            let plan = sizes.clone();
            let invoker = ScriptedInvoker::new(move |req| {
                Ok(EXPECTED_COMPONENT_FILES
                    .iter()
                    .zip(&plan)
                    .filter_map(|(name, size)| size.map(|s| write_file(&req.artifact_dir.join(name), s)))
                    .collect())
            });

            let result = tokio_test::block_on(agent(invoker).analyze_component(
                &Component::new("unit"),
                repo.path(),
                out.path(),
                "",
                &Progress::silent(),
                50,
            ));

            let expected_missing: Vec<String> = EXPECTED_COMPONENT_FILES
                .iter()
                .zip(&sizes)
                .filter(|(_, size)| !matches!(size, Some(s) if *s > 100))
                .map(|(name, _)| name.to_string())
                .collect();
            prop_assert_eq!(&result.analysis_metadata.missing_files, &expected_missing);
            prop_assert_eq!(result.success, expected_missing.is_empty());
        }
    }
}
