//! # Architecture Agent
//!
//! Phase 1. One invocation explores the repository and writes
//! `architecture_manifest.md`; the markdown is then parsed into an
//! [`ArchitectureManifest`] and mirrored as JSON.
//!
//! Unlike the per-component agents, failures here propagate: without a
//! manifest there is nothing to fan out over.

use chrono::Utc;
use std::path::Path;
use tokio::fs;

use super::prompts::{self, render};
use super::AgentContext;
use crate::cost::OP_ARCHITECTURE;
use crate::error::{ensure_repository, BuildError, Result};
use crate::invoker::{InvocationKind, InvocationRequest, InvocationTracker, PermissionMode, ANALYSIS_TOOLS};
use crate::manifest::{parse_manifest, ArchitectureManifest, MANIFEST_JSON, MANIFEST_MD};
use crate::state::io::{remove_stale, write_json};
use crate::swarm::events::Progress;

/// Warn once this share of the turn budget is used
const TURN_WARNING_RATIO: f64 = 0.95;
const CHECKPOINT_EVERY: u32 = 50;

pub struct ArchitectureAgent {
    ctx: AgentContext,
}

impl ArchitectureAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    /// Produce the manifest for `repo_path`, writing artifacts into `output_path`.
    ///
    /// Fails with [`BuildError::RepositoryValidation`] on a bad repository
    /// and [`BuildError::ManifestNotProduced`] if the agent never wrote the
    /// manifest file.
    #[tracing::instrument(skip(self, progress), fields(repo = %repo_path.display()))]
    pub async fn analyze(
        &self,
        repo_path: &Path,
        output_path: &Path,
        progress: &Progress,
        max_turns: u32,
    ) -> Result<ArchitectureManifest> {
        ensure_repository(repo_path)?;
        fs::create_dir_all(output_path).await?;
        let repo_path = fs::canonicalize(repo_path).await?;
        let output_path = fs::canonicalize(output_path).await?;

        // A manifest left by an earlier run must not count as this run's output
        let manifest_path = output_path.join(MANIFEST_MD);
        remove_stale(&manifest_path).await?;

        progress
            .info(format!("Analyzing architecture of {}", repo_path.display()))
            .await;

        let manifest_str = manifest_path.to_string_lossy();
        let system_prompt = render(prompts::ARCHITECTURE, &[("manifest_path", &*manifest_str)]);
        let prompt = format!(
            "Analyze the repository in the current directory and write the architecture manifest to {}.",
            manifest_str
        );
        let request = InvocationRequest::new("architecture", InvocationKind::Architecture)
            .with_prompts(system_prompt, prompt)
            .with_dirs(repo_path.clone(), output_path.clone())
            .with_tools(ANALYSIS_TOOLS, PermissionMode::BypassPermissions)
            .with_budget(max_turns, self.ctx.model());

        let mut tracker = InvocationTracker::new(max_turns, TURN_WARNING_RATIO, CHECKPOINT_EVERY);
        self.ctx
            .drive(request, &mut tracker, progress, OP_ARCHITECTURE, None)
            .await?;

        let content = match fs::read_to_string(&manifest_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let err = BuildError::ManifestNotProduced {
                    turn_count: tracker.turn_count(),
                    max_turns,
                    hit_turn_limit: tracker.near_limit(),
                };
                progress.error(err.to_string()).await;
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = parse_manifest(&content, Utc::now());
        write_json(&output_path.join(MANIFEST_JSON), &manifest).await?;

        tracing::info!(
            "Architecture manifest: {} components ({})",
            manifest.total_components,
            manifest.system_type
        );
        progress
            .info(format!(
                "Identified {} components in a {} system",
                manifest.total_components, manifest.system_type
            ))
            .await;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokerError;
    use crate::invoker::scripted::{write_text, ScriptedInvoker};
    use crate::invoker::AgentEvent;
    use crate::manifest::ArchitectureType;
    use crate::models::ClaudeModel;

    const MANIFEST: &str = "## System Type\nMonolith\n\n## Components\n\n### Component: api\n- **Type**: backend\n- **Path**: src/api\n\n### Component: web\n- **Type**: frontend\n- **Path**: web\n";

    fn agent(invoker: std::sync::Arc<ScriptedInvoker>) -> ArchitectureAgent {
        ArchitectureAgent::new(AgentContext::new(invoker, ClaudeModel::default()))
    }

    #[tokio::test]
    async fn test_analyze_parses_and_persists() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            Ok(vec![
                AgentEvent::text("Exploring"),
                write_text(&req.artifact_dir.join(MANIFEST_MD), MANIFEST),
            ])
        });

        let manifest = agent(invoker.clone())
            .analyze(repo.path(), out.path(), &Progress::silent(), 200)
            .await
            .unwrap();

        assert_eq!(manifest.system_type, ArchitectureType::Monolith);
        assert_eq!(manifest.total_components, 2);
        assert!(out.path().join(MANIFEST_JSON).exists());

        let request = &invoker.requests()[0];
        assert_eq!(request.permission_mode, PermissionMode::BypassPermissions);
        assert_eq!(request.max_turns, 200);
        assert!(request.system_prompt.contains(MANIFEST_MD));
    }

    #[tokio::test]
    async fn test_missing_manifest_reports_turn_limit() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| Ok(vec![AgentEvent::text("thinking"); 20]));

        let err = agent(invoker)
            .analyze(repo.path(), out.path(), &Progress::silent(), 20)
            .await
            .unwrap_err();

        match err {
            BuildError::ManifestNotProduced {
                turn_count,
                max_turns,
                hit_turn_limit,
            } => {
                assert_eq!((turn_count, max_turns), (20, 20));
                assert!(hit_turn_limit);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stale_manifest_is_not_reused() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join(MANIFEST_MD), MANIFEST).unwrap();
        let invoker = ScriptedInvoker::new(|_| Ok(vec![AgentEvent::text("done")]));

        let err = agent(invoker)
            .analyze(repo.path(), out.path(), &Progress::silent(), 200)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::ManifestNotProduced {
                hit_turn_limit: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_bad_repository_skips_invocation() {
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| Ok(vec![]));

        let err = agent(invoker.clone())
            .analyze(&out.path().join("missing"), out.path(), &Progress::silent(), 200)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::RepositoryValidation { .. }));
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn test_error_event_fails_analysis() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| {
            Ok(vec![AgentEvent::Error {
                message: "overloaded".into(),
            }])
        });

        let err = agent(invoker)
            .analyze(repo.path(), out.path(), &Progress::silent(), 200)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::AgentInvocation(InvokerError::Reported(_))
        ));
    }
}
