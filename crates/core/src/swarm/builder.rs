//! # Multi-Agent Builder
//!
//! Root of the three-phase build. Drives the [`Pipeline`] through
//! architecture analysis, the component fan-out and the validation fan-out,
//! and folds every phase's metadata into one flat [`BuildResult`].
//!
//! An architecture failure aborts the build because there is nothing to
//! fan out over. Any error is converted into a failed result; callers always
//! receive a terminal [`BuildResult`].

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use super::events::Progress;
use super::orchestrator::{OrchestrationAgent, OrchestrationResult, COMPONENT_SUMMARY_FILE};
use super::pipeline::Pipeline;
use super::validation_orchestrator::{
    ValidationOrchestrationResult, ValidationOrchestrator, VALIDATION_SUMMARY_FILE,
};
use super::within;
use crate::agents::{AgentContext, ArchitectureAgent};
use crate::cost::CostCalculator;
use crate::error::{ensure_repository, Result};
use crate::invoker::AgentInvoker;
use crate::manifest::{ArchitectureManifest, MANIFEST_JSON, MANIFEST_MD};
use crate::state::config::{BuildConfig, BuildMode, BuildResult};

/// Runs architecture, component and validation phases in sequence
pub struct MultiAgentBuilder {
    invoker: Arc<dyn AgentInvoker>,
}

impl MultiAgentBuilder {
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Build a memory bank. Never fails; errors land in `BuildResult::errors`.
    #[tracing::instrument(skip_all, fields(repo = ?config.repo_path))]
    pub async fn build_memory_bank(&self, config: &BuildConfig, progress: &Progress) -> BuildResult {
        let mut pipeline = Pipeline::new();
        let cost = Arc::new(CostCalculator::new(config.model));

        let mut result = match self.run(config, progress, &mut pipeline, &cost).await {
            Ok(result) => result,
            Err(e) => {
                pipeline.fail();
                tracing::error!("Multi-agent build failed: {}", e);
                progress.error(format!("Error: {}", e)).await;
                BuildResult::failure(config.output_path.clone(), &e)
            }
        };

        result.set_meta("final_stage", pipeline.stage().as_str());
        result.set_meta("stage_history", pipeline.history_names());
        attach_cost_report(&mut result, &cost).await;
        result
    }

    async fn run(
        &self,
        config: &BuildConfig,
        progress: &Progress,
        pipeline: &mut Pipeline,
        cost: &Arc<CostCalculator>,
    ) -> Result<BuildResult> {
        config.validate()?;
        ensure_repository(&config.repo_path)?;
        tokio::fs::create_dir_all(&config.output_path).await?;
        let repo_path = tokio::fs::canonicalize(&config.repo_path).await?;
        let output_path = tokio::fs::canonicalize(&config.output_path).await?;

        progress
            .info(format!("Starting multi-agent build for {}", repo_path.display()))
            .await;

        let ctx = AgentContext::new(Arc::clone(&self.invoker), config.model)
            .with_cost(Arc::clone(cost));

        // Phase 1
        progress.info("=== PHASE 1: Architecture Analysis ===").await;
        progress
            .info(format!(
                "Using max_turns: {} for architecture analysis",
                config.architecture_turns()
            ))
            .await;
        let manifest = within(
            "Architecture phase",
            config.phase_timeout(),
            ArchitectureAgent::new(ctx.clone()).analyze(
                &repo_path,
                &output_path,
                &progress.scoped("architecture"),
                config.architecture_turns(),
            ),
        )
        .await?;
        pipeline.advance();
        log_manifest(&manifest, progress).await;

        let mut files_written = vec![output_path.join(MANIFEST_MD), output_path.join(MANIFEST_JSON)];

        // Phase 2
        let orchestration = if manifest.components.is_empty() {
            progress.info("No components identified - skipping Phase 2").await;
            pipeline.skip_phase();
            None
        } else {
            pipeline.advance();
            let concurrency = config.component_concurrency(manifest.components.len());
            let agent = OrchestrationAgent::new(ctx.clone(), concurrency)
                .with_min_file_bytes(config.min_file_bytes)
                .with_unit_timeout(config.unit_timeout())
                .with_cancel_on_fatal(config.cancel_siblings_on_fatal);
            let result = within(
                "Component phase",
                config.phase_timeout(),
                agent.orchestrate_component_analysis(
                    &manifest,
                    &repo_path,
                    &output_path,
                    progress,
                    config.component_turns(),
                ),
            )
            .await?;
            pipeline.advance();

            for component in &result.component_results {
                files_written.extend(component.files_written.iter().map(PathBuf::from));
            }
            files_written.push(output_path.join(COMPONENT_SUMMARY_FILE));
            progress
                .info(format!(
                    "Phase 2 complete: {}/{} components analyzed successfully",
                    result.successful_components, result.total_components
                ))
                .await;
            Some(result)
        };

        // Phase 3
        let successes = orchestration.as_ref().map_or(0, |o| o.successful_components);
        let validation = match &orchestration {
            Some(orch) if successes > 0 && !config.skip_validation => {
                pipeline.advance();
                let validator = ValidationOrchestrator::new(ctx.clone(), config.max_concurrent_validators)
                    .with_mode(config.validation_mode)
                    .with_unit_timeout(config.unit_timeout())
                    .with_cancel_on_fatal(config.cancel_siblings_on_fatal);
                let result = within(
                    "Validation phase",
                    config.phase_timeout(),
                    validator.orchestrate_validation(
                        &manifest,
                        orch,
                        &repo_path,
                        &output_path,
                        progress,
                        config.validator_turns(),
                    ),
                )
                .await?;
                pipeline.advance();

                files_written.push(output_path.join(VALIDATION_SUMMARY_FILE));
                progress
                    .info(format!(
                        "Phase 3 complete: {} passed, {} issues fixed",
                        result.components_passed, result.total_issues_fixed
                    ))
                    .await;
                Some(result)
            }
            _ => {
                if config.skip_validation {
                    progress.info("Validation disabled - skipping Phase 3").await;
                } else {
                    progress.info("No successful components - skipping Phase 3").await;
                }
                pipeline.skip_phase();
                None
            }
        };

        pipeline.advance();
        progress.info("Multi-agent build complete").await;

        let mut result = BuildResult {
            success: true,
            output_path,
            files_written,
            ..BuildResult::default()
        };
        record_metadata(&mut result, &manifest, orchestration.as_ref(), validation.as_ref());
        Ok(result)
    }
}

async fn log_manifest(manifest: &ArchitectureManifest, progress: &Progress) {
    progress
        .info(format!(
            "Architecture analysis complete: {} components identified",
            manifest.total_components
        ))
        .await;
    progress
        .info(format!("System Type: {}", manifest.system_type.as_str()))
        .await;
    for component in &manifest.components {
        progress
            .info(format!(
                "  - {} ({}): {}",
                component.name,
                component.component_type.as_str(),
                component.path
            ))
            .await;
    }
}

fn record_metadata(
    result: &mut BuildResult,
    manifest: &ArchitectureManifest,
    orchestration: Option<&OrchestrationResult>,
    validation: Option<&ValidationOrchestrationResult>,
) {
    result.set_meta("mode", BuildMode::MultiAgent.as_str());
    result.set_meta("phase_1_complete", true);
    result.set_meta("phase_2_complete", orchestration.is_some());
    result.set_meta("phase_3_complete", validation.is_some());
    result.set_meta("architecture_type", manifest.system_type.as_str());
    result.set_meta("total_components", manifest.total_components);
    result.set_meta(
        "components",
        manifest
            .components
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>(),
    );
    result.set_meta("generated_at", Utc::now().to_rfc3339());

    if let Some(orch) = orchestration {
        result.set_meta("successful_components", orch.successful_components);
        result.set_meta("failed_components", orch.failed_components);
        result.set_meta("component_analysis_duration", orch.total_duration_seconds);
    }

    if let Some(val) = validation {
        result.set_meta("validation_passed", val.components_passed);
        result.set_meta("validation_failed", val.components_failed);
        result.set_meta("validation_partial", val.components_partial);
        result.set_meta("total_issues_found", val.total_issues_found);
        result.set_meta("total_issues_fixed", val.total_issues_fixed);
        result.set_meta("validation_duration", val.total_duration_seconds);
        result.set_meta("fix_success_rate", val.fix_success_rate());
    }
}

/// Save `cost_analysis.json` next to the build output when anything was recorded
pub(crate) async fn attach_cost_report(result: &mut BuildResult, cost: &CostCalculator) {
    if cost.usage().is_empty() || !result.output_path.is_dir() {
        return;
    }
    let breakdown = cost.calculate_costs();
    match cost.save_cost_report(&result.output_path).await {
        Ok(path) => {
            result.files_written.push(path);
            result.set_meta("total_cost_usd", breakdown.total_cost);
        }
        Err(e) => tracing::warn!("Failed to save cost report: {}", e),
    }
}
