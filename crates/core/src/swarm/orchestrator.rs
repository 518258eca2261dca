//! # Component Orchestration
//!
//! Phase 2: every manifest component is analyzed by its own
//! [`ComponentAgent`] inside a [`run_bulkhead`] fan-out. One component's
//! failure never affects another; it becomes a failed result in that
//! component's slot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bulkhead::{run_bulkhead, BulkheadPolicy};
use super::events::Progress;
use crate::agents::{component_memory_bank_dir, AgentContext, ComponentAgent, ComponentAnalysisResult};
use crate::error::Result;
use crate::manifest::ArchitectureManifest;
use crate::state::config::DEFAULT_MIN_FILE_BYTES;
use crate::state::io::write_json;

/// Phase 2 summary, written into the build output directory
pub const COMPONENT_SUMMARY_FILE: &str = "component_analysis_summary.json";

/// Aggregate outcome of the component phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub total_components: usize,
    pub successful_components: usize,
    pub failed_components: usize,
    /// One entry per manifest component, in manifest order
    pub component_results: Vec<ComponentAnalysisResult>,
    pub orchestration_metadata: BTreeMap<String, serde_json::Value>,
    pub total_duration_seconds: f64,
}

impl OrchestrationResult {
    pub fn success_rate(&self) -> f64 {
        if self.total_components == 0 {
            0.0
        } else {
            self.successful_components as f64 / self.total_components as f64
        }
    }

    pub fn successful_results(&self) -> impl Iterator<Item = &ComponentAnalysisResult> {
        self.component_results.iter().filter(|r| r.success)
    }
}

#[derive(Serialize)]
struct ComponentSummary<'a> {
    component_name: &'a str,
    success: bool,
    files_created: usize,
    turn_count: u32,
    created_files: &'a [String],
    missing_files: &'a [String],
    output_path: &'a Path,
    errors: &'a [String],
}

/// Runs the component phase
pub struct OrchestrationAgent {
    ctx: AgentContext,
    max_concurrent_agents: usize,
    min_file_bytes: u64,
    unit_timeout: Option<Duration>,
    cancel_on_fatal: bool,
}

impl OrchestrationAgent {
    pub fn new(ctx: AgentContext, max_concurrent_agents: usize) -> Self {
        Self {
            ctx,
            max_concurrent_agents: max_concurrent_agents.max(1),
            min_file_bytes: DEFAULT_MIN_FILE_BYTES,
            unit_timeout: None,
            cancel_on_fatal: false,
        }
    }

    pub fn with_min_file_bytes(mut self, bytes: u64) -> Self {
        self.min_file_bytes = bytes;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_cancel_on_fatal(mut self, cancel: bool) -> Self {
        self.cancel_on_fatal = cancel;
        self
    }

    #[tracing::instrument(skip_all, fields(components = manifest.components.len()))]
    pub async fn orchestrate_component_analysis(
        &self,
        manifest: &ArchitectureManifest,
        repo_path: &Path,
        output_base: &Path,
        progress: &Progress,
        max_turns_per_component: u32,
    ) -> Result<OrchestrationResult> {
        let started = Instant::now();
        let start_time = Utc::now();
        let total = manifest.components.len();

        progress
            .info(format!("=== PHASE 2: Component Analysis ({} components) ===", total))
            .await;
        progress
            .info(format!("Max concurrent agents: {}", self.max_concurrent_agents))
            .await;

        let agent = Arc::new(
            ComponentAgent::new(self.ctx.clone()).with_min_file_bytes(self.min_file_bytes),
        );
        let summary = Arc::new(manifest.summary());
        let repo: Arc<PathBuf> = Arc::new(repo_path.to_path_buf());
        let output: Arc<PathBuf> = Arc::new(output_base.to_path_buf());

        let policy = BulkheadPolicy::new(self.max_concurrent_agents)
            .with_unit_timeout(self.unit_timeout)
            .with_cancel_on_fatal(self.cancel_on_fatal);

        let reports = run_bulkhead(manifest.components.clone(), policy, |component| {
            let agent = Arc::clone(&agent);
            let summary = Arc::clone(&summary);
            let repo = Arc::clone(&repo);
            let output = Arc::clone(&output);
            let unit_progress = progress.scoped(component.name.clone());
            async move {
                agent
                    .analyze_checked(
                        &component,
                        &repo,
                        &output,
                        &summary,
                        &unit_progress,
                        max_turns_per_component,
                    )
                    .await
            }
        })
        .await;

        let mut component_results = Vec::with_capacity(total);
        for (component, report) in reports {
            match report {
                Ok(outcome) => component_results.push(outcome.result),
                Err(failure) => {
                    progress
                        .error(format!("[{}] {}", component.name, failure))
                        .await;
                    component_results.push(ComponentAnalysisResult::failed(
                        &component,
                        component_memory_bank_dir(output_base, &component),
                        max_turns_per_component,
                        failure.to_string(),
                    ));
                }
            }
        }

        let successful = component_results.iter().filter(|r| r.success).count();
        let duration = started.elapsed().as_secs_f64();

        let mut orchestration_metadata = BTreeMap::new();
        orchestration_metadata.insert(
            "max_concurrent_agents".to_string(),
            serde_json::Value::from(self.max_concurrent_agents),
        );
        orchestration_metadata.insert(
            "max_turns_per_component".to_string(),
            serde_json::Value::from(max_turns_per_component),
        );
        orchestration_metadata.insert(
            "start_time".to_string(),
            serde_json::Value::from(start_time.to_rfc3339()),
        );
        orchestration_metadata.insert(
            "end_time".to_string(),
            serde_json::Value::from(Utc::now().to_rfc3339()),
        );
        orchestration_metadata.insert(
            "system_type".to_string(),
            serde_json::Value::from(manifest.system_type.as_str()),
        );

        let result = OrchestrationResult {
            total_components: total,
            successful_components: successful,
            failed_components: total - successful,
            component_results,
            orchestration_metadata,
            total_duration_seconds: duration,
        };

        progress
            .info(format!(
                "Component analysis completed in {:.2}s: {} succeeded, {} failed",
                duration, result.successful_components, result.failed_components
            ))
            .await;

        save_summary(&result, output_base).await?;
        Ok(result)
    }
}

async fn save_summary(result: &OrchestrationResult, output_base: &Path) -> Result<()> {
    let components: Vec<ComponentSummary<'_>> = result
        .component_results
        .iter()
        .map(|r| ComponentSummary {
            component_name: &r.component_name,
            success: r.success,
            files_created: r.files_written.len(),
            turn_count: r.analysis_metadata.turn_count,
            created_files: &r.analysis_metadata.created_files,
            missing_files: &r.analysis_metadata.missing_files,
            output_path: &r.output_path,
            errors: &r.errors,
        })
        .collect();

    let summary = serde_json::json!({
        "total_components": result.total_components,
        "successful_components": result.successful_components,
        "failed_components": result.failed_components,
        "success_rate": result.success_rate(),
        "total_duration_seconds": result.total_duration_seconds,
        "orchestration_metadata": result.orchestration_metadata,
        "component_summaries": components,
    });
    let path = output_base.join(COMPONENT_SUMMARY_FILE);
    write_json(&path, &summary).await?;
    tracing::info!("Component analysis summary saved to {:?}", path);
    Ok(())
}
