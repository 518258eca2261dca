//! # Validation Orchestration
//!
//! Phase 3: validators run only over components whose analysis
//! succeeded, under the same bulkhead as phase 2 with a lower ceiling.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bulkhead::{run_bulkhead, BulkheadPolicy};
use super::events::Progress;
use super::orchestrator::OrchestrationResult;
use crate::agents::{AgentContext, ValidationAgent, ValidationResult, ValidationStatus};
use crate::error::Result;
use crate::manifest::{ArchitectureManifest, Component};
use crate::state::config::{ValidationMode, MAX_VALIDATOR_CONCURRENCY};
use crate::state::io::write_json;

/// Phase 3 summary, written into the build output directory
pub const VALIDATION_SUMMARY_FILE: &str = "validation_summary.json";
/// Metadata reason when nothing qualified for validation
pub const NO_SUCCESSFUL_COMPONENTS: &str = "no_successful_components";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOrchestrationResult {
    pub total_components: usize,
    pub components_passed: usize,
    pub components_failed: usize,
    pub components_partial: usize,
    pub total_issues_found: usize,
    pub total_issues_fixed: usize,
    pub validation_results: Vec<ValidationResult>,
    pub orchestration_metadata: BTreeMap<String, serde_json::Value>,
    pub total_duration_seconds: f64,
}

impl ValidationOrchestrationResult {
    /// Fixed issues over found issues; 0 when nothing was found
    pub fn fix_success_rate(&self) -> f64 {
        if self.total_issues_found == 0 {
            0.0
        } else {
            self.total_issues_fixed as f64 / self.total_issues_found as f64
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total_components == 0 {
            0.0
        } else {
            self.components_passed as f64 / self.total_components as f64
        }
    }

    /// Tally statuses and issue counts from `results`
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let count = |status: ValidationStatus| {
            results
                .iter()
                .filter(|r| r.overall_status == status)
                .count()
        };
        Self {
            total_components: results.len(),
            components_passed: count(ValidationStatus::Pass),
            components_failed: count(ValidationStatus::Fail),
            components_partial: count(ValidationStatus::Partial),
            total_issues_found: results.iter().map(|r| r.issues_found.len()).sum(),
            total_issues_fixed: results.iter().map(|r| r.fixes_applied).sum(),
            validation_results: results,
            orchestration_metadata: BTreeMap::new(),
            total_duration_seconds: 0.0,
        }
    }
}

#[derive(Serialize)]
struct ComponentValidationSummary<'a> {
    component_name: &'a str,
    overall_status: ValidationStatus,
    completeness_score: u8,
    accuracy_score: u8,
    issues_found: usize,
    issues_fixed: usize,
    verified_claims: usize,
    turn_count: u64,
}

pub struct ValidationOrchestrator {
    ctx: AgentContext,
    max_concurrent_validators: usize,
    mode: ValidationMode,
    unit_timeout: Option<Duration>,
    cancel_on_fatal: bool,
}

impl ValidationOrchestrator {
    pub fn new(ctx: AgentContext, max_concurrent_validators: usize) -> Self {
        Self {
            ctx,
            max_concurrent_validators: max_concurrent_validators.max(1),
            mode: ValidationMode::default(),
            unit_timeout: None,
            cancel_on_fatal: false,
        }
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
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

    /// Components to validate: successful phase 2 results joined to the
    /// manifest by name. Results without a manifest entry are skipped.
    pub fn select_components(
        manifest: &ArchitectureManifest,
        orchestration: &OrchestrationResult,
    ) -> Vec<(Component, PathBuf)> {
        orchestration
            .successful_results()
            .filter_map(|result| {
                manifest
                    .find_component(&result.component_name)
                    .map(|component| (component.clone(), result.output_path.clone()))
            })
            .collect()
    }

    #[tracing::instrument(skip_all)]
    pub async fn orchestrate_validation(
        &self,
        manifest: &ArchitectureManifest,
        orchestration: &OrchestrationResult,
        repo_path: &Path,
        output_base: &Path,
        progress: &Progress,
        max_turns_per_validator: u32,
    ) -> Result<ValidationOrchestrationResult> {
        let started = Instant::now();
        let start_time = Utc::now();

        progress
            .info(format!(
                "=== PHASE 3: Validation & Auto-Fix ({} components) ===",
                manifest.components.len()
            ))
            .await;

        let selected = Self::select_components(manifest, orchestration);
        if selected.is_empty() {
            progress
                .info("No successful components to validate - skipping Phase 3")
                .await;
            let mut result = ValidationOrchestrationResult::default();
            result
                .orchestration_metadata
                .insert("reason".to_string(), NO_SUCCESSFUL_COMPONENTS.into());
            result.orchestration_metadata.insert(
                "max_concurrent_validators".to_string(),
                self.max_concurrent_validators.into(),
            );
            return Ok(result);
        }

        let limit = self
            .max_concurrent_validators
            .min(MAX_VALIDATOR_CONCURRENCY)
            .min(selected.len());
        progress
            .info(format!(
                "Validating {} successfully analyzed components ({} at a time)",
                selected.len(),
                limit
            ))
            .await;

        let agent = Arc::new(ValidationAgent::new(self.ctx.clone()).with_mode(self.mode));
        let repo: Arc<PathBuf> = Arc::new(repo_path.to_path_buf());
        let policy = BulkheadPolicy::new(limit)
            .with_unit_timeout(self.unit_timeout)
            .with_cancel_on_fatal(self.cancel_on_fatal);

        let reports = run_bulkhead(selected, policy, |(component, memory_bank)| {
            let agent = Arc::clone(&agent);
            let repo = Arc::clone(&repo);
            let unit_progress = progress.scoped(component.name.clone());
            async move {
                agent
                    .validate_checked(
                        &component,
                        &memory_bank,
                        &repo,
                        &unit_progress,
                        max_turns_per_validator,
                    )
                    .await
            }
        })
        .await;

        let mut results = Vec::with_capacity(reports.len());
        for ((component, _), report) in reports {
            match report {
                Ok(outcome) => results.push(outcome.result),
                Err(failure) => {
                    progress
                        .error(format!("[{}] Validation failed: {}", component.name, failure))
                        .await;
                    results.push(ValidationResult::failed(&component.name, failure.to_string()));
                }
            }
        }

        let mut result = ValidationOrchestrationResult::from_results(results);
        result.total_duration_seconds = started.elapsed().as_secs_f64();
        let meta = &mut result.orchestration_metadata;
        meta.insert("max_concurrent_validators".to_string(), limit.into());
        meta.insert(
            "max_turns_per_validator".to_string(),
            max_turns_per_validator.into(),
        );
        meta.insert("validation_mode".to_string(), self.mode.as_str().into());
        meta.insert("start_time".to_string(), start_time.to_rfc3339().into());
        meta.insert("end_time".to_string(), Utc::now().to_rfc3339().into());
        let pass_rate = result.pass_rate();
        let fix_rate = result.fix_success_rate();
        let meta = &mut result.orchestration_metadata;
        meta.insert("validation_success_rate".to_string(), pass_rate.into());
        meta.insert("fix_success_rate".to_string(), fix_rate.into());

        progress
            .info(format!(
                "Validation completed in {:.2}s. Passed: {}, Partial: {}, Failed: {}",
                result.total_duration_seconds,
                result.components_passed,
                result.components_partial,
                result.components_failed
            ))
            .await;
        progress
            .info(format!(
                "Total fixes applied: {} (from {} issues found)",
                result.total_issues_fixed, result.total_issues_found
            ))
            .await;

        save_summary(&result, output_base).await?;
        Ok(result)
    }
}

async fn save_summary(result: &ValidationOrchestrationResult, output_base: &Path) -> Result<()> {
    let components: Vec<ComponentValidationSummary<'_>> = result
        .validation_results
        .iter()
        .map(|r| ComponentValidationSummary {
            component_name: &r.component_name,
            overall_status: r.overall_status,
            completeness_score: r.completeness_score,
            accuracy_score: r.accuracy_score,
            issues_found: r.issues_found.len(),
            issues_fixed: r.fixes_applied,
            verified_claims: r.verified_claims.len(),
            turn_count: r
                .validation_metadata
                .get("turn_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
        .collect();

    let summary = serde_json::json!({
        "total_components": result.total_components,
        "components_passed": result.components_passed,
        "components_failed": result.components_failed,
        "components_partial": result.components_partial,
        "pass_rate": result.pass_rate(),
        "total_issues_found": result.total_issues_found,
        "total_issues_fixed": result.total_issues_fixed,
        "fix_success_rate": result.fix_success_rate(),
        "total_duration_seconds": result.total_duration_seconds,
        "orchestration_metadata": result.orchestration_metadata,
        "component_validation_summaries": components,
    });
    let path = output_base.join(VALIDATION_SUMMARY_FILE);
    write_json(&path, &summary).await?;
    tracing::info!("Validation summary saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ComponentAnalysisResult, REPORT_FILE};
    use crate::invoker::scripted::{write_text, ScriptedInvoker};
    use crate::manifest::parse_manifest;
    use crate::models::ClaudeModel;

    fn manifest(names: &[&str]) -> ArchitectureManifest {
        let mut manifest = parse_manifest("", Utc::now());
        manifest.components = names.iter().map(|n| Component::new(*n)).collect();
        manifest.total_components = names.len();
        manifest
    }

    fn orchestration(root: &Path, outcomes: &[(&str, bool)]) -> OrchestrationResult {
        let component_results: Vec<ComponentAnalysisResult> = outcomes
            .iter()
            .map(|(name, success)| {
                let component = Component::new(*name);
                let mut result =
                    ComponentAnalysisResult::failed(&component, root.join(name), 10, "");
                result.success = *success;
                result
            })
            .collect();
        let successful = outcomes.iter().filter(|(_, s)| *s).count();
        OrchestrationResult {
            total_components: outcomes.len(),
            successful_components: successful,
            failed_components: outcomes.len() - successful,
            component_results,
            orchestration_metadata: BTreeMap::new(),
            total_duration_seconds: 0.0,
        }
    }

    #[test]
    fn test_selection_joins_by_name() {
        let root = Path::new("/out");
        let selected = ValidationOrchestrator::select_components(
            &manifest(&["a", "b"]),
            &orchestration(root, &[("a", true), ("b", false), ("ghost", true)]),
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0.name, "a");
        assert_eq!(selected[0].1, root.join("a"));
    }

    #[test]
    fn test_rates_guard_division() {
        let empty = ValidationOrchestrationResult::default();
        assert_eq!(empty.fix_success_rate(), 0.0);
        assert_eq!(empty.pass_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_nothing_to_validate() {
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| Ok(vec![]));
        let ctx = AgentContext::new(invoker.clone(), ClaudeModel::default());

        let result = ValidationOrchestrator::new(ctx, 10)
            .orchestrate_validation(
                &manifest(&["a"]),
                &orchestration(out.path(), &[("a", false)]),
                out.path(),
                out.path(),
                &Progress::silent(),
                25,
            )
            .await
            .unwrap();

        assert_eq!(result.total_components, 0);
        assert_eq!(
            result.orchestration_metadata["reason"],
            NO_SUCCESSFUL_COMPONENTS
        );
        assert_eq!(invoker.calls(), 0);
        assert!(!out.path().join(VALIDATION_SUMMARY_FILE).exists());
    }

    #[tokio::test]
    async fn test_tallies_statuses() {
        let repo = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            let report = match req.label.as_str() {
                "a" => r#"{"overall_status": "PASS", "issues": [{"fixed": true}, {"fixed": true}]}"#,
                "b" => r#"{"overall_status": "PARTIAL", "issues": [{"fixed": false}, {"fixed": true}]}"#,
                _ => return Ok(vec![]),
            };
            Ok(vec![write_text(&req.artifact_dir.join(REPORT_FILE), report)])
        });
        let ctx = AgentContext::new(invoker, ClaudeModel::default());

        let result = ValidationOrchestrator::new(ctx, 10)
            .orchestrate_validation(
                &manifest(&["a", "b", "c"]),
                &orchestration(out.path(), &[("a", true), ("b", true), ("c", true)]),
                repo.path(),
                out.path(),
                &Progress::silent(),
                25,
            )
            .await
            .unwrap();

        assert_eq!(result.total_components, 3);
        assert_eq!(
            (result.components_passed, result.components_partial, result.components_failed),
            (1, 1, 1)
        );
        assert_eq!(result.total_issues_found, 4);
        assert_eq!(result.total_issues_fixed, 3);
        assert_eq!(result.fix_success_rate(), 0.75);
        assert!(out.path().join(VALIDATION_SUMMARY_FILE).exists());
    }
}
