//! # Validation Agent
//!
//! Phase 3 unit of work. The agent checks one component's memory bank for
//! completeness and accuracy, repairs what it can in place, and writes
//! `validation_report.json`. The report is parsed as JSON, never as prose.
//!
//! In two-pass mode a read-only diagnosis invocation runs first and a
//! second invocation repairs the issues it recorded.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tokio::fs;

use super::component_agent::EXPECTED_COMPONENT_FILES;
use super::prompts::{self, render};
use super::{component_working_dir, AgentContext, UnitOutcome};
use crate::cost::OP_VALIDATION;
use crate::error::Result;
use crate::invoker::{
    InvocationKind, InvocationRequest, InvocationTracker, PermissionMode, ANALYSIS_TOOLS,
    VALIDATION_TOOLS,
};
use crate::manifest::Component;
use crate::state::config::ValidationMode;
use crate::state::io::remove_stale;
use crate::swarm::events::Progress;

/// Report file the agent writes inside the memory bank directory
pub const REPORT_FILE: &str = "validation_report.json";
/// Metadata note when the agent never wrote its report
pub const NO_REPORT: &str = "No validation report created";

const TURN_WARNING_RATIO: f64 = 0.9;
const CHECKPOINT_EVERY: u32 = 20;

const FIX_IN_PLACE: &str = "Fix every issue you can in place: create missing files, replace \
placeholder text and correct inaccurate claims. Set `fixed: true` on each issue you repaired.";
const DIAGNOSE_ONLY: &str = "Do not modify the documentation in this pass. Record every issue \
with `fixed: false`; a second pass will repair them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Pass,
    Partial,
    #[default]
    Fail,
}

impl ValidationStatus {
    /// Unknown spellings count as a failure
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASS" | "PASSED" => ValidationStatus::Pass,
            "PARTIAL" => ValidationStatus::Partial,
            _ => ValidationStatus::Fail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pass => "PASS",
            ValidationStatus::Partial => "PARTIAL",
            ValidationStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    High,
    #[default]
    Medium,
    Low,
}

impl IssueSeverity {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => IssueSeverity::High,
            "low" | "minor" => IssueSeverity::Low,
            _ => IssueSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    #[default]
    Missing,
    Inaccurate,
    Inconsistent,
    Empty,
    Incomplete,
}

impl IssueType {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inaccurate" | "incorrect" => IssueType::Inaccurate,
            "inconsistent" => IssueType::Inconsistent,
            "empty" | "placeholder" => IssueType::Empty,
            "incomplete" => IssueType::Incomplete,
            _ => IssueType::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub file: String,
    pub description: String,
    pub evidence: String,
    pub suggestion: String,
    pub auto_fixable: bool,
    pub fixed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaim {
    pub claim: String,
    pub source_file: String,
    pub line_numbers: String,
    /// VERIFIED, FAILED or PARTIAL as reported
    pub verification_status: String,
}

/// Parsed outcome of validating one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub component_name: String,
    pub validation_timestamp: DateTime<Utc>,
    pub overall_status: ValidationStatus,
    /// 0-100
    pub completeness_score: u8,
    /// 0-100
    pub accuracy_score: u8,
    pub issues_found: Vec<ValidationIssue>,
    pub issues_fixed: Vec<ValidationIssue>,
    pub verified_claims: Vec<VerifiedClaim>,
    pub fixes_applied: usize,
    pub validation_metadata: BTreeMap<String, serde_json::Value>,
}

impl ValidationResult {
    /// A FAIL result carrying `error` in its metadata
    pub fn failed(component_name: &str, error: impl Into<String>) -> Self {
        let mut validation_metadata = BTreeMap::new();
        validation_metadata.insert("error".to_string(), serde_json::Value::from(error.into()));
        Self {
            component_name: component_name.to_string(),
            validation_timestamp: Utc::now(),
            overall_status: ValidationStatus::Fail,
            completeness_score: 0,
            accuracy_score: 0,
            issues_found: Vec::new(),
            issues_fixed: Vec::new(),
            verified_claims: Vec::new(),
            fixes_applied: 0,
            validation_metadata,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.validation_metadata.get("error").and_then(|v| v.as_str())
    }

    fn set_meta(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.validation_metadata
            .insert(key.to_string(), value.into());
    }
}

/// Shape of `validation_report.json`, also embedded in the prompt as a schema
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ValidationReport {
    /// PASS, PARTIAL or FAIL
    pub overall_status: String,
    /// 0-100
    #[serde(deserialize_with = "lenient_score")]
    #[schemars(with = "f64")]
    pub completeness_score: f64,
    /// 0-100
    #[serde(deserialize_with = "lenient_score")]
    #[schemars(with = "f64")]
    pub accuracy_score: f64,
    pub issues: Vec<ReportIssue>,
    pub verified_claims: Vec<ReportClaim>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ReportIssue {
    /// high, medium or low
    pub severity: String,
    /// missing, inaccurate, inconsistent, empty or incomplete
    #[serde(rename = "type")]
    pub issue_type: String,
    pub file: String,
    pub description: String,
    pub evidence: String,
    pub suggestion: String,
    pub auto_fixable: bool,
    /// True only if the issue was corrected
    pub fixed: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ReportClaim {
    pub claim: String,
    pub source_file: String,
    /// "12-40" or a single line
    #[serde(deserialize_with = "lenient_string")]
    #[schemars(with = "String")]
    pub line_numbers: String,
    /// VERIFIED, FAILED or PARTIAL
    pub verification_status: String,
}

/// Accept numbers and arrays where a string is expected
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    })
}

/// Accept `90`, `"90"` or `"90%"`; anything else scores 0
fn lenient_score<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// JSON schema of the report, pretty-printed for the prompt
pub fn report_schema() -> String {
    let schema = schemars::schema_for!(ValidationReport);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn clamp_score(score: f64) -> u8 {
    if score.is_nan() {
        0
    } else {
        score.clamp(0.0, 100.0).round() as u8
    }
}

/// Turn a report into a [`ValidationResult`] for `component_name`
pub fn parse_report(component_name: &str, content: &str) -> serde_json::Result<ValidationResult> {
    let report: ValidationReport = serde_json::from_str(content)?;

    let issues_found: Vec<ValidationIssue> = report
        .issues
        .into_iter()
        .map(|raw| ValidationIssue {
            severity: IssueSeverity::parse_lenient(&raw.severity),
            issue_type: IssueType::parse_lenient(&raw.issue_type),
            file: raw.file,
            description: raw.description,
            evidence: raw.evidence,
            suggestion: raw.suggestion,
            auto_fixable: raw.auto_fixable,
            fixed: raw.fixed,
        })
        .collect();
    let issues_fixed: Vec<ValidationIssue> =
        issues_found.iter().filter(|i| i.fixed).cloned().collect();
    let verified_claims = report
        .verified_claims
        .into_iter()
        .map(|raw| VerifiedClaim {
            claim: raw.claim,
            source_file: raw.source_file,
            line_numbers: raw.line_numbers,
            verification_status: if raw.verification_status.is_empty() {
                "UNKNOWN".to_string()
            } else {
                raw.verification_status
            },
        })
        .collect();

    Ok(ValidationResult {
        component_name: component_name.to_string(),
        validation_timestamp: Utc::now(),
        overall_status: ValidationStatus::parse_lenient(&report.overall_status),
        completeness_score: clamp_score(report.completeness_score),
        accuracy_score: clamp_score(report.accuracy_score),
        fixes_applied: issues_fixed.len(),
        issues_found,
        issues_fixed,
        verified_claims,
        validation_metadata: BTreeMap::new(),
    })
}

pub struct ValidationAgent {
    ctx: AgentContext,
    mode: ValidationMode,
}

impl ValidationAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            mode: ValidationMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate and repair one memory bank. Never fails; a broken run is a FAIL result.
    pub async fn validate_and_fix_component(
        &self,
        component: &Component,
        memory_bank_path: &Path,
        repo_path: &Path,
        progress: &Progress,
        max_turns: u32,
    ) -> ValidationResult {
        self.validate_checked(component, memory_bank_path, repo_path, progress, max_turns)
            .await
            .result
    }

    #[tracing::instrument(skip_all, fields(component = %component.name, mode = self.mode.as_str()))]
    pub async fn validate_checked(
        &self,
        component: &Component,
        memory_bank_path: &Path,
        repo_path: &Path,
        progress: &Progress,
        max_turns: u32,
    ) -> UnitOutcome<ValidationResult> {
        let mut tracker = InvocationTracker::new(max_turns, TURN_WARNING_RATIO, CHECKPOINT_EVERY);
        let run = self.run(component, memory_bank_path, repo_path, progress, &mut tracker);
        match run.await {
            Ok(result) => UnitOutcome::ok(result),
            Err(e) => {
                let message = format!("Validation failed: {}", e);
                tracing::error!("[{}] {}", component.name, message);
                progress.error(format!("[{}] {}", component.name, message)).await;
                let mut result = ValidationResult::failed(&component.name, message);
                result.set_meta("turn_count", tracker.turn_count());
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
        memory_bank_path: &Path,
        repo_path: &Path,
        progress: &Progress,
        tracker: &mut InvocationTracker,
    ) -> Result<ValidationResult> {
        let report_path = memory_bank_path.join(REPORT_FILE);
        remove_stale(&report_path).await?;

        progress
            .info(format!("[{}] Validating memory bank", component.name))
            .await;

        match self.mode {
            ValidationMode::SinglePass => {
                let request = self.request(
                    component,
                    memory_bank_path,
                    repo_path,
                    tracker.max_turns(),
                    FIX_IN_PLACE,
                    VALIDATION_TOOLS,
                );
                self.ctx
                    .drive(request, tracker, progress, OP_VALIDATION, Some(component.name.as_str()))
                    .await?;
            }
            ValidationMode::TwoPass => {
                let diagnose = self.request(
                    component,
                    memory_bank_path,
                    repo_path,
                    tracker.max_turns(),
                    DIAGNOSE_ONLY,
                    ANALYSIS_TOOLS,
                );
                self.ctx
                    .drive(diagnose, tracker, progress, OP_VALIDATION, Some(component.name.as_str()))
                    .await?;

                let open_issues = match fs::read_to_string(&report_path).await {
                    Ok(content) => parse_report(&component.name, &content)
                        .map(|r| r.issues_found.iter().filter(|i| !i.fixed).count())
                        .unwrap_or(0),
                    Err(_) => 0,
                };
                if open_issues > 0 {
                    progress
                        .info(format!(
                            "[{}] Repairing {} issues",
                            component.name, open_issues
                        ))
                        .await;
                    let remaining = tracker.max_turns().saturating_sub(tracker.turn_count()).max(1);
                    let mut repair = self.request(
                        component,
                        memory_bank_path,
                        repo_path,
                        remaining,
                        FIX_IN_PLACE,
                        VALIDATION_TOOLS,
                    );
                    repair.prompt = format!(
                        "Read {} and fix each issue it lists in place, then rewrite the report with updated `fixed` flags and scores.",
                        report_path.display()
                    );
                    self.ctx
                        .drive(repair, tracker, progress, OP_VALIDATION, Some(component.name.as_str()))
                        .await?;
                }
            }
        }

        let mut result = match fs::read_to_string(&report_path).await {
            Ok(content) => match parse_report(&component.name, &content) {
                Ok(result) => result,
                Err(e) => {
                    progress
                        .warn(format!("[{}] Unreadable validation report: {}", component.name, e))
                        .await;
                    ValidationResult::failed(
                        &component.name,
                        format!("Invalid validation report: {}", e),
                    )
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                progress
                    .warn(format!("[{}] {}", component.name, NO_REPORT))
                    .await;
                ValidationResult::failed(&component.name, NO_REPORT)
            }
            Err(e) => return Err(e.into()),
        };

        result.set_meta("turn_count", tracker.turn_count());
        result.set_meta("max_turns", tracker.max_turns());
        result.set_meta("component_type", component.component_type.as_str());
        result.set_meta("component_path", component.path.as_str());
        result.set_meta("validation_mode", self.mode.as_str());

        if result.error().is_none() {
            progress
                .info(format!(
                    "[{}] Validation {} - {} fixes applied",
                    component.name, result.overall_status, result.fixes_applied
                ))
                .await;
        }
        Ok(result)
    }

    fn request(
        &self,
        component: &Component,
        memory_bank_path: &Path,
        repo_path: &Path,
        max_turns: u32,
        fix_instruction: &str,
        tools: &[&str],
    ) -> InvocationRequest {
        let memory_bank = memory_bank_path.to_string_lossy();
        let report_path = memory_bank_path.join(REPORT_FILE);
        let report = report_path.to_string_lossy();
        let schema = report_schema();
        let required = EXPECTED_COMPONENT_FILES.join(", ");
        let system_prompt = render(
            prompts::VALIDATION,
            &[
                ("component_name", component.name.as_str()),
                ("component_path", component.path.as_str()),
                ("memory_bank_path", &*memory_bank),
                ("required_files", required.as_str()),
                ("fix_instruction", fix_instruction),
                ("report_path", &*report),
                ("report_schema", schema.as_str()),
            ],
        );
        let prompt = format!(
            "Validate the memory bank for {} in {} and write {}.",
            component.name, memory_bank, report
        );
        InvocationRequest::new(component.name.as_str(), InvocationKind::Validation)
            .with_prompts(system_prompt, prompt)
            .with_dirs(
                component_working_dir(component, repo_path),
                memory_bank_path.to_path_buf(),
            )
            .with_tools(tools, PermissionMode::BypassPermissions)
            .with_budget(max_turns, self.ctx.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::scripted::{write_text, ScriptedInvoker};
    use crate::invoker::AgentEvent;
    use crate::models::ClaudeModel;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const PASS_REPORT: &str = r#"{
        "overall_status": "PASS",
        "completeness_score": 90,
        "accuracy_score": 85,
        "issues": [
            {"severity": "high", "type": "missing", "file": "api_contracts.md",
             "description": "File absent", "fixed": true},
            {"severity": "low", "type": "inaccurate", "file": "techContext.md",
             "description": "Wrong port", "fixed": false}
        ],
        "verified_claims": [
            {"claim": "Uses axum", "source_file": "Cargo.toml", "line_numbers": [12, 14],
             "verification_status": "VERIFIED"}
        ]
    }"#;

    fn agent(invoker: Arc<ScriptedInvoker>) -> ValidationAgent {
        ValidationAgent::new(AgentContext::new(invoker, ClaudeModel::default()))
    }

    #[test]
    fn test_parse_report() {
        let result = parse_report("api", PASS_REPORT).unwrap();
        assert_eq!(result.overall_status, ValidationStatus::Pass);
        assert_eq!(result.completeness_score, 90);
        assert_eq!(result.issues_found.len(), 2);
        assert_eq!(result.fixes_applied, 1);
        assert_eq!(result.issues_fixed, vec![result.issues_found[0].clone()]);
        assert_eq!(result.issues_fixed[0].issue_type, IssueType::Missing);
        assert_eq!(result.verified_claims[0].line_numbers, "12, 14");
    }

    #[test]
    fn test_parse_report_is_lenient() {
        let result = parse_report(
            "api",
            r#"{"overall_status": "partial", "completeness_score": 140, "accuracy_score": -3,
                "issues": [{"severity": "urgent", "type": "odd"}]}"#,
        )
        .unwrap();
        assert_eq!(result.overall_status, ValidationStatus::Partial);
        assert_eq!(result.completeness_score, 100);
        assert_eq!(result.accuracy_score, 0);
        assert_eq!(result.issues_found[0].severity, IssueSeverity::Medium);
        assert_eq!(result.issues_found[0].issue_type, IssueType::Missing);
        assert!(parse_report("api", "not json").is_err());
    }

    #[test]
    fn test_string_scores_are_accepted() {
        let result = parse_report(
            "api",
            r#"{"overall_status": "PASS", "completeness_score": "90", "accuracy_score": " 250% "}"#,
        )
        .unwrap();
        assert_eq!(result.overall_status, ValidationStatus::Pass);
        assert_eq!(result.completeness_score, 90);
        assert_eq!(result.accuracy_score, 100);

        let result = parse_report("api", r#"{"overall_status": "PASS", "completeness_score": "high"}"#).unwrap();
        assert_eq!(result.completeness_score, 0);
    }

    #[test]
    fn test_schema_mentions_report_fields() {
        let schema = report_schema();
        assert!(schema.contains("overall_status"));
        assert!(schema.contains("verified_claims"));
    }

    #[tokio::test]
    async fn test_single_pass_reads_report() {
        let repo = tempfile::tempdir().unwrap();
        let bank = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            Ok(vec![write_text(&req.artifact_dir.join(REPORT_FILE), PASS_REPORT)])
        });

        let result = agent(invoker.clone())
            .validate_and_fix_component(&Component::new("api"), bank.path(), repo.path(), &Progress::silent(), 100)
            .await;

        assert_eq!(result.overall_status, ValidationStatus::Pass);
        assert_eq!(result.fixes_applied, 1);
        assert_eq!(result.validation_metadata["turn_count"], 1);
        assert_eq!(invoker.calls(), 1);
        assert!(invoker.requests()[0].allowed_tools.contains(&"Edit".to_string()));
    }

    #[tokio::test]
    async fn test_missing_report_is_fail() {
        let repo = tempfile::tempdir().unwrap();
        let bank = tempfile::tempdir().unwrap();
        std::fs::write(bank.path().join(REPORT_FILE), PASS_REPORT).unwrap();
        let invoker = ScriptedInvoker::new(|_| Ok(vec![AgentEvent::text("looked around")]));

        let result = agent(invoker)
            .validate_and_fix_component(&Component::new("api"), bank.path(), repo.path(), &Progress::silent(), 100)
            .await;

        assert_eq!(result.overall_status, ValidationStatus::Fail);
        assert_eq!(result.error(), Some(NO_REPORT));
    }

    #[tokio::test]
    async fn test_two_pass_repairs_open_issues() {
        let repo = tempfile::tempdir().unwrap();
        let bank = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|req| {
            let report = if req.allowed_tools.contains(&"Edit".to_string()) {
                r#"{"overall_status": "PASS", "issues": [{"type": "empty", "fixed": true}]}"#
            } else {
                r#"{"overall_status": "FAIL", "issues": [{"type": "empty", "fixed": false}]}"#
            };
            Ok(vec![write_text(&req.artifact_dir.join(REPORT_FILE), report)])
        });

        let result = agent(invoker.clone())
            .with_mode(ValidationMode::TwoPass)
            .validate_and_fix_component(&Component::new("api"), bank.path(), repo.path(), &Progress::silent(), 100)
            .await;

        assert_eq!(invoker.calls(), 2);
        assert_eq!(result.overall_status, ValidationStatus::Pass);
        assert_eq!(result.fixes_applied, 1);
        assert_eq!(result.validation_metadata["validation_mode"], "two_pass");
    }

    #[tokio::test]
    async fn test_invoker_error_is_captured() {
        let repo = tempfile::tempdir().unwrap();
        let bank = tempfile::tempdir().unwrap();
        let invoker = ScriptedInvoker::new(|_| {
            Err(crate::error::InvokerError::Process("exit status 1".into()))
        });

        let outcome = agent(invoker)
            .validate_checked(&Component::new("api"), bank.path(), repo.path(), &Progress::silent(), 100)
            .await;

        assert!(!outcome.fatal);
        assert_eq!(outcome.result.overall_status, ValidationStatus::Fail);
        assert!(outcome.result.error().unwrap().starts_with("Validation failed"));
    }
}
