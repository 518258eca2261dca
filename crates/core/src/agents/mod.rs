//! # Agents
//!
//! Single-invocation agents. Each one builds a prompt, drives one
//! [`AgentInvoker`] stream to completion, and turns what landed on disk
//! into a typed result.
//!
//! - [`ArchitectureAgent`] - repository → [`ArchitectureManifest`](crate::manifest::ArchitectureManifest)
//! - [`ComponentAgent`] - one component → six memory bank files
//! - [`ValidationAgent`] - one component's memory bank → validation report

pub mod architecture_agent;
pub mod component_agent;
pub mod prompts;
pub mod validation_agent;

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cost::CostCalculator;
use crate::error::{InvokerError, Result};
use crate::invoker::{
    AgentInvoker, InvocationRequest, InvocationTracker, TrackerSignal, UsageTotals,
};
use crate::manifest::Component;
use crate::models::ClaudeModel;
use crate::swarm::events::Progress;

pub use architecture_agent::ArchitectureAgent;
pub use component_agent::{
    component_memory_bank_dir, ComponentAgent, ComponentAnalysisResult, ComponentRunMetadata, EXPECTED_COMPONENT_FILES,
};
pub use validation_agent::{
    parse_report, IssueSeverity, IssueType, ValidationAgent, ValidationIssue, ValidationResult,
    ValidationStatus, VerifiedClaim, REPORT_FILE,
};

/// A unit result plus whether its failure would repeat for every sibling
#[derive(Debug, Clone)]
pub struct UnitOutcome<T> {
    pub result: T,
    pub fatal: bool,
}

impl<T> UnitOutcome<T> {
    pub fn ok(result: T) -> Self {
        Self {
            result,
            fatal: false,
        }
    }
}

/// Shared dependencies of every agent
#[derive(Clone)]
pub struct AgentContext {
    invoker: Arc<dyn AgentInvoker>,
    model: ClaudeModel,
    cost: Option<Arc<CostCalculator>>,
}

impl AgentContext {
    pub fn new(invoker: Arc<dyn AgentInvoker>, model: ClaudeModel) -> Self {
        Self {
            invoker,
            model,
            cost: None,
        }
    }

    /// Record token usage of every invocation into `cost`
    pub fn with_cost(mut self, cost: Arc<CostCalculator>) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn model(&self) -> ClaudeModel {
        self.model
    }

    /// Consume one invocation stream, reporting progress as it goes.
    ///
    /// An error event ends consumption and fails the invocation.
    pub(crate) async fn drive(
        &self,
        request: InvocationRequest,
        tracker: &mut InvocationTracker,
        progress: &Progress,
        operation: &str,
        component: Option<&str>,
    ) -> Result<()> {
        let label = request.label.clone();
        let usage_before = tracker.usage();
        let mut stream = self.invoker.invoke(request).await?;
        let mut failure = None;

        'events: while let Some(event) = stream.next().await {
            for signal in tracker.observe(&event) {
                match signal {
                    TrackerSignal::Wrote(path) => {
                        progress.info(format!("Wrote {}", display_name(&path))).await;
                    }
                    TrackerSignal::NearTurnLimit {
                        turn_count,
                        max_turns,
                    } => {
                        progress
                            .warn(format!(
                                "{} is approaching its turn limit ({}/{})",
                                label, turn_count, max_turns
                            ))
                            .await;
                    }
                    TrackerSignal::Checkpoint { turn_count } => {
                        progress
                            .info(format!("{} still working (turn {})", label, turn_count))
                            .await;
                    }
                    TrackerSignal::Failed(message) => {
                        failure = Some(message);
                        break 'events;
                    }
                }
            }
        }

        self.record_usage(usage_before, tracker.usage(), operation, component);

        match failure {
            Some(message) => Err(InvokerError::Reported(message).into()),
            None => Ok(()),
        }
    }

    /// Record the usage observed since `before`
    fn record_usage(
        &self,
        before: UsageTotals,
        after: UsageTotals,
        operation: &str,
        component: Option<&str>,
    ) {
        let input = after.input_tokens.saturating_sub(before.input_tokens);
        let output = after.output_tokens.saturating_sub(before.output_tokens);
        if let Some(cost) = &self.cost {
            if input > 0 || output > 0 {
                cost.record_usage(input, output, operation, component);
            }
        }
    }
}

/// Directory an agent working on `component` runs in.
///
/// Falls back to the repository root when the manifest path does not exist.
pub(crate) fn component_working_dir(component: &Component, repo_path: &Path) -> PathBuf {
    let dir = component.resolve_in(repo_path);
    if dir.is_dir() {
        dir
    } else {
        tracing::warn!(
            "Component path {:?} is not a directory, using repository root",
            dir
        );
        repo_path.to_path_buf()
    }
}

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
