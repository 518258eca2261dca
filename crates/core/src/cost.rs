//! # Cost Calculator
//!
//! Accumulates token usage from agent invocations and folds it into a
//! monetary breakdown using the model's pricing table.
//!
//! Reporting only: nothing in the build consults these numbers to make a
//! decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::models::{ClaudeModel, ModelPricing};
use crate::state::io::write_json;

/// File written by [`CostCalculator::save_cost_report`]
pub const COST_REPORT_FILE: &str = "cost_analysis.json";

/// Operation names used by the phases
pub const OP_ARCHITECTURE: &str = "architecture_analysis";
pub const OP_COMPONENT: &str = "component_analysis";
pub const OP_VALIDATION: &str = "validation";
pub const OP_MEMORY_BANK: &str = "memory_bank_generation";

/// One recorded invocation's token usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub operation_name: String,
    #[serde(default)]
    pub component_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TokenUsage {
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        operation_name: &str,
        component_name: Option<&str>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            operation_name: operation_name.to_string(),
            component_name: component_name.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Costs of one group of usage entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLine {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl CostLine {
    fn add(&mut self, input: u64, output: u64, cost: f64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.cost += cost;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub model_used: ClaudeModel,
    pub phase_costs: BTreeMap<String, CostLine>,
    pub component_costs: BTreeMap<String, CostLine>,
    pub operation_costs: BTreeMap<String, CostLine>,
}

/// Low / expected / high cost for a token budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub total_tokens: u64,
    pub model: ClaudeModel,
    pub low: f64,
    pub expected: f64,
    pub high: f64,
}

/// Display grouping for an operation
pub fn phase_label(operation: &str) -> String {
    match operation {
        OP_ARCHITECTURE => "Phase 1: Architecture".to_string(),
        OP_COMPONENT => "Phase 2: Components".to_string(),
        OP_VALIDATION => "Phase 3: Validation".to_string(),
        other => other.to_string(),
    }
}

/// Pure fold of usage entries under one pricing table
pub fn fold_costs(usage: &[TokenUsage], model: ClaudeModel) -> CostBreakdown {
    let pricing = model.pricing();
    let mut breakdown = CostBreakdown {
        model_used: model,
        ..CostBreakdown::default()
    };

    for entry in usage {
        let input_cost = pricing.input_cost(entry.input_tokens);
        let output_cost = pricing.output_cost(entry.output_tokens);
        let cost = input_cost + output_cost;

        breakdown.total_input_tokens += entry.input_tokens;
        breakdown.total_output_tokens += entry.output_tokens;
        breakdown.input_cost += input_cost;
        breakdown.output_cost += output_cost;
        breakdown.total_cost += cost;

        breakdown
            .phase_costs
            .entry(phase_label(&entry.operation_name))
            .or_default()
            .add(entry.input_tokens, entry.output_tokens, cost);
        breakdown
            .operation_costs
            .entry(entry.operation_name.clone())
            .or_default()
            .add(entry.input_tokens, entry.output_tokens, cost);
        if let Some(component) = &entry.component_name {
            breakdown
                .component_costs
                .entry(component.clone())
                .or_default()
                .add(entry.input_tokens, entry.output_tokens, cost);
        }
    }

    breakdown
}

/// Estimate assuming a 60/40 input/output split, range x0.7 to x1.5
pub fn estimate_cost(total_tokens: u64, model: ClaudeModel) -> CostEstimate {
    let pricing: ModelPricing = model.pricing();
    let input = (total_tokens as f64 * 0.6).round() as u64;
    let output = total_tokens.saturating_sub(input);
    let expected = pricing.input_cost(input) + pricing.output_cost(output);
    CostEstimate {
        total_tokens,
        model,
        low: expected * 0.7,
        expected,
        high: expected * 1.5,
    }
}

/// Thread-safe usage accumulator
#[derive(Debug)]
pub struct CostCalculator {
    model: ClaudeModel,
    usage: Mutex<Vec<TokenUsage>>,
}

impl CostCalculator {
    pub fn new(model: ClaudeModel) -> Self {
        Self {
            model,
            usage: Mutex::new(Vec::new()),
        }
    }

    pub fn model(&self) -> ClaudeModel {
        self.model
    }

    pub fn record_usage(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        operation_name: &str,
        component_name: Option<&str>,
    ) {
        let entry = TokenUsage::new(input_tokens, output_tokens, operation_name, component_name);
        self.usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Snapshot of recorded usage, in recording order
    pub fn usage(&self) -> Vec<TokenUsage> {
        self.usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn calculate_costs(&self) -> CostBreakdown {
        fold_costs(&self.usage(), self.model)
    }

    /// Write `cost_analysis.json` into `output_dir`
    pub async fn save_cost_report(&self, output_dir: &Path) -> Result<PathBuf> {
        let usage = self.usage();
        let report = serde_json::json!({
            "generated_at": Utc::now(),
            "model": self.model,
            "pricing": self.model.pricing(),
            "breakdown": fold_costs(&usage, self.model),
            "usage": usage,
        });
        let path = output_dir.join(COST_REPORT_FILE);
        write_json(&path, &report).await?;
        Ok(path)
    }
}
