//! # Manifest Parser
//!
//! Best-effort extraction of an [`ArchitectureManifest`] from the markdown
//! document the architecture agent writes. The input is LLM prose, so
//! nothing here fails: unrecognised values fall back to defaults and
//! missing sections produce an empty field.
//!
//! ```text
//! ## System Type            -> keyword match
//! ## Architecture Diagram   -> first ```mermaid fence
//! ## Components
//! ### Component: <name>     -> one block per component
//! - **Type**: service       -> `**Key**: value` fields
//! ## Analysis Metadata      -> `Key: value` notes
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use super::types::{
    normalize_component_path, ArchitectureManifest, ArchitectureType, Complexity, Component,
    ComponentType, EstimatedSize,
};

static MERMAID_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```mermaid[^\n]*\n(.*?)\n?```").expect("mermaid pattern"));

static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?\*\*([^*]+?)\*\*\s*:?\s*(.*?)\s*$").expect("field pattern")
});

static SIZE_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*)\s*(files?|lines?|loc)").expect("size pattern"));

/// File name of the markdown manifest
pub const MANIFEST_MD: &str = "architecture_manifest.md";
/// File name of the JSON copy
pub const MANIFEST_JSON: &str = "architecture_manifest.json";
/// Upper bound on the parallel agent estimate
pub const MAX_PARALLEL_AGENTS: usize = 10;
pub const ANALYZER_VERSION: &str = "1.0.0";

const DEFAULT_RATIONALE: &str =
    "Components identified from directory structure, build manifests and service boundaries";

/// Parse manifest markdown.
///
/// `generated_at` is supplied by the caller so that parsing is a pure
/// function of its inputs.
pub fn parse_manifest(content: &str, generated_at: DateTime<Utc>) -> ArchitectureManifest {
    let mut components: Vec<Component> = split_component_blocks(content)
        .into_iter()
        .map(|(name, body)| parse_component(&name, &body))
        .collect();
    dedupe_names(&mut components);

    let notes = parse_metadata_notes(content);
    let breakdown_rationale = notes
        .get("breakdown_rationale")
        .cloned()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_RATIONALE.to_string());

    let mut analysis_metadata = BTreeMap::new();
    analysis_metadata.insert(
        "analyzer_version".to_string(),
        serde_json::Value::from(ANALYZER_VERSION),
    );
    analysis_metadata.insert(
        "analysis_duration".to_string(),
        serde_json::Value::from("unknown"),
    );
    if !notes.is_empty() {
        analysis_metadata.insert(
            "manifest_notes".to_string(),
            serde_json::to_value(&notes).unwrap_or_default(),
        );
    }

    ArchitectureManifest {
        system_type: detect_system_type(content),
        architecture_diagram: extract_diagram(content),
        total_components: components.len(),
        estimated_parallel_agents: components.len().min(MAX_PARALLEL_AGENTS),
        components,
        breakdown_rationale,
        analysis_metadata,
        generated_at,
    }
}

/// Rename components whose slug repeats an earlier one to `<name>-<n>`.
///
/// Each component owns `components/<slug>/` and is joined back by name, so
/// both must be unique. Slugs compare case-insensitively.
fn dedupe_names(components: &mut [Component]) {
    let mut taken = BTreeSet::new();
    for component in components.iter_mut() {
        if taken.insert(component.slug().to_lowercase()) {
            continue;
        }
        let base = component.name.trim().to_string();
        let mut n = 2;
        loop {
            let candidate = Component::new(format!("{}-{}", base, n));
            if taken.insert(candidate.slug().to_lowercase()) {
                tracing::warn!("Duplicate component {:?} renamed to {:?}", base, candidate.name);
                component.name = candidate.name;
                break;
            }
            n += 1;
        }
    }
}

/// Body of a `## <title>` section, up to the next `## ` heading
fn section<'a>(content: &'a str, title: &str) -> Option<&'a str> {
    let mut start = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(begin) = start {
            if trimmed.starts_with("## ") {
                return Some(&content[begin..offset]);
            }
        } else if let Some(heading) = trimmed.strip_prefix("## ") {
            if heading.trim().eq_ignore_ascii_case(title) {
                start = Some(offset + line.len());
            }
        }
        offset += line.len();
    }
    start.map(|begin| &content[begin..])
}

/// Keyword classification, preferring the System Type section when present
pub fn detect_system_type(content: &str) -> ArchitectureType {
    let scoped = section(content, "System Type").unwrap_or(content);
    classify(scoped)
}

fn classify(text: &str) -> ArchitectureType {
    let lower = text.to_lowercase();
    if lower.contains("microservice") {
        ArchitectureType::Microservices
    } else if lower.contains("modular_monolith")
        || (lower.contains("monolith") && lower.contains("modular"))
    {
        ArchitectureType::ModularMonolith
    } else if lower.contains("monolith") {
        ArchitectureType::Monolith
    } else if lower.contains("serverless") {
        ArchitectureType::Serverless
    } else if lower.contains("mixed") || lower.contains("hybrid") {
        ArchitectureType::Mixed
    } else {
        ArchitectureType::Unknown
    }
}

/// Contents of the first mermaid fence, or empty
pub fn extract_diagram(content: &str) -> String {
    MERMAID_FENCE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
        .unwrap_or_default()
}

/// `(name, body)` for each `### Component:` block.
///
/// A block ends at the next markdown heading of level 2 or 3.
fn split_component_blocks(content: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, String)> = None;
    let mut in_fence = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence {
            if let Some(rest) = trimmed.strip_prefix("### Component:") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                let name = rest.trim().trim_matches(|c| c == '`' || c == '*').trim();
                current = Some((name.to_string(), String::new()));
                continue;
            }
            if trimmed.starts_with("## ") || trimmed.starts_with("### ") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                continue;
            }
        }
        if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks.retain(|(name, _)| !name.is_empty());
    blocks
}

/// `**Key**: value` pairs (also `**Key:** value`), keys lowercased
fn parse_fields(body: &str) -> Vec<(String, String)> {
    body.lines()
        .filter_map(|line| {
            let caps = FIELD_LINE.captures(line)?;
            let key = caps.get(1)?.as_str().trim().trim_end_matches(':').trim();
            let value = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            Some((key.to_lowercase(), value.to_string()))
        })
        .collect()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().trim_matches('`').trim().to_string())
        .filter(|item| {
            !item.is_empty()
                && !matches!(
                    item.to_lowercase().as_str(),
                    "none" | "n/a" | "-" | "nothing"
                )
        })
        .collect()
}

fn parse_size(value: &str) -> Option<EstimatedSize> {
    let mut size = EstimatedSize::default();
    for caps in SIZE_HINT.captures_iter(value) {
        let number: u64 = caps[1].replace(',', "").parse().ok()?;
        if caps[2].to_lowercase().starts_with("file") {
            size.files = Some(number);
        } else {
            size.lines = Some(number);
        }
    }
    if size.files.is_none() && size.lines.is_none() {
        None
    } else {
        Some(size)
    }
}

fn parse_component(name: &str, body: &str) -> Component {
    let mut component = Component::new(name);
    for (key, value) in parse_fields(body) {
        match key.as_str() {
            "type" => {
                component.component_type = ComponentType::parse_lenient(&value).unwrap_or_default()
            }
            "path" => component.path = normalize_component_path(&value),
            "technology" | "tech" | "technologies" => {
                if !value.is_empty() {
                    component.technology = value;
                }
            }
            "complexity" => {
                component.complexity = Complexity::parse_lenient(&value).unwrap_or_default()
            }
            "dependencies" | "depends on" => component.dependencies = parse_list(&value),
            "description" => component.description = value,
            "entry points" | "entry_points" | "entrypoints" => {
                component.entry_points = parse_list(&value)
            }
            "estimated size" | "estimated_size" | "size" => {
                component.estimated_size = parse_size(&value)
            }
            _ => {}
        }
    }
    component
}

/// `Key: value` lines from the Analysis Metadata section, keys snake_cased
fn parse_metadata_notes(content: &str) -> BTreeMap<String, String> {
    let mut notes = BTreeMap::new();
    let Some(body) = section(content, "Analysis Metadata") else {
        return notes;
    };
    for line in body.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '+']).trim();
        let line = line.replace("**", "");
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase().replace([' ', '-'], "_");
            if !key.is_empty() {
                notes.insert(key, value.trim().to_string());
            }
        }
    }
    notes
}
