//! Manifest data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component as PathPart, Path, PathBuf};

/// Kind of logical subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    #[default]
    Service,
    Frontend,
    Backend,
    Library,
    Module,
    Worker,
    ApiGateway,
    Database,
}

impl ComponentType {
    /// Tolerant parse of LLM prose ("API Gateway", "api-gateway", "Library crate")
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let norm = normalize_token(raw);
        let exact = match norm.as_str() {
            "service" | "microservice" => Some(ComponentType::Service),
            "frontend" | "front_end" | "ui" | "web" => Some(ComponentType::Frontend),
            "backend" | "back_end" | "server" => Some(ComponentType::Backend),
            "library" | "lib" | "package" | "crate" => Some(ComponentType::Library),
            "module" => Some(ComponentType::Module),
            "worker" | "job" | "jobs" => Some(ComponentType::Worker),
            "api_gateway" | "gateway" => Some(ComponentType::ApiGateway),
            "database" | "db" | "storage" => Some(ComponentType::Database),
            _ => None,
        };
        exact.or_else(|| {
            // First recognised word wins ("library crate", "background worker")
            norm.split('_').find_map(|word| match word {
                "gateway" => Some(ComponentType::ApiGateway),
                "frontend" => Some(ComponentType::Frontend),
                "backend" => Some(ComponentType::Backend),
                "library" => Some(ComponentType::Library),
                "module" => Some(ComponentType::Module),
                "worker" => Some(ComponentType::Worker),
                "database" => Some(ComponentType::Database),
                "service" => Some(ComponentType::Service),
                _ => None,
            })
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Service => "service",
            ComponentType::Frontend => "frontend",
            ComponentType::Backend => "backend",
            ComponentType::Library => "library",
            ComponentType::Module => "module",
            ComponentType::Worker => "worker",
            ComponentType::ApiGateway => "api_gateway",
            ComponentType::Database => "database",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let norm = normalize_token(raw);
        if norm.starts_with("low") || norm == "simple" {
            Some(Complexity::Low)
        } else if norm.starts_with("high") || norm == "complex" {
            Some(Complexity::High)
        } else if norm.starts_with("medium") || norm.starts_with("moderate") {
            Some(Complexity::Medium)
        } else {
            None
        }
    }
}

/// Overall system shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureType {
    Microservices,
    Monolith,
    ModularMonolith,
    Serverless,
    Mixed,
    #[default]
    Unknown,
}

impl ArchitectureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchitectureType::Microservices => "microservices",
            ArchitectureType::Monolith => "monolith",
            ArchitectureType::ModularMonolith => "modular_monolith",
            ArchitectureType::Serverless => "serverless",
            ArchitectureType::Mixed => "mixed",
            ArchitectureType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ArchitectureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rough size hint for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EstimatedSize {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<u64>,
}

/// A logical subsystem of the analyzed repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    /// Repository-relative subtree
    pub path: String,
    pub technology: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_size: Option<EstimatedSize>,
}

impl Component {
    /// Component with default metadata
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component_type: ComponentType::default(),
            path: ".".to_string(),
            technology: "unknown".to_string(),
            complexity: Complexity::default(),
            dependencies: Vec::new(),
            description: String::new(),
            entry_points: Vec::new(),
            estimated_size: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = normalize_component_path(&path.into());
        self
    }

    pub fn with_type(mut self, component_type: ComponentType) -> Self {
        self.component_type = component_type;
        self
    }

    /// Directory-safe form of the name, used for output paths
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let slug = slug.trim_matches(|c| c == '-' || c == '.').to_string();
        if slug.is_empty() {
            "component".to_string()
        } else {
            slug
        }
    }

    /// Absolute subtree inside `repo_root`.
    ///
    /// Paths that would escape the repository resolve to the root.
    pub fn resolve_in(&self, repo_root: &Path) -> PathBuf {
        let relative = Path::new(&self.path);
        let escapes = relative
            .components()
            .any(|part| !matches!(part, PathPart::Normal(_) | PathPart::CurDir));
        if escapes {
            return repo_root.to_path_buf();
        }
        repo_root.join(relative)
    }
}

/// Strip decoration and leading separators so the path stays repo-relative
pub fn normalize_component_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('`').trim();
    let trimmed = trimmed.trim_start_matches("./").trim_start_matches('/');
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_token(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '`' || c == '*' || c == '"')
        .to_ascii_lowercase()
        .replace([' ', '-', '/'], "_")
}

/// Structured output of the architecture phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureManifest {
    pub system_type: ArchitectureType,
    pub architecture_diagram: String,
    pub components: Vec<Component>,
    /// Always `components.len()`
    pub total_components: usize,
    pub estimated_parallel_agents: usize,
    pub breakdown_rationale: String,
    #[serde(default)]
    pub analysis_metadata: BTreeMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
}

impl ArchitectureManifest {
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Condensed context handed to component agents
    pub fn summary(&self) -> String {
        let mut out = format!("System Type: {}\n\nComponents:\n", self.system_type);
        for component in &self.components {
            out.push_str(&format!(
                "- {} ({}): {}\n",
                component.name, component.component_type, component.path
            ));
            let deps = if component.dependencies.is_empty() {
                "none".to_string()
            } else {
                component.dependencies.join(", ")
            };
            out.push_str(&format!(
                "  Technology: {}, Dependencies: {}\n",
                component.technology, deps
            ));
        }
        if !self.architecture_diagram.is_empty() {
            out.push_str("\nArchitecture Diagram:\n");
            out.push_str(&self.architecture_diagram);
            out.push('\n');
        }
        out.push_str(&format!("\nTotal Components: {}", self.total_components));
        out
    }
}
