//! # Build Configuration
//!
//! The single configuration object threaded through a build, and the
//! terminal result every build produces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BuildError, Result};
use crate::invoker::PermissionMode;
use crate::models::ClaudeModel;

/// Hard ceiling on concurrent component agents
pub const MAX_COMPONENT_CONCURRENCY: usize = 15;
/// Hard ceiling on concurrent validators
pub const MAX_VALIDATOR_CONCURRENCY: usize = 10;
/// Default quality gate: files at or below this size count as stubs
pub const DEFAULT_MIN_FILE_BYTES: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Single agent writes the whole memory bank
    Full,
    /// Single agent updates an existing memory bank from a diff
    Incremental,
    /// Architecture, component and validation phases
    #[default]
    MultiAgent,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Full => "full",
            BuildMode::Incremental => "incremental",
            BuildMode::MultiAgent => "multi_agent",
        }
    }

    /// Whether the restart controller should stop on a no-progress attempt
    pub fn default_stall_detection(&self) -> bool {
        !matches!(self, BuildMode::Incremental)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full" => Ok(BuildMode::Full),
            "incremental" => Ok(BuildMode::Incremental),
            "multi_agent" | "multi" => Ok(BuildMode::MultiAgent),
            other => Err(format!(
                "Unknown build mode '{}' (expected full, incremental or multi-agent)",
                other
            )),
        }
    }
}

/// How the validation phase uses its agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// One invocation diagnoses and repairs
    #[default]
    SinglePass,
    /// A read-only diagnosis invocation, then a repair invocation
    TwoPass,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::SinglePass => "single_pass",
            ValidationMode::TwoPass => "two_pass",
        }
    }
}

/// Configuration for one build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub repo_path: PathBuf,
    pub output_path: PathBuf,
    pub mode: BuildMode,
    /// Single-phase builder system prompt; a bundled default is used when unset
    pub system_prompt_path: Option<PathBuf>,
    pub max_turns: u32,
    pub auto_restart_on_early_termination: bool,
    pub max_restart_attempts: u32,
    pub permission_mode: PermissionMode,
    pub use_minimal_tools: bool,
    pub model: ClaudeModel,
    pub max_concurrent_agents: usize,
    pub max_concurrent_validators: usize,
    pub min_file_bytes: u64,
    pub validation_mode: ValidationMode,
    pub skip_validation: bool,
    pub unit_timeout_secs: Option<u64>,
    pub phase_timeout_secs: Option<u64>,
    pub build_timeout_secs: Option<u64>,
    pub cancel_siblings_on_fatal: bool,
    /// Overrides the mode's default stall detection
    pub stall_detection: Option<bool>,
    /// Base delay between restart attempts; 0 retries immediately
    pub restart_backoff_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            output_path: PathBuf::from("memory-bank-output"),
            mode: BuildMode::default(),
            system_prompt_path: None,
            max_turns: 5000,
            auto_restart_on_early_termination: true,
            max_restart_attempts: 3,
            permission_mode: PermissionMode::AcceptEdits,
            use_minimal_tools: false,
            model: ClaudeModel::default(),
            max_concurrent_agents: MAX_COMPONENT_CONCURRENCY,
            max_concurrent_validators: MAX_VALIDATOR_CONCURRENCY,
            min_file_bytes: DEFAULT_MIN_FILE_BYTES,
            validation_mode: ValidationMode::default(),
            skip_validation: false,
            unit_timeout_secs: None,
            phase_timeout_secs: None,
            build_timeout_secs: None,
            cancel_siblings_on_fatal: false,
            stall_detection: None,
            restart_backoff_ms: 0,
        }
    }
}

impl BuildConfig {
    pub fn new(repo_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Reject settings no build can run with
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(BuildError::config("max_turns must be at least 1"));
        }
        if self.max_concurrent_agents == 0 || self.max_concurrent_validators == 0 {
            return Err(BuildError::config("concurrency limits must be at least 1"));
        }
        Ok(())
    }

    pub fn architecture_turns(&self) -> u32 {
        self.max_turns.max(1)
    }

    pub fn component_turns(&self) -> u32 {
        (self.max_turns / 2).max(1)
    }

    pub fn validator_turns(&self) -> u32 {
        (self.max_turns / 4).max(1)
    }

    /// Component concurrency for a manifest of `component_count` entries
    pub fn component_concurrency(&self, component_count: usize) -> usize {
        self.max_concurrent_agents
            .min(MAX_COMPONENT_CONCURRENCY)
            .min(component_count)
            .max(1)
    }

    pub fn stall_detection_enabled(&self) -> bool {
        self.stall_detection
            .unwrap_or_else(|| self.mode.default_stall_detection())
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }
}

/// Terminal outcome of a build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub files_written: Vec<PathBuf>,
    /// Flat map the job layer renders from
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub errors: Vec<String>,
}

impl BuildResult {
    pub fn failure(output_path: PathBuf, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            output_path,
            errors: vec![error.to_string()],
            ..Self::default()
        }
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.max_turns, 5000);
        assert_eq!(config.mode, BuildMode::MultiAgent);
        assert_eq!(config.min_file_bytes, 100);
        assert!(config.unit_timeout().is_none());
        assert!(!config.cancel_siblings_on_fatal);
    }

    #[test]
    fn test_turn_budgets() {
        let config = BuildConfig::default().with_max_turns(400);
        assert_eq!(config.architecture_turns(), 400);
        assert_eq!(config.component_turns(), 200);
        assert_eq!(config.validator_turns(), 100);

        let tiny = BuildConfig::default().with_max_turns(1);
        assert_eq!(tiny.validator_turns(), 1);
    }

    #[test]
    fn test_component_concurrency() {
        let mut config = BuildConfig::default();
        assert_eq!(config.component_concurrency(40), 15);
        assert_eq!(config.component_concurrency(3), 3);
        config.max_concurrent_agents = 2;
        assert_eq!(config.component_concurrency(40), 2);
        assert_eq!(config.component_concurrency(0), 1);
    }

    #[test]
    fn test_stall_detection_per_mode() {
        let full = BuildConfig::default().with_mode(BuildMode::Full);
        let incremental = BuildConfig::default().with_mode(BuildMode::Incremental);
        assert!(full.stall_detection_enabled());
        assert!(!incremental.stall_detection_enabled());

        let mut forced = incremental.clone();
        forced.stall_detection = Some(true);
        assert!(forced.stall_detection_enabled());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("multi-agent".parse::<BuildMode>(), Ok(BuildMode::MultiAgent));
        assert_eq!("FULL".parse::<BuildMode>(), Ok(BuildMode::Full));
        assert!("turbo".parse::<BuildMode>().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BuildConfig =
            serde_json::from_str(r#"{"repo_path": "/src/app", "mode": "full"}"#).unwrap();
        assert_eq!(config.repo_path, PathBuf::from("/src/app"));
        assert_eq!(config.mode, BuildMode::Full);
        assert_eq!(config.max_restart_attempts, 3);
    }

    #[test]
    fn test_validate() {
        assert!(BuildConfig::default().validate().is_ok());
        let mut bad = BuildConfig::default();
        bad.max_concurrent_validators = 0;
        assert!(bad.validate().is_err());
    }
}
