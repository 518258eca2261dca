//! # Persisted Settings
//!
//! Optional overrides stored in `.membank/config.json`. Every field is
//! optional; unset fields leave the [`BuildConfig`] default in place.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::config::{BuildConfig, BuildMode, ValidationMode};
use super::io::get_settings_dir;
use crate::invoker::PermissionMode;
use crate::models::ClaudeModel;

pub const SETTINGS_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PersistedSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<BuildMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ClaudeModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_agents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_validators: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_file_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_mode: Option<ValidationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_minimal_tools: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_restart_on_early_termination: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restart_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_siblings_on_fatal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_backoff_ms: Option<u64>,
    /// Path of the claude executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_binary: Option<String>,
}

impl PersistedSettings {
    pub fn default_path() -> PathBuf {
        get_settings_dir().join(SETTINGS_FILE)
    }

    /// Load settings; a missing or unreadable file yields defaults
    pub async fn load_from(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub async fn load() -> Self {
        Self::load_from(&Self::default_path()).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write settings: {:?}", path))
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()).await
    }

    /// Fields set in `other` win
    pub fn merge(&mut self, other: PersistedSettings) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            mode,
            model,
            max_turns,
            max_concurrent_agents,
            max_concurrent_validators,
            min_file_bytes,
            validation_mode,
            permission_mode,
            use_minimal_tools,
            auto_restart_on_early_termination,
            max_restart_attempts,
            unit_timeout_secs,
            phase_timeout_secs,
            build_timeout_secs,
            cancel_siblings_on_fatal,
            restart_backoff_ms,
            claude_binary
        );
    }

    /// Set one field from a string, as typed on the command line.
    ///
    /// The value is read as JSON when possible (`10`, `true`) and as a
    /// plain string otherwise (`two_pass`).
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        let mut update = serde_json::Map::new();
        update.insert(key.to_string(), value);
        let parsed: PersistedSettings = serde_json::from_value(serde_json::Value::Object(update))
            .with_context(|| format!("Invalid setting {} = {}", key, raw))?;
        self.merge(parsed);
        Ok(())
    }

    /// Overlay onto a build configuration
    pub fn apply_to(&self, config: &mut BuildConfig) {
        if let Some(v) = self.mode {
            config.mode = v;
        }
        if let Some(v) = self.model {
            config.model = v;
        }
        if let Some(v) = self.max_turns {
            config.max_turns = v;
        }
        if let Some(v) = self.max_concurrent_agents {
            config.max_concurrent_agents = v;
        }
        if let Some(v) = self.max_concurrent_validators {
            config.max_concurrent_validators = v;
        }
        if let Some(v) = self.min_file_bytes {
            config.min_file_bytes = v;
        }
        if let Some(v) = self.validation_mode {
            config.validation_mode = v;
        }
        if let Some(v) = self.permission_mode {
            config.permission_mode = v;
        }
        if let Some(v) = self.use_minimal_tools {
            config.use_minimal_tools = v;
        }
        if let Some(v) = self.auto_restart_on_early_termination {
            config.auto_restart_on_early_termination = v;
        }
        if let Some(v) = self.max_restart_attempts {
            config.max_restart_attempts = v;
        }
        if self.unit_timeout_secs.is_some() {
            config.unit_timeout_secs = self.unit_timeout_secs;
        }
        if self.phase_timeout_secs.is_some() {
            config.phase_timeout_secs = self.phase_timeout_secs;
        }
        if self.build_timeout_secs.is_some() {
            config.build_timeout_secs = self.build_timeout_secs;
        }
        if let Some(v) = self.cancel_siblings_on_fatal {
            config.cancel_siblings_on_fatal = v;
        }
        if let Some(v) = self.restart_backoff_ms {
            config.restart_backoff_ms = v;
        }
    }
}
