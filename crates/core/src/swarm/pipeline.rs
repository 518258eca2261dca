//! # Build Stages
//!
//! State machine of the multi-agent build.
//!
//! ```text
//! ArchitecturePending → ArchitectureDone
//!     → [ComponentsPending → ComponentsDone]
//!     → [ValidationPending → ValidationDone]
//!     → BuildComplete
//! ```
//!
//! Bracketed phases may be skipped. `BuildFailed` is reachable from any
//! non-terminal stage.

use serde::{Deserialize, Serialize};

/// Stage of a multi-agent build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStage {
    ArchitecturePending,
    ArchitectureDone,
    ComponentsPending,
    ComponentsDone,
    ValidationPending,
    ValidationDone,
    BuildComplete,
    BuildFailed,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::ArchitecturePending => "ARCHITECTURE_PENDING",
            BuildStage::ArchitectureDone => "ARCHITECTURE_DONE",
            BuildStage::ComponentsPending => "COMPONENTS_PENDING",
            BuildStage::ComponentsDone => "COMPONENTS_DONE",
            BuildStage::ValidationPending => "VALIDATION_PENDING",
            BuildStage::ValidationDone => "VALIDATION_DONE",
            BuildStage::BuildComplete => "BUILD_COMPLETE",
            BuildStage::BuildFailed => "BUILD_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStage::BuildComplete | BuildStage::BuildFailed)
    }
}

/// The pipeline state machine with its transition history
#[derive(Debug, Clone)]
pub struct Pipeline {
    stage: BuildStage,
    history: Vec<BuildStage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: BuildStage::ArchitecturePending,
            history: vec![BuildStage::ArchitecturePending],
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    /// Every stage entered, in order
    pub fn history(&self) -> &[BuildStage] {
        &self.history
    }

    fn enter(&mut self, stage: BuildStage) {
        if self.stage != stage {
            self.stage = stage;
            self.history.push(stage);
        }
    }

    /// Advance to the next stage
    pub fn advance(&mut self) {
        let next = match self.stage {
            BuildStage::ArchitecturePending => BuildStage::ArchitectureDone,
            BuildStage::ArchitectureDone => BuildStage::ComponentsPending,
            BuildStage::ComponentsPending => BuildStage::ComponentsDone,
            BuildStage::ComponentsDone => BuildStage::ValidationPending,
            BuildStage::ValidationPending => BuildStage::ValidationDone,
            BuildStage::ValidationDone => BuildStage::BuildComplete,
            terminal => terminal,
        };
        self.enter(next);
    }

    /// Skip the phase that would start next.
    ///
    /// From `ArchitectureDone` this jumps over the component phase, from
    /// `ComponentsDone` over validation.
    pub fn skip_phase(&mut self) {
        let next = match self.stage {
            BuildStage::ArchitectureDone => BuildStage::ComponentsDone,
            BuildStage::ComponentsDone => BuildStage::ValidationDone,
            other => other,
        };
        self.enter(next);
    }

    /// Fail the pipeline
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.enter(BuildStage::BuildFailed);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.stage == BuildStage::BuildComplete
    }

    /// History as the strings used in build metadata
    pub fn history_names(&self) -> Vec<&'static str> {
        self.history.iter().map(BuildStage::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_run() {
        let mut pipeline = Pipeline::new();
        for _ in 0..6 {
            pipeline.advance();
        }
        assert!(pipeline.is_success());
        assert_eq!(pipeline.history().len(), 7);

        pipeline.advance();
        assert_eq!(pipeline.stage(), BuildStage::BuildComplete);
    }

    #[test]
    fn test_skipping_components_and_validation() {
        let mut pipeline = Pipeline::new();
        pipeline.advance();
        pipeline.skip_phase();
        assert_eq!(pipeline.stage(), BuildStage::ComponentsDone);
        pipeline.skip_phase();
        assert_eq!(pipeline.stage(), BuildStage::ValidationDone);
        pipeline.advance();

        assert_eq!(
            pipeline.history(),
            &[
                BuildStage::ArchitecturePending,
                BuildStage::ArchitectureDone,
                BuildStage::ComponentsDone,
                BuildStage::ValidationDone,
                BuildStage::BuildComplete,
            ]
        );
    }

    #[test]
    fn test_failure_is_absorbing() {
        let mut pipeline = Pipeline::new();
        pipeline.fail();
        assert_eq!(pipeline.stage(), BuildStage::BuildFailed);
        pipeline.advance();
        pipeline.fail();
        assert_eq!(pipeline.stage(), BuildStage::BuildFailed);
        assert!(!pipeline.is_success());
        assert_eq!(
            pipeline.history_names(),
            vec!["ARCHITECTURE_PENDING", "BUILD_FAILED"]
        );
    }
}
