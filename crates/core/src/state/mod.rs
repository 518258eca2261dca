//! # Build State
//!
//! Configuration, persisted settings, job tracking and the file helpers
//! every phase writes its artifacts with.

pub mod config;
pub mod io;
pub mod job;
pub mod settings;

pub use config::{BuildConfig, BuildMode, BuildResult, ValidationMode};
pub use job::{BuildJob, JobLog, JobStatus, JobType, LogFlushCounter};
pub use settings::PersistedSettings;
