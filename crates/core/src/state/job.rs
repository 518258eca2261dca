//! # Build Jobs
//!
//! Job-tracking wrapper around a build: lifecycle status, a log of
//! progress messages, and periodic persistence of both.
//!
//! ```text
//! Pending → Running → Completed | Failed | Cancelled
//! ```
//! Terminal states are absorbing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::config::{BuildConfig, BuildResult};
use super::io::write_json;
use crate::error::{BuildError, Result};
use crate::swarm::events::{event_id, BuildEvent, EventLevel, ProgressReporter};

/// File the job log is persisted to, inside the build output directory
pub const JOB_FILE: &str = "build_job.json";
/// Persist the job after this many new log entries
pub const LOG_FLUSH_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Build,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub scope: String,
    pub message: String,
}

/// A tracked build execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: BuildConfig,
    pub memory_bank_name: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub logs: Vec<JobLogEntry>,
    pub error_message: Option<String>,
    pub result: Option<BuildResult>,
}

impl BuildJob {
    pub fn new(config: BuildConfig, job_type: JobType) -> Self {
        let memory_bank_name = config
            .repo_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "memory-bank".to_string());
        Self {
            id: event_id(),
            job_type,
            status: JobStatus::Pending,
            config,
            memory_bank_name,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            logs: Vec::new(),
            error_message: None,
            result: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (
                    JobStatus::Pending | JobStatus::Running,
                    JobStatus::Failed | JobStatus::Cancelled
                )
        );
        if !allowed {
            return Err(BuildError::config(format!(
                "Job {} cannot move from {:?} to {:?}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        if to == JobStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)
    }

    /// Record the build outcome; an unsuccessful result fails the job
    pub fn complete(&mut self, result: BuildResult) -> Result<()> {
        if result.success {
            self.transition(JobStatus::Completed)?;
        } else {
            self.transition(JobStatus::Failed)?;
            self.error_message = Some(result.errors.join("; "));
        }
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelled)
    }

    pub fn log(&mut self, level: EventLevel, scope: &str, message: impl Into<String>) {
        self.logs.push(JobLogEntry {
            timestamp: Utc::now(),
            level,
            scope: scope.to_string(),
            message: message.into(),
        });
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self).await
    }
}

/// Counts new log entries and says when a flush is due
#[derive(Debug, Clone)]
pub struct LogFlushCounter {
    every: usize,
    pending: usize,
}

impl LogFlushCounter {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            pending: 0,
        }
    }

    /// Count one entry; true when the caller should flush now
    pub fn record(&mut self) -> bool {
        self.pending += 1;
        if self.pending >= self.every {
            self.pending = 0;
            true
        } else {
            false
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }
}

struct JobLogState {
    job: BuildJob,
    counter: LogFlushCounter,
}

/// Progress sink that appends to a job's log and persists it periodically
#[derive(Clone)]
pub struct JobLog {
    state: Arc<Mutex<JobLogState>>,
    path: PathBuf,
}

impl JobLog {
    /// Persist to `{output}/build_job.json`
    pub fn new(job: BuildJob) -> Self {
        let path = job.config.output_path.join(JOB_FILE);
        Self::with_path(job, path, LOG_FLUSH_EVERY)
    }

    pub fn with_path(job: BuildJob, path: PathBuf, flush_every: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(JobLogState {
                job,
                counter: LogFlushCounter::new(flush_every),
            })),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> BuildJob {
        self.state.lock().await.job.clone()
    }

    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.job.start()?;
        state.job.save(&self.path).await
    }

    /// Record the result and persist the final job state
    pub async fn finish(&self, result: BuildResult) -> Result<BuildJob> {
        let mut state = self.state.lock().await;
        state.job.complete(result)?;
        state.job.save(&self.path).await?;
        Ok(state.job.clone())
    }

    pub async fn cancel(&self) -> Result<BuildJob> {
        let mut state = self.state.lock().await;
        state.job.cancel()?;
        state.job.save(&self.path).await?;
        Ok(state.job.clone())
    }
}

#[async_trait]
impl ProgressReporter for JobLog {
    async fn notify(&self, event: BuildEvent) {
        let mut state = self.state.lock().await;
        state.job.log(event.level, &event.scope, event.message);
        if state.counter.record() {
            if let Err(e) = state.job.save(&self.path).await {
                tracing::warn!("Failed to persist job log: {}", e);
            }
        }
    }
}
