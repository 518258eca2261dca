//! # Swarm Orchestration
//!
//! Coordinates the agents into a build.
//!
//! ## Multi-Agent Flow
//!
//! ```text
//! Repository → Architecture Agent → manifest
//!            → Component Agents (bounded fan-out) → per-component memory banks
//!            → Validation Agents (bounded fan-out) → reports and fixes
//! ```
//!
//! FULL and INCREMENTAL builds use the [`SinglePhaseBuilder`] instead.

pub mod builder;
pub mod bulkhead;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod single_builder;
pub mod validation_orchestrator;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BuildError, Result};
use crate::invoker::AgentInvoker;
use crate::state::config::{BuildConfig, BuildMode, BuildResult};
use crate::state::job::{BuildJob, JobLog};

pub use builder::MultiAgentBuilder;
pub use bulkhead::{run_bulkhead, BulkheadPolicy, UnitFailure, UnitReport};
pub use events::{
    BuildEvent, ChannelReporter, EventLevel, FanoutReporter, FnReporter, NullReporter, Progress,
    ProgressReporter, TracingReporter,
};
pub use orchestrator::{OrchestrationAgent, OrchestrationResult};
pub use pipeline::{BuildStage, Pipeline};
pub use single_builder::{RestartController, RestartDecision, SinglePhaseBuilder};
pub use validation_orchestrator::{ValidationOrchestrationResult, ValidationOrchestrator};

/// Await `fut`, failing with a [`BuildError::Timeout`] once `limit` passes
pub(crate) async fn within<T>(
    scope: &str,
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BuildError::timeout(scope, limit.as_secs()))?,
        None => fut.await,
    }
}

/// Run the builder `config.mode` selects, under the optional build timeout
pub async fn run_build(
    config: &BuildConfig,
    invoker: Arc<dyn AgentInvoker>,
    progress: &Progress,
) -> BuildResult {
    let build = async {
        match config.mode {
            BuildMode::MultiAgent => {
                MultiAgentBuilder::new(invoker)
                    .build_memory_bank(config, progress)
                    .await
            }
            BuildMode::Full | BuildMode::Incremental => {
                SinglePhaseBuilder::new(invoker)
                    .build_memory_bank(config, progress)
                    .await
            }
        }
    };

    match config.build_timeout() {
        Some(limit) => match tokio::time::timeout(limit, build).await {
            Ok(result) => result,
            Err(_) => {
                let error = BuildError::timeout("Build", limit.as_secs());
                tracing::error!("{}", error);
                progress.error(error.to_string()).await;
                BuildResult::failure(config.output_path.clone(), error)
            }
        },
        None => build.await,
    }
}

/// Run `job` to completion, logging progress into it and to `extra` if given.
///
/// Returns the job in its terminal state, persisted to the output directory.
pub async fn run_job(
    job: BuildJob,
    invoker: Arc<dyn AgentInvoker>,
    extra: Option<Arc<dyn ProgressReporter>>,
) -> Result<BuildJob> {
    let config = job.config.clone();
    let log = JobLog::new(job);
    log.start().await?;

    let reporter: Arc<dyn ProgressReporter> = match extra {
        Some(extra) => Arc::new(FanoutReporter::new(vec![Arc::new(log.clone()), extra])),
        None => Arc::new(log.clone()),
    };
    let progress = Progress::new(reporter, "builder");

    let result = run_build(&config, invoker, &progress).await;
    log.finish(result).await
}
