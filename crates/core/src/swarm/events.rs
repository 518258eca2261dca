//! # Build Events
//!
//! Structured progress events and the sink they are delivered to.
//!
//! The core never prints. Every phase reports through a
//! [`ProgressReporter`], and the caller decides where events go (console,
//! log file, channel, job log).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Severity of a build event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// A progress event emitted by a phase or agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    /// Emitting unit ("architecture", a component name, "builder", ...)
    pub scope: String,
    pub message: String,
}

impl BuildEvent {
    pub fn new(level: EventLevel, scope: &str, message: impl Into<String>) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            level,
            scope: scope.to_string(),
            message: message.into(),
        }
    }
}

/// Event ID from wall-clock nanos plus a random suffix
pub(crate) fn event_id() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
pub(crate) fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

/// Receives build events.
///
/// Implementations swallow their own delivery failures; a broken sink
/// must never abort a build.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn notify(&self, event: BuildEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

#[async_trait]
impl ProgressReporter for NullReporter {
    async fn notify(&self, _event: BuildEvent) {}
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl ProgressReporter for TracingReporter {
    async fn notify(&self, event: BuildEvent) {
        match event.level {
            EventLevel::Debug => tracing::debug!(scope = %event.scope, "{}", event.message),
            EventLevel::Info => tracing::info!(scope = %event.scope, "{}", event.message),
            EventLevel::Warning => tracing::warn!(scope = %event.scope, "{}", event.message),
            EventLevel::Error => tracing::error!(scope = %event.scope, "{}", event.message),
        }
    }
}

/// Sends events down an mpsc channel; a closed channel drops them
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<BuildEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<BuildEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressReporter for ChannelReporter {
    async fn notify(&self, event: BuildEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// Adapts a plain synchronous callback taking the message text
pub struct FnReporter<F>(F);

impl<F> FnReporter<F>
where
    F: Fn(&str) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ProgressReporter for FnReporter<F>
where
    F: Fn(&str) + Send + Sync,
{
    async fn notify(&self, event: BuildEvent) {
        (self.0)(&event.message);
    }
}

/// Delivers to several reporters in order
pub struct FanoutReporter {
    reporters: Vec<Arc<dyn ProgressReporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Arc<dyn ProgressReporter>>) -> Self {
        Self { reporters }
    }
}

#[async_trait]
impl ProgressReporter for FanoutReporter {
    async fn notify(&self, event: BuildEvent) {
        for reporter in &self.reporters {
            reporter.notify(event.clone()).await;
        }
    }
}

/// Scoped handle used inside phases and agents
#[derive(Clone)]
pub struct Progress {
    reporter: Arc<dyn ProgressReporter>,
    scope: String,
}

impl Progress {
    pub fn new(reporter: Arc<dyn ProgressReporter>, scope: impl Into<String>) -> Self {
        Self {
            reporter,
            scope: scope.into(),
        }
    }

    /// A handle that drops all events
    pub fn silent() -> Self {
        Self::new(Arc::new(NullReporter), "build")
    }

    /// Same sink, different scope
    pub fn scoped(&self, scope: impl Into<String>) -> Self {
        Self {
            reporter: Arc::clone(&self.reporter),
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        Arc::clone(&self.reporter)
    }

    pub async fn emit(&self, level: EventLevel, message: impl Into<String>) {
        self.reporter
            .notify(BuildEvent::new(level, &self.scope, message))
            .await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warning, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message).await;
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").field("scope", &self.scope).finish()
    }
}
