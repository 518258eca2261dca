//! Scripted agent backend shared by the scenario tests.

use async_trait::async_trait;
use futures::StreamExt;
use membank_core::invoker::{AgentEvent, AgentInvoker, EventStream, InvocationKind, InvocationRequest};
use membank_core::InvokerError;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const COMPONENT_FILES: [&str; 6] = [
    "projectbrief.md",
    "techContext.md",
    "systemPatterns.md",
    "activeContext.md",
    "progress.md",
    "api_contracts.md",
];

type Script = Box<dyn Fn(&InvocationRequest) -> Result<Vec<AgentEvent>, InvokerError> + Send + Sync>;

/// Runs a closure per request, optionally holding each invocation open for
/// `delay` while recording how many were open at once.
pub struct ScriptedBackend {
    script: Script,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedBackend {
    pub fn new(
        script: impl Fn(&InvocationRequest) -> Result<Vec<AgentEvent>, InvokerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn labels(&self, kind: InvocationKind) -> Vec<String> {
        let mut labels: Vec<String> = self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.label.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedBackend {
    async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, InvokerError> {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = (self.script)(&request);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(futures::stream::iter(outcome?).boxed())
    }
}

pub fn write(path: &Path, content: &str) -> AgentEvent {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    AgentEvent::write(path.to_string_lossy())
}

/// Manifest markdown declaring `names` as components
pub fn manifest(names: &[&str]) -> String {
    let mut out = String::from("## System Type\nMicroservices\n\n## Components\n");
    for name in names {
        out.push_str(&format!(
            "\n### Component: {name}\n- **Type**: service\n- **Path**: services/{name}\n"
        ));
    }
    out
}

/// Architecture writes `manifest`, components write six full files unless
/// `failing` names them, validators pass.
pub fn standard_script(
    manifest: String,
    failing: &'static [&'static str],
) -> impl Fn(&InvocationRequest) -> Result<Vec<AgentEvent>, InvokerError> + Send + Sync + 'static {
    move |req| match req.kind {
        InvocationKind::Architecture => Ok(vec![write(
            &req.artifact_dir.join("architecture_manifest.md"),
            &manifest,
        )]),
        InvocationKind::Component if failing.contains(&req.label.as_str()) => {
            Err(InvokerError::Process(format!("{} crashed", req.label)))
        }
        InvocationKind::Component => Ok(COMPONENT_FILES
            .iter()
            .map(|f| write(&req.artifact_dir.join(f), &"content ".repeat(40)))
            .collect()),
        InvocationKind::Validation => Ok(vec![write(
            &req.artifact_dir.join("validation_report.json"),
            r#"{"overall_status": "PASS", "completeness_score": 90, "accuracy_score": 95}"#,
        )]),
        InvocationKind::MemoryBank => Ok(vec![AgentEvent::text("nothing to write")]),
    }
}
