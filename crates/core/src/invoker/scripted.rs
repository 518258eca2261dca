//! In-memory invoker for unit tests.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{AgentEvent, AgentInvoker, EventStream, InvocationRequest};
use crate::error::InvokerError;

type Script =
    Box<dyn Fn(&InvocationRequest) -> Result<Vec<AgentEvent>, InvokerError> + Send + Sync>;

/// Runs a closure per request and streams back whatever it returns
pub(crate) struct ScriptedInvoker {
    script: Script,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedInvoker {
    pub(crate) fn new(
        script: impl Fn(&InvocationRequest) -> Result<Vec<AgentEvent>, InvokerError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<InvocationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, InvokerError> {
        self.requests.lock().unwrap().push(request.clone());
        let events = (self.script)(&request)?;
        Ok(futures::stream::iter(events).boxed())
    }
}

/// Write `bytes` filler bytes to `path` and return the matching event
pub(crate) fn write_file(path: &Path, bytes: usize) -> AgentEvent {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, "x".repeat(bytes)).unwrap();
    AgentEvent::write(path.to_string_lossy())
}

/// Write `content` to `path` and return the matching event
pub(crate) fn write_text(path: &Path, content: &str) -> AgentEvent {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    AgentEvent::write(path.to_string_lossy())
}
