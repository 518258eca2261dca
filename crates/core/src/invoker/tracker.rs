//! Turn and artifact bookkeeping for one invocation stream.

use serde::{Deserialize, Serialize};

use super::AgentEvent;

/// Token totals observed on a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Something the caller may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerSignal {
    /// A `Write` targeted this path
    Wrote(String),
    /// Turn count crossed the warning threshold (emitted once)
    NearTurnLimit { turn_count: u32, max_turns: u32 },
    /// Periodic progress checkpoint
    Checkpoint { turn_count: u32 },
    /// The stream reported an error; consumption should stop
    Failed(String),
}

/// Counts turns and records written paths while a stream is consumed
#[derive(Debug, Clone)]
pub struct InvocationTracker {
    max_turns: u32,
    warn_at: u32,
    checkpoint_every: u32,
    turn_count: u32,
    warned: bool,
    written: Vec<String>,
    usage: UsageTotals,
}

impl InvocationTracker {
    /// `warn_ratio` of `max_turns` (floored) is where the warning fires.
    pub fn new(max_turns: u32, warn_ratio: f64, checkpoint_every: u32) -> Self {
        let warn_at = (max_turns as f64 * warn_ratio).floor() as u32;
        Self {
            max_turns,
            warn_at: warn_at.max(1),
            checkpoint_every,
            turn_count: 0,
            warned: false,
            written: Vec::new(),
            usage: UsageTotals::default(),
        }
    }

    pub fn observe(&mut self, event: &AgentEvent) -> Vec<TrackerSignal> {
        let mut signals = Vec::new();

        if let AgentEvent::Usage {
            input_tokens,
            output_tokens,
        } = event
        {
            self.usage.input_tokens += input_tokens;
            self.usage.output_tokens += output_tokens;
            return signals;
        }

        self.turn_count += 1;

        if let Some(path) = event.written_path() {
            self.written.push(path.to_string());
            signals.push(TrackerSignal::Wrote(path.to_string()));
        }

        if let AgentEvent::Error { message } = event {
            signals.push(TrackerSignal::Failed(message.clone()));
        }

        if !self.warned && self.turn_count >= self.warn_at {
            self.warned = true;
            signals.push(TrackerSignal::NearTurnLimit {
                turn_count: self.turn_count,
                max_turns: self.max_turns,
            });
        }

        if self.checkpoint_every > 0 && self.turn_count % self.checkpoint_every == 0 {
            signals.push(TrackerSignal::Checkpoint {
                turn_count: self.turn_count,
            });
        }

        signals
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// True once the warning threshold has been reached
    pub fn near_limit(&self) -> bool {
        self.turn_count >= self.warn_at
    }

    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Whether any `Write` targeted a path ending in `file_name`
    pub fn wrote_file(&self, file_name: &str) -> bool {
        self.written.iter().any(|p| p.ends_with(file_name))
    }

    pub fn usage(&self) -> UsageTotals {
        self.usage
    }
}
