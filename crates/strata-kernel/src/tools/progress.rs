//! Ordered progress events for long-running tools.
//!
//! The engine owns the channel; tools only get a [`ProgressReporter`], which
//! hands out step numbers itself. Steps therefore run 1..=total with no gaps or
//! repeats no matter how a tool calls it.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use super::engine::{InvocationState, StateTrace};

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub step: u32,
    pub total_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Emits progress events for one invocation.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    trace: StateTrace,
    total_steps: u32,
    step: u32,
}

impl ProgressReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ProgressEvent>, trace: StateTrace) -> Self {
        Self {
            tx,
            trace,
            total_steps: 0,
            step: 0,
        }
    }

    /// Declare how many steps this run will take. Ignored once started.
    pub fn set_total(&mut self, total_steps: u32) {
        if self.step == 0 {
            self.total_steps = total_steps;
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// Emit the next step. Returns `None` once the total is reached.
    pub fn advance(&mut self, message: impl Into<String>) -> Option<ProgressEvent> {
        if self.step >= self.total_steps {
            warn!(
                step = self.step,
                total_steps = self.total_steps,
                "progress past total ignored"
            );
            return None;
        }
        self.step += 1;
        let event = ProgressEvent {
            step: self.step,
            total_steps: self.total_steps,
            message: Some(message.into()),
        };
        self.trace.push(InvocationState::Progress {
            step: event.step,
            total_steps: event.total_steps,
        });
        // The caller may have stopped listening; the event is still traced.
        let _ = self.tx.send(event.clone());
        Some(event)
    }
}
