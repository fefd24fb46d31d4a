//! Tool invocation engine.
//!
//! An invocation moves through
//! `RECEIVED → VALIDATING → (AWAITING_CONFIRMATION)? → EXECUTING → (PROGRESS)*`
//! and ends `COMPLETED`, `FAILED`, or `CANCELLED`.
//!
//! Validation happens synchronously in [`ToolEngine::start`]; a bad call is
//! rejected before anything is spawned. The rest runs in a task. The tool body
//! itself runs in a second, inner task so a panic is caught at the task
//! boundary and turned into `FAILED`. Whatever the outcome, the keys changed
//! so far are reported and fed to the subscription registry, even if the
//! driving task itself dies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{ChangeLog, ToolContext};
use super::progress::{ProgressEvent, ProgressReporter};
use super::{ToolCommand, ToolError, ToolKind, ToolSettings, ToolSpec, catalog};
use crate::elicitation::{
    ConfirmationFlow, ConfirmationOutcome, ConfirmationRequest, DeclineElicitor,
    ElicitationError, Elicitor,
};
use crate::generation::{TextGenerator, UnavailableGenerator};
use crate::ids::InvocationId;
use crate::store::{NodePath, PathStore, SharedPathStore};
use crate::subscriptions::SharedSubscriptionRegistry;

/// Aborts a tokio task when dropped.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stand-in deadline when the configured timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn confirmation_deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// The part of an invocation that runs after validation.
#[async_trait]
pub(crate) trait InvocationBody: Send + 'static {
    fn kind(&self) -> ToolKind;

    fn confirmation(&self, store: &PathStore, settings: &ToolSettings)
        -> Option<ConfirmationRequest>;

    async fn run(self, ctx: &mut ToolContext) -> Result<String, ToolError>;
}

#[async_trait]
impl InvocationBody for ToolCommand {
    fn kind(&self) -> ToolKind {
        ToolCommand::kind(self)
    }

    fn confirmation(
        &self,
        store: &PathStore,
        settings: &ToolSettings,
    ) -> Option<ConfirmationRequest> {
        ToolCommand::confirmation(self, store, settings)
    }

    async fn run(self, ctx: &mut ToolContext) -> Result<String, ToolError> {
        ToolCommand::run(self, ctx).await
    }
}

// ============================================================================
// Requests and Results
// ============================================================================

/// A tool invocation request: `{name, arguments}`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Collaborators for one invocation, supplied by the caller's session.
#[derive(Clone)]
pub struct InvocationContext {
    pub elicitor: Arc<dyn Elicitor>,
    pub generator: Arc<dyn TextGenerator>,
    pub cancel: CancellationToken,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self {
            elicitor: Arc::new(DeclineElicitor),
            generator: Arc::new(UnavailableGenerator),
            cancel: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl InvocationContext {
    pub fn with_elicitor(mut self, elicitor: Arc<dyn Elicitor>) -> Self {
        self.elicitor = elicitor;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// States an invocation passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationState {
    Received,
    Validating,
    AwaitingConfirmation,
    Executing,
    Progress { step: u32, total_steps: u32 },
    Completed,
    Failed,
    Cancelled,
}

/// Terminal result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed { summary: String },
    Failed { error: ToolError },
    /// Declined, timed out, or cancelled. Informational, not an error.
    Cancelled { message: String },
}

impl ToolOutcome {
    pub fn state(&self) -> InvocationState {
        match self {
            ToolOutcome::Completed { .. } => InvocationState::Completed,
            ToolOutcome::Failed { .. } => InvocationState::Failed,
            ToolOutcome::Cancelled { .. } => InvocationState::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ToolOutcome::Completed { .. })
    }

    /// Text to show the caller.
    pub fn message(&self) -> String {
        match self {
            ToolOutcome::Completed { summary } => summary.clone(),
            ToolOutcome::Failed { error } => error.to_string(),
            ToolOutcome::Cancelled { message } => message.clone(),
        }
    }
}

/// Everything known about a finished invocation.
#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub id: InvocationId,
    pub tool: ToolKind,
    pub outcome: ToolOutcome,
    /// Keys actually changed, even when the tool failed midway.
    pub changed: Vec<NodePath>,
    pub trace: Vec<InvocationState>,
    /// Progress events not already taken through
    /// [`RunningInvocation::next_progress`].
    pub progress: Vec<ProgressEvent>,
}

// ============================================================================
// State Trace
// ============================================================================

/// Shared, logged record of state transitions.
#[derive(Debug, Clone)]
pub(crate) struct StateTrace {
    id: InvocationId,
    tool: ToolKind,
    states: Arc<Mutex<Vec<InvocationState>>>,
}

impl StateTrace {
    pub(crate) fn new(id: InvocationId, tool: ToolKind) -> Self {
        Self {
            id,
            tool,
            states: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, state: InvocationState) {
        match state {
            InvocationState::Progress { step, total_steps } => debug!(
                invocation = %self.id,
                tool = %self.tool,
                step,
                total_steps,
                "progress"
            ),
            _ => debug!(invocation = %self.id, tool = %self.tool, state = %state, "state transition"),
        }
        self.states.lock().push(state);
    }

    pub(crate) fn snapshot(&self) -> Vec<InvocationState> {
        self.states.lock().clone()
    }
}

// ============================================================================
// Running Invocations
// ============================================================================

/// Handle to an invocation in flight.
#[derive(Debug)]
pub struct RunningInvocation {
    id: InvocationId,
    tool: ToolKind,
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    handle: JoinHandle<InvocationReport>,
    trace: StateTrace,
    changes: ChangeLog,
    subscriptions: SharedSubscriptionRegistry,
}

impl RunningInvocation {
    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    /// Next progress event, in order. `None` once the tool body has ended.
    pub async fn next_progress(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    /// Wait for the terminal result.
    pub async fn finish(mut self) -> InvocationReport {
        let mut report = match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(invocation = %self.id, tool = %self.tool, error = %e, "invocation task died");
                let changed = self.changes.snapshot();
                self.subscriptions.notify(&changed);
                self.trace.push(InvocationState::Failed);
                InvocationReport {
                    id: self.id,
                    tool: self.tool,
                    outcome: ToolOutcome::Failed {
                        error: ToolError::Internal(GENERIC_FAILURE.into()),
                    },
                    changed,
                    trace: self.trace.snapshot(),
                    progress: Vec::new(),
                }
            }
        };
        while let Ok(event) = self.progress.try_recv() {
            report.progress.push(event);
        }
        report
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Dispatches tool calls against the store.
#[derive(Clone)]
pub struct ToolEngine {
    store: SharedPathStore,
    subscriptions: SharedSubscriptionRegistry,
    confirmations: Arc<ConfirmationFlow>,
    settings: Arc<ToolSettings>,
}

impl fmt::Debug for ToolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolEngine")
            .field("nodes", &self.store.len())
            .field("subscribers", &self.subscriptions.subscriber_count())
            .field("pending_confirmations", &self.confirmations.pending_count())
            .field("settings", &self.settings)
            .finish()
    }
}

const GENERIC_FAILURE: &str = "internal error during tool execution";

impl ToolEngine {
    pub fn new(
        store: SharedPathStore,
        subscriptions: SharedSubscriptionRegistry,
        settings: ToolSettings,
    ) -> Self {
        Self {
            store,
            subscriptions,
            confirmations: Arc::new(ConfirmationFlow::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        catalog()
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn confirmations(&self) -> &ConfirmationFlow {
        &self.confirmations
    }

    /// Validate a call and start executing it.
    ///
    /// `UnknownTool` and `InvalidArguments` are returned here, before any
    /// state changes. Must be called within a tokio runtime.
    pub fn start(
        &self,
        call: ToolCall,
        ctx: InvocationContext,
    ) -> Result<RunningInvocation, ToolError> {
        let id = InvocationId::new();

        let kind: ToolKind = call
            .name
            .parse()
            .map_err(|_| ToolError::UnknownTool(call.name.clone()))
            .inspect_err(|e| warn!(invocation = %id, error = %e, "rejected tool call"))?;

        let trace = StateTrace::new(id, kind);
        trace.push(InvocationState::Received);
        trace.push(InvocationState::Validating);
        let command = ToolCommand::parse(&call.name, call.arguments)
            .inspect_err(|e| warn!(invocation = %id, tool = %kind, error = %e, "rejected tool call"))?;

        Ok(self.launch(id, trace, command, ctx))
    }

    /// Spawn the driver for an already validated body.
    pub(crate) fn launch<B: InvocationBody>(
        &self,
        id: InvocationId,
        trace: StateTrace,
        body: B,
        ctx: InvocationContext,
    ) -> RunningInvocation {
        let tool = body.kind();
        let changes = ChangeLog::default();
        let (tx, rx) = mpsc::unbounded_channel();

        let engine = self.clone();
        let handle = tokio::spawn({
            let trace = trace.clone();
            let changes = changes.clone();
            async move { engine.drive(id, body, ctx, trace, changes, tx).await }
        });

        RunningInvocation {
            id,
            tool,
            progress: rx,
            handle,
            trace,
            changes,
            subscriptions: self.subscriptions.clone(),
        }
    }

    /// Run a call to completion, collecting its progress into the report.
    pub async fn invoke(
        &self,
        call: ToolCall,
        ctx: InvocationContext,
    ) -> Result<InvocationReport, ToolError> {
        Ok(self.start(call, ctx)?.finish().await)
    }

    async fn drive<B: InvocationBody>(
        self,
        id: InvocationId,
        body: B,
        ctx: InvocationContext,
        trace: StateTrace,
        changes: ChangeLog,
        tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> InvocationReport {
        let tool = body.kind();

        let outcome = self
            .execute(id, body, &ctx, &trace, &changes, tx)
            .await;
        trace.push(outcome.state());

        match &outcome {
            ToolOutcome::Completed { .. } => {
                info!(invocation = %id, tool = %tool, "invocation completed")
            }
            ToolOutcome::Failed { error } => {
                warn!(invocation = %id, tool = %tool, error = %error, "invocation failed")
            }
            ToolOutcome::Cancelled { message } => {
                info!(invocation = %id, tool = %tool, message = %message, "invocation cancelled")
            }
        }

        let changed = changes.snapshot();
        self.subscriptions.notify(&changed);

        InvocationReport {
            id,
            tool,
            outcome,
            changed,
            trace: trace.snapshot(),
            progress: Vec::new(),
        }
    }

    async fn execute<B: InvocationBody>(
        &self,
        id: InvocationId,
        body: B,
        ctx: &InvocationContext,
        trace: &StateTrace,
        changes: &ChangeLog,
        tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> ToolOutcome {
        let confirmation = match body.confirmation(&self.store, &self.settings) {
            None => None,
            Some(request) => {
                trace.push(InvocationState::AwaitingConfirmation);
                let deadline = confirmation_deadline(self.settings.confirmation_timeout);
                let answer = self
                    .confirmations
                    .request(id, request, deadline, ctx.elicitor.as_ref(), &ctx.cancel)
                    .await;
                match answer {
                    Ok(ConfirmationOutcome::Accepted(form)) => Some(form),
                    Ok(ConfirmationOutcome::Declined) => {
                        return ToolOutcome::Cancelled {
                            message: "Operation cancelled by user.".into(),
                        };
                    }
                    Ok(ConfirmationOutcome::TimedOut) => {
                        return ToolOutcome::Cancelled {
                            message: "Operation cancelled: confirmation timed out.".into(),
                        };
                    }
                    Ok(ConfirmationOutcome::Cancelled) => {
                        return ToolOutcome::Cancelled {
                            message: "Operation cancelled.".into(),
                        };
                    }
                    Err(ElicitationError::AlreadyAwaitingConfirmation(other)) => {
                        return ToolOutcome::Failed {
                            error: ToolError::AlreadyAwaitingConfirmation(other),
                        };
                    }
                    Err(ElicitationError::Transport(msg)) => {
                        return ToolOutcome::Failed {
                            error: ToolError::Confirmation(msg),
                        };
                    }
                }
            }
        };

        if ctx.cancel.is_cancelled() {
            return ToolOutcome::Cancelled {
                message: "Operation cancelled.".into(),
            };
        }

        trace.push(InvocationState::Executing);
        let mut tool_ctx = ToolContext::new(
            id,
            self.store.clone(),
            changes.clone(),
            ProgressReporter::new(tx, trace.clone()),
            ctx.generator.clone(),
            ctx.cancel.clone(),
            confirmation,
            self.settings.clone(),
        );

        let task = tokio::spawn(async move { body.run(&mut tool_ctx).await });
        let _abort = AbortOnDrop(task.abort_handle());

        match task.await {
            Ok(Ok(summary)) => ToolOutcome::Completed { summary },
            Ok(Err(ToolError::Cancelled)) => ToolOutcome::Cancelled {
                message: "Operation cancelled.".into(),
            },
            Ok(Err(error)) => ToolOutcome::Failed { error },
            Err(e) => {
                error!(invocation = %id, error = %e, "tool body panicked or was aborted");
                ToolOutcome::Failed {
                    error: ToolError::Internal(GENERIC_FAILURE.into()),
                }
            }
        }
    }
}
