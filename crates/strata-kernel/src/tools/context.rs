//! Per-invocation execution context handed to a running tool.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;
use super::{ToolError, ToolSettings};
use crate::generation::TextGenerator;
use crate::ids::InvocationId;
use crate::store::{Changes, NodePath, PathStore, SharedPathStore, StoreResult};

/// Keys changed so far by one invocation.
///
/// Shared between the running tool and the engine, so changes made before a
/// failure or panic are still reported.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeLog(Arc<Mutex<BTreeSet<NodePath>>>);

impl ChangeLog {
    pub(crate) fn record(&self, changed: &[NodePath]) {
        self.0.lock().extend(changed.iter().cloned());
    }

    pub(crate) fn snapshot(&self) -> Vec<NodePath> {
        self.0.lock().iter().cloned().collect()
    }
}

/// What a tool sees while it runs.
pub struct ToolContext {
    id: InvocationId,
    store: SharedPathStore,
    changes: ChangeLog,
    progress: ProgressReporter,
    generator: Arc<dyn TextGenerator>,
    cancel: CancellationToken,
    confirmation: Option<Map<String, Value>>,
    settings: Arc<ToolSettings>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("id", &self.id)
            .field("changes", &self.changes)
            .field("confirmation", &self.confirmation)
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: InvocationId,
        store: SharedPathStore,
        changes: ChangeLog,
        progress: ProgressReporter,
        generator: Arc<dyn TextGenerator>,
        cancel: CancellationToken,
        confirmation: Option<Map<String, Value>>,
        settings: Arc<ToolSettings>,
    ) -> Self {
        Self {
            id,
            store,
            changes,
            progress,
            generator,
            cancel,
            confirmation,
            settings,
        }
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Read access to the store. Mutate through [`ToolContext::mutate`].
    pub fn store(&self) -> &PathStore {
        &self.store
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    /// The form submitted with an accepted confirmation.
    pub fn confirmation(&self) -> Option<&Map<String, Value>> {
        self.confirmation.as_ref()
    }

    pub fn progress(&mut self) -> &mut ProgressReporter {
        &mut self.progress
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one store mutation and record what it changed.
    pub fn mutate<F>(&self, op: F) -> Result<Changes, ToolError>
    where
        F: FnOnce(&PathStore) -> StoreResult<Changes>,
    {
        let changed = op(&self.store)?;
        self.changes.record(&changed);
        Ok(changed)
    }

    pub fn check_cancelled(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            Err(ToolError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep, waking early with `Cancelled` if the invocation is cancelled.
    pub async fn pause(&self, duration: Duration) -> Result<(), ToolError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ToolError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
