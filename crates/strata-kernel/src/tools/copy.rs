//! `copy-with-progress`: a paced copy that reports each step.
//!
//! Steps 1..N-1 are emitted between timed pauses; the copy itself happens
//! after the last pause and step N is emitted only once it succeeded, so the
//! final event coincides with completion.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{Tool, ToolContext, ToolError, ToolKind};
use crate::store::{Node, NodePath, StoreError};

/// Upper bound on requested steps.
const MAX_STEPS: u32 = 1000;

/// Copy a file, reporting progress.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CopyWithProgressArgs {
    #[schemars(description = "File to copy")]
    pub source: NodePath,
    #[schemars(description = "Destination file path; its parent directory must exist")]
    pub destination: NodePath,
    #[schemars(description = "Number of progress steps (default from server config)")]
    #[serde(default)]
    pub steps: Option<u32>,
    #[schemars(description = "Pause between steps in milliseconds (default from server config)")]
    #[serde(default)]
    pub step_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyWithProgressTool;

#[async_trait]
impl Tool for CopyWithProgressTool {
    type Args = CopyWithProgressArgs;

    const KIND: ToolKind = ToolKind::CopyWithProgress;
    const DESCRIPTION: &'static str =
        "Copy a file in several timed steps, emitting a progress notification per step.";

    fn validate(&self, args: &CopyWithProgressArgs) -> Result<(), String> {
        match args.steps {
            Some(0) => Err("steps must be at least 1".into()),
            Some(n) if n > MAX_STEPS => Err(format!("steps must be at most {MAX_STEPS}")),
            _ => Ok(()),
        }
    }

    async fn run(
        &self,
        args: CopyWithProgressArgs,
        ctx: &mut ToolContext,
    ) -> Result<String, ToolError> {
        if !matches!(ctx.store().get(&args.source), Some(Node::File(_))) {
            return Err(StoreError::not_found(args.source.as_str()).into());
        }

        let total = args.steps.unwrap_or(ctx.settings().copy_steps).max(1);
        let delay = args
            .step_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(ctx.settings().copy_step_delay);

        ctx.progress().set_total(total);
        for step in 1..total {
            ctx.pause(delay).await?;
            let percent = step * 100 / total;
            ctx.progress().advance(format!("Copying {}: {percent}%", args.source));
        }
        ctx.pause(delay).await?;

        ctx.mutate(|store| store.copy(&args.source, &args.destination))?;
        ctx.progress()
            .advance(format!("Copied {} to {}", args.source, args.destination));

        Ok(format!(
            "Copied {} to {} in {total} steps",
            args.source, args.destination
        ))
    }
}
