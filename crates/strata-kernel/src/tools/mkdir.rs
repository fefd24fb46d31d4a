//! `make-directory`: create one directory level.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{Tool, ToolContext, ToolError, ToolKind};
use crate::store::NodePath;

/// Create a directory.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MakeDirectoryArgs {
    #[schemars(description = "Directory path; a trailing '/' is added if missing")]
    pub path: NodePath,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MakeDirectoryTool;

#[async_trait]
impl Tool for MakeDirectoryTool {
    type Args = MakeDirectoryArgs;

    const KIND: ToolKind = ToolKind::MakeDirectory;
    const DESCRIPTION: &'static str =
        "Create a directory. The parent must exist and the directory must not.";

    async fn run(
        &self,
        args: MakeDirectoryArgs,
        ctx: &mut ToolContext,
    ) -> Result<String, ToolError> {
        let created = ctx.mutate(|store| store.mkdir(&args.path))?;
        let dir = created.first().cloned().unwrap_or_else(|| args.path.as_dir());
        Ok(format!("Created directory {dir}"))
    }
}
