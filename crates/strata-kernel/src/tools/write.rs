//! `write-file`: create or overwrite a file.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{Tool, ToolContext, ToolError, ToolKind};
use crate::store::NodePath;

/// Write content to a file.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WriteFileArgs {
    #[schemars(description = "File path to write; its parent directory must exist")]
    pub path: NodePath,
    #[schemars(description = "Full text content of the file")]
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    type Args = WriteFileArgs;

    const KIND: ToolKind = ToolKind::WriteFile;
    const DESCRIPTION: &'static str =
        "Create or overwrite a text file. The parent directory must already exist.";

    async fn run(&self, args: WriteFileArgs, ctx: &mut ToolContext) -> Result<String, ToolError> {
        let bytes = args.content.len();
        ctx.mutate(|store| store.write(&args.path, args.content))?;
        Ok(format!("Wrote {bytes} bytes to {}", args.path))
    }
}
