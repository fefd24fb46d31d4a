//! `generate-content-then-write`: ask the generation collaborator for text and
//! store it.
//!
//! Nothing is written unless generation succeeds. Missing ancestor directories
//! of the target are created on a best-effort basis before the write.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Tool, ToolContext, ToolError, ToolKind};
use crate::generation::GenerationRequest;
use crate::store::NodePath;

/// Generate text from a prompt and write it to a file.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateContentThenWriteArgs {
    #[schemars(description = "Prompt for the text generator")]
    pub prompt: String,
    #[schemars(description = "File path to write the generated text to")]
    pub path: NodePath,
    #[schemars(description = "Maximum tokens to generate (default from server config)")]
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[schemars(description = "Sampling temperature (default from server config)")]
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateContentThenWriteTool;

#[async_trait]
impl Tool for GenerateContentThenWriteTool {
    type Args = GenerateContentThenWriteArgs;

    const KIND: ToolKind = ToolKind::GenerateContentThenWrite;
    const DESCRIPTION: &'static str = "Generate text for a prompt and write it to a file, \
        creating missing parent directories.";

    fn validate(&self, args: &GenerateContentThenWriteArgs) -> Result<(), String> {
        if args.path.is_dir() {
            return Err(format!("{} is a directory path", args.path));
        }
        if args.prompt.trim().is_empty() {
            return Err("prompt must not be empty".into());
        }
        if let Some(t) = args.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(format!("temperature {t} out of range 0.0..=2.0"));
        }
        Ok(())
    }

    async fn run(
        &self,
        args: GenerateContentThenWriteArgs,
        ctx: &mut ToolContext,
    ) -> Result<String, ToolError> {
        let request = GenerationRequest::new(args.prompt)
            .with_max_output_tokens(
                args.max_output_tokens
                    .unwrap_or(ctx.settings().max_output_tokens),
            )
            .with_temperature(args.temperature.unwrap_or(ctx.settings().temperature));

        debug!(path = %args.path, max_output_tokens = request.max_output_tokens, "generating");
        let generated = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(ToolError::Cancelled),
            generated = ctx.generator().generate(request) => generated,
        };
        let response = generated.map_err(|e| ToolError::GenerationFailed(e.to_string()))?;

        if let Some(parent) = args.path.parent()
            && let Err(e) = ctx.mutate(|store| store.mkdir_all(&parent))
        {
            warn!(path = %args.path, error = %e, "could not create parent directories");
        }

        let chars = response.text.chars().count();
        ctx.mutate(|store| store.write(&args.path, response.text))?;
        Ok(format!("Generated {chars} characters into {}", args.path))
    }
}
