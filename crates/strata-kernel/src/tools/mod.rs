//! Tool catalog and invocation engine.
//!
//! Tools are a closed, tagged set: [`ToolKind`] names them on the wire and
//! [`ToolCommand`] carries each one's parsed arguments, so dispatch is an
//! exhaustive `match`. Each tool is a unit struct implementing [`Tool`] with a
//! declared argument type (its JSON schema is derived with `schemars`), a
//! destructive flag, and an async `run`.

mod context;
mod copy;
mod delete;
mod engine;
mod generate;
mod mkdir;
mod progress;
mod write;

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, IntoEnumIterator};

use crate::elicitation::ConfirmationRequest;
use crate::ids::InvocationId;
use crate::store::{NodePath, PathStore, StoreError};

pub use context::ToolContext;
pub use copy::{CopyWithProgressArgs, CopyWithProgressTool};
pub use delete::{DeleteWithConfirmationArgs, DeleteWithConfirmationTool};
pub use engine::{
    InvocationContext, InvocationReport, InvocationState, RunningInvocation, ToolCall, ToolEngine,
    ToolOutcome,
};
pub use generate::{GenerateContentThenWriteArgs, GenerateContentThenWriteTool};
pub use mkdir::{MakeDirectoryArgs, MakeDirectoryTool};
pub use progress::{ProgressEvent, ProgressReporter};
pub use write::{WriteFileArgs, WriteFileTool};

// ============================================================================
// Errors
// ============================================================================

/// Error type for tool invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A confirmation for this invocation is already outstanding.
    #[error("already awaiting confirmation for invocation {0}")]
    AlreadyAwaitingConfirmation(InvocationId),

    /// The generation collaborator failed; carries its message.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The confirmation question could not be delivered or answered.
    #[error("confirmation failed: {0}")]
    Confirmation(String),

    /// The invocation was cancelled while executing.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unexpected failure inside a tool.
    #[error("internal error: {0}")]
    Internal(String),
}

// ============================================================================
// Settings
// ============================================================================

/// Runtime knobs shared by every tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    /// How long a destructive tool waits for an answer.
    pub confirmation_timeout: Duration,
    /// Default number of progress steps for `copy-with-progress`.
    pub copy_steps: u32,
    /// Default pause between copy progress steps.
    pub copy_step_delay: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Backup directory offered when a delete asks for confirmation.
    pub backup_location: NodePath,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(60),
            copy_steps: 5,
            copy_step_delay: Duration::from_millis(1000),
            max_output_tokens: 500,
            temperature: 0.7,
            backup_location: NodePath::root()
                .join("backups/")
                .unwrap_or_else(|_| NodePath::root()),
        }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// One command in the catalog.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Argument shape, checked before anything executes.
    type Args: DeserializeOwned + JsonSchema + Send + 'static;

    const KIND: ToolKind;
    const DESCRIPTION: &'static str;
    /// Only destructive tools are asked for a confirmation question; for
    /// any other tool [`Tool::confirmation`] is never consulted. Setting the
    /// flag alone does not gate anything: the tool must also override
    /// `confirmation` to return its question.
    const DESTRUCTIVE: bool = false;

    /// Semantic checks beyond the schema. Runs before any mutation.
    fn validate(&self, _args: &Self::Args) -> Result<(), String> {
        Ok(())
    }

    /// The question to ask before running, if any. `None` from a
    /// destructive tool means this particular call runs unconfirmed.
    fn confirmation(
        &self,
        _args: &Self::Args,
        _store: &PathStore,
        _settings: &ToolSettings,
    ) -> Option<ConfirmationRequest> {
        None
    }

    /// Execute. Returns a human-readable summary.
    async fn run(&self, args: Self::Args, ctx: &mut ToolContext) -> Result<String, ToolError>;
}

/// Catalog entry describing a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub name: &'static str,
    pub description: &'static str,
    pub destructive: bool,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

impl ToolSpec {
    fn of<T: Tool>() -> Self {
        Self {
            kind: T::KIND,
            name: T::KIND.name(),
            description: T::DESCRIPTION,
            destructive: T::DESTRUCTIVE,
            input_schema: serde_json::to_value(schemars::schema_for!(T::Args))
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Wire names of the catalog.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    WriteFile,
    MakeDirectory,
    CopyWithProgress,
    DeleteWithConfirmation,
    GenerateContentThenWrite,
}

impl ToolKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn spec(self) -> ToolSpec {
        match self {
            ToolKind::WriteFile => ToolSpec::of::<WriteFileTool>(),
            ToolKind::MakeDirectory => ToolSpec::of::<MakeDirectoryTool>(),
            ToolKind::CopyWithProgress => ToolSpec::of::<CopyWithProgressTool>(),
            ToolKind::DeleteWithConfirmation => ToolSpec::of::<DeleteWithConfirmationTool>(),
            ToolKind::GenerateContentThenWrite => ToolSpec::of::<GenerateContentThenWriteTool>(),
        }
    }
}

/// Every tool in the catalog.
pub fn catalog() -> Vec<ToolSpec> {
    ToolKind::iter().map(ToolKind::spec).collect()
}

/// A validated call: tool plus parsed arguments.
#[derive(Debug)]
pub enum ToolCommand {
    WriteFile(WriteFileArgs),
    MakeDirectory(MakeDirectoryArgs),
    CopyWithProgress(CopyWithProgressArgs),
    DeleteWithConfirmation(DeleteWithConfirmationArgs),
    GenerateContentThenWrite(GenerateContentThenWriteArgs),
}

fn confirmation_for<T: Tool>(
    tool: &T,
    args: &T::Args,
    store: &PathStore,
    settings: &ToolSettings,
) -> Option<ConfirmationRequest> {
    if T::DESTRUCTIVE {
        tool.confirmation(args, store, settings)
    } else {
        None
    }
}

fn parse_args<T: Tool>(tool: &T, arguments: Value) -> Result<T::Args, ToolError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let args: T::Args = serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", T::KIND)))?;
    tool.validate(&args)
        .map_err(|msg| ToolError::InvalidArguments(format!("{}: {msg}", T::KIND)))?;
    Ok(args)
}

impl ToolCommand {
    /// Look up `name` and check `arguments` against its schema.
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ToolError> {
        let kind: ToolKind = name
            .parse()
            .map_err(|_| ToolError::UnknownTool(name.to_string()))?;
        Ok(match kind {
            ToolKind::WriteFile => Self::WriteFile(parse_args(&WriteFileTool, arguments)?),
            ToolKind::MakeDirectory => {
                Self::MakeDirectory(parse_args(&MakeDirectoryTool, arguments)?)
            }
            ToolKind::CopyWithProgress => {
                Self::CopyWithProgress(parse_args(&CopyWithProgressTool, arguments)?)
            }
            ToolKind::DeleteWithConfirmation => {
                Self::DeleteWithConfirmation(parse_args(&DeleteWithConfirmationTool, arguments)?)
            }
            ToolKind::GenerateContentThenWrite => Self::GenerateContentThenWrite(parse_args(
                &GenerateContentThenWriteTool,
                arguments,
            )?),
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::WriteFile(_) => ToolKind::WriteFile,
            Self::MakeDirectory(_) => ToolKind::MakeDirectory,
            Self::CopyWithProgress(_) => ToolKind::CopyWithProgress,
            Self::DeleteWithConfirmation(_) => ToolKind::DeleteWithConfirmation,
            Self::GenerateContentThenWrite(_) => ToolKind::GenerateContentThenWrite,
        }
    }

    pub(crate) fn confirmation(
        &self,
        store: &PathStore,
        settings: &ToolSettings,
    ) -> Option<ConfirmationRequest> {
        match self {
            Self::WriteFile(args) => confirmation_for(&WriteFileTool, args, store, settings),
            Self::MakeDirectory(args) => {
                confirmation_for(&MakeDirectoryTool, args, store, settings)
            }
            Self::CopyWithProgress(args) => {
                confirmation_for(&CopyWithProgressTool, args, store, settings)
            }
            Self::DeleteWithConfirmation(args) => {
                confirmation_for(&DeleteWithConfirmationTool, args, store, settings)
            }
            Self::GenerateContentThenWrite(args) => {
                confirmation_for(&GenerateContentThenWriteTool, args, store, settings)
            }
        }
    }

    pub(crate) async fn run(self, ctx: &mut ToolContext) -> Result<String, ToolError> {
        match self {
            Self::WriteFile(args) => WriteFileTool.run(args, ctx).await,
            Self::MakeDirectory(args) => MakeDirectoryTool.run(args, ctx).await,
            Self::CopyWithProgress(args) => CopyWithProgressTool.run(args, ctx).await,
            Self::DeleteWithConfirmation(args) => DeleteWithConfirmationTool.run(args, ctx).await,
            Self::GenerateContentThenWrite(args) => {
                GenerateContentThenWriteTool.run(args, ctx).await
            }
        }
    }
}
