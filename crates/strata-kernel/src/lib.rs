//! # strata-kernel
//!
//! In-memory hierarchical document store with a tool engine on top.
//!
//! - [`store`]: path-keyed files and directories, address parsing and resolution
//! - [`subscriptions`]: per-subscriber interest sets and change fan-out
//! - [`tools`]: the tool catalog and the invocation state machine
//! - [`elicitation`]: confirmation questions asked before destructive tools run
//! - [`generation`]: the text-generation collaborator used by content tools
//! - [`kernel`]: ties the pieces together from a [`StrataConfig`]

pub mod config;
pub mod elicitation;
pub mod generation;
pub mod ids;
pub mod kernel;
pub mod store;
pub mod subscriptions;
pub mod tools;

pub use config::{
    ConfigError, MAX_CONFIRMATION_TIMEOUT_SECS, StrataConfig, load_config, load_config_file,
};
pub use elicitation::{
    ChannelElicitor, ConfirmationFlow, ConfirmationOutcome, ConfirmationRequest, DeclineElicitor,
    ElicitationAction, ElicitationError, ElicitationResponse, ElicitationSchema,
    ElicitationTicket, Elicitor, FixedElicitor,
};
pub use generation::{
    FixedGenerator, GenerationError, GenerationRequest, GenerationResponse, TextGenerator,
    UnavailableGenerator,
};
pub use ids::InvocationId;
pub use kernel::{Kernel, KernelError};
pub use store::{
    Address, DIRECTORY_CONTENT_MARKER, DeleteOptions, DirEntry, Node, NodeKind, NodePath, PathStore,
    Resolved, SharedPathStore, StoreError, StoreResult, render_uri, shared_path_store,
};
pub use subscriptions::{
    ResourceUpdate, SharedSubscriptionRegistry, SubscriberId, SubscriptionRegistry,
    shared_subscription_registry,
};
pub use tools::{
    InvocationContext, InvocationReport, InvocationState, ProgressEvent, RunningInvocation,
    ToolCall, ToolEngine, ToolError, ToolKind, ToolOutcome, ToolSettings, ToolSpec, catalog,
};
