//! MCP server exposing the strata kernel.
//!
//! Every stored node is a resource addressed as `<scheme>://<path>`. The
//! kernel's tool catalog is served as MCP tools. Destructive tools confirm
//! through client elicitation, `generate-content-then-write` samples from the
//! client's model, and long-running tools report progress when the caller
//! passed a progress token.
//!
//! ## Module Structure
//!
//! - `helpers`: kernel ↔ MCP wire conversions
//! - `peer`: elicitation and sampling collaborators backed by the client

mod helpers;
mod peer;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rmcp::{
    ErrorData as McpError, Peer, RoleServer, ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, CancelledNotificationParam, Content,
        ListResourcesResult, ListToolsResult, PaginatedRequestParams, ProgressNotificationParam,
        ReadResourceRequestParams, ReadResourceResult, ResourceContents,
        ResourceUpdatedNotificationParam, ServerCapabilities, ServerInfo, SubscribeRequestParams,
        UnsubscribeRequestParams,
    },
    service::{NotificationContext, RequestContext},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strata_kernel::{
    InvocationContext, Kernel, Resolved, SharedSubscriptionRegistry, SubscriberId, ToolCall,
    ToolOutcome, render_uri,
};

use helpers::{catalog_tool, directory_listing, from_wire, node_resource, store_error, tool_error};
pub use peer::{PeerElicitor, SamplingGenerator};

/// Wrapper that aborts a tokio task when dropped.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// This connection's place in the subscription registry.
///
/// Created on the first `resources/subscribe`. Dropping it disconnects the
/// subscriber and stops the forwarder.
struct Session {
    id: SubscriberId,
    registry: SharedSubscriptionRegistry,
    _forwarder: AbortOnDrop,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.registry.disconnect(self.id);
    }
}

/// Removes an in-flight request entry when the call returns.
struct InFlight<'a> {
    requests: &'a DashMap<String, CancellationToken>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.requests.remove(&self.key);
    }
}

/// MCP server handler over one kernel.
#[derive(Clone)]
pub struct StrataMcp {
    kernel: Kernel,
    session: Arc<Mutex<Option<Session>>>,
    /// Cancellation tokens of running `tools/call` requests, by request id.
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

impl StrataMcp {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            session: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// The session's subscriber id, connecting and starting the forwarder
    /// on first use.
    fn subscriber(&self, peer: &Peer<RoleServer>) -> SubscriberId {
        let mut session = self.session.lock();
        if let Some(session) = session.as_ref() {
            return session.id;
        }

        let registry = self.kernel.subscriptions().clone();
        let (id, mut updates) = registry.connect();
        let scheme = self.kernel.scheme().to_string();
        let peer = peer.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let uri = render_uri(&scheme, &update.path);
                let param: ResourceUpdatedNotificationParam = match from_wire(json!({"uri": uri})) {
                    Ok(param) => param,
                    Err(e) => {
                        warn!(uri = %uri, error = %e.message, "could not build update notification");
                        continue;
                    }
                };
                if let Err(e) = peer.notify_resource_updated(param).await {
                    warn!(uri = %uri, error = %e, "client gone, stopping update forwarder");
                    break;
                }
                debug!(uri = %uri, "sent resource update");
            }
        });

        info!(subscriber = %id, "session subscribed to updates");
        *session = Some(Session {
            id,
            registry,
            _forwarder: AbortOnDrop(forwarder.abort_handle()),
        });
        id
    }

    fn cancel_request(&self, key: &str) -> bool {
        match self.in_flight.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Tool result for a finished invocation.
///
/// Cancellation is informational and reported as a normal result.
fn outcome_result(outcome: ToolOutcome) -> CallToolResult {
    match outcome {
        ToolOutcome::Completed { summary } => CallToolResult::success(vec![Content::text(summary)]),
        ToolOutcome::Cancelled { message } => CallToolResult::success(vec![Content::text(message)]),
        ToolOutcome::Failed { error } => {
            CallToolResult::error(vec![Content::text(error.to_string())])
        }
    }
}

impl ServerHandler for StrataMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(
            ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_resources_subscribe()
                .build(),
        )
        .with_instructions(format!(
            "Strata in-memory document store. Resources are addressed as {}://<path>; \
             directory paths end in '/'. Tools write, copy, delete, and generate content.",
            self.kernel.scheme()
        ))
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// List every stored node, root first.
    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move {
            let scheme = self.kernel.scheme();
            let resources = self
                .kernel
                .store()
                .snapshot()
                .iter()
                .map(|(path, node)| node_resource(scheme, path, node))
                .collect();

            Ok(ListResourcesResult {
                meta: None,
                next_cursor: None,
                resources,
            })
        }
    }

    /// Read a file's content or a directory's listing.
    fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            let uri = &request.uri;
            let content = match self.kernel.read(uri).map_err(store_error)? {
                Resolved::File { content, .. } => content,
                Resolved::Directory { children, .. } => {
                    let listing = directory_listing(self.kernel.scheme(), &children);
                    serde_json::to_string_pretty(&listing)
                        .map_err(|e| McpError::internal_error(e.to_string(), None))?
                }
            };

            Ok(ReadResourceResult::new(vec![ResourceContents::text(
                content,
                uri.clone(),
            )]))
        }
    }

    /// Subscribe to updates of an address and of its direct children.
    fn subscribe(
        &self,
        request: SubscribeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<(), McpError>> + Send + '_ {
        async move {
            let address = self.kernel.address(&request.uri).map_err(store_error)?;
            let id = self.subscriber(&context.peer);
            if self
                .kernel
                .subscriptions()
                .subscribe(id, address.into_path())
            {
                debug!(subscriber = %id, uri = %request.uri, "subscribed");
            }
            Ok(())
        }
    }

    /// Unsubscribe from an address.
    fn unsubscribe(
        &self,
        request: UnsubscribeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<(), McpError>> + Send + '_ {
        async move {
            let address = self.kernel.address(&request.uri).map_err(store_error)?;
            let id = self.session.lock().as_ref().map(|s| s.id);
            if let Some(id) = id
                && self.kernel.subscriptions().unsubscribe(id, address.path())
            {
                debug!(subscriber = %id, uri = %request.uri, "unsubscribed");
            }
            Ok(())
        }
    }

    // ========================================================================
    // Tools
    // ========================================================================

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let tools = self
                .kernel
                .engine()
                .catalog()
                .iter()
                .map(catalog_tool)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ListToolsResult {
                meta: None,
                next_cursor: None,
                tools,
            })
        }
    }

    /// Run a tool, forwarding progress while it executes.
    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let key = context.id.to_string();
            let cancel = context.ct.child_token();
            self.in_flight.insert(key.clone(), cancel.clone());
            let _in_flight = InFlight {
                requests: &self.in_flight,
                key,
            };

            let arguments = request.arguments.map(Value::Object).unwrap_or(Value::Null);
            let ctx = InvocationContext::default()
                .with_elicitor(Arc::new(PeerElicitor::new(context.peer.clone())))
                .with_generator(Arc::new(SamplingGenerator::new(context.peer.clone())))
                .with_cancel(cancel);

            let mut running = self
                .kernel
                .engine()
                .start(ToolCall::new(request.name.to_string(), arguments), ctx)
                .map_err(tool_error)?;

            let progress_token = context.meta.get_progress_token();
            while let Some(event) = running.next_progress().await {
                let Some(token) = &progress_token else {
                    continue;
                };
                let param: ProgressNotificationParam = from_wire(json!({
                    "progressToken": token,
                    "progress": event.step,
                    "total": event.total_steps,
                    "message": event.message,
                }))?;
                if let Err(e) = context.peer.notify_progress(param).await {
                    warn!(invocation = %running.id(), error = %e, "could not send progress");
                }
            }

            let report = running.finish().await;
            Ok(outcome_result(report.outcome))
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a running tool call.
    fn on_cancelled(
        &self,
        notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        async move {
            let found = self.cancel_request(&notification.request_id.to_string());
            info!(
                request_id = %notification.request_id,
                reason = ?notification.reason,
                found,
                "request cancelled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_kernel::{StrataConfig, ToolError};

    fn mcp() -> StrataMcp {
        let mut config = StrataConfig::default();
        config.seed.insert("/etc/config".into(), "max_users=100".into());
        StrataMcp::new(Kernel::new(config).unwrap())
    }

    #[test]
    fn test_get_info_advertises_subscriptions() {
        let info = mcp().get_info();
        let caps = serde_json::to_value(&info.capabilities).unwrap();
        assert!(caps["tools"].is_object());
        assert_eq!(caps["resources"]["subscribe"], true);
        assert!(info.instructions.unwrap().contains("mem://"));
    }

    #[test]
    fn test_outcome_result() {
        let ok = outcome_result(ToolOutcome::Completed {
            summary: "done".into(),
        });
        assert_ne!(ok.is_error, Some(true));

        let cancelled = outcome_result(ToolOutcome::Cancelled {
            message: "Operation cancelled by user.".into(),
        });
        assert_ne!(cancelled.is_error, Some(true));

        let failed = outcome_result(ToolOutcome::Failed {
            error: ToolError::GenerationFailed("boom".into()),
        });
        assert_eq!(failed.is_error, Some(true));
    }

    #[test]
    fn test_cancel_request() {
        let mcp = mcp();
        let token = CancellationToken::new();
        mcp.in_flight.insert("7".into(), token.clone());
        {
            let _guard = InFlight {
                requests: &mcp.in_flight,
                key: "7".into(),
            };
            assert!(mcp.cancel_request("7"));
            assert!(token.is_cancelled());
        }
        assert!(!mcp.cancel_request("7"));
    }

    #[test]
    fn test_kernel_is_shared_between_clones() {
        let mcp = mcp();
        let other = mcp.clone();
        assert_eq!(
            other.kernel().read("mem://etc/config").unwrap().content(),
            "max_users=100"
        );
        assert!(Arc::ptr_eq(&mcp.session, &other.session));
    }
}
