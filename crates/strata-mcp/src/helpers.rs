//! Conversions between kernel types and MCP wire shapes.
//!
//! Shapes that vary between protocol revisions go through `serde_json` so the
//! field names live in one place.

use rmcp::{
    ErrorData as McpError,
    model::{AnnotateAble, RawResource, Resource, Tool},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use strata_kernel::{
    DIRECTORY_CONTENT_MARKER, DirEntry, ElicitationResponse, Node, NodePath, StoreError,
    ToolError, ToolSpec, render_uri,
};

/// Build an rmcp model type from its JSON form.
pub(crate) fn from_wire<T: DeserializeOwned>(value: Value) -> Result<T, McpError> {
    serde_json::from_value(value)
        .map_err(|e| McpError::internal_error(format!("building protocol message: {e}"), None))
}

/// Byte size as the protocol carries it; unknown when it does not fit.
fn resource_size(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// Resource entry for one stored node.
pub(crate) fn node_resource(scheme: &str, path: &NodePath, node: &Node) -> Resource {
    let name = if path.is_root() {
        "/".to_string()
    } else {
        path.name().to_string()
    };
    let (description, mime_type, size) = match node {
        Node::File(content) => (
            format!("file, {} bytes", content.len()),
            "text/plain",
            resource_size(content.len()),
        ),
        Node::Directory => ("directory".to_string(), "application/json", None),
    };
    RawResource {
        uri: render_uri(scheme, path),
        name,
        title: None,
        description: Some(description),
        mime_type: Some(mime_type.to_string()),
        size,
        icons: None,
        meta: None,
    }
    .no_annotation()
}

/// JSON body returned when a directory is read as a resource.
pub(crate) fn directory_listing(scheme: &str, children: &[DirEntry]) -> Value {
    let children: Vec<Value> = children
        .iter()
        .map(|child| {
            json!({
                "uri": render_uri(scheme, &child.path),
                "name": child.name,
                "kind": child.kind,
            })
        })
        .collect();
    json!({
        "message": DIRECTORY_CONTENT_MARKER,
        "children": children,
    })
}

/// Tool catalog entry in MCP form.
pub(crate) fn catalog_tool(spec: &ToolSpec) -> Result<Tool, McpError> {
    from_wire(json!({
        "name": spec.name,
        "description": spec.description,
        "inputSchema": spec.input_schema,
        "annotations": {
            "destructiveHint": spec.destructive,
            "readOnlyHint": false,
        },
    }))
}

/// Map a kernel store error onto a protocol error for resource requests.
pub(crate) fn store_error(err: StoreError) -> McpError {
    match err {
        StoreError::NotFound(_) => McpError::resource_not_found(err.to_string(), None),
        _ => McpError::invalid_params(err.to_string(), None),
    }
}

/// Map a request-level tool error onto a protocol error.
pub(crate) fn tool_error(err: ToolError) -> McpError {
    match err {
        ToolError::UnknownTool(_) | ToolError::InvalidArguments(_) => {
            McpError::invalid_params(err.to_string(), None)
        }
        _ => McpError::internal_error(err.to_string(), None),
    }
}

/// Read an elicitation result as the kernel's response type.
///
/// Unrecognized actions count as a decline.
pub(crate) fn elicitation_response(result: Value) -> ElicitationResponse {
    serde_json::from_value(result).unwrap_or_default()
}

/// Text out of a sampling result, whose `content` is a block or a list of blocks.
pub(crate) fn sampled_text(result: &Value) -> Option<String> {
    let text_of = |block: &Value| {
        (block.get("type").and_then(Value::as_str) == Some("text"))
            .then(|| block.get("text").and_then(Value::as_str))
            .flatten()
            .map(str::to_string)
    };
    match result.get("content")? {
        Value::Array(blocks) => {
            let parts: Vec<String> = blocks.iter().filter_map(text_of).collect();
            (!parts.is_empty()).then(|| parts.concat())
        }
        block => text_of(block),
    }
}

/// Whether a client's declared capabilities include `name`.
pub(crate) fn client_supports(client_info: Option<Value>, name: &str) -> bool {
    client_info
        .as_ref()
        .and_then(|info| info.get("capabilities"))
        .and_then(|caps| caps.get(name))
        .is_some_and(|cap| !cap.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_kernel::{ElicitationAction, NodeKind, ToolKind};

    fn p(raw: &str) -> NodePath {
        NodePath::parse(raw).unwrap()
    }

    #[test]
    fn test_node_resource() {
        let file = node_resource("mem", &p("/docs/a.txt"), &Node::File("hello".into()));
        assert_eq!(file.uri, "mem://docs/a.txt");
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.size, Some(5));
        assert_eq!(file.mime_type.as_deref(), Some("text/plain"));

        let root = node_resource("mem", &NodePath::root(), &Node::Directory);
        assert_eq!(root.uri, "mem://");
        assert_eq!(root.name, "/");
        assert_eq!(root.size, None);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_content_has_no_size() {
        assert_eq!(resource_size(u32::MAX as usize), Some(u32::MAX));
        assert_eq!(resource_size(u32::MAX as usize + 1), None);
    }

    #[test]
    fn test_directory_listing() {
        let children = vec![
            DirEntry {
                path: p("/docs/a.txt"),
                name: "a.txt".into(),
                kind: NodeKind::File,
            },
            DirEntry {
                path: p("/docs/sub/"),
                name: "sub".into(),
                kind: NodeKind::Directory,
            },
        ];
        let body = directory_listing("mem", &children);
        assert_eq!(body["message"], DIRECTORY_CONTENT_MARKER);
        assert_eq!(body["children"][0]["uri"], "mem://docs/a.txt");
        assert_eq!(body["children"][1]["kind"], "directory");
    }

    #[test]
    fn test_catalog_tool() {
        let tool = catalog_tool(&ToolKind::DeleteWithConfirmation.spec()).unwrap();
        assert_eq!(tool.name, "delete-with-confirmation");
        let annotations = serde_json::to_value(&tool.annotations).unwrap();
        assert_eq!(annotations["destructiveHint"], true);
        assert_eq!(tool.input_schema.get("type"), Some(&json!("object")));
    }

    #[test]
    fn test_elicitation_response() {
        let accepted = elicitation_response(json!({"action": "accept", "content": {"confirm": true}}));
        assert_eq!(accepted.action, ElicitationAction::Accept);
        assert_eq!(accepted.content, Some(json!({"confirm": true})));

        let cancelled = elicitation_response(json!({"action": "cancel"}));
        assert_eq!(cancelled.action, ElicitationAction::Cancel);

        let garbage = elicitation_response(json!({"action": "shrug"}));
        assert_eq!(garbage.action, ElicitationAction::Decline);
    }

    #[test]
    fn test_sampled_text() {
        let single = json!({"role": "assistant", "content": {"type": "text", "text": "hi"}});
        assert_eq!(sampled_text(&single).as_deref(), Some("hi"));

        let blocks = json!({"content": [
            {"type": "text", "text": "a"},
            {"type": "image", "data": "...", "mimeType": "image/png"},
            {"type": "text", "text": "b"},
        ]});
        assert_eq!(sampled_text(&blocks).as_deref(), Some("ab"));

        let image_only = json!({"content": {"type": "image", "data": "..."}});
        assert_eq!(sampled_text(&image_only), None);
    }

    #[test]
    fn test_client_supports() {
        let info = json!({"capabilities": {"elicitation": {}, "sampling": null}});
        assert!(client_supports(Some(info.clone()), "elicitation"));
        assert!(!client_supports(Some(info), "sampling"));
        assert!(!client_supports(None, "elicitation"));
    }

    #[test]
    fn test_error_mapping() {
        let err = tool_error(ToolError::UnknownTool("x".into()));
        assert!(err.message.contains("unknown tool"));
        let err = store_error(StoreError::NotFound("/a".into()));
        assert!(err.message.contains("/a"));
    }
}
