//! Address resolution: file vs. directory semantics and direct-children listing.
//!
//! Directories have no child list of their own. Children are derived from the
//! flat key space by prefix: a key is a direct child of `dir` when it starts
//! with `dir`, differs from it, and has no further `/` except one trailing
//! directory marker.

use std::collections::HashMap;

use serde::Serialize;
use strum::{Display, EnumString};

use super::Node;
use super::error::{StoreError, StoreResult};
use super::path::NodePath;

/// Placeholder content returned when a directory is read.
pub const DIRECTORY_CONTENT_MARKER: &str = "Content not available for directories";

/// Kind of a stored node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub path: NodePath,
    pub name: String,
    pub kind: NodeKind,
}

/// Result of resolving an address against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    File {
        path: NodePath,
        content: String,
    },
    Directory {
        path: NodePath,
        children: Vec<DirEntry>,
    },
}

impl Resolved {
    pub fn path(&self) -> &NodePath {
        match self {
            Resolved::File { path, .. } | Resolved::Directory { path, .. } => path,
        }
    }

    /// File content, or the directory marker.
    pub fn content(&self) -> &str {
        match self {
            Resolved::File { content, .. } => content,
            Resolved::Directory { .. } => DIRECTORY_CONTENT_MARKER,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Resolved::File { .. } => NodeKind::File,
            Resolved::Directory { .. } => NodeKind::Directory,
        }
    }
}

/// Whether `key` is exactly one level below `dir`.
fn is_direct_child(dir: &NodePath, key: &NodePath) -> bool {
    match key.relative_to(dir) {
        Some(rest) => {
            let rest = rest.strip_suffix('/').unwrap_or(rest);
            !rest.is_empty() && !rest.contains('/')
        }
        None => false,
    }
}

/// Direct children of `dir`, sorted by name.
pub fn direct_children(entries: &HashMap<NodePath, Node>, dir: &NodePath) -> Vec<DirEntry> {
    let mut children: Vec<DirEntry> = entries
        .iter()
        .filter(|(key, _)| is_direct_child(dir, key))
        .map(|(key, node)| DirEntry {
            path: key.clone(),
            name: key.name().to_string(),
            kind: node.kind(),
        })
        .collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));
    children
}

/// Resolve `path` to a file payload or a directory listing.
///
/// A path without a trailing slash is only ever looked up as a file key; it is
/// never coerced into a directory lookup.
pub fn resolve(entries: &HashMap<NodePath, Node>, path: &NodePath) -> StoreResult<Resolved> {
    match entries.get(path) {
        Some(Node::File(content)) => Ok(Resolved::File {
            path: path.clone(),
            content: content.clone(),
        }),
        Some(Node::Directory) => Ok(Resolved::Directory {
            path: path.clone(),
            children: direct_children(entries, path),
        }),
        None => Err(StoreError::not_found(path.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> NodePath {
        NodePath::parse(raw).unwrap()
    }

    fn entries(keys: &[&str]) -> HashMap<NodePath, Node> {
        let mut map = HashMap::new();
        map.insert(NodePath::root(), Node::Directory);
        for key in keys {
            let path = p(key);
            let node = if path.is_dir() {
                Node::Directory
            } else {
                Node::File(format!("content of {key}"))
            };
            map.insert(path, node);
        }
        map
    }

    #[test]
    fn test_listing_is_one_level_deep() {
        let map = entries(&["/a/", "/a/b/", "/a/b/c.txt"]);
        let children = direct_children(&map, &p("/a/"));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, p("/a/b/"));
        assert_eq!(children[0].name, "b");
        assert_eq!(children[0].kind, NodeKind::Directory);
    }

    #[test]
    fn test_root_listing() {
        let map = entries(&["/etc/", "/etc/config", "/readme.md"]);
        let names: Vec<_> = direct_children(&map, &NodePath::root())
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("etc".to_string(), NodeKind::Directory),
                ("readme.md".to_string(), NodeKind::File),
            ]
        );
    }

    #[test]
    fn test_sibling_prefix_is_not_a_child() {
        let map = entries(&["/a/", "/ab.txt", "/a/x.txt"]);
        let children = direct_children(&map, &p("/a/"));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "x.txt");
    }

    #[test]
    fn test_file_form_is_not_coerced_to_directory() {
        let map = entries(&["/docs/", "/docs/a.md"]);
        assert!(matches!(
            resolve(&map, &p("/docs")),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            resolve(&map, &p("/docs/")),
            Ok(Resolved::Directory { .. })
        ));
    }

    #[test]
    fn test_resolve_file_and_directory_content() {
        let map = entries(&["/docs/", "/docs/a.md"]);
        let file = resolve(&map, &p("/docs/a.md")).unwrap();
        assert_eq!(file.content(), "content of /docs/a.md");
        assert_eq!(file.kind(), NodeKind::File);

        let dir = resolve(&map, &p("/docs/")).unwrap();
        assert_eq!(dir.content(), DIRECTORY_CONTENT_MARKER);
    }

    #[test]
    fn test_node_kind_strings() {
        assert_eq!(NodeKind::File.to_string(), "file");
        assert_eq!("directory".parse::<NodeKind>().unwrap(), NodeKind::Directory);
    }
}
