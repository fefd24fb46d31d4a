//! Hierarchical in-memory path store.
//!
//! A flat map from normalized [`NodePath`] keys to [`Node`]s. The tree is
//! implicit: directory keys end in `/` and children are found by prefix, see
//! [`resolve`].
//!
//! Every mutation runs as one critical section under the write lock, so a
//! parent check and the insert that depends on it can never interleave with
//! another writer, and readers never observe a half-deleted subtree. The lock
//! is never held across an `.await`.
//!
//! Mutations return the keys they changed. The store never notifies anyone
//! itself; callers feed the change set to the subscription registry.

pub mod error;
pub mod path;
pub mod resolve;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

pub use error::{StoreError, StoreResult};
pub use path::{Address, NodePath, render_uri};
pub use resolve::{DIRECTORY_CONTENT_MARKER, DirEntry, NodeKind, Resolved};

/// A stored node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File(String),
    Directory,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Directory => NodeKind::Directory,
        }
    }

    /// File payload; `None` for directories.
    pub fn content(&self) -> Option<&str> {
        match self {
            Node::File(content) => Some(content),
            Node::Directory => None,
        }
    }
}

/// Options for [`PathStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Remove every descendant along with a directory. When false, a
    /// directory that still has descendants is refused.
    pub cascade: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self { cascade: true }
    }
}

/// Keys changed by a mutation, sorted.
pub type Changes = Vec<NodePath>;

/// The in-memory path store.
#[derive(Debug)]
pub struct PathStore {
    entries: RwLock<HashMap<NodePath, Node>>,
}

/// Shared handle to a path store.
pub type SharedPathStore = Arc<PathStore>;

/// Create a new empty shared path store.
pub fn shared_path_store() -> SharedPathStore {
    Arc::new(PathStore::new())
}

impl Default for PathStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the parent directory of `path` is present. The root always is.
/// The key sharing `path`'s name in the other form, if one is stored.
///
/// A name is either a file or a directory, never both.
fn shadowing_key(entries: &HashMap<NodePath, Node>, path: &NodePath) -> Option<NodePath> {
    let other = if path.is_dir() {
        path.as_file()?
    } else {
        path.as_dir()
    };
    entries.contains_key(&other).then_some(other)
}

fn parent_exists(entries: &HashMap<NodePath, Node>, path: &NodePath) -> bool {
    match path.parent() {
        Some(parent) if parent.is_root() => true,
        Some(parent) => matches!(entries.get(&parent), Some(Node::Directory)),
        None => true,
    }
}

impl PathStore {
    /// Create a store holding only the root directory.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(NodePath::root(), Node::Directory);
        Self {
            entries: RwLock::new(entries),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or overwrite a file.
    pub fn write(&self, path: &NodePath, content: impl Into<String>) -> StoreResult<Changes> {
        if path.is_dir() {
            return Err(StoreError::invalid_path(format!(
                "{path}: cannot write content to a directory path"
            )));
        }

        let mut entries = self.entries.write();
        if !parent_exists(&entries, path) {
            return Err(StoreError::parent_missing(path.as_str()));
        }
        if let Some(dir) = shadowing_key(&entries, path) {
            return Err(StoreError::already_exists(dir.as_str()));
        }
        entries.insert(path.clone(), Node::File(content.into()));
        debug!(path = %path, "wrote file");
        Ok(vec![path.clone()])
    }

    /// Create a directory. `path` is taken in directory form.
    ///
    /// Fails `AlreadyExists` when the directory, or a file of the same name,
    /// is already present.
    pub fn mkdir(&self, path: &NodePath) -> StoreResult<Changes> {
        let dir = path.as_dir();
        let mut entries = self.entries.write();
        if entries.contains_key(&dir) {
            return Err(StoreError::already_exists(dir.as_str()));
        }
        if let Some(file) = shadowing_key(&entries, &dir) {
            return Err(StoreError::already_exists(file.as_str()));
        }
        if !parent_exists(&entries, &dir) {
            return Err(StoreError::parent_missing(dir.as_str()));
        }
        entries.insert(dir.clone(), Node::Directory);
        debug!(path = %dir, "created directory");
        Ok(vec![dir])
    }

    /// Create a directory and every missing ancestor.
    ///
    /// Returns only the directories actually created; an already present
    /// directory is not an error. A file standing where any directory of the
    /// chain would go fails the whole call before anything is created.
    pub fn mkdir_all(&self, path: &NodePath) -> StoreResult<Changes> {
        let dir = path.as_dir();
        let mut chain = dir.ancestors();
        chain.push(dir);

        let mut entries = self.entries.write();
        if let Some(file) = chain.iter().find_map(|dir| shadowing_key(&entries, dir)) {
            return Err(StoreError::already_exists(file.as_str()));
        }

        let created: Changes = chain
            .into_iter()
            .filter(|dir| !entries.contains_key(dir))
            .collect();
        for dir in &created {
            entries.insert(dir.clone(), Node::Directory);
        }
        if !created.is_empty() {
            debug!(count = created.len(), "created directories");
        }
        Ok(created)
    }

    /// Delete a file, or a directory together with its subtree.
    pub fn delete(&self, path: &NodePath, options: DeleteOptions) -> StoreResult<Changes> {
        if path.is_root() {
            return Err(StoreError::invalid_path("/: the root cannot be deleted"));
        }

        let mut entries = self.entries.write();
        if !entries.contains_key(path) {
            return Err(StoreError::not_found(path.as_str()));
        }

        let mut removed: Changes = vec![path.clone()];
        if path.is_dir() {
            let descendants: Vec<NodePath> = entries
                .keys()
                .filter(|key| key.is_descendant_of(path))
                .cloned()
                .collect();
            if !options.cascade && !descendants.is_empty() {
                return Err(StoreError::directory_not_empty(path.as_str()));
            }
            removed.extend(descendants);
        }

        for key in &removed {
            entries.remove(key);
        }
        removed.sort();
        debug!(path = %path, removed = removed.len(), "deleted");
        Ok(removed)
    }

    /// Copy a file's payload to a new key.
    pub fn copy(&self, source: &NodePath, destination: &NodePath) -> StoreResult<Changes> {
        if destination.is_dir() {
            return Err(StoreError::invalid_path(format!(
                "{destination}: copy destination must be a file path"
            )));
        }

        let mut entries = self.entries.write();
        let content = match entries.get(source) {
            Some(Node::File(content)) => content.clone(),
            Some(Node::Directory) | None => return Err(StoreError::not_found(source.as_str())),
        };
        if !parent_exists(&entries, destination) {
            return Err(StoreError::parent_missing(destination.as_str()));
        }
        if let Some(dir) = shadowing_key(&entries, destination) {
            return Err(StoreError::already_exists(dir.as_str()));
        }
        entries.insert(destination.clone(), Node::File(content));
        debug!(source = %source, destination = %destination, "copied file");
        Ok(vec![destination.clone()])
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read a file's content, or a directory's listing.
    pub fn read(&self, path: &NodePath) -> StoreResult<Resolved> {
        resolve::resolve(&self.entries.read(), path)
    }

    /// Direct children of a directory.
    pub fn list(&self, dir: &NodePath) -> StoreResult<Vec<DirEntry>> {
        match self.read(dir)? {
            Resolved::Directory { children, .. } => Ok(children),
            Resolved::File { path, .. } => Err(StoreError::invalid_path(format!(
                "{path}: not a directory"
            ))),
        }
    }

    pub fn get(&self, path: &NodePath) -> Option<Node> {
        self.entries.read().get(path).cloned()
    }

    pub fn exists(&self, path: &NodePath) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Number of stored nodes, including the root.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Consistent, sorted copy of every node.
    pub fn snapshot(&self) -> BTreeMap<NodePath, Node> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Consistent, sorted copy of a directory and all its descendants.
    pub fn snapshot_subtree(&self, dir: &NodePath) -> StoreResult<BTreeMap<NodePath, Node>> {
        let entries = self.entries.read();
        if !matches!(entries.get(dir), Some(Node::Directory)) {
            return Err(StoreError::not_found(dir.as_str()));
        }
        Ok(entries
            .iter()
            .filter(|(key, _)| *key == dir || key.is_descendant_of(dir))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> NodePath {
        NodePath::parse(raw).unwrap()
    }

    #[test]
    fn test_root_always_exists() {
        let store = PathStore::new();
        assert!(store.exists(&NodePath::root()));
        assert!(store.is_empty());
        assert!(matches!(
            store.delete(&NodePath::root(), DeleteOptions::default()),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let store = PathStore::new();
        let changed = store.write(&p("/notes.txt"), "hello").unwrap();
        assert_eq!(changed, vec![p("/notes.txt")]);

        let resolved = store.read(&p("/notes.txt")).unwrap();
        assert_eq!(resolved.content(), "hello");

        store.write(&p("/notes.txt"), "again").unwrap();
        assert_eq!(store.read(&p("/notes.txt")).unwrap().content(), "again");
    }

    #[test]
    fn test_write_rejects_directory_path() {
        let store = PathStore::new();
        assert!(matches!(
            store.write(&p("/dir/"), "x"),
            Err(StoreError::InvalidPath(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_requires_parent() {
        let store = PathStore::new();
        assert!(matches!(
            store.write(&p("/missing/file.txt"), "x"),
            Err(StoreError::ParentMissing(_))
        ));
        store.mkdir(&p("/missing")).unwrap();
        store.write(&p("/missing/file.txt"), "x").unwrap();
    }

    #[test]
    fn test_mkdir_normalizes_and_rejects_duplicates() {
        let store = PathStore::new();
        let changed = store.mkdir(&p("/a")).unwrap();
        assert_eq!(changed, vec![p("/a/")]);
        assert!(matches!(store.mkdir(&p("/a/")), Err(StoreError::AlreadyExists(_))));
        assert!(matches!(store.mkdir(&p("/x/y/")), Err(StoreError::ParentMissing(_))));

        store.write(&p("/file"), "x").unwrap();
        assert!(matches!(store.mkdir(&p("/file/")), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_mkdir_all_reports_only_created() {
        let store = PathStore::new();
        store.mkdir(&p("/a/")).unwrap();
        let created = store.mkdir_all(&p("/a/b/c/")).unwrap();
        assert_eq!(created, vec![p("/a/b/"), p("/a/b/c/")]);
        assert!(store.mkdir_all(&p("/a/b/c/")).unwrap().is_empty());
    }

    #[test]
    fn test_mkdir_all_refuses_to_shadow_a_file() {
        let store = PathStore::new();
        store.write(&p("/a"), "x").unwrap();

        assert!(matches!(
            store.mkdir_all(&p("/a/b/")),
            Err(StoreError::AlreadyExists(key)) if key == "/a"
        ));
        // Nothing from the chain was left behind.
        assert!(!store.exists(&p("/a/")));
        assert!(!store.exists(&p("/a/b/")));
        assert_eq!(store.list(&NodePath::root()).unwrap().len(), 1);
    }

    #[test]
    fn test_write_refuses_to_shadow_a_directory() {
        let store = PathStore::new();
        store.mkdir(&p("/a/")).unwrap();
        store.write(&p("/src"), "payload").unwrap();

        assert!(matches!(
            store.write(&p("/a"), "x"),
            Err(StoreError::AlreadyExists(key)) if key == "/a/"
        ));
        assert!(matches!(
            store.copy(&p("/src"), &p("/a")),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(!store.exists(&p("/a")));
        assert_eq!(store.get(&p("/a/")), Some(Node::Directory));
    }

    #[test]
    fn test_cascade_delete() {
        let store = PathStore::new();
        store.mkdir(&p("/x/")).unwrap();
        store.write(&p("/x/y.txt"), "y").unwrap();
        store.mkdir(&p("/x/z/")).unwrap();
        store.write(&p("/xy.txt"), "sibling").unwrap();

        let removed = store.delete(&p("/x/"), DeleteOptions::default()).unwrap();
        assert_eq!(removed, vec![p("/x/"), p("/x/y.txt"), p("/x/z/")]);
        assert!(matches!(store.read(&p("/x/y.txt")), Err(StoreError::NotFound(_))));
        assert!(store.exists(&p("/xy.txt")));
    }

    #[test]
    fn test_non_cascading_delete_refuses_non_empty() {
        let store = PathStore::new();
        store.mkdir(&p("/x/")).unwrap();
        store.write(&p("/x/y.txt"), "y").unwrap();
        assert!(matches!(
            store.delete(&p("/x/"), DeleteOptions { cascade: false }),
            Err(StoreError::DirectoryNotEmpty(_))
        ));
        assert!(store.exists(&p("/x/y.txt")));

        store.delete(&p("/x/y.txt"), DeleteOptions { cascade: false }).unwrap();
        store.delete(&p("/x/"), DeleteOptions { cascade: false }).unwrap();
    }

    #[test]
    fn test_delete_missing() {
        let store = PathStore::new();
        assert!(matches!(
            store.delete(&p("/nope"), DeleteOptions::default()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&p("/nope/"), DeleteOptions::default()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_copy() {
        let store = PathStore::new();
        store.write(&p("/src.txt"), "payload").unwrap();
        store.mkdir(&p("/dir/")).unwrap();

        assert!(matches!(
            store.copy(&p("/missing"), &p("/dst")),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.copy(&p("/dir/"), &p("/dst")),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.copy(&p("/src.txt"), &p("/nope/dst")),
            Err(StoreError::ParentMissing(_))
        ));

        let changed = store.copy(&p("/src.txt"), &p("/dir/dst.txt")).unwrap();
        assert_eq!(changed, vec![p("/dir/dst.txt")]);
        assert_eq!(store.read(&p("/dir/dst.txt")).unwrap().content(), "payload");
        assert_eq!(store.read(&p("/src.txt")).unwrap().content(), "payload");
    }

    #[test]
    fn test_list_and_snapshot_subtree() {
        let store = PathStore::new();
        store.mkdir_all(&p("/a/b/")).unwrap();
        store.write(&p("/a/b/c.txt"), "c").unwrap();
        store.write(&p("/a/d.txt"), "d").unwrap();

        let names: Vec<_> = store.list(&p("/a/")).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "d.txt"]);
        assert!(matches!(store.list(&p("/a/d.txt")), Err(StoreError::InvalidPath(_))));

        let subtree = store.snapshot_subtree(&p("/a/b/")).unwrap();
        let keys: Vec<_> = subtree.keys().cloned().collect();
        assert_eq!(keys, vec![p("/a/b/"), p("/a/b/c.txt")]);
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let store = shared_path_store();
        store.mkdir(&p("/shared/")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let path = p(&format!("/shared/{i}-{j}.txt"));
                        store.write(&path, format!("{i}:{j}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list(&p("/shared/")).unwrap().len(), 400);
        let removed = store.delete(&p("/shared/"), DeleteOptions::default()).unwrap();
        assert_eq!(removed.len(), 401);
        assert!(store.is_empty());
    }
}
