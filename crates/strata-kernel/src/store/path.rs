//! Normalized node paths and scheme-qualified addresses.
//!
//! A [`NodePath`] is always absolute. A trailing `/` marks a directory; the
//! root is `/`. Normalization rejects `.`/`..` segments and empty interior
//! segments instead of resolving them, so two distinct inputs can never
//! collapse onto the same stored key by accident.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};

/// A normalized, absolute path into the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(String);

impl NodePath {
    /// The root directory, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalize a raw path.
    ///
    /// A missing leading `/` is added and the empty string is the root.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let body = raw.strip_prefix('/').unwrap_or(raw);
        if body.is_empty() {
            return Ok(Self::root());
        }

        let (body, is_dir) = match body.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (body, false),
        };

        let mut normalized = String::with_capacity(body.len() + 2);
        for segment in body.split('/') {
            match segment {
                "" => return Err(StoreError::invalid_path(format!("{raw}: empty segment"))),
                "." | ".." => {
                    return Err(StoreError::invalid_path(format!(
                        "{raw}: relative segment '{segment}'"
                    )));
                }
                _ => {
                    normalized.push('/');
                    normalized.push_str(segment);
                }
            }
        }
        if is_dir {
            normalized.push('/');
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this path denotes a directory (trailing `/`, or the root).
    pub fn is_dir(&self) -> bool {
        self.0.ends_with('/')
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The directory form of this path: `/a/b` becomes `/a/b/`.
    pub fn as_dir(&self) -> Self {
        if self.is_dir() {
            self.clone()
        } else {
            Self(format!("{}/", self.0))
        }
    }

    /// The file form of a directory path: `/a/b/` becomes `/a/b`. `None`
    /// for the root.
    pub fn as_file(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0.strip_suffix('/').unwrap_or(&self.0).to_string()))
    }

    /// Immediate parent directory.
    ///
    /// A root-level node's parent is `/`. The root has no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let trimmed = self.0.strip_suffix('/').unwrap_or(&self.0);
        let idx = trimmed.rfind('/')?;
        Some(Self(trimmed[..=idx].to_string()))
    }

    /// Final segment, without the directory marker. Empty for the root.
    pub fn name(&self) -> &str {
        let trimmed = self.0.strip_suffix('/').unwrap_or(&self.0);
        match trimmed.rfind('/') {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// Append a relative path under this directory.
    pub fn join(&self, relative: &str) -> StoreResult<Self> {
        if !self.is_dir() {
            return Err(StoreError::invalid_path(format!(
                "cannot join under file {}",
                self.0
            )));
        }
        let relative = relative.strip_prefix('/').unwrap_or(relative);
        if relative.is_empty() {
            return Ok(self.clone());
        }
        Self::parse(&format!("{}{}", self.0, relative))
    }

    /// Every proper ancestor directory, root first.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut chain = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            current = dir.parent();
            chain.push(dir);
        }
        chain.reverse();
        chain
    }

    /// Whether `self` lies strictly below the directory `dir`.
    pub fn is_descendant_of(&self, dir: &NodePath) -> bool {
        dir.is_dir() && self.0.len() > dir.0.len() && self.0.starts_with(&dir.0)
    }

    /// The part of this path below `dir`, if it is a descendant.
    pub fn relative_to(&self, dir: &NodePath) -> Option<&str> {
        if self.is_descendant_of(dir) {
            Some(&self.0[dir.0.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodePath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

impl schemars::JsonSchema for NodePath {
    fn schema_name() -> Cow<'static, str> {
        "NodePath".into()
    }

    fn inline_schema() -> bool {
        true
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "description": "Absolute path; a trailing '/' denotes a directory",
        })
    }
}

// ============================================================================
// Addresses
// ============================================================================

/// A scheme-qualified path, `scheme://path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: String,
    path: NodePath,
}

impl Address {
    pub fn new(scheme: impl Into<String>, path: NodePath) -> Self {
        Self {
            scheme: scheme.into(),
            path,
        }
    }

    /// Parse `scheme://path` or a bare path.
    ///
    /// A scheme other than `expected_scheme` is an `InvalidPath`.
    pub fn parse(raw: &str, expected_scheme: &str) -> StoreResult<Self> {
        let path = match raw.split_once("://") {
            Some((scheme, rest)) if scheme == expected_scheme => rest,
            Some((scheme, _)) => {
                return Err(StoreError::invalid_path(format!(
                    "{raw}: unsupported scheme '{scheme}'"
                )));
            }
            None => raw,
        };
        Ok(Self::new(expected_scheme, NodePath::parse(path)?))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn into_path(self) -> NodePath {
        self.path
    }

    /// Render back to `scheme://path` form.
    pub fn uri(&self) -> String {
        render_uri(&self.scheme, &self.path)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Render a path under `scheme` without allocating an [`Address`].
pub fn render_uri(scheme: &str, path: &NodePath) -> String {
    format!("{}://{}", scheme, &path.as_str()[1..])
}
