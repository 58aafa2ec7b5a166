//! Path normalization and splitting.
//!
//! Drive has no paths, only objects with parent edges. Callers still address
//! objects with slash-delimited paths relative to the configured root, so
//! every path is normalized into a [`PathKey`] before it reaches the resolver.

use std::fmt;

use crate::error::{ErrorKind, Result};

/// A normalized, slash-delimited path relative to the adapter root.
///
/// The empty key is the root itself.
///
/// # Examples
///
/// ```
/// use drivefs_storage::PathKey;
///
/// let key = PathKey::parse("/docs//./reports/q1.pdf/").unwrap();
/// assert_eq!(key.as_str(), "docs/reports/q1.pdf");
/// assert_eq!(key.leaf(), Some("q1.pdf"));
/// assert!(PathKey::parse("/").unwrap().is_root());
/// assert!(PathKey::parse("docs/../etc").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize a caller-supplied path.
    ///
    /// Empty and `.` segments are dropped. `..` has no meaning for Drive ids
    /// and is rejected, as are NUL bytes.
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {},
                ".." => exn::bail!(ErrorKind::InvalidPath(path.to_string())),
                s if s.contains('\0') => exn::bail!(ErrorKind::InvalidPath(path.to_string())),
                s => segments.push(s),
            }
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Parent key; the root is its own parent.
    pub fn parent(&self) -> Self {
        Self(split(&self.0, "", SplitMode::FullParent).0.to_string())
    }

    pub fn leaf(&self) -> Option<&str> {
        match self.is_root() {
            true => None,
            false => Some(split(&self.0, "", SplitMode::FullParent).1),
        }
    }

    /// Append one segment. The segment is taken verbatim (it is an id or a
    /// name that came from Drive), except that slashes are not allowed.
    pub fn join(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains('/') || segment.contains('\0') || segment == ".." || segment == "." {
            exn::bail!(ErrorKind::InvalidPath(format!("{}/{segment}", self.0)));
        }
        Ok(match self.is_root() {
            true => Self(segment.to_string()),
            false => Self(format!("{}/{segment}", self.0)),
        })
    }

    /// Prepend a prefix key.
    pub fn under(&self, prefix: &PathKey) -> Self {
        match (prefix.is_root(), self.is_root()) {
            (true, _) => self.clone(),
            (false, true) => prefix.clone(),
            (false, false) => Self(format!("{}/{}", prefix.0, self.0)),
        }
    }

    /// Strip a prefix key, returning `None` when `self` is not below it.
    pub fn strip(&self, prefix: &PathKey) -> Option<Self> {
        if prefix.is_root() {
            return Some(self.clone());
        }
        if self == prefix {
            return Some(Self::root());
        }
        self.0
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| Self(rest.to_string()))
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much of the path [`split`] returns as the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Only the segment directly above the leaf, which is all that is needed
    /// to look an object up under its parent id.
    ImmediateParent,
    /// Every segment above the leaf, joined with `/`.
    FullParent,
}

/// Decompose a path into `(parent, leaf)`.
///
/// `""` and `"/"` map to `(root, root)`. An empty parent is replaced by
/// `root`. No I/O, no validation beyond trimming slashes.
///
/// # Examples
///
/// ```
/// use drivefs_storage::path::{split, SplitMode};
///
/// assert_eq!(split("/a/b/c.txt", "root", SplitMode::FullParent), ("a/b", "c.txt"));
/// assert_eq!(split("a/b/c.txt", "root", SplitMode::ImmediateParent), ("b", "c.txt"));
/// assert_eq!(split("c.txt", "root", SplitMode::FullParent), ("root", "c.txt"));
/// assert_eq!(split("/", "root", SplitMode::FullParent), ("root", "root"));
/// ```
pub fn split<'a>(path: &'a str, root: &'a str, mode: SplitMode) -> (&'a str, &'a str) {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return (root, root);
    }
    let (parent, leaf) = match trimmed.rsplit_once('/') {
        Some((parent, leaf)) => (parent.trim_end_matches('/'), leaf),
        None => ("", trimmed),
    };
    let parent = match mode {
        SplitMode::FullParent => parent,
        SplitMode::ImmediateParent => parent.rsplit('/').next().unwrap_or(""),
    };
    match parent.is_empty() {
        true => (root, leaf),
        false => (parent, leaf),
    }
}
