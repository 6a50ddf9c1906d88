//! Activity paths

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered sequence of activity identifiers from the tree root to a node
///
/// The root activity has the empty path. Paths are the persistence key for
/// work state, so their textual form (`key()`) must stay stable.
///
/// # Example
///
/// ```
/// use govrun_activity::ActivityPath;
///
/// let path = ActivityPath::root().child("reconcile").child("correlate");
/// assert_eq!(path.key(), "reconcile/correlate");
/// assert_eq!(ActivityPath::parse("reconcile/correlate"), path);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityPath(Vec<String>);

impl ActivityPath {
    /// Path of the tree root
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from identifiers
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse the persisted form produced by [`ActivityPath::key`]
    pub fn parse(key: &str) -> Self {
        if key.is_empty() {
            return Self::root();
        }
        Self(key.split('/').map(str::to_string).collect())
    }

    /// Path of a child activity
    pub fn child(&self, identifier: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(identifier.into());
        Self(segments)
    }

    /// Path of the parent activity, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of identifiers in the path (0 for the root)
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` is `ancestor` or lies below it
    pub fn starts_with(&self, ancestor: &ActivityPath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Stable textual key used by the work-state stores
    pub fn key(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for ActivityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "(root)")
        } else {
            write!(f, "{}", self.key())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_path() {
        let root = ActivityPath::root();
        assert!(root.is_root());
        assert_eq!(root.key(), "");
        assert_eq!(root.parent(), None);
        assert_eq!(root.to_string(), "(root)");
        assert_eq!(ActivityPath::parse(""), root);
    }

    #[test]
    fn test_child_and_parent() {
        let path = ActivityPath::root().child("a").child("b");
        assert_eq!(path.depth(), 2);
        assert_eq!(path.parent(), Some(ActivityPath::from_segments(["a"])));
        assert!(path.starts_with(&ActivityPath::from_segments(["a"])));
        assert!(path.starts_with(&ActivityPath::root()));
        assert!(!ActivityPath::from_segments(["a"]).starts_with(&path));
    }

    #[test]
    fn test_serializes_as_list() {
        let path = ActivityPath::from_segments(["import", "correlate"]);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["import", "correlate"]));
    }
}
