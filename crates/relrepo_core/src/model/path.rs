//! Declarative relationship trees for fetching and creating aggregates.
//!
//! # Responsibility
//! - Describe which relationships an aggregate fetch should hydrate.
//! - Describe child rows to create together with a parent row.
//!
//! # Invariants
//! - Trees are purely declarative; they are checked against the schema by
//!   the loader and repository, never here.

use crate::model::value::{FieldValues, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relationship tree, e.g. `{blogs: {posts: {}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationPath {
    children: BTreeMap<String, RelationPath>,
}

impl RelationPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests one relationship with no further nesting.
    pub fn with(self, relationship: impl Into<String>) -> Self {
        self.with_nested(relationship, Self::new())
    }

    /// Requests one relationship and the subtree below it.
    pub fn with_nested(mut self, relationship: impl Into<String>, nested: RelationPath) -> Self {
        let entry = self.children.entry(relationship.into()).or_default();
        entry.merge(nested);
        self
    }

    /// Builds a tree from dotted segments: `["blogs.posts", "profile"]`.
    ///
    /// Empty segments are ignored, so `"blogs..posts"` equals `"blogs.posts"`.
    pub fn from_dotted<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Self::new();
        for path in paths {
            let mut node = &mut root;
            for segment in path.as_ref().split('.').map(str::trim) {
                if segment.is_empty() {
                    continue;
                }
                node = node.children.entry(segment.to_string()).or_default();
            }
        }
        root
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn get(&self, relationship: &str) -> Option<&RelationPath> {
        self.children.get(relationship)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RelationPath)> {
        self.children
            .iter()
            .map(|(name, nested)| (name.as_str(), nested))
    }

    fn merge(&mut self, other: RelationPath) {
        for (name, nested) in other.children {
            self.children.entry(name).or_default().merge(nested);
        }
    }
}

/// Child input for one relationship of a nested create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NestedChildren {
    /// Single child for a `has_one` relationship.
    One(Box<NestedCreate>),
    /// Ordered children for a `has_many` relationship.
    Many(Vec<NestedCreate>),
}

/// Parent field values plus the children to create under it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NestedCreate {
    pub fields: FieldValues,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, NestedChildren>,
}

impl NestedCreate {
    pub fn new(fields: FieldValues) -> Self {
        Self {
            fields,
            children: BTreeMap::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.set(field, value);
        self
    }

    /// Adds a singular child under `relationship`.
    pub fn with_one(mut self, relationship: impl Into<String>, child: NestedCreate) -> Self {
        self.children
            .insert(relationship.into(), NestedChildren::One(Box::new(child)));
        self
    }

    /// Adds a child list under `relationship`.
    pub fn with_many(
        mut self,
        relationship: impl Into<String>,
        children: impl IntoIterator<Item = NestedCreate>,
    ) -> Self {
        self.children.insert(
            relationship.into(),
            NestedChildren::Many(children.into_iter().collect()),
        );
        self
    }
}

impl From<FieldValues> for NestedCreate {
    fn from(value: FieldValues) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::RelationPath;

    #[test]
    fn dotted_paths_build_shared_prefix_tree() {
        let path = RelationPath::from_dotted(["blogs.posts", "blogs.user", "profile"]);
        assert_eq!(path.len(), 2);

        let blogs = path.get("blogs").expect("blogs requested");
        assert!(blogs.get("posts").is_some());
        assert!(blogs.get("user").is_some());
        assert!(path.get("profile").expect("profile requested").is_empty());
    }

    #[test]
    fn builder_and_dotted_forms_agree() {
        let built =
            RelationPath::new().with_nested("blogs", RelationPath::new().with("posts"));
        assert_eq!(built, RelationPath::from_dotted(["blogs.posts"]));
    }

    #[test]
    fn with_nested_merges_repeated_relationships() {
        let path = RelationPath::new()
            .with_nested("blogs", RelationPath::new().with("posts"))
            .with_nested("blogs", RelationPath::new().with("user"));
        let blogs = path.get("blogs").expect("blogs requested");
        assert_eq!(blogs.len(), 2);
    }
}
