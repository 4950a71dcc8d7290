//! Field projection over JSON documents
//!
//! A projection is a comma-separated list of dotted paths, optionally prefixed with `.`.
//! A `[]` suffix on a segment descends into every element of that array:
//!
//! ```
//! use mirror_runtime::Projection;
//! use serde_json::json;
//!
//! let fields = Projection::parse(".metadata.name,spec.containers[].image");
//! let pod = json!({
//!     "metadata": { "name": "x", "uid": "42" },
//!     "spec": { "containers": [{ "name": "app", "image": "nginx" }] }
//! });
//! assert_eq!(
//!     fields.apply(&pod),
//!     json!({ "metadata": { "name": "x" }, "spec": { "containers": [{ "image": "nginx" }] } })
//! );
//! ```
//!
//! `metadata.managedFields` never survives a projection.
use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// A parsed set of field paths
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Projection {
    root: Node,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Node {
    whole: bool,
    fields: BTreeMap<String, Field>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Field {
    each: bool,
    node: Node,
}

impl Projection {
    /// Parse a comma-separated list of paths
    ///
    /// Blank paths and empty segments are ignored.
    #[must_use]
    pub fn parse(paths: &str) -> Self {
        let mut root = Node::default();
        for path in paths.split(',') {
            let segments = path
                .trim()
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>();
            if segments.is_empty() {
                continue;
            }
            let mut node = &mut root;
            for segment in segments {
                let (key, each) = match segment.strip_suffix("[]") {
                    Some(key) => (key, true),
                    None => (segment, false),
                };
                let field = node.fields.entry(key.to_string()).or_default();
                field.each |= each;
                node = &mut field.node;
            }
            node.whole = true;
        }
        Self { root }
    }

    /// Whether the projection selects nothing at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.root.whole && self.root.fields.is_empty()
    }

    /// Copy out only the selected paths of `doc`
    ///
    /// Always returns an object (possibly empty) when `doc` is an object.
    #[must_use]
    pub fn apply(&self, doc: &Value) -> Value {
        let mut projected = self
            .root
            .apply(doc)
            .unwrap_or_else(|| Value::Object(Map::new()));
        strip_managed_fields(&mut projected);
        projected
    }
}

impl Node {
    fn apply(&self, value: &Value) -> Option<Value> {
        if self.whole {
            return Some(value.clone());
        }
        let object = value.as_object()?;
        let mut out = Map::new();
        for (key, field) in &self.fields {
            if let Some(projected) = object.get(key).and_then(|v| field.apply(v)) {
                out.insert(key.clone(), projected);
            }
        }
        (!out.is_empty()).then_some(Value::Object(out))
    }
}

impl Field {
    fn apply(&self, value: &Value) -> Option<Value> {
        if !self.each {
            return self.node.apply(value);
        }
        let items = value.as_array()?;
        Some(Value::Array(
            items
                .iter()
                .map(|item| self.node.apply(item).unwrap_or_else(|| Value::Object(Map::new())))
                .collect(),
        ))
    }
}

/// Remove `metadata.managedFields` from a document in place
pub fn strip_managed_fields(doc: &mut Value) {
    if let Some(meta) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
}
