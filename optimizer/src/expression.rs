//! Semantic expressions: the tagged query trees the optimizer reasons about.
//!
//! A query arrives as a tree of frames. Each frame has a closed
//! [`FrameKind`] tag, a map of named roles, optional child frames and
//! metadata. Frames whose type tag is missing or unknown are kept as
//! [`ChildFrame::Malformed`] so one bad node never rejects a whole query;
//! traversals skip them.
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "type": "comparison",
//!   "roles": { "left": "q1 revenue", "right": "q2 revenue" },
//!   "children": [ { "type": "data_fetch", "roles": { "table": "sales" } } ],
//!   "metadata": { "ttl_seconds": 600, "attributes": { "unit": "usd" } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Default bound on frame nesting for every traversal.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Errors raised while parsing or walking an expression.
#[derive(Error, Debug)]
pub enum ExpressionError {
    /// Root node could not be parsed.
    #[error("Invalid expression JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Frame nesting went past the configured bound.
    #[error("Expression nesting depth {depth} exceeds limit {limit}")]
    NestingTooDeep { depth: usize, limit: usize },
}

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Plain question with no specialised structure
    Query,
    EntityLookup,
    Calculation,
    DataFetch,
    Transformation,
    Aggregation,
    Comparison,
    Summary,
    /// Conversation or session context
    Context,
    /// Time-series / temporal reasoning
    Temporal,
    /// Mixed text, image or audio inputs
    Multimodal,
    /// Imperative request ("book", "send", ...)
    Action,
    Conditional,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::EntityLookup => "entity_lookup",
            Self::Calculation => "calculation",
            Self::DataFetch => "data_fetch",
            Self::Transformation => "transformation",
            Self::Aggregation => "aggregation",
            Self::Comparison => "comparison",
            Self::Summary => "summary",
            Self::Context => "context",
            Self::Temporal => "temporal",
            Self::Multimodal => "multimodal",
            Self::Action => "action",
            Self::Conditional => "conditional",
        }
    }

    pub fn all() -> &'static [FrameKind] {
        &[
            Self::Query,
            Self::EntityLookup,
            Self::Calculation,
            Self::DataFetch,
            Self::Transformation,
            Self::Aggregation,
            Self::Comparison,
            Self::Summary,
            Self::Context,
            Self::Temporal,
            Self::Multimodal,
            Self::Action,
            Self::Conditional,
        ]
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A child slot: either a well-formed frame or a node we could not type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildFrame {
    Frame(Box<SemanticExpression>),
    Malformed(Value),
}

impl ChildFrame {
    pub fn as_frame(&self) -> Option<&SemanticExpression> {
        match self {
            Self::Frame(expr) => Some(expr),
            Self::Malformed(_) => None,
        }
    }
}

impl From<SemanticExpression> for ChildFrame {
    fn from(expr: SemanticExpression) -> Self {
        Self::Frame(Box::new(expr))
    }
}

/// Per-frame metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionMetadata {
    /// Result changes between identical calls (e.g. "now", random sampling)
    pub volatile: bool,
    /// Result is personalised to the caller
    pub personal: bool,
    /// Cache keys this frame's result depends on
    pub dependencies: Vec<String>,
    /// Non-deterministic external sources (live APIs, feeds)
    pub external_sources: Vec<String>,
    /// Explicit TTL override in seconds
    pub ttl_seconds: Option<u64>,
    /// Free-form attributes; only an allow-list participates in fingerprints
    pub attributes: BTreeMap<String, Value>,
    /// Frames attached to metadata, walked in key order
    pub nested: BTreeMap<String, ChildFrame>,
}

/// A node of a semantic query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticExpression {
    #[serde(rename = "type")]
    pub frame: FrameKind,
    #[serde(default)]
    pub roles: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildFrame>,
    #[serde(default)]
    pub metadata: ExpressionMetadata,
}

/// A frame reached during a traversal.
#[derive(Debug, Clone)]
pub struct VisitedFrame<'a> {
    pub expr: &'a SemanticExpression,
    /// Root is depth 0
    pub depth: usize,
    /// Location inside the tree, e.g. `root.children[1].nested[ctx]`
    pub path: String,
}

/// Result of walking an expression tree.
#[derive(Debug, Clone)]
pub struct Traversal<'a> {
    pub frames: Vec<VisitedFrame<'a>>,
    /// Paths of nodes skipped because their type tag was missing or unknown
    pub skipped: Vec<String>,
}

impl SemanticExpression {
    pub fn new(frame: FrameKind) -> Self {
        Self {
            frame,
            roles: BTreeMap::new(),
            children: Vec::new(),
            metadata: ExpressionMetadata::default(),
        }
    }

    pub fn with_role(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.roles.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: SemanticExpression) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_malformed_child(mut self, raw: Value) -> Self {
        self.children.push(ChildFrame::Malformed(raw));
        self
    }

    pub fn with_nested(mut self, key: impl Into<String>, nested: SemanticExpression) -> Self {
        self.metadata.nested.insert(key.into(), nested.into());
        self
    }

    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.metadata.dependencies.push(key.into());
        self
    }

    pub fn with_external_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.external_sources.push(source.into());
        self
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.metadata.ttl_seconds = Some(seconds);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.attributes.insert(key.into(), value.into());
        self
    }

    pub fn volatile(mut self) -> Self {
        self.metadata.volatile = true;
        self
    }

    pub fn personal(mut self) -> Self {
        self.metadata.personal = true;
        self
    }

    /// Parse from JSON text. The root must carry a valid type tag.
    pub fn from_json(text: &str) -> Result<Self, ExpressionError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ExpressionError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Number of roles on this frame.
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Pre-order walk: a frame, then its children in index order, then its
    /// metadata-nested frames in key order.
    ///
    /// Uses an explicit stack; fails instead of descending past `max_depth`.
    pub fn walk(&self, max_depth: usize) -> Result<Traversal<'_>, ExpressionError> {
        let mut frames = Vec::new();
        let mut skipped = Vec::new();
        let mut stack: Vec<(&SemanticExpression, usize, String)> = vec![(self, 0, "root".to_string())];

        while let Some((expr, depth, path)) = stack.pop() {
            if depth > max_depth {
                return Err(ExpressionError::NestingTooDeep {
                    depth,
                    limit: max_depth,
                });
            }

            let mut pending: Vec<(&SemanticExpression, usize, String)> = Vec::new();
            for (idx, child) in expr.children.iter().enumerate() {
                let child_path = format!("{}.children[{}]", path, idx);
                match child {
                    ChildFrame::Frame(c) => pending.push((c, depth + 1, child_path)),
                    ChildFrame::Malformed(_) => skipped.push(child_path),
                }
            }
            for (key, nested) in &expr.metadata.nested {
                let nested_path = format!("{}.nested[{}]", path, key);
                match nested {
                    ChildFrame::Frame(n) => pending.push((n, depth + 1, nested_path)),
                    ChildFrame::Malformed(_) => skipped.push(nested_path),
                }
            }
            // Reverse so the stack pops in declaration order
            stack.extend(pending.into_iter().rev());

            frames.push(VisitedFrame { expr, depth, path });
        }

        if !skipped.is_empty() {
            tracing::warn!(
                "Skipped {} malformed expression node(s): {}",
                skipped.len(),
                skipped.join(", ")
            );
        }

        Ok(Traversal { frames, skipped })
    }

    /// Deepest nesting across frames and structured role values.
    ///
    /// A leaf frame with scalar roles has depth 1; each nested frame or
    /// nested object/array level inside a role adds one.
    pub fn structural_depth(&self, max_depth: usize) -> Result<usize, ExpressionError> {
        let traversal = self.walk(max_depth)?;
        let depth = traversal
            .frames
            .iter()
            .map(|f| {
                let role_depth = f
                    .expr
                    .roles
                    .values()
                    .map(|v| value_depth(v, max_depth))
                    .max()
                    .unwrap_or(0);
                f.depth + 1 + role_depth
            })
            .max()
            .unwrap_or(1);
        Ok(depth)
    }

    /// Every string found in the roles of every well-formed frame.
    pub fn role_strings(&self, max_depth: usize) -> Result<Vec<String>, ExpressionError> {
        let traversal = self.walk(max_depth)?;
        let mut out = Vec::new();
        for frame in &traversal.frames {
            for value in frame.expr.roles.values() {
                collect_strings(value, &mut out);
            }
        }
        Ok(out)
    }
}

fn value_depth(value: &Value, cap: usize) -> usize {
    if cap == 0 {
        return 0;
    }
    match value {
        Value::Array(items) => 1 + items.iter().map(|v| value_depth(v, cap - 1)).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(|v| value_depth(v, cap - 1)).max().unwrap_or(0),
        _ => 0,
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    let mut stack = vec![value];
    while let Some(v) = stack.pop() {
        match v {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => stack.extend(map.values()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SemanticExpression {
        SemanticExpression::new(FrameKind::Comparison)
            .with_role("left", "q1")
            .with_role("right", "q2")
            .with_child(SemanticExpression::new(FrameKind::DataFetch).with_role("table", "sales"))
            .with_child(SemanticExpression::new(FrameKind::Calculation).with_role("op", "sum"))
            .with_nested("ctx", SemanticExpression::new(FrameKind::Context))
    }

    #[test]
    fn test_walk_order() {
        let expr = sample();
        let walk = expr.walk(DEFAULT_MAX_DEPTH).unwrap();
        let kinds: Vec<FrameKind> = walk.frames.iter().map(|f| f.expr.frame).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::Comparison,
                FrameKind::DataFetch,
                FrameKind::Calculation,
                FrameKind::Context
            ]
        );
        assert_eq!(walk.frames[1].path, "root.children[0]");
        assert_eq!(walk.frames[3].path, "root.nested[ctx]");
        assert!(walk.skipped.is_empty());
    }

    #[test]
    fn test_malformed_child_is_skipped() {
        let raw = json!({
            "type": "summary",
            "roles": {"text": "hello"},
            "children": [
                {"roles": {"missing": "type"}},
                {"type": "not_a_frame"},
                {"type": "entity_lookup", "roles": {"name": "acme"}}
            ]
        });
        let expr = SemanticExpression::from_value(raw).unwrap();
        assert!(matches!(expr.children[0], ChildFrame::Malformed(_)));
        assert!(matches!(expr.children[1], ChildFrame::Malformed(_)));

        let walk = expr.walk(DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(walk.frames.len(), 2);
        assert_eq!(walk.skipped.len(), 2);
        assert_eq!(walk.frames[1].expr.frame, FrameKind::EntityLookup);
    }

    #[test]
    fn test_root_without_type_is_error() {
        let err = SemanticExpression::from_json(r#"{"roles": {}}"#).unwrap_err();
        assert!(matches!(err, ExpressionError::Parse(_)));
    }

    #[test]
    fn test_nesting_bound() {
        let mut expr = SemanticExpression::new(FrameKind::Query);
        for _ in 0..10 {
            expr = SemanticExpression::new(FrameKind::Query).with_child(expr);
        }
        assert!(expr.walk(10).is_ok());
        let err = expr.walk(5).unwrap_err();
        assert!(matches!(
            err,
            ExpressionError::NestingTooDeep { depth: 6, limit: 5 }
        ));
    }

    #[test]
    fn test_structural_depth_counts_roles() {
        let flat = SemanticExpression::new(FrameKind::Query).with_role("q", "hi");
        assert_eq!(flat.structural_depth(DEFAULT_MAX_DEPTH).unwrap(), 1);

        let nested_role = SemanticExpression::new(FrameKind::Query)
            .with_role("filter", json!({"a": {"b": [1, 2]}}));
        assert_eq!(nested_role.structural_depth(DEFAULT_MAX_DEPTH).unwrap(), 4);

        assert_eq!(sample().structural_depth(DEFAULT_MAX_DEPTH).unwrap(), 2);
    }

    #[test]
    fn test_role_strings_collects_all_frames() {
        let strings = sample().role_strings(DEFAULT_MAX_DEPTH).unwrap();
        assert!(strings.contains(&"q1".to_string()));
        assert!(strings.contains(&"sales".to_string()));
        assert!(strings.contains(&"sum".to_string()));
    }

    #[test]
    fn test_frame_kind_serde() {
        let json = serde_json::to_string(&FrameKind::EntityLookup).unwrap();
        assert_eq!(json, "\"entity_lookup\"");
        for kind in FrameKind::all() {
            let parsed: FrameKind =
                serde_json::from_str(&format!("\"{}\"", kind.as_str())).unwrap();
            assert_eq!(parsed, *kind);
        }
    }
}
