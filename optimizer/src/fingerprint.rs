//! Fingerprinter: canonical, type-tagged cache keys for expression fragments.
//!
//! # Key derivation
//!
//! ```text
//! frame ──classify──▶ FragmentType ─┐
//!   │                               ├─▶ canonical JSON (keys sorted) ─▶ BLAKE3 ─▶ frag:<type>:<hex>
//!   └─ roles + children + allow-listed attributes ┘
//! ```
//!
//! Volatile metadata (timestamps, user ids, TTL overrides, dependency
//! declarations) never reaches the hash, and object keys are sorted at
//! every level before hashing so construction order does not matter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::expression::{ExpressionError, FrameKind, SemanticExpression, DEFAULT_MAX_DEPTH};

/// Cacheable result categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    EntityLookup,
    CalculationResult,
    DataFetch,
    Transformation,
    Aggregation,
    Comparison,
    Summary,
    Context,
}

impl FragmentType {
    /// Fixed frame → category table. `None` means "never cached".
    pub fn for_frame(kind: FrameKind) -> Option<Self> {
        match kind {
            FrameKind::EntityLookup => Some(Self::EntityLookup),
            FrameKind::Calculation => Some(Self::CalculationResult),
            FrameKind::DataFetch => Some(Self::DataFetch),
            FrameKind::Transformation => Some(Self::Transformation),
            FrameKind::Aggregation => Some(Self::Aggregation),
            FrameKind::Comparison => Some(Self::Comparison),
            FrameKind::Summary => Some(Self::Summary),
            FrameKind::Context => Some(Self::Context),
            FrameKind::Query
            | FrameKind::Temporal
            | FrameKind::Multimodal
            | FrameKind::Action
            | FrameKind::Conditional => None,
        }
    }

    /// Default time-to-live for the category.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::EntityLookup => Duration::from_secs(60 * 60),
            Self::CalculationResult => Duration::from_secs(24 * 60 * 60),
            Self::DataFetch => Duration::from_secs(5 * 60),
            Self::Transformation => Duration::from_secs(2 * 60 * 60),
            Self::Aggregation => Duration::from_secs(30 * 60),
            Self::Comparison => Duration::from_secs(60 * 60),
            Self::Summary => Duration::from_secs(30 * 60),
            Self::Context => Duration::from_secs(10 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityLookup => "entity_lookup",
            Self::CalculationResult => "calculation_result",
            Self::DataFetch => "data_fetch",
            Self::Transformation => "transformation",
            Self::Aggregation => "aggregation",
            Self::Comparison => "comparison",
            Self::Summary => "summary",
            Self::Context => "context",
        }
    }

    pub fn all() -> &'static [FragmentType] {
        &[
            Self::EntityLookup,
            Self::CalculationResult,
            Self::DataFetch,
            Self::Transformation,
            Self::Aggregation,
            Self::Comparison,
            Self::Summary,
            Self::Context,
        ]
    }
}

impl std::fmt::Display for FragmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a classified node will not be written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cacheability {
    Cacheable,
    TypeNotAllowed,
    Volatile,
    Personal,
    ExternalSource,
}

impl Cacheability {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Cacheable)
    }
}

/// Caching policy applied during identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentPolicy {
    /// Fragment types eligible for caching
    pub cacheable_types: BTreeSet<FragmentType>,
    /// Metadata attribute keys that participate in fingerprints
    pub static_attributes: BTreeSet<String>,
    /// Frame nesting bound for traversal
    pub max_depth: usize,
}

impl Default for FragmentPolicy {
    fn default() -> Self {
        Self {
            cacheable_types: FragmentType::all().iter().copied().collect(),
            static_attributes: ["schema", "version", "locale", "unit", "source", "granularity"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A classified node of an expression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifiedFragment {
    /// Type-tagged cache key
    pub key: String,
    pub fragment_type: FragmentType,
    /// Tree location of the node
    pub path: String,
    pub cacheability: Cacheability,
    /// Effective TTL (metadata override or category default)
    pub ttl: Duration,
    /// Declared dependency keys for invalidation
    pub dependencies: Vec<String>,
}

impl IdentifiedFragment {
    pub fn is_cacheable(&self) -> bool {
        self.cacheability.is_cacheable()
    }
}

/// Computes canonical fingerprints and identifies cacheable fragments.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    policy: FragmentPolicy,
}

impl Fingerprinter {
    pub fn new(policy: FragmentPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FragmentPolicy {
        &self.policy
    }

    /// Walk the tree and classify every well-formed node.
    ///
    /// Nodes with no fragment category are omitted; malformed nodes are
    /// skipped by the walk itself.
    pub fn identify_fragments(
        &self,
        expr: &SemanticExpression,
    ) -> Result<Vec<IdentifiedFragment>, ExpressionError> {
        let traversal = expr.walk(self.policy.max_depth)?;
        let mut fragments = Vec::new();

        for visited in &traversal.frames {
            let Some(fragment_type) = FragmentType::for_frame(visited.expr.frame) else {
                continue;
            };
            let meta = &visited.expr.metadata;
            let ttl = meta
                .ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or_else(|| fragment_type.default_ttl());

            fragments.push(IdentifiedFragment {
                key: self.key_for(fragment_type.as_str(), visited.expr),
                fragment_type,
                path: visited.path.clone(),
                cacheability: self.cacheability(fragment_type, visited.expr),
                ttl,
                dependencies: meta.dependencies.clone(),
            });
        }

        Ok(fragments)
    }

    /// Fingerprint of a whole expression. Classified roots are tagged with
    /// their fragment type, everything else with the frame kind.
    pub fn fingerprint(&self, expr: &SemanticExpression) -> Result<String, ExpressionError> {
        // Validates the nesting bound before the recursive content build
        expr.walk(self.policy.max_depth)?;
        let tag = FragmentType::for_frame(expr.frame)
            .map(|t| t.as_str())
            .unwrap_or_else(|| expr.frame.as_str());
        Ok(self.key_for(tag, expr))
    }

    fn cacheability(&self, fragment_type: FragmentType, expr: &SemanticExpression) -> Cacheability {
        let meta = &expr.metadata;
        if !self.policy.cacheable_types.contains(&fragment_type) {
            Cacheability::TypeNotAllowed
        } else if meta.volatile {
            Cacheability::Volatile
        } else if meta.personal {
            Cacheability::Personal
        } else if !meta.external_sources.is_empty() {
            Cacheability::ExternalSource
        } else {
            Cacheability::Cacheable
        }
    }

    fn key_for(&self, tag: &str, expr: &SemanticExpression) -> String {
        let mut payload = Map::new();
        payload.insert("type".to_string(), Value::String(tag.to_string()));
        payload.insert("content".to_string(), self.content_value(expr));

        let mut canonical = String::new();
        write_canonical(&Value::Object(payload), &mut canonical);
        let hash = blake3::hash(canonical.as_bytes());
        format!("frag:{}:{}", tag, hash.to_hex())
    }

    /// Structural content of a frame. Only called after `walk` has checked
    /// the nesting bound, so recursion depth is bounded.
    fn content_value(&self, expr: &SemanticExpression) -> Value {
        let mut content = Map::new();
        content.insert("frame".to_string(), Value::String(expr.frame.as_str().to_string()));
        content.insert(
            "roles".to_string(),
            Value::Object(expr.roles.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );

        let attributes: Map<String, Value> = expr
            .metadata
            .attributes
            .iter()
            .filter(|(k, _)| self.policy.static_attributes.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !attributes.is_empty() {
            content.insert("attributes".to_string(), Value::Object(attributes));
        }

        let children: Vec<Value> = expr
            .children
            .iter()
            .filter_map(|c| c.as_frame())
            .map(|c| self.content_value(c))
            .collect();
        if !children.is_empty() {
            content.insert("children".to_string(), Value::Array(children));
        }

        let nested: Map<String, Value> = expr
            .metadata
            .nested
            .iter()
            .filter_map(|(k, c)| c.as_frame().map(|f| (k.clone(), self.content_value(f))))
            .collect();
        if !nested.is_empty() {
            content.insert("nested".to_string(), Value::Object(nested));
        }

        Value::Object(content)
    }
}

/// Write `value` as compact JSON with object keys sorted at every level.
///
/// Independent of `serde_json`'s map ordering features, so the encoding is
/// identical across builds.
pub fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}
