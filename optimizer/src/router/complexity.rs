//! Query complexity scoring.
//!
//! A bounded weighted sum, every term recorded in [`ComplexityBreakdown`]:
//!
//! ```text
//! base(frame kind)
//!   + min(roles × 0.05, 0.3)
//!   + 0.2  if the role tree nests deeper than 3
//!   + 0.1  per declared sub-task beyond the first
//!   + 0.1  per distinct complex-action keyword
//!   + 0.2  quality priority / −0.1 speed priority
//! clamped to [0, 1]
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::expression::{FrameKind, SemanticExpression, DEFAULT_MAX_DEPTH};

/// Nesting beyond this depth adds the nesting term.
pub const NESTING_THRESHOLD: usize = 3;

const ROLE_WEIGHT: f64 = 0.05;
const ROLE_CAP: f64 = 0.3;
const NESTING_WEIGHT: f64 = 0.2;
const SUB_TASK_WEIGHT: f64 = 0.1;
const KEYWORD_WEIGHT: f64 = 0.1;
const QUALITY_BONUS: f64 = 0.2;
const SPEED_PENALTY: f64 = -0.1;

/// Totals are rounded to this many decimal places so that sums such as
/// 0.2 + 0.1 compare equal to a 0.3 model threshold.
const SCORE_SCALE: f64 = 1e9;

static COMPLEX_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(analy[sz](?:e|es|ed|ing|is)|compar(?:e|es|ed|ing|ison)|evaluat(?:e|es|ed|ing|ion)|predict(?:s|ed|ing|ion|ions)?|strategi[sz](?:e|es|ed|ing))\b",
    )
    .expect("COMPLEX_ACTION_RE regex should compile")
});

/// What the caller optimizes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Balanced,
    Quality,
    Speed,
    Cost,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Balanced => write!(f, "balanced"),
            Self::Quality => write!(f, "quality"),
            Self::Speed => write!(f, "speed"),
            Self::Cost => write!(f, "cost"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            "speed" => Ok(Self::Speed),
            "cost" => Ok(Self::Cost),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Each additive term of a complexity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityBreakdown {
    pub base: f64,
    pub roles: f64,
    pub nesting: f64,
    pub sub_tasks: f64,
    pub keywords: f64,
    /// Canonical keyword stems detected (sorted)
    pub keyword_hits: Vec<String>,
    pub priority: f64,
    /// Clamped sum
    pub total: f64,
}

/// Base score for a root frame kind.
pub fn base_score(kind: FrameKind) -> f64 {
    match kind {
        FrameKind::Query | FrameKind::EntityLookup | FrameKind::Context => 0.2,
        FrameKind::DataFetch => 0.3,
        FrameKind::Calculation | FrameKind::Transformation => 0.4,
        FrameKind::Aggregation | FrameKind::Summary | FrameKind::Action => 0.5,
        FrameKind::Comparison | FrameKind::Conditional => 0.6,
        FrameKind::Temporal => 0.7,
        FrameKind::Multimodal => 0.8,
    }
}

fn round_score(score: f64) -> f64 {
    (score * SCORE_SCALE).round() / SCORE_SCALE
}

fn keyword_stem(matched: &str) -> &'static str {
    let lower = matched.to_ascii_lowercase();
    if lower.starts_with("analy") {
        "analyze"
    } else if lower.starts_with("compar") {
        "compare"
    } else if lower.starts_with("evaluat") {
        "evaluate"
    } else if lower.starts_with("predict") {
        "predict"
    } else {
        "strategize"
    }
}

/// Distinct complex-action keyword stems in a text, sorted.
pub fn detect_keywords<'a>(texts: impl IntoIterator<Item = &'a str>) -> BTreeSet<&'static str> {
    texts
        .into_iter()
        .flat_map(|text| COMPLEX_ACTION_RE.find_iter(text))
        .map(|m| keyword_stem(m.as_str()))
        .collect()
}

/// Scores how much reasoning a query needs.
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    max_depth: usize,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ComplexityAnalyzer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn analyze(
        &self,
        expr: &SemanticExpression,
        sub_tasks: usize,
        priority: Priority,
    ) -> ComplexityBreakdown {
        let base = base_score(expr.frame);
        let roles = (expr.role_count() as f64 * ROLE_WEIGHT).min(ROLE_CAP);

        let nesting = match expr.structural_depth(self.max_depth) {
            Ok(depth) if depth > NESTING_THRESHOLD => NESTING_WEIGHT,
            Ok(_) => 0.0,
            Err(e) => {
                tracing::warn!("Complexity analysis hit nesting limit: {}", e);
                NESTING_WEIGHT
            }
        };

        let sub_tasks = sub_tasks.saturating_sub(1) as f64 * SUB_TASK_WEIGHT;

        let texts = expr.role_strings(self.max_depth).unwrap_or_else(|e| {
            tracing::warn!("Keyword scan skipped: {}", e);
            Vec::new()
        });
        let hits = detect_keywords(texts.iter().map(String::as_str));
        let keywords = hits.len() as f64 * KEYWORD_WEIGHT;

        let priority = match priority {
            Priority::Quality => QUALITY_BONUS,
            Priority::Speed => SPEED_PENALTY,
            Priority::Balanced | Priority::Cost => 0.0,
        };

        let total = round_score(
            (base + roles + nesting + sub_tasks + keywords + priority).clamp(0.0, 1.0),
        );
        ComplexityBreakdown {
            base,
            roles,
            nesting,
            sub_tasks,
            keywords,
            keyword_hits: hits.into_iter().map(str::to_string).collect(),
            priority,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_plain_query_base() {
        let analyzer = ComplexityAnalyzer::default();
        let b = analyzer.analyze(&SemanticExpression::new(FrameKind::Query), 1, Priority::Balanced);
        assert!(close(b.total, 0.2));
        assert!(b.keyword_hits.is_empty());
    }

    #[test]
    fn test_role_term_is_capped() {
        let mut expr = SemanticExpression::new(FrameKind::Query);
        for i in 0..10 {
            expr = expr.with_role(format!("r{}", i), i);
        }
        let b = ComplexityAnalyzer::default().analyze(&expr, 1, Priority::Balanced);
        assert!(close(b.roles, 0.3));
    }

    #[test]
    fn test_keywords_counted_once_per_stem() {
        let expr = SemanticExpression::new(FrameKind::Query)
            .with_role("ask", "Analyze the data, then analyse it again and compare results");
        let b = ComplexityAnalyzer::default().analyze(&expr, 1, Priority::Balanced);
        assert_eq!(b.keyword_hits, vec!["analyze".to_string(), "compare".to_string()]);
        assert!(close(b.keywords, 0.2));
    }

    #[test]
    fn test_keyword_word_boundaries() {
        let hits = detect_keywords(["comparator predictable evaluations"]);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_nesting_and_sub_tasks() {
        let deep = SemanticExpression::new(FrameKind::Query)
            .with_role("filter", json!({"a": {"b": {"c": {"d": 1}}}}));
        let b = ComplexityAnalyzer::default().analyze(&deep, 3, Priority::Balanced);
        assert!(close(b.nesting, 0.2));
        assert!(close(b.sub_tasks, 0.2));
    }

    #[test]
    fn test_priority_and_clamp() {
        let expr = SemanticExpression::new(FrameKind::Multimodal)
            .with_role("task", "predict and strategize, evaluate and compare");
        let b = ComplexityAnalyzer::default().analyze(&expr, 4, Priority::Quality);
        assert_eq!(b.total, 1.0);

        let quick = ComplexityAnalyzer::default().analyze(
            &SemanticExpression::new(FrameKind::Query),
            0,
            Priority::Speed,
        );
        assert!(close(quick.total, 0.1));
    }

    #[test]
    fn test_total_lands_exactly_on_tenths() {
        let analyzer = ComplexityAnalyzer::default();
        let expr = SemanticExpression::new(FrameKind::Query)
            .with_role("a", "x")
            .with_role("b", "y");
        let breakdown = analyzer.analyze(&expr, 1, Priority::Balanced);
        assert_eq!(breakdown.total, 0.3);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("Quality".parse::<Priority>().unwrap(), Priority::Quality);
        assert!("fastest".parse::<Priority>().is_err());
    }
}
