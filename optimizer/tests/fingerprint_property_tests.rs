//! Fingerprint property tests: keys are stable across repeated calls and
//! across re-serialization with different object key orderings.
//!
//! Tests verify:
//! - Same expression, same key, every time
//! - Key order in the JSON input never changes the key
//! - Any content change changes the key
//! - Volatile/personal flags never leak into the key

use query_optimizer::fingerprint::Fingerprinter;
use query_optimizer::SemanticExpression;

const FRAMES: [&str; 6] = [
    "entity_lookup",
    "calculation",
    "data_fetch",
    "aggregation",
    "summary",
    "query",
];

/// The same expression written with two different key orders.
fn orderings(frame: &str, i: usize) -> (String, String) {
    let forward = format!(
        r#"{{"type": "{frame}", "roles": {{"alpha": {i}, "beta": "b{i}", "gamma": {{"x": 1, "y": [1, 2, {i}]}}}},
            "children": [{{"type": "entity_lookup", "roles": {{"entity": "e{i}", "scope": "global"}}}}],
            "metadata": {{"attributes": {{"schema": "v{i}", "locale": "en"}}}}}}"#
    );
    let reversed = format!(
        r#"{{"metadata": {{"attributes": {{"locale": "en", "schema": "v{i}"}}}},
            "children": [{{"roles": {{"scope": "global", "entity": "e{i}"}}, "type": "entity_lookup"}}],
            "roles": {{"gamma": {{"y": [1, 2, {i}], "x": 1}}, "beta": "b{i}", "alpha": {i}}},
            "type": "{frame}"}}"#
    );
    (forward, reversed)
}

// ── Property: determinism across key orderings ─────────────────────

#[test]
fn prop_fingerprint_ignores_key_order() {
    let fp = Fingerprinter::default();
    for (n, frame) in FRAMES.iter().enumerate() {
        for i in 0..10 {
            let (a, b) = orderings(frame, i + n * 10);
            let ea = SemanticExpression::from_json(&a).unwrap();
            let eb = SemanticExpression::from_json(&b).unwrap();
            let ka = fp.fingerprint(&ea).unwrap();
            let kb = fp.fingerprint(&eb).unwrap();
            assert_eq!(ka, kb, "frame={} i={}: key depends on field order", frame, i);
            assert_eq!(ka, fp.fingerprint(&ea).unwrap(), "frame={} i={}: unstable", frame, i);

            let fa = fp.identify_fragments(&ea).unwrap();
            let fb = fp.identify_fragments(&eb).unwrap();
            let keys_a: Vec<_> = fa.iter().map(|f| &f.key).collect();
            let keys_b: Vec<_> = fb.iter().map(|f| &f.key).collect();
            assert_eq!(keys_a, keys_b, "frame={} i={}", frame, i);
        }
    }
}

// ── Property: re-serialization keeps the key ───────────────────────

#[test]
fn prop_fingerprint_survives_reserialization() {
    let fp = Fingerprinter::default();
    for (n, frame) in FRAMES.iter().enumerate() {
        let (a, _) = orderings(frame, n);
        let expr = SemanticExpression::from_json(&a).unwrap();
        let text = serde_json::to_string(&expr).unwrap();
        let again = SemanticExpression::from_json(&text).unwrap();
        assert_eq!(fp.fingerprint(&expr).unwrap(), fp.fingerprint(&again).unwrap());
    }
}

// ── Property: content changes change the key ───────────────────────

#[test]
fn prop_distinct_content_distinct_keys() {
    let fp = Fingerprinter::default();
    let mut seen = std::collections::HashSet::new();
    for frame in FRAMES {
        for i in 0..20 {
            let (a, _) = orderings(frame, i);
            let key = fp
                .fingerprint(&SemanticExpression::from_json(&a).unwrap())
                .unwrap();
            assert!(seen.insert(key), "frame={} i={}: collision", frame, i);
        }
    }
}

// ── Property: runtime flags are not content ────────────────────────

#[test]
fn prop_runtime_flags_do_not_change_key() {
    let fp = Fingerprinter::default();
    for frame in FRAMES {
        let (a, _) = orderings(frame, 7);
        let expr = SemanticExpression::from_json(&a).unwrap();
        let flagged = expr.clone().volatile().personal().with_ttl(5);
        assert_eq!(fp.fingerprint(&expr).unwrap(), fp.fingerprint(&flagged).unwrap());
    }
}
