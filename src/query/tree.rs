use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::{Span, SpanStatus};

/// A span with its children attached, ready for JSON rendering
#[derive(Debug, Clone, Serialize)]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: Span,
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    fn leaf(span: Span) -> Self {
        Self {
            span,
            children: Vec::new(),
        }
    }

    /// Pre-order flatten; the inverse of tree reconstruction
    pub fn flatten(&self) -> Vec<&Span> {
        let mut out = vec![&self.span];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    /// Nodes in the tree, synthetic root excluded
    pub fn span_count(&self) -> usize {
        let own = if self.span.span_id == SYNTHETIC_ROOT_ID {
            0
        } else {
            1
        };
        own + self.children.iter().map(SpanNode::span_count).sum::<usize>()
    }
}

pub const SYNTHETIC_ROOT_ID: &str = "__root__";

/// Reconstruct the hierarchy of one trace from its flat span rows.
///
/// Tolerates any arrival order: spans whose parent is absent become roots.
/// Children sort by (timestamp, span_id) for determinism. Multiple roots are
/// grouped under a synthetic root whose latency covers max(end) − min(start)
/// and whose cost is the sum over the forest. A visited set guards against
/// malformed parent cycles.
pub fn build_trace_tree(spans: Vec<Span>) -> Option<SpanNode> {
    if spans.is_empty() {
        return None;
    }

    let ids: HashSet<String> = spans.iter().map(|s| s.span_id.clone()).collect();

    let mut children_of: HashMap<Option<String>, Vec<Span>> = HashMap::new();
    for span in spans {
        // An absent parent makes the span a root rather than an orphan
        let parent = span
            .parent_span_id
            .clone()
            .filter(|p| ids.contains(p) && *p != span.span_id);
        children_of.entry(parent).or_default().push(span);
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut roots: Vec<SpanNode> = children_of
        .remove(&None)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|span| attach_children(span, &mut children_of, &mut visited))
        .collect();

    // Any spans left unattached sit on a parent cycle; promote them to roots
    let mut leftovers: Vec<Span> = children_of.into_values().flatten().collect();
    leftovers.sort_by(|a, b| (a.timestamp, &a.span_id).cmp(&(b.timestamp, &b.span_id)));
    for span in leftovers {
        if visited.insert(span.span_id.clone()) {
            roots.push(SpanNode::leaf(span));
        }
    }

    sort_siblings(&mut roots);

    match roots.len() {
        0 => None,
        1 => roots.pop(),
        _ => Some(synthetic_root(roots)),
    }
}

fn attach_children(
    span: Span,
    children_of: &mut HashMap<Option<String>, Vec<Span>>,
    visited: &mut HashSet<String>,
) -> Option<SpanNode> {
    if !visited.insert(span.span_id.clone()) {
        return None;
    }

    let mut node = SpanNode::leaf(span);
    if let Some(children) = children_of.remove(&Some(node.span.span_id.clone())) {
        node.children = children
            .into_iter()
            .filter_map(|child| attach_children(child, children_of, visited))
            .collect();
        sort_siblings(&mut node.children);
    }
    Some(node)
}

fn sort_siblings(nodes: &mut [SpanNode]) {
    nodes.sort_by(|a, b| {
        (a.span.timestamp, &a.span.span_id).cmp(&(b.span.timestamp, &b.span.span_id))
    });
}

fn synthetic_root(roots: Vec<SpanNode>) -> SpanNode {
    let all: Vec<&Span> = roots.iter().flat_map(|r| r.flatten()).collect();

    let start = all.iter().map(|s| s.timestamp).min().unwrap_or_default();
    let end = all
        .iter()
        .map(|s| s.end_time())
        .max()
        .unwrap_or(start);
    let total_cost: f64 = all.iter().map(|s| s.cost_usd).sum();
    let any_error = all.iter().any(|s| s.status == SpanStatus::Error);

    let template = &roots[0].span;
    let span = Span {
        trace_id: template.trace_id.clone(),
        span_id: SYNTHETIC_ROOT_ID.to_string(),
        parent_span_id: None,
        customer_id: template.customer_id.clone(),
        service_name: template.service_name.clone(),
        endpoint: template.endpoint.clone(),
        environment: template.environment,
        timestamp: start,
        latency_ms: (end - start).num_milliseconds().max(0) as f64,
        model: String::new(),
        provider: template.provider,
        prompt: None,
        response: None,
        prompt_tokens: None,
        completion_tokens: None,
        tokens: None,
        cost_usd: total_cost,
        response_hash: None,
        semantic_score: None,
        hash_similarity: None,
        semantic_scored_at: None,
        semantic_cached: None,
        metadata: serde_json::json!({ "synthetic_root": true }),
        tags: Vec::new(),
        status: if any_error {
            SpanStatus::Error
        } else {
            SpanStatus::Success
        },
        error_message: None,
    };

    SpanNode {
        span,
        children: roots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Environment, Provider};
    use chrono::{Duration, TimeZone, Utc};

    fn span(span_id: &str, parent: Option<&str>, offset_ms: i64, latency: f64) -> Span {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        Span {
            trace_id: "t1".to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.map(String::from),
            customer_id: "cust-1".to_string(),
            service_name: "svc".to_string(),
            endpoint: "/chat".to_string(),
            environment: Environment::Live,
            timestamp: base + Duration::milliseconds(offset_ms),
            latency_ms: latency,
            model: "gpt-4".to_string(),
            provider: Provider::Openai,
            prompt: None,
            response: None,
            prompt_tokens: None,
            completion_tokens: None,
            tokens: None,
            cost_usd: 0.001,
            response_hash: None,
            semantic_score: None,
            hash_similarity: None,
            semantic_scored_at: None,
            semantic_cached: None,
            metadata: serde_json::json!({}),
            tags: vec![],
            status: SpanStatus::Success,
            error_message: None,
        }
    }

    #[test]
    fn test_single_node_tree() {
        let tree = build_trace_tree(vec![span("s1", None, 0, 100.0)]).unwrap();
        assert_eq!(tree.span.span_id, "s1");
        assert!(tree.children.is_empty());
        assert_eq!(tree.span_count(), 1);
    }

    #[test]
    fn test_out_of_order_arrival() {
        // Children submitted before their parent
        let tree = build_trace_tree(vec![
            span("b", Some("root"), 200, 50.0),
            span("a", Some("root"), 100, 50.0),
            span("root", None, 0, 500.0),
        ])
        .unwrap();

        assert_eq!(tree.span.span_id, "root");
        assert_eq!(tree.children.len(), 2);
        // Children sorted by timestamp ascending
        assert_eq!(tree.children[0].span.span_id, "a");
        assert_eq!(tree.children[1].span.span_id, "b");
    }

    #[test]
    fn test_deterministic_tie_break() {
        let tree = build_trace_tree(vec![
            span("root", None, 0, 500.0),
            span("z", Some("root"), 100, 50.0),
            span("y", Some("root"), 100, 50.0),
        ])
        .unwrap();

        // Equal timestamps: lexicographic span_id order
        assert_eq!(tree.children[0].span.span_id, "y");
        assert_eq!(tree.children[1].span.span_id, "z");
    }

    #[test]
    fn test_orphan_becomes_root_under_synthetic() {
        let tree = build_trace_tree(vec![
            span("root", None, 0, 100.0),
            span("orphan", Some("missing-parent"), 50, 400.0),
        ])
        .unwrap();

        assert_eq!(tree.span.span_id, SYNTHETIC_ROOT_ID);
        assert_eq!(tree.children.len(), 2);
        // Aggregate latency spans min(start) to max(end): orphan ends at 450
        assert_eq!(tree.span.latency_ms, 450.0);
        assert!((tree.span.cost_usd - 0.002).abs() < 1e-9);
        assert_eq!(tree.span_count(), 2);
    }

    #[test]
    fn test_cycle_guard() {
        // a -> b -> a: malformed input must not recurse forever
        let tree = build_trace_tree(vec![
            span("a", Some("b"), 0, 100.0),
            span("b", Some("a"), 10, 100.0),
        ])
        .unwrap();

        assert_eq!(tree.span_count(), 2);
    }

    #[test]
    fn test_self_parent_treated_as_root() {
        let tree = build_trace_tree(vec![span("a", Some("a"), 0, 100.0)]).unwrap();
        assert_eq!(tree.span.span_id, "a");
    }

    #[test]
    fn test_flatten_roundtrip() {
        let input = vec![
            span("root", None, 0, 500.0),
            span("a", Some("root"), 100, 50.0),
            span("a1", Some("a"), 120, 20.0),
            span("b", Some("root"), 200, 50.0),
        ];
        let mut expected: Vec<String> = input.iter().map(|s| s.span_id.clone()).collect();
        expected.sort();

        let tree = build_trace_tree(input).unwrap();
        let mut flattened: Vec<String> = tree
            .flatten()
            .into_iter()
            .map(|s| s.span_id.clone())
            .collect();
        flattened.sort();

        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_empty_input() {
        assert!(build_trace_tree(vec![]).is_none());
    }
}
