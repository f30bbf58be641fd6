// src/orchestrator/artifacts.rs
// Artifact Aggregator: normalizes tool-emitted artifact kinds, merges
// knowledge graphs across rounds by set-union, and attaches the running
// side-channel (bibliography, knowledge graph, direct artifacts, binary
// outputs) onto the final StoreFormat with deterministic titles.

use std::collections::HashMap;

use serde_json::Value;

use crate::llm::{Artifact, ArtifactKind, Segment, StoreFormat};

pub use crate::llm::formatter::normalize_kind;

/// `{nodes, edges, metadata?}`. Edges are keyed by `(source_id, target_id,
/// label)`; merging two graphs is a commutative, associative set-union where
/// duplicate node attributes take the first value seen and edge `evidence`
/// arrays union-deduplicate.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    pub nodes: HashMap<String, Value>,
    pub edges: HashMap<(String, String, String), Edge>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub label: String,
    pub evidence: Vec<String>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Union `other` into `self`. Commutative and associative: repeated
    /// merges of the same graphs in any order converge to the same result.
    pub fn merge(&mut self, other: KnowledgeGraph) {
        for (id, node) in other.nodes {
            self.nodes.entry(id).or_insert(node);
        }
        for (key, edge) in other.edges {
            self.edges
                .entry(key)
                .and_modify(|existing| {
                    for ev in &edge.evidence {
                        if !existing.evidence.contains(ev) {
                            existing.evidence.push(ev.clone());
                        }
                    }
                })
                .or_insert(edge);
        }
        if self.metadata.is_none() {
            self.metadata = other.metadata;
        }
    }

    fn to_json(&self) -> Value {
        let nodes: Vec<&Value> = self.nodes.values().collect();
        let edges: Vec<Value> = self
            .edges
            .values()
            .map(|e| {
                serde_json::json!({
                    "source_id": e.source_id,
                    "target_id": e.target_id,
                    "label": e.label,
                    "evidence": e.evidence,
                })
            })
            .collect();
        serde_json::json!({ "nodes": nodes, "edges": edges, "metadata": self.metadata })
    }
}

/// Bibliography entries union-deduplicate by a stable key (e.g. PMID); later
/// entries with the same key are dropped.
#[derive(Debug, Clone, Default)]
pub struct SideChannel {
    pub bibliography: Vec<Value>,
    bibliography_keys: std::collections::HashSet<String>,
    pub knowledge_graph: KnowledgeGraph,
    pub direct_artifacts: Vec<Value>,
    pub binary_outputs: Vec<Value>,
}

impl SideChannel {
    pub fn add_bibliography_entry(&mut self, entry: Value) {
        let key = bibliography_key(&entry);
        if self.bibliography_keys.insert(key) {
            self.bibliography.push(entry);
        }
    }
}

fn bibliography_key(entry: &Value) -> String {
    entry
        .get("pmid")
        .or_else(|| entry.get("id"))
        .or_else(|| entry.get("doi"))
        .or_else(|| entry.get("url"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| entry.to_string())
}

/// Decode a `binaryOutput` entry (`{data (base64), media_type, name?}`) into
/// an artifact whose content is the base64 payload verbatim.
pub fn process_binary(binary: &Value, position: usize) -> Artifact {
    let media_type = binary.get("media_type").and_then(|v| v.as_str()).unwrap_or("application/octet-stream");
    let data = binary.get("data").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let name = binary.get("name").and_then(|v| v.as_str()).unwrap_or("binary output").to_string();
    let kind = normalize_kind(media_type);
    let mut artifact = Artifact::new(kind, name, data, position);
    artifact.metadata = Some(binary.clone());
    artifact
}

/// Append one artifact-and-segment pair derived from `value`, with a
/// deterministic title, to `store_format` in place.
fn attach_one(store_format: &mut StoreFormat, kind: ArtifactKind, title: &str, value: &Value) {
    let position = store_format.artifacts.len();
    let mut artifact = Artifact::new(kind, title, value.to_string(), position);
    artifact.metadata = Some(value.clone());
    let artifact_id = artifact.id.clone();
    store_format.artifacts.push(artifact);
    store_format
        .conversation
        .push(Segment::Artifact { artifact_id, summary: title.to_string() });
}

/// Fold the accumulated side channel into the formatter's `StoreFormat`,
/// preserving encounter order: bibliography, then the merged knowledge
/// graph (attached at most once), then direct artifacts, then binary
/// outputs.
pub fn attach(mut store_format: StoreFormat, side: SideChannel) -> StoreFormat {
    if !side.bibliography.is_empty() {
        let value = serde_json::json!(side.bibliography);
        attach_one(&mut store_format, ArtifactKind::Bibliography, "Bibliography", &value);
    }
    if !side.knowledge_graph.is_empty() {
        let value = side.knowledge_graph.to_json();
        attach_one(&mut store_format, ArtifactKind::KnowledgeGraph, "Knowledge graph", &value);
    }
    for (i, artifact_value) in side.direct_artifacts.iter().enumerate() {
        let kind = artifact_value
            .get("kind")
            .and_then(|v| v.as_str())
            .map(normalize_kind)
            .unwrap_or(ArtifactKind::TextMarkdown);
        let title = artifact_value
            .get("title")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Artifact {}", i + 1));
        attach_one(&mut store_format, kind, &title, artifact_value);
    }
    for binary in &side.binary_outputs {
        let position = store_format.artifacts.len();
        let artifact = process_binary(binary, position);
        let artifact_id = artifact.id.clone();
        let title = artifact.title.clone();
        store_format.artifacts.push(artifact);
        store_format.conversation.push(Segment::Artifact { artifact_id, summary: title });
    }
    store_format
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_kind_maps_known_aliases() {
        assert_eq!(normalize_kind("application/vnd.ant.code"), ArtifactKind::Code);
        assert_eq!(normalize_kind("graph"), ArtifactKind::KnowledgeGraph);
        assert_eq!(normalize_kind(""), ArtifactKind::TextMarkdown);
        assert_eq!(normalize_kind("image/png"), ArtifactKind::Image("png".to_string()));
    }

    #[test]
    fn knowledge_graph_merge_is_idempotent_and_commutative() {
        let mut a = KnowledgeGraph::default();
        a.nodes.insert("n1".to_string(), serde_json::json!({"label": "Gene A"}));
        a.edges.insert(
            ("n1".to_string(), "n2".to_string(), "regulates".to_string()),
            Edge {
                source_id: "n1".to_string(),
                target_id: "n2".to_string(),
                label: "regulates".to_string(),
                evidence: vec!["PMID:1".to_string()],
            },
        );

        let mut b = KnowledgeGraph::default();
        b.nodes.insert("n1".to_string(), serde_json::json!({"label": "different"}));
        b.edges.insert(
            ("n1".to_string(), "n2".to_string(), "regulates".to_string()),
            Edge {
                source_id: "n1".to_string(),
                target_id: "n2".to_string(),
                label: "regulates".to_string(),
                evidence: vec!["PMID:2".to_string()],
            },
        );

        let mut merged = a.clone();
        merged.merge(b.clone());
        assert_eq!(merged.nodes["n1"]["label"], "Gene A");
        let edge = &merged.edges[&("n1".to_string(), "n2".to_string(), "regulates".to_string())];
        assert_eq!(edge.evidence.len(), 2);

        let mut merged_again = merged.clone();
        merged_again.merge(b);
        assert_eq!(merged_again.edges.len(), merged.edges.len());
        let edge_again = &merged_again.edges[&("n1".to_string(), "n2".to_string(), "regulates".to_string())];
        assert_eq!(edge_again.evidence.len(), 2);
    }

    #[test]
    fn bibliography_dedups_by_key() {
        let mut side = SideChannel::default();
        side.add_bibliography_entry(serde_json::json!({"pmid": "123", "title": "A"}));
        side.add_bibliography_entry(serde_json::json!({"pmid": "123", "title": "A duplicate"}));
        side.add_bibliography_entry(serde_json::json!({"pmid": "456", "title": "B"}));
        assert_eq!(side.bibliography.len(), 2);
    }

    #[test]
    fn attach_adds_artifacts_with_matching_segment_ids() {
        let store_format = StoreFormat {
            thinking: None,
            conversation: vec![Segment::Text { content: "done".to_string() }],
            artifacts: Vec::new(),
        };
        let mut side = SideChannel::default();
        side.add_bibliography_entry(serde_json::json!({"pmid": "1"}));
        let result = attach(store_format, side);
        assert_eq!(result.artifacts.len(), 1);
        match result.conversation.last().unwrap() {
            Segment::Artifact { artifact_id, .. } => assert_eq!(artifact_id, &result.artifacts[0].id),
            _ => panic!("expected artifact segment"),
        }
    }
}
