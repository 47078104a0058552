//! Join path discovery for the knowledge graph.
//!
//! Paths are found with a level-by-level breadth-first search over the
//! undirected relationship edges. Each level keeps one partial path per
//! table (the most confident one), every path that reaches the target is
//! scored, and the best score wins.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Cardinality, Relationship, RelationshipKind};
use super::KnowledgeGraph;
use crate::error::{PlanError, PlanResult};

/// Weights and bounds for path scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathScoring {
    pub max_hops: usize,
    pub confidence_weight: f64,
    pub length_weight: f64,
}

impl Default for PathScoring {
    fn default() -> Self {
        Self {
            max_hops: 5,
            confidence_weight: 0.7,
            length_weight: 0.3,
        }
    }
}

/// One hop of a join path, oriented in the direction of travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStep {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub confidence: f64,
    pub kind: RelationshipKind,
    pub cardinality: Cardinality,
}

impl JoinStep {
    /// Orient a relationship so that travel starts at `from_table`.
    fn oriented(rel: &Relationship, from_table: &str) -> Self {
        if rel.source_table == from_table {
            Self {
                from_table: rel.source_table.clone(),
                from_column: rel.source_column.clone(),
                to_table: rel.target_table.clone(),
                to_column: rel.target_column.clone(),
                confidence: rel.confidence,
                kind: rel.kind,
                cardinality: rel.cardinality,
            }
        } else {
            Self {
                from_table: rel.target_table.clone(),
                from_column: rel.target_column.clone(),
                to_table: rel.source_table.clone(),
                to_column: rel.source_column.clone(),
                confidence: rel.confidence,
                kind: rel.kind,
                cardinality: rel.cardinality.reverse(),
            }
        }
    }
}

impl std::fmt::Display for JoinStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} = {}.{} ({}, {}, {:.2})",
            self.from_table,
            self.from_column,
            self.to_table,
            self.to_column,
            self.kind,
            self.cardinality,
            self.confidence
        )
    }
}

/// A sequence of joins from one table to another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinPath {
    pub steps: Vec<JoinStep>,
}

impl JoinPath {
    /// Create an empty path (same source and destination).
    pub fn new() -> Self {
        Self { steps: vec![] }
    }

    pub fn from_steps(steps: Vec<JoinStep>) -> Self {
        Self { steps }
    }

    /// Tables visited, start and end included. Empty for an empty path.
    pub fn tables(&self) -> Vec<&str> {
        let mut result: Vec<&str> = Vec::new();
        for step in &self.steps {
            if result.last().copied() != Some(step.from_table.as_str()) {
                result.push(&step.from_table);
            }
            result.push(&step.to_table);
        }
        result
    }

    /// Number of hops in this path.
    pub fn hops(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Product of hop confidences; 1.0 for an empty path.
    pub fn confidence(&self) -> f64 {
        self.steps.iter().map(|s| s.confidence).product()
    }

    /// `w_c * confidence + w_l * (1 / hops)`; an empty path scores 1.0.
    pub fn score(&self, scoring: &PathScoring) -> f64 {
        if self.is_empty() {
            return 1.0;
        }
        scoring.confidence_weight * self.confidence()
            + scoring.length_weight * (1.0 / self.hops() as f64)
    }

    fn first_confidence(&self) -> f64 {
        self.steps.first().map(|s| s.confidence).unwrap_or(1.0)
    }

    /// Does any hop multiply rows?
    pub fn causes_fanout(&self) -> bool {
        self.steps.iter().any(|s| s.cardinality.causes_fanout())
    }
}

impl std::fmt::Display for JoinPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tables().join(" -> "))
    }
}

/// A candidate path with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPath {
    pub path: JoinPath,
    pub score: f64,
}

struct Partial {
    node: NodeIndex,
    steps: Vec<JoinStep>,
    visited: HashSet<NodeIndex>,
}

impl Partial {
    fn confidence(&self) -> f64 {
        self.steps.iter().map(|s| s.confidence).product()
    }

    fn first_confidence(&self) -> f64 {
        self.steps.first().map(|s| s.confidence).unwrap_or(1.0)
    }
}

impl KnowledgeGraph {
    /// Find the best-scoring join path between two tables.
    ///
    /// The same table yields an empty path. Unknown tables yield
    /// `TableNotFound`; unreachable ones `JoinPathNotFound`.
    pub fn find_path(&self, from: &str, to: &str, scoring: &PathScoring) -> PlanResult<JoinPath> {
        let mut candidates = self.candidate_paths(from, to, scoring)?;
        if candidates.is_empty() {
            return Err(PlanError::JoinPathNotFound {
                from: from.into(),
                to: to.into(),
                max_hops: scoring.max_hops,
                from_neighbors: self.neighbors(from),
                to_neighbors: self.neighbors(to),
            });
        }
        let best = candidates.remove(0);
        debug!(
            from,
            to,
            path = %best.path,
            score = best.score,
            alternatives = candidates.len(),
            "selected join path"
        );
        Ok(best.path)
    }

    /// Every path collected by the search, best first.
    ///
    /// Ordering: score descending, then fewer hops, then higher
    /// first-hop confidence, then table names.
    pub fn candidate_paths(
        &self,
        from: &str,
        to: &str,
        scoring: &PathScoring,
    ) -> PlanResult<Vec<ScoredPath>> {
        let from_idx = self.node_index(from).ok_or_else(|| unknown_table(from))?;
        let to_idx = self.node_index(to).ok_or_else(|| unknown_table(to))?;

        if from_idx == to_idx {
            return Ok(vec![ScoredPath {
                path: JoinPath::new(),
                score: 1.0,
            }]);
        }

        let graph = self.inner();
        let mut found: Vec<JoinPath> = Vec::new();
        let mut frontier = vec![Partial {
            node: from_idx,
            steps: vec![],
            visited: HashSet::from([from_idx]),
        }];

        for _depth in 0..scoring.max_hops {
            // Best partial per table at the next depth, keyed by name for
            // deterministic expansion order.
            let mut next: BTreeMap<String, Partial> = BTreeMap::new();

            for partial in &frontier {
                let here = graph[partial.node].name.as_str();
                for edge in graph.edges(partial.node) {
                    let neighbor = if edge.source() == partial.node {
                        edge.target()
                    } else {
                        edge.source()
                    };
                    if partial.visited.contains(&neighbor) {
                        continue;
                    }

                    let mut steps = partial.steps.clone();
                    steps.push(JoinStep::oriented(edge.weight(), here));

                    if neighbor == to_idx {
                        found.push(JoinPath::from_steps(steps));
                        continue;
                    }

                    let mut visited = partial.visited.clone();
                    visited.insert(neighbor);
                    let candidate = Partial {
                        node: neighbor,
                        steps,
                        visited,
                    };
                    let key = graph[neighbor].name.clone();
                    match next.get(&key) {
                        Some(existing) if !better_partial(&candidate, existing) => {}
                        _ => {
                            next.insert(key, candidate);
                        }
                    }
                }
            }

            if next.is_empty() {
                break;
            }
            frontier = next.into_values().collect();
        }

        let mut scored: Vec<ScoredPath> = found
            .into_iter()
            .map(|path| {
                let score = path.score(scoring);
                ScoredPath { path, score }
            })
            .collect();
        scored.sort_by(compare_scored);
        Ok(scored)
    }

    /// Check if a path exists between two tables.
    pub fn has_path(&self, from: &str, to: &str, scoring: &PathScoring) -> bool {
        self.find_path(from, to, scoring).is_ok()
    }
}

fn unknown_table(name: &str) -> PlanError {
    PlanError::TableNotFound {
        term: name.into(),
        suggestions: vec![],
    }
}

fn better_partial(a: &Partial, b: &Partial) -> bool {
    match a.confidence().total_cmp(&b.confidence()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => a.first_confidence() > b.first_confidence(),
    }
}

fn compare_scored(a: &ScoredPath, b: &ScoredPath) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.path.hops().cmp(&b.path.hops()))
        .then_with(|| b.path.first_confidence().total_cmp(&a.path.first_confidence()))
        .then_with(|| a.path.tables().cmp(&b.path.tables()))
}
