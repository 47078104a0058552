//! Knowledge graph of tables and the column-level relationships between them.
//!
//! The graph is the single source of truth for how tables connect. Planning
//! only ever reads it; reloads swap in a whole new graph through
//! [`GraphStore`](store::GraphStore).
//!
//! The module is organized into submodules:
//! - `types`: Node, edge and document types (serde)
//! - `builder`: Validating construction from a document
//! - `path`: Join path discovery and scoring
//! - `store`: Snapshot store and graph providers

pub mod builder;
pub mod path;
pub mod store;
pub mod types;

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

pub use builder::{GraphBuildError, GraphBuildResult, GraphBuilder};
pub use path::{JoinPath, JoinStep, PathScoring};
pub use store::{GraphProvider, GraphStore, JsonGraphProvider, ProviderError};
pub use types::{
    Cardinality, ColumnInfo, GraphDocument, Relationship, RelationshipKind, TableNode,
};

/// Immutable relationship graph.
///
/// Edges are undirected for traversal; each edge keeps the relationship in
/// the orientation it was declared, and path search re-orients it per hop.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: UnGraph<TableNode, Relationship>,
    node_indices: HashMap<String, NodeIndex>,
    /// Lowercased business alias -> canonical table name
    aliases: HashMap<String, String>,
}

impl KnowledgeGraph {
    /// Build a graph from a document, validating every relationship.
    pub fn from_document(doc: GraphDocument) -> GraphBuildResult<Self> {
        GraphBuilder::from_document(doc).build()
    }

    /// Look up a table by its canonical name.
    pub fn table(&self, name: &str) -> Option<&TableNode> {
        self.node_indices.get(name).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_indices.contains_key(name)
    }

    /// All tables, in the order they were added.
    pub fn tables(&self) -> impl Iterator<Item = &TableNode> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables().map(|t| t.name.as_str()).collect()
    }

    /// All relationships, in their declared orientation.
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.graph.edge_weights()
    }

    pub fn table_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Canonical table for a business alias (case-insensitive).
    pub fn alias_target(&self, alias: &str) -> Option<&str> {
        self.aliases.get(&alias.to_lowercase()).map(String::as_str)
    }

    /// Every alias known to the graph, lowercased.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, t)| (a.as_str(), t.as_str()))
    }

    /// Tables directly connected to `name`, sorted.
    pub fn neighbors(&self, name: &str) -> Vec<String> {
        let Some(idx) = self.node_indices.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors(*idx)
            .filter(|n| n != idx)
            .map(|n| self.graph[n].name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Relationships between two tables, in either declared orientation.
    pub fn edges_between(&self, a: &str, b: &str) -> Vec<&Relationship> {
        let (Some(ia), Some(ib)) = (self.node_indices.get(a), self.node_indices.get(b)) else {
            return Vec::new();
        };
        self.graph
            .edges(*ia)
            .filter(|e| e.target() == *ib || e.source() == *ib && e.target() == *ia)
            .map(|e| e.weight())
            .collect()
    }

    /// Is there an edge joining `a.a_col` to `b.b_col` (either orientation)?
    pub fn has_edge(&self, a: &str, a_col: &str, b: &str, b_col: &str) -> bool {
        self.edges_between(a, b).into_iter().any(|r| {
            (r.source_table == a
                && r.source_column == a_col
                && r.target_table == b
                && r.target_column == b_col)
                || (r.source_table == b
                    && r.source_column == b_col
                    && r.target_table == a
                    && r.target_column == a_col)
        })
    }

    /// Serialize back to a document (round-trips through `from_document`).
    pub fn to_document(&self) -> GraphDocument {
        let mut aliases = HashMap::new();
        for (alias, table) in &self.aliases {
            let declared_on_node = self
                .table(table)
                .is_some_and(|t| t.aliases.iter().any(|a| a.to_lowercase() == *alias));
            if !declared_on_node {
                aliases.insert(alias.clone(), table.clone());
            }
        }
        GraphDocument {
            tables: self.tables().cloned().collect(),
            relationships: self.relationships().cloned().collect(),
            aliases,
        }
    }

    pub(crate) fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.node_indices.get(name).copied()
    }

    pub(crate) fn inner(&self) -> &UnGraph<TableNode, Relationship> {
        &self.graph
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// RBP_GPU -- OPS_EXCEL_GPU -- MATERIAL_MASTER, plus a PLANT leaf off RBP_GPU.
    pub fn gpu_graph() -> KnowledgeGraph {
        GraphBuilder::new()
            .table(
                TableNode::new("RBP_GPU")
                    .with_schema("dbo")
                    .with_columns(&["Material", "Plant", "Quantity", "Status"])
                    .with_alias("rbp"),
            )
            .table(
                TableNode::new("OPS_EXCEL_GPU")
                    .with_schema("dbo")
                    .with_columns(&["PLANNING_SKU", "Material", "Region"]),
            )
            .table(
                TableNode::new("MATERIAL_MASTER")
                    .with_schema("dbo")
                    .with_columns(&["Material", "DESCRIPTION", "Category"]),
            )
            .table(TableNode::new("PLANT").with_columns(&["Plant", "PlantName"]))
            .relationship(
                Relationship::new("RBP_GPU", "Material", "OPS_EXCEL_GPU", "PLANNING_SKU")
                    .with_kind(RelationshipKind::UserHint)
                    .with_confidence(0.9),
            )
            .relationship(
                Relationship::new("OPS_EXCEL_GPU", "Material", "MATERIAL_MASTER", "Material")
                    .with_kind(RelationshipKind::ForeignKey)
                    .with_confidence(1.0)
                    .with_cardinality(Cardinality::ManyToOne),
            )
            .relationship(
                Relationship::new("RBP_GPU", "Plant", "PLANT", "Plant")
                    .with_kind(RelationshipKind::ForeignKey)
                    .with_confidence(0.95),
            )
            .alias("gpu master", "MATERIAL_MASTER")
            .build()
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::gpu_graph;
    use super::*;

    #[test]
    fn test_counts() {
        let g = gpu_graph();
        assert_eq!(g.table_count(), 4);
        assert_eq!(g.relationship_count(), 3);
    }

    #[test]
    fn test_neighbors_sorted() {
        let g = gpu_graph();
        assert_eq!(g.neighbors("RBP_GPU"), vec!["OPS_EXCEL_GPU", "PLANT"]);
        assert!(g.neighbors("NOPE").is_empty());
    }

    #[test]
    fn test_edges_between_either_orientation() {
        let g = gpu_graph();
        assert_eq!(g.edges_between("OPS_EXCEL_GPU", "RBP_GPU").len(), 1);
        assert!(g.has_edge("OPS_EXCEL_GPU", "PLANNING_SKU", "RBP_GPU", "Material"));
        assert!(!g.has_edge("OPS_EXCEL_GPU", "Material", "RBP_GPU", "Material"));
        assert!(g.edges_between("RBP_GPU", "MATERIAL_MASTER").is_empty());
    }

    #[test]
    fn test_alias_lookup() {
        let g = gpu_graph();
        assert_eq!(g.alias_target("RBP"), Some("RBP_GPU"));
        assert_eq!(g.alias_target("Gpu Master"), Some("MATERIAL_MASTER"));
    }

    #[test]
    fn test_document_round_trip() {
        let g = gpu_graph();
        let doc = g.to_document();
        let rebuilt = KnowledgeGraph::from_document(doc.clone()).unwrap();
        assert_eq!(rebuilt.to_document(), doc);
        assert_eq!(doc.aliases.get("gpu master").map(String::as_str), Some("MATERIAL_MASTER"));
    }
}
