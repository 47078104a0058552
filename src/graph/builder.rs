//! Validating construction of a [`KnowledgeGraph`].

use std::collections::HashMap;

use petgraph::graph::UnGraph;
use tracing::debug;

use super::types::{GraphDocument, Relationship, TableNode};
use super::KnowledgeGraph;

/// Errors raised while building a graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphBuildError {
    #[error("table '{0}' is defined more than once")]
    DuplicateTable(String),

    #[error("relationship {relationship} references unknown table '{table}'")]
    UnknownTable { table: String, relationship: String },

    #[error("relationship {relationship} references unknown column '{table}.{column}'")]
    UnknownColumn {
        table: String,
        column: String,
        relationship: String,
    },

    #[error("relationship {relationship} has confidence {confidence}, expected a value in [0, 1]")]
    InvalidConfidence {
        relationship: String,
        confidence: f64,
    },

    #[error("alias '{alias}' points at unknown table '{table}'")]
    UnknownAliasTarget { alias: String, table: String },
}

pub type GraphBuildResult<T> = Result<T, GraphBuildError>;

/// Collects tables, relationships and aliases, then validates them into a graph.
#[derive(Debug, Clone, Default)]
#[must_use = "builders have no effect until build() is called"]
pub struct GraphBuilder {
    doc: GraphDocument,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: GraphDocument) -> Self {
        Self { doc }
    }

    pub fn table(mut self, table: TableNode) -> Self {
        self.doc.tables.push(table);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.doc.relationships.push(relationship);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, table: impl Into<String>) -> Self {
        self.doc.aliases.insert(alias.into(), table.into());
        self
    }

    /// Validate and build.
    ///
    /// - every relationship endpoint (table and column) must exist; column
    ///   names are normalized to the table's spelling
    /// - confidence must lie in [0, 1]
    /// - relationships sharing (source, target, kind) are merged, keeping
    ///   the highest confidence
    pub fn build(self) -> GraphBuildResult<KnowledgeGraph> {
        let GraphDocument {
            tables,
            relationships,
            aliases: doc_aliases,
        } = self.doc;

        let mut graph: UnGraph<TableNode, Relationship> = UnGraph::new_undirected();
        let mut node_indices = HashMap::new();
        let mut aliases = HashMap::new();

        for table in tables {
            if node_indices.contains_key(&table.name) {
                return Err(GraphBuildError::DuplicateTable(table.name));
            }
            for alias in &table.aliases {
                aliases.insert(alias.to_lowercase(), table.name.clone());
            }
            let name = table.name.clone();
            let idx = graph.add_node(table);
            node_indices.insert(name, idx);
        }

        for (alias, table) in doc_aliases {
            if !node_indices.contains_key(&table) {
                return Err(GraphBuildError::UnknownAliasTarget { alias, table });
            }
            aliases.insert(alias.to_lowercase(), table);
        }

        // Merge duplicates first so edge order follows first declaration.
        let mut merged: Vec<Relationship> = Vec::new();
        for mut rel in relationships {
            let label = describe(&rel);
            if !(0.0..=1.0).contains(&rel.confidence) {
                return Err(GraphBuildError::InvalidConfidence {
                    relationship: label,
                    confidence: rel.confidence,
                });
            }
            rel.source_column = canonical_column(
                &graph,
                &node_indices,
                &rel.source_table,
                &rel.source_column,
                &label,
            )?;
            rel.target_column = canonical_column(
                &graph,
                &node_indices,
                &rel.target_table,
                &rel.target_column,
                &label,
            )?;

            match merged.iter_mut().find(|m| {
                m.source_table == rel.source_table
                    && m.target_table == rel.target_table
                    && m.kind == rel.kind
            }) {
                Some(existing) => {
                    debug!(relationship = %label, "merging duplicate relationship");
                    if rel.confidence > existing.confidence {
                        *existing = rel;
                    }
                }
                None => merged.push(rel),
            }
        }

        for rel in merged {
            let a = node_indices[&rel.source_table];
            let b = node_indices[&rel.target_table];
            graph.add_edge(a, b, rel);
        }

        debug!(
            tables = graph.node_count(),
            relationships = graph.edge_count(),
            "built knowledge graph"
        );

        Ok(KnowledgeGraph {
            graph,
            node_indices,
            aliases,
        })
    }
}

fn describe(rel: &Relationship) -> String {
    format!(
        "{}.{} -> {}.{}",
        rel.source_table, rel.source_column, rel.target_table, rel.target_column
    )
}

fn canonical_column(
    graph: &UnGraph<TableNode, Relationship>,
    node_indices: &HashMap<String, petgraph::graph::NodeIndex>,
    table: &str,
    column: &str,
    label: &str,
) -> GraphBuildResult<String> {
    let idx = node_indices
        .get(table)
        .ok_or_else(|| GraphBuildError::UnknownTable {
            table: table.into(),
            relationship: label.into(),
        })?;
    graph[*idx]
        .column(column)
        .map(|c| c.name.clone())
        .ok_or_else(|| GraphBuildError::UnknownColumn {
            table: table.into(),
            column: column.into(),
            relationship: label.into(),
        })
}
