//! Node and edge types for the relationship graph.
//!
//! These are plain serde structures so a graph can be loaded straight from a
//! JSON document produced by an external ingestion tool.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Supporting Enums
// ============================================================================

/// How a relationship was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Declared foreign key constraint
    ForeignKey,
    /// Inferred from naming or value overlap
    #[default]
    Inferred,
    /// Asserted by a user
    UserHint,
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipKind::ForeignKey => write!(f, "foreign_key"),
            RelationshipKind::Inferred => write!(f, "inferred"),
            RelationshipKind::UserHint => write!(f, "user_hint"),
        }
    }
}

/// Cardinality of a relationship between tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One-to-one relationship
    OneToOne,
    /// One-to-many relationship
    OneToMany,
    /// Many-to-one relationship
    ManyToOne,
    /// Many-to-many relationship
    ManyToMany,
    /// Unknown cardinality
    #[default]
    Unknown,
}

impl Cardinality {
    /// Reverse the cardinality (swap left/right sides).
    pub fn reverse(self) -> Self {
        match self {
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToOne => Cardinality::OneToMany,
            Cardinality::OneToOne => Cardinality::OneToOne,
            Cardinality::ManyToMany => Cardinality::ManyToMany,
            Cardinality::Unknown => Cardinality::Unknown,
        }
    }

    /// Determine cardinality from uniqueness constraints on both sides.
    pub fn from_uniqueness(left_unique: bool, right_unique: bool) -> Self {
        match (left_unique, right_unique) {
            (true, true) => Cardinality::OneToOne,
            (true, false) => Cardinality::OneToMany,
            (false, true) => Cardinality::ManyToOne,
            (false, false) => Cardinality::ManyToMany,
        }
    }

    /// Returns true if this cardinality can cause row multiplication.
    pub fn causes_fanout(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cardinality::OneToOne => write!(f, "1:1"),
            Cardinality::OneToMany => write!(f, "1:N"),
            Cardinality::ManyToOne => write!(f, "N:1"),
            Cardinality::ManyToMany => write!(f, "N:N"),
            Cardinality::Unknown => write!(f, "?:?"),
        }
    }
}

// ============================================================================
// Node Types
// ============================================================================

/// A column on a table node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: true,
            primary_key: false,
            unique: false,
        }
    }

    pub fn with_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.nullable = false;
        self
    }
}

/// A table in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNode {
    /// Canonical table name
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    /// Business names that should resolve to this table
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl TableNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add plain columns by name.
    pub fn with_columns(mut self, names: &[&str]) -> Self {
        self.columns.extend(names.iter().map(|n| ColumnInfo::new(*n)));
        self
    }

    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Look up a column, exact name first, then case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

// ============================================================================
// Edge Types
// ============================================================================

/// A column-level relationship between two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_table: String,
    pub target_table: String,
    pub source_column: String,
    pub target_column: String,
    #[serde(default)]
    pub kind: RelationshipKind,
    /// Confidence in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub cardinality: Cardinality,
}

fn default_confidence() -> f64 {
    1.0
}

impl Relationship {
    pub fn new(
        source_table: impl Into<String>,
        source_column: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            source_column: source_column.into(),
            target_column: target_column.into(),
            kind: RelationshipKind::default(),
            confidence: default_confidence(),
            cardinality: Cardinality::default(),
        }
    }

    pub fn with_kind(mut self, kind: RelationshipKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }
}

// ============================================================================
// Document
// ============================================================================

/// Serialized form of a graph, as handed over by a `GraphProvider`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub tables: Vec<TableNode>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Business alias -> canonical table name
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}
