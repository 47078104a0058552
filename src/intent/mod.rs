//! Query intents: what the caller wants, resolved against the graph.
//!
//! A [`PartialIntent`] carries raw business terms as typed by a user or
//! produced by an [`IntentParser`]. [`IntentBuilder`] resolves and
//! validates every reference in it and produces a [`QueryIntent`], the
//! only input the SQL generator accepts.

pub mod builder;
pub mod parser;

use serde::{Deserialize, Serialize};

use crate::graph::JoinPath;

pub use builder::IntentBuilder;
pub use parser::{IntentParser, ParsedIntent, RuleBasedParser, Vocabulary, VocabularyTable};

// ============================================================================
// Operations
// ============================================================================

/// Aggregate functions available to `Operation::Aggregate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// What the query does with the source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Source rows that have a match in the target.
    In,
    /// Source rows with no match in the target.
    NotIn,
    /// Source rows joined to their matching target rows.
    Equals,
    /// Aggregate over the source table. `column: None` means `COUNT(*)`.
    Aggregate {
        function: AggregateFunction,
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        group_by: Vec<String>,
    },
    /// Plain filtered selection from the source.
    Filter,
}

impl Operation {
    /// Does this operation compare the source against a target table?
    pub fn needs_target(&self) -> bool {
        matches!(self, Operation::In | Operation::NotIn | Operation::Equals)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::In => "in",
            Operation::NotIn => "not_in",
            Operation::Equals => "equals",
            Operation::Aggregate { .. } => "aggregate",
            Operation::Filter => "filter",
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Floats must be finite to be rendered as SQL.
    pub fn is_finite(&self) -> bool {
        match self {
            FilterValue::Float(f) => f.is_finite(),
            FilterValue::List(items) => items.iter().all(FilterValue::is_finite),
            _ => true,
        }
    }
}

/// A validated filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    /// Canonical table owning the column.
    pub table: String,
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
    /// Path from the source when the table is neither source nor target.
    pub join_path: Option<JoinPath>,
}

// ============================================================================
// Columns
// ============================================================================

/// A source/target column pair for the primary join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPair {
    pub source_column: String,
    pub target_column: String,
}

impl ColumnPair {
    pub fn new(source_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
        }
    }
}

/// An extra output column, possibly from another table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdditionalColumn {
    pub table: String,
    pub column: String,
    /// Result column name.
    pub alias: String,
    /// Path from the source; `None` when the column is on the source.
    pub join_path: Option<JoinPath>,
}

// ============================================================================
// Raw input
// ============================================================================

/// A filter as typed, with an optional table term (defaults to the source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialFilter {
    #[serde(default)]
    pub table: Option<String>,
    pub column: String,
    pub op: FilterOp,
    #[serde(default = "null_value")]
    pub value: FilterValue,
}

fn null_value() -> FilterValue {
    FilterValue::Null
}

/// A requested extra column as typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedColumn {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl RequestedColumn {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            alias: None,
        }
    }
}

/// Unvalidated intent: table references are business terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialIntent {
    pub operation: Operation,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    /// Explicit join columns; when present no path is derived.
    #[serde(default)]
    pub join_columns: Vec<ColumnPair>,
    #[serde(default)]
    pub filters: Vec<PartialFilter>,
    #[serde(default)]
    pub columns: Vec<RequestedColumn>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Confidence reported by whoever produced this intent.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl PartialIntent {
    pub fn new(operation: Operation, source: impl Into<String>) -> Self {
        Self {
            operation,
            source: source.into(),
            target: None,
            join_columns: Vec::new(),
            filters: Vec::new(),
            columns: Vec::new(),
            limit: None,
            confidence: None,
        }
    }

    /// `source NOT IN target`
    pub fn not_in(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(Operation::NotIn, source).with_target(target)
    }

    /// `source IN target`
    pub fn in_target(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(Operation::In, source).with_target(target)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_join_columns(mut self, pairs: Vec<ColumnPair>) -> Self {
        self.join_columns = pairs;
        self
    }

    pub fn with_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push(RequestedColumn::new(table, column));
        self
    }

    pub fn with_filter(mut self, filter: PartialFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Validated intent
// ============================================================================

/// A fully resolved intent. Built only by [`IntentBuilder`]; read-only after.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryIntent {
    pub(crate) operation: Operation,
    pub(crate) source_table: String,
    pub(crate) target_table: Option<String>,
    pub(crate) join_columns: Vec<ColumnPair>,
    pub(crate) target_path: Option<JoinPath>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) additional_columns: Vec<AdditionalColumn>,
    pub(crate) limit: Option<u64>,
    pub(crate) confidence: f64,
}

impl QueryIntent {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn target_table(&self) -> Option<&str> {
        self.target_table.as_deref()
    }

    /// Primary join columns. Filled from the path when it is a single hop.
    pub fn join_columns(&self) -> &[ColumnPair] {
        &self.join_columns
    }

    /// Derived path to the target; `None` when join columns were supplied.
    pub fn target_path(&self) -> Option<&JoinPath> {
        self.target_path.as_ref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn additional_columns(&self) -> &[AdditionalColumn] {
        &self.additional_columns
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}
