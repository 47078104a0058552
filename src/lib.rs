//! # linkql
//!
//! Knowledge-graph driven join planning and reconciliation that compiles to
//! multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Question / PartialIntent / ReconciliationRule     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [intent::parser]  (questions only)
//! ┌─────────────────────────────────────────────────────────┐
//! │                    PartialIntent                         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [resolve] + [graph::path]
//! ┌─────────────────────────────────────────────────────────┐
//! │     QueryIntent (canonical tables, verified joins)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner]           [reconcile::rule]
//! ┌─────────────────────────────────────────────────────────┐
//! │              sql::Query  ──▶  dialect SQL                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [executor]          [reconcile::engine]
//! ┌─────────────────────────────────────────────────────────┐
//! │          ResultSet / ReconciliationResult / KPIs         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Planning is synchronous and only reads an immutable
//! [`KnowledgeGraph`](graph::KnowledgeGraph) snapshot. Execution is async
//! and goes through the [`Connection`](executor::Connection) trait.

pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod intent;
pub mod planner;
pub mod reconcile;
pub mod resolve;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{PlanError, PlanResult};
    pub use crate::executor::{
        sqlite::SqliteConnection, Connection, ExecutionConfig, ExecutionError, QueryExecutor,
        ResultSet,
    };
    pub use crate::graph::{
        GraphDocument, GraphStore, JoinPath, JoinStep, JsonGraphProvider, KnowledgeGraph,
        PathScoring, Relationship, TableNode,
    };
    pub use crate::intent::{
        AggregateFunction, ColumnPair, FilterOp, FilterValue, IntentParser, Operation,
        PartialFilter, PartialIntent, QueryIntent, RequestedColumn, RuleBasedParser,
    };
    pub use crate::planner::{PlannedQuery, Planner, PlannerConfig, SqlGenerator};
    pub use crate::reconcile::{
        JoinCondition, KpiConfig, KpiReport, ReconciliationResult, ReconciliationRule,
        RuleEngine,
    };
    pub use crate::resolve::{ResolverConfig, TableResolver};
    pub use crate::sql::{Dialect, SqlDialect};
}
