//! Reconciliation: matching rows between a source and a target table,
//! possibly through intermediate tables, and the KPIs over the outcome.
//!
//! - [`rule`] - rule definitions and the SQL they compile to
//! - [`engine`] - running rules through a [`QueryExecutor`](crate::executor::QueryExecutor)
//! - [`kpi`] - coverage, confidence and efficiency metrics

pub mod engine;
pub mod kpi;
pub mod rule;

pub use engine::{ReconcileError, ReconciliationResult, RuleCounts, RuleEngine};
pub use kpi::{KpiConfig, KpiReport};
pub use rule::{
    ActiveFlag, Endpoint, JoinCondition, PlanTable, ReconciliationRule, RuleFilter, RulePlan,
    RuleQueries,
};
