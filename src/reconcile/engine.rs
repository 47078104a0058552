//! Runs reconciliation rules against a connection.

use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::kpi;
use super::rule::{ReconciliationRule, RuleQueries};
use crate::error::PlanError;
use crate::executor::{ExecutionError, QueryExecutor, ResultSet};
use crate::sql::query::Query;

/// Default number of sample rows fetched per record set.
pub const DEFAULT_SAMPLE_LIMIT: u64 = 100;

/// Errors from a rule run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A count query returned something other than one non-negative number.
    #[error("count query returned no usable number ({message}): {query}")]
    BadCount { query: String, message: String },
}

/// Row counts of one rule run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCounts {
    pub source_total: u64,
    pub target_total: u64,
    /// Source rows with a match across the chain.
    pub matched: u64,
    pub unmatched_source: u64,
    pub unmatched_target: u64,
    /// Source rows not flagged active; `None` without an active flag.
    pub inactive: Option<u64>,
}

/// Counts and row samples of one rule run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    pub rule: String,
    pub counts: RuleCounts,
    pub matched_sample: ResultSet,
    pub unmatched_source_sample: ResultSet,
    pub unmatched_target_sample: ResultSet,
    pub elapsed_ms: u64,
    pub rule_confidence: f64,
}

impl ReconciliationResult {
    pub fn coverage_rate(&self) -> f64 {
        kpi::coverage_rate(self.counts.matched, self.counts.source_total)
    }
}

/// Executes rules through a [`QueryExecutor`].
#[derive(Debug)]
pub struct RuleEngine {
    executor: QueryExecutor,
    sample_limit: u64,
}

impl RuleEngine {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    pub fn with_sample_limit(mut self, limit: u64) -> Self {
        self.sample_limit = limit;
        self
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// The statements a run would issue, in the executor's dialect.
    pub fn queries(&self, rule: &ReconciliationRule) -> Result<RuleQueries, PlanError> {
        rule.plan()?
            .queries(self.executor.dialect(), Some(self.sample_limit))
    }

    /// Run one rule: every count, then the three samples.
    pub async fn execute(
        &self,
        rule: &ReconciliationRule,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let started = Instant::now();
        let queries = self.queries(rule)?;
        debug!(rule = %rule.name, "running reconciliation queries");

        let (source_total, target_total, matched, unmatched_source, unmatched_target) = futures::try_join!(
            self.count(&queries.source_count),
            self.count(&queries.target_count),
            self.count(&queries.matched_count),
            self.count(&queries.unmatched_source_count),
            self.count(&queries.unmatched_target_count),
        )?;
        let inactive = match &queries.inactive_count {
            Some(q) => Some(self.count(q).await?),
            None => None,
        };

        let (matched_sample, unmatched_source_sample, unmatched_target_sample) = futures::try_join!(
            self.executor.execute(&queries.matched),
            self.executor.execute(&queries.unmatched_source),
            self.executor.execute(&queries.unmatched_target),
        )?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            rule = %rule.name,
            source_total,
            matched,
            unmatched_source,
            unmatched_target,
            elapsed_ms,
            "reconciliation finished"
        );

        Ok(ReconciliationResult {
            run_id: Uuid::new_v4(),
            rule: rule.name.clone(),
            counts: RuleCounts {
                source_total,
                target_total,
                matched,
                unmatched_source,
                unmatched_target,
                inactive,
            },
            matched_sample,
            unmatched_source_sample,
            unmatched_target_sample,
            elapsed_ms,
            rule_confidence: rule.confidence,
        })
    }

    /// Run every rule concurrently; results come back in input order.
    pub async fn execute_all(
        &self,
        rules: &[ReconciliationRule],
    ) -> Vec<Result<ReconciliationResult, ReconcileError>> {
        let started = Instant::now();
        let results = join_all(rules.iter().map(|rule| self.execute(rule))).await;
        info!(
            rules = rules.len(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch reconciliation finished"
        );
        results
    }

    async fn count(&self, query: &Query) -> Result<u64, ReconcileError> {
        let rows = self.executor.execute(query).await?;
        rows.scalar_u64().ok_or_else(|| ReconcileError::BadCount {
            query: query.to_sql(self.executor.dialect()),
            message: format!("{} rows, first value {:?}", rows.len(), rows.rows.first().and_then(|r| r.first())),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::executor::sqlite::SqliteConnection;
    use crate::executor::ExecutionConfig;
    use crate::intent::FilterValue;

    fn engine() -> RuleEngine {
        let db = SqliteConnection::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE gpu (material TEXT, status TEXT);
             CREATE TABLE ops (sku TEXT);
             INSERT INTO gpu VALUES ('A', 'Y'), ('B', 'Y'), ('C', 'N'), ('D', NULL);
             INSERT INTO ops VALUES ('A'), ('B'), ('Z');",
        )
        .unwrap();
        RuleEngine::new(QueryExecutor::new(Arc::new(db), ExecutionConfig::default()))
    }

    fn rule() -> ReconciliationRule {
        ReconciliationRule::two_table("gpu_ops", "gpu", &["material"], "ops", &["sku"])
            .with_active_flag("status", FilterValue::String("Y".into()))
            .with_confidence(0.8)
    }

    #[tokio::test]
    async fn test_execute_counts() {
        let result = engine().execute(&rule()).await.unwrap();
        assert_eq!(
            result.counts,
            RuleCounts {
                source_total: 4,
                target_total: 3,
                matched: 2,
                unmatched_source: 2,
                unmatched_target: 1,
                inactive: Some(2),
            }
        );
        assert_eq!(result.coverage_rate(), 0.5);
        assert_eq!(result.matched_sample.len(), 2);
        assert_eq!(result.unmatched_target_sample.rows[0][0], serde_json::json!("Z"));
        assert_eq!(result.rule_confidence, 0.8);
    }

    #[tokio::test]
    async fn test_execute_all_keeps_order() {
        let engine = engine().with_sample_limit(1);
        let mut broken = rule();
        broken.name = "broken".into();
        broken.target_table = "missing".into();

        let results = engine.execute_all(&[broken, rule()]).await;
        assert!(matches!(results[0], Err(ReconcileError::Execution(_))));
        let ok = results[1].as_ref().unwrap();
        assert_eq!(ok.rule, "gpu_ops");
        assert_eq!(ok.matched_sample.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_rule_never_executes() {
        let mut bad = rule();
        bad.source_columns.clear();
        let err = engine().execute(&bad).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Plan(PlanError::InvalidRule { .. })));
    }
}
