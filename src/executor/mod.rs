//! Query execution against a live connection.
//!
//! Every statement runs under a timeout and a row cap. A statement that
//! fails while carrying schema-qualified table names is tried exactly once
//! more with the schemas stripped; the attempt list is explicit and never
//! grows beyond those two entries.

pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::sql::query::Query;
use crate::sql::Dialect;

pub use sqlite::SqliteConnection;

/// Result type for execution.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors raised while running SQL.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// The statement did not finish in time.
    #[error("query timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// The database rejected the statement or the connection failed.
    #[error("database error: {0}")]
    Driver(String),

    /// Both the schema-qualified statement and its schema-less fallback failed.
    #[error("query failed with and without schema qualification: {}", .attempts.join("; "))]
    FallbackFailed { attempts: Vec<String> },
}

impl ExecutionError {
    pub fn driver(message: impl std::fmt::Display) -> Self {
        Self::Driver(message.to_string())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Rows returned by a statement, values as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Set when rows beyond the configured cap were dropped.
    #[serde(default)]
    pub truncated: bool,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row as a count.
    pub fn scalar_u64(&self) -> Option<u64> {
        match self.rows.first()?.first()? {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Rows as `column -> value` objects.
    pub fn records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    fn cap(&mut self, max_rows: usize) {
        if self.rows.len() > max_rows {
            warn!(rows = self.rows.len(), max_rows, "result truncated");
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A database connection that runs SQL text.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Dialect used to render SQL for this connection.
    fn dialect(&self) -> Dialect;

    async fn query(&self, sql: &str) -> ExecutionResult<ResultSet>;
}

/// Execution limits, the `[execution]` settings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub max_rows: usize,
    /// Retry once without schema qualification after a failure.
    pub schema_fallback: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_rows: 10_000,
            schema_fallback: true,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Runs queries on a connection with timeout, row cap and schema fallback.
#[derive(Clone)]
pub struct QueryExecutor {
    connection: Arc<dyn Connection>,
    config: ExecutionConfig,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("dialect", &self.connection.dialect())
            .field("config", &self.config)
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(connection: Arc<dyn Connection>, config: ExecutionConfig) -> Self {
        Self { connection, config }
    }

    pub fn dialect(&self) -> Dialect {
        self.connection.dialect()
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run raw SQL once, with the timeout and row cap applied.
    pub async fn run_sql(&self, sql: &str) -> ExecutionResult<ResultSet> {
        let timeout = self.config.timeout();
        debug!(sql, "executing");
        let mut result = tokio::time::timeout(timeout, self.connection.query(sql))
            .await
            .map_err(|_| ExecutionError::Timeout(timeout))??;
        result.cap(self.config.max_rows);
        Ok(result)
    }

    /// Run a query, falling back to schema-less table names once if the
    /// schema-qualified statement fails.
    pub async fn execute(&self, query: &Query) -> ExecutionResult<ResultSet> {
        let dialect = self.dialect();
        let mut attempts = vec![query.to_sql(dialect)];
        if self.config.schema_fallback && query.has_schema() {
            attempts.push(query.without_schemas().to_sql(dialect));
        }

        let mut errors = Vec::new();
        for (i, sql) in attempts.iter().enumerate() {
            match self.run_sql(sql).await {
                Ok(result) => {
                    if i > 0 {
                        info!("schema-less fallback succeeded");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if i + 1 < attempts.len() {
                        warn!(error = %e, "query failed, retrying without schema qualification");
                    }
                    errors.push(e);
                }
            }
        }

        match errors.len() {
            1 => Err(errors.remove(0)),
            _ => Err(ExecutionError::FallbackFailed {
                attempts: errors.iter().map(|e| e.to_string()).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::sql::query::TableRef;

    /// Records every statement and fails those containing a marker.
    struct Scripted {
        fail_on: &'static str,
        seen: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(fail_on: &'static str) -> Self {
            Self {
                fail_on,
                seen: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for Scripted {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn query(&self, sql: &str) -> ExecutionResult<ResultSet> {
            self.seen.lock().unwrap().push(sql.to_string());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if !self.fail_on.is_empty() && sql.contains(self.fail_on) {
                return Err(ExecutionError::driver(format!("rejected: {}", self.fail_on)));
            }
            Ok(ResultSet::new(
                vec!["n".into()],
                (0..5).map(|i| vec![serde_json::json!(i)]).collect(),
            ))
        }
    }

    fn query() -> Query {
        Query::new()
            .select_star()
            .from(TableRef::new("RBP_GPU").with_schema("dbo").with_alias("s"))
    }

    #[tokio::test]
    async fn test_fallback_runs_once_on_schema_failure() {
        let conn = Arc::new(Scripted::new("\"dbo\"."));
        let exec = QueryExecutor::new(conn.clone(), ExecutionConfig::default());
        let result = exec.execute(&query()).await.unwrap();
        assert_eq!(result.len(), 5);
        let seen = conn.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("\"dbo\".\"RBP_GPU\""));
        assert!(!seen[1].contains("dbo"));
    }

    #[tokio::test]
    async fn test_no_fallback_without_schema() {
        let conn = Arc::new(Scripted::new("RBP_GPU"));
        let exec = QueryExecutor::new(conn.clone(), ExecutionConfig::default());
        let q = Query::new().select_star().from(TableRef::new("RBP_GPU"));
        let err = exec.execute(&q).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Driver(_)));
        assert_eq!(conn.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_both_attempts_failing() {
        let conn = Arc::new(Scripted::new("RBP_GPU"));
        let exec = QueryExecutor::new(conn.clone(), ExecutionConfig::default());
        let err = exec.execute(&query()).await.unwrap_err();
        match err {
            ExecutionError::FallbackFailed { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(conn.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_can_be_disabled() {
        let conn = Arc::new(Scripted::new("\"dbo\"."));
        let config = ExecutionConfig {
            schema_fallback: false,
            ..Default::default()
        };
        let exec = QueryExecutor::new(conn.clone(), config);
        assert!(exec.execute(&query()).await.is_err());
        assert_eq!(conn.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_row_cap() {
        let conn = Arc::new(Scripted::new(""));
        let config = ExecutionConfig {
            max_rows: 3,
            ..Default::default()
        };
        let exec = QueryExecutor::new(conn, config);
        let result = exec.run_sql("SELECT 1").await.unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut slow = Scripted::new("");
        slow.delay = Some(Duration::from_secs(60));
        let config = ExecutionConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        let exec = QueryExecutor::new(Arc::new(slow), config);
        let err = exec.run_sql("SELECT 1").await.unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(Duration::from_secs(1)));
    }

    #[test]
    fn test_scalar_and_records() {
        let rs = ResultSet::new(
            vec!["a".into(), "b".into()],
            vec![vec![serde_json::json!(7), serde_json::json!("x")]],
        );
        assert_eq!(rs.scalar_u64(), Some(7));
        assert_eq!(rs.records()[0]["b"], serde_json::json!("x"));
        assert_eq!(ResultSet::default().scalar_u64(), None);
    }
}
