//! SQLite connection backed by `rusqlite`.
//!
//! rusqlite is synchronous, so every statement runs on tokio's blocking
//! pool while holding the connection mutex.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;

use super::{Connection, ExecutionError, ExecutionResult, ResultSet};
use crate::sql::Dialect;

/// A shared SQLite database.
#[derive(Clone)]
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> ExecutionResult<Self> {
        let conn = rusqlite::Connection::open(path).map_err(ExecutionError::driver)?;
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> ExecutionResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(ExecutionError::driver)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a batch of statements (schema setup, fixtures).
    pub fn execute_batch(&self, sql: &str) -> ExecutionResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ExecutionError::driver("sqlite connection lock poisoned"))?;
        conn.execute_batch(sql).map_err(ExecutionError::driver)
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str) -> ExecutionResult<ResultSet> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ExecutionError::driver("sqlite connection lock poisoned"))?;
            run(&conn, &sql).map_err(ExecutionError::driver)
        })
        .await
        .map_err(|e| ExecutionError::driver(format!("sqlite task failed: {}", e)))?
    }
}

fn run(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_json(row.get_ref(i)?));
        }
        rows.push(values);
    }
    Ok(ResultSet::new(columns, rows))
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(n) => n.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
        ValueRef::Blob(bytes) => bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>()
            .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_types() {
        let db = SqliteConnection::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE t (i INTEGER, r REAL, s TEXT, n TEXT, b BLOB);
             INSERT INTO t VALUES (1, 2.5, 'x', NULL, x'0aff');",
        )
        .unwrap();
        let rs = db.query("SELECT i, r, s, n, b FROM t").await.unwrap();
        assert_eq!(rs.columns, vec!["i", "r", "s", "n", "b"]);
        assert_eq!(
            rs.rows[0],
            vec![
                serde_json::json!(1),
                serde_json::json!(2.5),
                serde_json::json!("x"),
                serde_json::Value::Null,
                serde_json::json!("0aff"),
            ]
        );
    }

    #[tokio::test]
    async fn test_errors_are_driver_errors() {
        let db = SqliteConnection::open_in_memory().unwrap();
        let err = db.query("SELECT * FROM missing").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Driver(_)));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteConnection::open(dir.path().join("x.db")).unwrap();
        db.execute_batch("CREATE TABLE a (x INTEGER);").unwrap();
    }
}
