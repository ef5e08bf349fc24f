use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use crate::db::db_pool::open_read_only;
use crate::error::{Result, Text2SqlError};

/// Rows returned by a generated query. Cells are JSON scalars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Compact textual form used for hashing and for showing results to a model.
    pub fn rows_as_text(&self) -> String {
        serde_json::to_string(&self.rows).unwrap_or_default()
    }
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

pub fn execute_query(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(Text2SqlError::InvalidInput("SQL query is empty".to_string()));
    }

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Text2SqlError::DatabaseQuery(e.to_string()))?;

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(cell_to_json(row.get_ref(idx)?));
        }
        rows.push(values);
    }

    debug!("Query returned {} rows", rows.len());
    Ok(QueryResult { columns, rows })
}

/// Opens the database read-only and runs `sql` on the blocking pool.
pub async fn execute_on_path(path: PathBuf, sql: String) -> Result<QueryResult> {
    tokio::task::spawn_blocking(move || {
        let conn = open_read_only(&path)?;
        execute_query(&conn, &sql)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER, name TEXT, score REAL, raw BLOB);
             INSERT INTO t VALUES (1, 'a', 1.5, x'0102'), (2, NULL, NULL, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_cells_become_json() {
        let result = execute_query(&db(), "SELECT id, name, score, raw FROM t ORDER BY id").unwrap();
        assert_eq!(result.columns, vec!["id", "name", "score", "raw"]);
        assert_eq!(result.rows[0], vec![json!(1), json!("a"), json!(1.5), json!("<blob 2 bytes>")]);
        assert_eq!(result.rows[1], vec![json!(2), Value::Null, Value::Null, Value::Null]);
    }

    #[test]
    fn test_errors_are_database_errors() {
        let err = execute_query(&db(), "SELECT nope FROM t").unwrap_err();
        assert_eq!(err.kind(), "DatabaseQueryError");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_empty_sql_rejected() {
        let err = execute_query(&db(), "   ").unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
