use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::{ColumnSpec, ForeignKey, TableSpec};

const MAX_SAMPLE_CHARS: usize = 100;

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// User tables in declaration order, skipping SQLite internals.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tables)
}

/// Reads columns, key flags, outbound edges and up to `sample_values` samples per column.
/// Descriptions are left empty.
pub fn load_tables(conn: &Connection, sample_values: usize) -> Result<Vec<TableSpec>> {
    let mut tables = Vec::new();
    for name in list_tables(conn)? {
        let columns = load_columns(conn, &name, sample_values)?;
        let foreign_keys = load_foreign_keys(conn, &name)?;
        debug!(
            "Introspected table {}: {} columns, {} foreign keys",
            name,
            columns.len(),
            foreign_keys.len()
        );
        tables.push(TableSpec {
            name,
            description: None,
            columns,
            foreign_keys,
        });
    }

    resolve_implicit_targets(&mut tables);
    Ok(tables)
}

fn load_columns(conn: &Connection, table: &str, sample_values: usize) -> Result<Vec<ColumnSpec>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut columns = Vec::with_capacity(rows.len());
    for (name, sql_type, pk) in rows {
        let samples = match sample_column(conn, table, &name, sample_values) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Could not sample {}.{}: {}", table, name, e);
                Vec::new()
            }
        };
        columns.push(ColumnSpec {
            name,
            sql_type,
            description: None,
            primary_key: pk > 0,
            samples,
        });
    }
    Ok(columns)
}

fn load_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA foreign_key_list({})",
        quote_identifier(table)
    ))?;
    let keys = stmt
        .query_map([], |row| {
            Ok(ForeignKey {
                to_table: row.get::<_, String>(2)?,
                from_column: row.get::<_, String>(3)?,
                to_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
}

/// `REFERENCES t` without a column targets t's primary key.
fn resolve_implicit_targets(tables: &mut [TableSpec]) {
    let primary_keys: Vec<(String, Option<String>)> = tables
        .iter()
        .map(|t| {
            (
                t.name.to_lowercase(),
                t.primary_keys().next().map(|c| c.name.clone()),
            )
        })
        .collect();

    for table in tables.iter_mut() {
        for fk in table.foreign_keys.iter_mut().filter(|fk| fk.to_column.is_empty()) {
            if let Some((_, Some(pk))) = primary_keys
                .iter()
                .find(|(name, _)| *name == fk.to_table.to_lowercase())
            {
                fk.to_column = pk.clone();
            }
        }
    }
}

/// Distinct non-null values in first-seen order.
pub fn sample_column(
    conn: &Connection,
    table: &str,
    column: &str,
    limit: usize,
) -> Result<Vec<String>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let column_ident = quote_identifier(column);
    let sql = format!(
        "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL LIMIT {limit}",
        col = column_ident,
        table = quote_identifier(table),
        limit = limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map([], |row| Ok(sample_to_string(row.get_ref(0)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(values)
}

fn sample_to_string(value: ValueRef<'_>) -> String {
    let text = match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    };
    truncate_chars(&text, MAX_SAMPLE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE hotel (hotelno INTEGER PRIMARY KEY, hotelname TEXT, city TEXT);
             CREATE TABLE room (roomno INTEGER, hotelno INTEGER REFERENCES hotel, price REAL,
                                PRIMARY KEY (roomno, hotelno));
             INSERT INTO hotel VALUES (1, 'Grosvenor', 'London'), (2, 'Ritz', 'London'),
                                      (3, 'Plaza', NULL), (4, 'Savoy', 'Paris'), (5, 'Hilton', 'Rome');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_tables_in_declaration_order() {
        let conn = memory_db();
        assert_eq!(list_tables(&conn).unwrap(), vec!["hotel", "room"]);
    }

    #[test]
    fn test_columns_and_keys() {
        let conn = memory_db();
        let tables = load_tables(&conn, 3).unwrap();
        let hotel = &tables[0];
        let names: Vec<&str> = hotel.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["hotelno", "hotelname", "city"]);
        assert!(hotel.columns[0].primary_key);
        assert_eq!(hotel.columns[0].sql_type, "INTEGER");

        let room = &tables[1];
        assert_eq!(room.primary_keys().count(), 2);
        assert_eq!(
            room.foreign_keys,
            vec![ForeignKey {
                from_column: "hotelno".into(),
                to_table: "hotel".into(),
                to_column: "hotelno".into(),
            }]
        );
    }

    #[test]
    fn test_samples_are_distinct_non_null_and_capped() {
        let conn = memory_db();
        let cities = sample_column(&conn, "hotel", "city", 3).unwrap();
        assert_eq!(cities, vec!["London", "Paris", "Rome"]);

        let names = sample_column(&conn, "hotel", "hotelname", 3).unwrap();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_long_samples_truncated() {
        let long = "é".repeat(150);
        assert_eq!(truncate_chars(&long, 100).chars().count(), 100);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
