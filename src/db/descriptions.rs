use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::schema::TableSpec;

/// Table and column descriptions gathered from the dataset's sidecar files.
/// Keys are lower-cased so lookups ignore case.
#[derive(Debug, Default, Clone)]
pub struct Descriptions {
    tables: HashMap<String, String>,
    columns: HashMap<(String, String), String>,
}

impl Descriptions {
    pub fn table(&self, table: &str) -> Option<&str> {
        self.tables.get(&table.to_lowercase()).map(String::as_str)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&str> {
        self.columns
            .get(&(table.to_lowercase(), column.to_lowercase()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }

    /// Fills in descriptions for every table and column that has one.
    pub fn apply(&self, tables: &mut [TableSpec]) {
        for table in tables.iter_mut() {
            if let Some(desc) = self.table(&table.name) {
                table.description = Some(desc.to_string());
            }
            for column in table.columns.iter_mut() {
                if let Some(desc) = self.column(&table.name, &column.name) {
                    column.description = Some(desc.to_string());
                }
            }
        }
    }

    /// Reads `<db>_tables.csv` and one `<table>.csv` per table from `dir`.
    /// Missing files are logged and skipped.
    pub fn load_csv_dir(dir: &Path, database_name: &str, tables: &[TableSpec]) -> Self {
        let mut descriptions = Descriptions::default();

        let tables_file = dir.join(format!("{}_tables.csv", database_name));
        match read_rows(&tables_file) {
            Some(rows) => {
                for row in rows {
                    if let (Some(name), Some(desc)) =
                        (row.get("table_name"), row.get("table_description"))
                    {
                        if !desc.trim().is_empty() {
                            descriptions
                                .tables
                                .insert(name.trim().to_lowercase(), clean(desc));
                        }
                    }
                }
            }
            None => warn!(
                "Database description file not found: {}",
                tables_file.display()
            ),
        }

        for table in tables {
            let exact = dir.join(format!("{}.csv", table.name));
            let lower = dir.join(format!("{}.csv", table.name.to_lowercase()));
            let rows = read_rows(&exact).or_else(|| read_rows(&lower));
            let Some(rows) = rows else {
                warn!("Table description file not found: {}", exact.display());
                continue;
            };

            for row in rows {
                let Some(column) = row.get("original_column_name") else {
                    continue;
                };
                let plain = row.get("column_description").map(String::as_str).unwrap_or("");
                let improved = row
                    .get("improved_column_description")
                    .map(String::as_str)
                    .unwrap_or("");
                let longest = if improved.len() > plain.len() { improved } else { plain };
                if longest.trim().is_empty() {
                    continue;
                }
                descriptions.columns.insert(
                    (table.name.to_lowercase(), column.trim().to_lowercase()),
                    clean(longest),
                );
            }
        }

        debug!(
            "Loaded {} table and {} column descriptions for {}",
            descriptions.tables.len(),
            descriptions.columns.len(),
            database_name
        );
        descriptions
    }

    /// Merges a `"db|table|column" -> text` JSON file. CSV descriptions take precedence.
    pub fn merge_column_meanings(&mut self, path: &Path, database_name: &str) {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("Column meaning file not found: {}", path.display());
                return;
            }
        };
        let meanings: HashMap<String, String> = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("Could not parse column meaning file {}: {}", path.display(), e);
                return;
            }
        };

        let prefix = format!("{}|", database_name.to_lowercase());
        for (key, meaning) in meanings {
            let key = key.to_lowercase();
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((table, column)) = rest.split_once('|') else {
                continue;
            };
            let text = clean(meaning.trim_start_matches('#'));
            if text.is_empty() {
                continue;
            }
            self.columns
                .entry((table.to_string(), column.to_string()))
                .or_insert(text);
        }
    }
}

fn clean(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

type Row = HashMap<String, String>;

/// Rows of a sidecar file, or `None` when the file does not exist.
/// A file that exists but cannot be parsed is logged and yields no rows.
fn read_rows(path: &Path) -> Option<Vec<Row>> {
    if !path.exists() {
        return None;
    }
    match parse_rows(path) {
        Ok(rows) => Some(rows),
        Err(e) => {
            warn!("Could not read description file {}: {}", path.display(), e);
            Some(Vec::new())
        }
    }
}

/// Rows keyed by header name. Invalid UTF-8 is replaced rather than rejected.
fn parse_rows(path: &Path) -> csv::Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| {
            String::from_utf8_lossy(h)
                .trim_start_matches('\u{feff}')
                .trim()
                .to_string()
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping malformed row in {}: {}", path.display(), e);
                continue;
            }
        };
        let row = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|v| String::from_utf8_lossy(v).into_owned()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;

    fn table(name: &str, columns: &[&str]) -> TableSpec {
        TableSpec {
            name: name.to_string(),
            description: None,
            columns: columns
                .iter()
                .map(|c| ColumnSpec {
                    name: c.to_string(),
                    sql_type: "TEXT".to_string(),
                    description: None,
                    primary_key: false,
                    samples: vec![],
                })
                .collect(),
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_csv_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hotels_tables.csv"),
            "table_name,table_description\nHotel,\"hotels\nin the chain\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("hotel.csv"),
            "original_column_name,column_description,improved_column_description\n\
             hotelno,id,unique hotel number\n\
             city,the city where the hotel is,\n",
        )
        .unwrap();

        let mut tables = vec![table("Hotel", &["hotelno", "city", "hotelname"])];
        let descriptions = Descriptions::load_csv_dir(dir.path(), "hotels", &tables);
        descriptions.apply(&mut tables);

        assert_eq!(tables[0].description.as_deref(), Some("hotels in the chain"));
        assert_eq!(tables[0].columns[0].description.as_deref(), Some("unique hotel number"));
        assert_eq!(
            tables[0].columns[1].description.as_deref(),
            Some("the city where the hotel is")
        );
        assert!(tables[0].columns[2].description.is_none());
    }

    #[test]
    fn test_missing_sidecars_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let tables = vec![table("hotel", &["city"])];
        let descriptions = Descriptions::load_csv_dir(dir.path(), "hotels", &tables);
        assert!(descriptions.is_empty());
    }

    #[test]
    fn test_unreadable_sidecar_is_not_reported_missing() {
        let dir = tempfile::tempdir().unwrap();
        // A directory opens but fails on the first read
        let broken = dir.path().join("hotels_tables.csv");
        std::fs::create_dir(&broken).unwrap();

        assert!(parse_rows(&broken).is_err());
        assert_eq!(read_rows(&broken), Some(Vec::new()));
        assert_eq!(read_rows(&dir.path().join("absent.csv")), None);

        let tables = vec![table("hotel", &["city"])];
        assert!(Descriptions::load_csv_dir(dir.path(), "hotels", &tables).is_empty());
    }

    #[test]
    fn test_column_meanings_fill_gaps_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("column_meaning.json");
        std::fs::write(
            &path,
            r##"{"hotels|hotel|city": "#Town name", "hotels|hotel|hotelno": "ignored", "other|hotel|city": "x"}"##,
        )
        .unwrap();

        let mut descriptions = Descriptions::default();
        descriptions
            .columns
            .insert(("hotel".into(), "hotelno".into()), "from csv".into());
        descriptions.merge_column_meanings(&path, "hotels");

        assert_eq!(descriptions.column("HOTEL", "City"), Some("Town name"));
        assert_eq!(descriptions.column("hotel", "hotelno"), Some("from csv"));
    }
}
