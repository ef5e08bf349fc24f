use serde::Serialize;

use super::{ColumnSpec, ForeignKeyEdge, FormatType, Schema, SchemaSelection, TableSpec};
use crate::error::{Result, Text2SqlError};

pub const M_SCHEMA_DB_LINE: &str = "【DB_ID】";
pub const M_SCHEMA_SCHEMA_LINE: &str = "【Schema】";
pub const M_SCHEMA_FOREIGN_KEY_LINE: &str = "【Foreign keys】";
const M_SCHEMA_PRIMARY_KEY_FLAG: &str = "Primary Key, ";

/// Renders `schema` in the requested format. A non-empty `selection` prunes first.
pub fn format_schema(
    schema: &Schema,
    format_type: FormatType,
    selection: Option<&SchemaSelection>,
) -> Result<String> {
    let pruned;
    let schema = match selection {
        Some(selection) if !selection.is_empty() => {
            pruned = schema.prune(selection);
            &pruned
        }
        _ => schema,
    };

    match format_type {
        FormatType::Basic => Ok(one_line_per_table(schema, |table, columns| {
            format!("Table {}, columns = [ {} ]", table, columns)
        })),
        FormatType::Text => Ok(one_line_per_table(schema, |table, columns| {
            format!("{}: {}", table, columns)
        })),
        FormatType::OpenAi => Ok(one_line_per_table(schema, |table, columns| {
            format!("# {} ( {} )", table, columns)
        })),
        FormatType::Code => Ok(code_schema(schema)),
        FormatType::Semantic => semantic_schema(schema),
        FormatType::MSchema => Ok(m_schema(schema)),
    }
}

fn one_line_per_table<F>(schema: &Schema, line: F) -> String
where
    F: Fn(&str, &str) -> String,
{
    schema
        .tables
        .iter()
        .map(|table| {
            let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
            line(&table.name, &columns.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote_ident(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

fn column_definition(column: &ColumnSpec) -> String {
    if column.sql_type.is_empty() {
        quote_ident(&column.name)
    } else {
        format!("{} {}", quote_ident(&column.name), column.sql_type)
    }
}

fn create_table_sql(table: &TableSpec) -> String {
    if table.columns.is_empty() {
        return format!("-- Missing SQL for {}", table.name);
    }

    let mut lines: Vec<String> = table.columns.iter().map(column_definition).collect();

    let primary_keys: Vec<String> = table.primary_keys().map(|c| quote_ident(&c.name)).collect();
    if !primary_keys.is_empty() {
        lines.push(format!("PRIMARY KEY ({})", primary_keys.join(", ")));
    }

    for fk in &table.foreign_keys {
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            quote_ident(&fk.from_column),
            quote_ident(&fk.to_table),
            quote_ident(&fk.to_column)
        ));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote_ident(&table.name),
        lines.join(",\n    ")
    )
}

fn code_schema(schema: &Schema) -> String {
    schema
        .tables
        .iter()
        .map(create_table_sql)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct SemanticTable<'a> {
    #[serde(rename = "Table")]
    table: &'a str,
    #[serde(rename = "Description")]
    description: &'a str,
    #[serde(rename = "Columns")]
    columns: Vec<String>,
}

fn semantic_schema(schema: &Schema) -> Result<String> {
    let entries: Vec<SemanticTable<'_>> = schema
        .tables
        .iter()
        .map(|table| SemanticTable {
            table: &table.name,
            description: table.description.as_deref().unwrap_or(""),
            columns: table
                .columns
                .iter()
                .map(|c| {
                    format!(
                        "{}: {}, Description: {}, Example: {}",
                        c.name,
                        c.sql_type,
                        c.description.as_deref().unwrap_or(""),
                        c.samples.first().map(String::as_str).unwrap_or("")
                    )
                })
                .collect(),
        })
        .collect();

    serde_yaml::to_string(&entries)
        .map_err(|e| Text2SqlError::Internal(format!("failed to render semantic schema: {}", e)))
}

fn m_schema_column(column: &ColumnSpec) -> String {
    format!(
        "({}:{}, {}, {}Examples: [{}])",
        column.name,
        column.sql_type,
        column.description.as_deref().unwrap_or(""),
        if column.primary_key {
            M_SCHEMA_PRIMARY_KEY_FLAG
        } else {
            ""
        },
        column.samples.join(", ")
    )
}

fn m_schema(schema: &Schema) -> String {
    let mut out = vec![
        format!("{} {}", M_SCHEMA_DB_LINE, schema.database_name),
        M_SCHEMA_SCHEMA_LINE.to_string(),
    ];

    for table in &schema.tables {
        let columns: Vec<String> = table.columns.iter().map(m_schema_column).collect();
        out.push(format!(
            "# Table: {}, {}\n\n[\n{}\n]",
            table.name,
            table.description.as_deref().unwrap_or(""),
            columns.join("\n")
        ));
    }

    out.push(M_SCHEMA_FOREIGN_KEY_LINE.to_string());
    for edge in schema.foreign_key_edges() {
        out.push(format!(
            "{}.{}={}.{}",
            edge.from_table, edge.from_column, edge.to_table, edge.to_column
        ));
    }

    out.join("\n")
}

/// Recovers the edge list from the `【Foreign keys】` section of an M-Schema rendering.
pub fn parse_foreign_keys(m_schema_text: &str) -> Vec<ForeignKeyEdge> {
    m_schema_text
        .lines()
        .skip_while(|line| line.trim() != M_SCHEMA_FOREIGN_KEY_LINE)
        .skip(1)
        .filter_map(|line| {
            let (from, to) = line.trim().split_once('=')?;
            let (from_table, from_column) = from.split_once('.')?;
            let (to_table, to_column) = to.split_once('.')?;
            Some(ForeignKeyEdge {
                from_table: from_table.to_string(),
                from_column: from_column.to_string(),
                to_table: to_table.to_string(),
                to_column: to_column.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::hotel_schema;

    #[test]
    fn test_basic_one_line_per_table() {
        let text = format_schema(&hotel_schema(), FormatType::Basic, None).unwrap();
        assert_eq!(
            text,
            "Table hotel, columns = [ hotelno, hotelname, city ]\nTable room, columns = [ roomno, hotelno, price ]"
        );
    }

    #[test]
    fn test_text_and_openai_lines() {
        let schema = hotel_schema();
        let text = format_schema(&schema, FormatType::Text, None).unwrap();
        assert!(text.starts_with("hotel: hotelno, hotelname, city\n"));
        let openai = format_schema(&schema, FormatType::OpenAi, None).unwrap();
        assert!(openai.contains("# room ( roomno, hotelno, price )"));
    }

    #[test]
    fn test_code_has_keys() {
        let text = format_schema(&hotel_schema(), FormatType::Code, None).unwrap();
        assert!(text.contains("CREATE TABLE hotel (\n    hotelno INTEGER,"));
        assert!(text.contains("PRIMARY KEY (roomno, hotelno)"));
        assert!(text.contains("FOREIGN KEY (hotelno) REFERENCES hotel(hotelno)"));
    }

    #[test]
    fn test_code_quotes_awkward_names() {
        let mut schema = hotel_schema();
        schema.tables[0].columns[2].name = "city name".to_string();
        let text = format_schema(&schema, FormatType::Code, None).unwrap();
        assert!(text.contains("`city name` TEXT"));
    }

    #[test]
    fn test_semantic_yaml() {
        let text = format_schema(&hotel_schema(), FormatType::Semantic, None).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        let first = &parsed[0];
        assert_eq!(first["Table"].as_str(), Some("hotel"));
        assert_eq!(first["Description"].as_str(), Some("hotels in the chain"));
        assert_eq!(
            first["Columns"][1].as_str(),
            Some("hotelname: TEXT, Description: display name, Example: Grosvenor")
        );
    }

    #[test]
    fn test_m_schema_layout() {
        let text = format_schema(&hotel_schema(), FormatType::MSchema, None).unwrap();
        assert!(text.starts_with("【DB_ID】 hotels\n【Schema】\n# Table: hotel, hotels in the chain\n\n[\n"));
        assert!(text.contains("(hotelno:INTEGER, , Primary Key, Examples: [1, 2])"));
        assert!(text.contains("(hotelname:TEXT, display name, Examples: [Grosvenor])"));
        assert!(text.ends_with("【Foreign keys】\nroom.hotelno=hotel.hotelno"));
    }

    #[test]
    fn test_m_schema_without_foreign_keys_keeps_header() {
        let mut schema = hotel_schema();
        schema.tables[1].foreign_keys.clear();
        let text = format_schema(&schema, FormatType::MSchema, None).unwrap();
        assert!(text.ends_with("\n【Foreign keys】"));
        assert!(parse_foreign_keys(&text).is_empty());
    }

    #[test]
    fn test_foreign_keys_round_trip() {
        let schema = hotel_schema();
        let text = format_schema(&schema, FormatType::MSchema, None).unwrap();
        assert_eq!(parse_foreign_keys(&text), schema.foreign_key_edges());
    }

    #[test]
    fn test_every_format_lists_every_column() {
        let schema = hotel_schema();
        for format in FormatType::ALL {
            let text = format_schema(&schema, format, None).unwrap();
            for table in &schema.tables {
                assert!(text.contains(&table.name), "{} missing {}", format, table.name);
                for column in &table.columns {
                    assert!(text.contains(&column.name), "{} missing {}", format, column.name);
                }
            }
        }
    }

    #[test]
    fn test_selection_limits_rendering() {
        let selection: SchemaSelection = vec![("room", vec!["price"])].into_iter().collect();
        let text = format_schema(&hotel_schema(), FormatType::Basic, Some(&selection)).unwrap();
        assert_eq!(text, "Table room, columns = [ price ]");
    }
}
