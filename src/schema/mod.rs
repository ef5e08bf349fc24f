pub mod format;

pub use format::{format_schema, parse_foreign_keys};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, Text2SqlError};

/// The six schema renderings a prompt can embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatType {
    #[serde(rename = "basic", alias = "BASIC")]
    Basic,
    #[serde(rename = "text", alias = "TEXT")]
    Text,
    #[serde(rename = "openai", alias = "OPENAI")]
    OpenAi,
    #[serde(rename = "code", alias = "CODE")]
    Code,
    #[serde(rename = "semantic", alias = "SEMANTIC")]
    Semantic,
    #[serde(rename = "m_schema", alias = "M_SCHEMA")]
    MSchema,
}

impl FormatType {
    pub const ALL: [FormatType; 6] = [
        FormatType::Basic,
        FormatType::Text,
        FormatType::OpenAi,
        FormatType::Code,
        FormatType::Semantic,
        FormatType::MSchema,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Basic => "basic",
            FormatType::Text => "text",
            FormatType::OpenAi => "openai",
            FormatType::Code => "code",
            FormatType::Semantic => "semantic",
            FormatType::MSchema => "m_schema",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatType {
    type Err = Text2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        FormatType::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| Text2SqlError::UnsupportedFormat(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub description: Option<String>,
    pub primary_key: bool,
    pub samples: Vec<String>,
}

/// Outbound edge from one of the owning table's columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// A foreign key with its source table spelled out, as listed in `【Foreign keys】`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<ColumnSpec>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// A loaded database schema. Tables keep the database's declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub database_name: String,
    pub tables: Vec<TableSpec>,
}

impl Schema {
    pub fn new(database_name: impl Into<String>, tables: Vec<TableSpec>) -> Self {
        let mut schema = Self {
            database_name: database_name.into(),
            tables,
        };
        schema.retain_valid_foreign_keys();
        schema
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn foreign_key_edges(&self) -> Vec<ForeignKeyEdge> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys.iter().map(move |fk| ForeignKeyEdge {
                    from_table: t.name.clone(),
                    from_column: fk.from_column.clone(),
                    to_table: fk.to_table.clone(),
                    to_column: fk.to_column.clone(),
                })
            })
            .collect()
    }

    /// Drops edges whose target table or column is not part of this schema, and
    /// rewrites surviving endpoints to the declared spelling.
    pub fn retain_valid_foreign_keys(&mut self) {
        let index: HashMap<String, (String, Vec<String>)> = self
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.to_lowercase(),
                    (t.name.clone(), t.columns.iter().map(|c| c.name.clone()).collect()),
                )
            })
            .collect();

        for table in &mut self.tables {
            let own_columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
            table.foreign_keys = table
                .foreign_keys
                .drain(..)
                .filter_map(|fk| {
                    let from_column = own_columns
                        .iter()
                        .find(|c| c.eq_ignore_ascii_case(&fk.from_column))?
                        .clone();
                    let (to_table, to_columns) = index.get(&fk.to_table.to_lowercase())?;
                    let to_column = to_columns
                        .iter()
                        .find(|c| c.eq_ignore_ascii_case(&fk.to_column))?
                        .clone();
                    Some(ForeignKey {
                        from_column,
                        to_table: to_table.clone(),
                        to_column,
                    })
                })
                .collect();
        }
    }

    /// Restricts the schema to a caller-chosen subset of tables and columns.
    ///
    /// Names are matched case-insensitively and mapped back to the declared spelling.
    /// Unknown tables and columns are dropped, and so is a table none of whose
    /// requested columns exist. An empty column list keeps the whole table.
    /// Output order follows the database, not the selection.
    pub fn prune(&self, selection: &SchemaSelection) -> Schema {
        if selection.is_empty() {
            return self.clone();
        }

        let wanted: HashMap<String, Vec<String>> = selection
            .0
            .iter()
            .map(|(table, columns)| {
                (
                    table.to_lowercase(),
                    columns.iter().map(|c| c.to_lowercase()).collect(),
                )
            })
            .collect();

        let tables = self
            .tables
            .iter()
            .filter_map(|table| {
                let columns = wanted.get(&table.name.to_lowercase())?;
                let mut pruned = table.clone();
                if !columns.is_empty() {
                    pruned
                        .columns
                        .retain(|c| columns.contains(&c.name.to_lowercase()));
                    // Nothing requested exists, so the table counts as unknown too
                    if pruned.columns.is_empty() {
                        return None;
                    }
                }
                Some(pruned)
            })
            .collect();

        Schema::new(self.database_name.clone(), tables)
    }
}

/// Table name to column names. Used for runtime schema pruning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSelection(pub HashMap<String, Vec<String>>);

impl SchemaSelection {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T, C> FromIterator<(T, Vec<C>)> for SchemaSelection
where
    T: Into<String>,
    C: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (T, Vec<C>)>>(iter: I) -> Self {
        SchemaSelection(
            iter.into_iter()
                .map(|(t, cols)| (t.into(), cols.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }
}
