use minijinja::context;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::db::execution::{execute_on_path, QueryResult};
use crate::error::{Result, Text2SqlError};
use crate::llm::chat::ChatMessage;
use crate::llm::response::complete_sql;
use crate::llm::LlmClient;
use crate::prompts::PromptTemplates;
use crate::retriever::Exemplar;
use crate::schema::{format_schema, FormatType, Schema};

const PREVIEW_ROWS: usize = 5;

fn preview(result: &QueryResult) -> String {
    let head = QueryResult {
        columns: result.columns.clone(),
        rows: result.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
    };
    format!("columns: {}\nrows: {}", head.columns.join(", "), head.rows_as_text())
}

/// Execution-feedback loop that asks a model to revise a predicted query.
pub struct SqlRefiner<'a> {
    templates: &'a PromptTemplates,
    schema: &'a Schema,
    database_path: PathBuf,
    examples: Vec<Exemplar>,
    evidence: Option<String>,
}

impl<'a> SqlRefiner<'a> {
    pub fn new(templates: &'a PromptTemplates, schema: &'a Schema, database_path: PathBuf) -> Self {
        Self {
            templates,
            schema,
            database_path,
            examples: Vec::new(),
            evidence: None,
        }
    }

    pub fn with_examples(mut self, examples: Vec<Exemplar>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_evidence(mut self, evidence: Option<String>) -> Self {
        self.evidence = evidence.filter(|e| !e.trim().is_empty());
        self
    }

    fn prompt(&self, schema_text: &str, question: &str, sql: &str, results: &str) -> Result<String> {
        self.templates.render(
            "refine",
            context! {
                schema => schema_text,
                examples => &self.examples,
                question => question,
                evidence => &self.evidence,
                sql => sql,
                results => results,
            },
        )
    }

    fn ensure_database(&self) -> Result<()> {
        if self.database_path.is_file() {
            Ok(())
        } else {
            Err(Text2SqlError::InvalidDatabasePath(
                self.database_path.display().to_string(),
            ))
        }
    }

    /// Runs up to `max_attempts` revision rounds and returns the final query.
    ///
    /// The loop stops early once a revised query executes, and also when the
    /// model call fails, in which case the last known query is returned.
    pub async fn improve(
        &self,
        client: &mut dyn LlmClient,
        question: &str,
        sql: &str,
        max_attempts: usize,
    ) -> Result<String> {
        self.ensure_database()?;

        let schema_text = format_schema(self.schema, FormatType::Code, None)?;
        let mut current = sql.to_string();

        for attempt in 0..max_attempts {
            let results = match execute_on_path(self.database_path.clone(), current.clone()).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("Revised query executes after {} attempt(s)", attempt);
                        break;
                    }
                    preview(&result)
                }
                Err(e) => {
                    debug!("Attempt {} failed to execute: {}", attempt, e);
                    e.to_string()
                }
            };

            let prompt = self.prompt(&schema_text, question, &current, &results)?;
            match client.execute_prompt(&prompt).await {
                Ok(reply) => {
                    let revised = complete_sql(&reply, &prompt);
                    if !revised.is_empty() {
                        current = revised;
                    }
                }
                Err(e) => {
                    warn!("Stopping refinement: {}", e);
                    break;
                }
            }
        }

        Ok(current)
    }

    /// Chat variant of [`Self::improve`]. Every round is appended to one running
    /// conversation, so the model sees its earlier revisions and their results.
    ///
    /// All `max_attempts` rounds run. The returned query is the latest one that
    /// executed, or the latest revision when none did.
    pub async fn improve_chat(
        &self,
        client: &mut dyn LlmClient,
        question: &str,
        sql: &str,
        max_attempts: usize,
    ) -> Result<String> {
        self.ensure_database()?;

        let schema_text = format_schema(self.schema, FormatType::Code, None)?;
        let mut chat: Vec<ChatMessage> = Vec::new();
        let mut current = sql.to_string();
        let mut last_executable = None;

        for attempt in 0..max_attempts {
            let results = match execute_on_path(self.database_path.clone(), current.clone()).await {
                Ok(result) => {
                    last_executable = Some(current.clone());
                    preview(&result)
                }
                Err(e) => {
                    debug!("Chat round {} failed to execute: {}", attempt, e);
                    e.to_string()
                }
            };

            let prompt = self.prompt(&schema_text, question, &current, &results)?;
            chat.push(ChatMessage::user(prompt.clone()));
            match client.execute_chat(&chat).await {
                Ok(reply) => {
                    let revised = complete_sql(&reply, &prompt);
                    chat.push(ChatMessage::model(reply));
                    if !revised.is_empty() {
                        current = revised;
                    }
                }
                Err(e) => {
                    warn!("Stopping chat refinement: {}", e);
                    chat.pop();
                    break;
                }
            }
        }

        if last_executable.as_deref() != Some(current.as_str())
            && execute_on_path(self.database_path.clone(), current.clone())
                .await
                .is_ok()
        {
            last_executable = Some(current.clone());
        }

        info!("Chat refinement finished after {} turn(s)", chat.len() / 2);
        Ok(last_executable.unwrap_or(current))
    }
}
