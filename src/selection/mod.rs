use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db::db_pool::open_read_only;
use crate::db::execution::{execute_query, QueryResult};
use crate::error::{Result, Text2SqlError};
use crate::llm::LlmClient;
use crate::prompts::PromptTemplates;
use crate::schema::{format_schema, FormatType, Schema, SchemaSelection};

pub const SAMPLE_ROWS: usize = 10;
const MAX_LETTERS: usize = 26;

/// A generated query tagged with the configuration that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSql {
    pub sql: String,
    pub config_id: String,
}

impl CandidateSql {
    pub fn new(sql: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            config_id: config_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(QueryResult),
    Error(String),
}

impl ExecutionOutcome {
    fn as_text(&self) -> String {
        match self {
            ExecutionOutcome::Rows(result) => result.rows_as_text(),
            ExecutionOutcome::Error(message) => message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub sql: String,
    pub config_id: String,
    pub outcome: ExecutionOutcome,
}

impl Candidate {
    /// MD5 of the textual result or error; equal hashes mean equivalent candidates.
    pub fn result_hash(&self) -> String {
        format!("{:x}", md5::compute(self.outcome.as_text()))
    }
}

/// Candidates grouped by result hash, in order of first appearance.
pub fn group_by_result(candidates: Vec<Candidate>) -> Vec<Vec<Candidate>> {
    let mut hashes: Vec<String> = Vec::new();
    let mut groups: Vec<Vec<Candidate>> = Vec::new();

    for candidate in candidates {
        let hash = candidate.result_hash();
        match hashes.iter().position(|h| *h == hash) {
            Some(idx) => groups[idx].push(candidate),
            None => {
                hashes.push(hash);
                groups.push(vec![candidate]);
            }
        }
    }
    groups
}

/// Runs every candidate on one read-only connection. Failures become outcomes, not errors.
pub fn execute_candidates(db_path: &Path, candidates: &[CandidateSql]) -> Result<Vec<Candidate>> {
    let conn = open_read_only(db_path)?;

    Ok(candidates
        .iter()
        .map(|c| {
            let outcome = match execute_query(&conn, &c.sql) {
                Ok(result) => ExecutionOutcome::Rows(result),
                Err(e) => ExecutionOutcome::Error(e.to_string()),
            };
            debug!(
                "Candidate from {} executed: {}",
                c.config_id,
                match &outcome {
                    ExecutionOutcome::Rows(r) => format!("{} rows", r.row_count()),
                    ExecutionOutcome::Error(e) => e.clone(),
                }
            );
            Candidate {
                sql: c.sql.clone(),
                config_id: c.config_id.clone(),
                outcome,
            }
        })
        .collect())
}

pub fn candidate_letter(idx: usize) -> char {
    char::from(b'A' + (idx % MAX_LETTERS) as u8)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Markdown table over a random sample of at most `limit` rows.
pub fn sample_markdown_table<R: Rng + ?Sized>(
    result: &QueryResult,
    limit: usize,
    rng: &mut R,
) -> String {
    if result.rows.is_empty() {
        return "No rows returned.".to_string();
    }

    let mut table = format!("| {} |\n", result.columns.join(" | "));
    table.push_str(&format!(
        "| {} |\n",
        vec!["---"; result.columns.len()].join(" | ")
    ));
    for row in result.rows.choose_multiple(rng, limit) {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        table.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    table
}

/// Index of the last valid candidate letter in the reply.
pub fn parse_selector_reply(reply: &str, candidate_count: usize) -> Option<usize> {
    reply.chars().rev().find_map(|c| {
        let idx = (c as usize).checked_sub('A' as usize)?;
        (c.is_ascii_uppercase() && idx < candidate_count).then_some(idx)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub sql: String,
    pub config_id: String,
}

impl From<&Candidate> for Selection {
    fn from(c: &Candidate) -> Self {
        Self {
            sql: c.sql.clone(),
            config_id: c.config_id.clone(),
        }
    }
}

/// Context shared by every candidate of one question.
pub struct SelectionRequest<'a> {
    pub question: &'a str,
    pub evidence: Option<&'a str>,
    pub schema: &'a Schema,
    pub selection: Option<&'a SchemaSelection>,
    pub database_path: PathBuf,
}

#[derive(Serialize)]
struct PromptCandidate {
    letter: String,
    sql: String,
    result: String,
}

/// Execution-based dedup followed by an LLM tie-break.
pub struct CandidateSelector<'a> {
    templates: &'a PromptTemplates,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(templates: &'a PromptTemplates) -> Self {
        Self { templates }
    }

    pub fn build_prompt(
        &self,
        request: &SelectionRequest<'_>,
        representatives: &[Candidate],
    ) -> Result<String> {
        let schema = format_schema(request.schema, FormatType::MSchema, request.selection)?;
        let mut rng = rand::thread_rng();

        let candidates: Vec<PromptCandidate> = representatives
            .iter()
            .enumerate()
            .map(|(idx, c)| PromptCandidate {
                letter: candidate_letter(idx).to_string(),
                sql: c.sql.clone(),
                result: match &c.outcome {
                    ExecutionOutcome::Rows(result) => {
                        sample_markdown_table(result, SAMPLE_ROWS, &mut rng)
                    }
                    ExecutionOutcome::Error(message) => message.clone(),
                },
            })
            .collect();

        self.templates.render(
            "candidate_selection",
            minijinja::context! {
                schema => schema,
                question => request.question,
                evidence => request.evidence.filter(|e| !e.trim().is_empty()),
                candidates => candidates,
            },
        )
    }

    /// Picks one candidate, or `None` when the selector reply names no valid letter.
    pub async fn select(
        &self,
        client: &mut dyn LlmClient,
        request: &SelectionRequest<'_>,
        candidates: &[CandidateSql],
    ) -> Result<Option<Selection>> {
        if candidates.is_empty() {
            return Err(Text2SqlError::InvalidInput(
                "at least one candidate is required".to_string(),
            ));
        }

        let db_path = request.database_path.clone();
        let owned = candidates.to_vec();
        let executed =
            tokio::task::spawn_blocking(move || execute_candidates(&db_path, &owned)).await??;

        let mut representatives: Vec<Candidate> = group_by_result(executed)
            .into_iter()
            .filter_map(|group| group.into_iter().next())
            .collect();
        info!(
            "{} candidates collapsed to {} distinct results",
            candidates.len(),
            representatives.len()
        );

        if representatives.len() == 1 {
            return Ok(representatives.first().map(Selection::from));
        }
        if representatives.len() > MAX_LETTERS {
            warn!("Only the first {} distinct candidates are offered to the selector", MAX_LETTERS);
            representatives.truncate(MAX_LETTERS);
        }

        let prompt = self.build_prompt(request, &representatives)?;
        let reply = client.execute_prompt(&prompt).await?;

        match parse_selector_reply(&reply, representatives.len()) {
            Some(idx) => {
                let chosen = Selection::from(&representatives[idx]);
                info!("Selector chose {} ({})", candidate_letter(idx), chosen.config_id);
                Ok(Some(chosen))
            }
            None => {
                warn!("Selector reply contained no valid candidate letter: {}", reply.trim());
                Ok(None)
            }
        }
    }
}
