//! Execution-accuracy scoring: a prediction counts as correct when it returns
//! the same set of rows as the gold query on the same database.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PathConfig;
use crate::db::db_pool::open_read_only;
use crate::db::execution::{execute_query, QueryResult};
use crate::error::{Result, Text2SqlError};
use crate::llm::models::LlmConfig;
use crate::llm::LlmClient;
use crate::pipeline::{PromptRequest, QueryRequest, RefineMode, Text2SqlService};
use crate::prompts::PromptType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Simple,
    Moderate,
    Challenging,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Simple,
        Difficulty::Moderate,
        Difficulty::Challenging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Simple => "simple",
            Difficulty::Moderate => "moderate",
            Difficulty::Challenging => "challenging",
        }
    }
}

/// One benchmark question. Field names follow the BIRD dev/train files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalItem {
    #[serde(default)]
    pub question_id: Option<u64>,
    pub db_id: String,
    pub question: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(alias = "SQL", alias = "gold")]
    pub gold_sql: String,
    #[serde(default, alias = "predicted")]
    pub predicted_sql: Option<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub question_id: Option<u64>,
    pub db_id: String,
    pub difficulty: Option<Difficulty>,
    pub predicted_sql: Option<String>,
    pub correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelScore {
    pub count: usize,
    pub correct: usize,
}

impl LevelScore {
    fn record(&mut self, correct: bool) {
        self.count += 1;
        if correct {
            self.correct += 1;
        }
    }

    /// Percentage of correct items, 0 when nothing was scored.
    pub fn accuracy(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.correct as f64 * 100.0 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub total: LevelScore,
    pub by_difficulty: BTreeMap<Difficulty, LevelScore>,
    pub by_database: BTreeMap<String, LevelScore>,
    pub outcomes: Vec<ItemOutcome>,
}

impl EvalReport {
    pub fn from_outcomes(outcomes: Vec<ItemOutcome>) -> Self {
        let mut report = EvalReport::default();
        for outcome in &outcomes {
            report.total.record(outcome.correct);
            if let Some(difficulty) = outcome.difficulty {
                report
                    .by_difficulty
                    .entry(difficulty)
                    .or_default()
                    .record(outcome.correct);
            }
            report
                .by_database
                .entry(outcome.db_id.clone())
                .or_default()
                .record(outcome.correct);
        }
        report.outcomes = outcomes;
        report
    }

    pub fn level(&self, difficulty: Difficulty) -> LevelScore {
        self.by_difficulty
            .get(&difficulty)
            .copied()
            .unwrap_or_default()
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<LevelScore> = Difficulty::ALL
            .iter()
            .map(|d| self.level(*d))
            .chain(std::iter::once(self.total))
            .collect();

        write!(f, "{:20}", "")?;
        for name in Difficulty::ALL.iter().map(|d| d.as_str()).chain(["total"]) {
            write!(f, " {:20}", name)?;
        }
        write!(f, "\n{:20}", "count")?;
        for level in &levels {
            write!(f, " {:<20}", level.count)?;
        }
        write!(f, "\n{:20}", "accuracy")?;
        for level in &levels {
            write!(f, " {:<20.2}", level.accuracy())?;
        }
        writeln!(f)
    }
}

/// Reads items from a JSON array or from JSON lines.
pub fn load_items(path: &Path) -> Result<Vec<EvalItem>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Text2SqlError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_items(&text)
}

pub fn parse_items(text: &str) -> Result<Vec<EvalItem>> {
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text)
            .map_err(|e| Text2SqlError::InvalidInput(format!("invalid evaluation items: {}", e)));
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                Text2SqlError::InvalidInput(format!("invalid evaluation item on line {}: {}", idx + 1, e))
            })
        })
        .collect()
}

/// Numbers compare by value, so `1` and `1.0` are the same cell.
fn cell_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn row_set(result: &QueryResult) -> HashSet<Vec<String>> {
    result
        .rows
        .iter()
        .map(|row| row.iter().map(cell_key).collect())
        .collect()
}

/// Rows are compared as sets: order, duplicates and column names are ignored.
pub fn results_match(predicted: &QueryResult, gold: &QueryResult) -> bool {
    row_set(predicted) == row_set(gold)
}

/// Scores predictions by running them next to the gold query.
pub struct Evaluator {
    paths: PathConfig,
    timeout: Duration,
}

impl Evaluator {
    pub fn new(paths: PathConfig, timeout: Duration) -> Self {
        Self { paths, timeout }
    }

    async fn run_pair(&self, path: PathBuf, predicted: String, gold: String) -> Result<bool> {
        let conn = open_read_only(&path)?;
        let interrupt = conn.get_interrupt_handle();

        let task = tokio::task::spawn_blocking(move || -> Result<bool> {
            let predicted = execute_query(&conn, &predicted)?;
            let gold = execute_query(&conn, &gold)?;
            Ok(results_match(&predicted, &gold))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                interrupt.interrupt();
                Err(Text2SqlError::DatabaseQuery(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Any failure, including a missing prediction, scores the item as wrong.
    pub async fn score_item(&self, index: usize, item: &EvalItem) -> ItemOutcome {
        let mut outcome = ItemOutcome {
            index,
            question_id: item.question_id,
            db_id: item.db_id.clone(),
            difficulty: item.difficulty,
            predicted_sql: item.predicted_sql.clone(),
            correct: false,
            error: None,
        };

        let Some(predicted) = item.predicted_sql.clone().filter(|s| !s.trim().is_empty()) else {
            outcome.error = Some("no predicted SQL".to_string());
            return outcome;
        };

        let result = match self.paths.checked_sqlite_path(&item.db_id) {
            Ok(path) => self.run_pair(path, predicted, item.gold_sql.clone()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(correct) => outcome.correct = correct,
            Err(e) => {
                debug!("Item {} on {} failed: {}", index, item.db_id, e);
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    pub async fn evaluate(&self, items: &[EvalItem]) -> EvalReport {
        info!("Evaluating {} items", items.len());
        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            outcomes.push(self.score_item(index, item).await);
        }

        let report = EvalReport::from_outcomes(outcomes);
        info!(
            "Execution accuracy {:.2}% ({}/{})",
            report.total.accuracy(),
            report.total.correct,
            report.total.count
        );
        report
    }
}

/// How predictions are produced for items that arrive without one.
#[derive(Debug, Clone)]
pub struct BatchGeneration {
    pub llm: LlmConfig,
    pub prompt_type: PromptType,
    pub shots: i64,
    pub refine_attempts: usize,
    pub refine_mode: RefineMode,
}

impl BatchGeneration {
    fn request(&self, item: &EvalItem) -> QueryRequest {
        QueryRequest {
            prompt: PromptRequest {
                prompt_type: self.prompt_type,
                shots: self.shots,
                question: item.question.clone(),
                evidence: item.evidence.clone(),
                database_name: Some(item.db_id.clone()),
                schema_format: None,
                pruned_schema: None,
                examples: None,
            },
            llm: self.llm.clone(),
            refine_attempts: self.refine_attempts,
            refine_mode: self.refine_mode,
        }
    }
}

/// Fills in `predicted_sql` item by item and returns how many were generated.
///
/// A failed generation leaves the item without a prediction. Running out of
/// quota stops the batch, since every later call would fail the same way.
pub async fn generate_predictions(
    service: &Text2SqlService,
    client: &mut dyn LlmClient,
    settings: &BatchGeneration,
    items: &mut [EvalItem],
) -> usize {
    let pending = items.iter().filter(|i| i.predicted_sql.is_none()).count();
    info!("Generating SQL for {} of {} items", pending, items.len());

    let mut generated = 0;
    for (index, item) in items.iter_mut().enumerate() {
        if item.predicted_sql.is_some() {
            continue;
        }
        match service
            .generate_and_execute_with(client, &settings.request(item))
            .await
        {
            Ok(response) => {
                item.predicted_sql = Some(response.query);
                generated += 1;
            }
            Err(e @ Text2SqlError::QuotaExceeded { .. }) => {
                warn!("Stopping generation at item {}: {}", index, e);
                break;
            }
            Err(e) => warn!("Generation failed for item {}: {}", index, e),
        }
    }
    generated
}
