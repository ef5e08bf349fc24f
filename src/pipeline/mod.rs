pub mod refine;
pub mod service;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{ApiKeys, AppConfig, PathConfig};
use crate::db::db_pool::DatabasePools;
use crate::db::execution::{execute_query, QueryResult};
use crate::db::schema_manager::SchemaManager;
use crate::error::{Result, Text2SqlError};
use crate::llm::metrics::UsageEstimate;
use crate::llm::models::LlmConfig;
use crate::llm::{ClientFactory, LlmClient};
use crate::prompts::{PromptFactory, PromptSpec, PromptType};
use crate::retriever::{build_retriever, Exemplar, ExemplarRetriever};
use crate::schema::{FormatType, SchemaSelection};
use crate::selection::CandidateSql;

pub use refine::SqlRefiner;
pub use service::Text2SqlService;

const POOL_SIZE: u32 = 4;

/// Process-wide state, built once at start-up and shared by `Arc`.
pub struct AppContext {
    pub config: AppConfig,
    pub api_keys: ApiKeys,
    pub schemas: SchemaManager,
    pub prompts: PromptFactory,
    pub pools: DatabasePools,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppContext {
    pub fn new(config: AppConfig, api_keys: ApiKeys) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.request_timeout_seconds);
        let retriever = build_retriever(&config.retriever, timeout)?;
        Self::with_retriever(config, api_keys, retriever)
    }

    pub fn with_retriever(
        config: AppConfig,
        api_keys: ApiKeys,
        retriever: Arc<dyn ExemplarRetriever>,
    ) -> Result<Self> {
        let paths = config.path_config();
        info!(
            "Dataset {} at {}",
            paths.dataset_type(),
            paths.dataset_dir().display()
        );

        Ok(Self {
            schemas: SchemaManager::new(paths, config.schema.sample_values),
            prompts: PromptFactory::new(retriever)?,
            pools: DatabasePools::new(POOL_SIZE),
            started_at: chrono::Utc::now(),
            config,
            api_keys,
        })
    }

    pub fn create_client(&self, llm: &LlmConfig) -> Result<Box<dyn LlmClient>> {
        ClientFactory::create(llm, &self.api_keys, &self.config.llm)
    }

    pub fn database_path(&self, database_name: &str) -> Result<PathBuf> {
        self.schemas.database_path(database_name)
    }

    /// Explicit name, then the active database, then the configured default.
    pub async fn resolve_database(&self, requested: Option<&str>) -> Result<String> {
        if let Some(name) = requested.map(str::trim).filter(|n| !n.is_empty()) {
            PathConfig::validate_database_name(name)?;
            return Ok(name.to_string());
        }
        if let Some(active) = self.schemas.active_database().await {
            return Ok(active);
        }
        self.config
            .dataset
            .default_database
            .clone()
            .ok_or_else(|| Text2SqlError::InvalidInput("database_name is required".to_string()))
    }

    /// Runs a generated query on the pooled read-only connections of `database_name`.
    pub async fn execute(&self, database_name: &str, sql: &str) -> Result<QueryResult> {
        let pool = self.pools.get(&self.database_path(database_name)?)?;
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            execute_query(&conn, &sql)
        })
        .await?
    }
}

/// Prompt half of a request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt_type: PromptType,
    #[serde(default)]
    pub shots: i64,
    pub question: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema_format: Option<FormatType>,
    #[serde(default)]
    pub pruned_schema: Option<SchemaSelection>,
    #[serde(default)]
    pub examples: Option<Vec<Exemplar>>,
}

impl PromptRequest {
    pub fn prompt_spec(&self) -> PromptSpec {
        PromptSpec {
            prompt_type: self.prompt_type,
            target_question: self.question.clone(),
            evidence: self.evidence.clone(),
            shots: self.shots,
            schema_format: self.schema_format,
            examples: self.examples.clone(),
            selection: self.pruned_schema.clone(),
        }
    }
}

/// Full request record: prompt inputs plus the generating model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(flatten)]
    pub prompt: PromptRequest,
    #[serde(flatten)]
    pub llm: LlmConfig,
    /// Revision rounds run after generation; zero disables refinement.
    #[serde(default)]
    pub refine_attempts: usize,
    #[serde(default)]
    pub refine_mode: RefineMode,
}

/// How revision rounds talk to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineMode {
    /// One standalone prompt per round
    #[default]
    Prompt,
    /// One conversation across all rounds
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub database_name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub prompt: String,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Estimate for the generation call only
    pub usage: UsageEstimate,
}

/// One generator in a multi-candidate run. Prompt settings fall back to the base request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(flatten)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompt_type: Option<PromptType>,
    #[serde(default)]
    pub shots: Option<i64>,
}

impl GeneratorConfig {
    /// Identifier attached to this generator's candidate.
    pub fn config_id(&self, base: &PromptRequest) -> String {
        format!(
            "{}:{}:{}",
            self.llm.config_id(),
            self.prompt_type.unwrap_or(base.prompt_type),
            self.shots.unwrap_or(base.shots)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCandidateRequest {
    #[serde(flatten)]
    pub base: PromptRequest,
    pub generators: Vec<GeneratorConfig>,
    pub selector: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCandidateResponse {
    pub query: String,
    pub config_id: String,
    pub candidates: Vec<CandidateSql>,
    /// True when the selector named no candidate and the first one was used.
    pub fallback: bool,
}
