use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, Text2SqlError};
use crate::llm::models::LlmType;

/// On-disk dataset layouts the harness knows how to read.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    BirdTrain,
    BirdDev,
    Synthetic,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::BirdTrain => "bird_train",
            DatasetType::BirdDev => "bird_dev",
            DatasetType::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = Text2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bird_train" => Ok(DatasetType::BirdTrain),
            "bird_dev" => Ok(DatasetType::BirdDev),
            "synthetic" => Ok(DatasetType::Synthetic),
            other => Err(Text2SqlError::Config(format!("Unknown dataset type: {}", other))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub data_root: String,
    pub dataset_type: DatasetType,
    pub sample_dataset_type: DatasetType,
    pub default_database: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    /// Distinct sample values kept per column.
    pub sample_values: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    pub backoff_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Full-ring backoff sleeps tolerated within one call before `QuotaExceeded`.
    /// Unset means retry forever.
    pub max_backoff_cycles: Option<u64>,
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub google_base_url: Option<String>,
    pub deepseek_base_url: Option<String>,
    pub dashscope_base_url: Option<String>,
}

impl LlmSettings {
    pub fn base_url_override(&self, llm_type: LlmType) -> Option<&str> {
        match llm_type {
            LlmType::OpenAi => self.openai_base_url.as_deref(),
            LlmType::Anthropic => self.anthropic_base_url.as_deref(),
            LlmType::GoogleAi => self.google_base_url.as_deref(),
            LlmType::DeepSeek => self.deepseek_base_url.as_deref(),
            LlmType::DashScope => self.dashscope_base_url.as_deref(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backoff_seconds: 5,
            request_timeout_seconds: 60,
            max_backoff_cycles: None,
            openai_base_url: None,
            anthropic_base_url: None,
            google_base_url: None,
            deepseek_base_url: None,
            dashscope_base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrieverConfig {
    pub backend: String, // "http" or "file"
    pub url: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvalSettings {
    /// Budget for running one predicted/gold query pair
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub schema: SchemaConfig,
    pub llm: LlmSettings,
    pub retriever: RetrieverConfig,
    pub web: WebConfig,
    pub eval: EvalSettings,
    pub log_format: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Root directory holding the datasets
    #[arg(long)]
    pub data_root: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Compose a prompt and print it
    Prompt {
        #[arg(long)]
        database: String,
        #[arg(long, default_value = "basic")]
        prompt_type: String,
        #[arg(long)]
        question: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        shots: i64,
        #[arg(long)]
        evidence: Option<String>,
        #[arg(long)]
        format: Option<String>,
    },
    /// Render a database schema
    Schema {
        #[arg(long)]
        database: String,
        #[arg(long, default_value = "m_schema")]
        format: String,
    },
    /// Score predicted SQL against gold SQL by execution accuracy
    Eval {
        /// JSON array or JSON lines of evaluation items
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Write the scored items here as JSON
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Generate SQL for items without a prediction using this provider
        #[arg(long, requires = "model")]
        llm_type: Option<String>,
        #[arg(long, requires = "llm_type")]
        model: Option<String>,
        #[arg(long, default_value = "basic")]
        prompt_type: String,
        #[arg(long, default_value_t = 0)]
        shots: i64,
        #[arg(long, default_value_t = 0.0)]
        temperature: f32,
        #[arg(long, default_value_t = 512)]
        max_tokens: u32,
        /// Revision rounds after each generation
        #[arg(long, default_value_t = 0)]
        refine_attempts: usize,
    },
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> std::result::Result<Self, ConfigError> {
        // Start with default configuration
        let mut config_builder = Config::builder()
            .set_default("dataset.data_root", "data")?
            .set_default("dataset.dataset_type", "bird_dev")?
            .set_default("dataset.sample_dataset_type", "bird_dev")?
            .set_default("schema.sample_values", 3_i64)?
            .set_default("llm.backoff_seconds", 5_i64)?
            .set_default("llm.request_timeout_seconds", 60_i64)?
            .set_default("retriever.backend", "file")?
            .set_default("web.host", "127.0.0.1")?
            .set_default("web.port", 8000_i64)?
            .set_default("eval.timeout_seconds", 30_i64)?
            .set_default("log_format", "pretty")?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/text2sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("TEXT2SQL")
                .separator("__")
                .try_parsing(true),
        );

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        config
            .apply_dataset_env(|key| std::env::var(key).ok())
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_root) = &args.data_root {
            config.dataset.data_root = data_root.clone();
        }

        Ok(config)
    }

    /// `DATASET_TYPE` / `SAMPLE_DATASET_TYPE` win over file and prefixed env settings.
    pub fn apply_dataset_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tag) = lookup("DATASET_TYPE").filter(|v| !v.trim().is_empty()) {
            self.dataset.dataset_type = tag.parse()?;
        }
        if let Some(tag) = lookup("SAMPLE_DATASET_TYPE").filter(|v| !v.trim().is_empty()) {
            self.dataset.sample_dataset_type = tag.parse()?;
        }
        Ok(())
    }

    pub fn path_config(&self) -> PathConfig {
        PathConfig::new(PathBuf::from(&self.dataset.data_root), self.dataset.dataset_type)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig {
                data_root: "data".to_string(),
                dataset_type: DatasetType::BirdDev,
                sample_dataset_type: DatasetType::BirdDev,
                default_database: None,
            },
            schema: SchemaConfig { sample_values: 3 },
            llm: LlmSettings::default(),
            retriever: RetrieverConfig {
                backend: "file".to_string(),
                url: None,
                path: None,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            eval: EvalSettings { timeout_seconds: 30 },
            log_format: "pretty".to_string(),
        }
    }
}

/// Environment variables holding whitespace-separated key lists, per provider.
pub const API_KEY_VARS: [(LlmType, &str); 5] = [
    (LlmType::OpenAi, "OPENAI_API_KEYS"),
    (LlmType::Anthropic, "ANTHROPIC_API_KEYS"),
    (LlmType::GoogleAi, "GOOGLE_AI_API_KEYS"),
    (LlmType::DeepSeek, "DEEPSEEK_API_KEYS"),
    (LlmType::DashScope, "DASHSCOPE_API_KEYS"),
];

/// Provider key pools loaded at start-up.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<LlmType, Vec<String>>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut keys = HashMap::new();
        for (llm_type, var) in API_KEY_VARS {
            let list: Vec<String> = lookup(var)
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            keys.insert(llm_type, list);
        }
        Self { keys }
    }

    pub fn with_keys(mut self, llm_type: LlmType, keys: Vec<String>) -> Self {
        self.keys.insert(llm_type, keys);
        self
    }

    /// Non-empty key list for a provider.
    pub fn for_provider(&self, llm_type: LlmType) -> Result<Vec<String>> {
        match self.keys.get(&llm_type) {
            Some(list) if !list.is_empty() => Ok(list.clone()),
            _ => {
                let var = API_KEY_VARS
                    .iter()
                    .find(|(t, _)| *t == llm_type)
                    .map(|(_, v)| *v)
                    .unwrap_or("API_KEYS");
                Err(Text2SqlError::Config(format!(
                    "API key not found. Please set the {} environment variable.",
                    var
                )))
            }
        }
    }
}

/// Resolves where each dataset keeps its databases and description sidecars.
#[derive(Debug, Clone)]
pub struct PathConfig {
    data_root: PathBuf,
    dataset_type: DatasetType,
}

impl PathConfig {
    pub fn new(data_root: PathBuf, dataset_type: DatasetType) -> Self {
        Self {
            data_root,
            dataset_type,
        }
    }

    pub fn dataset_type(&self) -> DatasetType {
        self.dataset_type
    }

    pub fn base_dir(&self) -> PathBuf {
        match self.dataset_type {
            DatasetType::BirdTrain => self.data_root.join("bird").join("train"),
            DatasetType::BirdDev => self.data_root.join("bird").join("dev"),
            DatasetType::Synthetic => self.data_root.clone(),
        }
    }

    pub fn dataset_dir(&self) -> PathBuf {
        match self.dataset_type {
            DatasetType::BirdTrain => self.base_dir().join("train_databases"),
            DatasetType::BirdDev => self.base_dir().join("dev_databases"),
            DatasetType::Synthetic => self.base_dir().join("databases"),
        }
    }

    pub fn database_dir(&self, database_name: &str) -> PathBuf {
        match self.dataset_type {
            DatasetType::BirdTrain | DatasetType::BirdDev => self.dataset_dir().join(database_name),
            DatasetType::Synthetic => self.dataset_dir(),
        }
    }

    pub fn sqlite_path(&self, database_name: &str) -> PathBuf {
        match self.dataset_type {
            DatasetType::BirdTrain | DatasetType::BirdDev => self
                .database_dir(database_name)
                .join(format!("{}.sqlite", database_name)),
            DatasetType::Synthetic => self
                .database_dir(database_name)
                .join(format!("{}.db", database_name)),
        }
    }

    /// Database names are single path components; anything that could climb
    /// out of the dataset directory is rejected before a path is built.
    pub fn validate_database_name(database_name: &str) -> Result<()> {
        let invalid = database_name.is_empty()
            || database_name.starts_with('.')
            || database_name.contains(['/', '\\', '\0'])
            || Path::new(database_name).is_absolute();
        if invalid {
            return Err(Text2SqlError::InvalidInput(format!(
                "invalid database name: {:?}",
                database_name
            )));
        }
        Ok(())
    }

    /// [`PathConfig::sqlite_path`] for a name that has passed validation.
    pub fn checked_sqlite_path(&self, database_name: &str) -> Result<PathBuf> {
        Self::validate_database_name(database_name)?;
        Ok(self.sqlite_path(database_name))
    }

    pub fn description_dir(&self, database_name: &str) -> Option<PathBuf> {
        match self.dataset_type {
            DatasetType::BirdTrain | DatasetType::BirdDev => {
                Some(self.database_dir(database_name).join("database_description"))
            }
            DatasetType::Synthetic => None,
        }
    }

    pub fn column_meaning_path(&self) -> Option<PathBuf> {
        match self.dataset_type {
            DatasetType::BirdTrain | DatasetType::BirdDev => {
                Some(self.base_dir().join("column_meaning.json"))
            }
            DatasetType::Synthetic => None,
        }
    }

    /// Databases present on disk for this dataset, sorted by name.
    pub fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dataset_dir())
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter_map(|entry| {
                        let path = entry.path();
                        match self.dataset_type {
                            DatasetType::BirdTrain | DatasetType::BirdDev => {
                                let name = path.file_name()?.to_str()?.to_string();
                                if path.is_dir() && self.sqlite_path(&name).exists() {
                                    Some(name)
                                } else {
                                    None
                                }
                            }
                            DatasetType::Synthetic => {
                                if path.extension().and_then(|e| e.to_str()) == Some("db") {
                                    path.file_stem()?.to_str().map(str::to_string)
                                } else {
                                    None
                                }
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
