pub mod strategies;
pub mod templates;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, Text2SqlError};
use crate::retriever::{Exemplar, ExemplarRetriever};
use crate::schema::{format_schema, FormatType, Schema, SchemaSelection};
pub use strategies::{PromptContext, PromptStrategy};
pub use templates::PromptTemplates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    #[serde(alias = "BASIC")]
    Basic,
    #[serde(rename = "text", alias = "TEXT_REPRESENTATION")]
    TextRepresentation,
    #[serde(rename = "openai", alias = "OPENAI_DEMO")]
    OpenAiDemo,
    #[serde(rename = "code", alias = "CODE_REPRESENTATION")]
    CodeRepresentation,
    #[serde(alias = "ALPACA_SFT")]
    AlpacaSft,
    #[serde(alias = "FULL_INFORMATION")]
    FullInformation,
    #[serde(alias = "SQL_ONLY")]
    SqlOnly,
    #[serde(alias = "DAIL_SQL")]
    DailSql,
    #[serde(alias = "SEMANTIC_FULL_INFORMATION")]
    SemanticFullInformation,
    #[serde(alias = "ICL_XIYAN")]
    IclXiyan,
}

impl PromptType {
    pub const ALL: [PromptType; 10] = [
        PromptType::Basic,
        PromptType::TextRepresentation,
        PromptType::OpenAiDemo,
        PromptType::CodeRepresentation,
        PromptType::AlpacaSft,
        PromptType::FullInformation,
        PromptType::SqlOnly,
        PromptType::DailSql,
        PromptType::SemanticFullInformation,
        PromptType::IclXiyan,
    ];

    /// Tag used on the wire and as the template name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::Basic => "basic",
            PromptType::TextRepresentation => "text",
            PromptType::OpenAiDemo => "openai",
            PromptType::CodeRepresentation => "code",
            PromptType::AlpacaSft => "alpaca_sft",
            PromptType::FullInformation => "full_information",
            PromptType::SqlOnly => "sql_only",
            PromptType::DailSql => "dail_sql",
            PromptType::SemanticFullInformation => "semantic_full_information",
            PromptType::IclXiyan => "icl_xiyan",
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptType {
    type Err = Text2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        let wanted = match wanted.as_str() {
            "text_representation" => "text",
            "openai_demo" => "openai",
            "code_representation" => "code",
            other => other,
        };
        PromptType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| Text2SqlError::PromptTypeNotFound(s.to_string()))
    }
}

/// Inputs to [`PromptFactory::compose`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub prompt_type: PromptType,
    pub target_question: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub shots: i64,
    #[serde(default)]
    pub schema_format: Option<FormatType>,
    #[serde(default)]
    pub examples: Option<Vec<Exemplar>>,
    #[serde(default)]
    pub selection: Option<SchemaSelection>,
}

impl PromptSpec {
    pub fn new(prompt_type: PromptType, target_question: impl Into<String>) -> Self {
        Self {
            prompt_type,
            target_question: target_question.into(),
            evidence: None,
            shots: 0,
            schema_format: None,
            examples: None,
            selection: None,
        }
    }

    pub fn with_shots(mut self, shots: i64) -> Self {
        self.shots = shots;
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn with_format(mut self, format: FormatType) -> Self {
        self.schema_format = Some(format);
        self
    }

    pub fn with_examples(mut self, examples: Vec<Exemplar>) -> Self {
        self.examples = Some(examples);
        self
    }

    pub fn with_selection(mut self, selection: SchemaSelection) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// Dispatches a [`PromptSpec`] to its registered strategy.
pub struct PromptFactory {
    strategies: HashMap<PromptType, Box<dyn PromptStrategy>>,
    templates: PromptTemplates,
    retriever: Arc<dyn ExemplarRetriever>,
}

impl PromptFactory {
    pub fn new(retriever: Arc<dyn ExemplarRetriever>) -> Result<Self> {
        Ok(Self {
            strategies: strategies::registry(),
            templates: PromptTemplates::load()?,
            retriever,
        })
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    pub fn strategy(&self, prompt_type: PromptType) -> Result<&dyn PromptStrategy> {
        self.strategies
            .get(&prompt_type)
            .map(|s| s.as_ref())
            .ok_or_else(|| Text2SqlError::PromptTypeNotFound(prompt_type.to_string()))
    }

    /// Supplied exemplars win over the retriever; either way at most `shots` are kept.
    pub async fn resolve_examples(&self, spec: &PromptSpec) -> Result<Vec<Exemplar>> {
        let shots = usize::try_from(spec.shots).map_err(|_| Text2SqlError::NonNegativeShotsRequired)?;
        if shots == 0 {
            return Ok(Vec::new());
        }

        let mut examples = match &spec.examples {
            Some(supplied) if !supplied.is_empty() => supplied.clone(),
            _ => self.retriever.fetch(shots, &spec.target_question).await?,
        };

        if examples.is_empty() {
            return Err(Text2SqlError::NoExamplesProvided {
                prompt_type: spec.prompt_type.to_string(),
            });
        }
        if examples.len() < shots {
            debug!("Only {} of {} requested exemplars available", examples.len(), shots);
        }
        examples.truncate(shots);
        Ok(examples)
    }

    pub async fn compose(&self, schema: &Schema, spec: &PromptSpec) -> Result<String> {
        if spec.shots < 0 {
            return Err(Text2SqlError::NonNegativeShotsRequired);
        }
        let strategy = self.strategy(spec.prompt_type)?;

        let examples = if strategy.uses_examples() {
            self.resolve_examples(spec).await?
        } else {
            Vec::new()
        };

        let format = match spec.schema_format {
            Some(format) if strategy.accepts_format_override() => format,
            _ => strategy.default_format(),
        };
        let schema_text = format_schema(schema, format, spec.selection.as_ref())?;

        let ctx = PromptContext {
            schema: &schema_text,
            question: &spec.target_question,
            evidence: spec.evidence.as_deref().filter(|e| !e.trim().is_empty()),
            examples: &examples,
        };
        let prompt = strategy.compose(&self.templates, &ctx)?;

        info!(
            "Composed {} prompt for {} with {} examples ({} chars)",
            spec.prompt_type,
            schema.database_name,
            examples.len(),
            prompt.len()
        );
        Ok(prompt)
    }
}
