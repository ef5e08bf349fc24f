use std::sync::Arc;
use tracing::{info, warn};

use super::{
    AppContext, MultiCandidateRequest, MultiCandidateResponse, PromptRequest, PromptResponse,
    QueryRequest, QueryResponse, RefineMode, SqlRefiner,
};
use crate::error::{Result, Text2SqlError};
use crate::llm::metrics::UsageEstimate;
use crate::llm::response::complete_sql;
use crate::llm::LlmClient;
use crate::selection::{CandidateSelector, CandidateSql, Selection, SelectionRequest};

/// Request-level operations over an [`AppContext`].
#[derive(Clone)]
pub struct Text2SqlService {
    ctx: Arc<AppContext>,
}

impl Text2SqlService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub async fn generate_prompt(&self, req: &PromptRequest) -> Result<PromptResponse> {
        let database_name = self.ctx.resolve_database(req.database_name.as_deref()).await?;
        let schema = self.ctx.schemas.load(&database_name).await?;
        let prompt = self.ctx.prompts.compose(&schema, &req.prompt_spec()).await?;
        Ok(PromptResponse {
            database_name,
            prompt,
        })
    }

    pub async fn generate_and_execute(&self, req: &QueryRequest) -> Result<QueryResponse> {
        let mut client = self.ctx.create_client(&req.llm)?;
        self.generate_and_execute_with(client.as_mut(), req).await
    }

    /// [`Self::generate_and_execute`] with a caller-owned client.
    ///
    /// Execution failures do not fail the request: the prompt and query are
    /// returned with the error message.
    pub async fn generate_and_execute_with(
        &self,
        client: &mut dyn LlmClient,
        req: &QueryRequest,
    ) -> Result<QueryResponse> {
        let PromptResponse {
            database_name,
            prompt,
        } = self.generate_prompt(&req.prompt).await?;

        let reply = client.execute_prompt(&prompt).await?;
        let usage = UsageEstimate::for_prompt(client.config(), &prompt, &reply);
        let mut query = complete_sql(&reply, &prompt);

        if req.refine_attempts > 0 {
            query = self
                .refine(
                    client,
                    &database_name,
                    &req.prompt,
                    &query,
                    req.refine_attempts,
                    req.refine_mode,
                )
                .await?;
        }

        let (execution_result, error) = match self.ctx.execute(&database_name, &query).await {
            Ok(result) => {
                info!("Generated query returned {} rows", result.row_count());
                (Some(result), None)
            }
            Err(e) => {
                warn!("Generated query failed on {}: {}", database_name, e);
                (None, Some(e.to_string()))
            }
        };

        Ok(QueryResponse {
            prompt,
            query,
            execution_result,
            error,
            usage,
        })
    }

    pub async fn refine(
        &self,
        client: &mut dyn LlmClient,
        database_name: &str,
        req: &PromptRequest,
        sql: &str,
        max_attempts: usize,
        mode: RefineMode,
    ) -> Result<String> {
        let schema = self.ctx.schemas.load(database_name).await?;
        let examples = self.ctx.prompts.resolve_examples(&req.prompt_spec()).await?;

        let refiner = SqlRefiner::new(
            self.ctx.prompts.templates(),
            &schema,
            self.ctx.database_path(database_name)?,
        )
        .with_examples(examples)
        .with_evidence(req.evidence.clone());

        match mode {
            RefineMode::Prompt => refiner.improve(client, &req.question, sql, max_attempts).await,
            RefineMode::Chat => {
                refiner
                    .improve_chat(client, &req.question, sql, max_attempts)
                    .await
            }
        }
    }

    /// Generates one candidate per generator, one after another, then selects.
    pub async fn multi_candidate(&self, req: &MultiCandidateRequest) -> Result<MultiCandidateResponse> {
        if req.generators.is_empty() {
            return Err(Text2SqlError::InvalidInput(
                "at least one generator is required".to_string(),
            ));
        }

        let database_name = self.ctx.resolve_database(req.base.database_name.as_deref()).await?;
        let schema = self.ctx.schemas.load(&database_name).await?;

        let mut candidates = Vec::with_capacity(req.generators.len());
        let mut last_error = None;

        for generator in &req.generators {
            let mut prompt_req = req.base.clone();
            if let Some(prompt_type) = generator.prompt_type {
                prompt_req.prompt_type = prompt_type;
            }
            if let Some(shots) = generator.shots {
                prompt_req.shots = shots;
            }
            let config_id = generator.config_id(&req.base);
            let prompt = self.ctx.prompts.compose(&schema, &prompt_req.prompt_spec()).await?;

            let reply = match self.ctx.create_client(&generator.llm) {
                Ok(mut client) => client.execute_prompt(&prompt).await,
                Err(e) => Err(e),
            };
            match reply {
                Ok(reply) => candidates.push(CandidateSql::new(complete_sql(&reply, &prompt), config_id)),
                Err(e) => {
                    warn!("Generator {} produced no candidate: {}", config_id, e);
                    last_error = Some(e);
                }
            }
        }

        if candidates.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                Text2SqlError::Internal("no candidate could be generated".to_string())
            }));
        }

        let mut selector = self.ctx.create_client(&req.selector)?;
        self.select_candidates(selector.as_mut(), &database_name, &req.base, candidates)
            .await
    }

    /// Runs the selection engine; falls back to the first candidate when the
    /// selector reply names none.
    pub async fn select_candidates(
        &self,
        selector: &mut dyn LlmClient,
        database_name: &str,
        base: &PromptRequest,
        candidates: Vec<CandidateSql>,
    ) -> Result<MultiCandidateResponse> {
        let schema = self.ctx.schemas.load(database_name).await?;
        let request = SelectionRequest {
            question: &base.question,
            evidence: base.evidence.as_deref(),
            schema: &schema,
            selection: base.pruned_schema.as_ref(),
            database_path: self.ctx.database_path(database_name)?,
        };

        let chosen = CandidateSelector::new(self.ctx.prompts.templates())
            .select(selector, &request, &candidates)
            .await?;

        let (selection, fallback) = match chosen {
            Some(selection) => (selection, false),
            None => {
                let first = candidates.first().ok_or_else(|| {
                    Text2SqlError::InvalidInput("at least one candidate is required".to_string())
                })?;
                (
                    Selection {
                        sql: first.sql.clone(),
                        config_id: first.config_id.clone(),
                    },
                    true,
                )
            }
        };

        Ok(MultiCandidateResponse {
            query: selection.sql,
            config_id: selection.config_id,
            candidates,
            fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeys, AppConfig, DatasetType};
    use crate::llm::mock::ScriptedClient;
    use crate::llm::models::{LlmConfig, LlmType};
    use crate::prompts::PromptType;
    use crate::retriever::FileExemplarRetriever;
    use rusqlite::Connection;
    use std::path::Path;

    fn service(root: &Path) -> Text2SqlService {
        std::fs::create_dir_all(root.join("databases")).unwrap();
        let conn = Connection::open(root.join("databases").join("hotels.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE hotel (hotelno INTEGER PRIMARY KEY, hotelname TEXT, city TEXT);
             INSERT INTO hotel VALUES (1, 'Grosvenor', 'London'), (2, 'Watergate', 'Paris');",
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.dataset.data_root = root.display().to_string();
        config.dataset.dataset_type = DatasetType::Synthetic;

        let ctx = AppContext::with_retriever(
            config,
            ApiKeys::default(),
            Arc::new(FileExemplarRetriever::new(Vec::new())),
        )
        .unwrap();
        Text2SqlService::new(Arc::new(ctx))
    }

    fn prompt_request(question: &str) -> PromptRequest {
        PromptRequest {
            prompt_type: PromptType::Basic,
            shots: 0,
            question: question.into(),
            evidence: None,
            database_name: Some("hotels".into()),
            schema_format: None,
            pruned_schema: None,
            examples: None,
        }
    }

    fn query_request(question: &str) -> QueryRequest {
        QueryRequest {
            prompt: prompt_request(question),
            llm: LlmConfig::new(LlmType::OpenAi, "gpt-4o-mini-2024-07-18", 0.0, 128).unwrap(),
            refine_attempts: 0,
            refine_mode: RefineMode::Prompt,
        }
    }

    #[tokio::test]
    async fn test_generate_prompt_reads_schema_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let response = service.generate_prompt(&prompt_request("list hotels")).await.unwrap();
        assert_eq!(response.database_name, "hotels");
        assert!(response.prompt.starts_with("Table hotel, columns = [ hotelno, hotelname, city ]"));
    }

    #[tokio::test]
    async fn test_database_name_required_without_default() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut req = prompt_request("list hotels");
        req.database_name = None;
        let err = service.generate_prompt(&req).await.unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_generate_and_execute_completes_select() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut client = ScriptedClient::new([" hotelname FROM hotel ORDER BY hotelno"]);

        let response = service
            .generate_and_execute_with(&mut client, &query_request("list hotels"))
            .await
            .unwrap();
        assert_eq!(response.query, "SELECT hotelname FROM hotel ORDER BY hotelno");
        let result = response.execution_result.unwrap();
        assert_eq!(result.columns, vec!["hotelname"]);
        assert_eq!(result.row_count(), 2);
        assert!(response.error.is_none());
        assert_eq!(response.usage.output_tokens, 11);
        assert!(response.usage.input_tokens > 10);
        assert!(response.usage.cost_usd.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_execution_error_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut client = ScriptedClient::new(["SELECT * FROM guests"]);

        let response = service
            .generate_and_execute_with(&mut client, &query_request("list guests"))
            .await
            .unwrap();
        assert_eq!(response.query, "SELECT * FROM guests");
        assert!(response.execution_result.is_none());
        assert!(response.error.unwrap().contains("no such table: guests"));
        assert!(response.prompt.contains("list guests"));
    }

    #[tokio::test]
    async fn test_refinement_runs_after_generation() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut client = ScriptedClient::new(["SELECT * FROM guests", "SELECT city FROM hotel"]);
        let mut req = query_request("list cities");
        req.refine_attempts = 2;

        let response = service.generate_and_execute_with(&mut client, &req).await.unwrap();
        assert_eq!(response.query, "SELECT city FROM hotel");
        assert_eq!(response.execution_result.unwrap().row_count(), 2);
        assert_eq!(client.prompts.len(), 2);
    }

    #[tokio::test]
    async fn test_selection_falls_back_to_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut selector = ScriptedClient::new(["cannot decide"]);
        let candidates = vec![
            CandidateSql::new("SELECT city FROM hotel", "m1"),
            CandidateSql::new("SELECT hotelname FROM hotel", "m2"),
        ];

        let response = service
            .select_candidates(&mut selector, "hotels", &prompt_request("q"), candidates)
            .await
            .unwrap();
        assert!(response.fallback);
        assert_eq!(response.config_id, "m1");
        assert_eq!(response.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_multi_candidate_needs_generators() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let req = MultiCandidateRequest {
            base: prompt_request("q"),
            generators: Vec::new(),
            selector: LlmConfig::new(LlmType::OpenAi, "gpt-4o-2024-08-06", 0.0, 16).unwrap(),
        };
        let err = service.multi_candidate(&req).await.unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_chat_refinement_mode() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut client = ScriptedClient::new([
            "SELECT * FROM guests",
            "SELECT city FROM hotel",
            "SELECT city FROM hotel ORDER BY city",
        ]);
        let mut req = query_request("list cities");
        req.refine_attempts = 2;
        req.refine_mode = RefineMode::Chat;

        let response = service.generate_and_execute_with(&mut client, &req).await.unwrap();
        assert_eq!(response.query, "SELECT city FROM hotel ORDER BY city");
        assert_eq!(response.execution_result.unwrap().row_count(), 2);
        // Generation is a plain prompt; both refinement rounds share one chat
        assert_eq!(client.chats.len(), 2);
        assert_eq!(client.chats[1].len(), 3);
    }
}
