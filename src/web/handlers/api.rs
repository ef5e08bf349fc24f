use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::pipeline::{
    MultiCandidateRequest, MultiCandidateResponse, PromptRequest, PromptResponse, QueryRequest,
    QueryResponse,
};
use crate::schema::{format_schema, FormatType};
use crate::web::error::ApiError;
use crate::web::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    pub database: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub database_name: String,
    pub format: FormatType,
    pub schema: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeDatabaseRequest {
    pub database_name: String,
}

// System status

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub dataset_type: String,
    pub active_database: Option<String>,
    pub databases: Vec<String>,
    pub cached_schemas: Vec<String>,
}

pub async fn generate_and_execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    let start_time = Instant::now();
    info!(
        "Generating {} query with {}",
        payload.prompt.prompt_type,
        payload.llm.config_id()
    );

    let response = state.service.generate_and_execute(&payload).await?;

    info!("Query generated in {}ms", start_time.elapsed().as_millis());
    Ok(Json(response))
}

pub async fn multi_candidate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MultiCandidateRequest>,
) -> ApiResult<MultiCandidateResponse> {
    info!(
        "Multi-candidate run with {} generators",
        payload.generators.len()
    );
    Ok(Json(state.service.multi_candidate(&payload).await?))
}

pub async fn generate_prompt(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PromptRequest>,
) -> ApiResult<PromptResponse> {
    Ok(Json(state.service.generate_prompt(&payload).await?))
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SchemaQuery>,
) -> ApiResult<SchemaResponse> {
    let ctx = state.context();
    let format = match params.format.as_deref() {
        Some(raw) => raw.parse::<FormatType>()?,
        None => FormatType::MSchema,
    };
    let database_name = ctx.resolve_database(params.database.as_deref()).await?;
    let schema = ctx.schemas.load(&database_name).await?;

    Ok(Json(SchemaResponse {
        schema: format_schema(&schema, format, None)?,
        database_name,
        format,
    }))
}

pub async fn change_database(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChangeDatabaseRequest>,
) -> ApiResult<SchemaResponse> {
    let ctx = state.context();
    let schema = ctx.schemas.switch_database(&payload.database_name).await?;
    ctx.pools.evict(&ctx.database_path(&payload.database_name)?);

    Ok(Json(SchemaResponse {
        schema: format_schema(&schema, FormatType::Code, None)?,
        database_name: payload.database_name,
        format: FormatType::Code,
    }))
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> ApiResult<SystemStatus> {
    let ctx = state.context();
    let uptime = chrono::Utc::now()
        .signed_duration_since(ctx.started_at)
        .num_seconds();

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        dataset_type: ctx.config.dataset.dataset_type.to_string(),
        active_database: ctx.schemas.active_database().await,
        databases: state.available_databases().await,
        cached_schemas: ctx.schemas.cached_databases().await,
    }))
}
