#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    Json, Router,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use text2sql_harness::config::{ApiKeys, AppConfig, DatasetType};
use text2sql_harness::llm::models::LlmType;
use text2sql_harness::pipeline::AppContext;
use text2sql_harness::retriever::FileExemplarRetriever;

/// One request as seen by a [`MockProvider`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub query: Option<String>,
    pub bearer: Option<String>,
    pub api_key: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    replies: Mutex<VecDeque<(StatusCode, Value)>>,
    seen: Mutex<Vec<SeenRequest>>,
}

/// Scripted HTTP endpoint standing in for a provider or exemplar service.
///
/// Every POST pops the next reply; once the script runs out it answers 500.
pub struct MockProvider {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockProvider {
    pub async fn start(replies: Vec<(StatusCode, Value)>) -> Self {
        let state = Arc::new(MockState {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        });
        let app = Router::new().fallback(record).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.state.seen.lock().unwrap().clone()
    }
}

async fn record(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.seen.lock().unwrap().push(SeenRequest {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        bearer: header("authorization").map(|v| v.trim_start_matches("Bearer ").to_string()),
        api_key: header("x-api-key"),
        body,
    });

    let (status, reply) = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "script exhausted"})));
    (status, Json(reply))
}

pub fn openai_reply(content: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}),
    )
}

pub fn anthropic_reply(text: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({"content": [{"type": "text", "text": text}]}),
    )
}

pub fn google_reply(text: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]}),
    )
}

pub fn rate_limited() -> (StatusCode, Value) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        json!({"error": {"message": "Rate limit reached"}}),
    )
}

/// Writes `<root>/databases/hotels.db` in the synthetic dataset layout.
pub fn hotels_db(root: &Path) {
    std::fs::create_dir_all(root.join("databases")).unwrap();
    let conn = Connection::open(root.join("databases").join("hotels.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE hotel (hotelno INTEGER PRIMARY KEY, hotelname TEXT, city TEXT);
         CREATE TABLE room (
             roomno INTEGER,
             hotelno INTEGER,
             price REAL,
             PRIMARY KEY (roomno, hotelno),
             FOREIGN KEY (hotelno) REFERENCES hotel (hotelno)
         );
         INSERT INTO hotel VALUES (1, 'Grosvenor', 'London'), (2, 'Watergate', 'Paris');
         INSERT INTO room VALUES (1, 1, 40.0), (2, 1, 55.5), (1, 2, 80.0);",
    )
    .unwrap();
}

/// Synthetic-dataset config rooted at `root` with instant backoff.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.dataset.data_root = root.display().to_string();
    config.dataset.dataset_type = DatasetType::Synthetic;
    config.llm.backoff_seconds = 0;
    config.llm.request_timeout_seconds = 5;
    config
}

pub fn keys(llm_type: LlmType, keys: &[&str]) -> ApiKeys {
    ApiKeys::default().with_keys(llm_type, keys.iter().map(|k| k.to_string()).collect())
}

pub fn context(config: AppConfig, api_keys: ApiKeys) -> Arc<AppContext> {
    Arc::new(
        AppContext::with_retriever(
            config,
            api_keys,
            Arc::new(FileExemplarRetriever::new(Vec::new())),
        )
        .unwrap(),
    )
}
