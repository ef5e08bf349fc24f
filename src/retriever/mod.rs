pub mod file;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrieverConfig;
use crate::error::{Result, Text2SqlError};

pub use file::FileExemplarRetriever;
pub use http::HttpExemplarRetriever;

/// A prior (question, SQL) pair shown to the model as a worked example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    pub question: String,
    #[serde(alias = "query", alias = "SQL", alias = "answer")]
    pub sql: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Source of similar exemplars. Results come back most-similar first and never
/// exceed `k`.
#[async_trait]
pub trait ExemplarRetriever: Send + Sync {
    async fn fetch(&self, k: usize, question: &str) -> Result<Vec<Exemplar>>;
}

pub fn build_retriever(
    config: &RetrieverConfig,
    timeout: Duration,
) -> Result<Arc<dyn ExemplarRetriever>> {
    match config.backend.as_str() {
        "http" => {
            let url = config.url.clone().ok_or_else(|| {
                Text2SqlError::Config("retriever.url is required for the http backend".to_string())
            })?;
            Ok(Arc::new(HttpExemplarRetriever::new(url, timeout)?))
        }
        "file" => match &config.path {
            Some(path) => Ok(Arc::new(FileExemplarRetriever::from_path(&PathBuf::from(path))?)),
            None => Ok(Arc::new(FileExemplarRetriever::new(Vec::new()))),
        },
        other => Err(Text2SqlError::Config(format!(
            "Unsupported retriever backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exemplar_aliases() {
        let e: Exemplar =
            serde_json::from_str(r#"{"question": "q", "query": "SELECT 1"}"#).unwrap();
        assert_eq!(e.sql, "SELECT 1");
        assert!(e.evidence.is_none());
    }

    #[test]
    fn test_vector_service_reply_shape() {
        let e: Exemplar = serde_json::from_str(
            r#"{"question": "how many hotels", "answer": "SELECT count(*) FROM hotel", "distance": 0.12}"#,
        )
        .unwrap();
        assert_eq!(e.question, "how many hotels");
        assert_eq!(e.sql, "SELECT count(*) FROM hotel");
    }

    #[test]
    fn test_unknown_backend() {
        let config = RetrieverConfig {
            backend: "chroma".to_string(),
            url: None,
            path: None,
        };
        let err = build_retriever(&config, Duration::from_secs(1)).err().unwrap();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_http_backend_needs_url() {
        let config = RetrieverConfig {
            backend: "http".to_string(),
            url: None,
            path: None,
        };
        assert!(build_retriever(&config, Duration::from_secs(1)).is_err());
    }
}
