use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use super::{Exemplar, ExemplarRetriever};
use crate::error::{Result, Text2SqlError};

/// Queries an external vector service: `POST {url}/query` with `{k, question}`.
pub struct HttpExemplarRetriever {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    k: usize,
    question: &'a str,
}

impl HttpExemplarRetriever {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Text2SqlError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExemplarRetriever for HttpExemplarRetriever {
    async fn fetch(&self, k: usize, question: &str) -> Result<Vec<Exemplar>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/query", self.url))
            .json(&QueryRequest { k, question })
            .send()
            .await
            .map_err(|e| {
                error!("Exemplar service unreachable: {}", e);
                Text2SqlError::Retriever(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Text2SqlError::Retriever(format!(
                "status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let mut exemplars: Vec<Exemplar> = response
            .json()
            .await
            .map_err(|e| Text2SqlError::Retriever(format!("malformed response: {}", e)))?;
        exemplars.truncate(k);

        debug!("Fetched {} exemplars", exemplars.len());
        Ok(exemplars)
    }
}
