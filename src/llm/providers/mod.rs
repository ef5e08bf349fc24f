pub mod anthropic;
pub mod google;
pub mod openai;

use reqwest::Response;

use super::models::LlmConfig;
use super::retry::{ProviderError, RetryHandler};

/// State every provider client carries: its validated config, an HTTP client,
/// the resolved base URL and the retry handler that owns the key ring.
pub struct ProviderCore {
    pub config: LlmConfig,
    pub http: reqwest::Client,
    pub base_url: String,
    pub retry: RetryHandler,
}

impl ProviderCore {
    pub fn new(config: LlmConfig, http: reqwest::Client, base_url: &str, retry: RetryHandler) -> Self {
        Self {
            config,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        }
    }
}

/// Turns a non-2xx reply into a `ProviderError` carrying `status {code}: {body}`,
/// so rate limiting is recognised by the quota keyword match.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError(format!("status {}: {}", status.as_u16(), body)))
}
