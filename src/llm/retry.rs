use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::key_ring::ApiKeyRing;
use super::models::LlmType;
use crate::error::{Result, Text2SqlError};

const QUOTA_EXHAUSTED_KEYWORDS: [&str; 3] = ["rate limit", "quota", "429"];

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Raw failure of a single dispatch, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError(pub String);

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // The URL may carry a key in its query string
        ProviderError(e.without_url().to_string())
    }
}

pub fn is_quota_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_EXHAUSTED_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Ready,
    Dispatching,
    Rotating,
    BackoffSleep,
    Failed,
}

/// Quota-aware retry loop shared by every provider client.
///
/// The client hands `execute` a closure that performs one dispatch with the key
/// it is given; on a quota error the handler rotates the ring and calls the
/// closure again with the next key.
#[derive(Debug)]
pub struct RetryHandler {
    llm_type: LlmType,
    key_ring: ApiKeyRing,
    consecutive_errors: usize,
    state: ClientState,
    backoff: Duration,
    backoffs: u64,
    max_backoffs: Option<u64>,
}

impl RetryHandler {
    pub fn new(llm_type: LlmType, key_ring: ApiKeyRing) -> Self {
        Self {
            llm_type,
            key_ring,
            consecutive_errors: 0,
            state: ClientState::Ready,
            backoff: DEFAULT_BACKOFF,
            backoffs: 0,
            max_backoffs: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Give up with `QuotaExceeded` after this many full-ring sleeps within one call.
    pub fn with_max_backoffs(mut self, max_backoffs: u64) -> Self {
        self.max_backoffs = Some(max_backoffs);
        self
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn key_ring(&self) -> &ApiKeyRing {
        &self.key_ring
    }

    pub fn consecutive_errors(&self) -> usize {
        self.consecutive_errors
    }

    /// Total backoff sleeps taken by this handler.
    pub fn backoffs(&self) -> u64 {
        self.backoffs
    }

    pub fn current_key(&self) -> &str {
        self.key_ring.current()
    }

    fn transition(&mut self, next: ClientState) {
        debug!("{} client: {:?} -> {:?}", self.llm_type, self.state, next);
        self.state = next;
    }

    pub async fn execute<T, F, Fut>(&mut self, mut call: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut backoffs_this_call = 0u64;

        loop {
            self.transition(ClientState::Dispatching);
            let key = self.key_ring.current().to_string();

            let error = match call(key).await {
                Ok(value) => {
                    self.consecutive_errors = 0;
                    self.transition(ClientState::Ready);
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !is_quota_error(&error.0) {
                self.transition(ClientState::Failed);
                return Err(Text2SqlError::ApiFailure {
                    provider: self.llm_type.to_string(),
                    detail: error.0,
                });
            }

            self.transition(ClientState::Rotating);
            self.consecutive_errors += 1;
            self.key_ring.rotate();
            debug!(
                "{} quota error, rotated to key #{} ({} consecutive)",
                self.llm_type,
                self.key_ring.index(),
                self.consecutive_errors
            );

            if self.consecutive_errors >= self.key_ring.size() {
                self.transition(ClientState::BackoffSleep);
                warn!(
                    "All {} API keys quota-exhausted. Sleeping for {}s",
                    self.llm_type,
                    self.backoff.as_secs()
                );
                tokio::time::sleep(self.backoff).await;
                self.consecutive_errors = 0;
                self.backoffs += 1;
                backoffs_this_call += 1;

                if let Some(max) = self.max_backoffs {
                    if backoffs_this_call >= max {
                        self.transition(ClientState::Failed);
                        return Err(Text2SqlError::QuotaExceeded {
                            provider: self.llm_type.to_string(),
                        });
                    }
                }
            }
        }
    }
}
