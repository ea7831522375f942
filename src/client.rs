use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header;
use tokio::time::sleep;

use crate::{
    transport::{QueryRequest, QueryResponse, ResponseBody, Transport},
    ConnectionOptions, FireboltError, Result,
};

/// `Transport` over `reqwest`, posting SQL to an engine URL with a bearer
/// token.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    authorization: String,
    options: ConnectionOptions,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("authorization", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl HttpTransport {
    /// Creates a transport from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(token: impl AsRef<str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            authorization: normalize_bearer_authorization(token.as_ref()),
            options: ConnectionOptions::default(),
        }
    }

    /// Creates a transport and engine URL from environment variables.
    ///
    /// Reads:
    /// - `FIREBOLT_ENGINE_URL`: engine endpoint (scheme optional)
    /// - `FIREBOLT_TOKEN`: access token (Bearer prefix optional)
    pub fn from_env() -> Result<(Self, String)> {
        let url = required_env("FIREBOLT_ENGINE_URL")?;
        let token = required_env("FIREBOLT_TOKEN")?;
        Ok((Self::new_bearer(token), url))
    }

    /// Applies timeout and retry behavior.
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    fn should_retry(&self, err: &reqwest::Error) -> bool {
        // only failures where the request never reached the engine
        err.is_connect()
    }

    /// Waits before the next retry attempt, with exponential backoff.
    async fn wait_before_retry(&self, attempt: usize) {
        let exp = attempt.min(16) as u32;
        let multiplier = 1u64 << exp;
        let delay_ms = self.options.retry_backoff_ms.saturating_mul(multiplier);

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying query request after {} ms", delay_ms);

        sleep(Duration::from_millis(delay_ms)).await;
    }
}

pub(crate) fn required_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| FireboltError::Configuration(format!("missing {name} environment variable")))?;
    if value.trim().is_empty() {
        return Err(FireboltError::Configuration(format!(
            "{name} is set but empty"
        )));
    }
    Ok(value)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: QueryRequest) -> Result<QueryResponse> {
        let timeout = Duration::from_millis(self.options.request_timeout_ms);
        let mut attempt = 0usize;
        loop {
            let pending = self
                .http
                .post(&request.url)
                .query(&request.query_params)
                .header(header::AUTHORIZATION, &self.authorization)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(request.body.clone())
                .send();
            // bounds the wait for headers only; bodies may stream for longer
            let response = tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| FireboltError::QueryTimeout(timeout))?;

            match response {
                Ok(response) => {
                    return Ok(QueryResponse {
                        status: response.status().as_u16(),
                        headers: response.headers().clone(),
                        body: Box::new(ReqwestBody {
                            response: Some(response),
                        }),
                    });
                }
                Err(err) => {
                    if self.should_retry(&err) && attempt < self.options.max_retries {
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FireboltError::Transport(err));
                }
            }
        }
    }
}

struct ReqwestBody {
    response: Option<reqwest::Response>,
}

#[async_trait]
impl ResponseBody for ReqwestBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self.response.as_mut() {
            Some(response) => response.chunk().await.map_err(FireboltError::Transport),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        // dropping the response returns or aborts the connection
        self.response = None;
        Ok(())
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
