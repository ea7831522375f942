use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::time::Instant;

use crate::{FireboltError, Result};

/// One HTTP query request: `POST url?query_params` with the SQL as body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryRequest {
    pub url: String,
    pub query_params: Vec<(String, String)>,
    pub body: String,
}

/// Response handed back by a [`Transport`]. The body is pulled in chunks.
pub struct QueryResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Box<dyn ResponseBody>,
}

impl std::fmt::Debug for QueryResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl QueryResponse {
    /// Builds a response with a fully buffered body.
    pub fn buffered(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: Box::new(BufferedBody::new(body)),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reads the remaining body as (lossy) UTF-8 text and releases it.
    pub async fn text(mut self) -> Result<String> {
        let bytes = read_to_end(&mut *self.body).await;
        let closed = self.body.close().await;
        let bytes = bytes?;
        closed?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Byte source of a response body.
#[async_trait]
pub trait ResponseBody: Send {
    /// Next chunk of the body, or `None` once it is exhausted.
    async fn chunk(&mut self) -> Result<Option<Bytes>>;

    /// Releases the underlying connection. Must be safe to call twice.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory [`ResponseBody`], yielding its bytes as one chunk.
#[derive(Debug, Default)]
pub struct BufferedBody {
    data: Option<Bytes>,
}

impl BufferedBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            data: (!data.is_empty()).then_some(data),
        }
    }
}

#[async_trait]
impl ResponseBody for BufferedBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.data.take())
    }

    async fn close(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}

pub(crate) async fn read_to_end(body: &mut dyn ResponseBody) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = body.chunk().await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

/// HTTP side of the client: sends query requests and answers the
/// resource checks used to explain error statuses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: QueryRequest) -> Result<QueryResponse>;

    /// Consulted when a query is rejected with 403.
    async fn is_database_available(&self, _database: &str) -> Result<bool> {
        Ok(true)
    }

    /// Consulted when a query is rejected with 404 or 503.
    async fn is_engine_running(&self, _engine_url: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Countdown shared by every request of one execution plan.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    limit: Option<(Instant, Duration)>,
}

impl Deadline {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            limit: timeout.map(|timeout| (Instant::now() + timeout, timeout)),
        }
    }

    /// Runs `future`, failing with [`FireboltError::QueryTimeout`] once the
    /// deadline has passed.
    pub(crate) async fn run<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.limit {
            None => future.await,
            Some((at, timeout)) => tokio::time::timeout_at(at, future)
                .await
                .map_err(|_| FireboltError::QueryTimeout(timeout))?,
        }
    }
}
