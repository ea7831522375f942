use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use reqwest::header::CONTENT_LENGTH;

use crate::{
    client::HttpTransport,
    cursor::Cursor,
    planner::{planner_for, StatementPlanner},
    session::SessionState,
    transport::{Deadline, QueryRequest, QueryResponse, Transport},
    wire::JSON_OUTPUT_FORMAT,
    ConnectionOptions, FireboltError, Result,
};

/// A session against one engine, shared by every cursor it creates.
///
/// Session state (routing, `SET` parameters, transaction identifiers) is
/// visible to all cursors of the connection: an update applied by one cursor
/// is carried by the next request of any other.
pub struct Connection {
    transport: Box<dyn Transport>,
    options: ConnectionOptions,
    planner: Box<dyn StatementPlanner>,
    session: Mutex<SessionState>,
    cursors: Mutex<Vec<Arc<AtomicBool>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("options", &self.options)
            .field("session", &*self.lock_session())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        transport: impl Transport + 'static,
        engine_url: &str,
        database: Option<String>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            planner: planner_for(options.paramstyle),
            options,
            session: Mutex::new(SessionState::new(engine_url, database)),
            cursors: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Connects over HTTP using environment variables.
    ///
    /// Reads `FIREBOLT_ENGINE_URL` and `FIREBOLT_TOKEN`, plus the optional
    /// `FIREBOLT_DATABASE`.
    pub fn from_env(options: ConnectionOptions) -> Result<Self> {
        let (transport, engine_url) = HttpTransport::from_env()?;
        let database = std::env::var("FIREBOLT_DATABASE")
            .ok()
            .filter(|database| !database.trim().is_empty());
        Ok(Self::new(
            transport.with_options(options.clone()),
            &engine_url,
            database,
            options,
        ))
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Snapshot of the shared session state.
    pub fn session(&self) -> SessionState {
        self.lock_session().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn in_transaction(&self) -> bool {
        self.lock_session().in_transaction
    }

    /// Creates a cursor bound to this connection.
    pub fn cursor(&self) -> Result<Cursor<'_>> {
        if self.is_closed() {
            return Err(FireboltError::ConnectionClosed { method: "cursor" });
        }
        let flag = Arc::new(AtomicBool::new(false));
        self.lock_cursors().push(Arc::clone(&flag));
        Ok(Cursor::new(self, flag))
    }

    /// Closes the connection and every live cursor. Calling it again is a
    /// no-op.
    ///
    /// Cursors observe the close on their next call and release their
    /// responses when closed or dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for flag in self.lock_cursors().drain(..) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Commits the open transaction, if any.
    pub async fn commit(&self) -> Result<()> {
        self.finish_transaction("commit", "COMMIT").await
    }

    /// Rolls back the open transaction, if any.
    pub async fn rollback(&self) -> Result<()> {
        self.finish_transaction("rollback", "ROLLBACK").await
    }

    async fn finish_transaction(&self, method: &'static str, sql: &str) -> Result<()> {
        if self.is_closed() {
            return Err(FireboltError::ConnectionClosed { method });
        }
        if !self.in_transaction() {
            return Ok(());
        }
        let deadline = Deadline::new(None);
        let response = self.send_query(sql, &json_output(), &[], &deadline).await?;
        discard(response).await?;
        self.with_session(SessionState::end_transaction);
        Ok(())
    }

    pub(crate) fn planner(&self) -> &dyn StatementPlanner {
        self.planner.as_ref()
    }

    pub(crate) fn with_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.lock_session())
    }

    pub(crate) fn release_cursor(&self, flag: &Arc<AtomicBool>) {
        self.lock_cursors().retain(|live| !Arc::ptr_eq(live, flag));
    }

    /// Opens a transaction before the first statement when autocommit is off.
    pub(crate) async fn begin_implicit_transaction(&self, deadline: &Deadline) -> Result<()> {
        if self.options.autocommit || self.in_transaction() {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("autocommit is off, beginning transaction");
        let response = self
            .send_query("BEGIN TRANSACTION", &json_output(), &[], deadline)
            .await?;
        discard(response).await?;
        self.with_session(SessionState::begin_transaction);
        Ok(())
    }

    /// Sends one statement with the session parameters, maps error
    /// statuses, and applies the session-update headers of a successful
    /// response.
    ///
    /// `extra_params` override session parameters of the same name.
    pub(crate) async fn send_query(
        &self,
        sql: &str,
        plan_params: &[(String, String)],
        extra_params: &[(String, String)],
        deadline: &Deadline,
    ) -> Result<QueryResponse> {
        let (url, mut query_params) = {
            let session = self.lock_session();
            (session.engine_url.clone(), session.query_params())
        };
        query_params.retain(|(key, _)| !extra_params.iter().any(|(extra, _)| extra == key));
        query_params.extend(plan_params.iter().cloned());
        query_params.extend(extra_params.iter().cloned());

        #[cfg(feature = "tracing")]
        if is_loggable(sql) {
            tracing::debug!(%url, query = %sql, "running query");
        }

        let request = QueryRequest {
            url: url.clone(),
            query_params,
            body: sql.to_owned(),
        };
        let response = deadline.run(self.transport.send(request)).await?;
        let response = self.check_status(response, &url, deadline).await?;
        self.with_session(|session| session.apply_headers(&response.headers))?;
        Ok(response)
    }

    async fn check_status(
        &self,
        response: QueryResponse,
        engine_url: &str,
        deadline: &Deadline,
    ) -> Result<QueryResponse> {
        if response.is_success() {
            return Ok(response);
        }
        let status = response.status;
        let body = deadline.run(response.text()).await?;
        match status {
            500 => Err(FireboltError::Operational(format!(
                "Error executing query:\n{body}"
            ))),
            403 => {
                let database = self.lock_session().database.clone();
                if let Some(database) = database {
                    if !deadline
                        .run(self.transport.is_database_available(&database))
                        .await?
                    {
                        return Err(FireboltError::DatabaseNotFound { database });
                    }
                }
                Err(FireboltError::Programming(body))
            }
            404 | 503 => {
                if !deadline
                    .run(self.transport.is_engine_running(engine_url))
                    .await?
                {
                    return Err(FireboltError::EngineNotRunning {
                        engine_url: engine_url.to_owned(),
                    });
                }
                Err(FireboltError::Http { status, body })
            }
            _ => Err(FireboltError::Http { status, body }),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cursors(&self) -> MutexGuard<'_, Vec<Arc<AtomicBool>>> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn json_output() -> Vec<(String, String)> {
    vec![("output_format".to_owned(), JSON_OUTPUT_FORMAT.to_owned())]
}

/// `Content-Length: 0` marks a statement without a result body.
pub(crate) fn has_empty_body(response: &QueryResponse) -> bool {
    response
        .headers
        .get(CONTENT_LENGTH)
        .is_some_and(|length| length.as_bytes() == b"0")
}

pub(crate) async fn discard(mut response: QueryResponse) -> Result<()> {
    response.body.close().await
}

/// Statements carrying credentials are never logged.
#[cfg(feature = "tracing")]
fn is_loggable(sql: &str) -> bool {
    let lowered = sql.to_ascii_lowercase();
    !(lowered.contains("aws_key_id") || lowered.contains("credentials"))
}
