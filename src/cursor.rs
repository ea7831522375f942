use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    connection::{discard, has_empty_body, json_output, Connection},
    formatter::{SetParameter, TransactionCommand},
    planner::{ExecutionPlan, PlannedUnit},
    row_set::RowSet,
    session::{SessionState, DISALLOWED_PARAMETERS, USE_PARAMETERS},
    transport::{Deadline, QueryResponse},
    wire::AsyncResponse,
    Column, ExecuteOptions, FireboltError, Params, Result, Row, Statistics,
};

/// Statement sent to let the server vet a `SET` parameter before it is kept.
const SET_VALIDATION_QUERY: &str = "select 1";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorState {
    /// No query has run yet.
    None,
    Done,
    Error,
    Closed,
}

/// Executes statements and walks their result sets.
///
/// A cursor borrows its [`Connection`] and shares the connection's session:
/// routing, `SET` parameters and transaction identifiers.
pub struct Cursor<'conn> {
    connection: &'conn Connection,
    closed: Arc<AtomicBool>,
    state: CursorState,
    row_set: Option<RowSet>,
    async_token: Option<String>,
    arraysize: usize,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state())
            .field("row_count", &self.row_set.as_ref().map_or(-1, RowSet::row_count))
            .field("async_token", &self.async_token)
            .field("arraysize", &self.arraysize)
            .finish_non_exhaustive()
    }
}

impl<'conn> Cursor<'conn> {
    pub(crate) fn new(connection: &'conn Connection, closed: Arc<AtomicBool>) -> Self {
        Self {
            connection,
            closed,
            state: CursorState::None,
            row_set: None,
            async_token: None,
            arraysize: 1,
        }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.connection
    }

    pub fn state(&self) -> CursorState {
        if self.closed.load(Ordering::Acquire) {
            CursorState::Closed
        } else {
            self.state
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CursorState::Closed
    }

    /// Default batch size of [`Cursor::fetch_many`].
    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize;
    }

    /// Columns of the current result set; empty for statements without a
    /// tabular result.
    pub fn description(&self) -> Result<Option<&[Column]>> {
        self.ensure_open("description")?;
        Ok(self.row_set.as_ref().and_then(RowSet::columns))
    }

    /// Row count of the current result set, `-1` when there is none.
    pub fn row_count(&self) -> Result<i64> {
        self.ensure_open("row_count")?;
        Ok(self.row_set.as_ref().map_or(-1, RowSet::row_count))
    }

    /// Statistics of the current result set once it has been fully read.
    pub fn statistics(&self) -> Result<Option<&Statistics>> {
        self.ensure_open("statistics")?;
        Ok(self.row_set.as_ref().and_then(RowSet::statistics))
    }

    /// Server query id, reported by streamed result sets.
    pub fn query_id(&self) -> Result<Option<&str>> {
        self.ensure_open("query_id")?;
        Ok(self.row_set.as_ref().and_then(RowSet::query_id))
    }

    /// Token of the last asynchronously submitted query.
    pub fn async_query_token(&self) -> Result<&str> {
        self.async_token.as_deref().ok_or_else(|| {
            FireboltError::General(
                "No async query was executed or query was not an async.".to_owned(),
            )
        })
    }

    /// Engine name of the session.
    pub fn engine_name(&self) -> String {
        self.connection.with_session(|session| session.engine_name())
    }

    /// Drops every user `SET` parameter of the session.
    pub fn flush_parameters(&self) {
        self.connection.with_session(SessionState::flush_parameters);
    }

    /// Runs a query without parameters and returns the row count of the
    /// last statement.
    pub async fn execute(&mut self, query: &str) -> Result<i64> {
        self.run("execute", query, &[], ExecuteOptions::default())
            .await
    }

    /// Runs a query with one parameter set.
    pub async fn execute_with(
        &mut self,
        query: &str,
        params: impl Into<Params>,
        options: ExecuteOptions,
    ) -> Result<i64> {
        let params = params.into();
        let parameter_sets: &[Params] = if params.is_empty() {
            &[]
        } else {
            std::slice::from_ref(&params)
        };
        self.run("execute", query, parameter_sets, options).await
    }

    /// Runs a query reading its results as JSON lines, so rows are decoded
    /// while the response streams in.
    pub async fn execute_stream(&mut self, query: &str, params: impl Into<Params>) -> Result<()> {
        self.execute_with(query, params, ExecuteOptions::new().streaming(true))
            .await
            .map(|_| ())
    }

    /// Submits a single statement for server-side asynchronous execution and
    /// returns its token. Fetching is not allowed afterwards.
    pub async fn execute_async(&mut self, query: &str, params: impl Into<Params>) -> Result<String> {
        self.execute_with(query, params, ExecuteOptions::new().async_execution(true))
            .await?;
        self.async_query_token().map(str::to_owned)
    }

    /// Runs a query once per parameter set.
    ///
    /// With [`Paramstyle::FbNumeric`](crate::Paramstyle::FbNumeric) and no
    /// `bulk_insert`, only the first parameter set is sent.
    pub async fn execute_many(&mut self, query: &str, parameter_sets: &[Params]) -> Result<i64> {
        self.run("execute_many", query, parameter_sets, ExecuteOptions::default())
            .await
    }

    pub async fn execute_many_with(
        &mut self,
        query: &str,
        parameter_sets: &[Params],
        options: ExecuteOptions,
    ) -> Result<i64> {
        self.run("execute_many", query, parameter_sets, options)
            .await
    }

    /// Next row of the current result set, `None` once it is exhausted.
    pub async fn fetch_one(&mut self) -> Result<Option<Row>> {
        self.rows("fetch_one")?.next_row().await
    }

    /// Up to `size` rows, [`Cursor::arraysize`] when `None`.
    pub async fn fetch_many(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or(self.arraysize);
        let rows = self.rows("fetch_many")?;
        let mut batch = Vec::with_capacity(size.min(1024));
        while batch.len() < size {
            match rows.next_row().await? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Every remaining row of the current result set.
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let rows = self.rows("fetch_all")?;
        let mut all = Vec::new();
        while let Some(row) = rows.next_row().await? {
            all.push(row);
        }
        Ok(all)
    }

    /// Moves to the next result set; `false` when there is none.
    pub async fn next_set(&mut self) -> Result<bool> {
        self.rows("next_set")?.nextset().await
    }

    /// Releases the current result and marks the cursor closed. Closing
    /// twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        self.closed.store(true, Ordering::Release);
        self.connection.release_cursor(&self.closed);
        self.async_token = None;
        match self.row_set.take() {
            Some(mut row_set) => row_set.close().await,
            None => Ok(()),
        }
    }

    fn ensure_open(&self, method: &'static str) -> Result<()> {
        if self.is_closed() {
            return Err(FireboltError::CursorClosed { method });
        }
        Ok(())
    }

    fn rows(&mut self, method: &'static str) -> Result<&mut RowSet> {
        self.ensure_open(method)?;
        if self.async_token.is_some() {
            return Err(FireboltError::MethodNotAllowedInAsync { method });
        }
        match (self.state, self.row_set.as_mut()) {
            (CursorState::None, _) | (_, None) => Err(FireboltError::QueryNotRun { method }),
            (_, Some(row_set)) => Ok(row_set),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        self.state = CursorState::None;
        self.async_token = None;
        match self.row_set.take() {
            Some(mut row_set) => row_set.close().await,
            None => Ok(()),
        }
    }

    async fn run(
        &mut self,
        method: &'static str,
        query: &str,
        parameter_sets: &[Params],
        options: ExecuteOptions,
    ) -> Result<i64> {
        self.ensure_open(method)?;
        self.reset().await?;
        let plan = self
            .connection
            .planner()
            .create_plan(query, parameter_sets, &options)?;
        let deadline = Deadline::new(options.timeout);
        match self.run_plan(plan, &deadline).await {
            Ok(row_count) => {
                self.state = CursorState::Done;
                Ok(row_count)
            }
            Err(err) => {
                self.state = CursorState::Error;
                Err(err)
            }
        }
    }

    async fn run_plan(&mut self, plan: ExecutionPlan, deadline: &Deadline) -> Result<i64> {
        let ExecutionPlan {
            units,
            query_params,
            async_execution,
            streaming,
            ..
        } = plan;
        let connection = self.connection;
        let row_set = self.row_set.insert(RowSet::new(streaming));

        for unit in units {
            match unit {
                PlannedUnit::Sql(sql) => {
                    connection.begin_implicit_transaction(deadline).await?;
                    let response = connection
                        .send_query(&sql, &query_params, &[], deadline)
                        .await?;
                    if async_execution {
                        self.async_token = Some(read_async_token(response, deadline).await?);
                        row_set.append_empty_response();
                    } else {
                        append(row_set, response, deadline).await?;
                    }
                }
                PlannedUnit::Set(parameter) => {
                    validate_set_parameter(connection, parameter, deadline).await?;
                    row_set.append_empty_response();
                }
                PlannedUnit::Transaction(command, sql) => {
                    run_transaction(connection, row_set, command, &sql, &query_params, deadline)
                        .await?;
                }
            }
        }
        Ok(row_set.last_row_count())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.connection.release_cursor(&self.closed);
    }
}

async fn append(row_set: &mut RowSet, response: QueryResponse, deadline: &Deadline) -> Result<()> {
    if has_empty_body(&response) {
        discard(response).await?;
        row_set.append_empty_response();
        return Ok(());
    }
    row_set.append_response(response.body, deadline).await
}

async fn read_async_token(response: QueryResponse, deadline: &Deadline) -> Result<String> {
    let body = deadline.run(response.text()).await?;
    let reply: AsyncResponse = serde_json::from_str(&body)
        .map_err(|err| FireboltError::Data(format!("Invalid async response format: {err}")))?;
    Ok(reply.token)
}

fn reject_reserved_parameter(parameter: &SetParameter) -> Result<()> {
    let name = parameter.name.as_str();
    if USE_PARAMETERS.contains(&name) {
        return Err(FireboltError::Configuration(format!(
            "Could not set parameter. Set parameter '{name}' is not allowed. \
             Try again with 'USE {}' instead of SET",
            name.to_uppercase()
        )));
    }
    if DISALLOWED_PARAMETERS.contains(&name) {
        return Err(FireboltError::Configuration(format!(
            "Could not set parameter. Set parameter '{name}' is not allowed. \
             Try again with a different parameter name."
        )));
    }
    Ok(())
}

/// Stores a `SET` parameter once the server has accepted it on a trivial
/// query.
async fn validate_set_parameter(
    connection: &Connection,
    parameter: SetParameter,
    deadline: &Deadline,
) -> Result<()> {
    reject_reserved_parameter(&parameter)?;
    let SetParameter { name, value } = parameter;
    let candidate = [(name, value)];
    let response = connection
        .send_query(SET_VALIDATION_QUERY, &json_output(), &candidate, deadline)
        .await?;
    discard(response).await?;
    let [(name, value)] = candidate;
    connection.with_session(|session| session.apply_parameter(&name, &value));
    Ok(())
}

/// `COMMIT` and `ROLLBACK` outside a transaction have nothing to finish and
/// produce an empty result.
async fn run_transaction(
    connection: &Connection,
    row_set: &mut RowSet,
    command: TransactionCommand,
    sql: &str,
    query_params: &[(String, String)],
    deadline: &Deadline,
) -> Result<()> {
    match command {
        TransactionCommand::Begin => {
            let response = connection.send_query(sql, query_params, &[], deadline).await?;
            connection.with_session(SessionState::begin_transaction);
            append(row_set, response, deadline).await
        }
        TransactionCommand::Commit | TransactionCommand::Rollback => {
            if !connection.in_transaction() {
                row_set.append_empty_response();
                return Ok(());
            }
            let response = connection.send_query(sql, query_params, &[], deadline).await?;
            connection.with_session(SessionState::end_transaction);
            append(row_set, response, deadline).await
        }
    }
}
