//! Blocking flavor of [`Connection`](crate::Connection) and
//! [`Cursor`](crate::Cursor).
//!
//! Each blocking connection owns a current-thread runtime and drives the
//! same cursor state machine on it. These types must not be used from
//! inside an async runtime.

use tokio::runtime::{Builder, Runtime};

use crate::{
    session::SessionState, transport::Transport, Column, ConnectionOptions, CursorState,
    ExecuteOptions, FireboltError, Params, Result, Row, Statistics,
};

pub struct Connection {
    runtime: Runtime,
    inner: crate::Connection,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Connection").field(&self.inner).finish()
    }
}

impl Connection {
    pub fn new(
        transport: impl Transport + 'static,
        engine_url: &str,
        database: Option<String>,
        options: ConnectionOptions,
    ) -> Result<Self> {
        Ok(Self {
            runtime: runtime()?,
            inner: crate::Connection::new(transport, engine_url, database, options),
        })
    }

    /// See [`crate::Connection::from_env`].
    pub fn from_env(options: ConnectionOptions) -> Result<Self> {
        Ok(Self {
            runtime: runtime()?,
            inner: crate::Connection::from_env(options)?,
        })
    }

    pub fn cursor(&self) -> Result<Cursor<'_>> {
        Ok(Cursor {
            runtime: &self.runtime,
            inner: self.inner.cursor()?,
        })
    }

    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    pub fn session(&self) -> SessionState {
        self.inner.session()
    }

    pub fn commit(&self) -> Result<()> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback(&self) -> Result<()> {
        self.runtime.block_on(self.inner.rollback())
    }
}

fn runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| FireboltError::Operational(format!("unable to start runtime: {err}")))
}

/// Blocking cursor; every method mirrors its async counterpart.
#[derive(Debug)]
pub struct Cursor<'conn> {
    runtime: &'conn Runtime,
    inner: crate::Cursor<'conn>,
}

impl Cursor<'_> {
    pub fn state(&self) -> CursorState {
        self.inner.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn arraysize(&self) -> usize {
        self.inner.arraysize()
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.inner.set_arraysize(arraysize);
    }

    pub fn description(&self) -> Result<Option<&[Column]>> {
        self.inner.description()
    }

    pub fn row_count(&self) -> Result<i64> {
        self.inner.row_count()
    }

    pub fn statistics(&self) -> Result<Option<&Statistics>> {
        self.inner.statistics()
    }

    pub fn query_id(&self) -> Result<Option<&str>> {
        self.inner.query_id()
    }

    pub fn async_query_token(&self) -> Result<&str> {
        self.inner.async_query_token()
    }

    pub fn engine_name(&self) -> String {
        self.inner.engine_name()
    }

    pub fn flush_parameters(&self) {
        self.inner.flush_parameters();
    }

    pub fn execute(&mut self, query: &str) -> Result<i64> {
        self.runtime.block_on(self.inner.execute(query))
    }

    pub fn execute_with(
        &mut self,
        query: &str,
        params: impl Into<Params>,
        options: ExecuteOptions,
    ) -> Result<i64> {
        self.runtime
            .block_on(self.inner.execute_with(query, params, options))
    }

    pub fn execute_stream(&mut self, query: &str, params: impl Into<Params>) -> Result<()> {
        self.runtime.block_on(self.inner.execute_stream(query, params))
    }

    pub fn execute_async(&mut self, query: &str, params: impl Into<Params>) -> Result<String> {
        self.runtime.block_on(self.inner.execute_async(query, params))
    }

    pub fn execute_many(&mut self, query: &str, parameter_sets: &[Params]) -> Result<i64> {
        self.runtime
            .block_on(self.inner.execute_many(query, parameter_sets))
    }

    pub fn execute_many_with(
        &mut self,
        query: &str,
        parameter_sets: &[Params],
        options: ExecuteOptions,
    ) -> Result<i64> {
        self.runtime
            .block_on(self.inner.execute_many_with(query, parameter_sets, options))
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>> {
        self.runtime.block_on(self.inner.fetch_one())
    }

    pub fn fetch_many(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        self.runtime.block_on(self.inner.fetch_many(size))
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.runtime.block_on(self.inner.fetch_all())
    }

    pub fn next_set(&mut self) -> Result<bool> {
        self.runtime.block_on(self.inner.next_set())
    }

    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Row>;

    /// Rows of the current result set.
    fn next(&mut self) -> Option<Self::Item> {
        self.fetch_one().transpose()
    }
}
