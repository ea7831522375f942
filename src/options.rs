use std::time::Duration;

/// Placeholder convention for parameterized queries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Paramstyle {
    /// `?` placeholders substituted client-side with SQL literals.
    #[default]
    Qmark,
    /// `$1`, `$2`, ... placeholders resolved by the server.
    FbNumeric,
}

/// Configures a connection: parameter style, transactions, HTTP timeout and
/// retry behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionOptions {
    pub paramstyle: Paramstyle,
    /// When false, the first statement of every transaction implicitly
    /// begins one.
    pub autocommit: bool,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            paramstyle: Paramstyle::Qmark,
            autocommit: true,
            request_timeout_ms: 60_000,
            max_retries: 0,
            retry_backoff_ms: 250,
        }
    }
}

impl ConnectionOptions {
    pub fn with_paramstyle(mut self, paramstyle: Paramstyle) -> Self {
        self.paramstyle = paramstyle;
        self
    }

    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }
}

/// Per-call execution flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecuteOptions {
    /// Read results as JSON lines instead of one buffered document.
    pub streaming: bool,
    /// Submit for server-side asynchronous execution; only a token comes back.
    pub async_execution: bool,
    /// Concatenate every parameter set of one INSERT into a single request.
    pub bulk_insert: bool,
    /// Send the query verbatim, without splitting or substitution.
    pub skip_parsing: bool,
    /// Wall-clock budget for the whole execution plan.
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn async_execution(mut self, async_execution: bool) -> Self {
        self.async_execution = async_execution;
        self
    }

    pub fn bulk_insert(mut self, bulk_insert: bool) -> Self {
        self.bulk_insert = bulk_insert;
        self
    }

    pub fn skip_parsing(mut self, skip_parsing: bool) -> Self {
        self.skip_parsing = skip_parsing;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
