use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    routing::post,
    Router,
};
use bigdecimal::BigDecimal;
use firebolt_http::{
    Connection, ConnectionOptions, CursorState, ErrorKind, ExecuteOptions, FireboltError,
    HttpTransport, Params, Paramstyle, Value,
};
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: String,
    delay: Duration,
}

impl MockResponse {
    fn ok(body: impl Into<String>) -> Self {
        Self::status(StatusCode::OK, body)
    }

    fn json(body: JsonValue) -> Self {
        Self::ok(body.to_string())
    }

    fn status(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            delay: Duration::from_millis(0),
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct RecordedRequest {
    params: Vec<(String, String)>,
    body: String,
    authorization: Option<String>,
}

impl RecordedRequest {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

async fn query_handler(
    State(state): State<MockState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, HeaderMap, String) {
    state
        .requests
        .lock()
        .expect("request log mutex must not be poisoned")
        .push(RecordedRequest {
            params,
            body,
            authorization: headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::status(
                StatusCode::INTERNAL_SERVER_ERROR,
                "no mock response available",
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(&value).expect("valid mock header"),
        );
    }
    (response.status, headers, response.body)
}

struct TestServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .clone()
    }

    fn connect(&self, options: ConnectionOptions) -> Connection {
        Connection::new(
            HttpTransport::new_bearer("token").with_options(options.clone()),
            &self.base_url,
            Some("db".to_owned()),
            options,
        )
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/", post(query_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        requests: state.requests,
        task,
    }
}

fn two_rows_body() -> JsonValue {
    json!({
        "meta": [{ "name": "i", "type": "int" }, { "name": "s", "type": "text" }],
        "data": [[1, "a"], [2, "b"]],
        "rows": 2,
        "statistics": {
            "elapsed": 0.002,
            "rows_read": 2,
            "bytes_read": 30,
            "time_before_execution": 0.001,
            "time_to_execute": 0.001
        }
    })
}

fn one_row_body() -> JsonValue {
    json!({
        "meta": [{ "name": "i", "type": "int" }, { "name": "s", "type": "text" }],
        "data": [[1, "a"]],
        "rows": 1
    })
}

fn json_lines(records: &[JsonValue]) -> String {
    records
        .iter()
        .map(|record| format!("{record}\n"))
        .collect()
}

#[tokio::test]
async fn multi_statement_query_exposes_each_result_set() {
    let server = spawn_server(vec![
        MockResponse::ok(""),
        MockResponse::json(two_rows_body()),
        MockResponse::json(one_row_body()),
    ])
    .await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let row_count = cursor
        .execute(
            "INSERT INTO t values (1,'a'),(2,'b'); SELECT * FROM t; SELECT * FROM t WHERE i<=1",
        )
        .await
        .expect("execute must succeed");
    assert_eq!(row_count, 1);
    assert_eq!(cursor.state(), CursorState::Done);

    assert_eq!(cursor.row_count().expect("open"), -1);
    let err = cursor.fetch_one().await.expect_err("insert has no rows");
    assert_eq!(err.to_string(), "data error: no rows to fetch");

    assert!(cursor.next_set().await.expect("second set"));
    assert_eq!(cursor.row_count().expect("open"), 2);
    let names: Vec<String> = cursor
        .description()
        .expect("open")
        .expect("columns")
        .iter()
        .map(|column| column.name.clone())
        .collect();
    assert_eq!(names, ["i", "s"]);
    assert_eq!(
        cursor.fetch_all().await.expect("rows"),
        vec![
            vec![Value::Int(1), Value::text("a")],
            vec![Value::Int(2), Value::text("b")],
        ]
    );
    assert!(cursor.statistics().expect("open").is_some());

    assert!(cursor.next_set().await.expect("third set"));
    assert_eq!(
        cursor.fetch_all().await.expect("rows"),
        vec![vec![Value::Int(1), Value::text("a")]]
    );
    assert!(!cursor.next_set().await.expect("no more sets"));

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].body, "SELECT * FROM t");
    assert_eq!(requests[2].body, "SELECT * FROM t WHERE i<=1");
    assert!(requests.iter().all(|request| {
        request.param("output_format") == Some("JSON_Compact")
            && request.param("database") == Some("db")
            && request.authorization.as_deref() == Some("Bearer token")
    }));
}

#[tokio::test]
async fn streaming_query_decodes_json_lines() {
    let body = json_lines(&[
        json!({
            "message_type": "START",
            "result_columns": [{ "name": "n", "type": "long" }, { "name": "d", "type": "decimal(38, 30)" }],
            "query_id": "q-1",
            "query_label": null,
            "request_id": "r-1"
        }),
        json!({ "message_type": "DATA", "data": [[1, "1.000000000000000000000000000001"]] }),
        json!({ "message_type": "DATA", "data": [[2, "2.5"], [3, "-0.1"]] }),
        json!({
            "message_type": "FINISH_SUCCESSFULLY",
            "statistics": { "elapsed": 0.01, "rows_read": 3, "bytes_read": 24, "time_before_execution": 0.0, "time_to_execute": 0.01 }
        }),
    ]);
    let server = spawn_server(vec![MockResponse::ok(body)]).await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    cursor
        .execute_stream("SELECT n, d FROM numbers", ())
        .await
        .expect("execute must succeed");
    assert_eq!(cursor.query_id().expect("open"), Some("q-1"));
    assert_eq!(cursor.row_count().expect("open"), -1);
    assert!(cursor.statistics().expect("open").is_none());

    let first = cursor.fetch_one().await.expect("row").expect("first row");
    assert_eq!(first[0], Value::Int(1));
    assert_eq!(
        first[1],
        Value::Decimal(
            BigDecimal::from_str("1.000000000000000000000000000001").expect("decimal literal")
        )
    );
    assert_eq!(cursor.fetch_many(Some(5)).await.expect("rest").len(), 2);
    assert_eq!(cursor.fetch_one().await.expect("exhausted"), None);
    assert_eq!(cursor.row_count().expect("open"), 3);
    assert_eq!(
        cursor.statistics().expect("open").map(|stats| stats.rows_read),
        Some(3)
    );
    assert!(!cursor.next_set().await.expect("single set"));

    let requests = server.requests();
    assert_eq!(requests[0].param("output_format"), Some("JSONLines_Compact"));
}

#[tokio::test]
async fn streaming_error_record_is_structured_error() {
    let body = json_lines(&[
        json!({ "message_type": "START", "result_columns": [{ "name": "x", "type": "int" }] }),
        json!({
            "message_type": "FINISH_WITH_ERRORS",
            "errors": [{ "description": "division by zero", "code": "22012" }],
            "statistics": { "elapsed": 0.5 }
        }),
    ]);
    let server = spawn_server(vec![MockResponse::ok(body)]).await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    cursor
        .execute_stream("SELECT 1/0", ())
        .await
        .expect("execute must succeed");
    let err = cursor.fetch_all().await.expect_err("error record");
    assert!(matches!(err, FireboltError::Structured { ref errors } if errors.len() == 1));
    assert!(err.to_string().contains("division by zero"));
    assert_eq!(
        cursor.statistics().expect("open").map(|stats| stats.elapsed),
        Some(0.5)
    );
}

#[tokio::test]
async fn set_statement_is_validated_and_carried() {
    let server = spawn_server(vec![
        MockResponse::json(one_row_body()),
        MockResponse::json(one_row_body()),
    ])
    .await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    assert_eq!(cursor.execute("SET a = b").await.expect("set"), -1);
    assert_eq!(cursor.description().expect("open"), Some(&[][..]));
    let err = cursor.fetch_all().await.expect_err("nothing to fetch");
    assert_eq!(err.kind(), ErrorKind::Data);
    assert_eq!(
        connection.session().set_parameters.get("a").map(String::as_str),
        Some("b")
    );

    let err = cursor
        .execute("SET database=x")
        .await
        .expect_err("reserved key");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(connection.session().set_parameters.len(), 1);
    assert_eq!(connection.session().database.as_deref(), Some("db"));

    cursor.execute("SELECT 1").await.expect("select");
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, "select 1");
    assert_eq!(requests[0].param("a"), Some("b"));
    assert_eq!(requests[1].body, "SELECT 1");
    assert_eq!(requests[1].param("a"), Some("b"));

    cursor.flush_parameters();
    assert!(connection.session().set_parameters.is_empty());
}

#[tokio::test]
async fn session_headers_repoint_engine_and_reset_parameters() {
    let redirected = spawn_server(vec![
        MockResponse::json(one_row_body()).with_header("firebolt-reset-session", "true"),
        MockResponse::json(one_row_body()),
    ])
    .await;
    let origin = spawn_server(vec![MockResponse::json(one_row_body())
        .with_header(
            "firebolt-update-endpoint",
            format!("{}/?x=1", redirected.base_url),
        )
        .with_header("firebolt-update-parameters", "y = 2")])
    .await;
    let connection = origin.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");
    let mut sibling = connection.cursor().expect("sibling cursor");

    cursor.execute("SELECT 1").await.expect("first");
    let session = connection.session();
    assert_eq!(session.engine_url, redirected.base_url);
    assert_eq!(session.set_parameters.get("x").map(String::as_str), Some("1"));
    assert_eq!(session.set_parameters.get("y").map(String::as_str), Some("2"));

    sibling.execute("SELECT 2").await.expect("redirected");
    assert!(connection.session().set_parameters.is_empty());
    cursor.execute("SELECT 3").await.expect("after reset");

    let requests = redirected.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].param("x"), Some("1"));
    assert_eq!(requests[0].param("y"), Some("2"));
    assert_eq!(requests[1].param("x"), None);
    assert_eq!(origin.requests().len(), 1);
}

#[tokio::test]
async fn server_error_status_is_operational_error() {
    let server = spawn_server(vec![MockResponse::status(
        StatusCode::INTERNAL_SERVER_ERROR,
        "syntax error at line 1",
    )])
    .await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let err = cursor.execute("SELEC 1").await.expect_err("must fail");
    match err {
        FireboltError::Operational(message) => {
            assert_eq!(message, "Error executing query:\nsyntax error at line 1")
        }
        other => panic!("expected operational error, got {other:?}"),
    }
    assert_eq!(cursor.state(), CursorState::Error);
}

#[tokio::test]
async fn forbidden_status_is_programming_error() {
    let server = spawn_server(vec![MockResponse::status(
        StatusCode::FORBIDDEN,
        "access denied",
    )])
    .await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let err = cursor.execute("SELECT 1").await.expect_err("must fail");
    assert!(matches!(err, FireboltError::Programming(ref body) if body == "access denied"));
}

#[tokio::test]
async fn other_status_is_http_error() {
    let server = spawn_server(vec![MockResponse::status(StatusCode::BAD_REQUEST, "bad")]).await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let err = cursor.execute("SELECT 1").await.expect_err("must fail");
    assert!(matches!(err, FireboltError::Http { status: 400, ref body } if body == "bad"));
}

#[tokio::test]
async fn timeout_bounds_the_whole_plan() {
    let server = spawn_server(vec![
        MockResponse::json(one_row_body()).with_delay(Duration::from_millis(40)),
        MockResponse::json(one_row_body()).with_delay(Duration::from_millis(40)),
        MockResponse::json(one_row_body()).with_delay(Duration::from_millis(40)),
    ])
    .await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let err = cursor
        .execute_with(
            "SELECT 1; SELECT 2; SELECT 3",
            (),
            ExecuteOptions::new().timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("plan must time out");
    assert!(matches!(err, FireboltError::QueryTimeout(_)));
    assert_eq!(cursor.state(), CursorState::Error);
}

#[tokio::test]
async fn qmark_parameters_are_substituted_client_side() {
    let server = spawn_server(vec![MockResponse::json(one_row_body())]).await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    cursor
        .execute_with(
            "SELECT * FROM t WHERE i = ? AND s = ?",
            [Value::int(1), Value::text("it's")],
            ExecuteOptions::default(),
        )
        .await
        .expect("execute must succeed");
    let requests = server.requests();
    assert_eq!(requests[0].body, "SELECT * FROM t WHERE i = 1 AND s = 'it''s'");
    assert_eq!(requests[0].param("query_parameters"), None);
}

#[tokio::test]
async fn fb_numeric_sends_first_parameter_set_as_json() {
    let server = spawn_server(vec![MockResponse::ok("")]).await;
    let connection =
        server.connect(ConnectionOptions::default().with_paramstyle(Paramstyle::FbNumeric));
    let mut cursor = connection.cursor().expect("cursor");

    cursor
        .execute_many(
            "INSERT INTO t VALUES ($1, $2)",
            &[
                Params::positional([Value::int(1), Value::text("a")]),
                Params::positional([Value::int(2), Value::text("b")]),
            ],
        )
        .await
        .expect("execute must succeed");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, "INSERT INTO t VALUES ($1, $2)");
    let parameters: JsonValue = serde_json::from_str(
        requests[0]
            .param("query_parameters")
            .expect("query_parameters sent"),
    )
    .expect("valid json");
    assert_eq!(
        parameters,
        json!([{ "name": "$1", "value": 1 }, { "name": "$2", "value": "a" }])
    );
}

#[tokio::test]
async fn bulk_insert_sends_one_request() {
    let server = spawn_server(vec![MockResponse::ok("")]).await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let row_count = cursor
        .execute_many_with(
            "INSERT INTO t VALUES (?)",
            &[
                Params::positional([Value::int(1)]),
                Params::positional([Value::int(2)]),
            ],
            ExecuteOptions::new().bulk_insert(true),
        )
        .await
        .expect("bulk insert must succeed");
    assert_eq!(row_count, -1);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].body,
        "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)"
    );

    let err = cursor
        .execute_many_with(
            "SELECT 1",
            &[Params::positional([Value::int(1)])],
            ExecuteOptions::new().bulk_insert(true),
        )
        .await
        .expect_err("select is not bulk");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn async_execution_returns_token() {
    let server = spawn_server(vec![MockResponse::json(json!({
        "token": "token-42",
        "message": "the query was accepted for async processing",
        "monitorSql": "CALL fb_GetAsyncStatus('token-42');"
    }))])
    .await;
    let connection = server.connect(ConnectionOptions::default());
    let mut cursor = connection.cursor().expect("cursor");

    let token = cursor
        .execute_async("INSERT INTO t SELECT * FROM big", ())
        .await
        .expect("async submit must succeed");
    assert_eq!(token, "token-42");
    assert_eq!(cursor.async_query_token().expect("token"), "token-42");
    assert!(matches!(
        cursor.fetch_one().await,
        Err(FireboltError::MethodNotAllowedInAsync { method: "fetch_one" })
    ));
    assert_eq!(server.requests()[0].param("async"), Some("true"));

    let err = cursor
        .execute_with(
            "SELECT 1; SELECT 2",
            (),
            ExecuteOptions::new().async_execution(true),
        )
        .await
        .expect_err("multi-statement async");
    assert_eq!(err.kind(), ErrorKind::General);
}
