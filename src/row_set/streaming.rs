use std::collections::VecDeque;

use serde_json::Value as JsonValue;

use super::{decode_row, no_rows_to_fetch};
use crate::{
    transport::{Deadline, ResponseBody},
    wire::{parse_json_lines_record, JsonLinesRecord},
    Column, FireboltError, Result, Row, Statistics,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    AwaitingStart,
    InResultSet,
    BetweenSets,
    Done,
    Failed,
}

/// Splits a chunked body into lines, holding at most one partial line.
#[derive(Default)]
struct LineReader {
    buffer: Vec<u8>,
    eof: bool,
}

impl LineReader {
    async fn next_line(&mut self, body: &mut dyn ResponseBody) -> Result<Option<String>> {
        loop {
            if let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=end).collect();
                let line = utf8_line(&line)?;
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line.to_owned()));
            }
            if self.eof {
                let rest = std::mem::take(&mut self.buffer);
                let line = utf8_line(&rest)?;
                return Ok((!line.is_empty()).then(|| line.to_owned()));
            }
            match body.chunk().await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.eof = true,
                Err(err) => {
                    return Err(FireboltError::Operational(format!(
                        "Failed to read response stream: {err}"
                    )))
                }
            }
        }
    }
}

fn utf8_line(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map(str::trim).map_err(|err| {
        FireboltError::Operational(format!("Invalid UTF-8 in response stream: {err}"))
    })
}

/// Reads `JSONLines_Compact` responses record by record.
///
/// Only the current `DATA` batch is kept in memory; later responses wait
/// unread until [`StreamingRowSet::nextset`] reaches them.
pub(crate) struct StreamingRowSet {
    /// Front is the current result set; `None` marks a response without body.
    responses: VecDeque<Option<Box<dyn ResponseBody>>>,
    phase: Phase,
    lines: LineReader,
    columns: Option<Vec<Column>>,
    query_id: Option<String>,
    row_count: i64,
    statistics: Option<Statistics>,
    rows_returned: i64,
    batch: std::vec::IntoIter<Vec<JsonValue>>,
}

impl StreamingRowSet {
    pub(crate) fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            phase: Phase::Done,
            lines: LineReader::default(),
            columns: None,
            query_id: None,
            row_count: -1,
            statistics: None,
            rows_returned: 0,
            batch: Vec::new().into_iter(),
        }
    }

    pub(crate) fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// `-1` until the current result set has been read to its end.
    pub(crate) fn row_count(&self) -> i64 {
        self.row_count
    }

    pub(crate) fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub(crate) fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    fn reset(&mut self) {
        self.phase = Phase::AwaitingStart;
        self.lines = LineReader::default();
        self.columns = None;
        self.query_id = None;
        self.row_count = -1;
        self.statistics = None;
        self.rows_returned = 0;
        self.batch = Vec::new().into_iter();
    }

    /// Queues a response; the first one is read up to its `START` record.
    pub(crate) async fn append_response(
        &mut self,
        body: Box<dyn ResponseBody>,
        deadline: &Deadline,
    ) -> Result<()> {
        self.responses.push_back(Some(body));
        if self.responses.len() == 1 {
            deadline.run(self.start_current()).await?;
        }
        Ok(())
    }

    pub(crate) fn append_empty_response(&mut self) {
        self.responses.push_back(None);
        if self.responses.len() == 1 {
            self.start_empty();
        }
    }

    fn start_empty(&mut self) {
        self.reset();
        self.columns = Some(Vec::new());
        self.phase = Phase::BetweenSets;
    }

    async fn start_current(&mut self) -> Result<()> {
        self.reset();
        match self.responses.front() {
            None => {
                self.phase = Phase::Done;
                return Ok(());
            }
            Some(None) => {
                self.start_empty();
                return Ok(());
            }
            Some(Some(_)) => {}
        }

        match self.next_record().await? {
            Some(JsonLinesRecord::Start(start)) => {
                self.columns = Some(
                    start
                        .result_columns
                        .iter()
                        .map(|column| Column::from_wire(column.name.as_str(), &column.type_name))
                        .collect(),
                );
                self.query_id = start.query_id;
                self.phase = Phase::InResultSet;
                Ok(())
            }
            None => Err(self
                .fail(FireboltError::Operational(
                    "Unexpected end of response stream while reading columns.".to_owned(),
                ))
                .await),
            Some(other) => Err(self
                .fail(FireboltError::Operational(format!(
                    "Unexpected json line message type {}, expected START",
                    other.message_type().as_str()
                )))
                .await),
        }
    }

    async fn next_record(&mut self) -> Result<Option<JsonLinesRecord>> {
        match self.read_record().await {
            Ok(record) => Ok(record),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn read_record(&mut self) -> Result<Option<JsonLinesRecord>> {
        let Some(Some(body)) = self.responses.front_mut() else {
            return Ok(None);
        };
        let Some(line) = self.lines.next_line(&mut **body).await? else {
            return Ok(None);
        };
        match parse_json_lines_record(&line)? {
            JsonLinesRecord::Error(record) => {
                self.statistics = record.statistics;
                if record.query_id.is_some() {
                    self.query_id = record.query_id;
                }
                Err(FireboltError::Structured {
                    errors: record.errors,
                })
            }
            record => Ok(Some(record)),
        }
    }

    /// Marks the row set failed and releases every response, keeping the
    /// statistics collected so far.
    ///
    /// Close failures are reported next to `err` rather than replacing it.
    async fn fail(&mut self, err: FireboltError) -> FireboltError {
        self.phase = Phase::Failed;
        let released = self.release_all().await;
        with_close_failures(err, released)
    }

    pub(crate) async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            match self.phase {
                Phase::InResultSet => {}
                Phase::BetweenSets if self.responses.front().is_some_and(Option::is_none) => {
                    return Err(no_rows_to_fetch())
                }
                Phase::AwaitingStart | Phase::BetweenSets | Phase::Done | Phase::Failed => {
                    return Ok(None)
                }
            }

            if let Some(raw) = self.batch.next() {
                self.rows_returned += 1;
                let columns = self.columns.as_deref().unwrap_or_default();
                return decode_row(columns, raw).map(Some);
            }

            match self.next_record().await? {
                Some(JsonLinesRecord::Data(record)) => self.batch = record.data.into_iter(),
                Some(JsonLinesRecord::Success(record)) => {
                    self.row_count = self.rows_returned;
                    self.statistics = Some(record.statistics);
                    self.phase = Phase::BetweenSets;
                    return Ok(None);
                }
                None => {
                    return Err(self
                        .fail(FireboltError::Operational(
                            "Unexpected end of response stream while reading data.".to_owned(),
                        ))
                        .await)
                }
                Some(other) => {
                    return Err(self
                        .fail(FireboltError::Operational(format!(
                            "Unexpected json line message type {}, expected DATA",
                            other.message_type().as_str()
                        )))
                        .await)
                }
            }
        }
    }

    /// Releases the current response and moves to the next queued one.
    pub(crate) async fn nextset(&mut self) -> Result<bool> {
        if self.responses.len() < 2 {
            return Ok(false);
        }
        if let Some(Some(mut body)) = self.responses.pop_front() {
            if let Err(err) = body.close().await {
                let err = FireboltError::Operational(format!("Failed to close response: {err}"));
                let released = self.close().await;
                return Err(with_close_failures(err, released));
            }
        }
        self.start_current().await?;
        Ok(true)
    }

    async fn release_all(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for mut body in self.responses.drain(..).flatten() {
            if let Err(err) = body.close().await {
                errors.push(err);
            }
        }
        self.batch = Vec::new().into_iter();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FireboltError::Aggregate {
                message: "Failed to close row set".to_owned(),
                errors,
            })
        }
    }

    /// Releases every pending response; every failure is reported.
    pub(crate) async fn close(&mut self) -> Result<()> {
        let released = self.release_all().await;
        self.reset();
        self.phase = Phase::Done;
        released
    }
}

fn with_close_failures(err: FireboltError, released: Result<()>) -> FireboltError {
    let close_errors = match released {
        Ok(()) => return err,
        Err(FireboltError::Aggregate { errors, .. }) => errors,
        Err(other) => vec![other],
    };
    #[cfg(feature = "tracing")]
    tracing::warn!(
        failures = close_errors.len(),
        "failed to release responses of a broken row set"
    );
    let mut errors = Vec::with_capacity(close_errors.len() + 1);
    errors.push(err);
    errors.extend(close_errors);
    FireboltError::Aggregate {
        message: "Row set failed and could not be released".to_owned(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::StreamingRowSet;
    use crate::{
        transport::{BufferedBody, Deadline, ResponseBody},
        FireboltError, Value,
    };

    const START: &str = r#"{"message_type":"START","result_columns":[{"name":"i","type":"int"}],"query_id":"q1","query_label":null,"request_id":"r1"}"#;
    const SUCCESS: &str = r#"{"message_type":"FINISH_SUCCESSFULLY","statistics":{"elapsed":0.5,"rows_read":3}}"#;

    fn lines(records: &[&str]) -> Box<dyn ResponseBody> {
        Box::new(BufferedBody::new(records.join("\n")))
    }

    /// Yields one small chunk at a time and counts closes.
    struct ChunkedBody {
        chunks: Vec<Bytes>,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    #[async_trait]
    impl ResponseBody for ChunkedBody {
        async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
            Ok((!self.chunks.is_empty()).then(|| self.chunks.remove(0)))
        }

        async fn close(&mut self) -> crate::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(FireboltError::Operational("close failed".to_owned()));
            }
            Ok(())
        }
    }

    /// One record per chunk, counting how many chunks were pulled.
    struct CountingBody {
        records: std::vec::IntoIter<String>,
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResponseBody for CountingBody {
        async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
            let record = self.records.next();
            if record.is_some() {
                self.pulls.fetch_add(1, Ordering::SeqCst);
            }
            Ok(record.map(|record| Bytes::from(format!("{record}\n"))))
        }
    }

    async fn collect(rows: &mut StreamingRowSet) -> Vec<Vec<Value>> {
        let mut collected = Vec::new();
        while let Some(row) = rows.next_row().await.expect("row") {
            collected.push(row);
        }
        collected
    }

    #[tokio::test]
    async fn reads_batches_then_next_set() {
        let mut rows = StreamingRowSet::new();
        let deadline = Deadline::new(None);
        rows.append_response(
            lines(&[
                START,
                r#"{"message_type":"DATA","data":[[1],[2]]}"#,
                r#"{"message_type":"DATA","data":[[3]]}"#,
                SUCCESS,
            ]),
            &deadline,
        )
        .await
        .expect("start record");
        rows.append_response(
            lines(&[START, r#"{"message_type":"DATA","data":[[4]]}"#, SUCCESS]),
            &deadline,
        )
        .await
        .expect("queued");

        assert_eq!(rows.query_id(), Some("q1"));
        assert_eq!(rows.row_count(), -1);
        assert_eq!(
            collect(&mut rows).await,
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]
        );
        assert_eq!(rows.row_count(), 3);
        assert_eq!(rows.statistics().map(|stats| stats.rows_read), Some(3));

        assert!(rows.nextset().await.expect("next set"));
        assert_eq!(collect(&mut rows).await, vec![vec![Value::Int(4)]]);
        assert!(!rows.nextset().await.expect("no more sets"));
    }

    #[tokio::test]
    async fn records_split_across_chunks() {
        let body = [START, r#"{"message_type":"DATA","data":[[7]]}"#, SUCCESS].join("\n");
        let chunks = body
            .as_bytes()
            .chunks(5)
            .map(Bytes::copy_from_slice)
            .collect();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut rows = StreamingRowSet::new();
        rows.append_response(
            Box::new(ChunkedBody {
                chunks,
                closes: Arc::clone(&closes),
                fail_close: false,
            }),
            &Deadline::new(None),
        )
        .await
        .expect("start record");
        assert_eq!(collect(&mut rows).await, vec![vec![Value::Int(7)]]);
        rows.close().await.expect("closed");
        rows.close().await.expect("close is idempotent");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_start_is_operational_error() {
        let mut rows = StreamingRowSet::new();
        let err = rows
            .append_response(lines(&[SUCCESS]), &Deadline::new(None))
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("Unexpected json line message type"));

        let mut rows = StreamingRowSet::new();
        let err = rows
            .append_response(lines(&[]), &Deadline::new(None))
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("Unexpected end of response stream"));
    }

    #[tokio::test]
    async fn error_record_raises_and_keeps_statistics() {
        let mut rows = StreamingRowSet::new();
        rows.append_response(
            lines(&[
                START,
                r#"{"message_type":"DATA","data":[[1]]}"#,
                r#"{"message_type":"FINISH_WITH_ERRORS","errors":[{"description":"division by zero"},{"description":"second"}],"query_id":"q-failed","statistics":{"elapsed":0.2}}"#,
            ]),
            &Deadline::new(None),
        )
        .await
        .expect("start record");
        assert_eq!(rows.next_row().await.expect("row"), Some(vec![Value::Int(1)]));
        let err = rows.next_row().await.expect_err("must fail");
        match err {
            FireboltError::Structured { errors } => assert_eq!(errors.len(), 2),
            other => panic!("expected structured error, got {other:?}"),
        }
        assert_eq!(rows.statistics().map(|stats| stats.elapsed), Some(0.2));
        assert_eq!(rows.query_id(), Some("q-failed"));
        assert_eq!(rows.next_row().await.expect("failed set"), None);
    }

    #[tokio::test]
    async fn truncated_stream_is_operational_error() {
        let mut rows = StreamingRowSet::new();
        rows.append_response(
            lines(&[START, r#"{"message_type":"DATA","data":[[1]]}"#]),
            &Deadline::new(None),
        )
        .await
        .expect("start record");
        assert!(rows.next_row().await.expect("row").is_some());
        let err = rows.next_row().await.expect_err("must fail");
        assert!(matches!(err, FireboltError::Operational(_)));
    }

    #[tokio::test]
    async fn empty_response_has_no_rows() {
        let mut rows = StreamingRowSet::new();
        rows.append_empty_response();
        assert_eq!(rows.row_count(), -1);
        assert_eq!(rows.columns(), Some(&[][..]));
        let err = rows.next_row().await.expect_err("must fail");
        assert_eq!(err.to_string(), "data error: no rows to fetch");
    }

    #[tokio::test]
    async fn close_reports_every_failure() {
        let closes = Arc::new(AtomicUsize::new(0));
        let failing = |body: &str| -> Box<dyn ResponseBody> {
            Box::new(ChunkedBody {
                chunks: vec![Bytes::from(body.to_owned())],
                closes: Arc::clone(&closes),
                fail_close: true,
            })
        };
        let mut rows = StreamingRowSet::new();
        let deadline = Deadline::new(None);
        rows.append_response(failing(START), &deadline)
            .await
            .expect("start record");
        rows.append_response(failing(START), &deadline)
            .await
            .expect("queued");
        let err = rows.close().await.expect_err("must fail");
        match err {
            FireboltError::Aggregate { errors, .. } => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate error, got {other:?}"),
        }
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        rows.close().await.expect("nothing left to close");
    }

    #[tokio::test]
    async fn reads_one_data_record_at_a_time() {
        const BATCHES: usize = 200;
        const BATCH_ROWS: usize = 5;
        let mut records = vec![START.to_owned()];
        for batch in 0..BATCHES {
            let data: Vec<_> = (0..BATCH_ROWS)
                .map(|row| serde_json::json!([batch * BATCH_ROWS + row]))
                .collect();
            records.push(serde_json::json!({ "message_type": "DATA", "data": data }).to_string());
        }
        records.push(SUCCESS.to_owned());

        let pulls = Arc::new(AtomicUsize::new(0));
        let mut rows = StreamingRowSet::new();
        rows.append_response(
            Box::new(CountingBody {
                records: records.into_iter(),
                pulls: Arc::clone(&pulls),
            }),
            &Deadline::new(None),
        )
        .await
        .expect("start record");
        assert_eq!(pulls.load(Ordering::SeqCst), 1);

        let mut consumed = 0usize;
        while let Some(row) = rows.next_row().await.expect("row") {
            assert_eq!(row, vec![Value::Int(consumed as i64)]);
            consumed += 1;
            // START plus only the DATA records needed so far
            assert_eq!(
                pulls.load(Ordering::SeqCst),
                1 + consumed.div_ceil(BATCH_ROWS),
                "after {consumed} rows"
            );
        }
        assert_eq!(consumed, BATCHES * BATCH_ROWS);
        assert_eq!(pulls.load(Ordering::SeqCst), BATCHES + 2);
        assert_eq!(rows.row_count(), (BATCHES * BATCH_ROWS) as i64);
    }

    #[tokio::test]
    async fn failure_keeps_close_errors() {
        let closes = Arc::new(AtomicUsize::new(0));
        let body = [START, r#"{"message_type":"DATA","data":[[1]]}"#].join("\n");
        let mut rows = StreamingRowSet::new();
        rows.append_response(
            Box::new(ChunkedBody {
                chunks: vec![Bytes::from(body)],
                closes: Arc::clone(&closes),
                fail_close: true,
            }),
            &Deadline::new(None),
        )
        .await
        .expect("start record");
        assert!(rows.next_row().await.expect("row").is_some());

        let err = rows.next_row().await.expect_err("truncated");
        match err {
            FireboltError::Aggregate { errors, .. } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0]
                    .to_string()
                    .contains("Unexpected end of response stream"));
                assert_eq!(errors[1].to_string(), "operational error: close failed");
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_utf8_is_operational_error() {
        let mut line = br#"{"message_type":"DATA","data":[[""#.to_vec();
        line.extend_from_slice(&[0xff, 0xfe]);
        line.extend_from_slice(b"\"]]}\n");
        let closes = Arc::new(AtomicUsize::new(0));
        let mut rows = StreamingRowSet::new();
        rows.append_response(
            Box::new(ChunkedBody {
                chunks: vec![Bytes::from(format!("{START}\n")), Bytes::from(line)],
                closes: Arc::clone(&closes),
                fail_close: false,
            }),
            &Deadline::new(None),
        )
        .await
        .expect("start record");
        let err = rows.next_row().await.expect_err("must fail");
        assert!(matches!(err, FireboltError::Operational(ref message) if message.contains("UTF-8")));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
