//! Result-set containers behind the cursor.
//!
//! Both variants hold an ordered sequence of result sets, one per executed
//! statement, and decode rows lazily when they are fetched.

mod in_memory;
mod streaming;

use serde_json::Value as JsonValue;

pub(crate) use in_memory::InMemoryRowSet;
pub(crate) use streaming::StreamingRowSet;

use crate::{
    decode::decode_value,
    transport::{Deadline, ResponseBody},
    Column, FireboltError, Result, Row, Statistics,
};

pub(crate) fn no_rows_to_fetch() -> FireboltError {
    FireboltError::Data("no rows to fetch".to_owned())
}

pub(crate) fn decode_row(columns: &[Column], raw: Vec<JsonValue>) -> Result<Row> {
    if raw.len() != columns.len() {
        return Err(FireboltError::Data(format!(
            "row has {} values, expected {}",
            raw.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .zip(raw.iter())
        .map(|(column, cell)| decode_value(cell, &column.type_code))
        .collect()
}

pub(crate) enum RowSet {
    InMemory(InMemoryRowSet),
    Streaming(StreamingRowSet),
}

impl RowSet {
    pub(crate) fn new(streaming: bool) -> Self {
        if streaming {
            Self::Streaming(StreamingRowSet::new())
        } else {
            Self::InMemory(InMemoryRowSet::new())
        }
    }

    pub(crate) fn columns(&self) -> Option<&[Column]> {
        match self {
            Self::InMemory(rows) => rows.columns(),
            Self::Streaming(rows) => rows.columns(),
        }
    }

    pub(crate) fn row_count(&self) -> i64 {
        match self {
            Self::InMemory(rows) => rows.row_count(),
            Self::Streaming(rows) => rows.row_count(),
        }
    }

    /// Row count of the last statement executed. The streaming variant only
    /// knows the count of the current result set once it has been read.
    pub(crate) fn last_row_count(&self) -> i64 {
        match self {
            Self::InMemory(rows) => rows.last_row_count(),
            Self::Streaming(rows) => rows.row_count(),
        }
    }

    pub(crate) fn statistics(&self) -> Option<&Statistics> {
        match self {
            Self::InMemory(rows) => rows.statistics(),
            Self::Streaming(rows) => rows.statistics(),
        }
    }

    pub(crate) fn query_id(&self) -> Option<&str> {
        match self {
            Self::InMemory(_) => None,
            Self::Streaming(rows) => rows.query_id(),
        }
    }

    pub(crate) async fn append_response(
        &mut self,
        body: Box<dyn ResponseBody>,
        deadline: &Deadline,
    ) -> Result<()> {
        match self {
            Self::InMemory(rows) => rows.append_response(body, deadline).await,
            Self::Streaming(rows) => rows.append_response(body, deadline).await,
        }
    }

    pub(crate) fn append_empty_response(&mut self) {
        match self {
            Self::InMemory(rows) => rows.append_empty_response(),
            Self::Streaming(rows) => rows.append_empty_response(),
        }
    }

    pub(crate) async fn nextset(&mut self) -> Result<bool> {
        match self {
            Self::InMemory(rows) => Ok(rows.nextset()),
            Self::Streaming(rows) => rows.nextset().await,
        }
    }

    /// Next decoded row of the current result set; `Ok(None)` once it is
    /// exhausted.
    pub(crate) async fn next_row(&mut self) -> Result<Option<Row>> {
        match self {
            Self::InMemory(rows) => rows.next_row(),
            Self::Streaming(rows) => rows.next_row().await,
        }
    }

    pub(crate) async fn close(&mut self) -> Result<()> {
        match self {
            Self::InMemory(rows) => {
                rows.close();
                Ok(())
            }
            Self::Streaming(rows) => rows.close().await,
        }
    }
}
