use serde_json::Value as JsonValue;

use super::{decode_row, no_rows_to_fetch};
use crate::{
    transport::{read_to_end, Deadline, ResponseBody},
    wire::QueryData,
    Column, FireboltError, Result, Row, Statistics,
};

struct ResultSet {
    row_count: i64,
    columns: Vec<Column>,
    statistics: Option<Statistics>,
    /// `None` for statements without a tabular result.
    rows: Option<Vec<Vec<JsonValue>>>,
}

impl ResultSet {
    fn empty() -> Self {
        Self {
            row_count: -1,
            columns: Vec::new(),
            statistics: None,
            rows: None,
        }
    }
}

/// Buffers each response as one `JSON_Compact` document.
pub(crate) struct InMemoryRowSet {
    sets: Vec<ResultSet>,
    current: usize,
    next_row: usize,
}

impl InMemoryRowSet {
    pub(crate) fn new() -> Self {
        Self {
            sets: Vec::new(),
            current: 0,
            next_row: 0,
        }
    }

    fn current(&self) -> Option<&ResultSet> {
        self.sets.get(self.current)
    }

    pub(crate) fn columns(&self) -> Option<&[Column]> {
        self.current().map(|set| set.columns.as_slice())
    }

    pub(crate) fn row_count(&self) -> i64 {
        self.current().map_or(-1, |set| set.row_count)
    }

    /// Row count of the most recently appended result set.
    pub(crate) fn last_row_count(&self) -> i64 {
        self.sets.last().map_or(-1, |set| set.row_count)
    }

    pub(crate) fn statistics(&self) -> Option<&Statistics> {
        self.current().and_then(|set| set.statistics.as_ref())
    }

    /// Reads the whole body, always releasing it, and appends its result set.
    pub(crate) async fn append_response(
        &mut self,
        mut body: Box<dyn ResponseBody>,
        deadline: &Deadline,
    ) -> Result<()> {
        let content = deadline.run(read_to_end(&mut *body)).await;
        let closed = body.close().await;
        let content = content?;
        closed?;
        self.sets.push(parse_query_data(&content)?);
        Ok(())
    }

    pub(crate) fn append_empty_response(&mut self) {
        self.sets.push(ResultSet::empty());
    }

    pub(crate) fn nextset(&mut self) -> bool {
        if self.current + 1 < self.sets.len() {
            self.current += 1;
            self.next_row = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn next_row(&mut self) -> Result<Option<Row>> {
        let set = self.sets.get(self.current).ok_or_else(no_rows_to_fetch)?;
        let rows = set.rows.as_ref().ok_or_else(no_rows_to_fetch)?;
        let Some(raw) = rows.get(self.next_row) else {
            return Ok(None);
        };
        self.next_row += 1;
        decode_row(&set.columns, raw.clone()).map(Some)
    }

    pub(crate) fn close(&mut self) {
        self.sets.clear();
        self.current = 0;
        self.next_row = 0;
    }
}

fn parse_query_data(content: &[u8]) -> Result<ResultSet> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(ResultSet::empty());
    }
    let data: QueryData = serde_json::from_slice(content)
        .map_err(|err| FireboltError::Data(format!("Invalid query data format: {err}")))?;
    Ok(ResultSet {
        row_count: data.data.len() as i64,
        columns: data
            .meta
            .iter()
            .map(|column| Column::from_wire(column.name.as_str(), &column.type_name))
            .collect(),
        statistics: data.statistics,
        rows: Some(data.data),
    })
}
