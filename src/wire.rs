use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{ErrorEntry, FireboltError, Statistics};

pub const JSON_OUTPUT_FORMAT: &str = "JSON_Compact";
pub const JSON_LINES_OUTPUT_FORMAT: &str = "JSONLines_Compact";

#[derive(Debug, Deserialize)]
pub struct WireColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Buffered (`JSON_Compact`) response body of one statement.
#[derive(Debug, Deserialize)]
pub struct QueryData {
    pub meta: Vec<WireColumn>,
    pub data: Vec<Vec<JsonValue>>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
}

/// Reply to a statement submitted with `async=true`.
#[derive(Debug, Deserialize)]
pub struct AsyncResponse {
    pub token: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Start,
    Data,
    Success,
    Error,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Data => "DATA",
            Self::Success => "FINISH_SUCCESSFULLY",
            Self::Error => "FINISH_WITH_ERRORS",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "START" => Some(Self::Start),
            "DATA" => Some(Self::Data),
            "FINISH_SUCCESSFULLY" => Some(Self::Success),
            "FINISH_WITH_ERRORS" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRecord {
    pub result_columns: Vec<WireColumn>,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataRecord {
    pub data: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
pub struct SuccessRecord {
    #[serde(default)]
    pub statistics: Statistics,
}

#[derive(Debug, Deserialize)]
pub struct ErrorRecord {
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
}

/// One record of a `JSONLines_Compact` response.
#[derive(Debug)]
pub enum JsonLinesRecord {
    Start(StartRecord),
    Data(DataRecord),
    Success(SuccessRecord),
    Error(ErrorRecord),
}

impl JsonLinesRecord {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Start(_) => MessageType::Start,
            Self::Data(_) => MessageType::Data,
            Self::Success(_) => MessageType::Success,
            Self::Error(_) => MessageType::Error,
        }
    }
}

/// Parses one JSON line into a typed record.
///
/// The discriminator is read first and the payload decoded from the
/// intermediate value, which keeps number precision intact.
pub fn parse_json_lines_record(line: &str) -> Result<JsonLinesRecord, FireboltError> {
    let mut record: JsonValue = serde_json::from_str(line).map_err(|_| {
        FireboltError::Operational(format!("Invalid JSON line response format: {line}"))
    })?;
    let raw_type = record
        .as_object_mut()
        .and_then(|object| object.remove("message_type"))
        .ok_or_else(|| {
            FireboltError::Operational(
                "Invalid JSON lines record format: missing message_type".to_owned(),
            )
        })?;
    let message_type = raw_type
        .as_str()
        .and_then(MessageType::parse)
        .ok_or_else(|| FireboltError::Operational(format!("Unknown message type: {raw_type}")))?;

    let invalid = |err: serde_json::Error| {
        FireboltError::Operational(format!(
            "Invalid JSON lines {} record format: {err}",
            message_type.as_str()
        ))
    };
    Ok(match message_type {
        MessageType::Start => {
            JsonLinesRecord::Start(serde_json::from_value(record).map_err(invalid)?)
        }
        MessageType::Data => JsonLinesRecord::Data(serde_json::from_value(record).map_err(invalid)?),
        MessageType::Success => {
            JsonLinesRecord::Success(serde_json::from_value(record).map_err(invalid)?)
        }
        MessageType::Error => {
            JsonLinesRecord::Error(serde_json::from_value(record).map_err(invalid)?)
        }
    })
}
