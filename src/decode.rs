use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::{ColumnType, FireboltError, Value};

const BYTEA_PREFIX: &str = "\\x";
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_TZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// Decodes one raw wire cell against its declared column type.
pub fn decode_value(raw: &JsonValue, type_: &ColumnType) -> Result<Value, FireboltError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match type_ {
        ColumnType::Int => decode_int(raw),
        ColumnType::Float => decode_float(raw),
        ColumnType::Text => Ok(Value::Text(match raw {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        })),
        ColumnType::Boolean => match raw {
            JsonValue::Bool(value) => Ok(Value::Boolean(*value)),
            JsonValue::Number(number) => match number.as_i64() {
                Some(0) => Ok(Value::Boolean(false)),
                Some(1) => Ok(Value::Boolean(true)),
                _ => Err(invalid(raw, "boolean", "bool or 0/1 expected")),
            },
            _ => Err(invalid(raw, "boolean", "bool or 0/1 expected")),
        },
        ColumnType::Decimal { .. } => {
            let text = match raw {
                JsonValue::String(text) => text.clone(),
                JsonValue::Number(number) => number.to_string(),
                _ => return Err(invalid(raw, "decimal", "str or number expected")),
            };
            BigDecimal::from_str(text.trim())
                .map(Value::Decimal)
                .map_err(|err| FireboltError::Data(format!("invalid decimal value '{text}': {err}")))
        }
        ColumnType::Date => {
            let text = expect_str(raw, "date")?;
            parse_date(text)
        }
        ColumnType::Timestamp | ColumnType::TimestampTz => {
            let text = expect_str(raw, "timestamp")?;
            parse_datetime(text)
        }
        ColumnType::Bytes => {
            let text = expect_str(raw, "bytea")?;
            parse_bytea(text).map(Value::Bytes)
        }
        ColumnType::Array(inner) => match raw {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| decode_value(item, inner))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(invalid(raw, "array", "list expected")),
        },
        ColumnType::Struct(fields) => decode_struct(raw, fields),
    }
}

fn decode_int(raw: &JsonValue) -> Result<Value, FireboltError> {
    match raw {
        JsonValue::Number(number) => number
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| invalid(raw, "integer", "64-bit integer expected")),
        JsonValue::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|err| FireboltError::Data(format!("invalid integer value '{text}': {err}"))),
        _ => Err(invalid(raw, "integer", "number expected")),
    }
}

fn decode_float(raw: &JsonValue) -> Result<Value, FireboltError> {
    match raw {
        JsonValue::Number(number) => number
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| invalid(raw, "float", "number expected")),
        JsonValue::String(text) => parse_float(text).map(Value::Float),
        _ => Err(invalid(raw, "float", "number expected")),
    }
}

/// Parses a float, accepting the `inf`, `-inf` and `nan` tokens the server
/// sends in place of non-finite JSON numbers.
fn parse_float(text: &str) -> Result<f64, FireboltError> {
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    if unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity") {
        return Ok(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    if unsigned.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    trimmed
        .parse::<f64>()
        .map_err(|err| FireboltError::Data(format!("invalid float value '{text}': {err}")))
}

fn decode_struct(
    raw: &JsonValue,
    fields: &[(String, ColumnType)],
) -> Result<Value, FireboltError> {
    match raw {
        JsonValue::Object(object) => fields
            .iter()
            .map(|(name, type_)| {
                let field = object.get(name).unwrap_or(&JsonValue::Null);
                Ok((name.clone(), decode_value(field, type_)?))
            })
            .collect::<Result<Vec<_>, FireboltError>>()
            .map(Value::Struct),
        JsonValue::Array(items) if items.len() == fields.len() => fields
            .iter()
            .zip(items)
            .map(|((name, type_), item)| Ok((name.clone(), decode_value(item, type_)?)))
            .collect::<Result<Vec<_>, FireboltError>>()
            .map(Value::Struct),
        _ => Err(invalid(raw, "struct", "object expected")),
    }
}

fn expect_str<'a>(raw: &'a JsonValue, kind: &str) -> Result<&'a str, FireboltError> {
    raw.as_str()
        .ok_or_else(|| invalid(raw, kind, "str expected"))
}

fn invalid(raw: &JsonValue, kind: &str, expected: &str) -> FireboltError {
    FireboltError::Data(format!("invalid {kind} value {raw}: {expected}"))
}

fn parse_bytea(text: &str) -> Result<Vec<u8>, FireboltError> {
    let hex_digits = text.strip_prefix(BYTEA_PREFIX).ok_or_else(|| {
        FireboltError::Data(format!(
            "invalid bytea value format: {BYTEA_PREFIX} prefix expected"
        ))
    })?;
    hex::decode(hex_digits)
        .map_err(|err| FireboltError::Data(format!("invalid bytea value '{text}': {err}")))
}

fn parse_date(text: &str) -> Result<Value, FireboltError> {
    if let Ok(date) = NaiveDate::parse_from_str(text.trim(), DATE_FORMAT) {
        return Ok(Value::Date(date));
    }
    match parse_datetime(text)? {
        Value::Timestamp(datetime) => Ok(Value::Date(datetime.date())),
        Value::TimestampTz(datetime) => Ok(Value::Date(datetime.date_naive())),
        _ => Err(FireboltError::Data(format!("invalid date value '{text}'"))),
    }
}

/// Parses the server's timestamp profile: fractional seconds of 1–6 digits and
/// an optional `+HH` offset are normalised before handing off to chrono.
fn parse_datetime(text: &str) -> Result<Value, FireboltError> {
    let normalized = normalize_datetime(text.trim());
    let error = |err: chrono::ParseError| {
        FireboltError::Data(format!("invalid timestamp value '{text}': {err}"))
    };
    if normalized.has_offset {
        DateTime::parse_from_str(&normalized.text, DATETIME_TZ_FORMAT)
            .map(Value::TimestampTz)
            .map_err(error)
    } else {
        NaiveDateTime::parse_from_str(&normalized.text, DATETIME_FORMAT)
            .map(Value::Timestamp)
            .or_else(|err| {
                NaiveDate::parse_from_str(&normalized.text, DATE_FORMAT)
                    .map(|date| Value::Timestamp(date.and_time(chrono::NaiveTime::MIN)))
                    .map_err(|_| error(err))
            })
    }
}

struct NormalizedDatetime {
    text: String,
    has_offset: bool,
}

fn normalize_datetime(text: &str) -> NormalizedDatetime {
    // date part is fixed width; everything after the separator is the time
    let (date, time) = match text.char_indices().nth(10) {
        Some((index, sep)) if sep == 'T' || sep == ' ' => (&text[..index], &text[index + 1..]),
        _ => {
            return NormalizedDatetime {
                text: text.to_owned(),
                has_offset: false,
            }
        }
    };

    let (clock, offset) = match time.rfind(['+', '-']) {
        Some(index) => (&time[..index], Some(&time[index..])),
        None => match time.strip_suffix('Z') {
            Some(clock) => (clock, Some("+00")),
            None => (time, None),
        },
    };

    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(date);
    out.push(' ');
    match clock.split_once('.') {
        Some((whole, fraction)) if fraction.len() < 6 => {
            out.push_str(whole);
            out.push('.');
            out.push_str(fraction);
            out.extend(std::iter::repeat('0').take(6 - fraction.len()));
        }
        _ => out.push_str(clock),
    }

    if let Some(offset) = offset {
        let digits = &offset[1..];
        out.push_str(&offset[..1]);
        match digits.len() {
            2 => {
                out.push_str(digits);
                out.push_str(":00");
            }
            4 if digits.bytes().all(|byte| byte.is_ascii_digit()) => {
                out.push_str(&digits[..2]);
                out.push(':');
                out.push_str(&digits[2..]);
            }
            _ => out.push_str(digits),
        }
    }

    NormalizedDatetime {
        text: out,
        has_offset: offset.is_some(),
    }
}

/// Renders a parameter as a SQL literal for client-side substitution.
pub fn format_value(value: &Value) -> Result<String, FireboltError> {
    Ok(match value {
        Value::Null => "NULL".to_owned(),
        Value::Boolean(value) => if *value { "true" } else { "false" }.to_owned(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => format_float(*value),
        Value::Decimal(value) => value.to_plain_string(),
        Value::Text(value) => quote(&escape(value)),
        Value::Date(value) => quote(&value.format(DATE_FORMAT).to_string()),
        Value::Timestamp(_) | Value::TimestampTz(_) => quote(&format_temporal(value)),
        Value::Bytes(bytes) => {
            let mut literal = String::with_capacity(bytes.len() * 4 + 3);
            literal.push_str("E'");
            for byte in bytes {
                literal.push_str(&format!("\\x{byte:02x}"));
            }
            literal.push('\'');
            literal
        }
        Value::Array(items) => {
            let items = items
                .iter()
                .map(format_value)
                .collect::<Result<Vec<_>, _>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Struct(_) => {
            return Err(FireboltError::Data(
                "unsupported parameter type struct".to_owned(),
            ))
        }
    })
}

/// Converts a parameter into the JSON shape of a `query_parameters` entry.
///
/// Temporal values become strings formatted like their SQL literal; other
/// values keep their JSON structure.
pub fn to_json_parameter(value: &Value) -> Result<JsonValue, FireboltError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(value) => JsonValue::Bool(*value),
        Value::Int(value) => JsonValue::from(*value),
        Value::Float(value) => serde_json::Number::from_f64(*value)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(format_float(*value))),
        Value::Decimal(value) => JsonValue::String(value.to_plain_string()),
        Value::Text(value) => JsonValue::String(value.clone()),
        Value::Date(value) => JsonValue::String(value.format(DATE_FORMAT).to_string()),
        Value::Timestamp(_) | Value::TimestampTz(_) => JsonValue::String(format_temporal(value)),
        Value::Bytes(bytes) => JsonValue::String(format!("{BYTEA_PREFIX}{}", hex::encode(bytes))),
        Value::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(to_json_parameter)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Struct(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(name, value)| Ok((name.clone(), to_json_parameter(value)?)))
                .collect::<Result<serde_json::Map<_, _>, FireboltError>>()?,
        ),
    })
}

fn format_temporal(value: &Value) -> String {
    match value {
        Value::Timestamp(value) => value.format(DATETIME_FORMAT).to_string(),
        Value::TimestampTz(value) => value
            .with_timezone(&Utc)
            .naive_utc()
            .format(DATETIME_FORMAT)
            .to_string(),
        _ => String::new(),
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else {
        format!("{value:?}")
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\0' => escaped.push_str("\\0"),
            '\'' => escaped.push_str("''"),
            '\\' => escaped.push_str("\\\\"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn quote(value: &str) -> String {
    format!("'{value}'")
}
