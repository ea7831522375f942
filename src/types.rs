use std::fmt;

use serde::Deserialize;

const NULLABLE_SUFFIX: &str = "null";
const ARRAY_PREFIX: &str = "array(";
const STRUCT_PREFIX: &str = "struct(";
const DECIMAL_PREFIXES: [&str; 2] = ["decimal(", "numeric("];

/// Semantic type of a result column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Date,
    /// Timestamp without a zone.
    Timestamp,
    /// Zone-aware timestamp.
    TimestampTz,
    Boolean,
    Bytes,
    Decimal { precision: u32, scale: u32 },
    Array(Box<ColumnType>),
    /// Ordered field name to type mapping.
    Struct(Vec<(String, ColumnType)>),
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("long"),
            Self::Float => f.write_str("double"),
            Self::Text => f.write_str("text"),
            Self::Date => f.write_str("date"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::TimestampTz => f.write_str("timestamptz"),
            Self::Boolean => f.write_str("boolean"),
            Self::Bytes => f.write_str("bytea"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision}, {scale})"),
            Self::Array(inner) => write!(f, "array({inner})"),
            Self::Struct(fields) => {
                f.write_str("struct(")?;
                for (index, (name, type_)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} {type_}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Parses a wire type name into a [`ColumnType`].
///
/// Never fails: unknown names map to [`ColumnType::Text`] so that newer
/// server types stay readable by older clients.
pub fn parse_type(raw_type: &str) -> ColumnType {
    let raw = raw_type.trim();
    let lower = raw.to_ascii_lowercase();

    if lower.starts_with(ARRAY_PREFIX) && lower.ends_with(')') {
        return ColumnType::Array(Box::new(parse_type(
            &raw[ARRAY_PREFIX.len()..raw.len() - 1],
        )));
    }

    for prefix in DECIMAL_PREFIXES {
        if lower.starts_with(prefix) && lower.ends_with(')') {
            if let Some(decimal) = parse_decimal_args(&raw[prefix.len()..raw.len() - 1]) {
                return decimal;
            }
        }
    }

    if lower.starts_with(STRUCT_PREFIX) && lower.ends_with(')') {
        if let Some(fields) = parse_struct_fields(&raw[STRUCT_PREFIX.len()..raw.len() - 1]) {
            return ColumnType::Struct(fields);
        }
    }

    if let Some(stripped) = strip_nullable(raw) {
        return parse_type(stripped);
    }

    match lower.as_str() {
        "int" | "integer" | "long" | "bigint" => ColumnType::Int,
        "float" | "double" | "double precision" | "real" => ColumnType::Float,
        "date" | "date_ext" | "pgdate" => ColumnType::Date,
        "timestamp" | "timestamp_ext" | "timestampntz" => ColumnType::Timestamp,
        "timestamptz" => ColumnType::TimestampTz,
        "boolean" => ColumnType::Boolean,
        "bytea" => ColumnType::Bytes,
        // text, geography, `Nothing` (select null) and anything unknown
        _ => ColumnType::Text,
    }
}

fn strip_nullable(raw: &str) -> Option<&str> {
    let split = raw.len().checked_sub(NULLABLE_SUFFIX.len()).filter(|&at| at > 0)?;
    // `get` is `None` when the split falls inside a multi-byte char
    let (head, tail) = (raw.get(..split)?, raw.get(split..)?);
    if tail.eq_ignore_ascii_case(NULLABLE_SUFFIX) && head.ends_with(' ') {
        Some(head.trim_end())
    } else {
        None
    }
}

fn parse_decimal_args(args: &str) -> Option<ColumnType> {
    let (precision, scale) = args.split_once(',')?;
    Some(ColumnType::Decimal {
        precision: precision.trim().parse().ok()?,
        scale: scale.trim().parse().ok()?,
    })
}

fn parse_struct_fields(inner: &str) -> Option<Vec<(String, ColumnType)>> {
    split_top_level(inner)
        .into_iter()
        .map(|field| {
            let (name, type_) = split_struct_field(field)?;
            Some((name.to_owned(), parse_type(type_)))
        })
        .collect()
}

/// Splits on commas that are not nested inside parentheses.
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in raw.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(raw[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(raw[start..].trim());
    parts
}

/// Splits `name type` or `` `quoted name` type`` into its two halves.
fn split_struct_field(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('`') {
        let end = rest.find('`')?;
        let type_ = rest[end + 1..].trim();
        return (!type_.is_empty()).then(|| (&rest[..end], type_));
    }
    let (name, type_) = raw.split_once(' ')?;
    let type_ = type_.trim();
    (!name.is_empty() && !type_.is_empty()).then_some((name, type_))
}

/// Result column description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_code: ColumnType,
    pub display_size: Option<u32>,
    pub internal_size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: Option<bool>,
}

impl Column {
    /// Builds a column from its name and raw wire type.
    pub fn from_wire(name: impl Into<String>, raw_type: &str) -> Self {
        let type_code = parse_type(raw_type);
        let (precision, scale) = match type_code {
            ColumnType::Decimal { precision, scale } => (Some(precision), Some(scale)),
            _ => (None, None),
        };
        Self {
            name: name.into(),
            nullable: Some(strip_nullable(raw_type.trim()).is_some()),
            type_code,
            display_size: None,
            internal_size: None,
            precision,
            scale,
        }
    }
}

/// Query execution statistics reported by the server.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Statistics {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub elapsed: f64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub rows_read: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub bytes_read: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub time_before_execution: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub time_to_execute: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub scanned_bytes_cache: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub scanned_bytes_storage: Option<f64>,
}

// Numbers are kept as text under `arbitrary_precision`; read them through
// `serde_json::Value` so any notation the server picks is accepted.
fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match &raw {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient_opt_f64(deserializer)?.unwrap_or_default())
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient_opt_f64(deserializer)?.map_or(0, |value| value as u64))
}

#[cfg(test)]
mod tests {
    use super::{parse_type, split_top_level, Column, ColumnType, Statistics};

    #[test]
    fn primitive_aliases() {
        assert_eq!(parse_type("bigint"), ColumnType::Int);
        assert_eq!(parse_type("double precision"), ColumnType::Float);
        assert_eq!(parse_type("pgdate"), ColumnType::Date);
        assert_eq!(parse_type("timestamp_ext"), ColumnType::Timestamp);
        assert_eq!(parse_type("timestamptz"), ColumnType::TimestampTz);
        assert_eq!(parse_type("bytea"), ColumnType::Bytes);
        assert_eq!(parse_type("geography"), ColumnType::Text);
        assert_eq!(parse_type("Nothing"), ColumnType::Text);
    }

    #[test]
    fn unknown_type_degrades_to_text() {
        assert_eq!(parse_type("hyperloglog(12)"), ColumnType::Text);
        assert_eq!(parse_type(""), ColumnType::Text);
        assert_eq!(parse_type("€€"), ColumnType::Text);
        assert_eq!(parse_type("geo€ null"), ColumnType::Text);
        assert_eq!(Column::from_wire("x", "ünknöwn").type_code, ColumnType::Text);
    }

    #[test]
    fn nullable_suffix_is_ignored() {
        assert_eq!(parse_type("int null"), ColumnType::Int);
        assert_eq!(
            parse_type("array(int null) null"),
            ColumnType::Array(Box::new(ColumnType::Int))
        );
    }

    #[test]
    fn nested_arrays_and_decimals() {
        assert_eq!(
            parse_type("array(array(int))"),
            ColumnType::Array(Box::new(ColumnType::Array(Box::new(ColumnType::Int))))
        );
        assert_eq!(
            parse_type("Decimal(38, 30)"),
            ColumnType::Decimal {
                precision: 38,
                scale: 30
            }
        );
        assert_eq!(
            parse_type("numeric(12,2) null"),
            ColumnType::Decimal {
                precision: 12,
                scale: 2
            }
        );
    }

    #[test]
    fn struct_with_nested_and_quoted_fields() {
        let parsed = parse_type("struct(id int, `full name` text null, s struct(a array(int), b decimal(5, 2)))");
        assert_eq!(
            parsed,
            ColumnType::Struct(vec![
                ("id".to_owned(), ColumnType::Int),
                ("full name".to_owned(), ColumnType::Text),
                (
                    "s".to_owned(),
                    ColumnType::Struct(vec![
                        ("a".to_owned(), ColumnType::Array(Box::new(ColumnType::Int))),
                        (
                            "b".to_owned(),
                            ColumnType::Decimal {
                                precision: 5,
                                scale: 2
                            }
                        ),
                    ])
                ),
            ])
        );
    }

    #[test]
    fn split_skips_nested_parentheses() {
        assert_eq!(
            split_top_level("a int, b struct(c int, d text), e decimal(3, 1)"),
            vec!["a int", "b struct(c int, d text)", "e decimal(3, 1)"]
        );
    }

    #[test]
    fn column_metadata_from_wire() {
        let column = Column::from_wire("price", "decimal(10, 2) null");
        assert_eq!(column.precision, Some(10));
        assert_eq!(column.scale, Some(2));
        assert_eq!(column.nullable, Some(true));

        let column = Column::from_wire("id", "int");
        assert_eq!(column.nullable, Some(false));
        assert_eq!(column.precision, None);
    }

    #[test]
    fn statistics_accept_any_number_notation() {
        let stats: Statistics = serde_json::from_str(
            r#"{"elapsed": 1e-05, "rows_read": 10, "bytes_read": "20", "time_before_execution": 0.5}"#,
        )
        .expect("valid statistics");
        assert_eq!(stats.elapsed, 0.00001);
        assert_eq!(stats.rows_read, 10);
        assert_eq!(stats.bytes_read, 20);
        assert_eq!(stats.scanned_bytes_cache, None);
    }
}
