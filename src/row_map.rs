//! Name-based access to fetched rows.
//!
//! Enabled with the `row-map` feature.

use bigdecimal::BigDecimal;

use crate::{Column, Value};

/// A fetched row paired with the columns of its result set.
#[derive(Debug)]
pub struct RowRef<'a> {
    /// Result-set columns aligned with `values`.
    pub columns: &'a [Column],
    /// Row values aligned with `columns`.
    pub values: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn new(columns: &'a [Column], values: &'a [Value]) -> Self {
        Self { columns, values }
    }

    /// Returns a value by case-insensitive column name.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        let idx = self
            .columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    pub fn get_text(&self, name: &str) -> Option<&'a str> {
        self.get(name)?.as_str()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    pub fn get_decimal(&self, name: &str) -> Option<&'a BigDecimal> {
        match self.get(name)? {
            Value::Decimal(value) => Some(value),
            _ => None,
        }
    }
}
