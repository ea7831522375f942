//! `firebolt-http` is a cursor-style client for the Firebolt HTTP query API.
//!
//! A [`Connection`] holds the session shared by its cursors; a [`Cursor`]
//! runs statements and walks their result sets:
//! - [`Cursor::execute`] / [`Cursor::execute_with`]
//! - [`Cursor::execute_many`]
//! - [`Cursor::fetch_one`], [`Cursor::fetch_many`], [`Cursor::fetch_all`]
//! - [`Cursor::next_set`]
//!
//! Results are read either as one buffered JSON document or, with
//! [`ExecuteOptions::streaming`], as JSON lines decoded while the response
//! streams in. [`blocking`] offers the same API without `async`.

mod client;
mod connection;
mod cursor;
mod decode;
mod error;
mod options;
mod params;
mod row_set;
mod types;
mod value;

pub mod blocking;
pub mod formatter;
pub mod planner;
pub mod session;
pub mod transport;
pub mod wire;

#[cfg(feature = "row-map")]
pub mod row_map;

pub use client::HttpTransport;
pub use connection::Connection;
pub use cursor::{Cursor, CursorState};
pub use decode::{decode_value, format_value, to_json_parameter};
pub use error::{ErrorEntry, ErrorKind, FireboltError};
pub use options::{ConnectionOptions, ExecuteOptions, Paramstyle};
pub use params::Params;
pub use types::{parse_type, Column, ColumnType, Statistics};
pub use value::Value;

pub type Result<T> = std::result::Result<T, FireboltError>;

/// One decoded result row, aligned with the result-set columns.
pub type Row = Vec<Value>;
