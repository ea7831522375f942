use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use url::Url;

use crate::{FireboltError, Result};

pub const UPDATE_ENDPOINT_HEADER: &str = "Firebolt-Update-Endpoint";
pub const UPDATE_PARAMETERS_HEADER: &str = "Firebolt-Update-Parameters";
pub const REMOVE_PARAMETERS_HEADER: &str = "Firebolt-Remove-Parameters";
pub const RESET_SESSION_HEADER: &str = "Firebolt-Reset-Session";

const DATABASE: &str = "database";
const ENGINE: &str = "engine";
const TRANSACTION_ID: &str = "transaction_id";
const TRANSACTION_SEQUENCE_ID: &str = "transaction_sequence_id";

/// Keys that must be changed with `USE <KEY>` rather than `SET`.
pub(crate) const USE_PARAMETERS: [&str; 2] = [DATABASE, ENGINE];
/// Keys only the client or server may set.
pub(crate) const DISALLOWED_PARAMETERS: [&str; 1] = ["output_format"];

/// Routing, `SET` parameters and transaction identifiers shared by every
/// cursor of one connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionState {
    pub engine_url: String,
    pub database: Option<String>,
    pub engine: Option<String>,
    /// User parameters; never holds routing or transaction keys.
    pub set_parameters: BTreeMap<String, String>,
    pub in_transaction: bool,
    pub transaction_id: Option<String>,
    pub transaction_sequence_id: Option<String>,
}

impl SessionState {
    pub fn new(engine_url: &str, database: Option<String>) -> Self {
        Self {
            engine_url: fix_url_scheme(engine_url.trim()).trim_end_matches('/').to_owned(),
            database,
            ..Self::default()
        }
    }

    /// Query-string parameters carried by every request of this session.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.set_parameters.len() + 4);
        if let Some(database) = &self.database {
            params.push((DATABASE.to_owned(), database.clone()));
        }
        if let Some(engine) = &self.engine {
            params.push((ENGINE.to_owned(), engine.clone()));
        }
        params.extend(
            self.set_parameters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        if let Some(id) = &self.transaction_id {
            params.push((TRANSACTION_ID.to_owned(), id.clone()));
        }
        if let Some(sequence_id) = &self.transaction_sequence_id {
            params.push((TRANSACTION_SEQUENCE_ID.to_owned(), sequence_id.clone()));
        }
        params
    }

    /// Stores one parameter, routing reserved keys to their dedicated fields.
    pub fn apply_parameter(&mut self, key: &str, value: &str) {
        match key {
            DATABASE => self.database = Some(value.to_owned()),
            ENGINE => self.engine = Some(value.to_owned()),
            TRANSACTION_ID => {
                self.transaction_id = Some(value.to_owned());
                self.in_transaction = true;
            }
            TRANSACTION_SEQUENCE_ID => self.transaction_sequence_id = Some(value.to_owned()),
            _ => {
                self.set_parameters.insert(key.to_owned(), value.to_owned());
            }
        }
    }

    pub fn remove_parameter(&mut self, key: &str) {
        match key {
            DATABASE => self.database = None,
            ENGINE => self.engine = None,
            TRANSACTION_ID => self.end_transaction(),
            TRANSACTION_SEQUENCE_ID => self.transaction_sequence_id = None,
            _ => {
                self.set_parameters.remove(key);
            }
        }
    }

    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
    }

    pub fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.transaction_id = None;
        self.transaction_sequence_id = None;
    }

    /// Drops every user `SET` parameter.
    pub fn flush_parameters(&mut self) {
        self.set_parameters.clear();
    }

    /// Engine name: the `engine` parameter, else the first label of the
    /// engine host with `-` replaced by `_`.
    pub fn engine_name(&self) -> String {
        if let Some(engine) = self.engine.as_deref().filter(|engine| !engine.is_empty()) {
            return engine.to_owned();
        }
        Url::parse(&self.engine_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_default()
            .split('.')
            .next()
            .unwrap_or_default()
            .replace('-', "_")
    }

    /// Applies the session-update headers of a successful response.
    pub fn apply_headers(&mut self, headers: &HeaderMap) -> Result<()> {
        if headers.contains_key(RESET_SESSION_HEADER) {
            #[cfg(feature = "tracing")]
            tracing::debug!("resetting session parameters");
            self.set_parameters.clear();
        }

        if let Some(endpoint) = header_str(headers, UPDATE_ENDPOINT_HEADER)? {
            let (engine_url, params) = parse_update_endpoint(endpoint)?;
            #[cfg(feature = "tracing")]
            tracing::debug!(%engine_url, "switching engine endpoint");
            self.engine_url = engine_url;
            for (key, value) in params {
                self.apply_parameter(&key, &value);
            }
        }

        if let Some(update) = header_str(headers, UPDATE_PARAMETERS_HEADER)? {
            for (key, value) in parse_update_parameters(update) {
                #[cfg(feature = "tracing")]
                tracing::debug!(%key, %value, "updating session parameter");
                self.apply_parameter(&key, &value);
            }
        }

        if let Some(remove) = header_str(headers, REMOVE_PARAMETERS_HEADER)? {
            for key in remove.split(',').map(str::trim).filter(|key| !key.is_empty()) {
                #[cfg(feature = "tracing")]
                tracing::debug!(%key, "removing session parameter");
                self.remove_parameter(key);
            }
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| {
                FireboltError::Operational(format!("invalid {name} header: not valid text"))
            })
        })
        .transpose()
}

pub(crate) fn fix_url_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_owned()
    } else {
        format!("https://{}", url.trim_start_matches("//"))
    }
}

/// Splits an endpoint URL into `scheme://host[:port]` and its query
/// parameters.
fn parse_update_endpoint(header: &str) -> Result<(String, Vec<(String, String)>)> {
    let url = Url::parse(&fix_url_scheme(header.trim())).map_err(|err| {
        FireboltError::Operational(format!(
            "invalid {UPDATE_ENDPOINT_HEADER} header '{header}': {err}"
        ))
    })?;
    let host = url.host_str().ok_or_else(|| {
        FireboltError::Operational(format!(
            "invalid {UPDATE_ENDPOINT_HEADER} header '{header}': missing host"
        ))
    })?;
    let engine_url = match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };
    let params = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    Ok((engine_url, params))
}

/// Parses `key1=value1,key2=value2`, trimming whitespace around keys and
/// values. Items without `=` are ignored.
fn parse_update_parameters(header: &str) -> Vec<(String, String)> {
    header
        .split(',')
        .filter_map(|item| item.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
