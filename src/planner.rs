use serde_json::json;

use crate::{
    decode::to_json_parameter,
    formatter::{
        renumber_placeholders, split_statements, substitute_placeholders, transaction_command,
        try_parse_set, SetParameter, TransactionCommand,
    },
    wire::{JSON_LINES_OUTPUT_FORMAT, JSON_OUTPUT_FORMAT},
    ExecuteOptions, FireboltError, Params, Paramstyle, Result,
};

/// One unit of an [`ExecutionPlan`], executed in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlannedUnit {
    /// SQL text sent verbatim.
    Sql(String),
    /// Intercepted `SET`, validated then stored in the session.
    Set(SetParameter),
    /// Transaction control statement and its SQL text.
    Transaction(TransactionCommand, String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionPlan {
    pub units: Vec<PlannedUnit>,
    pub query_params: Vec<(String, String)>,
    pub is_multi_statement: bool,
    pub async_execution: bool,
    pub streaming: bool,
}

/// Turns a query and its parameter sets into an [`ExecutionPlan`].
pub trait StatementPlanner: Send + Sync {
    fn create_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        options: &ExecuteOptions,
    ) -> Result<ExecutionPlan> {
        if options.bulk_insert {
            validate_bulk_insert(query)?;
            if parameter_sets.is_empty() {
                return Err(FireboltError::Programming(
                    "bulk_insert requires at least one parameter set".to_owned(),
                ));
            }
            self.bulk_plan(query, parameter_sets, options.async_execution)
        } else {
            self.standard_plan(query, parameter_sets, options)
        }
    }

    fn standard_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        options: &ExecuteOptions,
    ) -> Result<ExecutionPlan>;

    fn bulk_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        async_execution: bool,
    ) -> Result<ExecutionPlan>;
}

/// Returns the planner for a parameter style.
pub fn planner_for(paramstyle: Paramstyle) -> Box<dyn StatementPlanner> {
    match paramstyle {
        Paramstyle::Qmark => Box::new(QmarkPlanner),
        Paramstyle::FbNumeric => Box::new(FbNumericPlanner),
    }
}

fn validate_bulk_insert(query: &str) -> Result<()> {
    let normalized = query.trim_start().to_ascii_lowercase();
    if !normalized.starts_with("insert") {
        return Err(FireboltError::Configuration(
            "bulk_insert is only supported for INSERT statements".to_owned(),
        ));
    }
    if query.trim().trim_end_matches(';').contains(';') {
        return Err(FireboltError::Programming(
            "bulk_insert does not support multi-statement queries".to_owned(),
        ));
    }
    Ok(())
}

fn output_format(streaming: bool) -> &'static str {
    if streaming {
        JSON_LINES_OUTPUT_FORMAT
    } else {
        JSON_OUTPUT_FORMAT
    }
}

fn base_query_params(streaming: bool, async_execution: bool) -> Vec<(String, String)> {
    let mut params = vec![("output_format".to_owned(), output_format(streaming).to_owned())];
    if async_execution {
        params.push(("async".to_owned(), "true".to_owned()));
    }
    params
}

fn classify(statement: String) -> Result<PlannedUnit> {
    if let Some(set) = try_parse_set(&statement)? {
        return Ok(PlannedUnit::Set(set));
    }
    Ok(match transaction_command(&statement) {
        Some(command) => PlannedUnit::Transaction(command, statement),
        None => PlannedUnit::Sql(statement),
    })
}

/// Client-side substitution of `?` placeholders.
#[derive(Clone, Copy, Debug, Default)]
pub struct QmarkPlanner;

impl QmarkPlanner {
    fn split_format_sql(&self, query: &str, parameter_sets: &[Params]) -> Result<Vec<PlannedUnit>> {
        let mut statements = split_statements(query);
        if parameter_sets.is_empty() {
            return statements.into_iter().map(classify).collect();
        }

        if statements.len() > 1 {
            return Err(FireboltError::NotSupported(
                "Formatting multi-statement queries is not supported.".to_owned(),
            ));
        }
        let statement = statements.pop().unwrap_or_default();
        if try_parse_set(&statement)?.is_some() {
            return Err(FireboltError::NotSupported(
                "Formatting set statements is not supported.".to_owned(),
            ));
        }
        parameter_sets
            .iter()
            .map(|params| substitute_placeholders(&statement, params.values()).map(PlannedUnit::Sql))
            .collect()
    }
}

impl StatementPlanner for QmarkPlanner {
    fn standard_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        options: &ExecuteOptions,
    ) -> Result<ExecutionPlan> {
        let units = if options.skip_parsing {
            vec![PlannedUnit::Sql(query.to_owned())]
        } else {
            self.split_format_sql(query, parameter_sets)?
        };
        if units.len() > 1 && options.async_execution {
            return Err(FireboltError::General(
                "Server side async does not support multi-statement queries".to_owned(),
            ));
        }
        Ok(ExecutionPlan {
            is_multi_statement: units.len() > 1,
            units,
            query_params: base_query_params(options.streaming, options.async_execution),
            async_execution: options.async_execution,
            streaming: options.streaming,
        })
    }

    fn bulk_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        async_execution: bool,
    ) -> Result<ExecutionPlan> {
        let statement = split_statements(query)
            .into_iter()
            .next()
            .unwrap_or_default();
        let inserts = parameter_sets
            .iter()
            .map(|params| substitute_placeholders(&statement, params.values()))
            .collect::<Result<Vec<_>>>()?;
        Ok(ExecutionPlan {
            units: vec![PlannedUnit::Sql(inserts.join("; "))],
            query_params: base_query_params(false, async_execution),
            is_multi_statement: false,
            async_execution,
            streaming: false,
        })
    }
}

/// Server-side `$n` parameters sent as a JSON `query_parameters` array.
///
/// Without `bulk_insert`, only the first parameter set is sent; the rest are
/// ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct FbNumericPlanner;

impl FbNumericPlanner {
    fn query_params(
        &self,
        parameters: &[crate::Value],
        streaming: bool,
        async_execution: bool,
    ) -> Result<Vec<(String, String)>> {
        let mut params = base_query_params(streaming, async_execution);
        if !parameters.is_empty() {
            let entries = parameters
                .iter()
                .enumerate()
                .map(|(index, value)| -> Result<serde_json::Value> {
                    Ok(json!({
                        "name": format!("${}", index + 1),
                        "value": to_json_parameter(value)?,
                    }))
                })
                .collect::<Result<Vec<_>>>()?;
            let encoded = serde_json::to_string(&entries).map_err(|err| {
                FireboltError::Data(format!("unable to serialize query parameters: {err}"))
            })?;
            params.push(("query_parameters".to_owned(), encoded));
        }
        Ok(params)
    }
}

impl StatementPlanner for FbNumericPlanner {
    fn standard_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        options: &ExecuteOptions,
    ) -> Result<ExecutionPlan> {
        let first = parameter_sets.first().map(Params::values).unwrap_or_default();
        let unit = match transaction_command(query).filter(|_| first.is_empty()) {
            Some(command) => PlannedUnit::Transaction(command, query.trim().to_owned()),
            None => PlannedUnit::Sql(query.to_owned()),
        };
        Ok(ExecutionPlan {
            units: vec![unit],
            query_params: self.query_params(first, options.streaming, options.async_execution)?,
            is_multi_statement: false,
            async_execution: options.async_execution,
            streaming: options.streaming,
        })
    }

    fn bulk_plan(
        &self,
        query: &str,
        parameter_sets: &[Params],
        async_execution: bool,
    ) -> Result<ExecutionPlan> {
        let statement = query.trim().trim_end_matches(';').trim_end();
        let mut inserts = Vec::with_capacity(parameter_sets.len());
        let mut flattened = Vec::new();
        for params in parameter_sets {
            inserts.push(renumber_placeholders(statement, flattened.len())?);
            flattened.extend(params.values().iter().cloned());
        }
        Ok(ExecutionPlan {
            units: vec![PlannedUnit::Sql(inserts.join("; "))],
            query_params: self.query_params(&flattened, false, async_execution)?,
            is_multi_statement: false,
            async_execution,
            streaming: false,
        })
    }
}
