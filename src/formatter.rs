use sqlparser::{
    dialect::GenericDialect,
    tokenizer::{Token, Tokenizer},
};

use crate::{decode::format_value, FireboltError, Value};

/// A `SET <name> = <value>` statement, sent out of band as a query parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetParameter {
    pub name: String,
    pub value: String,
}

/// Transaction control statement recognised client-side.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionCommand {
    Begin,
    Commit,
    Rollback,
}

fn tokenize(sql: &str) -> Result<Vec<Token>, FireboltError> {
    let dialect = GenericDialect {};
    Tokenizer::new(&dialect, sql)
        .with_unescape(false)
        .tokenize()
        .map_err(|err| FireboltError::Interface(format!("unable to tokenize statement: {err}")))
}

fn render(tokens: &[Token]) -> String {
    tokens.iter().map(ToString::to_string).collect()
}

fn is_trivia(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_))
}

fn is_comparison(token: &Token) -> bool {
    matches!(
        token,
        Token::Eq
            | Token::DoubleEq
            | Token::Neq
            | Token::Lt
            | Token::Gt
            | Token::LtEq
            | Token::GtEq
            | Token::Spaceship
    )
}

fn is_word(token: &Token, keyword: &str) -> bool {
    match token {
        Token::Word(word) => word.quote_style.is_none() && word.value.eq_ignore_ascii_case(keyword),
        _ => false,
    }
}

fn statement_to_sql(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_owned()
}

/// Splits a query on top-level semicolons.
///
/// Semicolons inside literals, quoted identifiers and comments do not split.
/// Always yields at least one statement; an empty query yields one empty
/// statement.
pub fn split_statements(sql: &str) -> Vec<String> {
    let tokens = match tokenize(sql) {
        Ok(tokens) => tokens,
        Err(_) => return vec![statement_to_sql(sql)],
    };

    let mut statements = Vec::new();
    for chunk in tokens.split(|token| matches!(token, Token::SemiColon)) {
        if chunk.iter().all(is_trivia) {
            continue;
        }
        statements.push(statement_to_sql(&render(chunk)));
    }
    if statements.is_empty() {
        statements.push(statement_to_sql(sql));
    }
    statements
}

/// Recognises a `SET` statement.
///
/// Returns `Ok(None)` for anything that does not start with `SET`, and an
/// [`FireboltError::Interface`] for a `SET` without a comparison.
pub fn try_parse_set(statement: &str) -> Result<Option<SetParameter>, FireboltError> {
    let invalid = || {
        FireboltError::Interface(format!(
            "Invalid set statement format: {}, expected SET <param> = <value>",
            statement_to_sql(statement)
        ))
    };
    let tokens = match tokenize(statement) {
        Ok(tokens) => tokens,
        Err(_) if starts_with_set(statement) => return Err(invalid()),
        Err(_) => return Ok(None),
    };
    let mut significant = tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| !is_trivia(token));
    let Some((set_index, first)) = significant.next() else {
        return Ok(None);
    };
    if !is_word(first, "set") {
        return Ok(None);
    }

    let end = tokens
        .iter()
        .rposition(|token| !is_trivia(token) && !matches!(token, Token::SemiColon))
        .map_or(0, |index| index + 1);
    let body = tokens.get(set_index + 1..end).unwrap_or_default();
    let comparison = body.iter().position(is_comparison).ok_or_else(invalid)?;
    let name = render(&body[..comparison]).trim().to_owned();
    let raw_value = render(&body[comparison + 1..]).trim().to_owned();
    if name.is_empty() || raw_value.is_empty() {
        return Err(invalid());
    }

    let value = raw_value
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(&raw_value)
        .to_owned();
    Ok(Some(SetParameter { name, value }))
}

/// First word check for statements the tokenizer rejects.
fn starts_with_set(statement: &str) -> bool {
    statement
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '=')
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("set"))
}

/// Recognises `BEGIN`, `START TRANSACTION`, `COMMIT`, `END` and `ROLLBACK`
/// (with an optional `TRANSACTION`/`WORK` suffix).
pub fn transaction_command(statement: &str) -> Option<TransactionCommand> {
    let tokens = tokenize(statement).ok()?;
    let words: Vec<&Token> = tokens
        .iter()
        .filter(|token| !is_trivia(token) && !matches!(token, Token::SemiColon))
        .collect();
    let suffix_ok = |rest: &[&Token]| match rest {
        [] => true,
        [word] => is_word(word, "transaction") || is_word(word, "work"),
        _ => false,
    };

    match words.as_slice() {
        [first, rest @ ..] if is_word(first, "begin") && suffix_ok(rest) => {
            Some(TransactionCommand::Begin)
        }
        [first, second] if is_word(first, "start") && is_word(second, "transaction") => {
            Some(TransactionCommand::Begin)
        }
        [first, rest @ ..]
            if (is_word(first, "commit") || is_word(first, "end")) && suffix_ok(rest) =>
        {
            Some(TransactionCommand::Commit)
        }
        [first, rest @ ..] if is_word(first, "rollback") && suffix_ok(rest) => {
            Some(TransactionCommand::Rollback)
        }
        _ => None,
    }
}

/// Replaces every `?` placeholder, left to right, with the SQL literal of
/// the matching parameter.
pub fn substitute_placeholders(
    statement: &str,
    parameters: &[Value],
) -> Result<String, FireboltError> {
    let tokens = tokenize(statement)?;
    let mut used = 0usize;
    let mut sql = String::with_capacity(statement.len());
    for token in &tokens {
        match token {
            Token::Placeholder(placeholder) if placeholder.starts_with('?') => {
                let value = parameters.get(used).ok_or_else(|| {
                    FireboltError::Data(format!(
                        "not enough parameters provided for substitution: given {}, found one more",
                        parameters.len()
                    ))
                })?;
                sql.push_str(&format_value(value)?);
                used += 1;
            }
            other => sql.push_str(&other.to_string()),
        }
    }
    if used < parameters.len() {
        return Err(FireboltError::Data(format!(
            "too many parameters provided for substitution: given {}, used only {used}",
            parameters.len()
        )));
    }
    Ok(statement_to_sql(&sql))
}

/// Shifts every `$n` placeholder by `offset`, so that concatenated statements
/// keep distinct parameter numbers.
pub fn renumber_placeholders(statement: &str, offset: usize) -> Result<String, FireboltError> {
    let tokens = tokenize(statement)?;
    let mut sql = String::with_capacity(statement.len() + 8);
    for token in &tokens {
        let renumbered = match token {
            Token::Placeholder(placeholder) => placeholder
                .strip_prefix('$')
                .and_then(|digits| digits.parse::<usize>().ok())
                .map(|index| format!("${}", index + offset)),
            _ => None,
        };
        match renumbered {
            Some(placeholder) => sql.push_str(&placeholder),
            None => sql.push_str(&token.to_string()),
        }
    }
    Ok(statement_to_sql(&sql))
}
